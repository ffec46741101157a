use crate::error::{HttpError, HttpResult};
use crate::ws::frame::{self, OpCode, WsFrame};
use crate::ws::WsHandler;
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;
use weft::logging;

/// Close status codes used on the wire.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const UNSUPPORTED_DATA: u16 = 1003;
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const MESSAGE_TOO_BIG: u16 = 1009;
    pub const INTERNAL_ERROR: u16 = 1011;
}

/// True for codes this runtime is willing to put on the wire.
pub fn valid_close_code(code: u16) -> bool {
    matches!(
        code,
        close_code::NORMAL
            | close_code::GOING_AWAY
            | close_code::PROTOCOL_ERROR
            | close_code::UNSUPPORTED_DATA
            | close_code::POLICY_VIOLATION
            | close_code::MESSAGE_TOO_BIG
            | close_code::INTERNAL_ERROR
    ) || (3000..5000).contains(&code)
}

/// Default cap on an assembled message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Grace period allowed for the peer to acknowledge a close we initiated.
pub const CLOSE_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WsState {
    Open,
    Closing,
    Closed,
}

struct WriteHalf {
    stream: Box<dyn Write + Send>,
    state: WsState,
}

/// Cloneable sender half of a WebSocket connection. All writes are
/// serialised under the connection-wide write lock; sends on a closed
/// connection fail.
#[derive(Clone)]
pub struct WsSender {
    id: u64,
    inner: Arc<Mutex<WriteHalf>>,
}

impl WsSender {
    pub fn new(id: u64, stream: Box<dyn Write + Send>) -> WsSender {
        WsSender {
            id,
            inner: Arc::new(Mutex::new(WriteHalf {
                stream,
                state: WsState::Open,
            })),
        }
    }

    /// Connection identity, unique within the server.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> WsState {
        self.inner.lock().state
    }

    fn send(&self, frame: &WsFrame) -> HttpResult<()> {
        let mut half = self.inner.lock();

        if half.state == WsState::Closed {
            return Err(HttpError::ConnectionClosed);
        }

        frame::write_frame(&mut half.stream, frame)
    }

    pub fn send_text(&self, text: &str) -> HttpResult<()> {
        self.send(&WsFrame::text(text))
    }

    pub fn send_binary(&self, payload: &[u8]) -> HttpResult<()> {
        self.send(&WsFrame::binary(payload.to_vec()))
    }

    pub fn send_ping(&self, payload: &[u8]) -> HttpResult<()> {
        self.send(&WsFrame::ping(payload.to_vec()))
    }

    pub fn send_pong(&self, payload: &[u8]) -> HttpResult<()> {
        self.send(&WsFrame::pong(payload.to_vec()))
    }

    /// Initiate the close sequence: send a Close frame and move to Closing.
    /// The receive loop completes the transition when the peer acknowledges.
    pub fn close(&self, code: u16, reason: &str) -> HttpResult<()> {
        if !valid_close_code(code) {
            return Err(HttpError::WebSocketProtocol(format!(
                "invalid close code: {}",
                code
            )));
        }

        let mut half = self.inner.lock();

        match half.state {
            WsState::Open => {
                frame::write_frame(&mut half.stream, &WsFrame::close(code, reason))?;
                half.state = WsState::Closing;
                Ok(())
            }
            WsState::Closing => Ok(()),
            WsState::Closed => Err(HttpError::ConnectionClosed),
        }
    }

    /// Echo the peer's close payload and transition straight to Closed.
    fn acknowledge_close(&self, payload: Vec<u8>) {
        let mut half = self.inner.lock();
        if half.state != WsState::Closed {
            let _ = frame::write_frame(&mut half.stream, &WsFrame::close_raw(payload));
            half.state = WsState::Closed;
        }
    }

    pub(crate) fn mark_closed(&self) {
        self.inner.lock().state = WsState::Closed;
    }
}

/// Server side of one upgraded connection: owns the read half and drives
/// the per-connection state machine, dispatching to the handler.
pub struct WsConnection<R: Read> {
    reader: R,
    sender: WsSender,
    max_message_size: usize,
    /// Opcode of the fragment sequence in progress, empty otherwise.
    fragment_opcode: Option<OpCode>,
    fragment_buffer: Vec<u8>,
    log: logging::Logger,
}

impl<R: Read> WsConnection<R> {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        reader: R,
        sender: WsSender,
        log: L,
    ) -> WsConnection<R> {
        let conn_log = match log.into() {
            Some(log) => log.new(logging::o!("ws_conn" => sender.id())),
            _ => logging::Logger::root(logging::Discard, logging::o!()),
        };

        WsConnection {
            reader,
            sender,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            fragment_opcode: None,
            fragment_buffer: Vec::new(),
            log: conn_log,
        }
    }

    pub fn set_max_message_size(&mut self, max_message_size: usize) {
        self.max_message_size = max_message_size;
    }

    pub fn sender(&self) -> WsSender {
        self.sender.clone()
    }

    /// Blocking receive loop. Returns once the connection reaches Closed;
    /// protocol violations close with 1002 and surface as errors.
    pub fn run(&mut self, handler: &dyn WsHandler) -> HttpResult<()> {
        loop {
            let frame = match frame::read_frame(&mut self.reader, self.max_message_size) {
                Ok(frame) => frame,
                Err(HttpError::PayloadTooLarge) => {
                    return self.fail(close_code::MESSAGE_TOO_BIG, "message too large", handler);
                }
                Err(HttpError::WebSocketProtocol(reason)) => {
                    return self.fail(close_code::PROTOCOL_ERROR, &reason, handler);
                }
                Err(err) => {
                    logging::debug!(self.log, "read failed"; "error" => %err);
                    self.sender.mark_closed();
                    handler.on_close(&self.sender, None, "connection error");
                    return Err(err);
                }
            };

            // Client-to-server frames must be masked.
            if frame.mask.is_none() {
                return self.fail(close_code::PROTOCOL_ERROR, "unmasked client frame", handler);
            }

            match frame.opcode {
                OpCode::Close => {
                    let (status, reason) = frame::parse_close_payload(&frame.payload);

                    match self.sender.state() {
                        WsState::Open => {
                            logging::debug!(self.log, "peer close"; "status" => status);
                            handler.on_close(&self.sender, status, &reason);
                            self.sender.acknowledge_close(frame.payload);
                        }
                        WsState::Closing => {
                            // We initiated; the peer acknowledged.
                            self.sender.mark_closed();
                        }
                        WsState::Closed => (),
                    }

                    return Ok(());
                }
                OpCode::Ping => {
                    // Pong mirrors the ping payload.
                    let _ = self.sender.send_pong(&frame.payload);
                }
                OpCode::Pong => handler.on_pong(&self.sender, &frame.payload),
                OpCode::Text | OpCode::Binary => {
                    if self.fragment_opcode.is_some() {
                        return self.fail(
                            close_code::PROTOCOL_ERROR,
                            "new message during fragmented sequence",
                            handler,
                        );
                    }

                    if frame.fin {
                        self.deliver(handler, frame.opcode, frame.payload);
                    } else {
                        self.fragment_opcode = Some(frame.opcode);
                        self.fragment_buffer = frame.payload;
                    }
                }
                OpCode::Continuation => {
                    if self.fragment_opcode.is_none() {
                        return self.fail(
                            close_code::PROTOCOL_ERROR,
                            "continuation without fragmented message",
                            handler,
                        );
                    }

                    if self.fragment_buffer.len() + frame.payload.len() > self.max_message_size {
                        self.fragment_opcode = None;
                        self.fragment_buffer.clear();
                        return self.fail(close_code::MESSAGE_TOO_BIG, "message too large", handler);
                    }

                    self.fragment_buffer.extend_from_slice(&frame.payload);

                    if frame.fin {
                        let opcode = self
                            .fragment_opcode
                            .take()
                            .expect("Fragment sequence must have an opcode");
                        let payload = std::mem::replace(&mut self.fragment_buffer, Vec::new());
                        self.deliver(handler, opcode, payload);
                    }
                }
            }
        }
    }

    /// Wait briefly for the peer to acknowledge a close we initiated. The
    /// caller bounds the wait with a socket read timeout.
    pub fn await_close_ack(&mut self) {
        loop {
            match frame::read_frame(&mut self.reader, self.max_message_size) {
                Ok(frame) if frame.opcode == OpCode::Close => {
                    self.sender.mark_closed();
                    return;
                }
                Ok(_) => continue,
                Err(_) => {
                    self.sender.mark_closed();
                    return;
                }
            }
        }
    }

    fn deliver(&self, handler: &dyn WsHandler, opcode: OpCode, payload: Vec<u8>) {
        match opcode {
            OpCode::Text => {
                let text = String::from_utf8_lossy(&payload);
                handler.on_text(&self.sender, &text);
            }
            OpCode::Binary => handler.on_binary(&self.sender, &payload),
            opcode => panic!("Delivery of non-data opcode {:?}", opcode),
        }
    }

    /// Close with the given status after a protocol failure and surface the
    /// error to the driver.
    fn fail(&mut self, code: u16, reason: &str, handler: &dyn WsHandler) -> HttpResult<()> {
        logging::debug!(self.log, "closing after protocol failure";
                        "code" => code,
                        "reason" => reason);

        let _ = self.sender.close(code, reason);
        handler.on_close(&self.sender, Some(code), reason);

        Err(HttpError::WebSocketProtocol(reason.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::frame::{read_frame, write_frame};
    use parking_lot::Mutex as PlMutex;
    use std::io::Cursor;

    /// Write half capturing everything the server sends.
    #[derive(Clone)]
    struct SharedBuf(Arc<PlMutex<Vec<u8>>>);

    impl SharedBuf {
        fn new() -> SharedBuf {
            SharedBuf(Arc::new(PlMutex::new(Vec::new())))
        }

        fn frames(&self) -> Vec<WsFrame> {
            let bytes = self.0.lock().clone();
            let mut cursor = Cursor::new(bytes);
            let mut frames = Vec::new();
            while let Ok(frame) = read_frame(&mut cursor, usize::max_value()) {
                frames.push(frame);
            }
            frames
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Journal-recording handler.
    struct Journal(Arc<PlMutex<Vec<String>>>);

    impl WsHandler for Journal {
        fn on_text(&self, conn: &WsSender, text: &str) {
            self.0.lock().push(format!("text:{}", text));
            let _ = conn.send_text(&format!("Echo: {}", text));
        }

        fn on_binary(&self, _conn: &WsSender, data: &[u8]) {
            self.0.lock().push(format!("binary:{}", data.len()));
        }

        fn on_pong(&self, _conn: &WsSender, data: &[u8]) {
            self.0.lock().push(format!("pong:{}", data.len()));
        }

        fn on_close(&self, _conn: &WsSender, status: Option<u16>, reason: &str) {
            self.0.lock().push(format!("close:{:?}:{}", status, reason));
        }
    }

    const KEY: [u8; 4] = [0x11, 0x22, 0x33, 0x44];

    fn wire(frames: &[WsFrame]) -> Cursor<Vec<u8>> {
        let mut bytes = Vec::new();
        for frame in frames {
            write_frame(&mut bytes, &frame.clone().masked(KEY)).unwrap();
        }
        Cursor::new(bytes)
    }

    fn run_conn(frames: &[WsFrame]) -> (Vec<String>, SharedBuf, HttpResult<()>) {
        let journal = Arc::new(PlMutex::new(Vec::new()));
        let out = SharedBuf::new();
        let sender = WsSender::new(1, Box::new(out.clone()));
        let mut conn = WsConnection::new(wire(frames), sender, None);

        let result = conn.run(&Journal(journal.clone()));
        let journal = journal.lock().clone();
        (journal, out, result)
    }

    #[test]
    fn test_text_echo_and_close() {
        let (journal, out, result) = run_conn(&[
            WsFrame::text("ping"),
            WsFrame::close(close_code::NORMAL, "done"),
        ]);

        assert!(result.is_ok());
        assert_eq!(journal[0], "text:ping");
        assert_eq!(journal[1], "close:Some(1000):done");

        let frames = out.frames();
        assert_eq!(frames[0].opcode, OpCode::Text);
        assert_eq!(frames[0].mask, None);
        assert_eq!(frames[0].payload, b"Echo: ping");
        // The close is echoed with the peer's status.
        assert_eq!(frames[1].opcode, OpCode::Close);
        let (code, _) = frame::parse_close_payload(&frames[1].payload);
        assert_eq!(code, Some(1000));
    }

    #[test]
    fn test_fragmented_message_assembled_once() {
        let (journal, _out, result) = run_conn(&[
            WsFrame {
                fin: false,
                opcode: OpCode::Text,
                mask: None,
                payload: b"hel".to_vec(),
            },
            WsFrame::continuation(false, b"lo ".to_vec()),
            WsFrame::continuation(true, b"world".to_vec()),
            WsFrame::close(close_code::NORMAL, ""),
        ]);

        assert!(result.is_ok());
        assert_eq!(journal[0], "text:hello world");
        assert_eq!(
            journal
                .iter()
                .filter(|entry| entry.starts_with("text:"))
                .count(),
            1
        );
    }

    #[test]
    fn test_ping_answered_with_pong() {
        let (_journal, out, result) =
            run_conn(&[WsFrame::ping(b"beat".to_vec()), WsFrame::close(1000, "")]);

        assert!(result.is_ok());
        let frames = out.frames();
        assert_eq!(frames[0].opcode, OpCode::Pong);
        assert_eq!(frames[0].payload, b"beat");
    }

    #[test]
    fn test_pong_delivered_to_handler() {
        let (journal, _out, _result) =
            run_conn(&[WsFrame::pong(b"ok".to_vec()), WsFrame::close(1000, "")]);

        assert_eq!(journal[0], "pong:2");
    }

    #[test]
    fn test_orphan_continuation_is_1002() {
        let (journal, out, result) = run_conn(&[WsFrame::continuation(true, b"x".to_vec())]);

        assert!(matches!(result, Err(HttpError::WebSocketProtocol(_))));
        assert!(journal[0].starts_with("close:Some(1002)"));

        let frames = out.frames();
        assert_eq!(frames[0].opcode, OpCode::Close);
        let (code, _) = frame::parse_close_payload(&frames[0].payload);
        assert_eq!(code, Some(close_code::PROTOCOL_ERROR));
    }

    #[test]
    fn test_new_message_during_fragments_is_1002() {
        let (_journal, out, result) = run_conn(&[
            WsFrame {
                fin: false,
                opcode: OpCode::Text,
                mask: None,
                payload: b"part".to_vec(),
            },
            WsFrame::text("interloper"),
        ]);

        assert!(result.is_err());
        let frames = out.frames();
        let (code, _) = frame::parse_close_payload(&frames[0].payload);
        assert_eq!(code, Some(close_code::PROTOCOL_ERROR));
    }

    #[test]
    fn test_unmasked_client_frame_is_1002() {
        let mut bytes = Vec::new();
        write_frame(&mut bytes, &WsFrame::text("bare")).unwrap();

        let journal = Arc::new(PlMutex::new(Vec::new()));
        let out = SharedBuf::new();
        let sender = WsSender::new(1, Box::new(out.clone()));
        let mut conn = WsConnection::new(Cursor::new(bytes), sender, None);

        let result = conn.run(&Journal(journal.clone()));
        assert!(matches!(result, Err(HttpError::WebSocketProtocol(_))));
    }

    #[test]
    fn test_send_after_close_fails() {
        let out = SharedBuf::new();
        let sender = WsSender::new(1, Box::new(out.clone()));

        sender.mark_closed();

        assert!(matches!(
            sender.send_text("late"),
            Err(HttpError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_close_initiation_transitions_to_closing() {
        let out = SharedBuf::new();
        let sender = WsSender::new(1, Box::new(out.clone()));

        sender.close(close_code::GOING_AWAY, "maintenance").unwrap();
        assert_eq!(sender.state(), WsState::Closing);

        // Second close is a no-op; sends now fail only once fully closed.
        sender.close(close_code::GOING_AWAY, "again").unwrap();
        assert_eq!(out.frames().len(), 1);
    }

    #[test]
    fn test_close_rejects_invalid_code() {
        let out = SharedBuf::new();
        let sender = WsSender::new(1, Box::new(out.clone()));

        assert!(matches!(
            sender.close(1005, "reserved"),
            Err(HttpError::WebSocketProtocol(_))
        ));
        assert!(sender.close(4000, "app code").is_ok());
    }

    #[test]
    fn test_peer_ack_completes_initiated_close() {
        let out = SharedBuf::new();
        let sender = WsSender::new(1, Box::new(out.clone()));
        sender.close(close_code::NORMAL, "bye").unwrap();

        let journal = Arc::new(PlMutex::new(Vec::new()));
        let mut conn = WsConnection::new(
            wire(&[WsFrame::close(close_code::NORMAL, "bye")]),
            sender.clone(),
            None,
        );
        let result = conn.run(&Journal(journal.clone()));

        assert!(result.is_ok());
        assert_eq!(sender.state(), WsState::Closed);
        // No on_close hook: we initiated the close ourselves.
        assert!(journal.lock().is_empty());
    }
}

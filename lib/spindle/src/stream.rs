use crate::error::{HttpError, HttpResult};
use crate::wire::reader::read_line_crlf;
use std::fs::File;
use std::io::{self, BufRead, Read, Write};
use std::path::Path;

/// Writer interface handed to streaming response emitters. Flushing forces a
/// chunk boundary when the body is chunk encoded.
pub trait BodySink {
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    fn write_str(&mut self, text: &str) -> io::Result<()> {
        self.write(text.as_bytes())
    }

    fn flush(&mut self) -> io::Result<()>;

    fn write_flush(&mut self, data: &[u8]) -> io::Result<()> {
        self.write(data)?;
        self.flush()
    }
}

/// A streaming response body: invoked once with the sink wired to the
/// connection.
pub type Emitter = Box<dyn FnOnce(&mut dyn BodySink) -> io::Result<()> + Send>;

/// Sink for bodies with a known `Content-Length`. Writing past the declared
/// length is an error.
pub struct SizedSink<'a> {
    out: &'a mut dyn Write,
    remaining: usize,
}

impl<'a> SizedSink<'a> {
    pub fn new(out: &'a mut dyn Write, length: usize) -> SizedSink<'a> {
        SizedSink {
            out,
            remaining: length,
        }
    }

    /// Bytes still owed against the declared length.
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl<'a> BodySink for SizedSink<'a> {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if data.len() > self.remaining {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "body exceeds the declared Content-Length",
            ));
        }

        self.out.write_all(data)?;
        self.remaining -= data.len();
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

const CHUNK_BUFFER_SIZE: usize = 8192;

/// Sink emitting `hex-size CRLF bytes CRLF` chunks. Data accumulates until
/// the internal buffer fills or the emitter flushes.
pub struct ChunkedSink<'a> {
    out: &'a mut dyn Write,
    buffer: Vec<u8>,
}

impl<'a> ChunkedSink<'a> {
    pub fn new(out: &'a mut dyn Write) -> ChunkedSink<'a> {
        ChunkedSink {
            out,
            buffer: Vec::with_capacity(CHUNK_BUFFER_SIZE),
        }
    }

    fn emit_chunk(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        write!(self.out, "{:x}\r\n", self.buffer.len())?;
        self.out.write_all(&self.buffer)?;
        self.out.write_all(b"\r\n")?;
        self.buffer.clear();
        Ok(())
    }

    /// Emit any buffered data and the `0 CRLF CRLF` terminator.
    pub fn finish(mut self) -> io::Result<()> {
        self.emit_chunk()?;
        self.out.write_all(b"0\r\n\r\n")?;
        self.out.flush()
    }
}

impl<'a> BodySink for ChunkedSink<'a> {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.buffer.extend_from_slice(data);
        if self.buffer.len() >= CHUNK_BUFFER_SIZE {
            self.emit_chunk()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.emit_chunk()?;
        self.out.flush()
    }
}

/// A Server-Sent Event. Serialises as `id:`/`event:`/`retry:` lines followed
/// by one `data:` line per payload line, terminated by a blank line.
#[derive(Debug, Clone, Default)]
pub struct SseEvent {
    pub id: Option<String>,
    pub event: Option<String>,
    pub retry: Option<u64>,
    pub data: String,
}

impl SseEvent {
    pub fn new<D: Into<String>>(data: D) -> SseEvent {
        SseEvent {
            id: None,
            event: None,
            retry: None,
            data: data.into(),
        }
    }

    pub fn with_id<I: Into<String>>(mut self, id: I) -> SseEvent {
        self.id = Some(id.into());
        self
    }

    pub fn with_event<E: Into<String>>(mut self, event: E) -> SseEvent {
        self.event = Some(event.into());
        self
    }

    pub fn with_retry(mut self, retry_millis: u64) -> SseEvent {
        self.retry = Some(retry_millis);
        self
    }

    /// Wire form of the event, including the terminating blank line.
    pub fn to_frame(&self) -> String {
        let mut frame = String::new();

        if let Some(id) = &self.id {
            frame.push_str("id: ");
            frame.push_str(id);
            frame.push('\n');
        }
        if let Some(event) = &self.event {
            frame.push_str("event: ");
            frame.push_str(event);
            frame.push('\n');
        }
        if let Some(retry) = self.retry {
            frame.push_str(&format!("retry: {}\n", retry));
        }
        for line in self.data.split('\n') {
            frame.push_str("data: ");
            frame.push_str(line);
            frame.push('\n');
        }
        frame.push('\n');

        frame
    }
}

/// Event-oriented wrapper over a body sink. Every send flushes so events
/// reach the client immediately.
pub struct SseSink<'a> {
    sink: &'a mut dyn BodySink,
}

impl<'a> SseSink<'a> {
    pub fn new(sink: &'a mut dyn BodySink) -> SseSink<'a> {
        SseSink { sink }
    }

    pub fn send(&mut self, event: &SseEvent) -> io::Result<()> {
        self.sink.write_flush(event.to_frame().as_bytes())
    }

    /// An SSE comment line; clients ignore it.
    pub fn comment(&mut self, text: &str) -> io::Result<()> {
        self.sink
            .write_flush(format!(": {}\n\n", text).as_bytes())
    }

    /// The conventional keep-alive comment.
    pub fn heartbeat(&mut self) -> io::Result<()> {
        self.comment("ping")
    }
}

/// Emitter streaming a file from disk in fixed size slabs.
pub fn file_emitter<P: AsRef<Path>>(path: P) -> Emitter {
    let path = path.as_ref().to_path_buf();

    Box::new(move |sink| {
        let mut file = File::open(path)?;
        let mut slab = [0u8; 65536];

        loop {
            let count = file.read(&mut slab)?;
            if count == 0 {
                break;
            }
            sink.write(&slab[..count])?;
        }

        sink.flush()
    })
}

enum ChunkState {
    Size,
    Data { remaining: usize },
    Trailers,
    Done,
}

enum BodyKind {
    Empty,
    Sized { remaining: usize },
    Chunked { state: ChunkState },
}

const CHUNK_SIZE_LINE_MAX: usize = 1024;

/// Pull-based reader over a request body, for streaming handlers and for
/// buffering. Decodes chunked transfer transparently and enforces the body
/// cap across both framings.
pub struct BodyReader<'a> {
    reader: &'a mut dyn BufRead,
    kind: BodyKind,
    length: Option<usize>,
    limit: usize,
    consumed: usize,
}

impl<'a> BodyReader<'a> {
    /// Reader for an absent body.
    pub fn empty(reader: &'a mut dyn BufRead, limit: usize) -> BodyReader<'a> {
        BodyReader {
            reader,
            kind: BodyKind::Empty,
            length: Some(0),
            limit,
            consumed: 0,
        }
    }

    /// Reader for a `Content-Length` delimited body.
    pub fn sized(reader: &'a mut dyn BufRead, length: usize, limit: usize) -> BodyReader<'a> {
        BodyReader {
            reader,
            kind: BodyKind::Sized { remaining: length },
            length: Some(length),
            limit,
            consumed: 0,
        }
    }

    /// Reader for a chunk encoded body.
    pub fn chunked(reader: &'a mut dyn BufRead, limit: usize) -> BodyReader<'a> {
        BodyReader {
            reader,
            kind: BodyKind::Chunked {
                state: ChunkState::Size,
            },
            length: None,
            limit,
            consumed: 0,
        }
    }

    /// The declared `Content-Length`, if the body is length delimited.
    pub fn content_length(&self) -> Option<usize> {
        self.length
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self.kind, BodyKind::Chunked { .. })
    }

    /// Read into the buffer, returning the number of bytes read; zero means
    /// the body is exhausted.
    pub fn read(&mut self, buf: &mut [u8]) -> HttpResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let count = match &mut self.kind {
            BodyKind::Empty => 0,
            BodyKind::Sized { remaining } => {
                if *remaining == 0 {
                    return Ok(0);
                }

                let want = buf.len().min(*remaining);
                let count = self.reader.read(&mut buf[..want])?;
                if count == 0 {
                    return Err(HttpError::ConnectionClosed);
                }
                *remaining -= count;
                count
            }
            BodyKind::Chunked { state } => loop {
                match state {
                    ChunkState::Done => break 0,
                    ChunkState::Size => {
                        let line = read_line_crlf(self.reader, CHUNK_SIZE_LINE_MAX)?;
                        let size_token = line.split(';').next().unwrap_or("").trim();
                        let size = usize::from_str_radix(size_token, 16).map_err(|_| {
                            HttpError::bad_request(format!("invalid chunk size: {}", size_token))
                        })?;

                        if size == 0 {
                            *state = ChunkState::Trailers;
                        } else {
                            *state = ChunkState::Data { remaining: size };
                        }
                    }
                    ChunkState::Data { remaining } => {
                        let want = buf.len().min(*remaining);
                        let count = self.reader.read(&mut buf[..want])?;
                        if count == 0 {
                            return Err(HttpError::ConnectionClosed);
                        }
                        *remaining -= count;

                        if *remaining == 0 {
                            // Chunk data is followed by a bare CRLF.
                            let mut crlf = [0u8; 2];
                            self.reader.read_exact(&mut crlf)?;
                            if &crlf != b"\r\n" {
                                return Err(HttpError::bad_request("chunk missing CRLF"));
                            }
                            *state = ChunkState::Size;
                        }

                        break count;
                    }
                    ChunkState::Trailers => {
                        // Trailers are read and ignored up to the blank line.
                        let line = read_line_crlf(self.reader, CHUNK_SIZE_LINE_MAX)?;
                        if line.is_empty() {
                            *state = ChunkState::Done;
                        }
                    }
                }
            },
        };

        self.consumed += count;
        if self.consumed > self.limit {
            return Err(HttpError::PayloadTooLarge);
        }

        Ok(count)
    }

    /// Read at most `max` bytes.
    pub fn read_max(&mut self, max: usize) -> HttpResult<Vec<u8>> {
        let mut out = Vec::new();
        let mut slab = [0u8; 8192];

        while out.len() < max {
            let want = slab.len().min(max - out.len());
            let count = self.read(&mut slab[..want])?;
            if count == 0 {
                break;
            }
            out.extend_from_slice(&slab[..count]);
        }

        Ok(out)
    }

    /// Discard up to `n` bytes, returning how many were skipped.
    pub fn skip(&mut self, n: usize) -> HttpResult<usize> {
        let mut skipped = 0;
        let mut slab = [0u8; 8192];

        while skipped < n {
            let want = slab.len().min(n - skipped);
            let count = self.read(&mut slab[..want])?;
            if count == 0 {
                break;
            }
            skipped += count;
        }

        Ok(skipped)
    }

    /// Buffer the whole remaining body, bounded by the body cap.
    pub fn read_remaining(&mut self) -> HttpResult<Vec<u8>> {
        let mut out = Vec::new();
        let mut slab = [0u8; 8192];

        loop {
            let count = self.read(&mut slab)?;
            if count == 0 {
                break;
            }
            out.extend_from_slice(&slab[..count]);
        }

        Ok(out)
    }

    /// Callback-driven consumption in slabs of at most `size` bytes.
    pub fn read_chunks<F>(&mut self, size: usize, mut callback: F) -> HttpResult<()>
    where
        F: FnMut(&[u8]) -> HttpResult<()>,
    {
        let mut slab = vec![0u8; size.max(1)];

        loop {
            let count = self.read(&mut slab)?;
            if count == 0 {
                return Ok(());
            }
            callback(&slab[..count])?;
        }
    }

    /// Consume and discard whatever is left, keeping the connection usable
    /// for the next request.
    pub fn drain(&mut self) -> HttpResult<()> {
        let mut slab = [0u8; 8192];
        loop {
            if self.read(&mut slab)? == 0 {
                return Ok(());
            }
        }
    }
}

use crate::error::{HttpError, HttpResult};
use crate::response::{status_phrase, Response, ResponseBody};
use crate::stream::{BodySink, ChunkedSink, SizedSink};
use std::io::Write;
use std::time::SystemTime;
use weft::time::http_date;

/// True for statuses that must not carry a body.
#[inline]
fn bodyless_status(status: u16) -> bool {
    status == 204 || status == 304 || (100..200).contains(&status)
}

fn write_head(out: &mut dyn Write, response: &Response) -> HttpResult<()> {
    write!(
        out,
        "HTTP/1.1 {} {}\r\n",
        response.status,
        status_phrase(response.status)
    )?;

    for (name, value) in response.headers.iter() {
        write!(out, "{}: {}\r\n", name, value)?;
    }

    out.write_all(b"\r\n")?;
    Ok(())
}

/// Serialise a response onto the wire.
///
/// Eager bodies are length delimited (a missing `Content-Length` is filled
/// in); streaming bodies use chunked transfer unless the caller already set
/// a `Content-Length`. `head_only` suppresses the body bytes while keeping
/// the headers intact.
pub fn write_response(
    out: &mut dyn Write,
    response: Response,
    keep_alive: bool,
    head_only: bool,
) -> HttpResult<()> {
    let mut response = response;

    if !response.headers.contains("date") {
        response.headers.set("Date", http_date(SystemTime::now()));
    }

    if !keep_alive {
        response.headers.set("Connection", "close");
    } else if !response.headers.contains("connection") {
        response.headers.set("Connection", "keep-alive");
    }

    match response.body {
        ResponseBody::Empty => {
            if !bodyless_status(response.status) && !response.headers.contains("content-length") {
                response.headers.set("Content-Length", "0");
            }
            write_head(out, &response)?;
        }
        ResponseBody::Bytes(ref bytes) => {
            if !response.headers.contains("content-length") {
                response
                    .headers
                    .set("Content-Length", bytes.len().to_string());
            }
            write_head(out, &response)?;

            if !head_only {
                out.write_all(bytes)?;
            }
        }
        ResponseBody::Stream(_) => {
            let declared = match response.headers.get("content-length") {
                Some(value) => Some(value.parse::<usize>().map_err(|_| {
                    HttpError::internal("unparsable Content-Length on streaming response")
                })?),
                None => None,
            };

            if declared.is_none() {
                response.headers.set("Transfer-Encoding", "chunked");
            }

            let emitter = match std::mem::replace(&mut response.body, ResponseBody::Empty) {
                ResponseBody::Stream(emitter) => emitter,
                _ => unreachable!(),
            };

            write_head(out, &response)?;

            if head_only {
                // Headers only; the emitter is dropped unused.
            } else if let Some(length) = declared {
                let mut sink = SizedSink::new(out, length);
                emitter(&mut sink)?;

                if sink.remaining() != 0 {
                    return Err(HttpError::internal(
                        "streaming body shorter than the declared Content-Length",
                    ));
                }
            } else {
                let mut sink = ChunkedSink::new(out);
                emitter(&mut sink)?;
                sink.finish()?;
            }
        }
    }

    out.flush()?;
    Ok(())
}

/// Best-effort error response on a connection that is about to close.
pub fn write_error(out: &mut dyn Write, err: &HttpError) -> HttpResult<()> {
    write_response(out, Response::from_error(err), false, false)
}

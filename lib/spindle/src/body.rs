use crate::config::BodyLimits;
use crate::error::{HttpError, HttpResult};
use crate::request::Request;
use crate::stream::BodyReader;
use crate::uri::form_decode;
use hashbrown::HashMap;
use std::io::{self, Cursor, Read, Write};
use std::str;
use tempfile::NamedTempFile;

/// Outcome of consuming a request body.
#[derive(Debug)]
pub enum ParseOutcome<T> {
    Parsed(T),
    /// A per-kind cap was exceeded.
    TooLarge,
    /// The body does not parse under the declared content type.
    Malformed(String),
    /// No parser accepts the declared content type.
    UnsupportedContentType,
}

impl<T> ParseOutcome<T> {
    /// Fold the outcome into the error taxonomy (413 / 400 / 415).
    pub fn into_result(self) -> HttpResult<T> {
        match self {
            ParseOutcome::Parsed(value) => Ok(value),
            ParseOutcome::TooLarge => Err(HttpError::PayloadTooLarge),
            ParseOutcome::Malformed(reason) => Err(HttpError::BadRequest(reason)),
            ParseOutcome::UnsupportedContentType => Err(HttpError::UnsupportedMediaType),
        }
    }
}

/// Decoded URL-encoded form. Duplicate fields keep the last occurrence.
pub fn parse_form(bytes: &[u8], limits: &BodyLimits) -> ParseOutcome<HashMap<String, String>> {
    match parse_form_multi(bytes, limits) {
        ParseOutcome::Parsed(multi) => ParseOutcome::Parsed(
            multi
                .into_iter()
                .filter_map(|(name, mut values)| values.pop().map(|value| (name, value)))
                .collect(),
        ),
        ParseOutcome::TooLarge => ParseOutcome::TooLarge,
        ParseOutcome::Malformed(reason) => ParseOutcome::Malformed(reason),
        ParseOutcome::UnsupportedContentType => ParseOutcome::UnsupportedContentType,
    }
}

/// Decoded URL-encoded form retaining every value per field.
pub fn parse_form_multi(
    bytes: &[u8],
    limits: &BodyLimits,
) -> ParseOutcome<HashMap<String, Vec<String>>> {
    if bytes.len() > limits.max_form_size {
        return ParseOutcome::TooLarge;
    }

    let text = match str::from_utf8(bytes) {
        Ok(text) => text,
        Err(_) => return ParseOutcome::Malformed("form body is not valid UTF-8".into()),
    };

    let mut form: HashMap<String, Vec<String>> = HashMap::new();

    for pair in text.split('&').filter(|pair| !pair.is_empty()) {
        let (name, value) = match pair.find('=') {
            Some(at) => (form_decode(&pair[..at]), form_decode(&pair[at + 1..])),
            None => (form_decode(pair), String::new()),
        };
        form.entry(name).or_insert_with(Vec::new).push(value);
    }

    ParseOutcome::Parsed(form)
}

/// UTF-8 text body.
pub fn parse_text(bytes: &[u8], limits: &BodyLimits) -> ParseOutcome<String> {
    if bytes.len() > limits.max_text_size {
        return ParseOutcome::TooLarge;
    }

    match str::from_utf8(bytes) {
        Ok(text) => ParseOutcome::Parsed(text.to_string()),
        Err(_) => ParseOutcome::Malformed("text body is not valid UTF-8".into()),
    }
}

/// Hand the body bytes to the external JSON codec.
pub fn parse_json<T: serde::de::DeserializeOwned>(
    bytes: &[u8],
    limits: &BodyLimits,
) -> ParseOutcome<T> {
    if bytes.len() > limits.max_json_size {
        return ParseOutcome::TooLarge;
    }

    match serde_json::from_slice(bytes) {
        Ok(value) => ParseOutcome::Parsed(value),
        Err(err) => ParseOutcome::Malformed(format!("invalid json: {}", err)),
    }
}

/// A structured body value chosen by content type.
#[derive(Debug)]
pub enum BodyValue {
    Form(HashMap<String, String>),
    Json(serde_json::Value),
    Text(String),
    Multipart(MultipartForm),
}

/// Content-type-dispatched body consumption over a buffered request.
pub fn parse(req: &Request, limits: &BodyLimits) -> ParseOutcome<BodyValue> {
    let content_type = match req.content_type() {
        Some(content_type) => content_type,
        None => return ParseOutcome::UnsupportedContentType,
    };

    match content_type.as_str() {
        "application/x-www-form-urlencoded" => match parse_form(&req.body, limits) {
            ParseOutcome::Parsed(form) => ParseOutcome::Parsed(BodyValue::Form(form)),
            ParseOutcome::TooLarge => ParseOutcome::TooLarge,
            ParseOutcome::Malformed(reason) => ParseOutcome::Malformed(reason),
            ParseOutcome::UnsupportedContentType => ParseOutcome::UnsupportedContentType,
        },
        "application/json" => match parse_json::<serde_json::Value>(&req.body, limits) {
            ParseOutcome::Parsed(value) => ParseOutcome::Parsed(BodyValue::Json(value)),
            ParseOutcome::TooLarge => ParseOutcome::TooLarge,
            ParseOutcome::Malformed(reason) => ParseOutcome::Malformed(reason),
            ParseOutcome::UnsupportedContentType => ParseOutcome::UnsupportedContentType,
        },
        "multipart/form-data" => {
            let raw = req.headers.get("content-type").unwrap_or("");
            match parse_multipart(&req.body, raw, limits) {
                ParseOutcome::Parsed(multipart) => {
                    ParseOutcome::Parsed(BodyValue::Multipart(multipart))
                }
                ParseOutcome::TooLarge => ParseOutcome::TooLarge,
                ParseOutcome::Malformed(reason) => ParseOutcome::Malformed(reason),
                ParseOutcome::UnsupportedContentType => ParseOutcome::UnsupportedContentType,
            }
        }
        content_type if content_type.starts_with("text/") => {
            match parse_text(&req.body, limits) {
                ParseOutcome::Parsed(text) => ParseOutcome::Parsed(BodyValue::Text(text)),
                ParseOutcome::TooLarge => ParseOutcome::TooLarge,
                ParseOutcome::Malformed(reason) => ParseOutcome::Malformed(reason),
                ParseOutcome::UnsupportedContentType => ParseOutcome::UnsupportedContentType,
            }
        }
        _ => ParseOutcome::UnsupportedContentType,
    }
}

/// Uploaded file contents: in memory for the buffered parser, spilled to a
/// temp file for the streaming parser.
#[derive(Debug)]
pub enum FileData {
    Memory(Vec<u8>),
    Temp(NamedTempFile),
}

impl FileData {
    /// Lazy reader over the contents.
    pub fn reader(&self) -> io::Result<Box<dyn Read + Send>> {
        match self {
            FileData::Memory(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            FileData::Temp(file) => Ok(Box::new(file.reopen()?)),
        }
    }

    /// The full contents, reading the temp file if needed.
    pub fn bytes(&self) -> io::Result<Vec<u8>> {
        match self {
            FileData::Memory(bytes) => Ok(bytes.clone()),
            FileData::Temp(file) => {
                let mut out = Vec::new();
                file.reopen()?.read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }
}

#[derive(Debug)]
pub struct FileUpload {
    pub field: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub data: FileData,
    pub size: usize,
}

/// Parsed multipart body: string fields plus file uploads.
#[derive(Debug)]
pub struct MultipartForm {
    pub fields: HashMap<String, String>,
    pub files: Vec<FileUpload>,
}

/// Extract the boundary parameter from a `Content-Type` header value.
pub fn boundary_from_content_type(header: &str) -> Option<String> {
    header.split(';').skip(1).find_map(|param| {
        let param = param.trim();
        let value = param.strip_prefix("boundary=")?;
        let value = value.trim_matches('"');
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    })
}

struct PartHead {
    name: Option<String>,
    filename: Option<String>,
    content_type: Option<String>,
}

fn disposition_param(value: &str, key: &str) -> Option<String> {
    value.split(';').skip(1).find_map(|param| {
        let param = param.trim();
        let rest = param.strip_prefix(key)?;
        let rest = rest.strip_prefix('=')?;
        Some(rest.trim_matches('"').to_string())
    })
}

fn parse_part_headers(block: &str) -> Result<PartHead, String> {
    let mut head = PartHead {
        name: None,
        filename: None,
        content_type: None,
    };

    for line in block.split("\r\n").filter(|line| !line.is_empty()) {
        let colon = line
            .find(':')
            .ok_or_else(|| format!("malformed part header: {}", line))?;
        let name = line[..colon].trim().to_ascii_lowercase();
        let value = line[colon + 1..].trim();

        match name.as_str() {
            "content-disposition" => {
                head.name = disposition_param(value, "name");
                head.filename = disposition_param(value, "filename");
            }
            "content-type" => head.content_type = Some(value.to_string()),
            _ => (),
        }
    }

    Ok(head)
}

#[inline]
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

enum PartSink {
    Mem(Vec<u8>),
    Disk(NamedTempFile),
}

impl PartSink {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            PartSink::Mem(buffer) => {
                buffer.extend_from_slice(data);
                Ok(())
            }
            PartSink::Disk(file) => file.write_all(data),
        }
    }
}

/// Windowed multipart scanner shared by the buffered and streaming parsers.
/// Scans part boundaries across read chunk borders while keeping only a
/// bounded tail of the body in memory.
fn parse_multipart_core(
    body: &mut BodyReader<'_>,
    boundary: &str,
    limits: &BodyLimits,
    spill_to_disk: bool,
) -> ParseOutcome<MultipartForm> {
    const PART_HEADER_CAP: usize = 16384;

    let delim = format!("--{}", boundary).into_bytes();
    let body_needle = format!("\r\n--{}", boundary).into_bytes();

    let mut window: Vec<u8> = Vec::new();
    let mut total: usize = 0;
    let mut eof = false;

    macro_rules! pull {
        () => {{
            let mut slab = [0u8; 8192];
            match body.read(&mut slab) {
                Ok(0) => eof = true,
                Ok(count) => {
                    total += count;
                    if total > limits.max_multipart_size {
                        return ParseOutcome::TooLarge;
                    }
                    window.extend_from_slice(&slab[..count]);
                }
                Err(HttpError::PayloadTooLarge) => return ParseOutcome::TooLarge,
                Err(err) => return ParseOutcome::Malformed(format!("body read failed: {}", err)),
            }
        }};
    }

    // Preamble: discard everything up to and including the first delimiter.
    loop {
        if let Some(at) = find(&window, &delim) {
            window.drain(..at + delim.len());
            break;
        }
        if eof {
            return ParseOutcome::Malformed("multipart boundary not found".into());
        }
        if window.len() >= delim.len() {
            window.drain(..window.len() - delim.len() + 1);
        }
        pull!();
    }

    let mut fields: HashMap<String, String> = HashMap::new();
    let mut files: Vec<FileUpload> = Vec::new();

    loop {
        // Right after a delimiter: `--` closes the body, CRLF opens a part.
        while window.len() < 2 && !eof {
            pull!();
        }
        if window.starts_with(b"--") {
            break;
        }
        if !window.starts_with(b"\r\n") {
            return ParseOutcome::Malformed("malformed multipart delimiter".into());
        }
        window.drain(..2);

        // Part headers up to the blank line.
        let head_end = loop {
            if let Some(at) = find(&window, b"\r\n\r\n") {
                break at;
            }
            if eof {
                return ParseOutcome::Malformed("unterminated part headers".into());
            }
            if window.len() > PART_HEADER_CAP {
                return ParseOutcome::Malformed("part header block too large".into());
            }
            pull!();
        };

        let head_text = String::from_utf8_lossy(&window[..head_end]).into_owned();
        window.drain(..head_end + 4);

        let head = match parse_part_headers(&head_text) {
            Ok(head) => head,
            Err(reason) => return ParseOutcome::Malformed(reason),
        };

        let is_file = head.filename.is_some();

        if is_file {
            if files.len() == limits.max_file_count {
                return ParseOutcome::TooLarge;
            }
            if let Some(allowed) = &limits.allowed_file_types {
                let content_type = head.content_type.clone().unwrap_or_default();
                if !allowed
                    .iter()
                    .any(|entry| entry.eq_ignore_ascii_case(&content_type))
                {
                    return ParseOutcome::UnsupportedContentType;
                }
            }
        }

        let mut sink = if is_file && spill_to_disk {
            match NamedTempFile::new() {
                Ok(file) => PartSink::Disk(file),
                Err(err) => {
                    return ParseOutcome::Malformed(format!("temp file creation failed: {}", err))
                }
            }
        } else {
            PartSink::Mem(Vec::new())
        };
        let mut part_size: usize = 0;

        // Part body up to the next `CRLF--boundary`.
        loop {
            if let Some(at) = find(&window, &body_needle) {
                if sink.write(&window[..at]).is_err() {
                    return ParseOutcome::Malformed("part write failed".into());
                }
                part_size += at;
                window.drain(..at + body_needle.len());
                break;
            }
            if eof {
                return ParseOutcome::Malformed("unterminated part body".into());
            }

            // Everything except a needle-sized tail is definitely part data.
            let safe = window.len().saturating_sub(body_needle.len() - 1);
            if safe > 0 {
                if sink.write(&window[..safe]).is_err() {
                    return ParseOutcome::Malformed("part write failed".into());
                }
                part_size += safe;
                window.drain(..safe);
            }

            if is_file && part_size > limits.max_file_size {
                return ParseOutcome::TooLarge;
            }

            pull!();
        }

        if is_file && part_size > limits.max_file_size {
            return ParseOutcome::TooLarge;
        }

        if is_file {
            let data = match sink {
                PartSink::Mem(buffer) => FileData::Memory(buffer),
                PartSink::Disk(file) => FileData::Temp(file),
            };
            files.push(FileUpload {
                field: head.name.unwrap_or_default(),
                filename: head.filename.expect("File part must carry a filename"),
                content_type: head.content_type,
                data,
                size: part_size,
            });
        } else {
            let name = match head.name {
                Some(name) => name,
                None => return ParseOutcome::Malformed("part missing a field name".into()),
            };
            let value = match sink {
                PartSink::Mem(buffer) => match String::from_utf8(buffer) {
                    Ok(value) => value,
                    Err(_) => {
                        return ParseOutcome::Malformed("field part is not valid UTF-8".into())
                    }
                },
                PartSink::Disk(_) => unreachable!("Field parts never spill to disk"),
            };
            fields.insert(name, value);
        }
    }

    ParseOutcome::Parsed(MultipartForm { fields, files })
}

/// Buffered multipart parser; file contents stay in memory.
pub fn parse_multipart(
    bytes: &[u8],
    content_type: &str,
    limits: &BodyLimits,
) -> ParseOutcome<MultipartForm> {
    if bytes.len() > limits.max_multipart_size {
        return ParseOutcome::TooLarge;
    }

    let boundary = match boundary_from_content_type(content_type) {
        Some(boundary) => boundary,
        None => return ParseOutcome::Malformed("content type missing multipart boundary".into()),
    };

    let mut cursor = Cursor::new(bytes);
    let mut reader = BodyReader::sized(&mut cursor, bytes.len(), bytes.len());

    parse_multipart_core(&mut reader, &boundary, limits, false)
}

/// Streaming multipart parser: consumes the body off the wire and spills
/// file parts to temp files, exposed as lazy readers.
pub fn parse_multipart_streaming(
    body: &mut BodyReader<'_>,
    content_type: &str,
    limits: &BodyLimits,
) -> ParseOutcome<MultipartForm> {
    let boundary = match boundary_from_content_type(content_type) {
        Some(boundary) => boundary,
        None => return ParseOutcome::Malformed("content type missing multipart boundary".into()),
    };

    parse_multipart_core(body, &boundary, limits, true)
}

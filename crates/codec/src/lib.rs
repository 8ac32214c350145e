//! ## HTTP-shaped chat wire codec
//!
//! The chat protocol frames every request and response as a minimal
//! HTTP/1.1 message: a start line, zero or more headers, an empty line and
//! a JSON body. Peers do not send `Content-Length`, frames may arrive
//! coalesced into a single read or split across several reads, and the
//! stream never terminates on a parse failure.
//!
//! The codec is pure: it performs no I/O and keeps no state besides the
//! residual bytes carried between calls.

pub mod crypto;
pub mod frame;
pub mod payload;

use crate::frame::Frame;

use std::str::Utf8Error;

#[derive(Debug)]
pub enum Error {
    InvalidStartLine,
    InvalidCodeLine,
    InvalidHeader,
    UnknownMethod,
    InvalidEnvelope,
    InvalidJson(serde_json::Error),
    Utf8Error(Utf8Error),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidJson(value)
    }
}

impl From<Utf8Error> for Error {
    fn from(value: Utf8Error) -> Self {
        Self::Utf8Error(value)
    }
}

/// Start-line signatures.
///
/// Because the protocol carries no `Content-Length`, the only way to find
/// the end of a body inside a coalesced buffer is to scan for the start of
/// the next recognizable frame.
const SIGNATURES: [&[u8]; 5] = [b"GET ", b"POST ", b"PUT ", b"DELETE ", b"HTTP/1."];

/// Incremental frame decoder.
///
/// Bytes are appended as they arrive from the socket; every call drains as
/// many complete frames as the accumulated buffer allows and retains the
/// incomplete tail for the next call. A malformed start line is reported as
/// an [`Error`] item and the decoder resumes at the following line.
///
/// # Test
///
/// ```
/// use chat_server_codec::{Decoder, frame::Method};
///
/// let mut decoder = Decoder::default();
///
/// // Two coalesced frames, the second split across reads.
/// let frames = decoder.decode(b"GET /login HTTP/1.1\r\n\r\nPOST /login HTTP/1.1\r\n");
/// assert_eq!(frames.len(), 1);
///
/// let frames = decoder.decode(b"\r\n{\"login\":\"panda\",\"password\":\"x\"}");
/// assert_eq!(frames.len(), 1);
///
/// let frame = frames.into_iter().next().unwrap().unwrap();
/// assert_eq!(frame.method(), Some(Method::Post));
/// assert_eq!(frame.path(), Some("/login"));
/// assert_eq!(frame.body(), "{\"login\":\"panda\",\"password\":\"x\"}");
/// ```
#[derive(Default)]
pub struct Decoder {
    residual: Vec<u8>,
}

enum Step {
    Complete(Frame, usize),
    Bad(Error, usize),
    Incomplete,
}

impl Decoder {
    /// Append a chunk and drain every frame that is now complete.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<Result<Frame, Error>> {
        self.residual.extend_from_slice(chunk);

        let buffer = std::mem::take(&mut self.residual);
        let mut frames = Vec::new();
        let mut offset = 0;

        while let Some(start) = find_signature(&buffer, offset) {
            match parse_frame(&buffer[start..]) {
                Step::Complete(frame, consumed) => {
                    frames.push(Ok(frame));
                    offset = start + consumed;
                }
                Step::Bad(error, skip) => {
                    frames.push(Err(error));
                    offset = start + skip;
                }
                Step::Incomplete => {
                    self.residual = buffer[start..].to_vec();
                    return frames;
                }
            }
        }

        // No further signature: everything left is either preamble noise or
        // the first bytes of a signature still in flight. Noise is dropped,
        // a possible signature prefix is kept for the next read.
        let tail = &buffer[offset..];
        let keep = tail.len() - signature_prefix_len(tail);
        if keep < tail.len() {
            self.residual = tail[keep..].to_vec();
        }

        frames
    }

    /// Bytes currently buffered waiting for the rest of a frame.
    pub fn pending(&self) -> usize {
        self.residual.len()
    }
}

/// Find the next start-line signature at or after `from`.
fn find_signature(buffer: &[u8], from: usize) -> Option<usize> {
    if from >= buffer.len() {
        return None;
    }

    (from..buffer.len())
        .find(|&at| SIGNATURES.iter().any(|sig| buffer[at..].starts_with(sig)))
}

/// Length of the longest buffer suffix that could still grow into a
/// signature ("POS" at the end of a read must survive until the "T /...").
fn signature_prefix_len(tail: &[u8]) -> usize {
    let longest = SIGNATURES.iter().map(|sig| sig.len()).max().unwrap_or(0);
    let window = tail.len().min(longest - 1);

    for len in (1..=window).rev() {
        let suffix = &tail[tail.len() - len..];
        if SIGNATURES.iter().any(|sig| sig.starts_with(suffix)) {
            return len;
        }
    }

    0
}

/// Parse one frame from the head of `buffer`, which is known to begin with
/// a start-line signature.
fn parse_frame(buffer: &[u8]) -> Step {
    let Some(line_end) = find_line(buffer, 0) else {
        return Step::Incomplete;
    };

    let start_line = match std::str::from_utf8(trim_line(&buffer[..line_end])) {
        Ok(line) => line,
        Err(e) => return Step::Bad(e.into(), line_end + 1),
    };

    let head = if buffer.starts_with(b"HTTP/1.") {
        frame::CodeLine::parse(start_line).map(Head::Response)
    } else {
        frame::StartLine::parse(start_line).map(Head::Request)
    };

    let head = match head {
        Ok(head) => head,
        Err(e) => return Step::Bad(e, line_end + 1),
    };

    // Header lines up to the empty line. A line without a colon also ends
    // the header block and begins the body, the way the reference servers
    // behave when the blank line is missing.
    let mut headers = Vec::new();
    let mut cursor = line_end + 1;
    loop {
        let Some(end) = find_line(buffer, cursor) else {
            return Step::Incomplete;
        };

        let line = trim_line(&buffer[cursor..end]);
        if line.is_empty() {
            cursor = end + 1;
            break;
        }

        let Some(colon) = line.iter().position(|&b| b == b':') else {
            break;
        };

        match frame::Header::parse(line, colon) {
            Ok(header) => headers.push(header),
            Err(e) => return Step::Bad(e, end + 1),
        }

        cursor = end + 1;
    }

    // An explicit Content-Length wins; the protocol itself never sends one,
    // but tolerating it costs nothing.
    let length = headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("content-length"))
        .and_then(|h| h.value.trim().parse::<usize>().ok());

    let body_end = match length {
        Some(size) => {
            if buffer.len() < cursor + size {
                return Step::Incomplete;
            }

            cursor + size
        }
        None => match find_signature(buffer, cursor) {
            Some(next) => next,
            None => {
                // End of buffer: final only if the body does not look like
                // JSON cut off mid-object.
                if json_incomplete(&buffer[cursor..]) {
                    return Step::Incomplete;
                }

                buffer.len()
            }
        },
    };

    let body = match std::str::from_utf8(&buffer[cursor..body_end]) {
        Ok(body) => body.trim_matches(['\r', '\n']).to_string(),
        Err(e) => return Step::Bad(e.into(), body_end),
    };

    let frame = match head {
        Head::Request(start) => Frame::Request {
            start,
            headers,
            body,
        },
        Head::Response(code) => Frame::Response {
            code,
            headers,
            body,
        },
    };

    Step::Complete(frame, body_end)
}

enum Head {
    Request(frame::StartLine),
    Response(frame::CodeLine),
}

/// Index of the `\n` terminating the line starting at `from`.
fn find_line(buffer: &[u8], from: usize) -> Option<usize> {
    buffer[from..].iter().position(|&b| b == b'\n').map(|i| from + i)
}

/// Strip the trailing `\r` of a CRLF-terminated line.
fn trim_line(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Whether `body` starts a JSON object that the buffer does not finish.
///
/// Brace counting skips string literals and escapes, so an embedded
/// `"{"` or `"\""` cannot unbalance the scan.
fn json_incomplete(body: &[u8]) -> bool {
    let trimmed = match body.iter().position(|&b| !b.is_ascii_whitespace()) {
        Some(at) => &body[at..],
        None => return false,
    };

    if trimmed[0] != b'{' {
        return false;
    }

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for &byte in trimmed {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }

            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return false;
                }
            }
            _ => {}
        }
    }

    true
}

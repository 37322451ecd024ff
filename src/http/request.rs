//! A four-state pull parser: `RequestLine` -> `Headers` -> `Body` -> `Finish`.
//!
//! Operates directly on a [`Buffer`](crate::buffer::Buffer)'s readable
//! window. Each state scans for the next `\r\n`-terminated line (or, for the
//! body, waits for `Content-Length` bytes to accumulate) and returns
//! [`Progress::NeedMoreData`] without advancing the buffer's read cursor if
//! what's wanted isn't there yet — the next `read_fd` fills in the rest and
//! the same call resumes exactly where it left off.

use std::collections::HashMap;
use std::fmt::Display;

use crate::buffer::Buffer;

use super::method::Method;
use super::version::Version;

/// Failures that cause the caller to emit a `400` and close after flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Unrecognized or malformed method token.
    #[error("invalid method")]
    Method,
    /// Malformed or missing request target.
    #[error("invalid request target")]
    Target,
    /// Unrecognized HTTP version token.
    #[error("invalid HTTP version")]
    Version,
    /// A header line was missing its `:` separator or contained invalid bytes.
    #[error("invalid header")]
    Header,
}

/// A fully parsed HTTP/1.1 request.
#[derive(Debug, Clone)]
pub struct Request {
    /// GET or POST.
    pub method: Method,
    /// Request target, taken verbatim (no `..` sanitization — see the
    /// responder's docs for why that's deliberate).
    pub path: String,
    /// Declared HTTP version.
    pub version: Version,
    /// Header names are lowercased on insertion so lookups are
    /// case-insensitive, as RFC 9110 requires.
    pub headers: HashMap<String, String>,
    /// Present only for POST with
    /// `Content-Type: application/x-www-form-urlencoded`.
    pub form: Option<HashMap<String, String>>,
    /// Derived from version + `Connection` header.
    pub keep_alive: bool,
}

enum State {
    RequestLine,
    Headers,
    Body { remaining: usize },
    Finish,
}

/// Result of one [`RequestParser::parse`] call.
pub enum Progress {
    /// Not enough bytes buffered yet; call again after the next `read_fd`.
    NeedMoreData,
    /// A full request was parsed and the buffer's read cursor has been
    /// advanced past it.
    Complete(Request),
}

/// Incremental request parser. One instance per connection; [`reset`] it
/// after a keep-alive request completes so the next request starts clean.
///
/// [`reset`]: RequestParser::reset
pub struct RequestParser {
    state: State,
    method: Option<Method>,
    path: Option<String>,
    version: Option<Version>,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    /// A parser ready to read a request line.
    pub fn new() -> Self {
        Self {
            state: State::RequestLine,
            method: None,
            path: None,
            version: None,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    /// Returns the parser to its initial state, ready for the next request
    /// on a keep-alive connection.
    pub fn reset(&mut self) {
        self.state = State::RequestLine;
        self.method = None;
        self.path = None;
        self.version = None;
        self.headers.clear();
        self.body.clear();
    }

    /// Drives the state machine as far as the buffered bytes allow.
    pub fn parse(&mut self, buf: &mut Buffer) -> Result<Progress, ParseError> {
        loop {
            match self.state {
                State::RequestLine => {
                    let Some(line) = take_line(buf) else {
                        return Ok(Progress::NeedMoreData);
                    };
                    self.parse_request_line(&line)?;
                    self.state = State::Headers;
                }
                State::Headers => loop {
                    let Some(line) = take_line(buf) else {
                        return Ok(Progress::NeedMoreData);
                    };
                    if line.is_empty() {
                        self.state = self.next_after_headers();
                        break;
                    }
                    self.parse_header_line(&line)?;
                },
                State::Body { remaining } => {
                    if buf.readable_bytes() < remaining {
                        return Ok(Progress::NeedMoreData);
                    }
                    self.body.extend_from_slice(&buf.peek()[..remaining]);
                    buf.retrieve(remaining);
                    self.state = State::Finish;
                }
                State::Finish => {
                    return Ok(Progress::Complete(self.finish()));
                }
            }
        }
    }

    fn next_after_headers(&self) -> State {
        let content_length = self
            .headers
            .get("content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);

        if self.method == Some(Method::Post) && content_length > 0 {
            State::Body {
                remaining: content_length,
            }
        } else {
            State::Finish
        }
    }

    fn parse_request_line(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let mut parts = line.split(|&b| b == b' ');
        let method = parts.next().filter(|s| !s.is_empty()).ok_or(ParseError::Method)?;
        let target = parts.next().filter(|s| !s.is_empty()).ok_or(ParseError::Target)?;
        let version = parts.next().filter(|s| !s.is_empty()).ok_or(ParseError::Version)?;
        if parts.next().is_some() {
            return Err(ParseError::Version);
        }

        self.method = Some(Method::from_bytes(method).ok_or(ParseError::Method)?);
        self.path = Some(
            std::str::from_utf8(target)
                .map_err(|_| ParseError::Target)?
                .to_string(),
        );
        self.version = Some(Version::from_bytes(version).ok_or(ParseError::Version)?);
        Ok(())
    }

    fn parse_header_line(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let colon = line.iter().position(|&b| b == b':').ok_or(ParseError::Header)?;
        let name = std::str::from_utf8(&line[..colon])
            .map_err(|_| ParseError::Header)?
            .trim()
            .to_ascii_lowercase();
        let value = std::str::from_utf8(&line[colon + 1..])
            .map_err(|_| ParseError::Header)?
            .trim()
            .to_string();
        if name.is_empty() {
            return Err(ParseError::Header);
        }
        self.headers.insert(name, value);
        Ok(())
    }

    fn finish(&mut self) -> Request {
        let version = self.version.expect("version set before Finish");
        let keep_alive = match self.headers.get("connection").map(|s| s.to_ascii_lowercase()) {
            Some(ref v) if v == "close" => false,
            Some(ref v) if v == "keep-alive" => true,
            _ => version == Version::Http11,
        };

        let method = self.method.expect("method set before Finish");
        let form = if method == Method::Post
            && self
                .headers
                .get("content-type")
                .map(|v| v.starts_with("application/x-www-form-urlencoded"))
                .unwrap_or(false)
        {
            Some(decode_form(&self.body))
        } else {
            None
        };

        let request = Request {
            method,
            path: self.path.take().expect("path set before Finish"),
            version,
            headers: std::mem::take(&mut self.headers),
            form,
            keep_alive,
        };
        self.reset();
        request
    }
}

/// Scans the buffer's readable window for the next `\r\n`-terminated line.
/// Returns the line *without* the terminator and advances the buffer's read
/// cursor past it. Returns `None` (without advancing anything) if no
/// complete line is buffered yet.
fn take_line(buf: &mut Buffer) -> Option<Vec<u8>> {
    let window = buf.peek();
    let pos = window.windows(2).position(|w| w == b"\r\n")?;
    let line = window[..pos].to_vec();
    buf.retrieve(pos + 2);
    Some(line)
}

/// Decodes an `application/x-www-form-urlencoded` body into key/value pairs:
/// split on `&` then `=`, `+` becomes space, `%XX` is hex-decoded.
fn decode_form(body: &[u8]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    if body.is_empty() {
        return map;
    }
    for pair in body.split(|&b| b == b'&') {
        if pair.is_empty() {
            continue;
        }
        let mut it = pair.splitn(2, |&b| b == b'=');
        let key = it.next().unwrap_or(b"");
        let value = it.next().unwrap_or(b"");
        map.insert(percent_decode(key), percent_decode(value));
    }
    map
}

fn percent_decode(bytes: &[u8]) -> String {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hex = &bytes[i + 1..i + 3];
                if let Ok(hex_str) = std::str::from_utf8(hex) {
                    if let Ok(byte) = u8::from_str_radix(hex_str, 16) {
                        out.push(byte);
                        i += 3;
                        continue;
                    }
                }
                out.push(bytes[i]);
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

impl Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.method, self.path, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_complete(raw: &[u8]) -> Request {
        let mut buf = Buffer::with_capacity(64);
        buf.append(raw);
        let mut parser = RequestParser::new();
        match parser.parse(&mut buf).unwrap() {
            Progress::Complete(req) => req,
            Progress::NeedMoreData => panic!("expected a complete request"),
        }
    }

    #[test]
    fn parses_simple_get() {
        let req = parse_complete(b"GET /index.html HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n");
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, "/index.html");
        assert_eq!(req.version, Version::Http11);
        assert!(req.keep_alive);
    }

    #[test]
    fn http_10_defaults_to_close_unless_keep_alive_requested() {
        let req = parse_complete(b"GET / HTTP/1.0\r\n\r\n");
        assert!(!req.keep_alive);
        let req = parse_complete(b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n");
        assert!(req.keep_alive);
    }

    #[test]
    fn explicit_close_header_overrides_http_11_default() {
        let req = parse_complete(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n");
        assert!(!req.keep_alive);
    }

    #[test]
    fn needs_more_data_when_request_line_incomplete() {
        let mut buf = Buffer::with_capacity(64);
        buf.append(b"GET / HTTP/1.1\r\nHost");
        let mut parser = RequestParser::new();
        match parser.parse(&mut buf).unwrap() {
            Progress::NeedMoreData => {}
            Progress::Complete(_) => panic!("should not be complete yet"),
        }
    }

    #[test]
    fn unknown_method_is_a_parse_error() {
        let mut buf = Buffer::with_capacity(64);
        buf.append(b"PATCH / HTTP/1.1\r\n\r\n");
        let mut parser = RequestParser::new();
        assert_eq!(parser.parse(&mut buf).unwrap_err(), ParseError::Method);
    }

    #[test]
    fn post_with_form_body_is_parsed_and_decoded() {
        let body = b"a=1&b=hello+world&c=%2Fpath";
        let raw = format!(
            "POST /submit HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            std::str::from_utf8(body).unwrap()
        );
        let req = parse_complete(raw.as_bytes());
        let form = req.form.expect("form should be decoded");
        assert_eq!(form.get("a").map(String::as_str), Some("1"));
        assert_eq!(form.get("b").map(String::as_str), Some("hello world"));
        assert_eq!(form.get("c").map(String::as_str), Some("/path"));
    }

    #[test]
    fn body_waits_for_full_content_length_across_multiple_fills() {
        let mut buf = Buffer::with_capacity(64);
        buf.append(b"POST /submit HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 5\r\n\r\nab");
        let mut parser = RequestParser::new();
        assert!(matches!(parser.parse(&mut buf).unwrap(), Progress::NeedMoreData));
        buf.append(b"cde");
        match parser.parse(&mut buf).unwrap() {
            Progress::Complete(req) => {
                assert_eq!(req.form.unwrap().get("abcde"), Some(&String::new()));
            }
            Progress::NeedMoreData => panic!("body should now be complete"),
        }
    }

    #[test]
    fn reset_allows_a_second_request_on_the_same_connection() {
        let mut buf = Buffer::with_capacity(128);
        buf.append(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n");
        let mut parser = RequestParser::new();
        let first = match parser.parse(&mut buf).unwrap() {
            Progress::Complete(req) => req,
            _ => panic!(),
        };
        assert_eq!(first.path, "/a");
        let second = match parser.parse(&mut buf).unwrap() {
            Progress::Complete(req) => req,
            _ => panic!(),
        };
        assert_eq!(second.path, "/b");
    }
}

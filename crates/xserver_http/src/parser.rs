//! Incremental HTTP/1.x request parser.
//!
//! Byte-driven state machine over an accumulating buffer. The caller keeps
//! appending to the same buffer and re-invoking [`RequestParser::parse`];
//! parser state (including the cursor) survives across reads. Ambiguous
//! body framing is rejected rather than resolved.

use http::StatusCode;
use thiserror::Error;

use crate::path::{PathReject, normalize_path};
use crate::request::{Method, Request, Version};

const MAX_METHOD_BYTES: usize = 16;
const MAX_URI_BYTES: usize = 8 * 1024;
const MAX_HEADER_NAME_BYTES: usize = 256;
const MAX_HEADER_VALUE_BYTES: usize = 8 * 1024;
const MAX_HEAD_BYTES: usize = 64 * 1024;
const MAX_HEADER_COUNT: usize = 100;
const MAX_BODY_BYTES: u64 = 10 * 1024 * 1024;

/// Hard cap on a whole request (head plus body) in the connection buffer.
pub const MAX_REQUEST_BYTES: u64 = 10 * 1024 * 1024;

/// Headers that must not repeat; a duplicate is treated as an attack.
const CRITICAL_HEADERS: [&str; 5] = [
    "content-length",
    "transfer-encoding",
    "host",
    "authorization",
    "cookie",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed request line")]
    BadRequestLine,
    #[error("request method not recognized")]
    UnknownMethod,
    #[error("request uri too long")]
    UriTooLong,
    #[error("request uri contains control characters")]
    UriControlChar,
    #[error("request path rejected")]
    BadPath,
    #[error("request path attempts traversal")]
    PathTraversal,
    #[error("malformed http version")]
    BadVersion,
    #[error("unsupported http version")]
    UnsupportedVersion,
    #[error("invalid header name")]
    HeaderNameInvalid,
    #[error("header name too long")]
    HeaderNameTooLong,
    #[error("invalid header value")]
    HeaderValueInvalid,
    #[error("header value too long")]
    HeaderValueTooLong,
    #[error("too many headers")]
    TooManyHeaders,
    #[error("request head too large")]
    HeadTooLarge,
    #[error("duplicate {0} header")]
    DuplicateCriticalHeader(String),
    #[error("both content-length and transfer-encoding present")]
    AmbiguousFraming,
    #[error("chunked transfer encoding not supported")]
    ChunkedUnsupported,
    #[error("transfer encoding not supported")]
    TransferEncodingUnsupported,
    #[error("invalid content-length")]
    BadContentLength,
    #[error("request body too large")]
    BodyTooLarge,
}

impl ParseError {
    /// Smuggling-shaped rejections are logged louder than plain parse noise.
    pub fn is_smuggling(&self) -> bool {
        matches!(
            self,
            Self::DuplicateCriticalHeader(_)
                | Self::AmbiguousFraming
                | Self::ChunkedUnsupported
                | Self::TransferEncodingUnsupported
                | Self::BadContentLength
                | Self::BadPath
                | Self::PathTraversal
        )
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnknownMethod => StatusCode::METHOD_NOT_ALLOWED,
            Self::UriTooLong => StatusCode::URI_TOO_LONG,
            Self::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::PathTraversal => StatusCode::FORBIDDEN,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Method,
    Uri,
    Version,
    VersionEol,
    HeaderName,
    HeaderValue,
    HeaderEol,
    HeaderEnd,
    Body,
    Complete,
    Failed,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseStatus {
    /// A full request was consumed; the count covers head and body.
    Complete(usize),
    NeedMore,
}

pub struct RequestParser {
    state: State,
    /// Cursor into the caller's accumulating buffer.
    pos: usize,
    max_body_bytes: u64,

    method_buf: Vec<u8>,
    uri_buf: Vec<u8>,
    version_buf: Vec<u8>,
    name_buf: Vec<u8>,
    value_buf: Vec<u8>,
    value_started: bool,

    method: Option<Method>,
    path: Option<String>,
    query: Option<String>,
    version: Option<Version>,
    headers: Vec<(String, String)>,

    head_len: usize,
    content_length: u64,
    request: Option<Request>,
}

fn is_token_char(b: u8) -> bool {
    (0x21..=0x7e).contains(&b) && b != b':'
}

fn is_value_char(b: u8) -> bool {
    (0x20..=0x7e).contains(&b) || b == b'\t'
}

/// Header-name lexical check, shared with the proxy's outbound re-validation.
pub fn valid_header_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_HEADER_NAME_BYTES
        && name.bytes().all(is_token_char)
}

/// Header-value lexical check, shared with the proxy's outbound re-validation.
pub fn valid_header_value(value: &str) -> bool {
    value.len() <= MAX_HEADER_VALUE_BYTES && value.bytes().all(is_value_char)
}

impl RequestParser {
    pub fn new(max_body_bytes: u64) -> Self {
        Self {
            state: State::Start,
            pos: 0,
            max_body_bytes: max_body_bytes.min(MAX_BODY_BYTES),
            method_buf: Vec::new(),
            uri_buf: Vec::new(),
            version_buf: Vec::new(),
            name_buf: Vec::new(),
            value_buf: Vec::new(),
            value_started: false,
            method: None,
            path: None,
            query: None,
            version: None,
            headers: Vec::new(),
            head_len: 0,
            content_length: 0,
            request: None,
        }
    }

    /// Continue parsing over the accumulated buffer. The same buffer (plus
    /// any newly appended bytes) must be passed on every call.
    pub fn parse(&mut self, buf: &[u8]) -> Result<ParseStatus, ParseError> {
        if self.state == State::Complete {
            return Ok(ParseStatus::Complete(self.head_len + self.content_length as usize));
        }
        if self.state == State::Failed {
            return Err(ParseError::BadRequestLine);
        }

        while self.pos < buf.len() {
            if self.state == State::Body {
                break;
            }
            if self.pos >= MAX_HEAD_BYTES {
                return Err(self.fail(ParseError::HeadTooLarge));
            }

            let b = buf[self.pos];
            match self.state {
                State::Start => {
                    // Tolerate stray CRLF ahead of the request line.
                    if b == b'\r' || b == b'\n' {
                        self.pos += 1;
                    } else {
                        self.state = State::Method;
                    }
                }
                State::Method => {
                    self.pos += 1;
                    if b == b' ' {
                        if self.method_buf.is_empty() {
                            return Err(self.fail(ParseError::BadRequestLine));
                        }
                        match Method::from_bytes(&self.method_buf) {
                            Some(m) => self.method = Some(m),
                            None => return Err(self.fail(ParseError::UnknownMethod)),
                        }
                        self.state = State::Uri;
                    } else if b.is_ascii_alphabetic() {
                        if self.method_buf.len() >= MAX_METHOD_BYTES {
                            return Err(self.fail(ParseError::UnknownMethod));
                        }
                        self.method_buf.push(b);
                    } else {
                        return Err(self.fail(ParseError::BadRequestLine));
                    }
                }
                State::Uri => {
                    self.pos += 1;
                    if b == b' ' {
                        if self.uri_buf.is_empty() {
                            return Err(self.fail(ParseError::BadRequestLine));
                        }
                        self.finish_uri()?;
                        self.state = State::Version;
                    } else if b < 0x20 || b == 0x7f {
                        return Err(self.fail(ParseError::UriControlChar));
                    } else {
                        if self.uri_buf.len() >= MAX_URI_BYTES {
                            return Err(self.fail(ParseError::UriTooLong));
                        }
                        self.uri_buf.push(b);
                    }
                }
                State::Version => {
                    self.pos += 1;
                    if b == b'\r' {
                        self.finish_version()?;
                        self.state = State::VersionEol;
                    } else if self.version_buf.len() >= 8 {
                        return Err(self.fail(ParseError::BadVersion));
                    } else {
                        self.version_buf.push(b);
                    }
                }
                State::VersionEol => {
                    self.pos += 1;
                    if b != b'\n' {
                        return Err(self.fail(ParseError::BadRequestLine));
                    }
                    self.state = State::HeaderName;
                }
                State::HeaderName => {
                    self.pos += 1;
                    if b == b'\r' && self.name_buf.is_empty() {
                        self.state = State::HeaderEnd;
                    } else if b == b':' {
                        if self.name_buf.is_empty() {
                            return Err(self.fail(ParseError::HeaderNameInvalid));
                        }
                        self.state = State::HeaderValue;
                    } else if is_token_char(b) {
                        if self.name_buf.len() >= MAX_HEADER_NAME_BYTES {
                            return Err(self.fail(ParseError::HeaderNameTooLong));
                        }
                        self.name_buf.push(b);
                    } else {
                        return Err(self.fail(ParseError::HeaderNameInvalid));
                    }
                }
                State::HeaderValue => {
                    self.pos += 1;
                    if b == b'\r' {
                        self.state = State::HeaderEol;
                    } else if (b == b' ' || b == b'\t') && !self.value_started {
                        // Skip optional whitespace ahead of the value.
                    } else if is_value_char(b) {
                        self.value_started = true;
                        if self.value_buf.len() >= MAX_HEADER_VALUE_BYTES {
                            return Err(self.fail(ParseError::HeaderValueTooLong));
                        }
                        self.value_buf.push(b);
                    } else {
                        // Bare LF, NUL and other control bytes: CRLF-injection
                        // territory.
                        return Err(self.fail(ParseError::HeaderValueInvalid));
                    }
                }
                State::HeaderEol => {
                    self.pos += 1;
                    if b != b'\n' {
                        return Err(self.fail(ParseError::HeaderValueInvalid));
                    }
                    self.finish_header()?;
                    self.state = State::HeaderName;
                }
                State::HeaderEnd => {
                    self.pos += 1;
                    if b != b'\n' {
                        return Err(self.fail(ParseError::BadRequestLine));
                    }
                    self.head_len = self.pos;
                    self.resolve_framing()?;
                    if self.content_length == 0 {
                        self.state = State::Complete;
                    } else {
                        self.state = State::Body;
                    }
                }
                State::Body | State::Complete | State::Failed => break,
            }

            if self.state == State::Complete {
                break;
            }
        }

        match self.state {
            State::Complete => {
                let consumed = self.head_len + self.content_length as usize;
                self.build_request(&buf[self.head_len..self.head_len]);
                Ok(ParseStatus::Complete(consumed))
            }
            State::Body => {
                let body_end = self.head_len + self.content_length as usize;
                if buf.len() >= body_end {
                    self.state = State::Complete;
                    self.build_request(&buf[self.head_len..body_end]);
                    Ok(ParseStatus::Complete(body_end))
                } else {
                    Ok(ParseStatus::NeedMore)
                }
            }
            _ => Ok(ParseStatus::NeedMore),
        }
    }

    /// Take the parsed request after `parse` returned `Complete`.
    pub fn take_request(&mut self) -> Option<Request> {
        self.request.take()
    }

    fn fail(&mut self, err: ParseError) -> ParseError {
        self.state = State::Failed;
        err
    }

    fn finish_uri(&mut self) -> Result<(), ParseError> {
        let raw = std::mem::take(&mut self.uri_buf);
        let raw = String::from_utf8(raw).map_err(|_| self.fail(ParseError::BadPath))?;
        let (path_part, query) = match raw.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (raw, None),
        };
        match normalize_path(&path_part) {
            Ok(p) => {
                self.path = Some(p);
                self.query = query;
                Ok(())
            }
            Err(PathReject::Traversal) => Err(self.fail(ParseError::PathTraversal)),
            Err(_) => Err(self.fail(ParseError::BadPath)),
        }
    }

    fn finish_version(&mut self) -> Result<(), ParseError> {
        let v = std::mem::take(&mut self.version_buf);
        match v.as_slice() {
            b"HTTP/1.0" => {
                self.version = Some(Version::Http10);
                Ok(())
            }
            b"HTTP/1.1" => {
                self.version = Some(Version::Http11);
                Ok(())
            }
            _ => {
                let well_formed = v.len() == 8
                    && v.starts_with(b"HTTP/")
                    && v[5].is_ascii_digit()
                    && v[6] == b'.'
                    && v[7].is_ascii_digit();
                if well_formed {
                    Err(self.fail(ParseError::UnsupportedVersion))
                } else {
                    Err(self.fail(ParseError::BadVersion))
                }
            }
        }
    }

    fn finish_header(&mut self) -> Result<(), ParseError> {
        let name_bytes = std::mem::take(&mut self.name_buf);
        let mut value_bytes = std::mem::take(&mut self.value_buf);
        self.value_started = false;

        while value_bytes.last().is_some_and(|b| *b == b' ' || *b == b'\t') {
            value_bytes.pop();
        }

        // Token and value byte ranges were enforced per byte, so both are
        // valid ASCII here.
        let name = String::from_utf8(name_bytes).map_err(|_| ParseError::HeaderNameInvalid)?;
        let value = String::from_utf8(value_bytes).map_err(|_| ParseError::HeaderValueInvalid)?;

        let lower = name.to_ascii_lowercase();
        if CRITICAL_HEADERS.contains(&lower.as_str())
            && self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            return Err(self.fail(ParseError::DuplicateCriticalHeader(lower)));
        }

        if self.headers.len() >= MAX_HEADER_COUNT {
            return Err(self.fail(ParseError::TooManyHeaders));
        }

        self.headers.push((name, value));
        Ok(())
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn resolve_framing(&mut self) -> Result<(), ParseError> {
        let has_te = self.header("transfer-encoding").is_some();
        let content_length = self.header("content-length").map(str::to_string);

        if has_te && content_length.is_some() {
            return Err(self.fail(ParseError::AmbiguousFraming));
        }
        if has_te {
            let chunked = self
                .header("transfer-encoding")
                .is_some_and(|te| te.trim().eq_ignore_ascii_case("chunked"));
            return if chunked {
                Err(self.fail(ParseError::ChunkedUnsupported))
            } else {
                Err(self.fail(ParseError::TransferEncodingUnsupported))
            };
        }

        let Some(cl) = content_length else {
            self.content_length = 0;
            return Ok(());
        };

        // Strict decimal: digits only, no sign, no whitespace padding
        // beyond what header trimming removed.
        if cl.is_empty() || !cl.bytes().all(|b| b.is_ascii_digit()) {
            return Err(self.fail(ParseError::BadContentLength));
        }
        let n: u64 = cl.parse().map_err(|_| self.fail(ParseError::BadContentLength))?;

        if n > self.max_body_bytes
            || n > MAX_REQUEST_BYTES.saturating_sub(self.head_len as u64)
        {
            return Err(self.fail(ParseError::BodyTooLarge));
        }

        self.content_length = n;
        Ok(())
    }

    fn build_request(&mut self, body: &[u8]) {
        if let (Some(method), Some(path), Some(version)) =
            (self.method, self.path.take(), self.version)
        {
            self.request = Some(Request {
                method,
                path,
                query: self.query.take(),
                version,
                headers: std::mem::take(&mut self.headers),
                body: body.to_vec(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &[u8]) -> (Request, usize) {
        let mut parser = RequestParser::new(MAX_BODY_BYTES);
        match parser.parse(input) {
            Ok(ParseStatus::Complete(n)) => (parser.take_request().unwrap(), n),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    fn parse_err(input: &[u8]) -> ParseError {
        let mut parser = RequestParser::new(MAX_BODY_BYTES);
        match parser.parse(input) {
            Err(e) => e,
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn parses_a_simple_get() {
        let (req, n) = parse_ok(b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(n, b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n".len());
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, "/index.html");
        assert_eq!(req.query, None);
        assert_eq!(req.version, Version::Http11);
        assert_eq!(req.header("host"), Some("x"));
        assert!(req.body.is_empty());
    }

    #[test]
    fn parses_query_and_body() {
        let (req, n) =
            parse_ok(b"POST /submit?a=1&b=2 HTTP/1.0\r\nContent-Length: 5\r\n\r\nhello");
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.path, "/submit");
        assert_eq!(req.query.as_deref(), Some("a=1&b=2"));
        assert_eq!(req.version, Version::Http10);
        assert_eq!(req.body, b"hello");
        assert_eq!(n, b"POST /submit?a=1&b=2 HTTP/1.0\r\nContent-Length: 5\r\n\r\nhello".len());
    }

    #[test]
    fn every_proper_prefix_needs_more() {
        let full: &[u8] = b"POST /p HTTP/1.1\r\nHost: h\r\nContent-Length: 4\r\n\r\nbody";
        for cut in 0..full.len() {
            let mut parser = RequestParser::new(MAX_BODY_BYTES);
            assert_eq!(
                parser.parse(&full[..cut]).unwrap(),
                ParseStatus::NeedMore,
                "prefix of {cut} bytes"
            );
            // The same parser finishes once the rest arrives.
            match parser.parse(full) {
                Ok(ParseStatus::Complete(n)) => assert_eq!(n, full.len()),
                other => panic!("resume at {cut} gave {other:?}"),
            }
        }
    }

    #[test]
    fn incremental_feed_reproduces_request() {
        let full: &[u8] = b"GET /a/b?q=1 HTTP/1.1\r\nHost: h\r\nAccept: */*\r\n\r\n";
        let mut parser = RequestParser::new(MAX_BODY_BYTES);
        let mut buf = Vec::new();
        for &b in full {
            buf.push(b);
            if let Ok(ParseStatus::Complete(n)) = parser.parse(&buf) {
                assert_eq!(n, full.len());
                let req = parser.take_request().unwrap();
                assert_eq!(req.path, "/a/b");
                assert_eq!(req.query.as_deref(), Some("q=1"));
                assert_eq!(req.headers.len(), 2);
                return;
            }
        }
        panic!("never completed");
    }

    #[test]
    fn content_length_with_transfer_encoding_is_rejected() {
        let err = parse_err(
            b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\nTransfer-Encoding: chunked\r\n\r\nhello",
        );
        assert_eq!(err, ParseError::AmbiguousFraming);
        assert!(err.is_smuggling());

        // Same rejection with the headers in the opposite order.
        let err = parse_err(
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello",
        );
        assert_eq!(err, ParseError::AmbiguousFraming);
    }

    #[test]
    fn any_transfer_encoding_is_rejected() {
        let err = parse_err(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n");
        assert_eq!(err, ParseError::ChunkedUnsupported);

        let err = parse_err(b"POST / HTTP/1.1\r\nTransfer-Encoding: gzip\r\n\r\n");
        assert_eq!(err, ParseError::TransferEncodingUnsupported);
    }

    #[test]
    fn bad_content_length_values_are_rejected() {
        for cl in ["-5", "+5", "5x", "0x5", " 5 5", "nope", ""] {
            let raw = format!("POST / HTTP/1.1\r\nContent-Length:{cl}\r\n\r\n");
            let err = parse_err(raw.as_bytes());
            assert_eq!(err, ParseError::BadContentLength, "CL {cl:?}");
        }
    }

    #[test]
    fn oversized_content_length_is_rejected() {
        let raw = format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n", 11 * 1024 * 1024);
        assert_eq!(parse_err(raw.as_bytes()), ParseError::BodyTooLarge);
    }

    #[test]
    fn duplicate_critical_headers_are_rejected() {
        for name in ["Content-Length", "Host", "Authorization", "Cookie"] {
            let raw = format!("GET / HTTP/1.1\r\n{name}: a\r\n{name}: b\r\n\r\n");
            match parse_err(raw.as_bytes()) {
                ParseError::DuplicateCriticalHeader(n) => {
                    assert_eq!(n, name.to_ascii_lowercase())
                }
                // Duplicate framing headers may trip framing checks first;
                // either way the request dies.
                other => assert!(other.is_smuggling(), "{name}: {other:?}"),
            }
        }
        // Case variance does not evade the check.
        let err = parse_err(b"GET / HTTP/1.1\r\nhost: a\r\nHOST: b\r\n\r\n");
        assert_eq!(err, ParseError::DuplicateCriticalHeader("host".into()));
    }

    #[test]
    fn duplicate_uncritical_headers_are_fine() {
        let (req, _) = parse_ok(b"GET / HTTP/1.1\r\nAccept: a\r\nAccept: b\r\n\r\n");
        assert_eq!(req.headers.len(), 2);
    }

    #[test]
    fn crlf_injection_in_value_is_rejected() {
        // A bare LF inside a header value.
        let err = parse_err(b"GET / HTTP/1.1\r\nX-A: a\nb\r\n\r\n");
        assert_eq!(err, ParseError::HeaderValueInvalid);
        // NUL byte.
        let err = parse_err(b"GET / HTTP/1.1\r\nX-A: a\0b\r\n\r\n");
        assert_eq!(err, ParseError::HeaderValueInvalid);
    }

    #[test]
    fn header_name_rules() {
        assert_eq!(
            parse_err(b"GET / HTTP/1.1\r\nBad Header: x\r\n\r\n"),
            ParseError::HeaderNameInvalid
        );
        let long = "X".repeat(300);
        let raw = format!("GET / HTTP/1.1\r\n{long}: x\r\n\r\n");
        assert_eq!(parse_err(raw.as_bytes()), ParseError::HeaderNameTooLong);
    }

    #[test]
    fn method_rules() {
        assert_eq!(parse_err(b"BREW / HTTP/1.1\r\n\r\n"), ParseError::UnknownMethod);
        assert_eq!(parse_err(b"G3T / HTTP/1.1\r\n\r\n"), ParseError::BadRequestLine);
        let long = "A".repeat(17);
        let raw = format!("{long} / HTTP/1.1\r\n\r\n");
        assert_eq!(parse_err(raw.as_bytes()), ParseError::UnknownMethod);
    }

    #[test]
    fn version_rules() {
        assert_eq!(parse_err(b"GET / HTTP/2.0\r\n\r\n"), ParseError::UnsupportedVersion);
        assert_eq!(parse_err(b"GET / HTP/1.1\r\n\r\n"), ParseError::BadVersion);
        assert_eq!(parse_err(b"GET / HTTP/11\r\n\r\n"), ParseError::BadVersion);
    }

    #[test]
    fn uri_limits() {
        let long = "a".repeat(9 * 1024);
        let raw = format!("GET /{long} HTTP/1.1\r\n\r\n");
        assert_eq!(parse_err(raw.as_bytes()), ParseError::UriTooLong);
        assert_eq!(parse_err(b"GET /a\x01b HTTP/1.1\r\n\r\n"), ParseError::UriControlChar);
    }

    #[test]
    fn traversal_paths_are_rejected_at_parse_time() {
        let err = parse_err(b"GET /../etc/passwd HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(err, ParseError::PathTraversal);
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let err = parse_err(b"GET /%2e%2e/secret HTTP/1.1\r\n\r\n");
        assert_eq!(err, ParseError::BadPath);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn zero_content_length_with_connection_close_completes_at_blank_line() {
        let raw: &[u8] =
            b"POST /submit HTTP/1.1\r\nHost: x\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
        let (req, n) = parse_ok(raw);
        assert_eq!(n, raw.len());
        assert!(req.body.is_empty());
        assert_eq!(req.header("connection"), Some("close"));
    }

    #[test]
    fn pipelined_bytes_after_request_are_not_consumed() {
        let raw = b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
        let (req, n) = parse_ok(raw);
        assert_eq!(req.path, "/a");
        assert_eq!(n, b"GET /a HTTP/1.1\r\n\r\n".len());
    }

    #[test]
    fn status_mapping() {
        assert_eq!(ParseError::UnknownMethod.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(ParseError::UriTooLong.status(), StatusCode::URI_TOO_LONG);
        assert_eq!(ParseError::BodyTooLarge.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(ParseError::AmbiguousFraming.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn header_value_whitespace_is_trimmed() {
        let (req, _) = parse_ok(b"GET / HTTP/1.1\r\nHost:   spaced.example   \r\n\r\n");
        assert_eq!(req.header("Host"), Some("spaced.example"));
    }
}

use crate::library::http::{HeadersMap, Method, Request, Response, Status};
use bytes::Bytes;
use std::mem;
use thiserror::Error;
use tracing::trace;

const VERSION: &[u8] = b"HTTP/1.1";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid method: {0}")]
    InvalidMethod(String),
    #[error("invalid version: expected HTTP/1.1, given {0}")]
    InvalidVersion(String),
    #[error("unexpected newline before expected delimiter {0:?}")]
    UnexpectedNewline(char),
    #[error("expected newline")]
    ExpectedNewline,
    #[error("duplicate header: {0}")]
    DuplicateHeader(String),
    #[error("header is not valid utf-8")]
    InvalidEncoding,
    #[error("invalid status: {0}")]
    InvalidStatus(String),
}

/// Outcome of feeding bytes to a parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed<T> {
    Complete(T),
    /// The data ended before the message did. Call again with the same bytes plus more.
    Incomplete,
}

impl<T> Parsed<T> {
    pub fn complete(self) -> Option<T> {
        match self {
            Parsed::Complete(value) => Some(value),
            Parsed::Incomplete => None,
        }
    }
}

/// Index of `delim` at or after `from`, `None` if the data ends first.
///
/// A CR or LF met before `delim` is an error; with `delim == b'\r'` only a stray LF is.
#[inline(always)]
fn find_delim(data: &[u8], from: usize, delim: u8) -> Result<Option<usize>, ParseError> {
    let Some(hay) = data.get(from..) else {
        return Ok(None);
    };
    match memchr::memchr3(delim, b'\r', b'\n', hay) {
        None => Ok(None),
        Some(i) if hay[i] == delim => Ok(Some(from + i)),
        Some(_) => Err(ParseError::UnexpectedNewline(delim as char)),
    }
}

/// Position right after the CRLF at `at`, `None` if the data ends inside it.
#[inline(always)]
fn consume_newline(data: &[u8], at: usize) -> Result<Option<usize>, ParseError> {
    match data.get(at) {
        None => return Ok(None),
        Some(b'\r') => {}
        Some(_) => return Err(ParseError::ExpectedNewline),
    }
    match data.get(at + 1) {
        None => Ok(None),
        Some(b'\n') => Ok(Some(at + 2)),
        Some(_) => Err(ParseError::ExpectedNewline),
    }
}

fn lossy(token: &[u8]) -> String {
    String::from_utf8_lossy(token).into_owned()
}

fn utf8(token: &[u8]) -> Result<String, ParseError> {
    String::from_utf8(token.to_vec()).map_err(|_| ParseError::InvalidEncoding)
}

/// Header lines up to and including the blank line, shared by requests and responses.
#[derive(Debug, Default)]
struct HeaderSection {
    headers: HeadersMap,
}

impl HeaderSection {
    /// Consumes complete header lines from `*pos`. Returns true once the blank line is
    /// consumed; `*pos` only ever moves past whole lines.
    fn advance(&mut self, data: &[u8], pos: &mut usize) -> Result<bool, ParseError> {
        loop {
            match data.get(*pos) {
                None => return Ok(false),
                Some(b'\r') => {
                    return match consume_newline(data, *pos)? {
                        Some(next) => {
                            *pos = next;
                            Ok(true)
                        }
                        None => Ok(false),
                    };
                }
                Some(_) => {}
            }
            let Some(colon) = find_delim(data, *pos, b':')? else {
                return Ok(false);
            };
            let mut value_start: usize = colon + 1;
            match data.get(value_start) {
                None => return Ok(false),
                Some(b' ') => value_start += 1,
                Some(_) => {}
            }
            let Some(value_end) = find_delim(data, value_start, b'\r')? else {
                return Ok(false);
            };
            let Some(next) = consume_newline(data, value_end)? else {
                return Ok(false);
            };
            let name: String = utf8(&data[*pos..colon])?;
            if self.headers.contains_key(&name) {
                return Err(ParseError::DuplicateHeader(name));
            }
            let value: String = utf8(&data[value_start..value_end])?;
            trace!("    Header {}: {}", name, value);
            self.headers.insert(name, value);
            *pos = next;
        }
    }

    /// The body is every byte after the header block.
    ///
    /// With `await_length`, a numeric `Content-Length` larger than what is buffered
    /// holds the body back; any other value means there is no length to wait for.
    fn body(&self, data: &[u8], pos: usize, await_length: bool) -> Option<Bytes> {
        let rest: &[u8] = data.get(pos..).unwrap_or_default();
        if await_length {
            let expected: Option<usize> = self
                .headers
                .get("Content-Length")
                .and_then(|value| value.trim().parse().ok());
            if expected.is_some_and(|expected| rest.len() < expected) {
                return None;
            }
        }
        Some(Bytes::copy_from_slice(rest))
    }

    fn take(&mut self) -> HeadersMap {
        mem::take(&mut self.headers)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum RequestStage {
    #[default]
    Method,
    Resource,
    Version,
    Headers,
    Body,
}

/// Incremental request parser.
///
/// Feed it the connection's buffer each time more bytes arrive; tokens that were
/// already consumed are not scanned again. After a complete request it resets itself.
#[derive(Debug, Default)]
pub struct RequestParser {
    await_length: bool,
    stage: RequestStage,
    pos: usize,
    method: Option<Method>,
    resource: Bytes,
    section: HeaderSection,
}

impl RequestParser {
    /// Takes the buffer as the whole request: the body is whatever follows the headers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also reports `Incomplete` until `Content-Length` body bytes are buffered, for
    /// callers that read a request in pieces.
    pub fn awaiting_body() -> Self {
        Self {
            await_length: true,
            ..Self::default()
        }
    }

    #[inline(always)]
    pub fn is_awaiting_body(&self) -> bool {
        self.await_length
    }

    /// Bytes of the buffer consumed so far.
    #[inline(always)]
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn parse(&mut self, data: &[u8]) -> Result<Parsed<Request>, ParseError> {
        loop {
            match self.stage {
                RequestStage::Method => {
                    let Some(end) = find_delim(data, self.pos, b' ')? else {
                        return Ok(Parsed::Incomplete);
                    };
                    let token: &[u8] = &data[self.pos..end];
                    let method: Method = Method::from_bytes(token)
                        .ok_or_else(|| ParseError::InvalidMethod(lossy(token)))?;
                    self.method = Some(method);
                    self.pos = end + 1;
                    self.stage = RequestStage::Resource;
                }
                RequestStage::Resource => {
                    let Some(end) = find_delim(data, self.pos, b' ')? else {
                        return Ok(Parsed::Incomplete);
                    };
                    self.resource = Bytes::copy_from_slice(&data[self.pos..end]);
                    self.pos = end + 1;
                    self.stage = RequestStage::Version;
                }
                RequestStage::Version => {
                    let Some(end) = find_delim(data, self.pos, b'\r')? else {
                        return Ok(Parsed::Incomplete);
                    };
                    let token: &[u8] = &data[self.pos..end];
                    if token != VERSION {
                        return Err(ParseError::InvalidVersion(lossy(token)));
                    }
                    let Some(next) = consume_newline(data, end)? else {
                        return Ok(Parsed::Incomplete);
                    };
                    self.pos = next;
                    self.stage = RequestStage::Headers;
                }
                RequestStage::Headers => {
                    if !self.section.advance(data, &mut self.pos)? {
                        return Ok(Parsed::Incomplete);
                    }
                    self.stage = RequestStage::Body;
                }
                RequestStage::Body => {
                    let Some(body) = self.section.body(data, self.pos, self.await_length) else {
                        return Ok(Parsed::Incomplete);
                    };
                    let Some(method) = self.method else {
                        return Err(ParseError::InvalidMethod(String::new()));
                    };
                    let request = Request::from_parts(
                        method,
                        mem::take(&mut self.resource),
                        self.section.take(),
                        body,
                    );
                    *self = Self {
                        await_length: self.await_length,
                        ..Self::default()
                    };
                    return Ok(Parsed::Complete(request));
                }
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum ResponseStage {
    #[default]
    Version,
    Status,
    Reason,
    Headers,
    Body,
}

/// Incremental response parser, the client-side mirror of [`RequestParser`].
#[derive(Debug, Default)]
pub struct ResponseParser {
    stage: ResponseStage,
    pos: usize,
    status: Option<Status>,
    reason: String,
    section: HeaderSection,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(&mut self, data: &[u8]) -> Result<Parsed<Response>, ParseError> {
        loop {
            match self.stage {
                ResponseStage::Version => {
                    let Some(end) = find_delim(data, self.pos, b' ')? else {
                        return Ok(Parsed::Incomplete);
                    };
                    let token: &[u8] = &data[self.pos..end];
                    if token != VERSION {
                        return Err(ParseError::InvalidVersion(lossy(token)));
                    }
                    self.pos = end + 1;
                    self.stage = ResponseStage::Status;
                }
                ResponseStage::Status => {
                    let Some(end) = find_delim(data, self.pos, b' ')? else {
                        return Ok(Parsed::Incomplete);
                    };
                    let token: &[u8] = &data[self.pos..end];
                    let status: Status = std::str::from_utf8(token)
                        .ok()
                        .and_then(|code| code.parse::<u16>().ok())
                        .and_then(Status::from_code)
                        .ok_or_else(|| ParseError::InvalidStatus(lossy(token)))?;
                    self.status = Some(status);
                    self.pos = end + 1;
                    self.stage = ResponseStage::Reason;
                }
                ResponseStage::Reason => {
                    let Some(end) = find_delim(data, self.pos, b'\r')? else {
                        return Ok(Parsed::Incomplete);
                    };
                    let Some(next) = consume_newline(data, end)? else {
                        return Ok(Parsed::Incomplete);
                    };
                    self.reason = utf8(&data[self.pos..end])?;
                    self.pos = next;
                    self.stage = ResponseStage::Headers;
                }
                ResponseStage::Headers => {
                    if !self.section.advance(data, &mut self.pos)? {
                        return Ok(Parsed::Incomplete);
                    }
                    self.stage = ResponseStage::Body;
                }
                ResponseStage::Body => {
                    let Some(body) = self.section.body(data, self.pos, false) else {
                        return Ok(Parsed::Incomplete);
                    };
                    let Some(status) = self.status else {
                        return Err(ParseError::InvalidStatus(String::new()));
                    };
                    let response = Response::from_parts(
                        status,
                        mem::take(&mut self.reason),
                        self.section.take(),
                        body,
                    );
                    *self = Self::default();
                    return Ok(Parsed::Complete(response));
                }
            }
        }
    }
}

/// Parses one request out of `data`, which must hold exactly that request.
pub fn parse_request(data: &[u8]) -> Result<Parsed<Request>, ParseError> {
    RequestParser::new().parse(data)
}

pub fn parse_response(data: &[u8]) -> Result<Parsed<Response>, ParseError> {
    ResponseParser::new().parse(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::http::writer::Message;

    const BROWSER_GET: &[u8] = b"GET / HTTP/1.1\r\n\
Host: 127.0.0.1:5000\r\n\
User-Agent: Mozilla/5.0 (X11; Linux x86_64; rv:120.0) Gecko/20100101 Firefox/120.0\r\n\
Accept: text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8\r\n\
Accept-Language: en-US,sv;q=0.7,en;q=0.3\r\n\
Accept-Encoding: gzip, deflate, br\r\n\
Connection: keep-alive\r\n\
Sec-Fetch-User: ?1\r\n\r\n";

    const FORM_POST: &[u8] = b"POST /some/form HTTP/1.1\r\n\
Host: 127.0.0.1:5000\r\n\
Content-Type: application/x-www-form-urlencoded\r\n\
Content-Length: 25\r\n\
Origin: null\r\n\
\r\n\
fname=Smith&lname=Johnson";

    fn complete(data: &[u8]) -> Request {
        parse_request(data)
            .expect("request should parse")
            .complete()
            .expect("request should be complete")
    }

    #[test]
    fn minimal_get() {
        let request = complete(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(request.method(), Method::Get);
        assert_eq!(request.resource(), b"/");
        assert_eq!(request.headers().len(), 1);
        assert_eq!(request.header("Host"), Some("x"));
        assert!(request.body().is_empty());
    }

    #[test]
    fn post_with_body() {
        let request = complete(b"POST /f HTTP/1.1\r\nContent-Length: 4\r\n\r\nabcd");
        assert_eq!(request.method(), Method::Post);
        assert_eq!(request.resource(), b"/f");
        assert_eq!(request.header("Content-Length"), Some("4"));
        assert_eq!(request.body(), b"abcd");
    }

    #[test]
    fn browser_requests() {
        let get = complete(BROWSER_GET);
        assert_eq!(get.header("Host"), Some("127.0.0.1:5000"));
        assert_eq!(get.header("Accept-Language"), Some("en-US,sv;q=0.7,en;q=0.3"));
        assert_eq!(get.header("Accept-Encoding"), Some("gzip, deflate, br"));
        assert!(get.body().is_empty());

        let post = complete(FORM_POST);
        assert_eq!(post.resource(), b"/some/form");
        assert_eq!(post.body(), b"fname=Smith&lname=Johnson");
    }

    #[test]
    fn duplicate_header_is_rejected() {
        let err = parse_request(b"GET / HTTP/1.1\r\nHost: a\r\nHost: b\r\n\r\n").unwrap_err();
        assert_eq!(err, ParseError::DuplicateHeader("Host".into()));
    }

    #[test]
    fn version_must_be_exact() {
        for version in ["HTTP/1.0", "HTTP/2", "http/1.1", "HTTP/1.1 "] {
            let raw = format!("GET / {version}\r\n\r\n");
            assert!(
                matches!(parse_request(raw.as_bytes()), Err(ParseError::InvalidVersion(_))),
                "{version}"
            );
        }
    }

    #[test]
    fn unknown_method() {
        assert_eq!(
            parse_request(b"BREW /pot HTTP/1.1\r\n\r\n").unwrap_err(),
            ParseError::InvalidMethod("BREW".into())
        );
    }

    #[test]
    fn stray_newlines() {
        assert_eq!(
            parse_request(b"GET\r\n/ HTTP/1.1\r\n\r\n").unwrap_err(),
            ParseError::UnexpectedNewline(' ')
        );
        assert_eq!(
            parse_request(b"GET / HTTP/1.1\nHost: x\r\n\r\n").unwrap_err(),
            ParseError::UnexpectedNewline('\r')
        );
        assert_eq!(
            parse_request(b"GET / HTTP/1.1\r\nHost\r\n\r\n").unwrap_err(),
            ParseError::UnexpectedNewline(':')
        );
        assert_eq!(
            parse_request(b"GET / HTTP/1.1\rX").unwrap_err(),
            ParseError::ExpectedNewline
        );
    }

    #[test]
    fn only_one_space_after_colon_is_skipped() {
        let request = complete(b"GET / HTTP/1.1\r\nX-Pad:  two\r\nX-None:tight\r\n\r\n");
        assert_eq!(request.header("X-Pad"), Some(" two"));
        assert_eq!(request.header("X-None"), Some("tight"));
    }

    #[test]
    fn empty_input_needs_more_data() {
        assert_eq!(parse_request(b""), Ok(Parsed::Incomplete));
    }

    #[test]
    fn every_prefix_is_incomplete_then_resumes() {
        let mut parser = RequestParser::awaiting_body();
        for end in 0..FORM_POST.len() {
            assert_eq!(parser.parse(&FORM_POST[..end]), Ok(Parsed::Incomplete), "prefix {end}");
        }
        let request = parser.parse(FORM_POST).unwrap().complete().unwrap();
        assert_eq!(request.body(), b"fname=Smith&lname=Johnson");
        assert_eq!(parser.position(), 0);
        assert!(parser.is_awaiting_body());
    }

    #[test]
    fn resumed_parse_does_not_rescan_committed_tokens() {
        let mut parser = RequestParser::new();
        assert_eq!(parser.parse(b"GET /index HT"), Ok(Parsed::Incomplete));
        assert_eq!(parser.position(), b"GET /index ".len());
        let request = parser
            .parse(b"GET /index HTTP/1.1\r\n\r\n")
            .unwrap()
            .complete()
            .unwrap();
        assert_eq!(request.resource(), b"/index");
    }

    #[test]
    fn body_beyond_content_length_is_kept() {
        let request = complete(b"PUT /x HTTP/1.1\r\nContent-Length: 2\r\n\r\nabcdef");
        assert_eq!(request.body(), b"abcdef");
    }

    #[test]
    fn body_shorter_than_content_length_is_the_remainder() {
        let request = complete(b"POST /f HTTP/1.1\r\nContent-Length: 10\r\n\r\nabcd");
        assert_eq!(request.header("Content-Length"), Some("10"));
        assert_eq!(request.body(), b"abcd");
    }

    #[test]
    fn non_numeric_content_length_is_just_a_header() {
        let raw: &[u8] = b"PUT /x HTTP/1.1\r\nContent-Length: many\r\n\r\nab";
        assert_eq!(complete(raw).body(), b"ab");
        let awaited = RequestParser::awaiting_body().parse(raw).unwrap().complete().unwrap();
        assert_eq!(awaited.header("Content-Length"), Some("many"));
        assert_eq!(awaited.body(), b"ab");
    }

    #[test]
    fn awaiting_parser_holds_a_short_body_back() {
        let mut parser = RequestParser::awaiting_body();
        let partial: &[u8] = b"POST /f HTTP/1.1\r\nContent-Length: 10\r\n\r\nabcd";
        assert_eq!(parser.parse(partial), Ok(Parsed::Incomplete));
        let whole: &[u8] = b"POST /f HTTP/1.1\r\nContent-Length: 10\r\n\r\nabcdefghij";
        let request = parser.parse(whole).unwrap().complete().unwrap();
        assert_eq!(request.body(), b"abcdefghij");
    }

    #[test]
    fn request_round_trip() {
        for method in Method::ALL {
            let original = Request::new(method, "/a/b?c=d")
                .with_header("Host", "example")
                .with_header("X-Empty", "")
                .with_header("Content-Length", "5")
                .with_body("hello");
            let wire: Vec<u8> = original.segments().concat();
            assert_eq!(complete(&wire), original);
        }
    }

    #[test]
    fn response_round_trip() {
        let original = Response::new(Status::Ok)
            .with_reason("All Good")
            .with_header("Server", "toyws")
            .with_body("done");
        let wire: Vec<u8> = original.segments().concat();
        let parsed = parse_response(&wire).unwrap().complete().unwrap();
        assert_eq!(parsed.status(), Status::Ok);
        assert_eq!(parsed.reason(), "All Good");
        assert_eq!(parsed.header("Server"), Some("toyws"));
        assert_eq!(parsed.body(), b"done");
    }

    #[test]
    fn response_with_unknown_status() {
        assert_eq!(
            parse_response(b"HTTP/1.1 418 Teapot\r\n\r\n").unwrap_err(),
            ParseError::InvalidStatus("418".into())
        );
    }
}

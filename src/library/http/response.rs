use crate::library::http::{HeadersMap, Status, writer::Message};
use bytes::Bytes;
use std::borrow::Cow;
use thiserror::Error;

/// An HTTP/1.1 response. No header is added implicitly, `Content-Length` included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: Status,
    reason: Cow<'static, str>,
    headers: HeadersMap,
    body: Bytes,
}

impl Response {
    pub fn new(status: Status) -> Response {
        Response {
            status,
            reason: Cow::Borrowed(status.default_reason()),
            headers: HeadersMap::new(),
            body: Bytes::new(),
        }
    }

    pub(crate) fn from_parts(
        status: Status,
        reason: String,
        headers: HeadersMap,
        body: Bytes,
    ) -> Response {
        Response {
            status,
            reason: Cow::Owned(reason),
            headers,
            body,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<Cow<'static, str>>) -> Response {
        self.reason = reason.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Response {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Response {
        self.body = body.into();
        self
    }

    #[inline(always)]
    pub fn status(&self) -> Status {
        self.status
    }
    #[inline(always)]
    pub fn reason(&self) -> &str {
        &self.reason
    }
    #[inline(always)]
    pub fn headers(&self) -> &HeadersMap {
        &self.headers
    }
    #[inline(always)]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
    #[inline(always)]
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl Message for Response {
    fn segments(&self) -> Vec<&[u8]> {
        let mut segments: Vec<&[u8]> = Vec::with_capacity(7 + self.headers.len() * 4);
        segments.push(b"HTTP/1.1 ");
        segments.push(self.status.code_str().as_bytes());
        segments.push(b" ");
        segments.push(self.reason.as_bytes());
        segments.push(b"\r\n");
        for (name, value) in &self.headers {
            segments.push(name.as_bytes());
            segments.push(b": ");
            segments.push(value.as_bytes());
            segments.push(b"\r\n");
        }
        segments.push(b"\r\n");
        segments.push(&self.body);
        segments
    }
}

/// Lets request handling bail out with a status; the message becomes the body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status}: {message}")]
pub struct StatusError {
    pub status: Status,
    pub message: String,
}

impl StatusError {
    pub fn new(status: Status, message: impl Into<String>) -> StatusError {
        StatusError {
            status,
            message: message.into(),
        }
    }
}

impl From<StatusError> for Response {
    fn from(err: StatusError) -> Response {
        Response::new(err.status).with_body(err.message)
    }
}

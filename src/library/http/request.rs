use crate::library::http::{HeadersMap, Method, writer::Message};
use bytes::Bytes;

/// A parsed (or to-be-written) HTTP/1.1 request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: Method,
    resource: Bytes,
    headers: HeadersMap,
    body: Bytes,
}

impl Request {
    pub fn new(method: Method, resource: impl Into<Bytes>) -> Request {
        Request {
            method,
            resource: resource.into(),
            headers: HeadersMap::new(),
            body: Bytes::new(),
        }
    }

    pub(crate) fn from_parts(
        method: Method,
        resource: Bytes,
        headers: HeadersMap,
        body: Bytes,
    ) -> Request {
        Request {
            method,
            resource,
            headers,
            body,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Request {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Request {
        self.body = body.into();
        self
    }

    #[inline(always)]
    pub fn method(&self) -> Method {
        self.method
    }
    /// Raw request target; not validated as a URI.
    #[inline(always)]
    pub fn resource(&self) -> &[u8] {
        &self.resource
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

impl Message for Request {
    fn segments(&self) -> Vec<&[u8]> {
        let mut segments: Vec<&[u8]> = Vec::with_capacity(6 + self.headers.len() * 4);
        segments.push(self.method.as_str().as_bytes());
        segments.push(b" ");
        segments.push(&self.resource);
        segments.push(b" HTTP/1.1\r\n");
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

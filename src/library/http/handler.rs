use crate::library::{
    connection::Connection,
    error::Result,
    http::{
        Parsed, PendingWrite, Request, RequestParser, Response, Status, StatusError,
    },
    reactor::{Handler, IoService},
};
use tracing::{debug, warn};

/// Per-connection HTTP state: the incremental parser and any response that did not
/// fit the buffer in one go.
#[derive(Debug)]
pub struct HttpSession {
    parser: RequestParser,
    pending: Option<PendingWrite<Response>>,
}

impl Default for HttpSession {
    fn default() -> Self {
        Self {
            // Requests arrive in pieces, so a declared body is waited for.
            parser: RequestParser::awaiting_body(),
            pending: None,
        }
    }
}

impl HttpSession {
    #[inline(always)]
    pub fn parser(&self) -> &RequestParser {
        &self.parser
    }
    #[inline(always)]
    pub fn has_pending_write(&self) -> bool {
        self.pending.is_some()
    }
}

/// Parses one request per connection, answers it through `callback`, then closes.
///
/// Malformed requests, and requests that cannot complete within the buffer, are
/// answered with 400 Bad Request.
pub struct HttpHandler<F> {
    callback: F,
    served: usize,
}

impl<F> HttpHandler<F>
where
    F: FnMut(&Request) -> Response,
{
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            served: 0,
        }
    }

    /// Responses fully written so far.
    #[inline(always)]
    pub fn served(&self) -> usize {
        self.served
    }

    fn respond(&mut self, io: &mut IoService<HttpSession>, slot: usize, response: Response) -> Result<()> {
        let conn: &mut Connection<HttpSession> = io.connection_mut(slot)?;
        let (buf, session) = conn.buffer_and_session();
        let mut pending: PendingWrite<Response> = PendingWrite::new(response);
        let (complete, n) = pending.fill(buf);
        if !complete {
            debug!("Response on slot {slot} exceeds the buffer, streaming it");
            session.pending = Some(pending);
        }
        conn.set_content_length(n)?;
        io.async_write(slot)
    }
}

impl<F> Handler for HttpHandler<F>
where
    F: FnMut(&Request) -> Response,
{
    type Session = HttpSession;

    fn on_read(&mut self, io: &mut IoService<HttpSession>, slot: usize) -> Result<()> {
        let conn: &mut Connection<HttpSession> = io.connection_mut(slot)?;
        let can_read_more: bool = !conn.eof() && conn.content_length() < conn.capacity();
        let (content, session) = conn.content_and_session();

        let response: Response = match session.parser.parse(content) {
            Ok(Parsed::Complete(request)) => {
                debug!(
                    "{} {} on slot {slot}",
                    request.method(),
                    String::from_utf8_lossy(request.resource())
                );
                (self.callback)(&request)
            }
            Ok(Parsed::Incomplete) if can_read_more => return io.async_read(slot),
            Ok(Parsed::Incomplete) => {
                warn!("Request on slot {slot} cannot complete");
                StatusError::new(Status::BadRequest, "Incomplete request").into()
            }
            Err(err) => {
                warn!("Bad request on slot {slot}: {err}");
                StatusError::new(Status::BadRequest, err.to_string()).into()
            }
        };
        self.respond(io, slot, response)
    }

    fn on_write(&mut self, io: &mut IoService<HttpSession>, slot: usize) -> Result<()> {
        let conn: &mut Connection<HttpSession> = io.connection_mut(slot)?;
        let (buf, session) = conn.buffer_and_session();
        match session.pending.as_mut() {
            Some(pending) => {
                let (complete, n) = pending.fill(buf);
                if complete {
                    session.pending = None;
                }
                conn.set_content_length(n)?;
                io.async_write(slot)
            }
            None => {
                self.served += 1;
                io.close(slot)
            }
        }
    }
}

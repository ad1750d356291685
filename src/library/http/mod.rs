pub mod handler;
pub mod method;
pub mod parser;
pub mod request;
pub mod response;
pub mod status;
pub mod writer;

pub use handler::{HttpHandler, HttpSession};
pub use method::Method;
pub use parser::{ParseError, Parsed, RequestParser, ResponseParser, parse_request, parse_response};
pub use request::Request;
pub use response::{Response, StatusError};
pub use status::Status;
pub use writer::{Message, MessageWriter, PendingWrite, write_message};

/// Header names are kept exactly as received; lookups are case-sensitive.
pub type HeadersMap = std::collections::HashMap<String, String>;

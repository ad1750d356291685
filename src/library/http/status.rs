use std::fmt;

/// Response status codes the server can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    Found,
    SeeOther,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    UnprocessableContent,
    TooManyRequests,
    InternalServerError,
    HttpVersionNotSupported,
}

impl Status {
    pub const ALL: [Status; 11] = [
        Status::Ok,
        Status::Found,
        Status::SeeOther,
        Status::BadRequest,
        Status::Unauthorized,
        Status::Forbidden,
        Status::NotFound,
        Status::UnprocessableContent,
        Status::TooManyRequests,
        Status::InternalServerError,
        Status::HttpVersionNotSupported,
    ];

    pub const fn code(&self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Found => 302,
            Status::SeeOther => 303,
            Status::BadRequest => 400,
            Status::Unauthorized => 401,
            Status::Forbidden => 403,
            Status::NotFound => 404,
            Status::UnprocessableContent => 422,
            Status::TooManyRequests => 429,
            Status::InternalServerError => 500,
            Status::HttpVersionNotSupported => 505,
        }
    }

    /// The three-digit code as it appears on the status line.
    pub const fn code_str(&self) -> &'static str {
        match self {
            Status::Ok => "200",
            Status::Found => "302",
            Status::SeeOther => "303",
            Status::BadRequest => "400",
            Status::Unauthorized => "401",
            Status::Forbidden => "403",
            Status::NotFound => "404",
            Status::UnprocessableContent => "422",
            Status::TooManyRequests => "429",
            Status::InternalServerError => "500",
            Status::HttpVersionNotSupported => "505",
        }
    }

    pub fn from_code(code: u16) -> Option<Status> {
        Status::ALL.into_iter().find(|status| status.code() == code)
    }

    /// Reason used when the response does not supply one.
    pub const fn default_reason(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            _ => "ERR",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code_str())
    }
}

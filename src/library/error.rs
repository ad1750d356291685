use crate::library::http::ParseError;
use std::{ffi::CStr, io};
use thiserror::Error;

pub type Result<T, E = ToyError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ToyError {
    /// A socket, setsockopt, bind or listen call failed while preparing the listener.
    #[error("error in {op}(): {source}")]
    SocketSetup {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("invalid network address: {0}")]
    InvalidAddress(String),

    /// Ring setup, submission or wait failed.
    #[error("io_uring error: {0}")]
    Ring(#[source] io::Error),

    /// A completion came back with a negative result.
    #[error("error in async step on slot {slot}: {}", strerror(*code))]
    AsyncIo { slot: usize, code: i32 },

    #[error("malformed message: {0}")]
    Parse(#[from] ParseError),

    #[error("connection table is full ({capacity} slots)")]
    SlotsExhausted { capacity: usize },

    #[error("slot {0} holds no connection")]
    EmptySlot(usize),

    #[error("buffer of slot {0} is lent to the kernel")]
    BufferLent(usize),

    #[error("buffer of slot {0} has no room left to read into")]
    BufferFull(usize),

    #[error("content length {len} exceeds the {capacity}-byte buffer")]
    ContentTooLong { len: usize, capacity: usize },

    #[error("submission queue is full")]
    SubmissionQueueFull,

    #[error("reactor invariant violated: {0}")]
    InvariantViolation(String),
}

impl ToyError {
    /// Fatal errors end the run loop. Everything else concerns a single connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ToyError::SocketSetup { .. }
                | ToyError::InvalidAddress(_)
                | ToyError::Ring(_)
                | ToyError::SubmissionQueueFull
                | ToyError::InvariantViolation(_)
        )
    }

    pub(crate) fn setup(op: &'static str) -> impl FnOnce(io::Error) -> ToyError {
        move |source| ToyError::SocketSetup { op, source }
    }
}

fn strerror(code: i32) -> String {
    // SAFETY: strerror returns a pointer to a static, NUL-terminated message.
    unsafe { CStr::from_ptr(libc::strerror(code)) }
        .to_string_lossy()
        .into_owned()
}

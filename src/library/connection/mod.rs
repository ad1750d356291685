pub mod table;

pub use table::ConnectionTable;

use crate::library::error::{Result, ToyError};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use tracing::trace;

pub const BUFFER_SIZE: usize = 2048;

/// Lifecycle of a connection. Strictly linear, no keep-alive loop back to `Reading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    Accepting = 0,
    Reading = 1,
    Writing = 2,
    Finished = 3,
}

/// Per-socket state plus the buffer the kernel reads into and writes from.
///
/// Lives in a `Box` inside the [`ConnectionTable`] so the buffer address stays put
/// while an operation referencing it is in flight.
pub struct Connection<S = ()> {
    state: ConnState,
    socket: Option<OwnedFd>,
    // Placeholder while Accepting; not owned.
    listener: RawFd,
    slot: Option<usize>,
    in_flight: bool,
    eof: bool,
    content_length: usize,
    write_offset: usize,
    buffer: [u8; BUFFER_SIZE],
    session: S,
}

impl<S: Default> Connection<S> {
    /// A connection waiting for `listener` to accept a peer.
    pub fn accepting(listener: RawFd) -> Box<Self> {
        Box::new(Connection {
            state: ConnState::Accepting,
            socket: None,
            listener,
            slot: None,
            in_flight: false,
            eof: false,
            content_length: 0,
            write_offset: 0,
            buffer: [0u8; BUFFER_SIZE],
            session: S::default(),
        })
    }
}

impl<S> Connection<S> {
    #[inline(always)]
    pub fn state(&self) -> ConnState {
        self.state
    }
    #[inline(always)]
    pub(crate) fn set_state(&mut self, state: ConnState) {
        trace!("Slot {:?}: {:?} -> {:?}", self.slot, self.state, state);
        self.state = state;
    }
    /// The peer socket, once the accept completed.
    #[inline(always)]
    pub fn socket(&self) -> Option<RawFd> {
        self.socket.as_ref().map(AsRawFd::as_raw_fd)
    }
    pub(crate) fn attach_socket(&mut self, socket: OwnedFd) {
        self.socket = Some(socket);
    }
    #[inline(always)]
    pub fn listener(&self) -> RawFd {
        self.listener
    }
    #[inline(always)]
    pub fn slot(&self) -> Option<usize> {
        self.slot
    }
    pub(crate) fn set_slot(&mut self, slot: Option<usize>) {
        self.slot = slot;
    }
    /// True while the kernel may read or write the buffer.
    #[inline(always)]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }
    pub(crate) fn set_in_flight(&mut self, in_flight: bool) {
        self.in_flight = in_flight;
    }
    /// The peer half-closed: its last read returned 0 bytes.
    #[inline(always)]
    pub fn eof(&self) -> bool {
        self.eof
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        BUFFER_SIZE
    }
    #[inline(always)]
    pub fn content_length(&self) -> usize {
        self.content_length
    }
    /// Marks the first `len` bytes of the buffer as content.
    pub fn set_content_length(&mut self, len: usize) -> Result<()> {
        if len > BUFFER_SIZE {
            return Err(ToyError::ContentTooLong {
                len,
                capacity: BUFFER_SIZE,
            });
        }
        self.content_length = len;
        Ok(())
    }
    /// Meaningful part of the buffer.
    #[inline(always)]
    pub fn content(&self) -> &[u8] {
        &self.buffer[..self.content_length]
    }
    #[inline(always)]
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }
    #[inline(always)]
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }
    #[inline(always)]
    pub fn session(&self) -> &S {
        &self.session
    }
    #[inline(always)]
    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }
    /// Content and session at once, for parsing into per-connection state.
    #[inline(always)]
    pub fn content_and_session(&mut self) -> (&[u8], &mut S) {
        (&self.buffer[..self.content_length], &mut self.session)
    }
    /// Whole buffer and session at once, for serializing out of per-connection state.
    #[inline(always)]
    pub fn buffer_and_session(&mut self) -> (&mut [u8], &mut S) {
        (&mut self.buffer, &mut self.session)
    }

    /// Free part of the buffer the next read lands in.
    pub(crate) fn read_window(&mut self) -> (*mut u8, usize) {
        let start: usize = self.content_length;
        // SAFETY: content_length <= BUFFER_SIZE, so the pointer stays within the array.
        let ptr: *mut u8 = unsafe { self.buffer.as_mut_ptr().add(start) };
        (ptr, BUFFER_SIZE - start)
    }
    /// Content not yet accepted by the kernel.
    pub(crate) fn write_window(&mut self) -> (*mut u8, usize) {
        let start: usize = self.write_offset;
        // SAFETY: write_offset <= content_length <= BUFFER_SIZE.
        let ptr: *mut u8 = unsafe { self.buffer.as_mut_ptr().add(start) };
        (ptr, self.content_length - start)
    }
    pub(crate) fn record_read(&mut self, n: usize) {
        if n == 0 {
            self.eof = true;
        }
        self.content_length = (self.content_length + n).min(BUFFER_SIZE);
    }
    /// Returns true once all content has been written.
    pub(crate) fn record_write(&mut self, n: usize) -> bool {
        self.write_offset = (self.write_offset + n).min(self.content_length);
        self.write_offset == self.content_length
    }
    pub(crate) fn rewind_write(&mut self) {
        self.write_offset = 0;
    }
    #[inline(always)]
    pub fn write_offset(&self) -> usize {
        self.write_offset
    }
}

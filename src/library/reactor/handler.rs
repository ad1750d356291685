use crate::library::{error::Result, reactor::IoService};
use std::os::fd::RawFd;
use tracing::debug;

/// Application callbacks invoked by the reactor once per successful completion.
///
/// Each callback decides the connection's next step: issue an operation on `io`,
/// close it, or leave it detached. Returning an error that is not fatal closes
/// the connection; a fatal one stops the reactor.
pub trait Handler {
    /// Per-connection state stored next to the buffer.
    type Session: Default;

    /// A peer was accepted into `slot`. By default keeps `listener` armed and reads.
    fn on_accept(
        &mut self,
        io: &mut IoService<Self::Session>,
        listener: RawFd,
        slot: usize,
    ) -> Result<()> {
        io.async_accept(listener)?;
        io.async_read(slot)
    }

    /// New bytes landed in the slot's content, or the peer half-closed.
    fn on_read(&mut self, io: &mut IoService<Self::Session>, slot: usize) -> Result<()>;

    /// The slot's whole content was written. By default closes the connection.
    fn on_write(&mut self, io: &mut IoService<Self::Session>, slot: usize) -> Result<()> {
        io.close(slot)
    }
}

/// Writes back whatever the first read received, then closes.
#[derive(Debug, Default)]
pub struct EchoHandler {
    served: usize,
    stop_after: Option<usize>,
}

impl EchoHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops the reactor once `count` echoes have been written.
    pub fn stopping_after(count: usize) -> Self {
        Self {
            served: 0,
            stop_after: Some(count),
        }
    }

    #[inline(always)]
    pub fn served(&self) -> usize {
        self.served
    }
}

impl Handler for EchoHandler {
    type Session = ();

    fn on_read(&mut self, io: &mut IoService, slot: usize) -> Result<()> {
        debug!(
            "Echoing {} bytes on slot {slot}",
            io.connection(slot)?.content_length()
        );
        io.async_write(slot)
    }

    fn on_write(&mut self, io: &mut IoService, slot: usize) -> Result<()> {
        io.close(slot)?;
        self.served += 1;
        if self.stop_after.is_some_and(|count| self.served >= count) {
            io.stop();
        }
        Ok(())
    }
}

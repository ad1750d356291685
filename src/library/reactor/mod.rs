pub mod handler;
pub mod io_service;

pub use handler::{EchoHandler, Handler};
pub use io_service::{IoService, StopHandle};

use crate::library::{
    config::ReactorConfig,
    connection::ConnState,
    error::{Result, ToyError},
    uring::kernel_cmds::CANCEL_TAG,
};
use std::{net::TcpListener, os::fd::RawFd};
use tracing::{debug, error, info, trace, warn};

/// Single-threaded completion loop dispatching to a [`Handler`].
pub struct Reactor<H: Handler> {
    io: IoService<H::Session>,
    handler: H,
}

impl<H: Handler> Reactor<H> {
    pub fn new(config: &ReactorConfig, handler: H) -> Result<Self> {
        Ok(Self {
            io: IoService::new(config)?,
            handler,
        })
    }

    pub fn make_listening_socket(&mut self, address: &str, port: u16) -> Result<RawFd> {
        self.io.make_listening_socket(address, port)
    }

    pub fn adopt_listener(&mut self, listener: TcpListener) -> RawFd {
        self.io.adopt_listener(listener)
    }

    pub fn async_accept(&mut self, listener: RawFd) -> Result<()> {
        self.io.async_accept(listener)
    }

    pub fn stop(&self) {
        self.io.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.io.stop_handle()
    }

    #[inline(always)]
    pub fn io(&self) -> &IoService<H::Session> {
        &self.io
    }
    #[inline(always)]
    pub fn io_mut(&mut self) -> &mut IoService<H::Session> {
        &mut self.io
    }
    #[inline(always)]
    pub fn handler(&self) -> &H {
        &self.handler
    }
    #[inline(always)]
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }
    /// Consumes the reactor, closing every socket it still owns.
    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Runs until stopped or a fatal error, then cancels whatever is still in flight.
    pub fn run(&mut self) -> Result<()> {
        info!(
            "Reactor running with {} connection slots",
            self.io.slot_capacity()
        );
        let result: Result<()> = self.drive();
        if let Err(err) = &result {
            error!("Reactor failed: {err}");
        }
        self.io.shutdown();
        info!("Reactor stopped");
        result
    }

    fn drive(&mut self) -> Result<()> {
        self.io.flush()?;
        while !self.io.is_stopped() {
            self.io.wait()?;
            // Everything issued while draining goes out as one batch.
            self.io.set_draining(true);
            let drained: Result<()> = self.drain().and_then(|()| self.io.retry_accepts());
            self.io.set_draining(false);
            drained?;
            self.io.flush()?;
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        loop {
            let Some((tag, result)) = self.io.next_completion() else {
                return Ok(());
            };
            self.handle_completion(tag, result)?;
        }
    }

    /// Routes one completion to the handler according to the slot's state.
    pub(crate) fn handle_completion(&mut self, tag: u64, result: i32) -> Result<()> {
        trace!("New CQE: tag {tag} result {result}");
        if tag == CANCEL_TAG {
            return Ok(());
        }
        let slot: usize = tag as usize;
        let state: ConnState = self.io.complete(slot)?;

        if result < 0 {
            let err = ToyError::AsyncIo {
                slot,
                code: -result,
            };
            warn!("{:?} failed: {err}", state);
            return self.io.discard(slot, state);
        }

        let outcome: Result<()> = match state {
            ConnState::Accepting => {
                let listener: RawFd = self.io.accepted(slot, result)?;
                debug!("Accepted FD:{result} into slot {slot}");
                self.handler.on_accept(&mut self.io, listener, slot)
            }
            ConnState::Reading => {
                self.io.record_read(slot, result as usize)?;
                self.handler.on_read(&mut self.io, slot)
            }
            ConnState::Writing => {
                if self.io.record_write(slot, result as usize)? {
                    self.handler.on_write(&mut self.io, slot)
                } else if result == 0 {
                    Err(ToyError::AsyncIo {
                        slot,
                        code: libc::EPIPE,
                    })
                } else {
                    trace!("Short write on slot {slot}, submitting the rest");
                    self.io.submit_write(slot)
                }
            }
            ConnState::Finished => Err(ToyError::InvariantViolation(format!(
                "completion for finished slot {slot}"
            ))),
        };

        match outcome {
            Err(err) if !err.is_fatal() => {
                warn!("Dropping connection in slot {slot}: {err}");
                self.io.discard(slot, state)
            }
            other => other,
        }
    }
}

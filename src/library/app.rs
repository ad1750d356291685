use crate::library::{
    config::ReactorConfig,
    error::{Result, ToyError},
    http::{HttpHandler, Request, Response},
    network::make_listening_socket,
    reactor::{Reactor, StopHandle},
};
use std::{
    net::{SocketAddr, TcpListener},
    os::fd::RawFd,
};
use tracing::info;

/// The toy web server: one reactor answering every request through `callback`.
pub struct ToyWs<F>
where
    F: FnMut(&Request) -> Response,
{
    address: String,
    port: u16,
    reactor: Reactor<HttpHandler<F>>,
    listener: Option<RawFd>,
}

impl<F> ToyWs<F>
where
    F: FnMut(&Request) -> Response,
{
    pub fn new(address: &str, port: u16, config: &ReactorConfig, callback: F) -> Result<Self> {
        Ok(Self {
            address: address.to_owned(),
            port,
            reactor: Reactor::new(config, HttpHandler::new(callback))?,
            listener: None,
        })
    }

    /// Binds the listening socket and arms the first accept. Returns the bound address,
    /// which tells the real port when 0 was requested.
    pub fn listen(&mut self) -> Result<SocketAddr> {
        let listener: TcpListener = make_listening_socket(&self.address, self.port)?;
        let local: SocketAddr = listener
            .local_addr()
            .map_err(ToyError::setup("getsockname"))?;
        let fd: RawFd = self.reactor.adopt_listener(listener);
        self.reactor.async_accept(fd)?;
        self.listener = Some(fd);
        info!("ToyWs listening on {local}");
        Ok(local)
    }

    /// Serves until stopped. Listens first unless [`Self::listen`] was already called.
    pub fn run(&mut self) -> Result<()> {
        if self.listener.is_none() {
            self.listen()?;
        }
        self.reactor.run()
    }

    pub fn stop(&self) {
        self.reactor.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.reactor.stop_handle()
    }

    /// Responses fully written so far.
    pub fn served(&self) -> usize {
        self.reactor.handler().served()
    }
}

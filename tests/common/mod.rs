#![allow(dead_code)]

use std::{
    io::{Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    sync::mpsc,
    thread::{self, JoinHandle},
    time::Duration,
};
use toyws::library::{
    config::ReactorConfig,
    error::Result,
    http::{Parsed, Response, ResponseParser},
    network::make_listening_socket,
    reactor::{Handler, Reactor, StopHandle},
};

const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A reactor serving a loopback listener from its own thread.
pub struct TestServer<H> {
    pub addr: SocketAddr,
    stop: StopHandle,
    thread: JoinHandle<Result<H>>,
}

impl<H> TestServer<H>
where
    H: Handler + Send + 'static,
{
    pub fn start<F>(config: ReactorConfig, make_handler: F) -> Self
    where
        F: FnOnce() -> H + Send + 'static,
    {
        let listener = make_listening_socket("127.0.0.1", 0).expect("listener");
        let addr: SocketAddr = listener.local_addr().expect("local address");
        let (tx, rx) = mpsc::channel::<StopHandle>();
        let thread = thread::spawn(move || {
            let mut reactor: Reactor<H> = Reactor::new(&config, make_handler())?;
            let fd = reactor.adopt_listener(listener);
            reactor.async_accept(fd)?;
            tx.send(reactor.stop_handle()).expect("stop handle");
            reactor.run()?;
            Ok(reactor.into_handler())
        });
        let stop: StopHandle = rx.recv().expect("reactor failed to start");
        Self { addr, stop, thread }
    }

    /// Stops the reactor and hands back its handler.
    pub fn stop(self) -> H {
        self.stop.stop();
        self.join()
    }

    /// Waits for the handler to stop the reactor on its own.
    pub fn join(self) -> H {
        self.thread
            .join()
            .expect("reactor thread panicked")
            .expect("reactor failed")
    }
}

pub fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).expect("connect");
    stream.set_read_timeout(Some(CLIENT_TIMEOUT)).expect("timeout");
    stream
}

/// Sends `payload`, half-closes, and reads until the server closes.
pub fn exchange(addr: SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut stream = connect(addr);
    send(&mut stream, payload);
    receive(&mut stream)
}

pub fn send(stream: &mut TcpStream, payload: &[u8]) {
    stream.write_all(payload).expect("send");
    stream.shutdown(Shutdown::Write).expect("half-close");
}

pub fn receive(stream: &mut TcpStream) -> Vec<u8> {
    let mut received = Vec::new();
    stream.read_to_end(&mut received).expect("receive");
    received
}

pub fn parse(raw: &[u8]) -> Response {
    match ResponseParser::new().parse(raw).expect("well-formed response") {
        Parsed::Complete(response) => response,
        Parsed::Incomplete => panic!("truncated response: {:?}", String::from_utf8_lossy(raw)),
    }
}

/// Small rings keep the slot table tiny.
pub fn tiny_config() -> ReactorConfig {
    ReactorConfig::new()
        .set_sq_depth(2)
        .set_cq_depth(2)
        .set_wait_timeout(Some(Duration::from_millis(20)))
        .build()
}

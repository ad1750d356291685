use crate::library::error::{Result, ToyError};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use tracing::{debug, info};

pub const ACCEPT_BACKLOG: i32 = 5;

/// Binds an IPv4 TCP listener with `SO_REUSEADDR` and starts listening.
///
/// Port 0 picks a free port; read it back with `TcpListener::local_addr`.
pub fn make_listening_socket(address: &str, port: u16) -> Result<TcpListener> {
    let ip: Ipv4Addr = address
        .parse()
        .map_err(|_| ToyError::InvalidAddress(address.to_string()))?;
    let listener: Socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .map_err(ToyError::setup("socket"))?;
    // Quick restarts must not trip over sockets lingering in TIME_WAIT.
    listener
        .set_reuse_address(true)
        .map_err(ToyError::setup("setsockopt"))?;
    listener
        .bind(&SockAddr::from(SocketAddrV4::new(ip, port)))
        .map_err(ToyError::setup("bind"))?;
    listener
        .listen(ACCEPT_BACKLOG)
        .map_err(ToyError::setup("listen"))?;
    let listener: TcpListener = listener.into();
    match listener.local_addr() {
        Ok(addr) => info!("Listening on {addr}"),
        Err(err) => debug!("Listening, local address unavailable: {err}"),
    }
    Ok(listener)
}

mod common;

use common::{TestServer, connect, exchange, parse, receive, send, tiny_config};
use socket2::SockRef;
use std::{io::Write, os::fd::RawFd, thread, time::Duration};
use toyws::library::{
    config::ReactorConfig,
    connection::ConnState,
    error::Result,
    http::{HttpHandler, Request, Response, Status},
    reactor::{EchoHandler, Handler, IoService},
};

fn all_good(_: &Request) -> Response {
    Response::new(Status::Ok).with_reason("All Good")
}

// ═══ Echo ═══

#[test]
fn echo_writes_back_what_it_read() {
    let server = TestServer::start(ReactorConfig::new(), || EchoHandler::stopping_after(1));
    let echoed = exchange(server.addr, b"Hello There");
    assert_eq!(echoed, b"Hello There");
    assert_eq!(server.join().served(), 1);
}

// ═══ Callback order ═══

#[derive(Default)]
struct Recorder {
    seen: Vec<ConnState>,
}

impl Recorder {
    fn record(&mut self, io: &IoService, slot: usize) {
        self.seen.push(io.state_of(slot).expect("occupied slot"));
    }
}

impl Handler for Recorder {
    type Session = ();

    fn on_accept(&mut self, io: &mut IoService, _listener: RawFd, slot: usize) -> Result<()> {
        self.record(io, slot);
        io.async_read(slot)
    }

    fn on_read(&mut self, io: &mut IoService, slot: usize) -> Result<()> {
        self.record(io, slot);
        io.async_write(slot)
    }

    fn on_write(&mut self, io: &mut IoService, slot: usize) -> Result<()> {
        self.record(io, slot);
        io.close(slot)?;
        assert_eq!(io.state_of(slot), None);
        io.stop();
        Ok(())
    }
}

#[test]
fn callbacks_follow_the_connection_lifecycle() {
    let server = TestServer::start(ReactorConfig::new(), Recorder::default);
    assert_eq!(exchange(server.addr, b"ping"), b"ping");
    let recorder = server.join();
    assert_eq!(
        recorder.seen,
        vec![ConnState::Accepting, ConnState::Reading, ConnState::Writing]
    );
}

// ═══ Detach and reattach ═══

/// Echo that moves each connection out of the table and back before writing.
#[derive(Default)]
struct Relocator {
    moves: Vec<(usize, usize)>,
}

impl Handler for Relocator {
    type Session = ();

    fn on_read(&mut self, io: &mut IoService, slot: usize) -> Result<()> {
        let conn = io.take_connection(slot)?;
        assert_eq!(io.state_of(slot), None);
        let fd = conn.socket().expect("accepted socket");
        // The socket survives the detach.
        assert_ne!(unsafe { libc::fcntl(fd, libc::F_GETFD) }, -1);

        let back = io.give_connection(conn)?;
        assert_eq!(io.connection(back)?.socket(), Some(fd));
        assert_eq!(io.connection(back)?.content(), b"moving");
        self.moves.push((slot, back));
        io.async_write(back)
    }

    fn on_write(&mut self, io: &mut IoService, slot: usize) -> Result<()> {
        io.close(slot)?;
        io.stop();
        Ok(())
    }
}

#[test]
fn taken_connection_can_be_given_back_and_used() {
    let server = TestServer::start(ReactorConfig::new(), Relocator::default);
    assert_eq!(exchange(server.addr, b"moving"), b"moving");
    assert_eq!(server.join().moves.len(), 1);
}

// ═══ Failures stay with their connection ═══

#[test]
fn reset_peers_do_not_stop_the_server() {
    let server = TestServer::start(ReactorConfig::new(), || HttpHandler::new(all_good));
    for _ in 0..3 {
        let mut peer = connect(server.addr);
        peer.write_all(b"GET / HT").expect("partial request");
        SockRef::from(&peer)
            .set_linger(Some(Duration::ZERO))
            .expect("linger");
        // Dropping with a zero linger sends RST instead of FIN.
        drop(peer);
    }
    thread::sleep(Duration::from_millis(100));

    let response = parse(&exchange(server.addr, b"GET / HTTP/1.1\r\n\r\n"));
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(server.stop().served(), 1);
}

// ═══ HTTP ═══

#[test]
fn http_exchange_uses_the_callback_response() {
    let server = TestServer::start(ReactorConfig::new(), || HttpHandler::new(all_good));
    let raw = exchange(server.addr, b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert!(raw.starts_with(b"HTTP/1.1 200 All Good\r\n"));
    let response = parse(&raw);
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.reason(), "All Good");
    assert_eq!(server.stop().served(), 1);
}

#[test]
fn request_split_across_reads_is_reassembled() {
    let server = TestServer::start(ReactorConfig::new(), || {
        HttpHandler::new(|request: &Request| {
            Response::new(Status::Ok).with_body(request.body().to_vec())
        })
    });
    let mut stream = connect(server.addr);
    stream
        .write_all(b"POST /upload HTTP/1.1\r\nContent-Length: 10\r\n\r\nhello")
        .expect("first half");
    thread::sleep(Duration::from_millis(50));
    send(&mut stream, b"world");
    let response = parse(&receive(&mut stream));
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.body(), b"helloworld");
    server.stop();
}

#[test]
fn unparsable_content_length_is_not_a_bad_request() {
    let server = TestServer::start(ReactorConfig::new(), || {
        HttpHandler::new(|request: &Request| {
            Response::new(Status::Ok).with_body(request.body().to_vec())
        })
    });
    let raw = exchange(server.addr, b"POST / HTTP/1.1\r\nContent-Length: lots\r\n\r\nxyz");
    let response = parse(&raw);
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.body(), b"xyz");
    server.stop();
}

#[test]
fn oversize_response_is_streamed_whole() {
    let body = vec![b'x'; 5000];
    let expected = body.clone();
    let server = TestServer::start(ReactorConfig::new(), move || {
        HttpHandler::new(move |_: &Request| {
            Response::new(Status::Ok)
                .with_header("Content-Length", body.len().to_string())
                .with_body(body.clone())
        })
    });
    let raw = exchange(server.addr, b"GET /big HTTP/1.1\r\n\r\n");
    let response = parse(&raw);
    assert_eq!(response.header("Content-Length"), Some("5000"));
    assert_eq!(response.body(), expected.as_slice());
    assert_eq!(server.stop().served(), 1);
}

#[test]
fn malformed_request_gets_bad_request() {
    let server = TestServer::start(ReactorConfig::new(), || HttpHandler::new(all_good));
    let response = parse(&exchange(server.addr, b"BREW /pot HTTP/1.1\r\n\r\n"));
    assert_eq!(response.status(), Status::BadRequest);
    assert_eq!(response.reason(), "ERR");
    assert!(String::from_utf8_lossy(response.body()).contains("invalid method"));
    server.stop();
}

#[test]
fn request_cut_short_by_the_peer_gets_bad_request() {
    let server = TestServer::start(ReactorConfig::new(), || HttpHandler::new(all_good));
    let response = parse(&exchange(server.addr, b"GET / HTTP/1.1\r\nHost: x\r\n"));
    assert_eq!(response.status(), Status::BadRequest);
    server.stop();
}

// ═══ Slot table ═══

#[test]
fn slots_are_reused_across_connections() {
    let server = TestServer::start(tiny_config(), || HttpHandler::new(all_good));
    for _ in 0..10 {
        let response = parse(&exchange(server.addr, b"GET / HTTP/1.1\r\n\r\n"));
        assert_eq!(response.status(), Status::Ok);
    }
    assert_eq!(server.stop().served(), 10);
}

#[test]
fn full_table_delays_accepts_without_losing_them() {
    // Two slots: the third peer waits in the backlog until one closes.
    let config = ReactorConfig::new().set_sq_depth(1).set_cq_depth(1).build();
    let server = TestServer::start(config, || HttpHandler::new(all_good));
    let mut peers: Vec<_> = (0..3).map(|_| connect(server.addr)).collect();
    for peer in peers.iter_mut().rev() {
        send(peer, b"GET / HTTP/1.1\r\n\r\n");
    }
    for peer in peers.iter_mut() {
        assert_eq!(parse(&receive(peer)).status(), Status::Ok);
    }
    assert_eq!(server.stop().served(), 3);
}

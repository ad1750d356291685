use mimalloc::MiMalloc;
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::{env::args, process::ExitCode};
use toyws::library::{
    app::ToyWs,
    config::ReactorConfig,
    error::{Result, ToyError},
    http::{Request, Response, Status, StatusError},
    reactor::{EchoHandler, Reactor, StopHandle},
};
use tracing::{error, info, warn};
use tracing_subscriber::fmt;

const DEFAULT_ADDRESS: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const HELLO: &str = "Hello, World!";

fn bootstrap_logs(verbose: bool) {
    fmt()
        .with_max_level(if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO })
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_target(false)
        .compact()
        .with_ansi(true)
        .init();
}

struct Args {
    address: String,
    port: u16,
    echo: bool,
    sqpoll: bool,
    verbose: bool,
}

fn parse_args() -> Result<Args> {
    let mut parsed = Args {
        address: DEFAULT_ADDRESS.to_owned(),
        port: DEFAULT_PORT,
        echo: false,
        sqpoll: false,
        verbose: false,
    };
    let mut args = args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--address" => {
                parsed.address = args
                    .next()
                    .ok_or_else(|| ToyError::InvalidAddress("missing value for --address".into()))?;
            }
            "--port" => {
                let value: String = args.next().unwrap_or_default();
                parsed.port = value
                    .parse()
                    .map_err(|_| ToyError::InvalidAddress(format!("bad port {value:?}")))?;
            }
            "--echo" => parsed.echo = true,
            "--sqpoll" => parsed.sqpoll = true,
            "--verbose" => parsed.verbose = true,
            other => warn!("Ignoring unknown argument {other}"),
        }
    }
    Ok(parsed)
}

fn handler(request: &Request) -> Response {
    match request.resource() {
        b"/" => Response::new(Status::Ok)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_header("Content-Length", HELLO.len().to_string())
            .with_body(HELLO),
        _ => StatusError::new(Status::NotFound, "Not found").into(),
    }
}

fn install_ctrlc(stop: StopHandle) {
    if let Err(err) = ctrlc::set_handler(move || {
        info!("Interrupted, stopping");
        stop.stop();
    }) {
        warn!("Ctrl-C handler not installed: {err}");
    }
}

fn serve(args: &Args) -> Result<()> {
    let config: ReactorConfig = ReactorConfig::new()
        .set_sqpoll_enabled(args.sqpoll)
        .build();

    if args.echo {
        let mut reactor: Reactor<EchoHandler> = Reactor::new(&config, EchoHandler::new())?;
        let listener = reactor.make_listening_socket(&args.address, args.port)?;
        reactor.async_accept(listener)?;
        install_ctrlc(reactor.stop_handle());
        return reactor.run();
    }

    let mut server = ToyWs::new(&args.address, args.port, &config, handler)?;
    install_ctrlc(server.stop_handle());
    server.run()
}

fn main() -> ExitCode {
    let verbose: bool = args().any(|arg| arg == "--verbose");
    bootstrap_logs(verbose);
    let outcome: Result<()> = parse_args().and_then(|args| serve(&args));
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

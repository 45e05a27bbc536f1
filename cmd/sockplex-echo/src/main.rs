//! sockplex Echo Server
//!
//! Line echo server on the sockplex reactor. Each client's host name is
//! looked up through a reverse-DNS coserver while the session runs.
//!
//! Usage:
//!     cargo build --release -p sockplex-echo
//!     ./target/release/sockplex-echo [port] [max_conns]
//!
//! Test with:
//!     echo "hello" | nc localhost 4242
//!
//! Session commands:
//!     stats  - one line per connection
//!     quit   - say goodbye and close
//!
//! Logging follows `SOCKPLEX_LOG` (default `info`); reactor settings follow
//! the `SOCKPLEX_*` variables.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use sockplex::{
    Boundary, Connection, Context, CoserverKind, Detection, Handler, PortConfig, Reactor,
    ReactorConfig, Result, Server,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Ticks without input before a client is dropped
const IDLE_TICKS: u32 = 60;
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

static RUNNING: AtomicBool = AtomicBool::new(true);

struct EchoServer;

impl Server for EchoServer {
    fn name(&self) -> &str {
        "echo"
    }

    // Anything is an echo client
    fn detect(&mut self, conn: &Connection) -> Detection {
        if conn.recv_buffer().is_empty() {
            Detection::Pending
        } else {
            Detection::Recognized { consumed: 0 }
        }
    }

    fn connect(&mut self, cx: &mut Context<'_>) -> Result<()> {
        let conn = cx.conn();
        conn.set_boundary(Some(Boundary::line()));
        conn.set_idle(Some(IDLE_TICKS));
        conn.set_handler(Box::new(EchoHandler { lines: 0 }));

        if let Some(remote) = cx.conn().remote() {
            let id = cx.id();
            cx.resolve_host(remote.ip(), move |registry, host| {
                if let Some(conn) = registry.find_mut(id) {
                    conn.set_remote_host(host.map(str::to_string));
                }
            });
        }
        Ok(())
    }
}

struct EchoHandler {
    lines: u64,
}

impl Handler for EchoHandler {
    fn handle_request(&mut self, cx: &mut Context<'_>, line: &[u8]) -> Result<()> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        self.lines += 1;
        cx.conn().set_idle(Some(IDLE_TICKS));

        match line {
            b"quit" => {
                cx.write(b"bye\n")?;
                cx.conn().set_final_write();
            }
            b"stats" => {
                let now = cx.now();
                let mut report = vec![cx.conn().stats(now).to_string()];
                report.extend(cx.registry().iter().map(|c| c.stats(now).to_string()));
                for entry in report {
                    cx.write(entry.as_bytes())?;
                    cx.write(b"\n")?;
                }
            }
            _ => {
                cx.write(line)?;
                cx.write(b"\n")?;
            }
        }
        Ok(())
    }

    fn idle(&mut self, cx: &mut Context<'_>) -> Result<()> {
        cx.write(b"idle timeout\n")?;
        cx.conn().set_final_write();
        Ok(())
    }

    fn disconnected(&mut self, cx: &mut Context<'_>) {
        let id = cx.id();
        let host = cx.conn().remote_host().map(str::to_string);
        info!(conn = %id, lines = self.lines, host = ?host, "client left");
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("SOCKPLEX_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn serve(port: u16, max_conns: usize) -> Result<()> {
    let config = ReactorConfig::from_env().max_connections(max_conns);
    let mut reactor = Reactor::new(config)?;
    let echo = reactor.add_server(Box::new(EchoServer))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    reactor.bind(&PortConfig::tcp(addr), &[echo])?;
    if let Err(e) = reactor.spawn_coserver(CoserverKind::ReverseDns) {
        warn!(error = %e, "reverse DNS lookups disabled");
    }
    info!(%addr, max_conns, "sockplex-echo listening");

    let mut last_status = Instant::now();
    while RUNNING.load(Ordering::Relaxed) {
        reactor.run_once()?;
        if last_status.elapsed() >= STATUS_INTERVAL {
            info!(
                connections = reactor.registry().len(),
                coservers = reactor.coservers().len(),
                pending = reactor.coservers().pending(),
                ticks = reactor.ticks(),
                "status"
            );
            last_status = Instant::now();
        }
    }

    info!("shutting down");
    let abandoned = reactor.finalize();
    info!(abandoned, "done");
    Ok(())
}

fn main() -> ExitCode {
    init_logging();

    let args: Vec<String> = std::env::args().collect();
    let port: u16 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(4242);
    let max_conns: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(1024);

    // SIGINT/SIGTERM interrupt poll and end the loop
    unsafe {
        libc::signal(libc::SIGINT, handle_signal as *const () as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_signal as *const () as libc::sighandler_t);
    }

    match serve(port, max_conns) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "sockplex-echo failed");
            ExitCode::FAILURE
        }
    }
}

extern "C" fn handle_signal(_sig: libc::c_int) {
    RUNNING.store(false, Ordering::Relaxed);
}

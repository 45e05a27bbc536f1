//! sockplex coserver worker
//!
//! Serves one kind of blocking lookup over the coserver line protocol:
//! requests on stdin, responses on stdout, logs on stderr.
//!
//! Usage:
//!     sockplex-coserver <reverse-dns|dns|ident>
//!
//! Started by the reactor when `SOCKPLEX_COSERVER_PROGRAM` points here.
//! By hand:
//!     printf '1:127.0.0.1\n' | sockplex-coserver reverse-dns

use std::io;
use std::process::ExitCode;

use sockplex::coserver::{lookup, worker};
use sockplex_core::CoserverKind;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = EnvFilter::try_from_env("SOCKPLEX_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    init_logging();

    let Some(arg) = std::env::args().nth(1) else {
        eprintln!("usage: sockplex-coserver <reverse-dns|dns|ident>");
        return ExitCode::from(2);
    };
    let kind: CoserverKind = match arg.parse() {
        Ok(kind) => kind,
        Err(e) => {
            error!(error = %e, "bad coserver kind");
            return ExitCode::from(2);
        }
    };

    info!(%kind, pid = std::process::id(), "coserver ready");
    let stdin = io::stdin();
    let stdout = io::stdout();
    match worker::serve(stdin.lock(), stdout.lock(), |payload| lookup::lookup(kind, payload)) {
        Ok(served) => {
            info!(%kind, served, "coserver done");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(%kind, error = %e, "coserver i/o failed");
            ExitCode::FAILURE
        }
    }
}

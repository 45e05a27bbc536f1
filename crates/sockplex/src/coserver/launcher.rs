//! Starting coserver workers
//!
//! A [`WorkerLauncher`] turns a [`CoserverKind`] into a running worker and
//! the two byte streams the reactor talks to it over. Implementations:
//!
//! - [`ThreadLauncher`] - worker thread fed through two pipes
//! - [`ProcessLauncher`] - child process on piped stdin/stdout

use std::ffi::OsString;
use std::fs::File;
use std::io::BufReader;
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use sockplex_core::{CoserverKind, Error, Result};
use tracing::{debug, warn};

use super::{lookup, worker};
use crate::sys;

/// OS-level handle of a running worker.
pub trait WorkerHandle {
    fn is_alive(&mut self) -> bool;

    /// Stop the worker. Must not block for long.
    fn terminate(&mut self);

    /// Block until the worker has exited. Only called once the reactor
    /// has closed its end of the request stream.
    fn wait(&mut self) {}

    /// Short description for logs and admin listings
    fn describe(&self) -> String;
}

/// Reactor-side ends of a freshly started worker.
pub struct WorkerChannel {
    /// Responses arrive here
    pub recv: OwnedFd,
    /// Requests go here
    pub send: OwnedFd,
    pub handle: Box<dyn WorkerHandle>,
}

pub trait WorkerLauncher {
    fn launch(&mut self, kind: CoserverKind) -> Result<WorkerChannel>;
}

/// Lookup function run by thread workers.
pub type Resolver = Arc<dyn Fn(CoserverKind, &str) -> Option<String> + Send + Sync>;

/// Runs each worker on its own thread.
pub struct ThreadLauncher {
    resolver: Resolver,
    spawned: u32,
}

impl ThreadLauncher {
    /// Workers perform the real blocking lookups.
    pub fn new() -> Self {
        Self::with_resolver(Arc::new(lookup::lookup))
    }

    /// Workers answer through `resolver` instead.
    pub fn with_resolver(resolver: Resolver) -> Self {
        ThreadLauncher {
            resolver,
            spawned: 0,
        }
    }
}

impl Default for ThreadLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerLauncher for ThreadLauncher {
    fn launch(&mut self, kind: CoserverKind) -> Result<WorkerChannel> {
        let (req_r, req_w) = sys::pipe()?;
        let (resp_r, resp_w) = sys::pipe()?;
        let resolver = Arc::clone(&self.resolver);
        let name = format!("coserver-{}-{}", kind, self.spawned);
        self.spawned += 1;

        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let input = BufReader::new(File::from(req_r));
                let output = File::from(resp_w);
                match worker::serve(input, output, |payload| (*resolver)(kind, payload)) {
                    Ok(served) => debug!(%kind, served, "coserver thread exiting"),
                    Err(e) => debug!(%kind, error = %e, "coserver thread stopped"),
                }
            })
            .map_err(|e| Error::Spawn(e.to_string()))?;

        Ok(WorkerChannel {
            recv: resp_r,
            send: req_w,
            handle: Box::new(ThreadWorker {
                name,
                join: Some(join),
            }),
        })
    }
}

struct ThreadWorker {
    name: String,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle for ThreadWorker {
    fn is_alive(&mut self) -> bool {
        self.join.as_ref().map_or(false, |j| !j.is_finished())
    }

    // Threads cannot be killed; the worker leaves its loop once the
    // request pipe closes, which happens when the proxy is destroyed.
    fn terminate(&mut self) {}

    fn wait(&mut self) {
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!(thread = %self.name, "coserver thread panicked");
            }
        }
    }

    fn describe(&self) -> String {
        format!("thread {}", self.name)
    }
}

/// Runs each worker as `program [args..] <kind>`.
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        ProcessLauncher {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&mut self, kind: CoserverKind) -> Result<WorkerChannel> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(kind.name())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::Spawn(format!("{}: {}", self.program.display(), e)))?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Spawn("child started without pipes".into()));
            }
        };
        debug!(%kind, pid = child.id(), "coserver process started");

        Ok(WorkerChannel {
            recv: OwnedFd::from(stdout),
            send: OwnedFd::from(stdin),
            handle: Box::new(ProcessWorker { child }),
        })
    }
}

struct ProcessWorker {
    child: Child,
}

impl WorkerHandle for ProcessWorker {
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn terminate(&mut self) {
        if self.is_alive() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }

    fn wait(&mut self) {
        let _ = self.child.wait();
    }

    fn describe(&self) -> String {
        format!("pid {}", self.child.id())
    }
}

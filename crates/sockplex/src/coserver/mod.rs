//! # Coservers
//!
//! Offload workers for blocking lookups (reverse DNS, DNS, ident). Each
//! worker is represented in the registry by a pipe connection, its proxy,
//! so requests and responses flow through the ordinary reactor cycle.
//!
//! Requests are tagged with a [`RequestId`] that is never reused. The
//! response carrying that id resolves the pending entry exactly once;
//! responses may arrive in any order.
//!
//! ## Modules
//!
//! - `launcher` - Thread and process worker launchers
//! - `worker` - Worker-side request loop
//! - `lookup` - The blocking lookups themselves

pub mod launcher;
pub mod lookup;
pub mod worker;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use sockplex_core::{
    wire, Boundary, ConnId, CoserverKey, CoserverKind, RequestId, Result,
};
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::handler::{Context, CoserverCallback, Handler};
use crate::registry::Registry;
use crate::transport::Transport;

pub use launcher::{
    ProcessLauncher, Resolver, ThreadLauncher, WorkerChannel, WorkerHandle, WorkerLauncher,
};

struct Coserver {
    key: CoserverKey,
    kind: CoserverKind,
    conn: ConnId,
    handle: Box<dyn WorkerHandle>,
    busy: u32,
    served: u64,
    started: Instant,
}

/// Worker torn down but not yet known to have exited.
struct Retired {
    conn: ConnId,
    handle: Box<dyn WorkerHandle>,
}

struct Pending {
    worker: CoserverKey,
    kind: CoserverKind,
    callback: CoserverCallback,
}

/// Snapshot of one running worker.
#[derive(Debug, Clone)]
pub struct CoserverStats {
    pub key: CoserverKey,
    pub kind: CoserverKind,
    pub conn: ConnId,
    /// Requests sent and not yet answered
    pub busy: u32,
    pub served: u64,
    pub worker: String,
    pub uptime: Duration,
}

impl fmt::Display for CoserverStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:<11} conn {} busy {} served {} up {}s ({})",
            self.key,
            self.kind,
            self.conn,
            self.busy,
            self.served,
            self.uptime.as_secs(),
            self.worker
        )
    }
}

/// Worker table and pending-request table.
pub struct Coservers {
    workers: Vec<Coserver>,
    retired: Vec<Retired>,
    pending: HashMap<RequestId, Pending>,
    next_request: u64,
    next_key: u32,
    launcher: Box<dyn WorkerLauncher>,
    buffer_size: usize,
}

impl Coservers {
    pub fn new(launcher: Box<dyn WorkerLauncher>, buffer_size: usize) -> Self {
        Coservers {
            workers: Vec::new(),
            retired: Vec::new(),
            pending: HashMap::new(),
            next_request: 0,
            next_key: 0,
            launcher,
            buffer_size,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::new(Box::new(ThreadLauncher::new()), 4096)
    }

    /// Start a worker of `kind` and register its proxy connection.
    pub fn spawn(&mut self, registry: &mut Registry, kind: CoserverKind) -> Result<CoserverKey> {
        let WorkerChannel {
            recv,
            send,
            mut handle,
        } = self.launcher.launch(kind)?;
        let key = CoserverKey(self.next_key);

        let transport = match Transport::pipe(recv, send) {
            Ok(t) => t,
            Err(e) => {
                handle.terminate();
                return Err(e.into());
            }
        };
        let mut conn = Connection::new(transport);
        conn.grow_buffers(self.buffer_size, self.buffer_size);
        conn.mark_coserver();
        conn.set_boundary(Some(Boundary::line()));
        conn.set_handler(Box::new(CoserverLink { key }));

        let conn = match registry.enqueue(conn) {
            Ok(id) => id,
            Err(e) => {
                handle.terminate();
                return Err(e);
            }
        };
        self.next_key += 1;
        info!(coserver = %key, %kind, conn = %conn, worker = %handle.describe(), "coserver started");
        self.workers.push(Coserver {
            key,
            kind,
            conn,
            handle,
            busy: 0,
            served: 0,
            started: Instant::now(),
        });
        Ok(key)
    }

    /// Send `payload` to the least busy worker of `kind` whose proxy is
    /// not shutting down.
    ///
    /// Returns `None` without calling `callback` when no such worker runs
    /// or the request cannot be queued.
    pub fn send(
        &mut self,
        registry: &mut Registry,
        kind: CoserverKind,
        payload: &str,
        callback: CoserverCallback,
    ) -> Option<RequestId> {
        let Some(worker) = self
            .workers
            .iter_mut()
            .filter(|w| w.kind == kind && registry.find(w.conn).map_or(false, |c| !c.is_killed()))
            .min_by_key(|w| w.busy)
        else {
            debug!(%kind, "no coserver running, request dropped");
            return None;
        };

        let id = RequestId(self.next_request);
        let line = match wire::encode(id, payload) {
            Ok(line) => line,
            Err(e) => {
                warn!(%kind, error = %e, "coserver request not encodable");
                return None;
            }
        };
        self.next_request += 1;

        let Some(proxy) = registry.find_mut(worker.conn) else {
            warn!(coserver = %worker.key, "coserver proxy vanished");
            return None;
        };
        if let Err(e) = proxy.write(line.as_bytes()) {
            warn!(coserver = %worker.key, request = %id, error = %e, "coserver write failed");
            proxy.shutdown();
            return None;
        }
        worker.busy += 1;
        debug!(coserver = %worker.key, request = %id, %kind, "coserver request sent");
        self.pending.insert(
            id,
            Pending {
                worker: worker.key,
                kind,
                callback,
            },
        );
        Some(id)
    }

    /// One response line from worker `key`.
    pub(crate) fn complete(&mut self, registry: &mut Registry, key: CoserverKey, line: &[u8]) {
        let (id, result) = match wire::decode(line) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(coserver = %key, error = %e, "malformed coserver response");
                return;
            }
        };
        let Some(pending) = self.pending.remove(&id) else {
            warn!(coserver = %key, request = %id, "response for unknown request");
            return;
        };
        if pending.worker != key {
            debug!(request = %id, sent_to = %pending.worker, answered_by = %key, "response from another worker");
        }
        if let Some(worker) = self.workers.iter_mut().find(|w| w.key == pending.worker) {
            worker.busy = worker.busy.saturating_sub(1);
            worker.served += 1;
        }
        let result = if result.is_empty() { None } else { Some(result) };
        debug!(request = %id, kind = %pending.kind, ok = result.is_some(), "coserver response");
        (pending.callback)(registry, result);
    }

    /// Proxy connection went away; drop the worker.
    pub(crate) fn forget(&mut self, key: CoserverKey) {
        if let Some(pos) = self.workers.iter().position(|w| w.key == key) {
            let worker = self.workers.remove(pos);
            info!(coserver = %key, kind = %worker.kind, "coserver disconnected");
            self.retire(worker);
        }
    }

    fn retire(&mut self, mut worker: Coserver) {
        worker.handle.terminate();
        self.retired.push(Retired {
            conn: worker.conn,
            handle: worker.handle,
        });
    }

    /// Wait for retired workers whose request stream is closed. A proxy
    /// still registered has its descriptors closed first; one checked out
    /// by a running callback is left for a later call.
    pub(crate) fn join_retired(&mut self, registry: &mut Registry) {
        let mut waiting = Vec::new();
        for mut retired in self.retired.drain(..) {
            let closed = match registry.find_mut(retired.conn) {
                Some(proxy) => {
                    proxy.close_transport();
                    true
                }
                None => !registry.contains(retired.conn),
            };
            if closed {
                retired.handle.wait();
                debug!(conn = %retired.conn, worker = %retired.handle.describe(), "coserver worker joined");
            } else {
                waiting.push(retired);
            }
        }
        self.retired = waiting;
    }

    /// Tear down worker `key` and schedule its proxy for shutdown.
    pub fn destroy(&mut self, registry: &mut Registry, key: CoserverKey) -> bool {
        let Some(pos) = self.workers.iter().position(|w| w.key == key) else {
            return false;
        };
        let worker = self.workers.remove(pos);
        registry.shutdown(worker.conn);
        info!(coserver = %key, kind = %worker.kind, "coserver destroyed");
        self.retire(worker);
        true
    }

    /// Tear down every worker of `kind`.
    pub fn destroy_kind(&mut self, registry: &mut Registry, kind: CoserverKind) -> usize {
        let keys: Vec<CoserverKey> = self
            .workers
            .iter()
            .filter(|w| w.kind == kind)
            .map(|w| w.key)
            .collect();
        for key in &keys {
            self.destroy(registry, *key);
        }
        keys.len()
    }

    /// Replace every worker of `kind` with a fresh one.
    pub fn restart(&mut self, registry: &mut Registry, kind: CoserverKind) -> Result<CoserverKey> {
        self.destroy_kind(registry, kind);
        self.spawn(registry, kind)
    }

    /// Tear down workers that exited or lost their proxy.
    pub(crate) fn check_liveness(&mut self, registry: &mut Registry) {
        let dead: Vec<CoserverKey> = self
            .workers
            .iter_mut()
            .filter_map(|w| {
                let proxy_ok = registry.find(w.conn).map_or(false, |c| !c.is_killed());
                if proxy_ok && w.handle.is_alive() {
                    None
                } else {
                    Some(w.key)
                }
            })
            .collect();
        for key in dead {
            warn!(coserver = %key, "coserver died");
            self.destroy(registry, key);
        }
        self.retired.retain_mut(|r| r.handle.is_alive());
    }

    /// Tear everything down and wait for the workers to exit. Returns the
    /// number of requests that never got an answer.
    pub fn finalize(&mut self, registry: &mut Registry) -> usize {
        let keys: Vec<CoserverKey> = self.workers.iter().map(|w| w.key).collect();
        for key in keys {
            self.destroy(registry, key);
        }
        self.join_retired(registry);
        let abandoned = self.pending.len();
        for (id, pending) in self.pending.drain() {
            warn!(request = %id, kind = %pending.kind, coserver = %pending.worker, "coserver request abandoned");
        }
        abandoned
    }

    /// Requests awaiting a response
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn count(&self, kind: CoserverKind) -> usize {
        self.workers.iter().filter(|w| w.kind == kind).count()
    }

    pub fn stats(&self) -> Vec<CoserverStats> {
        let now = Instant::now();
        self.workers
            .iter()
            .map(|w| CoserverStats {
                key: w.key,
                kind: w.kind,
                conn: w.conn,
                busy: w.busy,
                served: w.served,
                worker: w.handle.describe(),
                uptime: now.duration_since(w.started),
            })
            .collect()
    }
}

impl Drop for Coservers {
    fn drop(&mut self) {
        for worker in &mut self.workers {
            worker.handle.terminate();
        }
    }
}

/// Handler on a coserver proxy connection.
struct CoserverLink {
    key: CoserverKey,
}

impl Handler for CoserverLink {
    fn handle_request(&mut self, cx: &mut Context<'_>, line: &[u8]) -> Result<()> {
        cx.coservers.complete(cx.registry, self.key, line);
        Ok(())
    }

    fn disconnected(&mut self, cx: &mut Context<'_>) {
        cx.coservers.forget(self.key);
    }
}

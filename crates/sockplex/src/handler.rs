//! Per-connection protocol callbacks
//!
//! A [`Handler`] is installed on a connection by the server that claimed it
//! (see [`Server::connect`](crate::server::Server::connect)). Every callback
//! receives a [`Context`] giving access to the connection, the rest of the
//! registry and the coserver subsystem.
//!
//! Returning `Err` from a callback schedules the connection for shutdown.

use std::net::IpAddr;
use std::time::Instant;

use sockplex_core::{ConnId, CoserverKind, KickReason, RequestId, Result};

use crate::connection::Connection;
use crate::coserver::Coservers;
use crate::framing;
use crate::registry::Registry;

pub trait Handler {
    /// New bytes arrived in the receive buffer.
    ///
    /// The provided implementation splits complete requests off the buffer
    /// according to the connection's [`Boundary`](sockplex_core::Boundary)
    /// and passes each to [`handle_request`](Self::handle_request).
    fn check_request(&mut self, cx: &mut Context<'_>) -> Result<()> {
        framing::check_boundary(self, cx)
    }

    /// One complete request, delimiter stripped.
    fn handle_request(&mut self, cx: &mut Context<'_>, request: &[u8]) -> Result<()> {
        let _ = (cx, request);
        Ok(())
    }

    /// Outbound connect completed.
    fn connected(&mut self, cx: &mut Context<'_>) -> Result<()> {
        let _ = cx;
        Ok(())
    }

    /// Idle countdown expired. Re-arm with `Connection::set_idle`.
    fn idle(&mut self, cx: &mut Context<'_>) -> Result<()> {
        let _ = cx;
        Ok(())
    }

    /// Connection is being removed for misbehaving. Runs right before
    /// [`disconnected`](Self::disconnected). Bytes written here get one
    /// send attempt before the descriptor closes.
    fn kicked(&mut self, cx: &mut Context<'_>, reason: KickReason) {
        let _ = (cx, reason);
    }

    /// Connection is being destroyed. Runs exactly once.
    fn disconnected(&mut self, cx: &mut Context<'_>) {
        let _ = cx;
    }
}

/// Completion callback for a coserver request; gets `None` on failure.
pub type CoserverCallback = Box<dyn FnOnce(&mut Registry, Option<&str>)>;

/// What a callback may touch while it runs.
pub struct Context<'a> {
    pub(crate) conn: &'a mut Connection,
    pub(crate) registry: &'a mut Registry,
    pub(crate) coservers: &'a mut Coservers,
    now: Instant,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        conn: &'a mut Connection,
        registry: &'a mut Registry,
        coservers: &'a mut Coservers,
        now: Instant,
    ) -> Self {
        Context {
            conn,
            registry,
            coservers,
            now,
        }
    }

    /// The connection this callback runs for
    #[inline]
    pub fn conn(&mut self) -> &mut Connection {
        self.conn
    }

    #[inline]
    pub fn id(&self) -> ConnId {
        self.conn.id()
    }

    /// Time the current dispatch started
    #[inline]
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Look up another connection, or this one.
    pub fn find(&mut self, id: ConnId) -> Option<&mut Connection> {
        if id == self.conn.id() {
            return Some(self.conn);
        }
        self.registry.find_mut(id)
    }

    /// Schedule `id` for shutdown. It is not dispatched again this cycle.
    pub fn shutdown(&mut self, id: ConnId) -> bool {
        if id == self.conn.id() {
            self.conn.shutdown();
            return true;
        }
        self.registry.shutdown(id)
    }

    /// Register a connection created by the plugin.
    pub fn enqueue(&mut self, conn: Connection) -> Result<ConnId> {
        self.registry.enqueue(conn)
    }

    pub fn registry(&mut self) -> &mut Registry {
        self.registry
    }

    /// Queue bytes on this connection.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.conn.write(data)
    }

    /// Send a request to the least busy coserver of `kind`.
    ///
    /// `None` when no such coserver runs; the callback is then dropped
    /// without being called.
    pub fn coserver<F>(&mut self, kind: CoserverKind, payload: &str, on_result: F) -> Option<RequestId>
    where
        F: FnOnce(&mut Registry, Option<&str>) + 'static,
    {
        self.coservers.send(self.registry, kind, payload, Box::new(on_result))
    }

    /// Resolve `addr` to a host name.
    pub fn resolve_host<F>(&mut self, addr: IpAddr, on_result: F) -> Option<RequestId>
    where
        F: FnOnce(&mut Registry, Option<&str>) + 'static,
    {
        self.coserver(CoserverKind::ReverseDns, &addr.to_string(), on_result)
    }

    /// Resolve `host` to its first IPv4 address.
    pub fn resolve_addr<F>(&mut self, host: &str, on_result: F) -> Option<RequestId>
    where
        F: FnOnce(&mut Registry, Option<&str>) + 'static,
    {
        self.coserver(CoserverKind::Dns, host, on_result)
    }

    /// Ask the peer's ident service who owns this connection. Needs both
    /// addresses; `None` without them.
    pub fn identify<F>(&mut self, on_result: F) -> Option<RequestId>
    where
        F: FnOnce(&mut Registry, Option<&str>) + 'static,
    {
        let remote = self.conn.remote()?;
        let local = self.conn.local()?;
        let payload = sockplex_core::wire::ident_request(remote.ip(), remote.port(), local.port());
        self.coserver(CoserverKind::Ident, &payload, on_result)
    }
}

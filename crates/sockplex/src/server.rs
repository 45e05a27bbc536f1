//! Server types and instances
//!
//! A [`ServerType`] is a protocol implementation with process-wide setup;
//! a [`Server`] is one configured instance of it, bound to one or more
//! ports. The reactor offers new connections on a port to each bound
//! instance in turn until one recognizes the protocol.

use std::net::SocketAddr;

use sockplex_core::{Result, ServerKey};
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::handler::Context;
use crate::registry::Registry;

/// Outcome of protocol detection on the first bytes of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Detection {
    /// Not recognized (yet)
    Pending,
    /// Claimed; `consumed` leading bytes are dropped before `connect`
    Recognized { consumed: usize },
}

/// Outcome of offering a datagram to a server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Packet {
    Handled,
    Ignored,
}

pub trait ServerType {
    fn name(&self) -> &str;

    fn global_init(&mut self) -> Result<()> {
        Ok(())
    }

    fn global_finalize(&mut self) {}
}

pub trait Server {
    fn name(&self) -> &str;

    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Inspect the receive buffer of a connection still in detection.
    fn detect(&mut self, conn: &Connection) -> Detection {
        let _ = conn;
        Detection::Pending
    }

    /// Take over a recognized connection: install handler, boundary,
    /// idle countdown, buffer sizes.
    fn connect(&mut self, cx: &mut Context<'_>) -> Result<()> {
        let _ = cx;
        Ok(())
    }

    /// A datagram arrived on a packet port this server is bound to.
    fn handle_packet(&mut self, cx: &mut Context<'_>, from: SocketAddr, packet: &[u8]) -> Packet {
        let _ = (cx, from, packet);
        Packet::Ignored
    }

    /// Periodic tick.
    fn notify(&mut self, registry: &mut Registry) {
        let _ = registry;
    }

    fn reset(&mut self) {}

    fn finalize(&mut self) {}
}

/// Registered server types and instances.
#[derive(Default)]
pub struct Servers {
    types: Vec<Box<dyn ServerType>>,
    instances: Vec<Option<Box<dyn Server>>>,
}

impl Servers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_type(&mut self, mut ty: Box<dyn ServerType>) -> Result<()> {
        ty.global_init()?;
        debug!(server_type = ty.name(), "server type registered");
        self.types.push(ty);
        Ok(())
    }

    pub fn add(&mut self, mut server: Box<dyn Server>) -> Result<ServerKey> {
        server.init()?;
        let key = ServerKey(self.instances.len() as u32);
        debug!(server = server.name(), key = %key, "server instance registered");
        self.instances.push(Some(server));
        Ok(key)
    }

    pub fn get(&self, key: ServerKey) -> Option<&dyn Server> {
        self.instances.get(key.0 as usize)?.as_deref()
    }

    pub fn get_mut(&mut self, key: ServerKey) -> Option<&mut (dyn Server + 'static)> {
        self.instances.get_mut(key.0 as usize)?.as_deref_mut()
    }

    pub fn name(&self, key: ServerKey) -> Option<&str> {
        self.get(key).map(|s| s.name())
    }

    /// Finalize and drop one instance. Its key is not reused.
    pub fn remove(&mut self, key: ServerKey) -> bool {
        match self.instances.get_mut(key.0 as usize).and_then(Option::take) {
            Some(mut server) => {
                server.finalize();
                true
            }
            None => {
                warn!(key = %key, "remove of unknown server");
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.instances.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn notify_all(&mut self, registry: &mut Registry) {
        for server in self.instances.iter_mut().flatten() {
            server.notify(registry);
        }
    }

    pub fn reset_all(&mut self) {
        for server in self.instances.iter_mut().flatten() {
            server.reset();
        }
    }

    /// Finalize every instance, then every type in reverse registration
    /// order.
    pub(crate) fn finalize_all(&mut self) {
        for mut server in self.instances.drain(..).flatten() {
            server.finalize();
        }
        while let Some(mut ty) = self.types.pop() {
            ty.global_finalize();
        }
    }
}

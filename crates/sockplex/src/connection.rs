//! Connections
//!
//! A [`Connection`] is what the reactor schedules: a transport, its two
//! buffers, the protocol handler riding on it and the bookkeeping the
//! reactor needs for flow control, idle timeouts and detection.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;
use sockplex_core::{
    Boundary, ConnId, Error, FloodMeter, IoBuffer, KickReason, Result, ServerKey,
};
use tracing::{debug, warn};

use crate::config::defaults;
use crate::handler::Handler;
use crate::port::PortState;
use crate::transport::{ProtoFamily, Transport};

/// Protocol state of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for a server to recognize the first bytes
    Detecting,
    /// Owned by a server; reads go through the handler
    Established,
    /// Killed; destroyed at the end of the current cycle
    ShuttingDown,
}

/// Byte budget and deadline for protocol detection.
#[derive(Debug, Clone)]
pub(crate) struct DetectionBudget {
    pub(crate) candidates: Vec<ServerKey>,
    pub(crate) fill: usize,
    /// `None` waits forever (named pipe ports)
    pub(crate) deadline: Option<Instant>,
}

pub struct Connection {
    id: ConnId,
    pub(crate) transport: Transport,
    state: ConnState,
    pub(crate) recv: IoBuffer,
    pub(crate) send: IoBuffer,
    outbox: VecDeque<(SocketAddr, Bytes)>,
    outbox_bytes: usize,
    pub(crate) handler: Option<Box<dyn Handler>>,
    handler_replaced: bool,
    boundary: Option<Boundary>,
    server: Option<ServerKey>,
    pub(crate) flood: FloodMeter,
    idle: Option<u32>,
    kick: Option<KickReason>,

    killed: bool,
    /// Writes still accepted while `kicked` runs
    farewell: bool,
    listening: bool,
    final_write: bool,
    enqueued: bool,
    pub(crate) connecting: bool,
    coserver: bool,

    parent: Option<ConnId>,
    referrer: Option<ConnId>,
    remote: Option<SocketAddr>,
    local: Option<SocketAddr>,
    remote_host: Option<String>,
    ident: Option<String>,

    created: Instant,
    last_recv: Instant,
    last_send: Instant,
    pub(crate) unavailable_until: Option<Instant>,
    pub(crate) detection: Option<DetectionBudget>,
    pub(crate) port: Option<Box<PortState>>,
}

impl Connection {
    /// Wrap a transport with default buffer limits.
    pub fn new(transport: Transport) -> Self {
        let now = Instant::now();
        let local = transport.local_addr();
        let remote = transport.peer_addr();
        Connection {
            id: ConnId::NONE,
            transport,
            state: ConnState::Established,
            recv: IoBuffer::new(defaults::RECV_BUFFER),
            send: IoBuffer::new(defaults::SEND_BUFFER),
            outbox: VecDeque::new(),
            outbox_bytes: 0,
            handler: None,
            handler_replaced: false,
            boundary: None,
            server: None,
            flood: FloodMeter::new(),
            idle: None,
            kick: None,
            killed: false,
            farewell: false,
            listening: false,
            final_write: false,
            enqueued: false,
            connecting: false,
            coserver: false,
            parent: None,
            referrer: None,
            remote,
            local,
            remote_host: None,
            ident: None,
            created: now,
            last_recv: now,
            last_send: now,
            unavailable_until: None,
            detection: None,
            port: None,
        }
    }

    /// Replace the buffer limits. Only valid before any data moved.
    pub fn with_buffers(mut self, recv: usize, send: usize) -> Self {
        self.recv = IoBuffer::new(recv);
        self.send = IoBuffer::new(send);
        self
    }

    pub fn with_handler(mut self, handler: Box<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    // ── Identity and state ──

    #[inline]
    pub fn id(&self) -> ConnId {
        self.id
    }

    #[inline]
    pub fn family(&self) -> ProtoFamily {
        self.transport.family()
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn state(&self) -> ConnState {
        if self.killed {
            ConnState::ShuttingDown
        } else {
            self.state
        }
    }

    #[inline]
    pub fn is_killed(&self) -> bool {
        self.killed
    }

    #[inline]
    pub fn is_enqueued(&self) -> bool {
        self.enqueued
    }

    #[inline]
    pub fn is_listening(&self) -> bool {
        self.listening
    }

    #[inline]
    pub fn is_pipe(&self) -> bool {
        self.transport.is_pipe()
    }

    #[inline]
    pub fn is_coserver(&self) -> bool {
        self.coserver
    }

    #[inline]
    pub fn is_connecting(&self) -> bool {
        self.connecting
    }

    #[inline]
    pub fn is_final_write(&self) -> bool {
        self.final_write
    }

    /// Server instance that owns this connection
    pub fn server(&self) -> Option<ServerKey> {
        self.server
    }

    /// Schedule shutdown. The connection is destroyed at the end of the
    /// current reactor cycle and is not dispatched again before that.
    pub fn shutdown(&mut self) {
        if !self.killed {
            debug!(conn = %self.id, "scheduled for shutdown");
            self.killed = true;
        }
    }

    /// Schedule shutdown and remember why; `Handler::kicked` receives the
    /// first reason recorded.
    pub fn kick(&mut self, reason: KickReason) {
        if self.kick.is_none() {
            self.kick = Some(reason);
        }
        self.shutdown();
    }

    pub fn kick_reason(&self) -> Option<KickReason> {
        self.kick
    }

    pub(crate) fn take_kick(&mut self) -> Option<KickReason> {
        self.kick.take()
    }

    pub(crate) fn set_farewell(&mut self, farewell: bool) {
        self.farewell = farewell;
    }

    pub(crate) fn set_id(&mut self, id: ConnId) {
        self.id = id;
        self.enqueued = !id.is_none();
    }

    pub(crate) fn set_listening(&mut self, listening: bool) {
        self.listening = listening;
    }

    pub(crate) fn mark_coserver(&mut self) {
        self.coserver = true;
        self.flood.set_exempt(true);
    }

    pub(crate) fn begin_detection(&mut self, detection: DetectionBudget) {
        self.state = ConnState::Detecting;
        self.detection = Some(detection);
    }

    /// Hand the connection to `server`.
    pub(crate) fn establish(&mut self, server: Option<ServerKey>) {
        self.state = ConnState::Established;
        self.server = server;
        self.detection = None;
    }

    // ── Handler and framing ──

    /// Install a handler. Callable from inside a callback; the new handler
    /// takes over from the next callback on, including the rest of the
    /// requests already buffered.
    pub fn set_handler(&mut self, handler: Box<dyn Handler>) {
        self.handler = Some(handler);
        self.handler_replaced = true;
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// True once the running callback has installed a new handler.
    pub fn handler_replaced(&self) -> bool {
        self.handler_replaced
    }

    pub(crate) fn take_handler(&mut self) -> Option<Box<dyn Handler>> {
        self.handler_replaced = false;
        self.handler.take()
    }

    /// Put back a handler taken for a callback, unless the callback
    /// installed a replacement.
    pub(crate) fn restore_handler(&mut self, handler: Box<dyn Handler>) {
        if self.handler.is_none() {
            self.handler = Some(handler);
        }
    }

    pub fn boundary(&self) -> Option<&Boundary> {
        self.boundary.as_ref()
    }

    pub fn set_boundary(&mut self, boundary: Option<Boundary>) {
        self.boundary = boundary;
    }

    /// Fire `Handler::idle` after `ticks` more ticks; `None` disarms.
    pub fn set_idle(&mut self, ticks: Option<u32>) {
        self.idle = ticks;
    }

    pub fn idle_counter(&self) -> Option<u32> {
        self.idle
    }

    /// Count one tick down. True when the countdown just expired.
    pub(crate) fn idle_tick(&mut self) -> bool {
        match self.idle {
            Some(0) | Some(1) => {
                self.idle = None;
                true
            }
            Some(n) => {
                self.idle = Some(n - 1);
                false
            }
            None => false,
        }
    }

    // ── Buffers ──

    pub fn recv_buffer(&self) -> &IoBuffer {
        &self.recv
    }

    pub fn recv_buffer_mut(&mut self) -> &mut IoBuffer {
        &mut self.recv
    }

    pub fn send_buffer(&self) -> &IoBuffer {
        &self.send
    }

    /// Close the descriptors now. The connection stays registered until
    /// the sweep; the reactor no longer polls it.
    pub(crate) fn close_transport(&mut self) {
        self.transport = Transport::detached(self.transport.family());
    }

    /// Raise the buffer limits. Never shrinks.
    pub fn grow_buffers(&mut self, recv: usize, send: usize) {
        self.recv.grow(recv);
        self.send.grow(send);
    }

    /// Queue bytes for sending.
    ///
    /// Overflowing the send buffer kicks the connection as crawling.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.killed && !self.farewell {
            return Err(Error::Closed);
        }
        if let Err(e) = self.send.append(data) {
            warn!(conn = %self.id, len = data.len(), spare = self.send.spare(), "send buffer overflow");
            self.kick(KickReason::Crawling);
            return Err(e);
        }
        Ok(())
    }

    pub fn write_str(&mut self, s: &str) -> Result<()> {
        self.write(s.as_bytes())
    }

    /// Shut down once the send buffer drains.
    pub fn set_final_write(&mut self) {
        self.final_write = true;
    }

    /// Queue one datagram for `to`.
    pub fn send_to(&mut self, to: SocketAddr, data: &[u8]) -> Result<()> {
        if self.killed {
            return Err(Error::Closed);
        }
        if !self.family().is_packet() {
            return Err(Error::Unsupported("send_to on a non-packet connection"));
        }
        let available = self.send.limit().saturating_sub(self.outbox_bytes);
        if data.len() > available {
            return Err(Error::BufferOverflow {
                needed: data.len(),
                available,
            });
        }
        self.outbox_bytes += data.len();
        self.outbox.push_back((to, Bytes::copy_from_slice(data)));
        Ok(())
    }

    pub(crate) fn next_datagram(&mut self) -> Option<(SocketAddr, Bytes)> {
        let item = self.outbox.pop_front()?;
        self.outbox_bytes -= item.1.len();
        Some(item)
    }

    pub(crate) fn requeue_datagram(&mut self, item: (SocketAddr, Bytes)) {
        self.outbox_bytes += item.1.len();
        self.outbox.push_front(item);
    }

    pub fn queued_datagrams(&self) -> usize {
        self.outbox.len()
    }

    pub(crate) fn has_output(&self) -> bool {
        !self.send.is_empty() || !self.outbox.is_empty()
    }

    /// Read what the transport has into the receive buffer.
    pub(crate) fn fill_recv(&mut self) -> std::io::Result<usize> {
        let transport = &mut self.transport;
        self.recv.fill_from(usize::MAX, |buf| transport.read(buf))
    }

    /// One write attempt from the send buffer.
    pub(crate) fn flush_send(&mut self) -> std::io::Result<usize> {
        let n = self.transport.write(self.send.as_slice())?;
        self.send.consume(n);
        Ok(n)
    }

    // ── Flood protection ──

    pub fn set_flood_exempt(&mut self, exempt: bool) {
        self.flood.set_exempt(exempt);
    }

    pub fn is_flood_exempt(&self) -> bool {
        self.flood.is_exempt()
    }

    pub fn flood_points(&self) -> u32 {
        self.flood.points()
    }

    // ── Links and addresses ──

    pub fn parent(&self) -> Option<ConnId> {
        self.parent
    }

    pub fn set_parent(&mut self, parent: Option<ConnId>) {
        self.parent = parent;
    }

    pub fn referrer(&self) -> Option<ConnId> {
        self.referrer
    }

    pub fn set_referrer(&mut self, referrer: Option<ConnId>) {
        self.referrer = referrer;
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub(crate) fn set_remote(&mut self, addr: Option<SocketAddr>) {
        self.remote = addr;
    }

    pub fn local(&self) -> Option<SocketAddr> {
        self.local
    }

    pub fn remote_host(&self) -> Option<&str> {
        self.remote_host.as_deref()
    }

    pub fn set_remote_host(&mut self, host: Option<String>) {
        self.remote_host = host;
    }

    pub fn ident(&self) -> Option<&str> {
        self.ident.as_deref()
    }

    pub fn set_ident(&mut self, ident: Option<String>) {
        self.ident = ident;
    }

    // ── Timestamps ──

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn last_recv(&self) -> Instant {
        self.last_recv
    }

    pub fn last_send(&self) -> Instant {
        self.last_send
    }

    pub(crate) fn touch_recv(&mut self, now: Instant) {
        self.last_recv = now;
    }

    pub(crate) fn touch_send(&mut self, now: Instant) {
        self.last_send = now;
    }

    /// Backing off after a transient failure
    pub(crate) fn is_unavailable(&self, now: Instant) -> bool {
        self.unavailable_until.map_or(false, |until| now < until)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("family", &self.family())
            .field("state", &self.state())
            .field("recv", &self.recv.len())
            .field("send", &self.send.len())
            .field("remote", &self.remote)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::sys;
    use std::fs::File;

    /// Pipe-backed connection plus the far ends: write into `File.0`,
    /// read what the connection sent from `File.1`.
    pub(crate) fn pipe_conn() -> (Connection, File, File) {
        let (in_r, in_w) = sys::pipe().unwrap();
        let (out_r, out_w) = sys::pipe().unwrap();
        let conn = Connection::new(Transport::pipe(in_r, out_w).unwrap());
        sys::set_nonblocking(std::os::fd::AsRawFd::as_raw_fd(&out_r)).unwrap();
        (conn, File::from(in_w), File::from(out_r))
    }

    #[test]
    fn test_write_overflow_kicks_crawling() {
        let (conn, _to, _from) = pipe_conn();
        let mut conn = conn.with_buffers(16, 4);
        conn.write(b"abcd").unwrap();
        assert!(matches!(conn.write(b"e"), Err(Error::BufferOverflow { .. })));
        assert!(conn.is_killed());
        assert_eq!(conn.kick_reason(), Some(KickReason::Crawling));
        assert_eq!(conn.state(), ConnState::ShuttingDown);
        assert!(matches!(conn.write(b"x"), Err(Error::Closed)));
    }

    #[test]
    fn test_first_kick_reason_wins() {
        let (mut conn, _to, _from) = pipe_conn();
        conn.kick(KickReason::Flooding);
        conn.kick(KickReason::Crawling);
        assert_eq!(conn.take_kick(), Some(KickReason::Flooding));
        assert_eq!(conn.take_kick(), None);
    }

    #[test]
    fn test_idle_countdown() {
        let (mut conn, _to, _from) = pipe_conn();
        conn.set_idle(Some(3));
        assert!(!conn.idle_tick());
        assert!(!conn.idle_tick());
        assert!(conn.idle_tick());
        assert_eq!(conn.idle_counter(), None);
        assert!(!conn.idle_tick());
        conn.set_idle(Some(0));
        assert!(conn.idle_tick());
    }

    #[test]
    fn test_send_to_requires_packet_family() {
        let (mut conn, _to, _from) = pipe_conn();
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        assert!(matches!(conn.send_to(addr, b"x"), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_fill_and_flush() {
        use std::io::{Read, Write};
        let (mut conn, mut to, mut from) = pipe_conn();
        to.write_all(b"hello").unwrap();
        assert_eq!(conn.fill_recv().unwrap(), 5);
        assert_eq!(conn.recv_buffer().as_slice(), b"hello");

        conn.write(b"world").unwrap();
        assert_eq!(conn.flush_send().unwrap(), 5);
        assert!(conn.send_buffer().is_empty());
        let mut buf = [0u8; 8];
        assert_eq!(from.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"world");
    }
}

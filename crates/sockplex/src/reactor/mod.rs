//! # Reactor - the poll(2) multiplexing loop
//!
//! One thread owns every connection. Each cycle:
//! 1. Builds a poll set from the registry (pipes contribute two entries)
//! 2. Waits until something is ready or the next tick is due
//! 3. Dispatches readiness in registry order: read, then write
//! 4. Runs the periodic tick when due (idle, flood decay, notify)
//! 5. Sweeps connections killed during the cycle
//!
//! A connection killed anywhere in the cycle is never dispatched again;
//! its `kicked`/`disconnected` callbacks run once, in the sweep, right
//! before it leaves the registry.


use std::net::{SocketAddr, TcpStream};
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sockplex_core::{
    is_transient_io, ConnId, CoserverKey, CoserverKind, Error, KickReason, RequestId, Result,
    ServerKey,
};
use tracing::{debug, info, trace, warn};

use crate::config::ReactorConfig;
use crate::connection::{ConnState, Connection, DetectionBudget};
use crate::coserver::{Coservers, ProcessLauncher, ThreadLauncher, WorkerLauncher};
use crate::handler::{Context, Handler};
use crate::port::{self, defaults as port_defaults, PortConfig, PortState};
use crate::registry::Registry;
use crate::server::{Detection, Packet, Server, ServerType, Servers};
use crate::sys;
use crate::transport::{ProtoFamily, Transport};

/// Largest datagram read in one go
const DATAGRAM_MAX: usize = 65536;

/// Which readiness a poll entry reports for its connection.
#[derive(Clone, Copy, Debug)]
enum Direction {
    Both,
    Recv,
    Send,
}

#[derive(Clone, Copy, Debug, Default)]
struct Readiness {
    read: bool,
    write: bool,
    error: bool,
}

impl Readiness {
    fn from_revents(revents: libc::c_short, direction: Direction) -> Self {
        let has = |bits: libc::c_short| revents & bits != 0;
        let error = has(libc::POLLERR | libc::POLLNVAL);
        match direction {
            Direction::Both => Readiness {
                read: has(libc::POLLIN | libc::POLLHUP),
                write: has(libc::POLLOUT),
                error,
            },
            Direction::Recv => Readiness {
                read: has(libc::POLLIN | libc::POLLHUP),
                write: false,
                error,
            },
            // Reader gone on the far side of a pipe
            Direction::Send => Readiness {
                read: false,
                write: has(libc::POLLOUT),
                error: error || has(libc::POLLHUP),
            },
        }
    }

    fn merge(&mut self, other: Readiness) {
        self.read |= other.read;
        self.write |= other.write;
        self.error |= other.error;
    }
}

pub struct Reactor {
    config: ReactorConfig,
    pub(crate) registry: Registry,
    pub(crate) coservers: Coservers,
    servers: Servers,
    stop: Arc<AtomicBool>,
    next_tick: Instant,
    ticks: u64,
    scratch: Vec<u8>,
    poll_fds: Vec<libc::pollfd>,
    poll_owners: Vec<(ConnId, Direction)>,
}

impl Reactor {
    /// Reactor whose coservers run on threads, or as
    /// `config.coserver_program` when one is configured.
    pub fn new(config: ReactorConfig) -> Result<Self> {
        let launcher: Box<dyn WorkerLauncher> = match &config.coserver_program {
            Some(program) => Box::new(ProcessLauncher::new(program.clone())),
            None => Box::new(ThreadLauncher::new()),
        };
        Self::with_launcher(config, launcher)
    }

    pub fn with_launcher(config: ReactorConfig, launcher: Box<dyn WorkerLauncher>) -> Result<Self> {
        config.validate()?;
        if let Err(e) = sys::ignore_sigpipe() {
            warn!(error = %e, "cannot ignore SIGPIPE");
        }
        Ok(Reactor {
            registry: Registry::new(config.max_connections),
            coservers: Coservers::new(launcher, config.coserver_buffer_size),
            servers: Servers::new(),
            stop: Arc::new(AtomicBool::new(false)),
            next_tick: Instant::now() + config.tick_interval,
            ticks: 0,
            scratch: vec![0; DATAGRAM_MAX],
            poll_fds: Vec::new(),
            poll_owners: Vec::new(),
            config,
        })
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn servers(&self) -> &Servers {
        &self.servers
    }

    pub fn servers_mut(&mut self) -> &mut Servers {
        &mut self.servers
    }

    pub fn coservers(&self) -> &Coservers {
        &self.coservers
    }

    pub fn find(&self, id: ConnId) -> Option<&Connection> {
        self.registry.find(id)
    }

    pub fn find_mut(&mut self, id: ConnId) -> Option<&mut Connection> {
        self.registry.find_mut(id)
    }

    /// Ticks run so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    // ── Setup ──

    pub fn add_type(&mut self, ty: Box<dyn ServerType>) -> Result<()> {
        self.servers.add_type(ty)
    }

    pub fn add_server(&mut self, server: Box<dyn Server>) -> Result<ServerKey> {
        self.servers.add(server)
    }

    /// Open `port` and offer what arrives there to `servers`, in order.
    pub fn bind(&mut self, port: &PortConfig, servers: &[ServerKey]) -> Result<ConnId> {
        if let Some(key) = servers.iter().find(|k| self.servers.get(**k).is_none()) {
            return Err(Error::Config(format!("unknown server {}", key)));
        }
        let transport = port::open(port)?;
        let (recv, send) = self.buffer_sizes(port);
        let mut conn = Connection::new(transport).with_buffers(recv, send);
        match port.family {
            ProtoFamily::Stream => conn.set_listening(true),
            ProtoFamily::Pipe => conn.begin_detection(DetectionBudget {
                candidates: servers.to_vec(),
                fill: port.detection_fill,
                deadline: None,
            }),
            // A flood from one peer must not take the whole port down
            _ => {
                conn.set_listening(true);
                conn.set_flood_exempt(true);
            }
        }
        conn.port = Some(Box::new(PortState::new(port.clone(), servers.to_vec())));

        let id = self.registry.enqueue(conn)?;
        info!(conn = %id, %port, servers = servers.len(), "port bound");
        Ok(id)
    }

    /// Register a connection directly. It keeps whatever handler and
    /// state it carries.
    pub fn enqueue(&mut self, conn: Connection) -> Result<ConnId> {
        self.registry.enqueue(conn)
    }

    /// Register a connection that still has to be recognized by one of
    /// `servers`, with the default detection budget.
    pub fn attach(&mut self, conn: Connection, servers: &[ServerKey]) -> Result<ConnId> {
        self.attach_with(
            conn,
            servers,
            port_defaults::DETECTION_FILL,
            Duration::from_secs(port_defaults::DETECTION_WAIT_SECS),
        )
    }

    /// Like [`attach`](Self::attach): give up after `fill` unrecognized
    /// bytes or `wait`.
    pub fn attach_with(
        &mut self,
        mut conn: Connection,
        servers: &[ServerKey],
        fill: usize,
        wait: Duration,
    ) -> Result<ConnId> {
        conn.begin_detection(DetectionBudget {
            candidates: servers.to_vec(),
            fill,
            deadline: Some(Instant::now() + wait),
        });
        self.registry.enqueue(conn)
    }

    /// Start a non-blocking connect to `addr`. `Handler::connected` runs
    /// once the connect completes; failure destroys the connection.
    pub fn connect(&mut self, addr: SocketAddr, handler: Box<dyn Handler>) -> Result<ConnId> {
        let fd = sys::socket(&addr, libc::SOCK_STREAM, 0)?;
        sys::connect(&fd, &addr)?;
        let transport = Transport::stream(TcpStream::from(fd))?;
        let mut conn = Connection::new(transport)
            .with_buffers(self.config.recv_buffer_size, self.config.send_buffer_size)
            .with_handler(handler);
        conn.set_remote(Some(addr));
        conn.connecting = true;

        let id = self.registry.enqueue(conn)?;
        debug!(conn = %id, %addr, "connecting");
        Ok(id)
    }

    pub fn spawn_coserver(&mut self, kind: CoserverKind) -> Result<CoserverKey> {
        self.coservers.spawn(&mut self.registry, kind)
    }

    /// Coserver request from outside any callback.
    pub fn coserver<F>(&mut self, kind: CoserverKind, payload: &str, on_result: F) -> Option<RequestId>
    where
        F: FnOnce(&mut Registry, Option<&str>) + 'static,
    {
        self.coservers
            .send(&mut self.registry, kind, payload, Box::new(on_result))
    }

    // ── Loop ──

    /// Flag that makes [`run`](Self::run) return after the current cycle.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn run(&mut self) -> Result<()> {
        self.config.log();
        info!(connections = self.registry.len(), "reactor running");
        while !self.stop.load(Ordering::Acquire) {
            self.run_once()?;
        }
        info!(ticks = self.ticks, "reactor stopped");
        Ok(())
    }

    /// One cycle, waiting at most until the next tick.
    pub fn run_once(&mut self) -> Result<()> {
        self.poll_once(self.config.tick_interval)
    }

    /// One cycle, waiting at most `max_wait` for readiness.
    pub fn poll_once(&mut self, max_wait: Duration) -> Result<()> {
        let now = Instant::now();
        self.build_poll_set(now);
        let timeout = max_wait.min(self.next_tick.saturating_duration_since(now));

        let ready = sys::poll(&mut self.poll_fds, timeout)?;
        if ready > 0 {
            self.dispatch();
        }

        let now = Instant::now();
        if now >= self.next_tick {
            self.tick_at(now);
            self.next_tick = now + self.config.tick_interval;
        }
        self.sweep();
        Ok(())
    }

    /// Run the periodic tick now.
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Schedule every connection for shutdown.
    pub fn shutdown_all(&mut self) {
        self.registry.foreach(|conn| conn.shutdown());
    }

    /// Destroy everything: connections (running their `disconnected`
    /// callbacks), coservers, servers and server types. Returns the
    /// number of coserver requests that never got an answer.
    pub fn finalize(mut self) -> usize {
        self.shutdown_all();
        let abandoned = self.coservers.finalize(&mut self.registry);
        self.sweep();
        self.coservers.join_retired(&mut self.registry);
        self.servers.finalize_all();
        info!(abandoned, ticks = self.ticks, "reactor finalized");
        abandoned
    }

    // ── Cycle internals ──

    fn buffer_sizes(&self, port: &PortConfig) -> (usize, usize) {
        (
            port.recv_buffer_size.unwrap_or(self.config.recv_buffer_size),
            port.send_buffer_size.unwrap_or(self.config.send_buffer_size),
        )
    }

    fn build_poll_set(&mut self, now: Instant) {
        let Reactor {
            registry,
            poll_fds,
            poll_owners,
            ..
        } = self;
        poll_fds.clear();
        poll_owners.clear();
        let mut push = |fd: RawFd, events: libc::c_short, id: ConnId, direction: Direction| {
            poll_fds.push(libc::pollfd {
                fd,
                events,
                revents: 0,
            });
            poll_owners.push((id, direction));
        };

        for conn in registry.iter() {
            if conn.is_killed() {
                continue;
            }
            let Some(recv_fd) = conn.transport.recv_fd() else {
                continue;
            };
            let unavailable = conn.is_unavailable(now);
            let want_read = !conn.connecting && !(conn.is_listening() && unavailable);
            let want_write = !unavailable
                && (conn.has_output() || conn.connecting || conn.is_final_write());

            let read_bits = if want_read { libc::POLLIN } else { 0 };
            let write_bits = if want_write { libc::POLLOUT } else { 0 };

            match conn.transport.send_fd() {
                Some(send_fd) if send_fd != recv_fd => {
                    push(recv_fd, read_bits, conn.id(), Direction::Recv);
                    push(send_fd, write_bits, conn.id(), Direction::Send);
                }
                _ => push(recv_fd, read_bits | write_bits, conn.id(), Direction::Both),
            }
        }
    }

    fn dispatch(&mut self) {
        // Entries of one connection are adjacent; merge them so each
        // connection is serviced once, in registry order.
        let mut ready: Vec<(ConnId, Readiness)> = Vec::new();
        for (pfd, (id, direction)) in self.poll_fds.iter().zip(&self.poll_owners) {
            if pfd.revents == 0 {
                continue;
            }
            let readiness = Readiness::from_revents(pfd.revents, *direction);
            match ready.last_mut() {
                Some((last, acc)) if last == id => acc.merge(readiness),
                _ => ready.push((*id, readiness)),
            }
        }

        for (id, readiness) in ready {
            self.service(id, readiness);
        }
    }

    fn service(&mut self, id: ConnId, readiness: Readiness) {
        let Some(mut conn) = self.registry.checkout(id) else {
            return;
        };
        let now = Instant::now();

        if !conn.is_killed() {
            if readiness.error {
                debug!(conn = %id, "exceptional condition on descriptor");
                conn.shutdown();
            } else {
                if readiness.read {
                    self.readable(&mut conn, now);
                }
                if readiness.write && !conn.is_killed() {
                    self.writable(&mut conn, now);
                }
            }
        }
        self.registry.checkin(conn);
    }

    fn readable(&mut self, conn: &mut Connection, now: Instant) {
        if conn.transport.is_listener() {
            self.accept_ready(conn, now);
        } else if conn.family().is_packet() {
            self.read_packet(conn, now);
        } else {
            self.read_stream(conn, now);
        }
    }

    fn accept_ready(&mut self, listener: &mut Connection, now: Instant) {
        let listener_id = listener.id();
        let relax = self.config.relax_interval;
        let Some(port) = listener.port.as_mut() else {
            warn!(conn = %listener_id, "listener without port state");
            return;
        };

        for _ in 0..self.config.accept_batch {
            let (stream, peer) = match listener.transport.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if is_transient_io(&e) => {
                    warn!(conn = %listener_id, error = %e, "accept failed, relaxing");
                    listener.unavailable_until = Some(now + relax);
                    break;
                }
                Err(e) => {
                    warn!(conn = %listener_id, error = %e, "accept failed");
                    break;
                }
            };

            if let Err(e) = port.screen(peer.ip(), now) {
                info!(%peer, port = %port.config, error = %e, "connection refused");
                continue;
            }

            let transport = match Transport::stream(stream) {
                Ok(t) => t,
                Err(e) => {
                    warn!(%peer, error = %e, "cannot configure accepted socket");
                    continue;
                }
            };
            let recv = port.config.recv_buffer_size.unwrap_or(self.config.recv_buffer_size);
            let send = port.config.send_buffer_size.unwrap_or(self.config.send_buffer_size);
            let mut conn = Connection::new(transport).with_buffers(recv, send);
            conn.set_parent(Some(listener_id));
            conn.begin_detection(DetectionBudget {
                candidates: port.servers.clone(),
                fill: port.config.detection_fill,
                deadline: Some(now + port.config.detection_wait),
            });

            match self.registry.enqueue(conn) {
                Ok(id) => debug!(conn = %id, %peer, listener = %listener_id, "accepted"),
                Err(e) => warn!(%peer, error = %e, "cannot register accepted connection"),
            }
        }
    }

    fn read_stream(&mut self, conn: &mut Connection, now: Instant) {
        if conn.recv.is_full() {
            warn!(conn = %conn.id(), limit = conn.recv.limit(), "receive buffer full");
            conn.kick(KickReason::Flooding);
            return;
        }

        match conn.fill_recv() {
            Ok(0) => {
                debug!(conn = %conn.id(), "end of stream");
                conn.shutdown();
                return;
            }
            Ok(n) => {
                trace!(conn = %conn.id(), n, "received");
                conn.touch_recv(now);
                if conn.flood.charge(&self.config.flood, n) {
                    warn!(conn = %conn.id(), points = conn.flood.points(), "flood protection");
                    conn.kick(KickReason::Flooding);
                    return;
                }
            }
            Err(e) if is_transient_io(&e) => return,
            Err(e) => {
                debug!(conn = %conn.id(), error = %e, "read failed");
                conn.shutdown();
                return;
            }
        }

        match conn.state() {
            ConnState::Detecting => self.detect(conn, now),
            ConnState::Established => self.check_request(conn, now),
            ConnState::ShuttingDown => {}
        }
    }

    fn detect(&mut self, conn: &mut Connection, now: Instant) {
        let Some(budget) = conn.detection.clone() else {
            return;
        };

        for key in &budget.candidates {
            let Some(server) = self.servers.get_mut(*key) else {
                continue;
            };
            let Detection::Recognized { consumed } = server.detect(conn) else {
                continue;
            };

            conn.recv.consume(consumed);
            conn.establish(Some(*key));
            debug!(conn = %conn.id(), server = server.name(), "protocol detected");

            let result = {
                let mut cx = Context::new(conn, &mut self.registry, &mut self.coservers, now);
                server.connect(&mut cx)
            };
            if let Err(e) = result {
                debug!(conn = %conn.id(), error = %e, "server refused connection");
                conn.shutdown();
                return;
            }
            if !conn.recv.is_empty() {
                self.check_request(conn, now);
            }
            return;
        }

        if conn.recv.len() >= budget.fill {
            info!(conn = %conn.id(), bytes = conn.recv.len(), "no protocol detected");
            conn.shutdown();
        }
    }

    fn check_request(&mut self, conn: &mut Connection, now: Instant) {
        loop {
            let before = conn.recv.len();
            if let Err(e) = self.invoke(conn, now, |h, cx| h.check_request(cx)) {
                debug!(conn = %conn.id(), error = %e, "request handling failed");
                conn.shutdown();
                return;
            }
            // A new handler picks up whatever its predecessor left behind
            let handed_over = conn.handler_replaced() && !conn.is_killed();
            if !handed_over || conn.recv.is_empty() || conn.recv.len() == before {
                return;
            }
            trace!(conn = %conn.id(), left = conn.recv.len(), "handler replaced mid-buffer");
        }
    }

    /// Run one handler callback with the handler lifted off `conn`.
    fn invoke<F>(&mut self, conn: &mut Connection, now: Instant, f: F) -> Result<()>
    where
        F: FnOnce(&mut dyn Handler, &mut Context<'_>) -> Result<()>,
    {
        let Some(mut handler) = conn.take_handler() else {
            return Ok(());
        };
        let result = {
            let mut cx = Context::new(conn, &mut self.registry, &mut self.coservers, now);
            f(handler.as_mut(), &mut cx)
        };
        conn.restore_handler(handler);
        result
    }

    fn read_packet(&mut self, conn: &mut Connection, now: Instant) {
        let (n, from) = match conn.transport.recv_from(&mut self.scratch) {
            Ok(pair) => pair,
            Err(e) if is_transient_io(&e) => return,
            Err(e) => {
                debug!(conn = %conn.id(), error = %e, "receive failed");
                return;
            }
        };
        conn.touch_recv(now);
        if conn.flood.charge(&self.config.flood, n) {
            warn!(conn = %conn.id(), %from, "flood protection");
            conn.kick(KickReason::Flooding);
            return;
        }

        // Client-side packet connections talk to their own handler
        let Some(candidates) = conn.port.as_ref().map(|p| p.servers.clone()) else {
            conn.set_remote(Some(from));
            let packet = self.scratch[..n].to_vec();
            if let Err(e) = self.invoke(conn, now, |h, cx| h.handle_request(cx, &packet)) {
                debug!(conn = %conn.id(), error = %e, "packet handling failed");
                conn.shutdown();
            }
            return;
        };

        let packet = &self.scratch[..n];
        for key in candidates {
            let Some(server) = self.servers.get_mut(key) else {
                continue;
            };
            let mut cx = Context::new(conn, &mut self.registry, &mut self.coservers, now);
            if server.handle_packet(&mut cx, from, packet) == Packet::Handled {
                return;
            }
        }
        debug!(conn = %conn.id(), %from, len = n, "packet not handled");
    }

    fn writable(&mut self, conn: &mut Connection, now: Instant) {
        if conn.connecting {
            self.finish_connect(conn, now);
        } else if conn.family().is_packet() {
            self.write_packet(conn, now);
        } else {
            self.write_stream(conn, now);
        }
    }

    fn write_stream(&mut self, conn: &mut Connection, now: Instant) {
        if conn.send.is_empty() {
            if conn.is_final_write() {
                conn.shutdown();
            }
            return;
        }
        match conn.flush_send() {
            Ok(n) => {
                trace!(conn = %conn.id(), n, "sent");
                conn.touch_send(now);
                if conn.send.is_empty() && conn.is_final_write() {
                    debug!(conn = %conn.id(), "final write flushed");
                    conn.shutdown();
                }
            }
            Err(e) if is_transient_io(&e) => {
                conn.unavailable_until = Some(now + self.config.relax_interval);
            }
            Err(e) => {
                debug!(conn = %conn.id(), error = %e, "write failed");
                conn.shutdown();
            }
        }
    }

    fn write_packet(&mut self, conn: &mut Connection, now: Instant) {
        let Some((to, data)) = conn.next_datagram() else {
            return;
        };
        match conn.transport.send_to(&data, to) {
            Ok(_) => conn.touch_send(now),
            Err(e) if is_transient_io(&e) => {
                conn.requeue_datagram((to, data));
                conn.unavailable_until = Some(now + self.config.relax_interval);
            }
            Err(e) => debug!(conn = %conn.id(), %to, error = %e, "datagram dropped"),
        }
    }

    fn finish_connect(&mut self, conn: &mut Connection, now: Instant) {
        let failure = match conn.transport.take_error() {
            Ok(None) => None,
            Ok(Some(e)) | Err(e) => Some(e),
        };
        if let Some(e) = failure {
            info!(conn = %conn.id(), remote = ?conn.remote(), error = %e, "connect failed");
            conn.shutdown();
            return;
        }

        conn.connecting = false;
        conn.set_remote(conn.transport.peer_addr().or(conn.remote()));
        debug!(conn = %conn.id(), remote = ?conn.remote(), "connected");
        if let Err(e) = self.invoke(conn, now, |h, cx| h.connected(cx)) {
            debug!(conn = %conn.id(), error = %e, "connected callback failed");
            conn.shutdown();
        }
    }

    fn tick_at(&mut self, now: Instant) {
        self.ticks += 1;
        let flood = self.config.flood;

        for id in self.registry.ids() {
            let Some(mut conn) = self.registry.checkout(id) else {
                continue;
            };
            if !conn.is_killed() {
                conn.flood.decay(&flood);
                if conn.unavailable_until.map_or(false, |until| until <= now) {
                    conn.unavailable_until = None;
                }
                if let Some(port) = conn.port.as_mut() {
                    port.limiter.prune(now);
                }

                let expired = conn.state() == ConnState::Detecting
                    && conn
                        .detection
                        .as_ref()
                        .and_then(|d| d.deadline)
                        .map_or(false, |deadline| now >= deadline);
                if expired {
                    info!(conn = %id, bytes = conn.recv.len(), "protocol detection timed out");
                    conn.shutdown();
                } else if conn.idle_tick() {
                    if let Err(e) = self.invoke(&mut conn, now, |h, cx| h.idle(cx)) {
                        debug!(conn = %id, error = %e, "idle callback failed");
                        conn.shutdown();
                    }
                }
            }
            self.registry.checkin(conn);
        }

        self.servers.notify_all(&mut self.registry);
        self.coservers.check_liveness(&mut self.registry);
    }

    fn sweep(&mut self) {
        let doomed: Vec<ConnId> = self
            .registry
            .iter()
            .filter(|c| c.is_killed())
            .map(|c| c.id())
            .collect();
        if doomed.is_empty() {
            return;
        }
        let now = Instant::now();

        for id in doomed {
            let Some(mut conn) = self.registry.checkout(id) else {
                continue;
            };
            if let Some(reason) = conn.take_kick() {
                info!(conn = %id, %reason, remote = ?conn.remote(), "connection kicked");
                conn.set_farewell(true);
                let _ = self.invoke(&mut conn, now, |h, cx| {
                    h.kicked(cx, reason);
                    Ok(())
                });
                conn.set_farewell(false);
                if !conn.send.is_empty() && !conn.family().is_packet() {
                    if let Err(e) = conn.flush_send() {
                        trace!(conn = %id, error = %e, "farewell not sent");
                    }
                }
            }
            let _ = self.invoke(&mut conn, now, |h, cx| {
                h.disconnected(cx);
                Ok(())
            });
            self.registry.checkin(conn);

            if let Some(conn) = self.registry.dequeue(id) {
                debug!(conn = %id, family = %conn.family(), "connection destroyed");
            }
        }

        #[cfg(debug_assertions)]
        if let Err(e) = self.registry.validate() {
            tracing::error!(error = %e, "registry corrupted");
        }
    }
}

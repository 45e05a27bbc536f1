//! Administrative snapshots
//!
//! Read-only views of the connection table and the coserver workers, plus
//! the few control operations an admin console needs.

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use sockplex_core::{ConnId, CoserverKey, CoserverKind, Result};
use tracing::info;

use crate::connection::{ConnState, Connection};
use crate::coserver::CoserverStats;
use crate::reactor::Reactor;
use crate::transport::ProtoFamily;

/// Point-in-time view of one connection.
#[derive(Debug, Clone)]
pub struct ConnStats {
    pub id: ConnId,
    pub family: ProtoFamily,
    pub state: ConnState,
    pub listening: bool,
    pub killed: bool,
    pub flood_exempt: bool,
    pub coserver: bool,
    pub final_write: bool,
    pub recv_fill: usize,
    pub recv_cap: usize,
    pub send_fill: usize,
    pub send_cap: usize,
    pub idle: Option<u32>,
    pub flood_points: u32,
    pub remote: Option<SocketAddr>,
    pub local: Option<SocketAddr>,
    pub remote_host: Option<String>,
    pub since_recv: Duration,
    pub since_send: Duration,
    pub age: Duration,
}

impl ConnStats {
    fn flags(&self) -> String {
        let mut flags = String::with_capacity(5);
        for (set, c) in [
            (self.listening, 'L'),
            (self.killed, 'K'),
            (self.flood_exempt, 'X'),
            (self.coserver, 'C'),
            (self.final_write, 'F'),
        ] {
            flags.push(if set { c } else { '-' });
        }
        flags
    }
}

impl fmt::Display for ConnStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>8} {:<4} {} {:<11} recv {}/{} send {}/{} flood {}",
            self.id.to_string(),
            self.family,
            self.flags(),
            format!("{:?}", self.state),
            self.recv_fill,
            self.recv_cap,
            self.send_fill,
            self.send_cap,
            self.flood_points,
        )?;
        if let Some(idle) = self.idle {
            write!(f, " idle {}", idle)?;
        }
        match (&self.remote_host, self.remote) {
            (Some(host), Some(addr)) => write!(f, " peer {} ({})", host, addr)?,
            (None, Some(addr)) => write!(f, " peer {}", addr)?,
            _ => {}
        }
        write!(f, " age {}s", self.age.as_secs())
    }
}

impl Connection {
    pub fn stats(&self, now: Instant) -> ConnStats {
        ConnStats {
            id: self.id(),
            family: self.family(),
            state: self.state(),
            listening: self.is_listening(),
            killed: self.is_killed(),
            flood_exempt: self.is_flood_exempt(),
            coserver: self.is_coserver(),
            final_write: self.is_final_write(),
            recv_fill: self.recv_buffer().len(),
            recv_cap: self.recv_buffer().limit(),
            send_fill: self.send_buffer().len(),
            send_cap: self.send_buffer().limit(),
            idle: self.idle_counter(),
            flood_points: self.flood_points(),
            remote: self.remote(),
            local: self.local(),
            remote_host: self.remote_host().map(str::to_string),
            since_recv: now.saturating_duration_since(self.last_recv()),
            since_send: now.saturating_duration_since(self.last_send()),
            age: now.saturating_duration_since(self.created()),
        }
    }
}

impl Reactor {
    /// Every registered connection, in dispatch order.
    pub fn connection_stats(&self) -> Vec<ConnStats> {
        let now = Instant::now();
        self.registry.iter().map(|c| c.stats(now)).collect()
    }

    /// Schedule the connection at table index `index` for shutdown.
    pub fn kill(&mut self, index: u32) -> bool {
        match self.registry.find_index(index) {
            Some(conn) if !conn.is_killed() => {
                info!(conn = %conn.id(), "killed by admin");
                conn.shutdown();
                true
            }
            _ => false,
        }
    }

    pub fn coserver_stats(&self) -> Vec<CoserverStats> {
        self.coservers.stats()
    }

    /// Replace every worker of `kind` with a fresh one.
    pub fn restart_coserver(&mut self, kind: CoserverKind) -> Result<CoserverKey> {
        self.coservers.restart(&mut self.registry, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReactorConfig;
    use crate::connection::tests::pipe_conn;
    use crate::coserver::ThreadLauncher;

    fn reactor() -> Reactor {
        let config = ReactorConfig::new().tick_interval(Duration::from_secs(3600));
        Reactor::with_launcher(config, Box::new(ThreadLauncher::new())).unwrap()
    }

    #[test]
    fn test_connection_stats() {
        let mut r = reactor();
        let (conn, _to, _from) = pipe_conn();
        let mut conn = conn.with_buffers(128, 256);
        conn.write(b"queued").unwrap();
        conn.set_idle(Some(5));
        let id = r.enqueue(conn).unwrap();

        let stats = r.connection_stats();
        assert_eq!(stats.len(), 1);
        let s = &stats[0];
        assert_eq!(s.id, id);
        assert_eq!(s.family, ProtoFamily::Pipe);
        assert_eq!(s.state, ConnState::Established);
        assert_eq!((s.recv_fill, s.recv_cap), (0, 128));
        assert_eq!((s.send_fill, s.send_cap), (6, 256));
        assert_eq!(s.idle, Some(5));

        let line = s.to_string();
        assert!(line.contains("pipe"));
        assert!(line.contains("send 6/256"));
        assert!(line.contains("idle 5"));
    }

    #[test]
    fn test_kill_by_index() {
        let mut r = reactor();
        let (a, _ta, _fa) = pipe_conn();
        let (b, _tb, _fb) = pipe_conn();
        r.enqueue(a).unwrap();
        let b = r.enqueue(b).unwrap();

        assert!(r.kill(b.index()));
        assert!(!r.kill(b.index()));
        assert!(!r.kill(999));
        assert!(r.connection_stats()[1].killed);
        assert!(r.connection_stats()[1].flags().contains('K'));

        r.poll_once(Duration::ZERO).unwrap();
        assert!(r.find(b).is_none());
        assert_eq!(r.connection_stats().len(), 1);
    }
}

//! Port configuration and listeners
//!
//! A [`PortConfig`] describes where a server listens: a TCP/UDP/ICMP/raw
//! address or a pair of named pipes, plus per-port policy (detection
//! budget, buffer sizes, access lists, connect frequency).

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::{IpAddr, SocketAddr, TcpListener, UdpSocket};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use sockplex_core::{Error, Result, ServerKey};

use crate::sys;
use crate::transport::{ProtoFamily, Transport};

pub mod defaults {
    /// Unrecognized bytes tolerated before detection gives up
    pub const DETECTION_FILL: usize = 16;
    pub const DETECTION_WAIT_SECS: u64 = 30;
    /// Accepted connects per source address per second
    pub const CONNECT_FREQ: u32 = 100;
    pub const BACKLOG: i32 = 128;
}

#[derive(Debug, Clone)]
pub struct PortConfig {
    pub family: ProtoFamily,
    /// Bind address for socket families
    pub addr: Option<SocketAddr>,
    /// `(receive, send)` named pipes for the pipe family
    pub pipes: Option<(PathBuf, PathBuf)>,
    /// IP protocol number for raw ports
    pub protocol: i32,
    pub detection_fill: usize,
    pub detection_wait: Duration,
    pub recv_buffer_size: Option<usize>,
    pub send_buffer_size: Option<usize>,
    /// 0 disables the limiter
    pub connect_freq: u32,
    /// When non-empty, only these addresses may connect
    pub allow: Vec<IpAddr>,
    pub deny: Vec<IpAddr>,
    pub backlog: i32,
}

impl PortConfig {
    fn with_family(family: ProtoFamily) -> Self {
        PortConfig {
            family,
            addr: None,
            pipes: None,
            protocol: 0,
            detection_fill: defaults::DETECTION_FILL,
            detection_wait: Duration::from_secs(defaults::DETECTION_WAIT_SECS),
            recv_buffer_size: None,
            send_buffer_size: None,
            connect_freq: defaults::CONNECT_FREQ,
            allow: Vec::new(),
            deny: Vec::new(),
            backlog: defaults::BACKLOG,
        }
    }

    pub fn tcp(addr: SocketAddr) -> Self {
        PortConfig {
            addr: Some(addr),
            ..Self::with_family(ProtoFamily::Stream)
        }
    }

    pub fn udp(addr: SocketAddr) -> Self {
        PortConfig {
            addr: Some(addr),
            ..Self::with_family(ProtoFamily::Datagram)
        }
    }

    /// ICMP messages on `ip` (needs raw socket privileges)
    pub fn icmp(ip: IpAddr) -> Self {
        PortConfig {
            addr: Some(SocketAddr::new(ip, 0)),
            protocol: libc::IPPROTO_ICMP,
            ..Self::with_family(ProtoFamily::Icmp)
        }
    }

    /// Raw IP packets of `protocol` on `ip` (needs raw socket privileges)
    pub fn raw(ip: IpAddr, protocol: i32) -> Self {
        PortConfig {
            addr: Some(SocketAddr::new(ip, 0)),
            protocol,
            ..Self::with_family(ProtoFamily::Raw)
        }
    }

    /// Named pipe pair; created with mkfifo when missing
    pub fn pipe(recv: impl Into<PathBuf>, send: impl Into<PathBuf>) -> Self {
        PortConfig {
            pipes: Some((recv.into(), send.into())),
            ..Self::with_family(ProtoFamily::Pipe)
        }
    }

    // Builder methods

    pub fn detection_fill(mut self, bytes: usize) -> Self {
        self.detection_fill = bytes;
        self
    }

    pub fn detection_wait(mut self, d: Duration) -> Self {
        self.detection_wait = d;
        self
    }

    pub fn buffers(mut self, recv: usize, send: usize) -> Self {
        self.recv_buffer_size = Some(recv);
        self.send_buffer_size = Some(send);
        self
    }

    pub fn connect_freq(mut self, per_second: u32) -> Self {
        self.connect_freq = per_second;
        self
    }

    pub fn allow(mut self, ip: IpAddr) -> Self {
        self.allow.push(ip);
        self
    }

    pub fn deny(mut self, ip: IpAddr) -> Self {
        self.deny.push(ip);
        self
    }

    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn validate(&self) -> Result<()> {
        match self.family {
            ProtoFamily::Pipe => {
                if self.pipes.is_none() {
                    return Err(Error::Config("pipe port needs a pipe pair".into()));
                }
            }
            ProtoFamily::Icmp | ProtoFamily::Raw => match self.addr {
                Some(SocketAddr::V4(_)) => {}
                _ => return Err(Error::Config(format!("{} port needs an IPv4 address", self.family))),
            },
            _ => {
                if self.addr.is_none() {
                    return Err(Error::Config(format!("{} port needs an address", self.family)));
                }
            }
        }
        if self.detection_fill == 0 {
            return Err(Error::Config("detection_fill must be > 0".into()));
        }
        if self.backlog <= 0 {
            return Err(Error::Config("backlog must be > 0".into()));
        }
        Ok(())
    }

    /// Access lists: deny wins; a non-empty allow list admits only its
    /// members.
    pub fn permits(&self, ip: IpAddr) -> bool {
        if self.deny.contains(&ip) {
            return false;
        }
        self.allow.is_empty() || self.allow.contains(&ip)
    }
}

impl fmt::Display for PortConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.addr, &self.pipes) {
            (_, Some((recv, send))) => {
                write!(f, "{}:{}|{}", self.family, recv.display(), send.display())
            }
            (Some(addr), None) => write!(f, "{}:{}", self.family, addr),
            (None, None) => write!(f, "{}:?", self.family),
        }
    }
}

/// Connects per source address within a sliding one-second window.
#[derive(Debug, Default)]
pub struct ConnectLimiter {
    per_second: u32,
    history: HashMap<IpAddr, VecDeque<Instant>>,
}

const WINDOW: Duration = Duration::from_secs(1);

impl ConnectLimiter {
    pub fn new(per_second: u32) -> Self {
        ConnectLimiter {
            per_second,
            history: HashMap::new(),
        }
    }

    /// Record a connect from `ip`. False when it exceeds the frequency.
    pub fn admit(&mut self, ip: IpAddr, now: Instant) -> bool {
        if self.per_second == 0 {
            return true;
        }
        let times = self.history.entry(ip).or_default();
        while times.front().map_or(false, |t| now.duration_since(*t) >= WINDOW) {
            times.pop_front();
        }
        if times.len() >= self.per_second as usize {
            return false;
        }
        times.push_back(now);
        true
    }

    /// Forget addresses with no connects inside the window.
    pub fn prune(&mut self, now: Instant) {
        self.history.retain(|_, times| {
            times.back().map_or(false, |t| now.duration_since(*t) < WINDOW)
        });
    }

    pub fn tracked(&self) -> usize {
        self.history.len()
    }
}

/// Per-listener state kept on the listening connection.
#[derive(Debug)]
pub(crate) struct PortState {
    pub(crate) config: PortConfig,
    pub(crate) servers: Vec<ServerKey>,
    pub(crate) limiter: ConnectLimiter,
}

impl PortState {
    pub(crate) fn new(config: PortConfig, servers: Vec<ServerKey>) -> Self {
        let limiter = ConnectLimiter::new(config.connect_freq);
        PortState {
            config,
            servers,
            limiter,
        }
    }

    /// Decide whether a connect from `ip` may proceed. Access lists are
    /// checked first; only admitted connects count against the frequency.
    pub(crate) fn screen(&mut self, ip: IpAddr, now: Instant) -> Result<()> {
        if !self.config.permits(ip) {
            return Err(Error::Denied(ip));
        }
        if !self.limiter.admit(ip, now) {
            return Err(Error::RateLimited(ip));
        }
        Ok(())
    }
}

/// Open the transport a port listens on.
pub(crate) fn open(config: &PortConfig) -> Result<Transport> {
    config.validate()?;
    match config.family {
        ProtoFamily::Stream => {
            let addr = config.addr.ok_or(Error::Unsupported("stream port without address"))?;
            let fd = sys::socket(&addr, libc::SOCK_STREAM, 0)?;
            sys::set_reuseaddr(&fd)?;
            sys::bind(&fd, &addr)?;
            sys::listen(&fd, config.backlog)?;
            Ok(Transport::listener(TcpListener::from(fd))?)
        }
        ProtoFamily::Datagram => {
            let addr = config.addr.ok_or(Error::Unsupported("datagram port without address"))?;
            Ok(Transport::packet(ProtoFamily::Datagram, UdpSocket::bind(addr)?)?)
        }
        ProtoFamily::Icmp | ProtoFamily::Raw => {
            let addr = config.addr.ok_or(Error::Unsupported("raw port without address"))?;
            let fd = sys::socket(&addr, libc::SOCK_RAW, config.protocol)?;
            sys::bind(&fd, &addr)?;
            Ok(Transport::packet(config.family, UdpSocket::from(fd))?)
        }
        ProtoFamily::Pipe => {
            let (recv, send) = config
                .pipes
                .as_ref()
                .ok_or(Error::Unsupported("pipe port without pipes"))?;
            sys::mkfifo(recv)?;
            sys::mkfifo(send)?;
            let recv = sys::open_fifo(recv)?;
            let send = sys::open_fifo(send)?;
            Ok(Transport::pipe(recv, send)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_access_lists() {
        let open = PortConfig::tcp("127.0.0.1:0".parse().unwrap());
        assert!(open.permits(ip("10.0.0.1")));

        let denied = open.clone().deny(ip("10.0.0.1"));
        assert!(!denied.permits(ip("10.0.0.1")));
        assert!(denied.permits(ip("10.0.0.2")));

        let allowed = open.clone().allow(ip("10.0.0.2")).deny(ip("10.0.0.2"));
        assert!(!allowed.permits(ip("10.0.0.2")));
        let allowed = open.allow(ip("10.0.0.3"));
        assert!(allowed.permits(ip("10.0.0.3")));
        assert!(!allowed.permits(ip("10.0.0.4")));
    }

    #[test]
    fn test_screen_reports_refusals() {
        let config = PortConfig::tcp("127.0.0.1:0".parse().unwrap())
            .deny(ip("10.0.0.9"))
            .connect_freq(1);
        let mut state = PortState::new(config, Vec::new());
        let now = Instant::now();

        assert!(matches!(state.screen(ip("10.0.0.9"), now), Err(Error::Denied(_))));
        state.screen(ip("10.0.0.1"), now).unwrap();
        assert!(matches!(
            state.screen(ip("10.0.0.1"), now),
            Err(Error::RateLimited(addr)) if addr == ip("10.0.0.1")
        ));
        // Denied peers never reach the limiter
        assert_eq!(state.limiter.tracked(), 1);
    }

    #[test]
    fn test_limiter_refuses_over_frequency() {
        let mut limiter = ConnectLimiter::new(3);
        let now = Instant::now();
        let a = ip("192.0.2.1");
        let b = ip("192.0.2.2");
        for _ in 0..3 {
            assert!(limiter.admit(a, now));
        }
        assert!(!limiter.admit(a, now));
        assert!(limiter.admit(b, now));
        assert!(limiter.admit(a, now + Duration::from_millis(1001)));
    }

    #[test]
    fn test_limiter_prune_and_disable() {
        let mut limiter = ConnectLimiter::new(1);
        let now = Instant::now();
        limiter.admit(ip("192.0.2.1"), now);
        assert_eq!(limiter.tracked(), 1);
        limiter.prune(now + Duration::from_secs(2));
        assert_eq!(limiter.tracked(), 0);

        let mut off = ConnectLimiter::new(0);
        for _ in 0..1000 {
            assert!(off.admit(ip("192.0.2.1"), now));
        }
    }

    #[test]
    fn test_validate() {
        assert!(PortConfig::tcp("127.0.0.1:0".parse().unwrap()).validate().is_ok());
        assert!(PortConfig::icmp(ip("::1")).validate().is_err());
        assert!(PortConfig::icmp(ip("127.0.0.1")).validate().is_ok());
        assert!(PortConfig::tcp("127.0.0.1:0".parse().unwrap())
            .detection_fill(0)
            .validate()
            .is_err());
        let mut no_pipes = PortConfig::pipe("/a", "/b");
        no_pipes.pipes = None;
        assert!(no_pipes.validate().is_err());
    }

    #[test]
    fn test_display() {
        let tcp = PortConfig::tcp("127.0.0.1:42".parse().unwrap());
        assert_eq!(tcp.to_string(), "tcp:127.0.0.1:42");
        let pipe = PortConfig::pipe("/tmp/in", "/tmp/out");
        assert_eq!(pipe.to_string(), "pipe:/tmp/in|/tmp/out");
    }

    #[test]
    fn test_open_tcp_and_udp() {
        let tcp = open(&PortConfig::tcp("127.0.0.1:0".parse().unwrap())).unwrap();
        assert!(tcp.is_listener());
        assert!(tcp.local_addr().unwrap().port() != 0);

        let udp = open(&PortConfig::udp("127.0.0.1:0".parse().unwrap())).unwrap();
        assert_eq!(udp.family(), ProtoFamily::Datagram);
        assert!(udp.is_valid());
    }

    #[test]
    fn test_open_named_pipes() {
        let dir = std::env::temp_dir().join(format!("sockplex-port-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let recv = dir.join("in");
        let send = dir.join("out");
        let t = open(&PortConfig::pipe(&recv, &send)).unwrap();
        assert!(t.is_pipe());
        assert!(t.is_valid());
        use std::os::unix::fs::FileTypeExt;
        assert!(std::fs::metadata(&recv).unwrap().file_type().is_fifo());
        drop(t);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}

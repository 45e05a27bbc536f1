//! Connection transports
//!
//! A [`Transport`] owns the descriptors of one connection. Dropping it
//! closes them.

use core::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use crate::sys;

/// Protocol family of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProtoFamily {
    Stream,
    Datagram,
    /// Message-oriented datagrams carried over ICMP
    Icmp,
    Raw,
    Pipe,
}

impl ProtoFamily {
    /// Families whose traffic arrives as discrete packets
    pub fn is_packet(self) -> bool {
        matches!(self, ProtoFamily::Datagram | ProtoFamily::Icmp | ProtoFamily::Raw)
    }
}

impl fmt::Display for ProtoFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProtoFamily::Stream => "tcp",
            ProtoFamily::Datagram => "udp",
            ProtoFamily::Icmp => "icmp",
            ProtoFamily::Raw => "raw",
            ProtoFamily::Pipe => "pipe",
        };
        f.pad(s)
    }
}

#[derive(Debug)]
pub(crate) enum Handle {
    Detached,
    Listener(TcpListener),
    Stream(TcpStream),
    /// UDP, ICMP and raw sockets; all are driven through recvfrom/sendto
    Packet(UdpSocket),
    Pipe { recv: File, send: File },
}

/// Owned descriptors plus the family tag.
#[derive(Debug)]
pub struct Transport {
    family: ProtoFamily,
    handle: Handle,
}

impl Transport {
    /// Placeholder for a connection whose descriptor does not exist yet.
    /// The registry refuses to enqueue it.
    pub fn detached(family: ProtoFamily) -> Self {
        Transport {
            family,
            handle: Handle::Detached,
        }
    }

    pub fn listener(listener: TcpListener) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        Ok(Transport {
            family: ProtoFamily::Stream,
            handle: Handle::Listener(listener),
        })
    }

    pub fn stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Transport {
            family: ProtoFamily::Stream,
            handle: Handle::Stream(stream),
        })
    }

    /// Packet socket of `family` (datagram, icmp or raw).
    pub fn packet(family: ProtoFamily, socket: UdpSocket) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        Ok(Transport {
            family,
            handle: Handle::Packet(socket),
        })
    }

    /// Pipe pair: bytes are read from `recv` and written to `send`.
    pub fn pipe(recv: impl Into<OwnedFd>, send: impl Into<OwnedFd>) -> io::Result<Self> {
        let recv: OwnedFd = recv.into();
        let send: OwnedFd = send.into();
        sys::set_nonblocking(recv.as_raw_fd())?;
        sys::set_nonblocking(send.as_raw_fd())?;
        Ok(Transport {
            family: ProtoFamily::Pipe,
            handle: Handle::Pipe {
                recv: File::from(recv),
                send: File::from(send),
            },
        })
    }

    #[inline]
    pub fn family(&self) -> ProtoFamily {
        self.family
    }

    #[inline]
    pub fn is_pipe(&self) -> bool {
        matches!(self.handle, Handle::Pipe { .. })
    }

    #[inline]
    pub fn is_listener(&self) -> bool {
        matches!(self.handle, Handle::Listener(_))
    }

    #[inline]
    pub fn is_detached(&self) -> bool {
        matches!(self.handle, Handle::Detached)
    }

    /// Every descriptor is open.
    pub fn is_valid(&self) -> bool {
        match (self.recv_fd(), self.send_fd()) {
            (Some(r), Some(s)) => sys::fd_is_open(r) && sys::fd_is_open(s),
            _ => false,
        }
    }

    /// Descriptor polled for input
    pub(crate) fn recv_fd(&self) -> Option<RawFd> {
        match &self.handle {
            Handle::Detached => None,
            Handle::Listener(l) => Some(l.as_raw_fd()),
            Handle::Stream(s) => Some(s.as_raw_fd()),
            Handle::Packet(s) => Some(s.as_raw_fd()),
            Handle::Pipe { recv, .. } => Some(recv.as_raw_fd()),
        }
    }

    /// Descriptor polled for output
    pub(crate) fn send_fd(&self) -> Option<RawFd> {
        match &self.handle {
            Handle::Pipe { send, .. } => Some(send.as_raw_fd()),
            _ => self.recv_fd(),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.handle {
            Handle::Listener(l) => l.local_addr().ok(),
            Handle::Stream(s) => s.local_addr().ok(),
            Handle::Packet(s) => s.local_addr().ok(),
            _ => None,
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match &self.handle {
            Handle::Stream(s) => s.peer_addr().ok(),
            _ => None,
        }
    }

    pub(crate) fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.handle {
            Handle::Stream(s) => s.read(buf),
            Handle::Pipe { recv, .. } => recv.read(buf),
            _ => Err(io::Error::from(io::ErrorKind::Unsupported)),
        }
    }

    pub(crate) fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.handle {
            Handle::Stream(s) => sys::send(s.as_raw_fd(), buf),
            Handle::Pipe { send, .. } => send.write(buf),
            _ => Err(io::Error::from(io::ErrorKind::Unsupported)),
        }
    }

    pub(crate) fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        match &self.handle {
            Handle::Listener(l) => l.accept(),
            _ => Err(io::Error::from(io::ErrorKind::Unsupported)),
        }
    }

    pub(crate) fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        match &self.handle {
            Handle::Packet(s) => s.recv_from(buf),
            _ => Err(io::Error::from(io::ErrorKind::Unsupported)),
        }
    }

    pub(crate) fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        match &self.handle {
            Handle::Packet(s) => s.send_to(buf, addr),
            _ => Err(io::Error::from(io::ErrorKind::Unsupported)),
        }
    }

    /// Pending socket error (SO_ERROR), used to finish outbound connects.
    pub(crate) fn take_error(&self) -> io::Result<Option<io::Error>> {
        match &self.handle {
            Handle::Stream(s) => s.take_error(),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_is_invalid() {
        let t = Transport::detached(ProtoFamily::Stream);
        assert!(t.is_detached());
        assert!(!t.is_valid());
        assert_eq!(t.recv_fd(), None);
    }

    #[test]
    fn test_pipe_transport() {
        let (r1, w1) = sys::pipe().unwrap();
        let (r2, w2) = sys::pipe().unwrap();
        let mut t = Transport::pipe(r1, w2).unwrap();
        assert!(t.is_pipe());
        assert!(t.is_valid());
        assert_ne!(t.recv_fd(), t.send_fd());
        assert_eq!(t.family(), ProtoFamily::Pipe);

        let mut buf = [0u8; 4];
        assert_eq!(
            t.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
        sys::write(w1.as_raw_fd(), b"hi").unwrap();
        assert_eq!(t.read(&mut buf).unwrap(), 2);
        assert_eq!(t.write(b"yo").unwrap(), 2);
        assert_eq!(sys::read(r2.as_raw_fd(), &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"yo");
    }

    #[test]
    fn test_family_display() {
        assert_eq!(ProtoFamily::Datagram.to_string(), "udp");
        assert!(ProtoFamily::Icmp.is_packet());
        assert!(!ProtoFamily::Pipe.is_packet());
    }
}

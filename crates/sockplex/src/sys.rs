//! Thin descriptor-level wrappers over libc and nix.
//!
//! Everything here returns `io::Result`; callers decide whether an error
//! is transient.

use std::fs::{File, OpenOptions};
use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{signal, SigHandler, Signal};
use nix::sys::socket::{SockaddrLike, SockaddrStorage};
use nix::sys::stat::Mode;

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
        const SOCK_FLAGS: libc::c_int = libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK;
    } else {
        const SEND_FLAGS: libc::c_int = 0;
        const SOCK_FLAGS: libc::c_int = 0;
    }
}

#[inline]
fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

#[inline]
fn cvt_size(ret: libc::ssize_t) -> io::Result<usize> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = cvt(unsafe { libc::fcntl(fd, libc::F_GETFL) })?;
    if flags & libc::O_NONBLOCK == 0 {
        cvt(unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) })?;
    }
    Ok(())
}

/// Descriptor liveness check.
pub(crate) fn fd_is_open(fd: RawFd) -> bool {
    fd >= 0 && unsafe { libc::fcntl(fd, libc::F_GETFD) } != -1
}

/// Close-on-exec pipe, both ends blocking: `(read, write)`.
pub(crate) fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(io::Error::from)
}

pub(crate) fn ignore_sigpipe() -> io::Result<()> {
    // SAFETY: SIG_IGN installs no handler code.
    unsafe { signal(Signal::SIGPIPE, SigHandler::SigIgn) }
        .map(drop)
        .map_err(io::Error::from)
}

#[cfg(test)]
pub(crate) fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    cvt_size(unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) })
}

#[cfg(test)]
pub(crate) fn write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    cvt_size(unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) })
}

/// Stream send that never raises SIGPIPE where the platform allows.
pub(crate) fn send(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    cvt_size(unsafe { libc::send(fd, buf.as_ptr().cast(), buf.len(), SEND_FLAGS) })
}

/// Non-blocking, close-on-exec socket for `addr`'s family.
pub(crate) fn socket(addr: &SocketAddr, ty: libc::c_int, protocol: libc::c_int) -> io::Result<OwnedFd> {
    let domain = if addr.is_ipv4() {
        libc::AF_INET
    } else {
        libc::AF_INET6
    };
    let fd = cvt(unsafe { libc::socket(domain, ty | SOCK_FLAGS, protocol) })?;
    // SAFETY: fd was just returned by socket(2) and is owned by nobody else.
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };
    if SOCK_FLAGS == 0 {
        set_nonblocking(fd.as_raw_fd())?;
        cvt(unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) })?;
    }
    Ok(fd)
}

pub(crate) fn set_reuseaddr(fd: &OwnedFd) -> io::Result<()> {
    let opt: libc::c_int = 1;
    cvt(unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &opt as *const _ as *const libc::c_void,
            std::mem::size_of_val(&opt) as libc::socklen_t,
        )
    })
    .map(drop)
}

pub(crate) fn bind(fd: &OwnedFd, addr: &SocketAddr) -> io::Result<()> {
    let sa = SockaddrStorage::from(*addr);
    cvt(unsafe { libc::bind(fd.as_raw_fd(), sa.as_ptr(), sa.len()) }).map(drop)
}

pub(crate) fn listen(fd: &OwnedFd, backlog: i32) -> io::Result<()> {
    cvt(unsafe { libc::listen(fd.as_raw_fd(), backlog) }).map(drop)
}

/// Start a connect. `Ok(true)` when it completed at once, `Ok(false)`
/// while in progress.
pub(crate) fn connect(fd: &OwnedFd, addr: &SocketAddr) -> io::Result<bool> {
    let sa = SockaddrStorage::from(*addr);
    match cvt(unsafe { libc::connect(fd.as_raw_fd(), sa.as_ptr(), sa.len()) }) {
        Ok(_) => Ok(true),
        Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => Ok(false),
        Err(e) => Err(e),
    }
}

/// poll(2) with the timeout rounded up to whole milliseconds.
/// An interrupted wait reports zero ready descriptors.
pub(crate) fn poll(fds: &mut [libc::pollfd], timeout: Duration) -> io::Result<usize> {
    let mut ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
    if ms == 0 && !timeout.is_zero() {
        ms = 1;
    }
    match cvt(unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, ms) }) {
        Ok(n) => Ok(n as usize),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(0),
        Err(e) => Err(e),
    }
}

/// Create a named pipe unless something already exists at `path`.
pub(crate) fn mkfifo(path: &Path) -> io::Result<()> {
    match nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o600)) {
        Ok(()) | Err(Errno::EEXIST) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Open a named pipe read-write and non-blocking, so the open neither
/// waits for a peer nor sees end-of-file when peers come and go.
pub(crate) fn open_fifo(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_roundtrip() {
        let (r, w) = pipe().unwrap();
        assert_eq!(write(w.as_raw_fd(), b"ping").unwrap(), 4);
        let mut buf = [0u8; 8];
        assert_eq!(read(r.as_raw_fd(), &mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"ping");
    }

    #[test]
    fn test_nonblocking_read_would_block() {
        let (r, _w) = pipe().unwrap();
        set_nonblocking(r.as_raw_fd()).unwrap();
        let mut buf = [0u8; 8];
        let err = read(r.as_raw_fd(), &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_fd_is_open() {
        let (r, w) = pipe().unwrap();
        let raw = r.as_raw_fd();
        assert!(fd_is_open(raw));
        drop(r);
        drop(w);
        assert!(!fd_is_open(-1));
    }

    #[test]
    fn test_poll_reports_readable() {
        let (r, w) = pipe().unwrap();
        write(w.as_raw_fd(), b"x").unwrap();
        let mut fds = [libc::pollfd {
            fd: r.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        }];
        assert_eq!(poll(&mut fds, Duration::from_millis(100)).unwrap(), 1);
        assert!(fds[0].revents & libc::POLLIN != 0);
    }
}

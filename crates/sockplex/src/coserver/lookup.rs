//! Blocking lookups run by coserver workers.

use std::ffi::CStr;
use std::io::{BufRead, BufReader, Write};
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use nix::sys::socket::{SockaddrLike, SockaddrStorage};
use sockplex_core::{wire, CoserverKind};
use tracing::debug;

/// Ident service port (RFC 1413)
const IDENT_PORT: u16 = 113;
const IDENT_TIMEOUT: Duration = Duration::from_secs(5);
const HOST_MAX: usize = 1025;

/// Run the lookup `kind` stands for.
pub fn lookup(kind: CoserverKind, payload: &str) -> Option<String> {
    match kind {
        CoserverKind::ReverseDns => reverse_dns(payload),
        CoserverKind::Dns => dns(payload),
        CoserverKind::Ident => ident(payload),
    }
}

/// Address to host name. Fails when the address has no name.
pub fn reverse_dns(payload: &str) -> Option<String> {
    let ip: IpAddr = payload.trim().parse().ok()?;
    let sa = SockaddrStorage::from(SocketAddr::new(ip, 0));
    let mut host = [0 as libc::c_char; HOST_MAX];
    let rc = unsafe {
        libc::getnameinfo(
            sa.as_ptr(),
            sa.len(),
            host.as_mut_ptr(),
            host.len() as libc::socklen_t,
            std::ptr::null_mut(),
            0,
            libc::NI_NAMEREQD,
        )
    };
    if rc != 0 {
        debug!(addr = %ip, rc, "reverse lookup failed");
        return None;
    }
    // SAFETY: getnameinfo NUL-terminates within the buffer on success.
    let name = unsafe { CStr::from_ptr(host.as_ptr()) };
    Some(name.to_string_lossy().into_owned())
}

/// Host name to its first IPv4 address.
pub fn dns(payload: &str) -> Option<String> {
    let host = payload.trim();
    if host.is_empty() {
        return None;
    }
    match (host, 0u16).to_socket_addrs() {
        Ok(addrs) => addrs
            .map(|a| a.ip())
            .find(IpAddr::is_ipv4)
            .map(|ip| ip.to_string()),
        Err(e) => {
            debug!(host, error = %e, "resolve failed");
            None
        }
    }
}

/// Ask the peer's ident service for the user owning a connection.
pub fn ident(payload: &str) -> Option<String> {
    let (addr, remote_port, local_port) = wire::parse_ident_request(payload).ok()?;
    let mut stream = TcpStream::connect_timeout(&SocketAddr::new(addr, IDENT_PORT), IDENT_TIMEOUT)
        .map_err(|e| debug!(%addr, error = %e, "ident connect failed"))
        .ok()?;
    stream.set_read_timeout(Some(IDENT_TIMEOUT)).ok()?;
    stream.set_write_timeout(Some(IDENT_TIMEOUT)).ok()?;
    write!(stream, "{} , {}\r\n", remote_port, local_port).ok()?;

    let mut reply = String::new();
    BufReader::new(stream).read_line(&mut reply).ok()?;
    parse_ident_reply(&reply)
}

/// `"<ports> : USERID : <os> : <user>"` to `user`.
fn parse_ident_reply(reply: &str) -> Option<String> {
    let mut fields = reply.trim_end().splitn(4, ':');
    let _ports = fields.next()?;
    if fields.next()?.trim() != "USERID" {
        return None;
    }
    let _os = fields.next()?;
    let user = fields.next()?.trim();
    if user.is_empty() {
        None
    } else {
        Some(user.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ident_reply() {
        assert_eq!(
            parse_ident_reply("6193, 23 : USERID : UNIX : stjohns\r\n"),
            Some("stjohns".to_string())
        );
        assert_eq!(parse_ident_reply("6195, 23 : ERROR : NO-USER\r\n"), None);
        assert_eq!(parse_ident_reply("6193, 23 : USERID : UNIX :   \r\n"), None);
        assert_eq!(parse_ident_reply(""), None);
    }

    #[test]
    fn test_dns_rejects_empty() {
        assert_eq!(dns("  "), None);
    }

    #[test]
    fn test_dns_literal_address() {
        assert_eq!(dns("127.0.0.1"), Some("127.0.0.1".to_string()));
    }

    #[test]
    fn test_reverse_dns_rejects_garbage() {
        assert_eq!(reverse_dns("not-an-address"), None);
    }

    #[test]
    fn test_ident_rejects_malformed_payload() {
        assert_eq!(ident("nonsense"), None);
    }
}

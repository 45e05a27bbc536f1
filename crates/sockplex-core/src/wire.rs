//! Coserver line protocol
//!
//! Requests and responses travel as ASCII lines `"<decimal-id>:<payload>\n"`.
//! An empty response payload means the lookup failed.

use core::fmt;
use core::str::FromStr;
use std::net::IpAddr;

use crate::error::{Error, Result};

/// Tag correlating a coserver response with its request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Blocking lookup a coserver performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CoserverKind {
    /// Address to host name
    ReverseDns,
    /// RFC 1413 user identification
    Ident,
    /// Host name to address
    Dns,
}

impl CoserverKind {
    pub const ALL: [CoserverKind; 3] = [
        CoserverKind::ReverseDns,
        CoserverKind::Ident,
        CoserverKind::Dns,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            CoserverKind::ReverseDns => "reverse-dns",
            CoserverKind::Ident => "ident",
            CoserverKind::Dns => "dns",
        }
    }
}

impl fmt::Display for CoserverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for CoserverKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        CoserverKind::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::protocol(format!("unknown coserver kind '{}'", s)))
    }
}

/// Encode one line. Payloads may not contain line breaks.
pub fn encode(id: RequestId, payload: &str) -> Result<String> {
    if payload.contains(['\n', '\r']) {
        return Err(Error::protocol("payload contains a line break"));
    }
    Ok(format!("{}:{}\n", id.0, payload))
}

/// Decode one line, with or without its trailing `\n` / `\r\n`.
pub fn decode(line: &[u8]) -> Result<(RequestId, &str)> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let text = std::str::from_utf8(line).map_err(|_| Error::protocol("line is not utf-8"))?;
    let (id, payload) = text
        .split_once(':')
        .ok_or_else(|| Error::protocol(format!("missing id prefix in '{}'", text)))?;
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::protocol(format!("bad request id '{}'", id)));
    }
    let id = id
        .parse::<u64>()
        .map_err(|_| Error::protocol(format!("request id out of range '{}'", id)))?;
    Ok((RequestId(id), payload))
}

/// Ident request payload: `"addr:remote_port:local_port"`.
pub fn ident_request(addr: IpAddr, remote_port: u16, local_port: u16) -> String {
    format!("{}:{}:{}", addr, remote_port, local_port)
}

/// Split an ident request payload. Parses from the right so IPv6
/// addresses keep their colons.
pub fn parse_ident_request(payload: &str) -> Result<(IpAddr, u16, u16)> {
    let bad = || Error::protocol(format!("malformed ident request '{}'", payload));
    let mut parts = payload.rsplitn(3, ':');
    let local = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
    let remote = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
    let addr = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
    Ok((addr, remote, local))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode() {
        assert_eq!(encode(RequestId(42), "1.2.3.4").unwrap(), "42:1.2.3.4\n");
        assert_eq!(encode(RequestId(0), "").unwrap(), "0:\n");
        assert!(encode(RequestId(1), "a\nb").is_err());
    }

    #[test]
    fn test_decode() {
        let (id, payload) = decode(b"17:host.example\n").unwrap();
        assert_eq!(id, RequestId(17));
        assert_eq!(payload, "host.example");

        let (id, payload) = decode(b"3:\r\n").unwrap();
        assert_eq!(id, RequestId(3));
        assert_eq!(payload, "");

        let (_, payload) = decode(b"9:a:b:c").unwrap();
        assert_eq!(payload, "a:b:c");
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(decode(b"no-colon\n").is_err());
        assert!(decode(b":empty-id\n").is_err());
        assert!(decode(b"-1:x\n").is_err());
        assert!(decode(b"12a:x\n").is_err());
        assert!(decode(b"99999999999999999999999:x\n").is_err());
        assert!(decode(&[b'1', b':', 0xff, b'\n']).is_err());
    }

    #[test]
    fn test_kind_names() {
        for kind in CoserverKind::ALL {
            assert_eq!(kind.name().parse::<CoserverKind>().unwrap(), kind);
        }
        assert_eq!("DNS".parse::<CoserverKind>().unwrap(), CoserverKind::Dns);
        assert!("whois".parse::<CoserverKind>().is_err());
    }

    #[test]
    fn test_ident_payload() {
        let v4: IpAddr = "10.0.0.1".parse().unwrap();
        let payload = ident_request(v4, 6193, 23);
        assert_eq!(payload, "10.0.0.1:6193:23");
        assert_eq!(parse_ident_request(&payload).unwrap(), (v4, 6193, 23));

        let v6: IpAddr = "::1".parse().unwrap();
        let payload = ident_request(v6, 1, 2);
        assert_eq!(parse_ident_request(&payload).unwrap(), (v6, 1, 2));

        assert!(parse_ident_request("10.0.0.1:x:23").is_err());
        assert!(parse_ident_request("23").is_err());
    }
}

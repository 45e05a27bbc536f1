//! Worker side of the coserver line protocol
//!
//! Shared by thread workers, child processes and the standalone
//! `sockplex-coserver` binary: read a request line, run the blocking
//! lookup, answer with the same id.

use std::io::{self, BufRead, Write};

use sockplex_core::wire;
use tracing::{debug, warn};

/// Serve requests until `input` reaches end-of-file.
///
/// Lookup failures are answered with an empty result; malformed lines
/// are skipped. Returns the number of requests answered.
pub fn serve<R, W, F>(mut input: R, mut output: W, lookup: F) -> io::Result<u64>
where
    R: BufRead,
    W: Write,
    F: Fn(&str) -> Option<String>,
{
    let mut line = Vec::with_capacity(256);
    let mut served = 0u64;
    loop {
        line.clear();
        if input.read_until(b'\n', &mut line)? == 0 {
            debug!(served, "coserver input closed");
            return Ok(served);
        }
        let (id, payload) = match wire::decode(&line) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(error = %e, "skipping malformed coserver request");
                continue;
            }
        };
        let result = lookup(payload).unwrap_or_default();
        let reply = match wire::encode(id, &result) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(request = %id, error = %e, "lookup result not sendable");
                format!("{}:\n", id)
            }
        };
        output.write_all(reply.as_bytes())?;
        output.flush()?;
        served += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn echo_upper(payload: &str) -> Option<String> {
        if payload.is_empty() {
            None
        } else {
            Some(payload.to_uppercase())
        }
    }

    #[test]
    fn test_serve_answers_in_order() {
        let input = Cursor::new(b"1:abc\n2:\n7:x.y\n".to_vec());
        let mut output = Vec::new();
        let served = serve(input, &mut output, echo_upper).unwrap();
        assert_eq!(served, 3);
        assert_eq!(output, b"1:ABC\n2:\n7:X.Y\n");
    }

    #[test]
    fn test_serve_skips_malformed() {
        let input = Cursor::new(b"garbage\n5:ok\nx:y\n".to_vec());
        let mut output = Vec::new();
        let served = serve(input, &mut output, echo_upper).unwrap();
        assert_eq!(served, 1);
        assert_eq!(output, b"5:OK\n");
    }

    #[test]
    fn test_unsendable_result_becomes_failure() {
        let input = Cursor::new(b"3:q\n".to_vec());
        let mut output = Vec::new();
        serve(input, &mut output, |_| Some("two\nlines".to_string())).unwrap();
        assert_eq!(output, b"3:\n");
    }

    #[test]
    fn test_serve_without_trailing_newline() {
        let input = Cursor::new(b"4:last".to_vec());
        let mut output = Vec::new();
        assert_eq!(serve(input, &mut output, echo_upper).unwrap(), 1);
        assert_eq!(output, b"4:LAST\n");
    }
}

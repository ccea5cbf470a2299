//! RESP wire protocol (A1, ambient).
//!
//! Deliberately thin: the external "line-protocol parser and wire framing"
//! that spec.md names as out of scope for the core state machine, kept here
//! only so the crate is runnable end to end. Requests are always an array
//! of bulk strings (`*N\r\n$len\r\nbytes\r\n...`); replies use the handful of
//! RESP reply types the state machine actually produces.

use std::io::{BufRead, Write};

use crate::error::{KvNodeError, Result};
use crate::statemachine::Outcome;

/// Parse one RESP array-of-bulk-strings request. Returns `Ok(None)` on a
/// clean EOF between requests (the peer closed the connection); any other
/// malformed frame is a [`KvNodeError::Protocol`] error.
pub fn read_request(reader: &mut impl BufRead) -> Result<Option<Vec<Vec<u8>>>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let line = line.trim_end_matches(['\r', '\n']);

    let count = parse_prefixed_int(line, '*')?;
    if count < 0 {
        return Err(KvNodeError::Protocol("negative array length".to_string()));
    }

    let mut args = Vec::with_capacity(count as usize);
    for _ in 0..count {
        args.push(read_bulk_string(reader)?);
    }
    Ok(Some(args))
}

fn read_bulk_string(reader: &mut impl BufRead) -> Result<Vec<u8>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(KvNodeError::Protocol("unexpected eof in bulk string header".to_string()));
    }
    let line = line.trim_end_matches(['\r', '\n']);
    let len = parse_prefixed_int(line, '$')?;
    if len < 0 {
        return Err(KvNodeError::Protocol("negative bulk string length".to_string()));
    }

    let mut buf = vec![0u8; len as usize + 2]; // payload + trailing CRLF
    reader
        .read_exact(&mut buf)
        .map_err(|e| KvNodeError::Protocol(format!("truncated bulk string: {e}")))?;
    buf.truncate(len as usize);
    Ok(buf)
}

fn parse_prefixed_int(line: &str, prefix: char) -> Result<i64> {
    let mut chars = line.chars();
    if chars.next() != Some(prefix) {
        return Err(KvNodeError::Protocol(format!(
            "expected '{prefix}' prefix, got {line:?}"
        )));
    }
    chars
        .as_str()
        .parse::<i64>()
        .map_err(|_| KvNodeError::Protocol(format!("invalid integer in {line:?}")))
}

/// Encode `outcome` as a RESP reply and write it to `out`.
pub fn write_outcome(out: &mut impl Write, outcome: &Outcome) -> std::io::Result<()> {
    match outcome {
        Outcome::Ok => out.write_all(b"+OK\r\n"),
        Outcome::Int(n) => out.write_all(format!(":{n}\r\n").as_bytes()),
        Outcome::Bulk(bytes) => {
            out.write_all(format!("${}\r\n", bytes.len()).as_bytes())?;
            out.write_all(bytes)?;
            out.write_all(b"\r\n")
        }
        Outcome::Null => out.write_all(b"$-1\r\n"),
        Outcome::Array(items) => {
            out.write_all(format!("*{}\r\n", items.len()).as_bytes())?;
            for item in items {
                write_outcome(out, item)?;
            }
            Ok(())
        }
        Outcome::Err(msg) => out.write_all(format!("-{msg}\r\n").as_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    #[test]
    fn reads_a_simple_array_request() {
        let raw = b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n";
        let mut reader = BufReader::new(&raw[..]);
        let args = read_request(&mut reader).unwrap().unwrap();
        assert_eq!(args, vec![b"GET".to_vec(), b"foo".to_vec()]);
    }

    #[test]
    fn clean_eof_between_requests_is_none() {
        let raw = b"";
        let mut reader = BufReader::new(&raw[..]);
        assert!(read_request(&mut reader).unwrap().is_none());
    }

    #[test]
    fn malformed_prefix_is_a_protocol_error() {
        let raw = b"garbage\r\n";
        let mut reader = BufReader::new(&raw[..]);
        let err = read_request(&mut reader).unwrap_err();
        assert!(matches!(err, KvNodeError::Protocol(_)));
    }

    #[test]
    fn empty_bulk_string_round_trips() {
        let raw = b"*1\r\n$0\r\n\r\n";
        let mut reader = BufReader::new(&raw[..]);
        let args = read_request(&mut reader).unwrap().unwrap();
        assert_eq!(args, vec![Vec::<u8>::new()]);
    }

    #[test]
    fn encodes_every_outcome_variant() {
        let mut buf = Vec::new();
        write_outcome(&mut buf, &Outcome::Ok).unwrap();
        write_outcome(&mut buf, &Outcome::Int(42)).unwrap();
        write_outcome(&mut buf, &Outcome::Bulk(b"hi".to_vec())).unwrap();
        write_outcome(&mut buf, &Outcome::Null).unwrap();
        write_outcome(&mut buf, &Outcome::Array(vec![Outcome::Int(1), Outcome::Null])).unwrap();
        write_outcome(&mut buf, &Outcome::Err("bad".to_string())).unwrap();

        assert_eq!(
            buf,
            b"+OK\r\n:42\r\n$2\r\nhi\r\n$-1\r\n*2\r\n:1\r\n$-1\r\n-bad\r\n".to_vec()
        );
    }
}

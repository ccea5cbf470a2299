//! Snapshot codec (C4): a deterministic, gzip-wrapped, length-prefixed dump
//! and restore of the full store, plus an offline projection of a snapshot
//! stream into replayable RESP `SET` commands.
//!
//! Stream format (bit-exact, spec.md §6):
//! ```text
//! stream  := gzip( record* )
//! record  := key_len key_bytes value_len value_bytes
//! key_len := u64 little-endian
//! value_len := u64 little-endian
//! ```
//! `key_bytes` is the full stored key, including the namespace byte. There
//! is no count and no checksum; end of stream is EOF at a record boundary.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{KvNodeError, Result};
use crate::keycodec::PREFIX_USER;
use crate::store::{Batch, Store};

/// Flush the restore batch once staged key+value bytes cross this
/// threshold (spec.md §4.4: "≈4 MiB").
const FLUSH_THRESHOLD_BYTES: usize = 4 * 1024 * 1024;

/// Write every record in `store` to `writer`, gzip-wrapped, in ascending key
/// order. Reads through a consistent snapshot so concurrent writes are never
/// observed mid-dump.
pub fn write_snapshot<W: Write>(store: &Store, writer: W) -> Result<()> {
    let snapshot = store.consistent_snapshot();
    let mut gz = GzEncoder::new(writer, Compression::default());
    for entry in snapshot.iter_all() {
        let (key, value) = entry?;
        write_record(&mut gz, &key, &value)?;
    }
    gz.finish()?;
    Ok(())
}

fn write_record<W: Write>(w: &mut W, key: &[u8], value: &[u8]) -> Result<()> {
    w.write_all(&(key.len() as u64).to_le_bytes())?;
    w.write_all(key)?;
    w.write_all(&(value.len() as u64).to_le_bytes())?;
    w.write_all(value)?;
    Ok(())
}

/// Decode a snapshot stream into `store`, which the caller is responsible
/// for having already reinitialized to empty (see `lifecycle::restore`).
/// Batches are flushed periodically so a large snapshot never holds an
/// unbounded amount of staged memory.
pub fn load_into<R: Read>(store: &Store, reader: R) -> Result<()> {
    let mut gz = GzDecoder::new(reader);
    let mut batch = Batch::new();

    while let Some((key, value)) = read_record(&mut gz)? {
        batch.put(&key, &value);
        if batch.size_in_bytes() > FLUSH_THRESHOLD_BYTES {
            store.write(std::mem::take(&mut batch))?;
        }
    }
    if !batch.is_empty() {
        store.write(batch)?;
    }
    Ok(())
}

/// Read a snapshot stream and emit one RESP `SET key value` command per
/// user-prefixed record (`key[0] == 'k'`), skipping any record whose prefix
/// is reserved for future internal state — see the Open Question in
/// spec.md §9.
pub fn project_to_commands<R: Read, W: Write>(reader: R, mut out: W) -> Result<()> {
    let mut gz = GzDecoder::new(reader);
    while let Some((key, value)) = read_record(&mut gz)? {
        if key.first() == Some(&PREFIX_USER) {
            write_set_command(&mut out, &key[1..], &value)?;
        }
    }
    Ok(())
}

fn write_set_command<W: Write>(out: &mut W, key: &[u8], value: &[u8]) -> Result<()> {
    out.write_all(b"*3\r\n$3\r\nSET\r\n")?;
    out.write_all(format!("${}\r\n", key.len()).as_bytes())?;
    out.write_all(key)?;
    out.write_all(b"\r\n")?;
    out.write_all(format!("${}\r\n", value.len()).as_bytes())?;
    out.write_all(value)?;
    out.write_all(b"\r\n")?;
    Ok(())
}

/// Read one record. `Ok(None)` means a clean end of stream (EOF exactly at
/// a record boundary). Any other short read is a fatal restore error.
fn read_record<R: Read>(r: &mut R) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
    let mut len_buf = [0u8; 8];
    if !read_or_clean_eof(r, &mut len_buf)? {
        return Ok(None);
    }
    let key_len = u64::from_le_bytes(len_buf) as usize;
    let mut key = vec![0u8; key_len];
    r.read_exact(&mut key).map_err(restore_error)?;

    r.read_exact(&mut len_buf).map_err(restore_error)?;
    let value_len = u64::from_le_bytes(len_buf) as usize;
    let mut value = vec![0u8; value_len];
    r.read_exact(&mut value).map_err(restore_error)?;

    Ok(Some((key, value)))
}

/// Fill `buf` fully. Returns `Ok(false)` if EOF hits before a single byte is
/// read (a clean record boundary); any other short read is a fatal error.
fn read_or_clean_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..]).map_err(restore_error)?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(KvNodeError::Restore("truncated record header".to_string()));
        }
        filled += n;
    }
    Ok(true)
}

fn restore_error(e: std::io::Error) -> KvNodeError {
    KvNodeError::Restore(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keycodec::encode_user;

    fn gzip_bytes(raw: &[u8]) -> Vec<u8> {
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(raw).unwrap();
        gz.finish().unwrap()
    }

    #[test]
    fn round_trip_preserves_every_key() {
        let src_dir = tempfile::tempdir().unwrap();
        let src = Store::open(src_dir.path()).unwrap();
        src.put(&encode_user(b"a"), b"1").unwrap();
        src.put(&encode_user(b"b"), b"2").unwrap();
        src.put(&encode_user(b""), b"empty-key").unwrap();
        src.put(&encode_user(b"c"), b"").unwrap();

        let mut buf = Vec::new();
        write_snapshot(&src, &mut buf).unwrap();

        let dst_dir = tempfile::tempdir().unwrap();
        let dst = Store::open(dst_dir.path()).unwrap();
        load_into(&dst, &buf[..]).unwrap();

        assert_eq!(dst.get(&encode_user(b"a")).unwrap(), Some(b"1".to_vec()));
        assert_eq!(dst.get(&encode_user(b"b")).unwrap(), Some(b"2".to_vec()));
        assert_eq!(
            dst.get(&encode_user(b"")).unwrap(),
            Some(b"empty-key".to_vec())
        );
        assert_eq!(dst.get(&encode_user(b"c")).unwrap(), Some(b"".to_vec()));
    }

    #[test]
    fn restore_rejects_truncated_record() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&5u64.to_le_bytes());
        raw.extend_from_slice(b"ab"); // only 2 of 5 promised key bytes
        let gz = gzip_bytes(&raw);

        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let err = load_into(&store, &gz[..]).unwrap_err();
        assert!(matches!(err, KvNodeError::Restore(_)));
    }

    #[test]
    fn restore_accepts_clean_eof_at_boundary() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&1u64.to_le_bytes());
        raw.extend_from_slice(b"k");
        raw.extend_from_slice(&1u64.to_le_bytes());
        raw.extend_from_slice(b"v");
        let gz = gzip_bytes(&raw);

        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        load_into(&store, &gz[..]).unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn projection_skips_non_user_prefix_and_emits_set() {
        let mut raw = Vec::new();
        // reserved-prefix record: skipped.
        let reserved_key = b"zinternal".to_vec();
        raw.extend_from_slice(&(reserved_key.len() as u64).to_le_bytes());
        raw.extend_from_slice(&reserved_key);
        raw.extend_from_slice(&3u64.to_le_bytes());
        raw.extend_from_slice(b"xyz");
        // user record: projected.
        let user_key = encode_user(b"foo");
        raw.extend_from_slice(&(user_key.len() as u64).to_le_bytes());
        raw.extend_from_slice(&user_key);
        raw.extend_from_slice(&3u64.to_le_bytes());
        raw.extend_from_slice(b"bar");
        let gz = gzip_bytes(&raw);

        let mut out = Vec::new();
        project_to_commands(&gz[..], &mut out).unwrap();
        assert_eq!(out, b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n");
    }
}

//! State machine (C5): per-command argument validation, read/write
//! classification, execution against the store, and response shaping.
//!
//! Every command is parsed into a [`Routed`] value. `ECHO`, `SHUTDOWN`, and
//! unknown verbs are **not replicated** — they are handled locally and never
//! reach the [`Applier`]. Everything else becomes a [`Classified`]
//! descriptor (Design Notes, spec.md §9): a write carries a `mutate`
//! closure (applied once per replica, in log order) and a `respond` closure
//! (shapes the reply from the mutate's result); a read carries only a
//! `respond` closure run under the shared lock.

use crate::error::{DispatchError, KvNodeError, Result};
use crate::keycodec;
use crate::lifecycle::Node;
use crate::pattern::{self, UpperBound};
use crate::replication::{Applier, Conn};
use crate::store::{Batch, Direction, Store};

/// The shaped result of a command, ready to be written over the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// `+OK`
    Ok,
    /// `:n`
    Int(i64),
    /// `$len\r\nbytes`
    Bulk(Vec<u8>),
    /// `$-1` (absent value, not an error)
    Null,
    /// `*len\r\n...`
    Array(Vec<Outcome>),
    /// `-message`
    Err(String),
}

/// What a write's `mutate` closure hands to its `respond` closure.
pub enum MutateOutcome {
    /// No useful result beyond success (`SET`, `MSET`, `FLUSHDB`).
    Unit,
    /// A count of affected keys (`DEL`, `DELIF`, `PDEL`).
    Count(i64),
}

/// A write command: runs `mutate` against the node exactly once (under
/// whatever lock it takes internally), then shapes the reply from its
/// result via `respond`.
pub struct WriteCommand {
    /// Applied exactly once per replica, in log order.
    pub mutate: Box<dyn FnOnce(&Node) -> Result<MutateOutcome> + Send>,
    /// Shapes the wire reply from the mutate's result.
    pub respond: Box<dyn FnOnce(MutateOutcome) -> Outcome + Send>,
}

/// A read command: `respond` runs under the shared lock and produces the
/// reply directly.
pub struct ReadCommand {
    /// Produces the wire reply directly; no mutate step.
    pub respond: Box<dyn FnOnce(&Node) -> Result<Outcome> + Send>,
}

/// A command classified for the replication adapter.
pub enum Classified {
    /// Goes through consensus, then `mutate` is applied in log order.
    Write(WriteCommand),
    /// Served directly under the read-consistency policy the adapter picks.
    Read(ReadCommand),
}

/// What the connection loop should do after a command completes.
pub enum Control {
    /// Keep serving this connection.
    Continue,
    /// `SHUTDOWN` was issued: reply, then close the connection and
    /// terminate the process via the lifecycle owner.
    Shutdown,
    /// The store could not be reopened after `FLUSHDB`/restore — no
    /// consistent local state remains. The caller must abort the process
    /// after delivering the reply.
    Abort(String),
}

enum Routed {
    Local(Outcome),
    Shutdown,
    Classified(Classified),
}

/// Parse and dispatch one command. `Local` commands (`ECHO`, `SHUTDOWN`,
/// unknown verbs, and arity/syntax errors) are handled without ever
/// consulting `applier`; everything else is routed through it.
pub fn dispatch(applier: &dyn Applier, conn: &mut Conn, args: &[Vec<u8>]) -> (Outcome, Control) {
    match route(args) {
        Err(e) => (Outcome::Err(e.to_string()), Control::Continue),
        Ok(Routed::Local(outcome)) => (outcome, Control::Continue),
        Ok(Routed::Shutdown) => (Outcome::Ok, Control::Shutdown),
        Ok(Routed::Classified(classified)) => match applier.apply(conn, classified) {
            Ok(outcome) => (outcome, Control::Continue),
            Err(KvNodeError::Fatal(msg)) => (Outcome::Err(msg.clone()), Control::Abort(msg)),
            Err(e) => (Outcome::Err(e.to_string()), Control::Continue),
        },
    }
}

fn route(args: &[Vec<u8>]) -> std::result::Result<Routed, DispatchError> {
    let verb = args
        .first()
        .ok_or(DispatchError::UnknownCommand)?
        .to_ascii_lowercase();

    match verb.as_slice() {
        b"echo" => {
            if args.len() != 2 {
                return Err(DispatchError::WrongArity);
            }
            Ok(Routed::Local(Outcome::Bulk(args[1].clone())))
        }
        b"set" => {
            if args.len() != 3 {
                return Err(DispatchError::WrongArity);
            }
            Ok(Routed::Classified(build_set(args[1].clone(), args[2].clone())))
        }
        b"mset" => {
            if args.len() < 3 || args.len() % 2 == 0 {
                return Err(DispatchError::WrongArity);
            }
            let mut pairs = Vec::with_capacity(args.len() / 2);
            let mut i = 1;
            while i + 1 < args.len() {
                pairs.push((args[i].clone(), args[i + 1].clone()));
                i += 2;
            }
            Ok(Routed::Classified(build_mset(pairs)))
        }
        b"get" => {
            if args.len() != 2 {
                return Err(DispatchError::WrongArity);
            }
            Ok(Routed::Classified(build_get(args[1].clone())))
        }
        b"mget" => {
            if args.len() < 2 {
                return Err(DispatchError::WrongArity);
            }
            Ok(Routed::Classified(build_mget(args[1..].to_vec())))
        }
        b"del" => {
            if args.len() < 2 {
                return Err(DispatchError::WrongArity);
            }
            Ok(Routed::Classified(build_del(args[1..].to_vec())))
        }
        b"delif" => {
            if args.len() < 3 {
                return Err(DispatchError::WrongArity);
            }
            Ok(Routed::Classified(build_delif(
                args[1].clone(),
                args[2..].to_vec(),
            )))
        }
        b"pdel" => {
            if args.len() != 2 {
                return Err(DispatchError::WrongArity);
            }
            Ok(Routed::Classified(build_pdel(args[1].clone())))
        }
        b"keys" => {
            if args.len() < 2 {
                return Err(DispatchError::WrongArity);
            }
            let opts = parse_keys_options(&args[2..])?;
            Ok(Routed::Classified(build_keys(args[1].clone(), opts)))
        }
        b"flushdb" => {
            if args.len() != 1 {
                return Err(DispatchError::WrongArity);
            }
            Ok(Routed::Classified(build_flushdb()))
        }
        b"shutdown" => {
            if args.len() != 1 {
                return Err(DispatchError::WrongArity);
            }
            Ok(Routed::Shutdown)
        }
        _ => Err(DispatchError::UnknownCommand),
    }
}

fn build_set(key: Vec<u8>, value: Vec<u8>) -> Classified {
    Classified::Write(WriteCommand {
        mutate: Box::new(move |node| {
            node.with_write(|store| store.put(&keycodec::encode_user(&key), &value))?;
            Ok(MutateOutcome::Unit)
        }),
        respond: Box::new(|_| Outcome::Ok),
    })
}

fn build_mset(pairs: Vec<(Vec<u8>, Vec<u8>)>) -> Classified {
    Classified::Write(WriteCommand {
        mutate: Box::new(move |node| {
            node.with_write(|store| {
                let mut batch = Batch::new();
                for (k, v) in &pairs {
                    batch.put(&keycodec::encode_user(k), v);
                }
                store.write(batch)
            })?;
            Ok(MutateOutcome::Unit)
        }),
        respond: Box::new(|_| Outcome::Ok),
    })
}

fn build_get(key: Vec<u8>) -> Classified {
    Classified::Read(ReadCommand {
        respond: Box::new(move |node| {
            node.with_read(|store| {
                Ok(match store.get(&keycodec::encode_user(&key))? {
                    Some(bytes) => Outcome::Bulk(bytes),
                    None => Outcome::Null,
                })
            })
        }),
    })
}

fn build_mget(keys: Vec<Vec<u8>>) -> Classified {
    Classified::Read(ReadCommand {
        respond: Box::new(move |node| {
            node.with_read(|store| {
                let mut out = Vec::with_capacity(keys.len());
                for k in &keys {
                    out.push(match store.get(&keycodec::encode_user(k))? {
                        Some(bytes) => Outcome::Bulk(bytes),
                        None => Outcome::Null,
                    });
                }
                Ok(Outcome::Array(out))
            })
        }),
    })
}

fn build_del(keys: Vec<Vec<u8>>) -> Classified {
    Classified::Write(WriteCommand {
        mutate: Box::new(move |node| {
            let n = node.with_write(|store| {
                let mut batch = Batch::new();
                let mut n = 0i64;
                for k in &keys {
                    let full = keycodec::encode_user(k);
                    if store.has(&full)? {
                        batch.delete(&full);
                        n += 1;
                    }
                }
                store.write(batch)?;
                Ok(n)
            })?;
            Ok(MutateOutcome::Count(n))
        }),
        respond: Box::new(count_to_int),
    })
}

fn build_delif(matchbytes: Vec<u8>, keys: Vec<Vec<u8>>) -> Classified {
    Classified::Write(WriteCommand {
        mutate: Box::new(move |node| {
            let n = node.with_write(|store| {
                let mut batch = Batch::new();
                let mut n = 0i64;
                for k in &keys {
                    let full = keycodec::encode_user(k);
                    if let Some(value) = store.get(&full)? {
                        if contains_subslice(&value, &matchbytes) {
                            batch.delete(&full);
                            n += 1;
                        }
                    }
                }
                store.write(batch)?;
                Ok(n)
            })?;
            Ok(MutateOutcome::Count(n))
        }),
        respond: Box::new(count_to_int),
    })
}

fn build_pdel(pattern: Vec<u8>) -> Classified {
    Classified::Write(WriteCommand {
        mutate: Box::new(move |node| {
            let n = node.with_write(|store| {
                let encoded_pattern = keycodec::encode_user(&pattern);
                let (lo, hi) = pattern::bounds(&encoded_pattern);

                let mut victims = Vec::new();
                for entry in store.iter_from(&lo, Direction::Forward) {
                    let (key, _) = entry?;
                    if exceeds_upper(&key, &hi) {
                        break;
                    }
                    if pattern::matches(&pattern, keycodec::decode_user(&key)) {
                        victims.push(key);
                    }
                }

                let n = victims.len() as i64;
                let mut batch = Batch::new();
                for key in &victims {
                    batch.delete(key);
                }
                store.write(batch)?;
                Ok(n)
            })?;
            Ok(MutateOutcome::Count(n))
        }),
        respond: Box::new(count_to_int),
    })
}

fn build_flushdb() -> Classified {
    Classified::Write(WriteCommand {
        mutate: Box::new(|node| {
            node.flushdb()?;
            Ok(MutateOutcome::Unit)
        }),
        respond: Box::new(|_| Outcome::Ok),
    })
}

fn count_to_int(result: MutateOutcome) -> Outcome {
    match result {
        MutateOutcome::Count(n) => Outcome::Int(n),
        MutateOutcome::Unit => Outcome::Int(0),
    }
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    if needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn exceeds_upper(key: &[u8], hi: &UpperBound) -> bool {
    match hi {
        UpperBound::Unbounded => false,
        UpperBound::Exclusive(h) => key >= h.as_slice(),
    }
}

/// Parsed `KEYS` options (spec.md §4.5). `limit` defaults to 500.
struct KeysOptions {
    with_values: bool,
    desc: bool,
    pivot: Option<Vec<u8>>,
    limit: u64,
}

impl Default for KeysOptions {
    fn default() -> Self {
        KeysOptions {
            with_values: false,
            desc: false,
            pivot: None,
            limit: 500,
        }
    }
}

fn parse_keys_options(rest: &[Vec<u8>]) -> std::result::Result<KeysOptions, DispatchError> {
    let mut opts = KeysOptions::default();
    let mut i = 0;
    while i < rest.len() {
        match rest[i].to_ascii_uppercase().as_slice() {
            b"WITHVALUES" => {
                opts.with_values = true;
                i += 1;
            }
            b"DESC" => {
                opts.desc = true;
                i += 1;
            }
            b"PIVOT" => {
                let value = rest
                    .get(i + 1)
                    .ok_or_else(|| DispatchError::Syntax("PIVOT requires a value".to_string()))?;
                opts.pivot = Some(value.clone());
                i += 2;
            }
            b"LIMIT" => {
                let value = rest
                    .get(i + 1)
                    .ok_or_else(|| DispatchError::Syntax("LIMIT requires a value".to_string()))?;
                opts.limit = parse_non_negative_limit(value)?;
                i += 2;
            }
            _ => {
                return Err(DispatchError::Syntax(format!(
                    "unknown KEYS option {}",
                    String::from_utf8_lossy(&rest[i])
                )))
            }
        }
    }
    Ok(opts)
}

fn parse_non_negative_limit(token: &[u8]) -> std::result::Result<u64, DispatchError> {
    let text = std::str::from_utf8(token)
        .map_err(|_| DispatchError::Syntax("LIMIT must be an integer".to_string()))?;
    if text.starts_with('-') {
        return Err(DispatchError::Syntax("LIMIT must not be negative".to_string()));
    }
    text.parse::<u64>()
        .map_err(|_| DispatchError::Syntax("LIMIT must be an integer".to_string()))
}

fn build_keys(pattern: Vec<u8>, opts: KeysOptions) -> Classified {
    Classified::Read(ReadCommand {
        respond: Box::new(move |node| node.with_read(|store| execute_keys(store, &pattern, &opts))),
    })
}

fn execute_keys(store: &Store, pattern: &[u8], opts: &KeysOptions) -> Result<Outcome> {
    let encoded_pattern = keycodec::encode_user(pattern);
    let (pat_lo, pat_hi) = pattern::bounds(&encoded_pattern);
    let encoded_pivot = opts.pivot.as_deref().map(keycodec::encode_user);

    let mut hits: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();

    if opts.limit > 0 {
        if opts.desc {
            let effective_hi = match (&pat_hi, &encoded_pivot) {
                (UpperBound::Unbounded, None) => None,
                (UpperBound::Unbounded, Some(p)) => Some(p.clone()),
                (UpperBound::Exclusive(h), None) => Some(h.clone()),
                (UpperBound::Exclusive(h), Some(p)) => Some(std::cmp::min(h.clone(), p.clone())),
            };

            let iter: Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>>> = match &effective_hi {
                Some(hi) => Box::new(store.iter_from(hi, Direction::Reverse)),
                None => Box::new(store.iter_from_end()),
            };

            for entry in iter {
                let (key, value) = entry?;
                if let Some(hi) = &effective_hi {
                    if key.as_slice() >= hi.as_slice() {
                        continue;
                    }
                }
                if key < pat_lo {
                    break;
                }
                if pattern::matches(pattern, keycodec::decode_user(&key)) {
                    hits.push((key, value));
                    if hits.len() as u64 >= opts.limit {
                        break;
                    }
                }
            }
        } else {
            let effective_lo = match &encoded_pivot {
                Some(p) => std::cmp::max(pat_lo.clone(), p.clone()),
                None => pat_lo.clone(),
            };

            for entry in store.iter_from(&effective_lo, Direction::Forward) {
                let (key, value) = entry?;
                if exceeds_upper(&key, &pat_hi) {
                    break;
                }
                if let Some(p) = &encoded_pivot {
                    if &key == p {
                        continue;
                    }
                }
                if pattern::matches(pattern, keycodec::decode_user(&key)) {
                    hits.push((key, value));
                    if hits.len() as u64 >= opts.limit {
                        break;
                    }
                }
            }
        }
    }

    let mut array = Vec::with_capacity(if opts.with_values { hits.len() * 2 } else { hits.len() });
    for (key, value) in hits {
        array.push(Outcome::Bulk(keycodec::decode_user(&key).to_vec()));
        if opts.with_values {
            array.push(Outcome::Bulk(value));
        }
    }
    Ok(Outcome::Array(array))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::LocalApplier;
    use std::sync::Arc;

    fn node() -> Arc<Node> {
        let dir = tempfile::tempdir().unwrap();
        // leak the tempdir so the node stays valid for the test's duration.
        Arc::new(Node::open(Box::leak(Box::new(dir)).path()).unwrap())
    }

    fn run(applier: &LocalApplier, args: &[&[u8]]) -> Outcome {
        let args: Vec<Vec<u8>> = args.iter().map(|a| a.to_vec()).collect();
        let mut conn = Conn::local();
        dispatch(applier, &mut conn, &args).0
    }

    #[test]
    fn set_then_get_roundtrips() {
        let applier = LocalApplier::new(node());
        assert_eq!(run(&applier, &[b"SET", b"foo", b"bar"]), Outcome::Ok);
        assert_eq!(run(&applier, &[b"GET", b"foo"]), Outcome::Bulk(b"bar".to_vec()));
    }

    #[test]
    fn get_missing_key_is_null_not_error() {
        let applier = LocalApplier::new(node());
        assert_eq!(run(&applier, &[b"GET", b"missing"]), Outcome::Null);
    }

    #[test]
    fn mset_later_duplicate_key_wins() {
        let applier = LocalApplier::new(node());
        run(&applier, &[b"MSET", b"a", b"1", b"b", b"2", b"a", b"3"]);
        assert_eq!(
            run(&applier, &[b"MGET", b"a", b"b", b"c"]),
            Outcome::Array(vec![
                Outcome::Bulk(b"3".to_vec()),
                Outcome::Bulk(b"2".to_vec()),
                Outcome::Null,
            ])
        );
    }

    #[test]
    fn pdel_removes_matching_keys_and_counts() {
        let applier = LocalApplier::new(node());
        run(&applier, &[b"SET", b"user:1", b"x"]);
        run(&applier, &[b"SET", b"user:2", b"x"]);
        run(&applier, &[b"SET", b"item:1", b"x"]);

        assert_eq!(run(&applier, &[b"PDEL", b"user:*"]), Outcome::Int(2));
        assert_eq!(
            run(&applier, &[b"KEYS", b"*"]),
            Outcome::Array(vec![Outcome::Bulk(b"item:1".to_vec())])
        );
    }

    #[test]
    fn keys_limit_and_pivot_paginate_ascending() {
        let applier = LocalApplier::new(node());
        for k in ["a", "b", "c", "d"] {
            run(&applier, &[b"SET", k.as_bytes(), b"v"]);
        }
        assert_eq!(
            run(&applier, &[b"KEYS", b"*", b"PIVOT", b"b", b"LIMIT", b"2"]),
            Outcome::Array(vec![Outcome::Bulk(b"c".to_vec()), Outcome::Bulk(b"d".to_vec())])
        );
    }

    #[test]
    fn keys_desc_pivot_paginates_descending() {
        let applier = LocalApplier::new(node());
        for k in ["a", "b", "c", "d"] {
            run(&applier, &[b"SET", k.as_bytes(), b"v"]);
        }
        assert_eq!(
            run(&applier, &[b"KEYS", b"*", b"DESC", b"PIVOT", b"c", b"LIMIT", b"10"]),
            Outcome::Array(vec![Outcome::Bulk(b"b".to_vec()), Outcome::Bulk(b"a".to_vec())])
        );
    }

    #[test]
    fn keys_limit_zero_returns_empty() {
        let applier = LocalApplier::new(node());
        run(&applier, &[b"SET", b"a", b"v"]);
        assert_eq!(
            run(&applier, &[b"KEYS", b"*", b"LIMIT", b"0"]),
            Outcome::Array(vec![])
        );
    }

    #[test]
    fn delif_matches_by_substring() {
        let applier = LocalApplier::new(node());
        run(&applier, &[b"SET", b"x", b"alpha"]);
        run(&applier, &[b"SET", b"y", b"beta"]);
        assert_eq!(run(&applier, &[b"DELIF", b"eta", b"x", b"y"]), Outcome::Int(1));
        assert_eq!(run(&applier, &[b"GET", b"y"]), Outcome::Null);
        assert_eq!(run(&applier, &[b"GET", b"x"]), Outcome::Bulk(b"alpha".to_vec()));
    }

    #[test]
    fn wrong_arity_is_rejected_with_no_state_change() {
        let applier = LocalApplier::new(node());
        assert_eq!(
            run(&applier, &[b"SET", b"onlykey"]),
            Outcome::Err(DispatchError::WrongArity.to_string())
        );
        assert_eq!(run(&applier, &[b"GET", b"onlykey"]), Outcome::Null);
    }

    #[test]
    fn unknown_command_is_rejected() {
        let applier = LocalApplier::new(node());
        assert_eq!(
            run(&applier, &[b"FROBNICATE", b"x"]),
            Outcome::Err(DispatchError::UnknownCommand.to_string())
        );
    }

    #[test]
    fn keys_unknown_option_is_syntax_error() {
        let applier = LocalApplier::new(node());
        if let Outcome::Err(msg) = run(&applier, &[b"KEYS", b"*", b"BOGUS"]) {
            assert!(msg.starts_with("syntax error"));
        } else {
            panic!("expected syntax error");
        }
    }

    #[test]
    fn echo_is_local_and_unaffected_by_closed_node() {
        let n = node();
        n.close();
        let applier = LocalApplier::new(n);
        assert_eq!(run(&applier, &[b"ECHO", b"hi"]), Outcome::Bulk(b"hi".to_vec()));
    }
}

//! Namespace-prefixed key encoding (C1).
//!
//! Every stored key is `prefix ∥ user_key`. `'k'` is the only prefix this
//! node ever writes; the rest of the single-byte namespace is left free for
//! future internal entries (see `SPEC_FULL.md` §4.1).

/// Namespace byte reserved for user data.
pub const PREFIX_USER: u8 = b'k';

/// Encode a user key under `prefix`, allocating exactly `1 + user_key.len()`
/// bytes.
pub fn encode(prefix: u8, user_key: &[u8]) -> Vec<u8> {
    let mut full = Vec::with_capacity(1 + user_key.len());
    full.push(prefix);
    full.extend_from_slice(user_key);
    full
}

/// Encode a user key under [`PREFIX_USER`].
pub fn encode_user(user_key: &[u8]) -> Vec<u8> {
    encode(PREFIX_USER, user_key)
}

/// Strip the leading namespace byte off a full stored key.
///
/// Panics if `full_key` is empty; the store never holds empty keys since
/// every stored key carries at least the one-byte prefix.
pub fn decode_user(full_key: &[u8]) -> &[u8] {
    &full_key[1..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let full = encode_user(b"hello");
        assert_eq!(full, b"khello");
        assert_eq!(decode_user(&full), b"hello");
    }

    #[test]
    fn encode_empty_user_key() {
        let full = encode_user(b"");
        assert_eq!(full, vec![PREFIX_USER]);
        assert_eq!(decode_user(&full), b"");
    }
}

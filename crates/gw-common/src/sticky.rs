use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a sticky-session source value (spec §4.1).
///
/// The caller is responsible for picking the source value per the
/// precedence order (`X-Session-ID` header, else bearer token); this
/// function only does the hashing step, kept separate so routing tests can
/// assert on the derivation order without re-hashing by hand.
pub fn sticky_key_hash(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_are_deterministic_and_hex() {
        let a = sticky_key_hash("abc");
        let b = sticky_key_hash("abc");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn distinct_inputs_hash_differently() {
        assert_ne!(sticky_key_hash("abc"), sticky_key_hash("abd"));
    }
}

//! Common cryptography helper functions for Pharos

use cryptoxide::hashing::blake2b::Blake2b;

/// Get a Blake2b-256 hash of a key
///
/// Returns a 32-byte hash.
pub fn keyhash_256(key: &[u8]) -> [u8; 32] {
    let mut context = Blake2b::<256>::new();
    context.update_mut(key);
    context.finalize()
}

/// Hex statement hash of a fact: BLAKE2b-256 over `datum_hash || fact_urn`
pub fn statement_hash(datum_hash: &str, fact_urn: &str) -> String {
    let mut context = Blake2b::<256>::new();
    context.update_mut(datum_hash.as_bytes());
    context.update_mut(fact_urn.as_bytes());
    hex::encode(context.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyhash_256_is_32_bytes() {
        assert_eq!(keyhash_256(b"orcfax").len(), 32);
    }

    #[test]
    fn statement_hash_matches_concatenation() {
        let concatenated = keyhash_256(b"deadbeefurn:orcfax:abc");
        assert_eq!(
            statement_hash("deadbeef", "urn:orcfax:abc"),
            hex::encode(concatenated)
        );
    }
}

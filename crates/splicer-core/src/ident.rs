// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identifier and hashing utilities.
use blake3::Hasher;

/// Canonical 256-bit digest used to address concrete spec nodes.
pub type Hash = [u8; 32];

/// Domain prefix committed into every node hash.
///
/// Changing the prefix (or the canonical field order in
/// [`crate::SpecNode::compute_hash`]) changes every persisted identity and
/// must be treated as a breaking change.
pub const SPEC_HASH_DOMAIN: &[u8] = b"spec:v1";

/// Content-derived identity of a concrete spec node.
///
/// The digest covers the node's identity attributes and, recursively, the
/// hashes of its dependency edges. It is the externally visible key used to
/// address installed artifacts; the `Display` impl renders lowercase hex.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SpecHash(pub Hash);

impl SpecHash {
    /// Returns the canonical byte representation of this hash.
    #[must_use]
    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }

    /// Full lowercase hex rendering (64 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Abbreviated hex rendering used in trees and log lines.
    pub fn short(&self) -> String {
        let mut text = self.to_hex();
        text.truncate(7);
        text
    }

    /// Parses a 64-character hex string.
    pub fn from_hex(text: &str) -> Option<Self> {
        let bytes = hex::decode(text).ok()?;
        let hash: Hash = bytes.try_into().ok()?;
        Some(Self(hash))
    }
}

impl std::fmt::Display for SpecHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Length-prefixed BLAKE3 writer shared by node hashing.
///
/// Every variable-length field is preceded by its length as an 8-byte
/// little-endian integer so that adjacent fields can never alias.
pub(crate) struct CanonicalHasher {
    inner: Hasher,
}

impl CanonicalHasher {
    pub(crate) fn new(domain: &[u8]) -> Self {
        let mut inner = Hasher::new();
        inner.update(domain);
        Self { inner }
    }

    pub(crate) fn length(&mut self, len: usize) {
        self.inner.update(&(len as u64).to_le_bytes());
    }

    pub(crate) fn str(&mut self, value: &str) {
        self.length(value.len());
        self.inner.update(value.as_bytes());
    }

    pub(crate) fn byte(&mut self, value: u8) {
        self.inner.update(&[value]);
    }

    pub(crate) fn hash(&mut self, value: &SpecHash) {
        self.inner.update(value.as_bytes());
    }

    pub(crate) fn finish(self) -> SpecHash {
        SpecHash(self.inner.finalize().into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip_and_short_form() {
        let hash = SpecHash(blake3::hash(b"splice-z").into());
        let text = hash.to_string();
        assert_eq!(text.len(), 64);
        assert_eq!(SpecHash::from_hex(&text).unwrap(), hash);
        assert_eq!(hash.short(), text[..7]);
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        assert!(SpecHash::from_hex("abcd").is_none());
        assert!(SpecHash::from_hex("not hex at all").is_none());
    }

    #[test]
    fn length_prefix_prevents_field_aliasing() {
        let mut a = CanonicalHasher::new(SPEC_HASH_DOMAIN);
        a.str("ab");
        a.str("c");
        let mut b = CanonicalHasher::new(SPEC_HASH_DOMAIN);
        b.str("a");
        b.str("bc");
        assert_ne!(a.finish(), b.finish());
    }
}

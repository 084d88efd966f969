//! Canonical info-hash normalization.

/// Normalize an info-hash pair into the canonical cross-instance key.
///
/// The canonical hash is the lowercased hex v1 info-hash; the v2 hash is
/// used only when v1 is absent. Returns `None` when neither is present.
#[must_use]
pub fn canonical_hash(infohash_v1: Option<&str>, infohash_v2: Option<&str>) -> Option<String> {
    fn pick(value: Option<&str>) -> Option<&str> {
        value.map(str::trim).filter(|candidate| !candidate.is_empty())
    }
    pick(infohash_v1)
        .or_else(|| pick(infohash_v2))
        .map(str::to_ascii_lowercase)
}

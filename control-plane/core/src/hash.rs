use std::hash::{BuildHasher, Hash, Hasher};

// Fixed seeds keep hashes stable across processes so that derived resource
// names and endpoint fingerprints agree between control plane replicas.
fn hasher() -> impl Hasher {
    ahash::RandomState::with_seeds(
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    )
    .build_hasher()
}

/// Hashes a single value with a process-independent seed.
pub fn stable_hash<T: Hash>(value: &T) -> u64 {
    let mut h = hasher();
    value.hash(&mut h);
    h.finish()
}

/// Hashes a label map in iteration order.
pub fn hash_labels<'a, I>(labels: I) -> u64
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut h = hasher();
    for (k, v) in labels {
        k.hash(&mut h);
        v.hash(&mut h);
    }
    h.finish()
}

/// Combines two hashes into one.
pub fn combine(a: u64, b: u64) -> u64 {
    let mut h = hasher();
    a.hash(&mut h);
    b.hash(&mut h);
    h.finish()
}

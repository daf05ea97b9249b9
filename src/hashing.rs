//! A deterministic `HashMap`. The hashing data structures in the standard library are
//! randomly seeded, which would make iteration order (and therefore floating point summation
//! order) differ between runs with the same random seed.
//!
//! Use `HashMap::default()` to create a new map with the deterministic hasher.
//!
//! The `hash_str` free function derives per-stream seed offsets in `crate::random`.

use std::hash::{BuildHasher, Hasher};

use rustc_hash::FxBuildHasher;
pub use rustc_hash::FxHashMap as HashMap;

/// A convenience method to compute the hash of a `&str`.
pub fn hash_str(data: &str) -> u64 {
    let mut hasher = FxBuildHasher.build_hasher();
    hasher.write(data.as_bytes());
    hasher.finish()
}

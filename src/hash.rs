//! Deterministic hashing for the engine's internal maps.
//!
//! Keys hashed here are fiber handles and element keys chosen by the
//! application, never adversarial input, so a fixed-seed foldhash is enough.

use std::collections::HashSet;
use std::hash::BuildHasher;

use foldhash::fast::{FixedState, FoldHasher};
use indexmap::IndexMap;

/// Zero-sized `BuildHasher` over foldhash with a fixed seed.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct FastHashBuilder;

impl BuildHasher for FastHashBuilder {
    type Hasher = FoldHasher<'static>;

    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        FixedState::with_seed(0x517cc1b727220a95).build_hasher()
    }
}

pub(crate) type FastHashSet<T> = HashSet<T, FastHashBuilder>;

pub(crate) type FastIndexMap<K, V> = IndexMap<K, V, FastHashBuilder>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_is_zero_sized_and_deterministic() {
        assert_eq!(std::mem::size_of::<FastHashBuilder>(), 0);
        assert_eq!(FastHashBuilder.hash_one(42u64), FastHashBuilder.hash_one(42u64));
    }

    #[test]
    fn set_uses_builder() {
        let mut set = FastHashSet::default();
        assert!(set.insert(3u32));
        assert!(!set.insert(3u32));
    }
}

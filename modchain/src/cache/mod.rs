//! Content-addressed cache for intermediate stage outputs.
//!
//! Entries are keyed by a [`Fingerprint`] of `(stage, input, module)` and
//! remember which run created them, so a rollback can remove exactly the
//! entries its own run produced.

mod fingerprint;
mod store;

pub use fingerprint::Fingerprint;
pub use store::{
    CacheConfig, CacheEntry, CacheLookup, CacheStats, CacheStore, EvictionPolicy, InMemoryCache,
};

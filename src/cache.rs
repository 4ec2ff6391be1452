//! Content-addressed cache for fetched asset bytes.
//!
//! Every successfully resolved asset is stored here under a normalized hash of
//! its reference so that switching back to a previously viewed asset never
//! issues a second network fetch. Entries survive until [`ContentCache::clear`]
//! is called; there is no background eviction.

use std::collections::HashMap;
use std::sync::Arc;

use instant::Instant;

/// An opaque fetched payload: raw bytes plus the content type they arrived with.
///
/// Blobs are cheap to clone; the byte buffer is shared.
#[derive(Clone, Debug)]
pub struct Blob {
    pub data: Arc<[u8]>,
    pub content_type: String,
}

impl Blob {
    pub fn new(data: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            data: Arc::from(data.into_boxed_slice()),
            content_type: content_type.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

struct CacheEntry {
    blob: Blob,
    last_access: Instant,
}

/// Maps normalized asset references to previously fetched blobs.
///
/// At most one entry exists per normalized reference. Concurrent fetches for
/// the same reference may both insert; the last write wins and both callers
/// hold a valid blob either way.
#[derive(Default)]
pub struct ContentCache {
    entries: HashMap<String, CacheEntry>,
}

/// Normalizes a reference and derives the cache key from it.
///
/// Two references that differ only in surrounding whitespace or a trailing
/// fragment identify the same remote content and must share one entry.
pub fn normalized_key(reference: &str) -> String {
    let trimmed = reference.trim();
    let without_fragment = match trimmed.split_once('#') {
        Some((head, _)) => head,
        None => trimmed,
    };
    blake3::hash(without_fragment.as_bytes()).to_hex().to_string()
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a blob and refreshes its last-access timestamp on hit.
    pub fn get(&mut self, reference: &str) -> Option<Blob> {
        let entry = self.entries.get_mut(&normalized_key(reference))?;
        entry.last_access = Instant::now();
        Some(entry.blob.clone())
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.entries.contains_key(&normalized_key(reference))
    }

    /// When the entry was last handed out, for diagnostics.
    pub fn last_access(&self, reference: &str) -> Option<Instant> {
        self.entries
            .get(&normalized_key(reference))
            .map(|entry| entry.last_access)
    }

    pub fn insert(&mut self, reference: &str, blob: Blob) {
        self.entries.insert(
            normalized_key(reference),
            CacheEntry {
                blob,
                last_access: Instant::now(),
            },
        );
    }

    /// Drops every entry. This is the only way entries leave the cache.
    pub fn clear(&mut self) {
        let dropped = self.entries.len();
        self.entries.clear();
        if dropped > 0 {
            log::debug!("content cache cleared, {} entries dropped", dropped);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

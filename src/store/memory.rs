//! In-process durable store.
//!
//! The default [`DurableStore`] when no database-backed implementation is
//! wired in. Entries live for the process lifetime; production setups
//! should supply a store that survives restarts.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cache::CacheEntry;
use crate::error::Result;
use crate::traits::DurableStore;
use crate::types::CacheKind;

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, CacheEntry>) -> T) -> T {
        match self.entries.lock() {
            Ok(mut guard) => f(&mut *guard),
            Err(poisoned) => f(&mut *poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, fingerprint: &str, kind: CacheKind) -> Result<Option<CacheEntry>> {
        Ok(self.with_entries(|entries| {
            entries
                .get(fingerprint)
                .filter(|entry| entry.kind == kind)
                .cloned()
        }))
    }

    async fn upsert(&self, entry: CacheEntry) -> Result<()> {
        self.with_entries(|entries| {
            entries.insert(entry.fingerprint.clone(), entry);
        });
        Ok(())
    }

    async fn delete(&self, fingerprint: &str) -> Result<()> {
        self.with_entries(|entries| {
            entries.remove(fingerprint);
        });
        Ok(())
    }

    async fn delete_by_tag(&self, tag: &str) -> Result<u64> {
        Ok(self.with_entries(|entries| {
            let before = entries.len();
            entries.retain(|_, entry| !entry.invalidation_tags.iter().any(|t| t == tag));
            (before - entries.len()) as u64
        }))
    }

    async fn record_hit(&self, fingerprint: &str, at: DateTime<Utc>) -> Result<()> {
        self.with_entries(|entries| {
            if let Some(entry) = entries.get_mut(fingerprint) {
                entry.hit_count += 1;
                entry.last_accessed_at = Some(at);
            }
        });
        Ok(())
    }

    async fn top_by_hits(
        &self,
        kind: CacheKind,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<CacheEntry>> {
        Ok(self.with_entries(|entries| {
            let mut popular: Vec<CacheEntry> = entries
                .values()
                .filter(|entry| {
                    entry.kind == kind && !entry.is_expired(now) && entry.hit_count > 0
                })
                .cloned()
                .collect();
            popular.sort_by(|a, b| b.hit_count.cmp(&a.hit_count));
            popular.truncate(limit);
            popular
        }))
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        Ok(self.with_entries(|entries| {
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired(now));
            (before - entries.len()) as u64
        }))
    }
}

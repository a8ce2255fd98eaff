//! Idempotency guard
//!
//! A point lookup that lets redelivered "saved" events skip the graph and
//! the index. Entries map `recipe:<externalID>` to a fingerprint of the
//! payload that was last applied, so a redelivery of the same payload is
//! skipped while a revised payload for a known recipe still goes through as
//! an update. This is an optimization: two redeliveries can race past it,
//! and the conditional transaction is what keeps the graph correct.

use crate::recipe::Recipe;
use crate::storage::StorageResult;
use dashmap::DashMap;
use sha2::{Digest, Sha256};

/// Persistence for applied-event fingerprints.
pub trait AppliedLog: Send + Sync {
    fn fingerprint(&self, key: &str) -> StorageResult<Option<String>>;

    fn record(&self, key: &str, fingerprint: &str) -> StorageResult<()>;

    fn forget(&self, key: &str) -> StorageResult<()>;
}

/// In-memory applied log
#[derive(Debug, Default)]
pub struct MemoryAppliedLog {
    entries: DashMap<String, String>,
}

impl MemoryAppliedLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl AppliedLog for MemoryAppliedLog {
    fn fingerprint(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn record(&self, key: &str, fingerprint: &str) -> StorageResult<()> {
        self.entries.insert(key.to_string(), fingerprint.to_string());
        Ok(())
    }

    fn forget(&self, key: &str) -> StorageResult<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Canonical guard key for a recipe.
pub fn recipe_key(external_id: &str) -> String {
    format!("recipe:{}", external_id)
}

/// SHA-256 over the serialized recipe, hex encoded.
pub fn fingerprint(recipe: &Recipe) -> StorageResult<String> {
    let bytes = serde_json::to_vec(recipe)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Guard over an [`AppliedLog`].
pub struct IdempotencyGuard<L: AppliedLog + ?Sized> {
    log: std::sync::Arc<L>,
}

impl<L: AppliedLog + ?Sized> Clone for IdempotencyGuard<L> {
    fn clone(&self) -> Self {
        Self {
            log: self.log.clone(),
        }
    }
}

impl<L: AppliedLog + ?Sized> IdempotencyGuard<L> {
    pub fn new(log: std::sync::Arc<L>) -> Self {
        Self { log }
    }

    /// True if this exact recipe payload was already applied.
    pub fn already_applied(&self, recipe: &Recipe) -> StorageResult<bool> {
        let stored = self.log.fingerprint(&recipe_key(&recipe.external_id))?;
        Ok(match stored {
            Some(stored) => stored == fingerprint(recipe)?,
            None => false,
        })
    }

    /// Record a recipe as applied. Call only after graph and index succeed.
    pub fn mark_applied(&self, recipe: &Recipe) -> StorageResult<()> {
        self.log
            .record(&recipe_key(&recipe.external_id), &fingerprint(recipe)?)
    }

    pub fn forget(&self, external_id: &str) -> StorageResult<()> {
        self.log.forget(&recipe_key(external_id))
    }
}

//! In-memory artifact store

use super::ArtifactStore;
use crate::artifact::{ArtifactHandle, ArtifactKind, Producer};
use crate::error::StorageError;
use crate::hash::ContentHash;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;

/// Process-local store backed by concurrent hash maps
///
/// Blobs are keyed by content digest, so identical content stored under
/// different parent sets is held once.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    records: DashMap<ContentHash, ArtifactHandle>,
    blobs: DashMap<ContentHash, Arc<[u8]>>,
}

impl MemoryArtifactStore {
    /// Create an empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of artifact records
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no artifacts
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of distinct content blobs
    #[inline]
    #[must_use]
    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }
}

#[async_trait::async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(
        &self,
        content: &[u8],
        parents: &[ContentHash],
        kind: ArtifactKind,
        producer: Producer,
    ) -> Result<ArtifactHandle, StorageError> {
        let candidate = ArtifactHandle::describe(content, parents.to_vec(), kind, producer);

        // Parent checks happen before taking the entry lock: a parent may
        // live in the same shard.
        for parent in parents {
            if !self.records.contains_key(parent) {
                return Err(StorageError::MissingParent {
                    child: candidate.hash,
                    parent: *parent,
                });
            }
        }

        self.blobs
            .entry(candidate.content_digest)
            .or_insert_with(|| Arc::from(content));

        match self.records.entry(candidate.hash) {
            Entry::Occupied(existing) => {
                let existing = existing.get();
                if existing.content_digest != candidate.content_digest {
                    return Err(StorageError::IntegrityViolation {
                        hash: candidate.hash,
                        detail: "divergent content under existing artifact hash".to_string(),
                    });
                }
                tracing::trace!(hash = %candidate.hash.short(), "artifact already stored");
                Ok(existing.clone())
            }
            Entry::Vacant(slot) => {
                tracing::debug!(
                    hash = %candidate.hash.short(),
                    kind = %candidate.kind,
                    parents = candidate.parents.len(),
                    "artifact stored"
                );
                slot.insert(candidate.clone());
                Ok(candidate)
            }
        }
    }

    async fn get(&self, hash: &ContentHash) -> Result<Vec<u8>, StorageError> {
        let digest = self
            .records
            .get(hash)
            .map(|r| r.content_digest)
            .ok_or(StorageError::NotFound(*hash))?;
        self.blobs
            .get(&digest)
            .map(|blob| blob.to_vec())
            .ok_or_else(|| StorageError::IntegrityViolation {
                hash: *hash,
                detail: format!("content blob {} missing", digest.short()),
            })
    }

    async fn handle(&self, hash: &ContentHash) -> Result<ArtifactHandle, StorageError> {
        self.records
            .get(hash)
            .map(|r| r.clone())
            .ok_or(StorageError::NotFound(*hash))
    }

    async fn contains(&self, hash: &ContentHash) -> Result<bool, StorageError> {
        Ok(self.records.contains_key(hash))
    }

    async fn list(&self) -> Result<Vec<ArtifactHandle>, StorageError> {
        Ok(self.records.iter().map(|r| r.value().clone()).collect())
    }

    async fn remove(&self, hash: &ContentHash) -> Result<(), StorageError> {
        self.records.remove(hash);
        Ok(())
    }

    async fn prune_blobs(&self) -> Result<usize, StorageError> {
        let referenced: HashSet<ContentHash> =
            self.records.iter().map(|r| r.content_digest).collect();
        let before = self.blobs.len();
        self.blobs.retain(|digest, _| referenced.contains(digest));
        Ok(before - self.blobs.len())
    }
}

//! Artifact store contract and shared traversal
//!
//! [`ArtifactStore`] is the persistence seam. Implementations must:
//! - persist content before returning a handle (write-then-acknowledge)
//! - reject puts whose parents are absent, keeping the graph acyclic
//! - coalesce concurrent writers of the same hash (first writer wins)
//! - treat same-hash, different-content writes as integrity violations

mod fs;
mod memory;

pub use fs::FsArtifactStore;
pub use memory::MemoryArtifactStore;

use crate::artifact::{ArtifactHandle, ArtifactKind, Producer};
use crate::error::StorageError;
use crate::hash::ContentHash;
use std::collections::{BTreeSet, HashSet, VecDeque};

/// Content-addressed artifact storage
#[async_trait::async_trait]
pub trait ArtifactStore: Send + Sync + std::fmt::Debug {
    /// Store content with the given parents, returning its handle
    ///
    /// # Errors
    /// - `MissingParent` if a parent is not stored
    /// - `IntegrityViolation` on divergent content under an existing hash
    /// - `Io` on persistence failure
    async fn put(
        &self,
        content: &[u8],
        parents: &[ContentHash],
        kind: ArtifactKind,
        producer: Producer,
    ) -> Result<ArtifactHandle, StorageError>;

    /// Fetch content by artifact hash
    async fn get(&self, hash: &ContentHash) -> Result<Vec<u8>, StorageError>;

    /// Fetch metadata by artifact hash
    async fn handle(&self, hash: &ContentHash) -> Result<ArtifactHandle, StorageError>;

    /// Whether an artifact exists
    async fn contains(&self, hash: &ContentHash) -> Result<bool, StorageError>;

    /// All stored artifacts (unordered)
    async fn list(&self) -> Result<Vec<ArtifactHandle>, StorageError>;

    /// Remove one artifact record (maintenance only)
    async fn remove(&self, hash: &ContentHash) -> Result<(), StorageError>;

    /// Drop content blobs no artifact references; returns the count removed
    async fn prune_blobs(&self) -> Result<usize, StorageError>;

    /// Recompute the identity of a stored artifact from its content
    async fn verify(&self, hash: &ContentHash) -> Result<(), StorageError> {
        let handle = self.handle(hash).await?;
        let content = self.get(hash).await?;
        if handle.matches(&content) {
            Ok(())
        } else {
            Err(StorageError::IntegrityViolation {
                hash: *hash,
                detail: "stored content does not reproduce artifact hash".to_string(),
            })
        }
    }
}

/// Call-syntax helpers available on every store, including `dyn ArtifactStore`
#[async_trait::async_trait]
pub trait ArtifactStoreExt: ArtifactStore {
    /// Lazy walk over the ancestors of `hash`
    fn ancestors(&self, hash: ContentHash) -> Ancestors<'_, Self> {
        Ancestors::new(self, hash)
    }

    /// Remove every artifact not reachable from `live_heads` through parent edges
    async fn collect_garbage(&self, live_heads: &[ContentHash]) -> Result<GcReport, StorageError> {
        let mut keep: HashSet<ContentHash> = HashSet::new();
        for head in live_heads {
            if !self.contains(head).await? {
                continue;
            }
            keep.insert(*head);
            let mut walk = self.ancestors(*head);
            while let Some(handle) = walk.next().await? {
                keep.insert(handle.hash);
            }
        }

        let mut removed = Vec::new();
        for handle in self.list().await? {
            if !keep.contains(&handle.hash) {
                self.remove(&handle.hash).await?;
                removed.push(handle.hash);
            }
        }
        let blobs_removed = self.prune_blobs().await?;

        tracing::info!(
            retained = keep.len(),
            removed = removed.len(),
            blobs_removed,
            "artifact garbage collection finished"
        );
        Ok(GcReport {
            retained: keep.len(),
            removed,
            blobs_removed,
        })
    }
}

impl<S: ArtifactStore + ?Sized> ArtifactStoreExt for S {}

/// Outcome of a garbage collection pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Artifacts kept
    pub retained: usize,
    /// Artifact hashes removed
    pub removed: Vec<ContentHash>,
    /// Content blobs removed
    pub blobs_removed: usize,
}

/// Lazy, restartable ancestor walk
///
/// Breadth-first over parent edges. Each ancestor is yielded once and the
/// start artifact is never yielded. Order is not topological.
#[derive(Debug)]
pub struct Ancestors<'a, S: ArtifactStore + ?Sized> {
    store: &'a S,
    start: ContentHash,
    queue: VecDeque<ContentHash>,
    seen: BTreeSet<ContentHash>,
    started: bool,
}

impl<'a, S: ArtifactStore + ?Sized> Ancestors<'a, S> {
    /// Begin a walk from `start`
    pub fn new(store: &'a S, start: ContentHash) -> Self {
        Self {
            store,
            start,
            queue: VecDeque::new(),
            seen: BTreeSet::new(),
            started: false,
        }
    }

    /// Reset to the beginning of the walk
    pub fn restart(&mut self) {
        self.queue.clear();
        self.seen.clear();
        self.started = false;
    }

    /// Next ancestor, or `None` when exhausted
    ///
    /// # Errors
    /// `NotFound` if the start artifact or a recorded parent is missing.
    pub async fn next(&mut self) -> Result<Option<ArtifactHandle>, StorageError> {
        if !self.started {
            self.started = true;
            self.seen.insert(self.start);
            let start = self.store.handle(&self.start).await?;
            self.enqueue(&start.parents);
        }

        let Some(hash) = self.queue.pop_front() else {
            return Ok(None);
        };
        let handle = self.store.handle(&hash).await?;
        self.enqueue(&handle.parents);
        Ok(Some(handle))
    }

    /// Drain the remaining ancestors
    pub async fn collect(mut self) -> Result<Vec<ArtifactHandle>, StorageError> {
        let mut out = Vec::new();
        while let Some(handle) = self.next().await? {
            out.push(handle);
        }
        Ok(out)
    }

    fn enqueue(&mut self, parents: &[ContentHash]) {
        for parent in parents {
            if self.seen.insert(*parent) {
                self.queue.push_back(*parent);
            }
        }
    }
}

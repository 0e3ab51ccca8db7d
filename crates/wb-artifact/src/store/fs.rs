//! Filesystem-backed artifact store
//!
//! Layout under the root directory:
//! - `blobs/<content-digest>`: raw content
//! - `artifacts/<artifact-hash>.json`: artifact record (parents index)
//! - `tmp/`: staging area; files are fsynced then renamed into place

use super::ArtifactStore;
use crate::artifact::{ArtifactHandle, ArtifactKind, Producer};
use crate::config::StoreConfig;
use crate::error::StorageError;
use crate::hash::ContentHash;
use dashmap::DashMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Shared by every store in the process so temp names never collide
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Durable store rooted at a directory
#[derive(Debug)]
pub struct FsArtifactStore {
    root: PathBuf,
    verify_on_read: bool,
    /// Per-hash write locks; distinct hashes never contend
    writers: DashMap<ContentHash, Arc<Mutex<()>>>,
}

impl FsArtifactStore {
    /// Open (creating if needed) a store at `root`
    ///
    /// # Errors
    /// Returns `Io` if the directory layout cannot be created
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        Self::with_config(StoreConfig::new(root)).await
    }

    /// Open using a [`StoreConfig`]
    ///
    /// # Errors
    /// Returns `Io` if the directory layout cannot be created
    pub async fn with_config(config: StoreConfig) -> Result<Self, StorageError> {
        let root = config.root;
        for dir in ["blobs", "artifacts", "tmp"] {
            let path = root.join(dir);
            fs::create_dir_all(&path)
                .await
                .map_err(|e| StorageError::io(&path, e))?;
        }
        tracing::info!(root = %root.display(), "opened artifact store");
        Ok(Self {
            root,
            verify_on_read: config.verify_on_read,
            writers: DashMap::new(),
        })
    }

    /// Root directory
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, digest: &ContentHash) -> PathBuf {
        self.root.join("blobs").join(digest.to_string())
    }

    fn record_path(&self, hash: &ContentHash) -> PathBuf {
        self.root.join("artifacts").join(format!("{hash}.json"))
    }

    fn tmp_path(&self) -> PathBuf {
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.root
            .join("tmp")
            .join(format!("{}-{n}.tmp", std::process::id()))
    }

    /// Write `bytes` to `dest` via a synced temp file and rename
    ///
    /// The temp file is removed if any step fails.
    async fn write_durable(&self, dest: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let tmp = self.tmp_path();
        let result = Self::stage(&tmp, dest, bytes).await;
        if result.is_err() {
            if let Err(e) = fs::remove_file(&tmp).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %tmp.display(), error = %e, "failed to remove temp file");
                }
            }
        }
        result
    }

    async fn stage(tmp: &Path, dest: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let mut file = fs::File::create(tmp)
            .await
            .map_err(|e| StorageError::io(tmp, e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| StorageError::io(tmp, e))?;
        file.sync_all().await.map_err(|e| StorageError::io(tmp, e))?;
        drop(file);
        fs::rename(tmp, dest)
            .await
            .map_err(|e| StorageError::io(dest, e))
    }

    async fn read_record(&self, hash: &ContentHash) -> Result<ArtifactHandle, StorageError> {
        let path = self.record_path(hash);
        match fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(*hash))
            }
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    async fn exists(path: &Path) -> Result<bool, StorageError> {
        fs::try_exists(path)
            .await
            .map_err(|e| StorageError::io(path, e))
    }

    async fn put_locked(
        &self,
        content: &[u8],
        candidate: ArtifactHandle,
    ) -> Result<ArtifactHandle, StorageError> {
        match self.read_record(&candidate.hash).await {
            Ok(existing) => {
                if existing.content_digest != candidate.content_digest {
                    return Err(StorageError::IntegrityViolation {
                        hash: candidate.hash,
                        detail: "divergent content under existing artifact hash".to_string(),
                    });
                }
                return Ok(existing);
            }
            Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let blob = self.blob_path(&candidate.content_digest);
        if !Self::exists(&blob).await? {
            self.write_durable(&blob, content).await?;
        }

        // Content is durable before the record makes the artifact visible.
        let record = serde_json::to_vec_pretty(&candidate)?;
        self.write_durable(&self.record_path(&candidate.hash), &record)
            .await?;

        tracing::debug!(
            hash = %candidate.hash.short(),
            kind = %candidate.kind,
            size = candidate.size,
            "artifact persisted"
        );
        Ok(candidate)
    }
}

#[async_trait::async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(
        &self,
        content: &[u8],
        parents: &[ContentHash],
        kind: ArtifactKind,
        producer: Producer,
    ) -> Result<ArtifactHandle, StorageError> {
        let candidate = ArtifactHandle::describe(content, parents.to_vec(), kind, producer);

        for parent in parents {
            if !Self::exists(&self.record_path(parent)).await? {
                return Err(StorageError::MissingParent {
                    child: candidate.hash,
                    parent: *parent,
                });
            }
        }

        let lock = self
            .writers
            .entry(candidate.hash)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _guard = lock.lock().await;
            self.put_locked(content, candidate.clone()).await
        };
        drop(lock);
        // Only the last holder of the lock cleans the slot up.
        self.writers
            .remove_if(&candidate.hash, |_, l| Arc::strong_count(l) == 1);
        result
    }

    async fn get(&self, hash: &ContentHash) -> Result<Vec<u8>, StorageError> {
        let record = self.read_record(hash).await?;
        let path = self.blob_path(&record.content_digest);
        let content = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::IntegrityViolation {
                    hash: *hash,
                    detail: format!("content blob {} missing", record.content_digest.short()),
                })
            }
            Err(e) => return Err(StorageError::io(path, e)),
        };
        if self.verify_on_read && ContentHash::compute(&content) != record.content_digest {
            return Err(StorageError::IntegrityViolation {
                hash: *hash,
                detail: "content blob does not match its digest".to_string(),
            });
        }
        Ok(content)
    }

    async fn handle(&self, hash: &ContentHash) -> Result<ArtifactHandle, StorageError> {
        self.read_record(hash).await
    }

    async fn contains(&self, hash: &ContentHash) -> Result<bool, StorageError> {
        Self::exists(&self.record_path(hash)).await
    }

    async fn list(&self) -> Result<Vec<ArtifactHandle>, StorageError> {
        let dir = self.root.join("artifacts");
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| StorageError::io(&dir, e))?;
        let mut out = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path)
                .await
                .map_err(|e| StorageError::io(&path, e))?;
            out.push(serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }

    async fn remove(&self, hash: &ContentHash) -> Result<(), StorageError> {
        let path = self.record_path(hash);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    async fn prune_blobs(&self) -> Result<usize, StorageError> {
        let referenced: HashSet<String> = self
            .list()
            .await?
            .into_iter()
            .map(|h| h.content_digest.to_string())
            .collect();

        let dir = self.root.join("blobs");
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| StorageError::io(&dir, e))?;
        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !referenced.contains(&name) {
                let path = entry.path();
                fs::remove_file(&path)
                    .await
                    .map_err(|e| StorageError::io(&path, e))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn layout_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path()).await.unwrap();
        assert!(store.root().join("blobs").is_dir());
        assert!(store.root().join("artifacts").is_dir());
    }

    #[tokio::test]
    async fn failed_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path()).await.unwrap();
        let dest = dir.path().join("occupied");
        std::fs::create_dir_all(dest.join("inner")).unwrap();

        assert!(store.write_durable(&dest, b"bytes").await.is_err());
        assert_eq!(std::fs::read_dir(dir.path().join("tmp")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn temp_names_are_unique_across_stores() {
        let dir = tempfile::tempdir().unwrap();
        let a = FsArtifactStore::open(dir.path()).await.unwrap();
        let b = FsArtifactStore::open(dir.path()).await.unwrap();
        assert_ne!(a.tmp_path(), b.tmp_path());
    }

    #[tokio::test]
    async fn record_is_written_with_parents() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path()).await.unwrap();
        let root = store
            .put(b"root", &[], ArtifactKind::Data, Producer::User)
            .await
            .unwrap();
        let child = store
            .put(b"child", &[root.hash], ArtifactKind::Code, Producer::plugin("fmt"))
            .await
            .unwrap();

        let raw = std::fs::read(dir.path().join("artifacts").join(format!("{}.json", child.hash)))
            .unwrap();
        let record: ArtifactHandle = serde_json::from_slice(&raw).unwrap();
        assert_eq!(record.parents, vec![root.hash]);
        assert_eq!(record.producer, Producer::plugin("fmt"));
    }

    #[tokio::test]
    async fn corrupted_blob_is_an_integrity_violation() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path()).await.unwrap();
        let handle = store
            .put(b"pristine", &[], ArtifactKind::Data, Producer::User)
            .await
            .unwrap();
        std::fs::write(store.blob_path(&handle.content_digest), b"tampered").unwrap();

        let err = store.get(&handle.hash).await.unwrap_err();
        assert!(matches!(err, StorageError::IntegrityViolation { .. }));
    }
}

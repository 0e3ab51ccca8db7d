//! Filesystem invocation log
//!
//! Layout under the root directory:
//! - `records/<seq:020>.json`: one record per file
//! - `index/artifact/<hash>`: newline-separated sequence numbers
//! - `index/plugin/<plugin-id>`: newline-separated sequence numbers
//! - `tmp/`: staging for record writes
//!
//! Records are written before their index lines, so an index never points
//! at a missing record.

use super::InvocationLog;
use crate::error::LogError;
use crate::record::InvocationRecord;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use wb_artifact::ContentHash;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Durable log rooted at a directory
#[derive(Debug)]
pub struct FsInvocationLog {
    root: PathBuf,
    next_seq: AtomicU64,
    index_lock: Mutex<()>,
}

impl FsInvocationLog {
    /// Open (creating if needed) a log at `root`
    ///
    /// Only record file names are scanned to restore the sequence counter.
    ///
    /// # Errors
    /// `Io` if the layout cannot be created, `Corrupt` on foreign files in
    /// `records/`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, LogError> {
        let root = root.into();
        for dir in ["records", "index/artifact", "index/plugin", "tmp"] {
            let path = root.join(dir);
            fs::create_dir_all(&path)
                .await
                .map_err(|e| LogError::io(&path, e))?;
        }
        let last = record_seqs(&root.join("records")).await?.into_iter().max();
        let next = last.map_or(1, |s| s + 1);
        tracing::info!(root = %root.display(), next_seq = next, "opened invocation log");
        Ok(Self {
            root,
            next_seq: AtomicU64::new(next),
            index_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, seq: u64) -> PathBuf {
        self.root.join("records").join(format!("{seq:020}.json"))
    }

    fn artifact_index(&self, hash: &ContentHash) -> PathBuf {
        self.root.join("index/artifact").join(hash.to_string())
    }

    fn plugin_index(&self, plugin_id: &str) -> PathBuf {
        self.root.join("index/plugin").join(sanitize(plugin_id))
    }

    fn tmp_path(&self) -> PathBuf {
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.root
            .join("tmp")
            .join(format!("{}-{n}.tmp", std::process::id()))
    }

    /// Stage, sync and rename into `records/`; the temp file is removed on
    /// failure
    async fn write_record(&self, record: &InvocationRecord) -> Result<(), LogError> {
        let bytes = serde_json::to_vec_pretty(record)?;
        let tmp = self.tmp_path();
        let dest = self.record_path(record.seq);
        let result = Self::stage(&tmp, &dest, &bytes).await;
        if result.is_err() {
            if let Err(e) = fs::remove_file(&tmp).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %tmp.display(), error = %e, "failed to remove temp file");
                }
            }
        }
        result
    }

    async fn stage(tmp: &Path, dest: &Path, bytes: &[u8]) -> Result<(), LogError> {
        let mut file = fs::File::create(tmp)
            .await
            .map_err(|e| LogError::io(tmp, e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| LogError::io(tmp, e))?;
        file.sync_all().await.map_err(|e| LogError::io(tmp, e))?;
        drop(file);
        fs::rename(tmp, dest)
            .await
            .map_err(|e| LogError::io(dest, e))
    }

    async fn append_index(path: &Path, seq: u64) -> Result<(), LogError> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| LogError::io(path, e))?;
        file.write_all(format!("{seq}\n").as_bytes())
            .await
            .map_err(|e| LogError::io(path, e))?;
        file.sync_data().await.map_err(|e| LogError::io(path, e))
    }

    async fn read_index(path: &Path) -> Result<Vec<u64>, LogError> {
        let text = match fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(LogError::io(path, e)),
        };
        let mut seqs = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| {
                l.trim().parse::<u64>().map_err(|e| LogError::Corrupt {
                    path: path.to_path_buf(),
                    detail: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        seqs.sort_unstable();
        seqs.dedup();
        Ok(seqs)
    }

    async fn load(&self, seqs: Vec<u64>) -> Result<Vec<InvocationRecord>, LogError> {
        let mut out = Vec::with_capacity(seqs.len());
        for seq in seqs {
            out.push(self.get(seq).await?);
        }
        Ok(out)
    }
}

/// Plugin ids become file names; anything outside `[A-Za-z0-9._-]` maps to `_`
fn sanitize(plugin_id: &str) -> String {
    plugin_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

async fn record_seqs(dir: &Path) -> Result<Vec<u64>, LogError> {
    let mut entries = fs::read_dir(dir).await.map_err(|e| LogError::io(dir, e))?;
    let mut seqs = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| LogError::io(dir, e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        let seq = name
            .strip_suffix(".json")
            .and_then(|stem| stem.parse::<u64>().ok())
            .ok_or_else(|| LogError::Corrupt {
                path: entry.path(),
                detail: "expected <seq>.json".to_string(),
            })?;
        seqs.push(seq);
    }
    seqs.sort_unstable();
    Ok(seqs)
}

#[async_trait::async_trait]
impl InvocationLog for FsInvocationLog {
    async fn append(&self, mut record: InvocationRecord) -> Result<InvocationRecord, LogError> {
        record.seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.write_record(&record).await?;

        let _guard = self.index_lock.lock().await;
        for hash in record.artifacts() {
            Self::append_index(&self.artifact_index(&hash), record.seq).await?;
        }
        if let Some(plugin) = record.plugin_id() {
            Self::append_index(&self.plugin_index(plugin), record.seq).await?;
        }
        tracing::debug!(seq = record.seq, "appended invocation record");
        Ok(record)
    }

    async fn get(&self, seq: u64) -> Result<InvocationRecord, LogError> {
        let path = self.record_path(seq);
        match fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(LogError::RecordNotFound(seq)),
            Err(e) => Err(LogError::io(path, e)),
        }
    }

    async fn by_artifact(&self, hash: &ContentHash) -> Result<Vec<InvocationRecord>, LogError> {
        let seqs = Self::read_index(&self.artifact_index(hash)).await?;
        self.load(seqs).await
    }

    async fn by_plugin(&self, plugin_id: &str) -> Result<Vec<InvocationRecord>, LogError> {
        let seqs = Self::read_index(&self.plugin_index(plugin_id)).await?;
        let records = self.load(seqs).await?;
        // Sanitized names can collide.
        Ok(records
            .into_iter()
            .filter(|r| r.plugin_id() == Some(plugin_id))
            .collect())
    }

    async fn records(&self) -> Result<Vec<InvocationRecord>, LogError> {
        let seqs = record_seqs(&self.root.join("records")).await?;
        self.load(seqs).await
    }

    async fn len(&self) -> Result<usize, LogError> {
        Ok(record_seqs(&self.root.join("records")).await?.len())
    }
}

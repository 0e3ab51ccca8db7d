//! In-memory invocation log

use super::InvocationLog;
use crate::error::LogError;
use crate::record::InvocationRecord;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use wb_artifact::ContentHash;

/// Process-local log; lost on exit
#[derive(Debug)]
pub struct MemoryInvocationLog {
    records: RwLock<BTreeMap<u64, InvocationRecord>>,
    next_seq: AtomicU64,
    by_artifact: DashMap<ContentHash, Vec<u64>>,
    by_plugin: DashMap<String, Vec<u64>>,
}

impl Default for MemoryInvocationLog {
    fn default() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            next_seq: AtomicU64::new(1),
            by_artifact: DashMap::new(),
            by_plugin: DashMap::new(),
        }
    }
}

impl MemoryInvocationLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn collect(&self, mut seqs: Vec<u64>) -> Vec<InvocationRecord> {
        seqs.sort_unstable();
        seqs.dedup();
        let records = self.records.read();
        seqs.iter().filter_map(|s| records.get(s).cloned()).collect()
    }
}

#[async_trait::async_trait]
impl InvocationLog for MemoryInvocationLog {
    async fn append(&self, mut record: InvocationRecord) -> Result<InvocationRecord, LogError> {
        record.seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.records.write().insert(record.seq, record.clone());
        for hash in record.artifacts() {
            self.by_artifact.entry(hash).or_default().push(record.seq);
        }
        if let Some(plugin) = record.plugin_id() {
            self.by_plugin
                .entry(plugin.to_string())
                .or_default()
                .push(record.seq);
        }
        Ok(record)
    }

    async fn get(&self, seq: u64) -> Result<InvocationRecord, LogError> {
        self.records
            .read()
            .get(&seq)
            .cloned()
            .ok_or(LogError::RecordNotFound(seq))
    }

    async fn by_artifact(&self, hash: &ContentHash) -> Result<Vec<InvocationRecord>, LogError> {
        let seqs = self
            .by_artifact
            .get(hash)
            .map(|s| s.value().clone())
            .unwrap_or_default();
        Ok(self.collect(seqs))
    }

    async fn by_plugin(&self, plugin_id: &str) -> Result<Vec<InvocationRecord>, LogError> {
        let seqs = self
            .by_plugin
            .get(plugin_id)
            .map(|s| s.value().clone())
            .unwrap_or_default();
        Ok(self.collect(seqs))
    }

    async fn records(&self) -> Result<Vec<InvocationRecord>, LogError> {
        Ok(self.records.read().values().cloned().collect())
    }

    async fn len(&self) -> Result<usize, LogError> {
        Ok(self.records.read().len())
    }
}

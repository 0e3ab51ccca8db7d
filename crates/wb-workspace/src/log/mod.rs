//! Append-only invocation record log
//!
//! Sequence numbers start at 1, are assigned atomically on append and never
//! reused. Both backends index records by every artifact they mention
//! (inputs and outputs) and by producing plugin.

mod fs;
mod memory;

pub use fs::FsInvocationLog;
pub use memory::MemoryInvocationLog;

use crate::error::LogError;
use crate::record::InvocationRecord;
use wb_artifact::ContentHash;

/// Invocation record persistence
#[async_trait::async_trait]
pub trait InvocationLog: Send + Sync + std::fmt::Debug {
    /// Assign the next sequence number and persist; returns the stored record
    async fn append(&self, record: InvocationRecord) -> Result<InvocationRecord, LogError>;

    /// Fetch one record
    ///
    /// # Errors
    /// `RecordNotFound` if no record has this sequence number
    async fn get(&self, seq: u64) -> Result<InvocationRecord, LogError>;

    /// Records mentioning `hash` as input or output, ordered by sequence
    async fn by_artifact(&self, hash: &ContentHash) -> Result<Vec<InvocationRecord>, LogError>;

    /// Records produced by `plugin_id`, ordered by sequence
    async fn by_plugin(&self, plugin_id: &str) -> Result<Vec<InvocationRecord>, LogError>;

    /// Every record, ordered by sequence
    async fn records(&self) -> Result<Vec<InvocationRecord>, LogError>;

    /// Number of records appended
    async fn len(&self) -> Result<usize, LogError>;
}

//! Configuration for library indexing behavior.

/// Configuration for library indexing behavior.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Maximum number of concurrent metadata extraction tasks.
    pub max_concurrent_metadata_tasks: usize,
    /// Number of songs written per database transaction.
    pub batch_size: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_metadata_tasks: 4,
            batch_size: 200,
        }
    }
}

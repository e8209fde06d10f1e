/// Run-time storage configuration (no hidden constants).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Vectors per column segment. Each segment then holds
    /// `segment_vectors * STANDARD_VECTOR_SIZE` rows.
    pub segment_vectors: usize,
    /// Skip segments whose min/max statistics rule out every filter match.
    pub zonemap_pruning: bool,
    /// Vectors handed out per parallel scan morsel.
    pub parallel_scan_vector_count: usize,
    /// Hand out one vector per morsel regardless of table size.
    pub force_parallelism: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            segment_vectors: 16,
            zonemap_pruning: true,
            parallel_scan_vector_count: 100,
            force_parallelism: false,
        }
    }
}

impl StorageConfig {
    /// Rows per parallel scan morsel.
    pub fn morsel_rows(&self) -> u64 {
        let vectors = if self.force_parallelism {
            1
        } else {
            self.parallel_scan_vector_count.max(1)
        };
        (vectors * strata_types::STANDARD_VECTOR_SIZE) as u64
    }
}

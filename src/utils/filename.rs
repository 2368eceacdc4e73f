use crate::models::{BufferKey, PartitionKey, ResultKey, ZoneId};
use crate::utils::constants::{
    BUFFER_DIR, FINAL_TABLE_STEM, HEARTBEAT_FILE, MONITOR_TABLE_STEM, TEMP_STATS_DIR,
    ZONAL_STATS_DIR, ZONED_TABLE_STEM, ZONE_SUBSET_DIR, ZONE_TABLE_STEM,
};
use std::path::{Path, PathBuf};

/// Paths of everything the pipeline persists under the results folder.
///
/// Every path a job writes is namespaced by partition, radius and variable,
/// which is what lets jobs run concurrently without locks.
#[derive(Debug, Clone)]
pub struct ResultsLayout {
    root: PathBuf,
    table_ext: &'static str,
}

impl ResultsLayout {
    pub fn new(root: impl Into<PathBuf>, table_ext: &'static str) -> Self {
        Self {
            root: root.into(),
            table_ext,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn table_ext(&self) -> &'static str {
        self.table_ext
    }

    fn table(&self, dir: &Path, stem: &str) -> PathBuf {
        dir.join(format!("{}.{}", stem, self.table_ext))
    }

    pub fn monitor_table(&self) -> PathBuf {
        self.table(&self.root, MONITOR_TABLE_STEM)
    }

    pub fn zone_table(&self) -> PathBuf {
        self.table(&self.root, ZONE_TABLE_STEM)
    }

    pub fn zoned_table(&self) -> PathBuf {
        self.table(&self.root, ZONED_TABLE_STEM)
    }

    /// Monitors of one zone, before slicing into partitions
    pub fn zone_subset(&self, zone: ZoneId) -> PathBuf {
        self.table(&self.root.join(ZONE_SUBSET_DIR), &format!("zone{}", zone))
    }

    pub fn partition_dir(&self, key: &PartitionKey) -> PathBuf {
        self.root.join(key.name())
    }

    pub fn partition_table(&self, key: &PartitionKey) -> PathBuf {
        self.table(&self.partition_dir(key), &key.name())
    }

    pub fn buffer_dir(&self, key: &PartitionKey) -> PathBuf {
        self.partition_dir(key).join(BUFFER_DIR)
    }

    /// `buffers/buffer{radius}m`
    pub fn buffer_table(&self, key: &BufferKey) -> PathBuf {
        self.table(
            &self.buffer_dir(&key.partition),
            &format!("buffer{}m", key.radius_m),
        )
    }

    /// Private buffer copy for one job: `buffers/buffer{field}`
    pub fn job_buffer_copy(&self, key: &ResultKey) -> PathBuf {
        self.table(
            &self.buffer_dir(&key.partition),
            &format!("buffer{}", key.field_name()),
        )
    }

    pub fn variable_dir(&self, partition: &PartitionKey, code: &str) -> PathBuf {
        self.partition_dir(partition).join(code)
    }

    pub fn intersect_table(&self, key: &ResultKey) -> PathBuf {
        self.table(&self.variable_dir(&key.partition, &key.code), &key.field_name())
    }

    /// Dissolved variant, suffixed `d`
    pub fn dissolved_table(&self, key: &ResultKey) -> PathBuf {
        self.table(
            &self.variable_dir(&key.partition, &key.code),
            &format!("{}d", key.field_name()),
        )
    }

    pub fn temp_stats_root(&self) -> PathBuf {
        self.root.join(TEMP_STATS_DIR)
    }

    pub fn zonal_workspace(&self, key: &ResultKey) -> PathBuf {
        self.temp_stats_root()
            .join(key.scratch_name())
            .join(ZONAL_STATS_DIR)
    }

    pub fn heartbeat(&self) -> PathBuf {
        self.temp_stats_root().join(HEARTBEAT_FILE)
    }

    pub fn final_table(&self) -> PathBuf {
        self.table(&self.root, FINAL_TABLE_STEM)
    }

    pub fn final_parquet(&self) -> PathBuf {
        self.root.join(format!("{}.parquet", FINAL_TABLE_STEM))
    }
}

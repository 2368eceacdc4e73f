use crate::error::{ProcessingError, Result};
use crate::geometry::GeometryService;
use crate::models::{FeatureTable, PartitionKey, ZoneId};
use crate::utils::filename::ResultsLayout;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// A bounded, single-zone slice of the monitor table persisted as its own table.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub key: PartitionKey,
    pub table: PathBuf,
    pub len: usize,
}

impl Partition {
    pub fn zone(&self) -> ZoneId {
        self.key.zone
    }
}

pub struct Partitioner {
    engine: Arc<dyn GeometryService>,
    partition_size: usize,
    zone_field: String,
}

impl Partitioner {
    pub fn new(
        engine: Arc<dyn GeometryService>,
        partition_size: usize,
        zone_field: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            partition_size,
            zone_field: zone_field.into(),
        }
    }

    /// Distinct zones of a zoned table in ascending order.
    ///
    /// Every row must carry an integer zone value.
    pub fn zones(&self, zoned: &Path) -> Result<Vec<ZoneId>> {
        let table = self.engine.read_table(zoned)?;
        self.zones_of(&table, zoned)
    }

    fn zones_of(&self, table: &FeatureTable, path: &Path) -> Result<Vec<ZoneId>> {
        if !table.has_field(&self.zone_field) {
            return Err(self.zone_error(path, "field not present".to_string()));
        }

        let mut zones = BTreeSet::new();
        for (row, value) in table.values(&self.zone_field).enumerate() {
            match value.as_i64() {
                Some(zone) => {
                    zones.insert(ZoneId(zone));
                }
                None if value.is_null() => {
                    return Err(self.zone_error(path, format!("row {} has no zone", row)));
                }
                None => {
                    return Err(self.zone_error(
                        path,
                        format!("row {} has non-integer zone {:?}", row, value),
                    ));
                }
            }
        }
        Ok(zones.into_iter().collect())
    }

    fn zone_error(&self, path: &Path, reason: String) -> ProcessingError {
        ProcessingError::ZoneField {
            field: self.zone_field.clone(),
            path: path.to_path_buf(),
            reason,
        }
    }

    /// Split the zoned monitor table into partitions of at most `partition_size` rows.
    ///
    /// Zones are visited in ascending order and rows keep their input order, so
    /// the same input always yields the same partitions.
    pub fn partition(&self, zoned: &Path, layout: &ResultsLayout) -> Result<Vec<Partition>> {
        if self.partition_size == 0 {
            return Err(ProcessingError::Config(
                "partition size must be at least 1".to_string(),
            ));
        }

        let zones = self.zones(zoned)?;
        let mut partitions = Vec::new();

        for zone in zones {
            let subset_path = layout.zone_subset(zone);
            let selected = self
                .engine
                .select(zoned, &self.zone_field, zone.0, &subset_path)?;
            if selected == 0 {
                continue;
            }

            let subset = self.engine.read_table(&subset_path)?;
            for (index, chunk) in subset.features.chunks(self.partition_size).enumerate() {
                let key = PartitionKey::new(zone, index);
                let mut table = FeatureTable::new(subset.fields.clone());
                table.features = chunk.to_vec();
                table.renumber();

                let path = layout.partition_table(&key);
                self.engine.write_table(&path, &table)?;
                debug!("Wrote {} with {} monitors", key, table.len());

                partitions.push(Partition {
                    key,
                    table: path,
                    len: table.len(),
                });
            }
        }

        let total: usize = partitions.iter().map(|p| p.len).sum();
        info!(
            partitions = partitions.len(),
            monitors = total,
            "Partitioned monitors by {}",
            self.zone_field
        );
        Ok(partitions)
    }

    /// Partitions already present under the results folder, recovered from folder names.
    pub fn discover(&self, layout: &ResultsLayout) -> Result<Vec<Partition>> {
        if !layout.root().exists() {
            return Ok(Vec::new());
        }

        let mut partitions = Vec::new();
        for entry in fs::read_dir(layout.root())? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(key) = PartitionKey::from_name(&name.to_string_lossy()) else {
                continue;
            };
            let table = layout.partition_table(&key);
            if !table.exists() {
                continue;
            }
            let len = self.engine.count(&table)?;
            partitions.push(Partition { key, table, len });
        }

        partitions.sort_by_key(|p| p.key);
        Ok(partitions)
    }
}

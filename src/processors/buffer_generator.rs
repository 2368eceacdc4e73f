use crate::error::Result;
use crate::geometry::GeometryService;
use crate::models::BufferKey;
use crate::processors::partitioner::Partition;
use crate::utils::filename::ResultsLayout;
use rayon::prelude::*;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Buffer polygons of one partition at one radius.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferSet {
    pub key: BufferKey,
    pub path: PathBuf,
}

pub struct BufferGenerator {
    engine: Arc<dyn GeometryService>,
    distances: Vec<u32>,
}

impl BufferGenerator {
    pub fn new(engine: Arc<dyn GeometryService>, distances: &[u32]) -> Self {
        Self {
            engine,
            distances: distances.to_vec(),
        }
    }

    /// One buffer table per configured radius, overwriting earlier runs.
    pub fn generate(&self, partition: &Partition, layout: &ResultsLayout) -> Result<Vec<BufferSet>> {
        fs::create_dir_all(layout.buffer_dir(&partition.key))?;

        let mut sets = Vec::with_capacity(self.distances.len());
        for &radius in &self.distances {
            let key = BufferKey::new(partition.key, radius);
            let path = layout.buffer_table(&key);
            if path.exists() {
                warn!(
                    partition = %partition.key,
                    radius,
                    "overwriting existing buffer set"
                );
            }

            self.engine.buffer(&partition.table, f64::from(radius), &path)?;
            sets.push(BufferSet { key, path });
        }
        Ok(sets)
    }

    /// Buffer every partition in parallel; the first failure aborts the run.
    pub fn generate_all(
        &self,
        partitions: &[Partition],
        layout: &ResultsLayout,
    ) -> Result<Vec<BufferSet>> {
        let nested: Result<Vec<Vec<BufferSet>>> = partitions
            .par_iter()
            .map(|partition| self.generate(partition, layout))
            .collect();

        let sets: Vec<BufferSet> = nested?.into_iter().flatten().collect();
        info!(
            "Generated {} buffer sets for {} partitions",
            sets.len(),
            partitions.len()
        );
        Ok(sets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PlanarEngine;
    use crate::models::{Feature, FeatureTable, PartitionKey, ZoneId};
    use crate::utils::constants::ORIG_FID_FIELD;
    use geo_types::Point;
    use tempfile::TempDir;

    fn partition(engine: &dyn GeometryService, layout: &ResultsLayout, index: usize) -> Partition {
        let key = PartitionKey::new(ZoneId(1), index);
        let mut table = FeatureTable::new(vec![]);
        for i in 0..3 {
            table.push(Feature::new(Some(Point::new(i as f64 * 1000.0, 0.0).into())));
        }
        table.renumber();
        let path = layout.partition_table(&key);
        engine.write_table(&path, &table).unwrap();
        Partition {
            key,
            table: path,
            len: 3,
        }
    }

    #[test]
    fn test_one_buffer_file_per_radius() -> Result<()> {
        let dir = TempDir::new()?;
        let engine = Arc::new(PlanarEngine::new());
        let layout = ResultsLayout::new(dir.path(), "json");
        let partition = partition(engine.as_ref(), &layout, 0);

        let generator = BufferGenerator::new(engine.clone(), &[100, 500]);
        let sets = generator.generate(&partition, &layout)?;

        assert_eq!(sets.len(), 2);
        assert!(sets.iter().all(|s| s.path.exists()));
        assert_eq!(fs::read_dir(layout.buffer_dir(&partition.key))?.count(), 2);

        let table = engine.read_table(&sets[1].path)?;
        assert_eq!(table.len(), 3);
        let back_refs: Vec<i64> = table
            .values(ORIG_FID_FIELD)
            .filter_map(|v| v.as_i64())
            .collect();
        assert_eq!(back_refs, vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn test_regeneration_overwrites() -> Result<()> {
        let dir = TempDir::new()?;
        let engine = Arc::new(PlanarEngine::new());
        let layout = ResultsLayout::new(dir.path(), "json");
        let partition = partition(engine.as_ref(), &layout, 0);
        let generator = BufferGenerator::new(engine.clone(), &[250]);

        let first = generator.generate(&partition, &layout)?;
        let second = generator.generate(&partition, &layout)?;
        assert_eq!(first, second);
        assert_eq!(fs::read_dir(layout.buffer_dir(&partition.key))?.count(), 1);
        assert_eq!(engine.count(&second[0].path)?, 3);
        Ok(())
    }

    #[test]
    fn test_generate_all_partitions() -> Result<()> {
        let dir = TempDir::new()?;
        let engine = Arc::new(PlanarEngine::new());
        let layout = ResultsLayout::new(dir.path(), "json");
        let partitions: Vec<Partition> = (0..4)
            .map(|i| partition(engine.as_ref(), &layout, i))
            .collect();

        let generator = BufferGenerator::new(engine.clone(), &[100, 500, 1000]);
        let sets = generator.generate_all(&partitions, &layout)?;
        assert_eq!(sets.len(), 12);
        Ok(())
    }
}

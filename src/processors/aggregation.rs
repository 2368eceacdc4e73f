use crate::error::Result;
use crate::geometry::GeometryService;
use crate::models::JobArgument;
use crate::utils::constants::ROW_ID_FIELD;
use std::sync::Arc;
use tracing::debug;

/// Copies each job's result field into its partition table.
pub struct AggregationJoin {
    engine: Arc<dyn GeometryService>,
}

impl AggregationJoin {
    pub fn new(engine: Arc<dyn GeometryService>) -> Self {
        Self { engine }
    }

    /// Join every result field into its job's partition table, matching the
    /// job's key field to the partition `FID`.
    ///
    /// Monitors without a matching result row get null. Returns the number of fields joined.
    pub fn join_all(&self, jobs: &[JobArgument]) -> Result<usize> {
        for job in jobs {
            let field = job.field_name();
            self.engine.join_field(
                &job.partition_file,
                ROW_ID_FIELD,
                &job.result_table,
                job.join_key(),
                &field,
            )?;
            debug!("Joined {} into {}", field, job.partition_file.display());
        }
        Ok(jobs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PlanarEngine;
    use crate::models::{
        AttrValue, Feature, FeatureTable, PartitionKey, ResultKey, VariableType, ZoneId,
    };
    use crate::utils::constants::{BUFFER_ID_FIELD, ORIG_FID_FIELD};
    use pretty_assertions::assert_eq;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn job(dir: &Path, kind: VariableType, code: &str) -> JobArgument {
        let key = ResultKey::new(PartitionKey::new(ZoneId(1), 0), Some(500), code);
        let table = dir.join(format!("{}.json", key.field_name()));
        JobArgument {
            kind,
            buffer_file: PathBuf::new(),
            variable_file: PathBuf::new(),
            output_folder: dir.to_path_buf(),
            partition_file: dir.join("partition.json"),
            intersect_table: table.clone(),
            result_table: table,
            workspace: None,
            sum_field: None,
            key,
        }
    }

    #[test]
    fn test_join_by_type_specific_keys() -> Result<()> {
        let dir = TempDir::new()?;
        let engine = Arc::new(PlanarEngine::new());
        let partition = dir.path().join("partition.json");

        let mut monitors = FeatureTable::new(vec![]);
        for _ in 0..3 {
            monitors.push(Feature::new(None));
        }
        monitors.renumber();
        engine.write_table(&partition, &monitors)?;

        // Zonal rows arrive out of order, keyed by ORIG_FID
        let raster = job(dir.path(), VariableType::Raster, "N6");
        let mut zonal = FeatureTable::new(vec![ORIG_FID_FIELD.to_string(), raster.field_name()]);
        for (orig, value) in [(2_i64, 30.0), (0, 10.0), (1, 20.0)] {
            zonal.push(
                Feature::new(None)
                    .with_attr(ORIG_FID_FIELD, orig)
                    .with_attr(&raster.field_name(), value),
            );
        }
        engine.write_table(&raster.result_table, &zonal)?;

        // Only the middle buffer touches a road
        let roads = job(dir.path(), VariableType::Polyline, "rd");
        let mut dissolved = FeatureTable::new(vec![BUFFER_ID_FIELD.to_string(), roads.field_name()]);
        dissolved.push(
            Feature::new(None)
                .with_attr(BUFFER_ID_FIELD, 1_i64)
                .with_attr(&roads.field_name(), 0.75),
        );
        engine.write_table(&roads.result_table, &dissolved)?;

        let joined = AggregationJoin::new(engine.clone()).join_all(&[raster, roads])?;
        assert_eq!(joined, 2);

        let table = engine.read_table(&partition)?;
        assert_eq!(table.fields, vec!["FID", "N6500m", "rd500m"]);
        let n6: Vec<_> = table.values("N6500m").cloned().collect();
        assert_eq!(n6, vec![AttrValue::Float(10.0), AttrValue::Float(20.0), AttrValue::Float(30.0)]);
        let rd: Vec<_> = table.values("rd500m").cloned().collect();
        assert_eq!(rd, vec![AttrValue::Null, AttrValue::Float(0.75), AttrValue::Null]);
        Ok(())
    }
}

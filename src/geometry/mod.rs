//! Geometry capability contract consumed by the pipeline.
//!
//! Every operation is file-in/file-out so that concurrent jobs coordinate purely
//! through distinct paths. [`PlanarEngine`] is the in-process implementation.

pub mod planar;
pub mod raster;

pub use planar::PlanarEngine;
pub use raster::{GridRaster, RasterInfo};

use crate::error::Result;
use crate::models::{FeatureTable, LayerKind};
use std::path::{Path, PathBuf};

/// Aggregation applied to features sharing a dissolve key.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregate {
    None,
    /// Sum a numeric field into `SUM_{field}`
    Sum(String),
}

/// Right-hand side of a field calculation.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldExpr {
    /// Copy another field's value
    Field(String),
    Constant(f64),
    /// Planar length of the feature geometry in kilometres
    LengthKm,
}

pub trait GeometryService: Send + Sync {
    /// File extension (without dot) used for layers of the given kind.
    fn extension(&self, kind: LayerKind) -> &'static str;

    fn read_table(&self, path: &Path) -> Result<FeatureTable>;

    /// Write a table, replacing any previous file at `path`.
    fn write_table(&self, path: &Path, table: &FeatureTable) -> Result<()>;

    /// Attach to every point the attribute `zone_field` of its nearest zone feature.
    fn spatial_join_nearest(
        &self,
        points: &Path,
        zones: &Path,
        zone_field: &str,
        output: &Path,
    ) -> Result<()>;

    /// Copy the features whose integer `field` equals `value`, in input order.
    ///
    /// Returns the number of selected features.
    fn select(&self, input: &Path, field: &str, value: i64, output: &Path) -> Result<usize>;

    /// Full, round-capped, non-dissolved buffers carrying `ORIG_FID` back-references.
    fn buffer(&self, points: &Path, radius_m: f64, output: &Path) -> Result<()>;

    /// Clip `layer` features to each polygon; output rows carry `FID_buffer`.
    fn intersect(&self, polygons: &Path, layer: &Path, output: &Path) -> Result<()>;

    fn dissolve_by(
        &self,
        input: &Path,
        key: &str,
        aggregate: &Aggregate,
        output: &Path,
    ) -> Result<()>;

    /// Mean raster value per zone polygon, written as `{prefix}_MEAN`.
    ///
    /// Overlapping zones are evaluated independently. `workspace` is private
    /// scratch space owned by the caller.
    fn zonal_statistics(
        &self,
        zones: &Path,
        zone_field: &str,
        raster: &Path,
        prefix: &str,
        output: &Path,
        workspace: &Path,
    ) -> Result<()>;

    /// Copy of `points` with the raster value at each point in `RASTERVALU`.
    fn extract_values_to_points(&self, points: &Path, raster: &Path, output: &Path)
        -> Result<()>;

    /// Load raster metadata; fails when the raster cannot be opened.
    fn describe_raster(&self, raster: &Path) -> Result<RasterInfo>;

    fn calculate_field(&self, table: &Path, field: &str, expr: &FieldExpr) -> Result<()>;

    /// Copy `field` from `source` into `target`, matching `target_key` to `source_key`.
    fn join_field(
        &self,
        target: &Path,
        target_key: &str,
        source: &Path,
        source_key: &str,
        field: &str,
    ) -> Result<()>;

    /// Concatenate tables; the output schema is the union of the input schemas.
    fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<()>;

    fn count(&self, path: &Path) -> Result<usize> {
        Ok(self.read_table(path)?.len())
    }

    fn list_fields(&self, path: &Path) -> Result<Vec<String>> {
        Ok(self.read_table(path)?.fields)
    }

    fn add_field(&self, path: &Path, field: &str) -> Result<()> {
        let mut table = self.read_table(path)?;
        table.add_field(field);
        self.write_table(path, &table)
    }

    fn copy_features(&self, input: &Path, output: &Path) -> Result<()> {
        let table = self.read_table(input)?;
        self.write_table(output, &table)
    }
}

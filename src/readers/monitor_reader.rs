use crate::error::{ProcessingError, Result};
use crate::models::{AttrValue, Feature, FeatureTable};
use crate::utils::constants::{MONITOR_ID_FIELD, ROW_ID_FIELD};
use geo_types::Point;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use tracing::{debug, warn};

/// One row of the monitor CSV: `id,x,y` in projected metres.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MonitorRecord {
    pub id: i64,
    pub x: f64,
    pub y: f64,
}

/// One row of the zone definition CSV: `zone,x,y`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ZoneRecord {
    pub zone: i64,
    pub x: f64,
    pub y: f64,
}

pub struct SiteReader {
    skip_invalid: bool,
}

impl SiteReader {
    pub fn new() -> Self {
        Self {
            skip_invalid: false,
        }
    }

    /// Drop rows with non-finite coordinates instead of failing the read
    pub fn with_skip_invalid(mut self, skip_invalid: bool) -> Self {
        self.skip_invalid = skip_invalid;
        self
    }

    pub fn read_monitors(&self, path: &Path) -> Result<Vec<MonitorRecord>> {
        let records: Vec<MonitorRecord> = self.read_rows(path, |r: &MonitorRecord| (r.x, r.y))?;

        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            if !seen.insert(record.id) {
                warn!(id = record.id, path = %path.display(), "duplicate monitor id");
            }
        }

        debug!("Read {} monitors from {}", records.len(), path.display());
        Ok(records)
    }

    pub fn read_zones(&self, path: &Path) -> Result<Vec<ZoneRecord>> {
        let records: Vec<ZoneRecord> = self.read_rows(path, |r: &ZoneRecord| (r.x, r.y))?;
        debug!("Read {} zone seeds from {}", records.len(), path.display());
        Ok(records)
    }

    fn read_rows<T, F>(&self, path: &Path, coords: F) -> Result<Vec<T>>
    where
        T: for<'de> Deserialize<'de>,
        F: Fn(&T) -> (f64, f64),
    {
        let file = File::open(path).map_err(|e| {
            ProcessingError::MissingData(format!("Cannot open {}: {}", path.display(), e))
        })?;
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(file);

        let mut rows = Vec::new();
        for (line, result) in reader.deserialize::<T>().enumerate() {
            let row = result?;
            let (x, y) = coords(&row);
            if !x.is_finite() || !y.is_finite() {
                if self.skip_invalid {
                    warn!(line = line + 2, path = %path.display(), "skipping row with invalid coordinates");
                    continue;
                }
                return Err(ProcessingError::InvalidFormat(format!(
                    "Invalid coordinates on line {} of {}",
                    line + 2,
                    path.display()
                )));
            }
            rows.push(row);
        }

        Ok(rows)
    }
}

impl Default for SiteReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Point table of monitors, `FID` numbered in file order.
pub fn monitors_to_table(records: &[MonitorRecord]) -> FeatureTable {
    let mut table = FeatureTable::new(vec![
        ROW_ID_FIELD.to_string(),
        MONITOR_ID_FIELD.to_string(),
    ]);
    for record in records {
        table.push(
            Feature::new(Some(Point::new(record.x, record.y).into()))
                .with_attr(MONITOR_ID_FIELD, record.id),
        );
    }
    table.renumber();
    table
}

pub fn zones_to_table(records: &[ZoneRecord], zone_field: &str) -> FeatureTable {
    let mut table = FeatureTable::new(vec![ROW_ID_FIELD.to_string(), zone_field.to_string()]);
    for record in records {
        let mut feature = Feature::new(Some(Point::new(record.x, record.y).into()));
        feature.set(zone_field, AttrValue::Int(record.zone));
        table.push(feature);
    }
    table.renumber();
    table
}

use crate::error::{ProcessingError, Result};
use crate::utils::constants::ROW_ID_FIELD;
use geo_types::Geometry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl AttrValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Int(v) => Some(*v as f64),
            AttrValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer view used for key matching; integral floats are accepted.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            AttrValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            AttrValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttrValue::Null)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub geometry: Option<Geometry<f64>>,
    pub attributes: BTreeMap<String, AttrValue>,
}

impl Feature {
    pub fn new(geometry: Option<Geometry<f64>>) -> Self {
        Self {
            geometry,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, field: &str, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(field.to_string(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&AttrValue> {
        self.attributes.get(field)
    }

    pub fn set(&mut self, field: &str, value: AttrValue) {
        self.attributes.insert(field.to_string(), value);
    }

    pub fn fid(&self) -> Option<i64> {
        self.get(ROW_ID_FIELD).and_then(AttrValue::as_i64)
    }
}

/// Ordered field schema plus features; the unit every geometry operation reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub fields: Vec<String>,
    pub features: Vec<Feature>,
}

impl FeatureTable {
    pub fn new(fields: Vec<String>) -> Self {
        Self {
            fields,
            features: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }

    /// Add a field, initialising it to null. Existing fields are left untouched.
    pub fn add_field(&mut self, field: &str) {
        if self.has_field(field) {
            return;
        }
        self.fields.push(field.to_string());
        for feature in &mut self.features {
            feature
                .attributes
                .entry(field.to_string())
                .or_insert(AttrValue::Null);
        }
    }

    pub fn push(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    /// Renumber the row id field `0..len` in table order.
    pub fn renumber(&mut self) {
        if !self.has_field(ROW_ID_FIELD) {
            self.fields.insert(0, ROW_ID_FIELD.to_string());
        }
        for (row, feature) in self.features.iter_mut().enumerate() {
            feature.set(ROW_ID_FIELD, AttrValue::Int(row as i64));
        }
    }

    pub fn values<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a AttrValue> + 'a {
        self.features
            .iter()
            .map(move |f| f.get(field).unwrap_or(&AttrValue::Null))
    }

    pub fn read_json(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let table: FeatureTable = serde_json::from_reader(BufReader::new(file))?;
        Ok(table)
    }

    /// Write through a `.partial` sidecar and rename, so readers never see half a table.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let partial = path.with_extension("partial");
        {
            let file = File::create(&partial)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, self)?;
            writer.flush()?;
        }
        fs::rename(&partial, path).map_err(|e| {
            ProcessingError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to publish table {}: {}", path.display(), e),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::Point;
    use tempfile::TempDir;

    #[test]
    fn test_attr_value_json_shapes() {
        let values = vec![
            AttrValue::Null,
            AttrValue::Int(7),
            AttrValue::Float(-9999.0),
            AttrValue::Text("a".into()),
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"[null,7,-9999.0,"a"]"#);
        let back: Vec<AttrValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn test_add_field_and_renumber() {
        let mut table = FeatureTable::new(vec!["MONITOR_ID".into()]);
        table.push(Feature::new(None).with_attr("MONITOR_ID", 10_i64));
        table.push(Feature::new(None).with_attr("MONITOR_ID", 11_i64));
        table.renumber();
        table.add_field("N6100m");

        assert_eq!(table.fields, vec!["FID", "MONITOR_ID", "N6100m"]);
        assert_eq!(table.features[1].fid(), Some(1));
        assert!(table.features[0].get("N6100m").unwrap().is_null());
    }

    #[test]
    fn test_write_leaves_no_partial_file() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("nested").join("table.json");
        let mut table = FeatureTable::new(vec![]);
        table.push(Feature::new(Some(Point::new(1.0, 2.0).into())));
        table.write_json(&path)?;

        assert!(path.exists());
        assert!(!path.with_extension("partial").exists());
        assert_eq!(FeatureTable::read_json(&path)?, table);
        Ok(())
    }
}

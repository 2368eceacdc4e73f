use crate::error::{ProcessingError, Result};
use crate::models::{AttrValue, FeatureTable};
use crate::utils::constants::{
    COMPRESSION_GZIP, COMPRESSION_LZ4, COMPRESSION_NONE, COMPRESSION_SNAPPY, COMPRESSION_ZSTD,
    DEFAULT_ROW_GROUP_SIZE, ROW_ID_FIELD,
};
use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use geo_types::Geometry;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

pub struct ParquetWriter {
    compression: Compression,
    row_group_size: usize,
}

impl ParquetWriter {
    pub fn new() -> Self {
        Self {
            compression: Compression::SNAPPY,
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
        }
    }

    pub fn with_compression(mut self, compression: &str) -> Result<Self> {
        self.compression = match compression.to_lowercase().as_str() {
            COMPRESSION_SNAPPY => Compression::SNAPPY,
            COMPRESSION_GZIP => Compression::GZIP(GzipLevel::default()),
            COMPRESSION_LZ4 => Compression::LZ4,
            COMPRESSION_ZSTD => Compression::ZSTD(ZstdLevel::default()),
            COMPRESSION_NONE => Compression::UNCOMPRESSED,
            _ => {
                return Err(ProcessingError::Config(format!(
                    "Unsupported compression: {}",
                    compression
                )))
            }
        };
        Ok(self)
    }

    /// Write a feature table as one column per attribute plus point `x`/`y`.
    ///
    /// The row id field is dropped. Column types are inferred from the values:
    /// integer-only fields become Int64, text fields Utf8, everything else a
    /// nullable Float64.
    pub fn write_table(&self, table: &FeatureTable, path: &Path) -> Result<()> {
        let mut fields = Vec::new();
        let mut columns: Vec<ArrayRef> = Vec::new();

        for name in table.fields.iter().filter(|f| f.as_str() != ROW_ID_FIELD) {
            let (data_type, column) = self.column(table, name);
            fields.push(Field::new(name, data_type, true));
            columns.push(column);
        }

        let (xs, ys): (Vec<Option<f64>>, Vec<Option<f64>>) = table
            .features
            .iter()
            .map(|f| match &f.geometry {
                Some(Geometry::Point(p)) => (Some(p.x()), Some(p.y())),
                _ => (None, None),
            })
            .unzip();
        fields.push(Field::new("x", DataType::Float64, true));
        columns.push(Arc::new(Float64Array::from(xs)));
        fields.push(Field::new("y", DataType::Float64, true));
        columns.push(Arc::new(Float64Array::from(ys)));

        let schema = Arc::new(Schema::new(fields));
        let batch = RecordBatch::try_new(schema.clone(), columns)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        let props = WriterProperties::builder()
            .set_compression(self.compression)
            .set_max_row_group_size(self.row_group_size)
            .build();

        let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
        writer.write(&batch)?;
        writer.close()?;

        Ok(())
    }

    fn column(&self, table: &FeatureTable, name: &str) -> (DataType, ArrayRef) {
        let values: Vec<&AttrValue> = table.values(name).collect();
        let non_null = || values.iter().filter(|v| !v.is_null());

        let all_ints = non_null().all(|v| matches!(v, AttrValue::Int(_)));
        let any_text = non_null().any(|v| matches!(v, AttrValue::Text(_)));
        let any_value = non_null().next().is_some();

        if any_value && all_ints {
            let column: Vec<Option<i64>> = values.iter().map(|v| v.as_i64()).collect();
            (DataType::Int64, Arc::new(Int64Array::from(column)))
        } else if any_text {
            let column: Vec<Option<String>> = values
                .iter()
                .map(|v| match v {
                    AttrValue::Null => None,
                    AttrValue::Text(s) => Some(s.clone()),
                    AttrValue::Int(i) => Some(i.to_string()),
                    AttrValue::Float(f) => Some(f.to_string()),
                })
                .collect();
            (DataType::Utf8, Arc::new(StringArray::from(column)))
        } else {
            let column: Vec<Option<f64>> = values.iter().map(|v| v.as_f64()).collect();
            (DataType::Float64, Arc::new(Float64Array::from(column)))
        }
    }

    /// Get file statistics
    pub fn get_file_info(&self, path: &Path) -> Result<ParquetFileInfo> {
        use parquet::file::reader::{FileReader, SerializedFileReader};

        let file = File::open(path)?;
        let reader = SerializedFileReader::new(file)?;
        let metadata = reader.metadata();

        let file_metadata = metadata.file_metadata();
        let row_groups = metadata.num_row_groups();
        let total_rows = file_metadata.num_rows();
        let file_size = std::fs::metadata(path)?.len();
        let columns = file_metadata
            .schema_descr()
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        Ok(ParquetFileInfo {
            total_rows,
            row_groups: row_groups as i32,
            columns,
            file_size,
            compression: self.compression,
        })
    }
}

impl Default for ParquetWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct ParquetFileInfo {
    pub total_rows: i64,
    pub row_groups: i32,
    pub columns: Vec<String>,
    pub file_size: u64,
    pub compression: Compression,
}

impl ParquetFileInfo {
    pub fn summary(&self) -> String {
        format!(
            "Parquet File Summary:\n\
            - Total rows: {}\n\
            - Columns: {}\n\
            - Row groups: {}\n\
            - File size: {:.2} MB\n\
            - Compression: {:?}",
            self.total_rows,
            self.columns.len(),
            self.row_groups,
            self.file_size as f64 / 1_048_576.0,
            self.compression,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Feature;
    use crate::utils::constants::MONITOR_ID_FIELD;
    use arrow::array::Array;
    use geo_types::Point;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use tempfile::TempDir;

    fn final_table() -> FeatureTable {
        let mut table = FeatureTable::new(vec![
            ROW_ID_FIELD.to_string(),
            MONITOR_ID_FIELD.to_string(),
            "zone".to_string(),
            "N6100m".to_string(),
        ]);
        for (id, value) in [(10_i64, Some(1.5)), (11, None), (12, Some(-9999.0))] {
            table.push(
                Feature::new(Some(Point::new(id as f64, 2.0).into()))
                    .with_attr(MONITOR_ID_FIELD, id)
                    .with_attr("zone", 1_i64)
                    .with_attr("N6100m", value.map(AttrValue::Float).unwrap_or(AttrValue::Null)),
            );
        }
        table.renumber();
        table
    }

    #[test]
    fn test_write_final_table() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("final.parquet");
        let writer = ParquetWriter::new();
        writer.write_table(&final_table(), &path)?;

        let info = writer.get_file_info(&path)?;
        assert_eq!(info.total_rows, 3);
        assert_eq!(info.columns, vec!["MONITOR_ID", "zone", "N6100m", "x", "y"]);

        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&path)?)?.build()?;
        let batch = reader.into_iter().next().unwrap()?;
        assert_eq!(batch.schema().field(0).data_type(), &DataType::Int64);
        assert_eq!(batch.schema().field(2).data_type(), &DataType::Float64);
        assert_eq!(batch.column(2).null_count(), 1);
        Ok(())
    }

    #[test]
    fn test_different_compressions() -> Result<()> {
        let dir = TempDir::new()?;
        for compression in ["snappy", "gzip", "lz4", "zstd", "none"] {
            let path = dir.path().join(format!("{}.parquet", compression));
            ParquetWriter::new()
                .with_compression(compression)?
                .write_table(&final_table(), &path)?;
            assert!(path.exists());
        }
        assert!(ParquetWriter::new().with_compression("brotli9").is_err());
        Ok(())
    }

    #[test]
    fn test_write_empty_table() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("empty.parquet");
        let table = FeatureTable::new(vec![ROW_ID_FIELD.to_string(), "N6100m".to_string()]);
        ParquetWriter::new().write_table(&table, &path)?;
        assert_eq!(ParquetWriter::new().get_file_info(&path)?.total_rows, 0);
        Ok(())
    }
}

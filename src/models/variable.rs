use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    Raster,
    Polyline,
    Point,
    PointBuffer,
}

/// Storage family of a layer, which decides its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    Raster,
    Vector,
}

impl VariableType {
    pub const ALL: [VariableType; 4] = [
        VariableType::Raster,
        VariableType::Polyline,
        VariableType::Point,
        VariableType::PointBuffer,
    ];

    pub fn layer_kind(&self) -> LayerKind {
        match self {
            VariableType::Raster | VariableType::Point => LayerKind::Raster,
            VariableType::Polyline | VariableType::PointBuffer => LayerKind::Vector,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            VariableType::Raster => "raster",
            VariableType::Polyline => "polyline",
            VariableType::Point => "point",
            VariableType::PointBuffer => "point buffer",
        }
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// A variable as configured: a static file or a folder of per-zone mosaic tiles.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VariableSpec {
    pub kind: VariableType,

    /// File (static) or folder (mosaic), relative to the input folder
    #[validate(length(min = 1))]
    pub path: String,

    #[serde(default)]
    pub mosaic: bool,

    /// Short identifier used in field names; derived from the path when absent
    #[serde(default)]
    #[validate(length(min = 1, max = 6))]
    pub code: Option<String>,

    /// Pre-aggregated field summed by point-buffer variables
    #[serde(default)]
    pub sum_field: Option<String>,
}

impl VariableSpec {
    pub fn new(kind: VariableType, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            mosaic: false,
            code: None,
            sum_field: None,
        }
    }

    pub fn mosaic(mut self) -> Self {
        self.mosaic = true;
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_sum_field(mut self, field: impl Into<String>) -> Self {
        self.sum_field = Some(field.into());
        self
    }

    /// Field-name code: the explicit code, else the first two characters of the file name.
    pub fn code(&self) -> String {
        if let Some(code) = &self.code {
            return code.clone();
        }

        let name = Path::new(&self.path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.clone());
        name.chars().filter(|c| c.is_ascii_alphanumeric()).take(2).collect()
    }
}

/// A variable resolved to a concrete file for one partition.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub kind: VariableType,
    pub code: String,
    pub file: PathBuf,
    pub sum_field: Option<String>,
}

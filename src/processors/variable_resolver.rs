use crate::error::Result;
use crate::geometry::GeometryService;
use crate::models::{Variable, VariableSpec, VariableType, ZoneId};
use crate::utils::constants::ZONE_MARKER;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Resolves configured variables to concrete files for one zone.
pub struct VariableResolver {
    engine: Arc<dyn GeometryService>,
    input_folder: PathBuf,
    specs: Vec<VariableSpec>,
}

impl VariableResolver {
    pub fn new(
        engine: Arc<dyn GeometryService>,
        input_folder: impl Into<PathBuf>,
        specs: &[VariableSpec],
    ) -> Self {
        Self {
            engine,
            input_folder: input_folder.into(),
            specs: specs.to_vec(),
        }
    }

    /// Variables of `kind` available to partitions of `zone`.
    ///
    /// Static variables are always included. A mosaic variable without a tile for
    /// the zone is skipped with a warning.
    pub fn resolve(&self, zone: ZoneId, kind: VariableType) -> Result<Vec<Variable>> {
        let ext = self.engine.extension(kind.layer_kind());
        let mut variables = Vec::new();

        for spec in self.specs.iter().filter(|s| s.kind == kind) {
            let path = self.input_folder.join(&spec.path);
            let file = if spec.mosaic {
                match select_mosaic_file(&path, zone, ext)? {
                    Some(file) => file,
                    None => {
                        warn!(
                            variable = %spec.code(),
                            zone = %zone,
                            folder = %path.display(),
                            "no mosaic tile for zone, variable skipped"
                        );
                        continue;
                    }
                }
            } else {
                path
            };

            debug!("Resolved {} variable {} to {}", kind, spec.code(), file.display());
            variables.push(Variable {
                kind,
                code: spec.code(),
                file,
                sum_field: spec.sum_field.clone(),
            });
        }

        Ok(variables)
    }
}

/// Zone token of a mosaic tile: the integer after the last zone marker of the stem.
pub fn mosaic_zone(path: &Path) -> Option<ZoneId> {
    let stem = path.file_stem()?.to_str()?;
    let (_, token) = stem.rsplit_once(ZONE_MARKER)?;
    token.parse().ok().map(ZoneId)
}

/// Tile of a mosaic folder whose zone token matches `zone`.
///
/// The listing is scanned in sorted order; when several tiles match, the first
/// wins.
pub fn select_mosaic_file(folder: &Path, zone: ZoneId, ext: &str) -> Result<Option<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(folder)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(ext))
        .collect();
    files.sort();

    let mut matches = files.into_iter().filter(|path| mosaic_zone(path) == Some(zone));
    let selected = matches.next();
    let extra = matches.count();
    if let Some(file) = &selected {
        if extra > 0 {
            warn!(
                zone = %zone,
                selected = %file.display(),
                ignored = extra,
                "several mosaic tiles match zone"
            );
        }
    }
    Ok(selected)
}

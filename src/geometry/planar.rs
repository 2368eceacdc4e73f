use super::raster::{GridRaster, RasterInfo};
use super::{Aggregate, FieldExpr, GeometryService};
use crate::error::{ProcessingError, Result};
use crate::models::{AttrValue, Feature, FeatureTable, LayerKind};
use crate::utils::constants::{
    BUFFER_DISTANCE_FIELD, BUFFER_ID_FIELD, BUFFER_SEGMENTS, COUNT_FIELD, MEAN_SUFFIX,
    ORIG_FID_FIELD, ROW_ID_FIELD, SAMPLE_FIELD, SUM_PREFIX,
};
use geo::{BooleanOps, BoundingRect, Centroid, Contains};
use geo_types::{Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use rstar::primitives::GeomWithData;
use rstar::{RTree, RTreeObject, AABB};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Planar (projected metres) implementation of [`GeometryService`].
///
/// Feature tables are stored as JSON documents and rasters as JSON grids.
pub struct PlanarEngine {
    segments: usize,
}

impl PlanarEngine {
    pub fn new() -> Self {
        Self {
            segments: BUFFER_SEGMENTS,
        }
    }

    fn circle(&self, center: Point<f64>, radius: f64) -> Polygon<f64> {
        let mut coords: Vec<Coord<f64>> = (0..self.segments)
            .map(|k| {
                let angle = std::f64::consts::TAU * k as f64 / self.segments as f64;
                Coord {
                    x: center.x() + radius * angle.cos(),
                    y: center.y() + radius * angle.sin(),
                }
            })
            .collect();
        coords.push(coords[0]);
        Polygon::new(LineString::from(coords), vec![])
    }
}

impl Default for PlanarEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Layer feature indexed by its bounding box
struct IndexedFeature {
    index: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedFeature {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

#[derive(Serialize)]
struct ZoneStat {
    zone: i64,
    count: usize,
    mean: Option<f64>,
}

fn point_of(feature: &Feature) -> Option<Point<f64>> {
    match feature.geometry.as_ref()? {
        Geometry::Point(p) => Some(*p),
        Geometry::MultiPoint(mp) => mp.0.first().copied(),
        _ => None,
    }
}

fn polygons_of(geometry: &Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p.clone()])),
        Geometry::MultiPolygon(mp) => Some(mp.clone()),
        Geometry::Rect(r) => Some(MultiPolygon::new(vec![r.to_polygon()])),
        _ => None,
    }
}

fn lines_of(geometry: &Geometry<f64>) -> Option<MultiLineString<f64>> {
    match geometry {
        Geometry::LineString(ls) => Some(MultiLineString::new(vec![ls.clone()])),
        Geometry::MultiLineString(mls) => Some(mls.clone()),
        Geometry::Line(l) => Some(MultiLineString::new(vec![LineString::from(vec![
            l.start, l.end,
        ])])),
        _ => None,
    }
}

fn length_m(geometry: &Geometry<f64>) -> f64 {
    lines_of(geometry)
        .map(|mls| {
            mls.0
                .iter()
                .flat_map(|ls| ls.lines())
                .map(|line| line.dx().hypot(line.dy()))
                .sum()
        })
        .unwrap_or(0.0)
}

fn envelope_of(geometry: &Geometry<f64>) -> Option<AABB<[f64; 2]>> {
    let rect = geometry.bounding_rect()?;
    Some(AABB::from_corners(
        [rect.min().x, rect.min().y],
        [rect.max().x, rect.max().y],
    ))
}

/// Schema of `base` followed by the fields of `extra` not already present.
fn union_fields(base: &[String], extra: &[String]) -> Vec<String> {
    let mut fields = base.to_vec();
    for field in extra {
        if !fields.contains(field) {
            fields.push(field.clone());
        }
    }
    fields
}

impl GeometryService for PlanarEngine {
    fn extension(&self, kind: LayerKind) -> &'static str {
        match kind {
            LayerKind::Raster => "grid",
            LayerKind::Vector => "json",
        }
    }

    fn read_table(&self, path: &Path) -> Result<FeatureTable> {
        FeatureTable::read_json(path)
    }

    fn write_table(&self, path: &Path, table: &FeatureTable) -> Result<()> {
        table.write_json(path)
    }

    fn spatial_join_nearest(
        &self,
        points: &Path,
        zones: &Path,
        zone_field: &str,
        output: &Path,
    ) -> Result<()> {
        let mut table = self.read_table(points)?;
        let zone_table = self.read_table(zones)?;

        let mut entries = Vec::with_capacity(zone_table.len());
        for feature in &zone_table.features {
            let point = point_of(feature).or_else(|| {
                feature
                    .geometry
                    .as_ref()
                    .and_then(|g| g.centroid())
            });
            let (Some(point), Some(zone)) = (point, feature.get(zone_field)) else {
                continue;
            };
            entries.push(GeomWithData::new([point.x(), point.y()], zone.clone()));
        }

        if entries.is_empty() {
            return Err(ProcessingError::MissingData(format!(
                "No zone definitions with a '{}' field in {}",
                zone_field,
                zones.display()
            )));
        }

        let tree = RTree::bulk_load(entries);
        table.add_field(zone_field);

        for feature in &mut table.features {
            let zone = point_of(feature)
                .and_then(|p| tree.nearest_neighbor(&[p.x(), p.y()]))
                .map(|nearest| nearest.data.clone())
                .unwrap_or(AttrValue::Null);
            feature.set(zone_field, zone);
        }

        self.write_table(output, &table)
    }

    fn select(&self, input: &Path, field: &str, value: i64, output: &Path) -> Result<usize> {
        let source = self.read_table(input)?;
        let mut table = FeatureTable::new(source.fields.clone());
        table.features = source
            .features
            .into_iter()
            .filter(|f| f.get(field).and_then(AttrValue::as_i64) == Some(value))
            .collect();

        let selected = table.len();
        self.write_table(output, &table)?;
        Ok(selected)
    }

    fn buffer(&self, points: &Path, radius_m: f64, output: &Path) -> Result<()> {
        if radius_m <= 0.0 {
            return Err(ProcessingError::Geometry(format!(
                "Buffer radius must be positive, got {}",
                radius_m
            )));
        }

        let source = self.read_table(points)?;
        let mut fields = vec![ROW_ID_FIELD.to_string(), ORIG_FID_FIELD.to_string()];
        fields.extend(
            source
                .fields
                .iter()
                .filter(|f| f.as_str() != ROW_ID_FIELD && f.as_str() != ORIG_FID_FIELD)
                .cloned(),
        );
        fields.push(BUFFER_DISTANCE_FIELD.to_string());

        let mut table = FeatureTable::new(fields);
        for (row, feature) in source.features.iter().enumerate() {
            let center = point_of(feature).ok_or_else(|| {
                ProcessingError::Geometry(format!(
                    "Row {} of {} is not a point",
                    row,
                    points.display()
                ))
            })?;

            let mut buffered = Feature::new(Some(Geometry::Polygon(self.circle(center, radius_m))));
            buffered.attributes = feature.attributes.clone();
            buffered.set(ROW_ID_FIELD, AttrValue::Int(row as i64));
            buffered.set(
                ORIG_FID_FIELD,
                AttrValue::Int(feature.fid().unwrap_or(row as i64)),
            );
            buffered.set(BUFFER_DISTANCE_FIELD, AttrValue::Float(radius_m));
            table.push(buffered);
        }

        self.write_table(output, &table)
    }

    fn intersect(&self, polygons: &Path, layer: &Path, output: &Path) -> Result<()> {
        let buffers = self.read_table(polygons)?;
        let layer_table = self.read_table(layer)?;

        let indexed: Vec<IndexedFeature> = layer_table
            .features
            .iter()
            .enumerate()
            .filter_map(|(index, f)| {
                let envelope = envelope_of(f.geometry.as_ref()?)?;
                Some(IndexedFeature { index, envelope })
            })
            .collect();
        let tree = RTree::bulk_load(indexed);

        let layer_fields: Vec<String> = layer_table
            .fields
            .iter()
            .filter(|f| f.as_str() != ROW_ID_FIELD)
            .cloned()
            .collect();
        let fields = union_fields(
            &[
                ROW_ID_FIELD.to_string(),
                BUFFER_ID_FIELD.to_string(),
                ORIG_FID_FIELD.to_string(),
            ],
            &layer_fields,
        );
        let mut table = FeatureTable::new(fields);

        for (row, buffer) in buffers.features.iter().enumerate() {
            let Some(area) = buffer.geometry.as_ref().and_then(polygons_of) else {
                continue;
            };
            let Some(query) = buffer.geometry.as_ref().and_then(envelope_of) else {
                continue;
            };
            let buffer_fid = buffer.fid().unwrap_or(row as i64);
            let orig_fid = buffer
                .get(ORIG_FID_FIELD)
                .cloned()
                .unwrap_or(AttrValue::Int(buffer_fid));

            for candidate in tree.locate_in_envelope_intersecting(&query) {
                let feature = &layer_table.features[candidate.index];
                let Some(geometry) = feature.geometry.as_ref() else {
                    continue;
                };

                let clipped = match geometry {
                    Geometry::Point(p) => area.contains(p).then(|| Geometry::Point(*p)),
                    Geometry::MultiPoint(mp) => {
                        let inside: Vec<Point<f64>> =
                            mp.0.iter().filter(|p| area.contains(*p)).copied().collect();
                        (!inside.is_empty()).then(|| Geometry::MultiPoint(MultiPoint::new(inside)))
                    }
                    other => match lines_of(other) {
                        Some(lines) => {
                            let clipped = area.clip(&lines, false);
                            (!clipped.0.is_empty())
                                .then(|| Geometry::MultiLineString(clipped))
                        }
                        None => {
                            return Err(ProcessingError::Geometry(format!(
                                "Unsupported geometry in intersect layer {}",
                                layer.display()
                            )))
                        }
                    },
                };

                if let Some(geometry) = clipped {
                    let mut out = Feature::new(Some(geometry));
                    for field in &layer_fields {
                        if let Some(value) = feature.get(field) {
                            out.set(field, value.clone());
                        }
                    }
                    out.set(BUFFER_ID_FIELD, AttrValue::Int(buffer_fid));
                    out.set(ORIG_FID_FIELD, orig_fid.clone());
                    table.push(out);
                }
            }
        }

        table.renumber();
        debug!(
            "Intersected {} buffers with {} features -> {} rows",
            buffers.len(),
            layer_table.len(),
            table.len()
        );
        self.write_table(output, &table)
    }

    fn dissolve_by(
        &self,
        input: &Path,
        key: &str,
        aggregate: &Aggregate,
        output: &Path,
    ) -> Result<()> {
        let source = self.read_table(input)?;
        let mut groups: BTreeMap<i64, Vec<&Feature>> = BTreeMap::new();
        for feature in &source.features {
            if let Some(value) = feature.get(key).and_then(AttrValue::as_i64) {
                groups.entry(value).or_default().push(feature);
            }
        }

        let mut fields = vec![ROW_ID_FIELD.to_string(), key.to_string()];
        let sum_field = match aggregate {
            Aggregate::None => None,
            Aggregate::Sum(field) => {
                if !source.has_field(field) && !source.is_empty() {
                    return Err(ProcessingError::MissingData(format!(
                        "Field '{}' not found in {}",
                        field,
                        input.display()
                    )));
                }
                let name = format!("{}{}", SUM_PREFIX, field);
                fields.push(name.clone());
                Some((field.as_str(), name))
            }
        };

        let mut table = FeatureTable::new(fields);
        for (value, members) in groups {
            let mut lines = Vec::new();
            let mut points = Vec::new();
            for member in &members {
                match member.geometry.as_ref() {
                    Some(Geometry::Point(p)) => points.push(*p),
                    Some(Geometry::MultiPoint(mp)) => points.extend(mp.0.iter().copied()),
                    Some(other) => {
                        if let Some(mls) = lines_of(other) {
                            lines.extend(mls.0);
                        }
                    }
                    None => {}
                }
            }

            let geometry = if !lines.is_empty() {
                Some(Geometry::MultiLineString(MultiLineString::new(lines)))
            } else if !points.is_empty() {
                Some(Geometry::MultiPoint(MultiPoint::new(points)))
            } else {
                None
            };

            let mut out = Feature::new(geometry).with_attr(key, value);
            if let Some((field, name)) = &sum_field {
                let total: f64 = members
                    .iter()
                    .filter_map(|m| m.get(field).and_then(AttrValue::as_f64))
                    .sum();
                out.set(name, AttrValue::Float(total));
            }
            table.push(out);
        }

        table.renumber();
        self.write_table(output, &table)
    }

    fn zonal_statistics(
        &self,
        zones: &Path,
        zone_field: &str,
        raster: &Path,
        prefix: &str,
        output: &Path,
        workspace: &Path,
    ) -> Result<()> {
        let zone_table = self.read_table(zones)?;
        let grid = GridRaster::read(raster)?;
        fs::create_dir_all(workspace)?;

        let mut stats = Vec::with_capacity(zone_table.len());
        for (row, feature) in zone_table.features.iter().enumerate() {
            let zone = feature
                .get(zone_field)
                .and_then(AttrValue::as_i64)
                .ok_or_else(|| {
                    ProcessingError::MissingData(format!(
                        "Zone {} of {} has no '{}' value",
                        row,
                        zones.display(),
                        zone_field
                    ))
                })?;
            let area = feature
                .geometry
                .as_ref()
                .and_then(polygons_of)
                .ok_or_else(|| {
                    ProcessingError::Geometry(format!("Zone {} is not a polygon", zone))
                })?;

            let mut sum = 0.0;
            let mut count = 0usize;
            if let Some(rect) = area.bounding_rect() {
                if let Some((r0, r1, c0, c1)) =
                    grid.window(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
                {
                    for r in r0..=r1 {
                        for c in c0..=c1 {
                            let (x, y) = grid.cell_center(r, c);
                            if !area.contains(&Point::new(x, y)) {
                                continue;
                            }
                            if let Some(value) = grid.get(r, c) {
                                sum += value;
                                count += 1;
                            }
                        }
                    }
                }
            }

            // Zones smaller than a cell take the value under their centroid
            let mean = if count > 0 {
                Some(sum / count as f64)
            } else {
                area.centroid().and_then(|c| grid.value_at(c.x(), c.y()))
            };
            stats.push(ZoneStat { zone, count, mean });
        }

        let scratch = workspace.join(format!("{}_zones.json", prefix));
        serde_json::to_writer(BufWriter::new(File::create(&scratch)?), &stats)?;

        let mean_field = format!("{}{}", prefix, MEAN_SUFFIX);
        let mut table = FeatureTable::new(vec![
            ROW_ID_FIELD.to_string(),
            zone_field.to_string(),
            COUNT_FIELD.to_string(),
            mean_field.clone(),
        ]);
        for stat in stats {
            table.push(
                Feature::new(None)
                    .with_attr(zone_field, stat.zone)
                    .with_attr(COUNT_FIELD, stat.count as i64)
                    .with_attr(
                        &mean_field,
                        stat.mean.map(AttrValue::Float).unwrap_or(AttrValue::Null),
                    ),
            );
        }
        table.renumber();
        self.write_table(output, &table)
    }

    fn extract_values_to_points(
        &self,
        points: &Path,
        raster: &Path,
        output: &Path,
    ) -> Result<()> {
        let mut table = self.read_table(points)?;
        let grid = GridRaster::read(raster)?;
        table.add_field(SAMPLE_FIELD);

        for feature in &mut table.features {
            let value = point_of(feature)
                .and_then(|p| grid.value_at(p.x(), p.y()))
                .map(AttrValue::Float)
                .unwrap_or(AttrValue::Null);
            feature.set(SAMPLE_FIELD, value);
        }

        self.write_table(output, &table)
    }

    fn describe_raster(&self, raster: &Path) -> Result<RasterInfo> {
        Ok(GridRaster::read(raster)?.info())
    }

    fn calculate_field(&self, path: &Path, field: &str, expr: &FieldExpr) -> Result<()> {
        let mut table = self.read_table(path)?;
        if !table.has_field(field) {
            return Err(ProcessingError::MissingData(format!(
                "Field '{}' must be added to {} before it is calculated",
                field,
                path.display()
            )));
        }

        for feature in &mut table.features {
            let value = match expr {
                FieldExpr::Field(source) => feature.get(source).cloned().unwrap_or(AttrValue::Null),
                FieldExpr::Constant(value) => AttrValue::Float(*value),
                FieldExpr::LengthKm => AttrValue::Float(
                    feature.geometry.as_ref().map(length_m).unwrap_or(0.0) / 1000.0,
                ),
            };
            feature.set(field, value);
        }

        self.write_table(path, &table)
    }

    fn join_field(
        &self,
        target: &Path,
        target_key: &str,
        source: &Path,
        source_key: &str,
        field: &str,
    ) -> Result<()> {
        let source_table = self.read_table(source)?;
        if !source_table.has_field(field) {
            return Err(ProcessingError::MissingData(format!(
                "Field '{}' not found in {}",
                field,
                source.display()
            )));
        }

        let mut lookup: BTreeMap<i64, AttrValue> = BTreeMap::new();
        for feature in &source_table.features {
            if let Some(key) = feature.get(source_key).and_then(AttrValue::as_i64) {
                lookup
                    .entry(key)
                    .or_insert_with(|| feature.get(field).cloned().unwrap_or(AttrValue::Null));
            }
        }

        let mut table = self.read_table(target)?;
        table.add_field(field);
        for feature in &mut table.features {
            let value = feature
                .get(target_key)
                .and_then(AttrValue::as_i64)
                .and_then(|key| lookup.get(&key).cloned())
                .unwrap_or(AttrValue::Null);
            feature.set(field, value);
        }

        self.write_table(target, &table)
    }

    fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let mut merged = FeatureTable::default();
        for input in inputs {
            let table = self.read_table(input)?;
            merged.fields = union_fields(&merged.fields, &table.fields);
            merged.features.extend(table.features);
        }

        let fields = merged.fields.clone();
        for feature in &mut merged.features {
            for field in &fields {
                feature
                    .attributes
                    .entry(field.clone())
                    .or_insert(AttrValue::Null);
            }
        }

        merged.renumber();
        self.write_table(output, &merged)
    }
}

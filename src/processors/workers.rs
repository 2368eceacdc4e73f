//! Intersection workers: one aggregate statistic per buffer per variable.
//!
//! A worker owns every path named by its [`JobArgument`]; no other job reads or
//! writes them, so workers run concurrently without coordination.

use crate::error::{ProcessingError, Result};
use crate::geometry::{Aggregate, FieldExpr, GeometryService};
use crate::models::{AttrValue, Feature, FeatureTable, JobArgument, JobOutcome, JobState, VariableType};
use crate::utils::cancel::CancelToken;
use crate::utils::constants::{
    BUFFER_ID_FIELD, MEAN_SUFFIX, MISSING_VALUE, ORIG_FID_FIELD, ROW_ID_FIELD, SAMPLE_FIELD,
    SUM_PREFIX,
};
use crate::utils::workspace::{delete_sidecars, remove_dir_best_effort, Heartbeat};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct IntersectionWorker {
    engine: Arc<dyn GeometryService>,
    heartbeat: Heartbeat,
    cancel: CancelToken,
    max_attempts: Option<u32>,
}

impl IntersectionWorker {
    pub fn new(engine: Arc<dyn GeometryService>, heartbeat: Heartbeat, cancel: CancelToken) -> Self {
        Self {
            engine,
            heartbeat,
            cancel,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Run one job to a terminal state.
    ///
    /// An existing result carrying the field is reused. `Err` is returned for
    /// cancellation and for non-raster failures, which the controller retries
    /// at batch level.
    pub fn run(&self, job: &JobArgument) -> Result<JobOutcome> {
        self.cancel.check()?;
        self.heartbeat.touch();

        match self.inspect(job)? {
            JobState::Complete => {
                debug!("{} already complete", job.key);
                return Ok(JobOutcome {
                    key: job.key.clone(),
                    state: JobState::Complete,
                    recomputed: false,
                    attempts: 0,
                });
            }
            JobState::CorruptRetry => {
                warn!(job = %job.key, "result table lacks its field, recomputing");
            }
            _ => {}
        }
        debug!(job = %job.key, state = ?JobState::InProgress, "computing");

        let (state, attempts) = match job.kind {
            VariableType::Raster => self.run_raster(job)?,
            VariableType::Polyline => {
                self.run_polyline(job)?;
                (JobState::Complete, 1)
            }
            VariableType::PointBuffer => {
                self.run_point_buffer(job)?;
                (JobState::Complete, 1)
            }
            VariableType::Point => {
                self.run_point(job)?;
                (JobState::Complete, 1)
            }
        };

        self.heartbeat.touch();
        Ok(JobOutcome {
            key: job.key.clone(),
            state,
            recomputed: true,
            attempts,
        })
    }

    /// Classify existing output: complete, corrupt (removed here), or absent.
    fn inspect(&self, job: &JobArgument) -> Result<JobState> {
        if !job.result_table.exists() {
            return Ok(JobState::Pending);
        }

        let has_field = match self.engine.list_fields(&job.result_table) {
            Ok(fields) => fields.iter().any(|f| *f == job.field_name()),
            Err(e) => {
                debug!(job = %job.key, error = %e, "unreadable result table");
                false
            }
        };
        if has_field {
            return Ok(JobState::Complete);
        }

        self.delete_outputs(job)?;
        Ok(JobState::CorruptRetry)
    }

    fn delete_outputs(&self, job: &JobArgument) -> Result<()> {
        for table in [&job.intersect_table, &job.result_table] {
            if let (Some(folder), Some(stem)) = (table.parent(), table.file_stem()) {
                delete_sidecars(folder, &stem.to_string_lossy())?;
            }
        }
        Ok(())
    }

    fn attempts_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }

    fn run_raster(&self, job: &JobArgument) -> Result<(JobState, u32)> {
        let mut attempts = 0;
        loop {
            self.cancel.check()?;
            attempts += 1;
            self.heartbeat.touch();

            match self.raster_attempt(job) {
                Ok(()) => {
                    if let Some(workspace) = &job.workspace {
                        remove_dir_best_effort(workspace);
                    }
                    return Ok((JobState::Complete, attempts));
                }
                Err(ProcessingError::Cancelled) => return Err(ProcessingError::Cancelled),
                Err(e) => {
                    warn!(job = %job.key, attempt = attempts, error = %e, "raster statistics failed, retrying");
                    if let Err(cleanup) = self.delete_outputs(job) {
                        warn!(job = %job.key, error = %cleanup, "could not remove partial output");
                    }
                    if self.attempts_exhausted(attempts) {
                        return Ok((JobState::FailedRetry, attempts));
                    }
                }
            }
        }
    }

    fn raster_attempt(&self, job: &JobArgument) -> Result<()> {
        let info = self.engine.describe_raster(&job.variable_file)?;
        debug!(
            "{}: raster {}x{} at {} m",
            job.key, info.rows, info.cols, info.cell_size
        );
        self.cancel.check()?;

        let workspace = job
            .workspace
            .as_deref()
            .ok_or_else(|| ProcessingError::MissingData(format!("{} has no statistics workspace", job.key)))?;
        fs::create_dir_all(workspace)?;
        fs::create_dir_all(&job.output_folder)?;

        let field = job.field_name();
        let zonal = self.engine.zonal_statistics(
            &job.buffer_file,
            ORIG_FID_FIELD,
            &job.variable_file,
            &job.key.code,
            &job.intersect_table,
            workspace,
        );

        // A terminated batch must not publish the result field
        self.cancel.check()?;

        if let Err(e) = zonal {
            warn!(job = %job.key, error = %e, "zonal statistics failed, writing missing values");
            self.write_sentinel_table(&job.buffer_file, &job.intersect_table)?;
            self.engine.add_field(&job.result_table, &field)?;
            return self
                .engine
                .calculate_field(&job.result_table, &field, &FieldExpr::Constant(MISSING_VALUE));
        }

        self.engine.add_field(&job.result_table, &field)?;
        let mean_field = self
            .engine
            .list_fields(&job.result_table)?
            .into_iter()
            .find(|f| f.ends_with(MEAN_SUFFIX));

        let expr = match mean_field {
            Some(mean) => FieldExpr::Field(mean),
            None => {
                warn!(job = %job.key, "no mean field in zonal output, writing missing values");
                FieldExpr::Constant(MISSING_VALUE)
            }
        };
        self.engine.calculate_field(&job.result_table, &field, &expr)
    }

    /// One row per buffer keyed by `ORIG_FID`, for buffers whose statistics failed.
    fn write_sentinel_table(&self, buffers: &Path, output: &Path) -> Result<()> {
        let source = self.engine.read_table(buffers)?;
        let mut table = FeatureTable::new(vec![ROW_ID_FIELD.to_string(), ORIG_FID_FIELD.to_string()]);
        for feature in &source.features {
            let orig = feature
                .get(ORIG_FID_FIELD)
                .cloned()
                .unwrap_or(AttrValue::Null);
            let mut row = Feature::new(None);
            row.set(ORIG_FID_FIELD, orig);
            table.push(row);
        }
        table.renumber();
        self.engine.write_table(output, &table)
    }

    fn run_polyline(&self, job: &JobArgument) -> Result<()> {
        self.delete_outputs(job)?;
        fs::create_dir_all(&job.output_folder)?;

        let field = job.field_name();
        self.engine
            .intersect(&job.buffer_file, &job.variable_file, &job.intersect_table)?;
        self.cancel.check()?;
        self.engine.dissolve_by(
            &job.intersect_table,
            BUFFER_ID_FIELD,
            &Aggregate::None,
            &job.result_table,
        )?;
        self.engine.add_field(&job.result_table, &field)?;
        self.engine
            .calculate_field(&job.result_table, &field, &FieldExpr::LengthKm)?;

        info!("{}: line length per buffer written", job.key);
        Ok(())
    }

    fn run_point_buffer(&self, job: &JobArgument) -> Result<()> {
        let sum_field = job.sum_field.as_deref().ok_or_else(|| {
            ProcessingError::Config(format!("{} has no field to sum", job.key))
        })?;

        self.delete_outputs(job)?;
        fs::create_dir_all(&job.output_folder)?;

        let field = job.field_name();
        self.engine
            .intersect(&job.buffer_file, &job.variable_file, &job.intersect_table)?;
        self.cancel.check()?;
        self.engine.dissolve_by(
            &job.intersect_table,
            BUFFER_ID_FIELD,
            &Aggregate::Sum(sum_field.to_string()),
            &job.result_table,
        )?;
        self.engine.add_field(&job.result_table, &field)?;
        self.engine.calculate_field(
            &job.result_table,
            &field,
            &FieldExpr::Field(format!("{}{}", SUM_PREFIX, sum_field)),
        )?;

        info!("{}: point sums per buffer written", job.key);
        Ok(())
    }

    fn run_point(&self, job: &JobArgument) -> Result<()> {
        self.delete_outputs(job)?;
        fs::create_dir_all(&job.output_folder)?;

        let field = job.field_name();
        self.engine.extract_values_to_points(
            &job.buffer_file,
            &job.variable_file,
            &job.intersect_table,
        )?;
        self.engine.add_field(&job.result_table, &field)?;
        self.engine.calculate_field(
            &job.result_table,
            &field,
            &FieldExpr::Field(SAMPLE_FIELD.to_string()),
        )?;

        info!("{}: point samples written", job.key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{GridRaster, PlanarEngine};
    use crate::models::{PartitionKey, ResultKey, ZoneId};
    use crate::utils::filename::ResultsLayout;
    use geo_types::{LineString, Point};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        engine: Arc<dyn GeometryService>,
        layout: ResultsLayout,
        partition: PartitionKey,
        heartbeat: Heartbeat,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let engine: Arc<dyn GeometryService> = Arc::new(PlanarEngine::new());
            let layout = ResultsLayout::new(dir.path().join("results"), "json");
            let partition = PartitionKey::new(ZoneId(1), 0);

            let mut monitors = FeatureTable::new(vec![]);
            monitors.push(Feature::new(Some(Point::new(500.0, 500.0).into())));
            monitors.push(Feature::new(Some(Point::new(1500.0, 500.0).into())));
            monitors.renumber();
            engine
                .write_table(&layout.partition_table(&partition), &monitors)
                .unwrap();

            fs::create_dir_all(layout.temp_stats_root()).unwrap();
            let heartbeat = Heartbeat::new(layout.heartbeat());
            Self {
                _dir: dir,
                engine,
                layout,
                partition,
                heartbeat,
            }
        }

        fn input(&self, name: &str) -> PathBuf {
            self.layout.root().join("input").join(name)
        }

        fn worker(&self) -> IntersectionWorker {
            IntersectionWorker::new(self.engine.clone(), self.heartbeat.clone(), CancelToken::new())
        }

        fn job(&self, kind: VariableType, code: &str, radius: u32, variable: PathBuf) -> JobArgument {
            let key = ResultKey::new(self.partition, Some(radius), code);
            let buffer_file = self.layout.job_buffer_copy(&key);
            self.engine
                .buffer(
                    &self.layout.partition_table(&self.partition),
                    f64::from(radius),
                    &buffer_file,
                )
                .unwrap();

            let intersect_table = self.layout.intersect_table(&key);
            let result_table = match kind {
                VariableType::Raster | VariableType::Point => intersect_table.clone(),
                _ => self.layout.dissolved_table(&key),
            };
            JobArgument {
                kind,
                buffer_file,
                variable_file: variable,
                output_folder: self.layout.variable_dir(&self.partition, code),
                partition_file: self.layout.partition_table(&self.partition),
                intersect_table,
                result_table,
                workspace: (kind == VariableType::Raster).then(|| self.layout.zonal_workspace(&key)),
                sum_field: None,
                key,
            }
        }

        fn raster(&self, name: &str) -> PathBuf {
            let path = self.input(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            GridRaster::from_fn(0.0, 1000.0, 10.0, 100, 200, |x, _| if x < 1000.0 { 2.0 } else { 8.0 })
                .write(&path)
                .unwrap();
            path
        }

        fn result_values(&self, job: &JobArgument) -> Vec<f64> {
            let table = self.engine.read_table(&job.result_table).unwrap();
            table
                .values(&job.field_name())
                .map(|v| v.as_f64().unwrap())
                .collect()
        }
    }

    #[test]
    fn test_raster_mean_per_buffer() -> Result<()> {
        let fx = Fixture::new();
        let job = fx.job(VariableType::Raster, "N6", 200, fx.raster("N6.grid"));

        let outcome = fx.worker().run(&job)?;
        assert!(outcome.is_complete());
        assert!(outcome.recomputed);
        assert_eq!(fx.result_values(&job), vec![2.0, 8.0]);
        assert!(!job.workspace.as_ref().unwrap().exists());
        assert!(fx.heartbeat.path().exists());
        Ok(())
    }

    #[test]
    fn test_raster_rerun_is_idempotent() -> Result<()> {
        let fx = Fixture::new();
        let job = fx.job(VariableType::Raster, "N6", 200, fx.raster("N6.grid"));
        let worker = fx.worker();

        worker.run(&job)?;
        let first: f64 = fx.result_values(&job).iter().sum();
        let second_run = worker.run(&job)?;
        let second: f64 = fx.result_values(&job).iter().sum();

        assert!(second_run.is_complete());
        assert!(!second_run.recomputed);
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn test_corrupt_result_is_recomputed() -> Result<()> {
        let fx = Fixture::new();
        let job = fx.job(VariableType::Raster, "N6", 200, fx.raster("N6.grid"));

        let mut stale = FeatureTable::new(vec![ROW_ID_FIELD.to_string()]);
        stale.push(Feature::new(None));
        fx.engine.write_table(&job.result_table, &stale)?;
        fs::write(job.result_table.with_extension("partial"), "junk")?;

        let outcome = fx.worker().run(&job)?;
        assert!(outcome.recomputed);
        assert!(fx.engine.list_fields(&job.result_table)?.contains(&job.field_name()));
        assert!(!job.result_table.with_extension("partial").exists());
        Ok(())
    }

    #[test]
    fn test_unreadable_raster_exhausts_attempts() -> Result<()> {
        let fx = Fixture::new();
        let job = fx.job(VariableType::Raster, "N6", 200, fx.input("missing.grid"));

        let outcome = fx.worker().with_max_attempts(Some(3)).run(&job)?;
        assert_eq!(outcome.state, JobState::FailedRetry);
        assert_eq!(outcome.attempts, 3);
        assert!(!job.result_table.exists());
        Ok(())
    }

    #[test]
    fn test_zonal_failure_writes_missing_values() -> Result<()> {
        let fx = Fixture::new();
        let raster = fx.raster("N6.grid");
        let mut job = fx.job(VariableType::Raster, "N6", 200, raster);

        // Point geometries cannot be used as statistics zones
        let mut points = FeatureTable::new(vec![ORIG_FID_FIELD.to_string()]);
        for fid in 0..2_i64 {
            points.push(Feature::new(Some(Point::new(0.0, 0.0).into())).with_attr(ORIG_FID_FIELD, fid));
        }
        points.renumber();
        job.buffer_file = fx.layout.root().join("point_zones.json");
        fx.engine.write_table(&job.buffer_file, &points)?;

        let outcome = fx.worker().run(&job)?;
        assert!(outcome.is_complete());
        assert_eq!(fx.result_values(&job), vec![MISSING_VALUE, MISSING_VALUE]);
        Ok(())
    }

    #[test]
    fn test_polyline_length_in_km() -> Result<()> {
        let fx = Fixture::new();
        let roads = fx.input("roads.json");
        let mut table = FeatureTable::new(vec![]);
        table.push(Feature::new(Some(
            LineString::from(vec![(0.0, 500.0), (2000.0, 500.0)]).into(),
        )));
        table.renumber();
        fx.engine.write_table(&roads, &table)?;

        let job = fx.job(VariableType::Polyline, "rd", 300, roads);
        let outcome = fx.worker().run(&job)?;
        assert!(outcome.is_complete());

        let values = fx.result_values(&job);
        assert_eq!(values.len(), 2);
        for value in values {
            assert!((value - 0.6).abs() < 0.01, "unexpected length {}", value);
        }
        Ok(())
    }

    #[test]
    fn test_point_buffer_sums_field() -> Result<()> {
        let fx = Fixture::new();
        let plants = fx.input("plants.json");
        let mut table = FeatureTable::new(vec!["carbon".to_string()]);
        for (x, carbon) in [(450.0, 2.5), (550.0, 4.0), (1500.0, 1.0), (5000.0, 100.0)] {
            table.push(Feature::new(Some(Point::new(x, 500.0).into())).with_attr("carbon", carbon));
        }
        table.renumber();
        fx.engine.write_table(&plants, &table)?;

        let mut job = fx.job(VariableType::PointBuffer, "pp", 100, plants);
        job.sum_field = Some("carbon".to_string());
        fx.worker().run(&job)?;

        let result = fx.engine.read_table(&job.result_table)?;
        let by_buffer: Vec<(i64, f64)> = result
            .features
            .iter()
            .map(|f| {
                (
                    f.get(BUFFER_ID_FIELD).and_then(AttrValue::as_i64).unwrap(),
                    f.get(&job.field_name()).and_then(AttrValue::as_f64).unwrap(),
                )
            })
            .collect();
        assert_eq!(by_buffer, vec![(0, 6.5), (1, 1.0)]);
        Ok(())
    }

    #[test]
    fn test_point_buffer_without_sum_field_fails() {
        let fx = Fixture::new();
        let job = fx.job(VariableType::PointBuffer, "pp", 100, fx.input("plants.json"));
        assert!(matches!(fx.worker().run(&job), Err(ProcessingError::Config(_))));
    }

    #[test]
    fn test_point_sample_at_monitors() -> Result<()> {
        let fx = Fixture::new();
        let raster = fx.raster("EL.grid");
        let key = ResultKey::new(fx.partition, None, "EL");
        let table = fx.layout.intersect_table(&key);
        let job = JobArgument {
            kind: VariableType::Point,
            buffer_file: fx.layout.partition_table(&fx.partition),
            variable_file: raster,
            output_folder: fx.layout.variable_dir(&fx.partition, "EL"),
            partition_file: fx.layout.partition_table(&fx.partition),
            intersect_table: table.clone(),
            result_table: table,
            workspace: None,
            sum_field: None,
            key,
        };

        fx.worker().run(&job)?;
        assert_eq!(fx.result_values(&job), vec![2.0, 8.0]);
        Ok(())
    }

    #[test]
    fn test_cancelled_worker_does_nothing() {
        let fx = Fixture::new();
        let job = fx.job(VariableType::Raster, "N6", 200, fx.raster("N6.grid"));
        let token = CancelToken::new();
        token.cancel();

        let worker = IntersectionWorker::new(fx.engine.clone(), fx.heartbeat.clone(), token);
        assert!(matches!(worker.run(&job), Err(ProcessingError::Cancelled)));
        assert!(!job.result_table.exists());
    }
}

//! Partition → buffer → per-type batches → completion check → join, then merge.

use crate::config::PipelineConfig;
use crate::error::{ProcessingError, Result};
use crate::geometry::GeometryService;
use crate::models::{
    BufferKey, JobArgument, JobOutcome, JobState, LayerKind, ResultKey, Variable, VariableType,
};
use crate::processors::aggregation::AggregationJoin;
use crate::processors::buffer_generator::BufferGenerator;
use crate::processors::completion::{wait_for_batch, BatchWait, CompletionTracker};
use crate::processors::partitioner::{Partition, Partitioner};
use crate::processors::variable_resolver::VariableResolver;
use crate::processors::workers::IntersectionWorker;
use crate::readers::{monitors_to_table, zones_to_table, SiteReader};
use crate::utils::cancel::CancelToken;
use crate::utils::filename::ResultsLayout;
use crate::utils::progress::ProgressReporter;
use crate::utils::workspace::{Heartbeat, ScratchWorkspace};
use crate::writers::ParquetWriter;
use rayon::prelude::*;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Worker pool sizing for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStrategy {
    Fixed(usize),
    PerJob,
    Sequential,
}

impl PoolStrategy {
    /// Rasters share `raster_workers` threads. Polylines get a thread per job,
    /// point variables run sequentially.
    pub fn for_kind(kind: VariableType, raster_workers: usize) -> Self {
        match kind {
            VariableType::Raster => PoolStrategy::Fixed(raster_workers),
            VariableType::Polyline => PoolStrategy::PerJob,
            VariableType::Point | VariableType::PointBuffer => PoolStrategy::Sequential,
        }
    }

    pub fn threads(&self, jobs: usize) -> usize {
        match self {
            PoolStrategy::Fixed(n) => (*n).max(1),
            PoolStrategy::PerJob => jobs.max(1),
            PoolStrategy::Sequential => 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineSummary {
    pub partitions: usize,
    pub monitors: usize,
    pub jobs_dispatched: usize,
    pub jobs_recomputed: usize,
    pub batch_retries: usize,
    pub final_rows: usize,
    pub final_table: PathBuf,
    pub parquet_file: Option<PathBuf>,
    pub elapsed: Duration,
}

/// Variables that would be dispatched for one partition.
#[derive(Debug, Clone)]
pub struct PartitionPlan {
    pub partition: Partition,
    pub variables: Vec<Variable>,
}

pub struct PipelineController {
    config: Arc<PipelineConfig>,
    engine: Arc<dyn GeometryService>,
    layout: ResultsLayout,
    heartbeat: Heartbeat,
    cancel: CancelToken,
}

impl PipelineController {
    pub fn new(config: PipelineConfig, engine: Arc<dyn GeometryService>) -> Self {
        let layout = ResultsLayout::new(
            config.results_folder.clone(),
            engine.extension(LayerKind::Vector),
        );
        let heartbeat = Heartbeat::new(layout.heartbeat());
        Self {
            config: Arc::new(config),
            engine,
            layout,
            heartbeat,
            cancel: CancelToken::new(),
        }
    }

    /// Share a token with the caller, e.g. to stop on Ctrl-C.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn layout(&self) -> &ResultsLayout {
        &self.layout
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Load inputs, assign zones and write the partition tables.
    pub fn prepare(&self) -> Result<Vec<Partition>> {
        fs::create_dir_all(self.layout.root())?;
        let scratch = ScratchWorkspace::new(self.layout.temp_stats_root())?;
        let cleared = scratch.clear();
        if cleared > 0 {
            debug!("Removed {} stale scratch directories", cleared);
        }

        let reader = SiteReader::new();
        let monitors = reader.read_monitors(&self.config.monitor_path())?;
        if monitors.is_empty() {
            return Err(ProcessingError::MissingData(format!(
                "No monitors in {}",
                self.config.monitor_path().display()
            )));
        }
        let zones = reader.read_zones(&self.config.zone_definitions_path())?;

        let monitor_table = self.layout.monitor_table();
        let zone_table = self.layout.zone_table();
        let zoned_table = self.layout.zoned_table();
        self.engine
            .write_table(&monitor_table, &monitors_to_table(&monitors))?;
        self.engine
            .write_table(&zone_table, &zones_to_table(&zones, &self.config.zone_field))?;
        self.engine.spatial_join_nearest(
            &monitor_table,
            &zone_table,
            &self.config.zone_field,
            &zoned_table,
        )?;

        let partitioner = Partitioner::new(
            self.engine.clone(),
            self.config.partition_size,
            self.config.zone_field.clone(),
        );
        let existing = partitioner.discover(&self.layout)?;
        let partitions = partitioner.partition(&zoned_table, &self.layout)?;

        for stale in existing
            .iter()
            .filter(|old| !partitions.iter().any(|p| p.key == old.key))
        {
            warn!(
                partition = %stale.key,
                "partition from an earlier run is not part of this run and will not be merged"
            );
        }

        Ok(partitions)
    }

    /// Partitions and the variables each would receive, without dispatching work.
    pub fn plan(&self) -> Result<Vec<PartitionPlan>> {
        let partitions = self.prepare()?;
        let resolver = self.resolver();

        let mut plans = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let mut variables = Vec::new();
            for kind in VariableType::ALL {
                variables.extend(resolver.resolve(partition.zone(), kind)?);
            }
            plans.push(PartitionPlan {
                partition,
                variables,
            });
        }
        Ok(plans)
    }

    fn resolver(&self) -> VariableResolver {
        VariableResolver::new(
            self.engine.clone(),
            self.config.input_folder.clone(),
            &self.config.variables,
        )
    }

    pub async fn run(&self, progress: Option<&ProgressReporter>) -> Result<PipelineSummary> {
        let start = Instant::now();
        let partitions = self.prepare()?;

        if let Some(p) = progress {
            p.set_length(partitions.len() as u64);
            p.set_message(&format!("Buffering {} partitions...", partitions.len()));
        }
        let generator = BufferGenerator::new(self.engine.clone(), &self.config.buffer_distances);
        generator.generate_all(&partitions, &self.layout)?;

        let resolver = self.resolver();
        let mut summary = PipelineSummary {
            monitors: partitions.iter().map(|p| p.len).sum(),
            ..PipelineSummary::default()
        };

        for partition in &partitions {
            self.cancel.check()?;
            if let Some(p) = progress {
                p.set_message(&format!("Processing {}", partition.key));
            }

            self.process_partition(partition, &resolver, &mut summary)
                .await?;

            if let Some(p) = progress {
                p.increment(1);
            }
        }

        let tables: Vec<PathBuf> = partitions.iter().map(|p| p.table.clone()).collect();
        let final_table = self.layout.final_table();
        self.engine.merge(&tables, &final_table)?;
        summary.final_rows = self.engine.count(&final_table)?;
        summary.final_table = final_table.clone();
        info!(rows = summary.final_rows, "Merged partitions into {}", final_table.display());

        if self.config.export_parquet {
            let table = self.engine.read_table(&final_table)?;
            let path = self.layout.final_parquet();
            ParquetWriter::new()
                .with_compression(&self.config.compression)?
                .write_table(&table, &path)?;
            summary.parquet_file = Some(path);
        }

        summary.elapsed = start.elapsed();
        if let Some(p) = progress {
            p.finish_with_message(&format!(
                "Processed {} partitions ({} monitors)",
                summary.partitions, summary.monitors
            ));
        }
        Ok(summary)
    }

    async fn process_partition(
        &self,
        partition: &Partition,
        resolver: &VariableResolver,
        summary: &mut PipelineSummary,
    ) -> Result<()> {
        let zone = partition.zone();
        let points = resolver.resolve(zone, VariableType::Point)?;
        let rasters = resolver.resolve(zone, VariableType::Raster)?;
        let polylines = resolver.resolve(zone, VariableType::Polyline)?;
        let point_buffers = resolver.resolve(zone, VariableType::PointBuffer)?;

        // Point samples do not depend on the radius
        self.run_batch(partition, None, VariableType::Point, &points, summary)
            .await?;

        for &radius in &self.config.buffer_distances {
            self.run_batch(partition, Some(radius), VariableType::Raster, &rasters, summary)
                .await?;
            self.run_batch(partition, Some(radius), VariableType::Polyline, &polylines, summary)
                .await?;
            self.run_batch(
                partition,
                Some(radius),
                VariableType::PointBuffer,
                &point_buffers,
                summary,
            )
            .await?;
        }

        summary.partitions += 1;
        info!(partition = %partition.key, monitors = partition.len, "Partition complete");
        Ok(())
    }

    /// Dispatch one batch and retry it as a whole until every result is present.
    ///
    /// A failed, panicked, stalled or unjoinable attempt clears the scratch tree
    /// and starts the batch again. Only cancellation and `max_attempts` end it early.
    async fn run_batch(
        &self,
        partition: &Partition,
        radius: Option<u32>,
        kind: VariableType,
        variables: &[Variable],
        summary: &mut PipelineSummary,
    ) -> Result<()> {
        if variables.is_empty() {
            return Ok(());
        }

        let label = match radius {
            Some(r) => format!("{} {} {}m", partition.key, kind, r),
            None => format!("{} {}", partition.key, kind),
        };
        let strategy = PoolStrategy::for_kind(kind, self.config.raster_workers);
        let scratch = ScratchWorkspace::new(self.layout.temp_stats_root())?;
        let tracker = CompletionTracker::new(self.engine.clone());

        let mut attempt = 0u32;
        loop {
            self.cancel.check()?;
            attempt += 1;

            let jobs = self.build_jobs(partition, radius, variables)?;
            let token = self.cancel.child();
            self.heartbeat.touch();
            debug!(batch = %label, jobs = jobs.len(), ?strategy, attempt, "dispatching batch");

            let handle = self.dispatch(jobs.clone(), strategy, token.clone());

            // Only raster batches report progress often enough for stall detection
            let waited = if kind == VariableType::Raster {
                wait_for_batch(
                    handle,
                    &self.heartbeat,
                    self.config.heartbeat_poll(),
                    self.config.heartbeat_inactivity(),
                )
                .await
            } else {
                BatchWait::Finished(handle.await)
            };

            let outcomes = match waited {
                BatchWait::Finished(Ok(Ok(outcomes))) => outcomes,
                BatchWait::Finished(Ok(Err(e))) => {
                    warn!(batch = %label, attempt, error = %e, "batch failed");
                    Vec::new()
                }
                BatchWait::Finished(Err(e)) => {
                    warn!(batch = %label, attempt, error = %e, "batch task panicked");
                    Vec::new()
                }
                BatchWait::Stalled(handle) => {
                    warn!(batch = %label, attempt, "no worker progress, terminating batch");
                    token.cancel();
                    match handle.await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => warn!(batch = %label, error = %e, "terminated batch failed"),
                        Err(e) => warn!(batch = %label, error = %e, "terminated batch panicked"),
                    }
                    Vec::new()
                }
            };
            self.cancel.check()?;

            summary.jobs_dispatched += jobs.len();
            summary.jobs_recomputed += outcomes.iter().filter(|o| o.recomputed).count();

            if kind == VariableType::Raster {
                scratch.clear();
            }

            if tracker.is_ready(&jobs) {
                match AggregationJoin::new(self.engine.clone()).join_all(&jobs) {
                    Ok(_) => {
                        debug!(batch = %label, "batch joined");
                        return Ok(());
                    }
                    Err(e) => warn!(batch = %label, attempt, error = %e, "join failed, retrying batch"),
                }
            } else {
                let pending: Vec<String> = tracker
                    .pending(&jobs)
                    .iter()
                    .map(|job| job.field_name())
                    .collect();
                warn!(batch = %label, attempt, ?pending, "batch incomplete, retrying");
            }
            summary.batch_retries += 1;
            scratch.clear();

            if let Some(max) = self.config.max_attempts {
                if attempt >= max {
                    return Err(ProcessingError::RetriesExhausted {
                        batch: label,
                        attempts: attempt,
                    });
                }
            }
        }
    }

    fn build_jobs(
        &self,
        partition: &Partition,
        radius: Option<u32>,
        variables: &[Variable],
    ) -> Result<Vec<JobArgument>> {
        variables
            .iter()
            .map(|variable| {
                let key = ResultKey::new(partition.key, radius, variable.code.clone());

                let buffer_file = match radius {
                    Some(r) => {
                        let copy = self.layout.job_buffer_copy(&key);
                        let shared = self.layout.buffer_table(&BufferKey::new(partition.key, r));
                        self.engine.copy_features(&shared, &copy)?;
                        copy
                    }
                    None => partition.table.clone(),
                };

                let intersect_table = self.layout.intersect_table(&key);
                let result_table = match variable.kind {
                    VariableType::Polyline | VariableType::PointBuffer => {
                        self.layout.dissolved_table(&key)
                    }
                    VariableType::Raster | VariableType::Point => intersect_table.clone(),
                };
                let workspace = (variable.kind == VariableType::Raster)
                    .then(|| self.layout.zonal_workspace(&key));

                Ok(JobArgument {
                    kind: variable.kind,
                    buffer_file,
                    variable_file: variable.file.clone(),
                    output_folder: self.layout.variable_dir(&partition.key, &variable.code),
                    partition_file: partition.table.clone(),
                    intersect_table,
                    result_table,
                    workspace,
                    sum_field: variable.sum_field.clone(),
                    key,
                })
            })
            .collect()
    }

    /// Run the jobs on a dedicated rayon pool hosted by a blocking task.
    fn dispatch(
        &self,
        jobs: Vec<JobArgument>,
        strategy: PoolStrategy,
        token: CancelToken,
    ) -> JoinHandle<Result<Vec<JobOutcome>>> {
        let engine = self.engine.clone();
        let heartbeat = self.heartbeat.clone();
        let max_attempts = self.config.max_attempts;

        tokio::task::spawn_blocking(move || -> Result<Vec<JobOutcome>> {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(strategy.threads(jobs.len()))
                .build()
                .map_err(|e| ProcessingError::Config(e.to_string()))?;
            let worker =
                IntersectionWorker::new(engine, heartbeat, token).with_max_attempts(max_attempts);

            let outcomes: Vec<JobOutcome> = pool.install(|| {
                jobs.par_iter()
                    .map(|job| match worker.run(job) {
                        Ok(outcome) => outcome,
                        // A terminated job never reached a terminal state
                        Err(ProcessingError::Cancelled) => JobOutcome {
                            key: job.key.clone(),
                            state: JobState::InProgress,
                            recomputed: false,
                            attempts: 1,
                        },
                        Err(e) => {
                            warn!(job = %job.key, error = %e, "job failed");
                            JobOutcome {
                                key: job.key.clone(),
                                state: JobState::FailedRetry,
                                recomputed: false,
                                attempts: 1,
                            }
                        }
                    })
                    .collect()
            });
            Ok(outcomes)
        })
    }
}

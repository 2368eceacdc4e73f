use crate::cli::args::{Cli, Commands};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::geometry::{GeometryService, PlanarEngine};
use crate::processors::{PipelineController, PipelineSummary};
use crate::utils::cancel::CancelToken;
use crate::utils::progress::ProgressReporter;
use crate::writers::ParquetWriter;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub async fn run(cli: Cli) -> Result<()> {
    init_logging(cli.verbose);

    let config = PipelineConfig::load(cli.config.as_deref())?;
    let engine: Arc<dyn GeometryService> = Arc::new(PlanarEngine::new());

    let command = cli.command.unwrap_or(Commands::Run {
        max_attempts: None,
        no_parquet: false,
        quiet: false,
    });

    match command {
        Commands::Run {
            max_attempts,
            no_parquet,
            quiet,
        } => {
            let export = config.export_parquet && !no_parquet;
            let config = config
                .with_max_attempts(max_attempts)
                .with_parquet_export(export);
            config.check()?;

            println!("Input folder: {}", config.input_folder.display());
            println!("Results folder: {}", config.results_folder.display());
            println!(
                "Buffers: {:?} m, partition size {}, {} variables",
                config.buffer_distances,
                config.partition_size,
                config.variables.len()
            );

            let cancel = CancelToken::new();
            let interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, stopping after the current step");
                    interrupt.cancel();
                }
            });

            let progress = ProgressReporter::new(0, "Preparing partitions...", quiet);
            let controller = PipelineController::new(config, engine).with_cancel_token(cancel);
            let summary = controller.run(Some(&progress)).await?;

            print_summary(&summary);
            if let Some(path) = &summary.parquet_file {
                let file_info = ParquetWriter::new().get_file_info(path)?;
                println!("\n{}", file_info.summary());
            }
            println!("Processing complete!");
        }

        Commands::Plan => {
            let controller = PipelineController::new(config, engine);
            let plans = controller.plan()?;

            println!("{} partitions", plans.len());
            for plan in &plans {
                println!(
                    "\n{} ({} monitors)",
                    plan.partition.key, plan.partition.len
                );
                if plan.variables.is_empty() {
                    println!("  no variables available");
                }
                for variable in &plan.variables {
                    println!(
                        "  {:<12} {:<6} {}",
                        variable.kind.display_name(),
                        variable.code,
                        variable.file.display()
                    );
                }
            }
            info!("Plan written, no jobs dispatched");
        }
    }

    Ok(())
}

fn print_summary(summary: &PipelineSummary) {
    println!("\nPipeline Summary:");
    println!("- Partitions: {}", summary.partitions);
    println!("- Monitors: {}", summary.monitors);
    println!(
        "- Jobs: {} dispatched, {} recomputed",
        summary.jobs_dispatched, summary.jobs_recomputed
    );
    println!("- Batch retries: {}", summary.batch_retries);
    println!(
        "- Final table: {} ({} rows)",
        summary.final_table.display(),
        summary.final_rows
    );
    println!("- Elapsed: {:.1}s", summary.elapsed.as_secs_f64());
}

/// Install the global subscriber; `RUST_LOG` overrides the verbosity flag.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let installed = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();

    if let Err(e) = installed {
        debug!("keeping the existing subscriber: {}", e);
    }
}

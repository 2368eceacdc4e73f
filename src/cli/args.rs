use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lur-buffers")]
#[command(about = "Parallel buffer intersection and aggregation for land-use regression")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(short, long, global = true, help = "Configuration file [default: lur.toml if present]")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Partition monitors, compute every buffer variable and merge the results
    Run {
        #[arg(long, help = "Give up on a batch after this many attempts")]
        max_attempts: Option<u32>,

        #[arg(long, default_value = "false", help = "Skip the Parquet export")]
        no_parquet: bool,

        #[arg(long, default_value = "false", help = "Hide the progress bar")]
        quiet: bool,
    },

    /// Show partitions and the variables each would receive, without computing
    Plan,
}

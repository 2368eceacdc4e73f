use anyhow::Context;
use clap::Parser;
use lur_buffers::cli::{run, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run(cli).await.context("lur-buffers failed")
}

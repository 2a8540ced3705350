//! Command-line entry point for layout tuning.

use anyhow::Result;
use clap::Parser;
use layoutforge_driver::cli::{run_cli, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();
    run_cli(cli)
}

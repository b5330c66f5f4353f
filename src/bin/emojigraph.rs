//! Command-line entry point for the review pipeline.

use clap::Parser;
use emojigraph::controls::Cli;

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    emojigraph::runtime::run(cli)
}

//! kbforge CLI: turn Office documents into a Markdown knowledge base.
//!
//! Serves the upload API or runs a single document through the same
//! extraction and merge pipeline from the terminal.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}

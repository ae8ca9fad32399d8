//! rulevault CLI: ingest tabletop-RPG rulebook PDFs and search them.
//!
//! Extracts, chunks, embeds, and indexes rulebooks per game system, then
//! answers cited rule queries against the index.

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

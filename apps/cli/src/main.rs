//! bibgraph CLI — bibliographic record reconciliation tool.
//!
//! Ingests provider feeds into one canonical graph of works, persons,
//! affiliations, and sources, and derives co-authorship networks from it.

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

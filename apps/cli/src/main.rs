//! StudyForge CLI: adaptive tutoring over your own study material.
//!
//! Ingests notes or images into a structured knowledge artifact, answers
//! questions at the learner's level, and generates validated practice.

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

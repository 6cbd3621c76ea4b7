//! Corral CLI entry point.

use std::sync::Mutex;

use clap::Parser;
use color_eyre::eyre::Result;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use corral::cli::{Cli, LogFormat};

fn init_tracing(cli: &Cli) -> Result<()> {
    let directive = if cli.debug { "corral=debug" } else { "corral=info" };
    let filter = EnvFilter::from_default_env().add_directive(directive.parse()?);

    // stdout carries command output such as the state document.
    let writer = match &cli.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    match cli.log_format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_writer(writer))
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(writer))
            .with(filter)
            .init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(&cli)?;

    cli.execute().await
}

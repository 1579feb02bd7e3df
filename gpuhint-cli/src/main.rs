mod app;
mod commands;
mod output;

use anyhow::Context;
use clap::Parser;

use crate::app::{Cli, Command};

fn main() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })
    .context("failed to set Ctrl+C handler")?;

    let cli = Cli::parse();

    // Show gpuhint info+ on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("gpuhint", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    match &cli.command {
        Command::Enable { input, output } => {
            commands::patch::run(input, output.as_deref(), 1, &cli.global)
        }
        Command::Disable { input, output } => {
            commands::patch::run(input, output.as_deref(), 0, &cli.global)
        }
        Command::Status { input } => commands::status::run(input, &cli.global),
        Command::Info { input } => commands::info::run(input, &cli.global),
    }
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// gpuhint - request the discrete GPU for Windows executables on hybrid graphics systems
#[derive(Debug, Parser)]
#[command(name = "gpuhint", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Don't print "OK" after a successful patch.
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Set the GPU export symbols to 1, adding them if missing.
    Enable {
        /// Path to the executable.
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Where to write the patched executable (default: overwrite INPUT).
        #[arg(value_name = "OUTPUT")]
        output: Option<PathBuf>,
    },

    /// Set the GPU export symbols to 0, adding them if missing.
    Disable {
        /// Path to the executable.
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Where to write the patched executable (default: overwrite INPUT).
        #[arg(value_name = "OUTPUT")]
        output: Option<PathBuf>,
    },

    /// Show whether the GPU export symbols are present and their values.
    Status {
        /// Path to the executable.
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },

    /// Display headers, sections and exports of the executable.
    Info {
        /// Path to the executable.
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },
}

// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `taskcrew`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskcrew",
    version,
    about = "Run dependency-aware task groups against remote workers.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Crew.toml` in the current working directory. A missing file
    /// means built-in defaults.
    #[arg(long, value_name = "PATH", default_value = "Crew.toml")]
    pub config: String,

    /// Import a task group definition (JSON) at startup.
    ///
    /// The file holds `{ "id"?, "name", "tasks": [...] }`; tasks use the same
    /// camelCase fields workers use for child declarations.
    #[arg(long, value_name = "PATH")]
    pub group: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TASKCREW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load config, storage and `--group`, print what would run, then exit.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

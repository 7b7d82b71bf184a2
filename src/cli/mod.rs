//! Command-line surface (out-of-scope collaborator per spec §1, specified
//! only at its interface to the core): flag parsing and dispatch into the
//! Runner Pipeline. Grounded on `PyRo1121-omg`'s `clap`-derive `Cli`/
//! `Commands` layout (`cli/mod.rs`, `cli/args.rs`).

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Hardened batch command runner.
#[derive(Debug, Parser)]
#[command(name = "warden-runner", version, about, long_about = None)]
pub struct Cli {
    /// Path to the runner configuration file.
    #[arg(short, long, env = "WARDEN_CONFIG", default_value = "/etc/warden/runner.toml")]
    pub config: PathBuf,

    /// Analyze and report without executing anything or touching privileges.
    #[arg(long)]
    pub dry_run: bool,

    /// Output format for dry-run reports.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Verbosity level for dry-run reports.
    #[arg(long, value_enum, default_value_t = Verbosity::Summary)]
    pub verbosity: Verbosity,

    /// Path to an env file whose admitted keys are exported before running.
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum Verbosity {
    Summary,
    Detailed,
    Full,
}

/// Process exit codes (§6). `EmergencyShutdown` is reserved for
/// privilege-restoration failure and is normally never reached here — the
/// privilege manager terminates the process directly when it occurs.
#[derive(Debug, Clone, Copy)]
pub enum ExitCode {
    Success = 0,
    FatalPhaseFailure = 1,
    ConfigParseError = 2,
    EmergencyShutdown = 70,
}

impl From<ExitCode> for i32 {
    fn from(value: ExitCode) -> Self {
        value as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_invocation() {
        let cli = Cli::parse_from(["warden-runner", "--config", "/etc/warden/runner.toml"]);
        assert_eq!(cli.config, PathBuf::from("/etc/warden/runner.toml"));
        assert!(!cli.dry_run);
        assert_eq!(cli.format, OutputFormat::Text);
    }

    #[test]
    fn parses_dry_run_with_json_and_full_verbosity() {
        let cli = Cli::parse_from([
            "warden-runner",
            "--dry-run",
            "--format",
            "json",
            "--verbosity",
            "full",
        ]);
        assert!(cli.dry_run);
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.verbosity, Verbosity::Full);
    }
}

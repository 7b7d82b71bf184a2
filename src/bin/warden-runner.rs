//! warden-runner CLI binary
//!
//! The top-level invocation surface: flag parsing, logging setup, and
//! dispatch into the runner pipeline. Out-of-scope per spec §1 — this
//! file is intentionally thin, translating CLI flags into calls against
//! the core kernel and mapping outcomes to process exit codes (§6).

use std::process::ExitCode;

use clap::Parser;

use warden_runner::cli::{Cli, ExitCode as RunnerExitCode, OutputFormat, Verbosity};
use warden_runner::config::Settings;
use warden_runner::core::config_model;
use warden_runner::core::path_safety::SkipPolicy;
use warden_runner::core::paths;
use warden_runner::core::pipeline;
use warden_runner::core::privilege::PrivilegeManager;
use warden_runner::core::resource_manager::{DryRunResourceManager, NormalResourceManager, ResourceManager};
use warden_runner::core::verify::{VerificationManager, VerificationMode};

fn init_logging(verbosity: u8, settings: &Settings) {
    let level = match verbosity {
        0 => format!("warden_runner={}", settings.log_level),
        1 => "warden_runner=debug".to_string(),
        _ => "warden_runner=trace".to_string(),
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if settings.json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = Settings::load().unwrap_or_default();
    init_logging(cli.verbose, &settings);

    match run(&cli, &settings) {
        Ok(code) => ExitCode::from(i32::from(code) as u8),
        Err(err) => {
            eprintln!("warden-runner: {err}");
            ExitCode::from(i32::from(RunnerExitCode::FatalPhaseFailure) as u8)
        }
    }
}

fn run(cli: &Cli, settings: &Settings) -> anyhow::Result<RunnerExitCode> {
    let path_env = std::env::var("PATH").unwrap_or_default();

    // Peek the hash directory from an unvalidated read of the raw config so
    // the verification manager can be constructed before the config itself
    // is verified (step 1 verifies the file; the hash directory it names is
    // a prerequisite of that very check, so the operator-level default from
    // `Settings` is used for the config's own verification and the declared
    // value takes over after).
    let probe_text = std::fs::read_to_string(&cli.config).unwrap_or_default();
    let hash_dir = config_model::parse(&probe_text)
        .ok()
        .and_then(|raw| raw.global.hash_directory)
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| settings.hash_directory.clone());

    let mode = if cli.dry_run {
        VerificationMode::WarnOnly
    } else {
        VerificationMode::Strict
    };
    let audit_dir = Some(paths::audit_dir(&hash_dir));
    let verifier = VerificationManager::new(hash_dir, mode, SkipPolicy::default());

    if cli.dry_run {
        let resources = DryRunResourceManager::new();
        let result = pipeline::run(
            &cli.config,
            &verifier,
            &resources,
            cli.env_file.as_deref(),
            &path_env,
            audit_dir,
        );
        resources.set_file_verification(
            verifier.snapshot(std::time::Instant::now()),
        );
        match &result {
            Ok(summary) => {
                let mut failures = summary.admission_failures.clone();
                failures.extend(summary.group_failures.iter().cloned());
                resources.set_admission_failures(failures);
            }
            Err(err) => {
                tracing::warn!("dry-run recorded a fatal-in-normal-mode failure");
                resources.set_pipeline_error(err.to_string());
            }
        }
        report_dry_run(&resources, cli.format, cli.verbosity);
        return Ok(RunnerExitCode::Success);
    }

    let privilege = PrivilegeManager::new();
    let resources = NormalResourceManager::new(&privilege, warden_runner::core::paths::temp_dir_root());
    match pipeline::run(
        &cli.config,
        &verifier,
        &resources,
        cli.env_file.as_deref(),
        &path_env,
        audit_dir,
    ) {
        Ok(summary) => {
            tracing::info!(
                executed = summary.commands_executed,
                skipped = summary.commands_skipped,
                groups_skipped = summary.groups_skipped,
                "run complete"
            );
            Ok(RunnerExitCode::Success)
        }
        Err(err) => {
            eprintln!("warden-runner: fatal failure during {err}");
            Ok(RunnerExitCode::FatalPhaseFailure)
        }
    }
}

fn report_dry_run(resources: &DryRunResourceManager, format: OutputFormat, verbosity: Verbosity) {
    let Some(report) = resources.get_dry_run_results() else {
        return;
    };
    match format {
        OutputFormat::Json => {
            if let Ok(json) = serde_json::to_string_pretty(&report) {
                println!("{json}");
            }
        }
        OutputFormat::Text => {
            let rendered = match verbosity {
                Verbosity::Summary => report.render_summary(),
                Verbosity::Detailed => report.render_detailed(),
                Verbosity::Full => report.render_full(),
            };
            print!("{rendered}");
        }
    }
}

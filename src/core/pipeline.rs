//! C10 — Runner Pipeline
//!
//! End-to-end orchestration: load -> verify -> expand -> admit -> execute,
//! identical in Normal and DryRun mode because both are reached only
//! through the [`ResourceManager`] façade (§9). Grounded on
//! `PyRo1121-omg`'s `src/core/mod.rs` top-level orchestration style and
//! `cli/mod.rs`'s phase-sequenced command flow.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use crate::core::audit::{AdmissionAuditLog, AdmissionOutcome};
use crate::core::config_model::{self, CommandBody, CommandSpec, GroupSpec, RunnerConfig};
use crate::core::error::{ConfigError, RunnerError};
use crate::core::path_safety::{self, SkipPolicy};
use crate::core::resource_manager::{ExecutionContext, ExecutionResult, ResourceManager};
use crate::core::risk::{self, RiskLevel};
use crate::core::variables::{expand, ParamMap, VarValue, VariableRegistry};
use crate::core::verify::VerificationManager;

/// Outcome of one pipeline run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub commands_executed: usize,
    pub commands_skipped: usize,
    pub groups_skipped: usize,
    pub execution_results: Vec<ExecutionResult>,
    pub admission_failures: Vec<String>,
    pub group_failures: Vec<String>,
}

/// Fatal failure at a global-phase step (§4.10 failure policy: steps 1, 2,
/// 4, 5, 6). In normal mode this terminates the run with a non-zero exit;
/// in dry-run it is instead recorded by the caller and the run continues
/// with whatever state was already established.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// Runs the full pipeline against an already-loaded, verified
/// configuration. Config loading and top-level verification (steps 1-2)
/// happen in [`run`]; this is the per-run orchestration shared by both
/// resource-manager variants.
pub struct Pipeline<'a> {
    resources: &'a dyn ResourceManager,
    path_env: String,
    audit: Mutex<Option<AdmissionAuditLog>>,
}

impl<'a> Pipeline<'a> {
    #[must_use]
    pub fn new(resources: &'a dyn ResourceManager, path_env: String) -> Self {
        Self::with_audit_dir(resources, path_env, None)
    }

    /// Construct a pipeline that records every admission decision to a
    /// hash-chained JSONL audit trail under `audit_dir`. Opening the log is
    /// best-effort: if it fails, admission still proceeds but decisions go
    /// unrecorded (audit logging never gates execution, per §9).
    #[must_use]
    pub fn with_audit_dir(
        resources: &'a dyn ResourceManager,
        path_env: String,
        audit_dir: Option<PathBuf>,
    ) -> Self {
        let audit = audit_dir.and_then(|dir| match AdmissionAuditLog::open(&dir) {
            Ok(log) => Some(log),
            Err(err) => {
                tracing::warn!(error = %err, "failed to open admission audit log");
                None
            }
        });
        Self {
            resources,
            path_env,
            audit: Mutex::new(audit),
        }
    }

    /// Execute steps 3-8 of §4.10 against a validated configuration and a
    /// verification manager that has already cleared the config/env/global
    /// file checks (steps 1, 5, 6 happen in [`run`] before this is called).
    pub fn execute(
        &self,
        config: &RunnerConfig,
        verifier: &VerificationManager,
    ) -> Result<RunSummary, PipelineError> {
        let mut summary = RunSummary::default();

        // Step 3: expand global — build and validate the global registry.
        let mut registry = VariableRegistry::new();
        for (name, value) in &config.global.vars {
            registry.register_global(name, value.clone())?;
        }

        // Step 4: validate templates against the global registry.
        for (name, template) in &config.command_templates {
            crate::core::variables::validate_template_string(
                &template.cmd,
                name,
                "cmd",
                registry.globals(),
            )?;
            for (idx, arg) in template.args.iter().enumerate() {
                crate::core::variables::validate_template_string(
                    arg,
                    name,
                    &format!("args[{idx}]"),
                    registry.globals(),
                )?;
            }
        }

        let skip_policy = SkipPolicy {
            skip_standard_paths: config.global.skip_standard_paths,
        };

        for group in &config.groups {
            if let Err(reason) = self.run_group(group, &registry, config, verifier, skip_policy, &mut summary)
            {
                summary.groups_skipped += 1;
                summary.group_failures.push(format!("{}: {reason}", group.name));
            }
        }

        self.resources.cleanup_all_temp_dirs().ok();
        self.resources.send_notification(
            "run complete",
            &format!(
                "{} executed, {} skipped, {} groups skipped",
                summary.commands_executed, summary.commands_skipped, summary.groups_skipped
            ),
        );

        Ok(summary)
    }

    fn run_group(
        &self,
        group: &GroupSpec,
        parent_registry: &VariableRegistry,
        config: &RunnerConfig,
        verifier: &VerificationManager,
        skip_policy: SkipPolicy,
        summary: &mut RunSummary,
    ) -> Result<(), RunnerError> {
        // Step 7a: expand group — derive a child registry with local vars.
        let local_vars: HashMap<String, VarValue> = group.vars.clone();
        let group_registry = parent_registry
            .with_locals(local_vars)
            .map_err(RunnerError::Config)?;

        // Resolve each command's executable path up front so group-file
        // verification (step 7b) can cover them, per §4.6.
        let resolved: Vec<PathBuf> = group
            .commands
            .iter()
            .filter_map(|cmd| self.resolve_command_path(cmd, config, &group_registry).ok())
            .collect();

        verifier
            .verify_group_files(&group.name, &group.verify_files, &resolved)
            .map_err(|e| RunnerError::Integrity(e))?;

        let temp_dir = self
            .resources
            .create_temp_dir(&group.name)
            .map_err(|e| RunnerError::Other(e.to_string()))?;

        for command in &group.commands {
            match self.run_command(&group.name, command, config, &group_registry, skip_policy, &temp_dir) {
                Ok(Some(result)) => {
                    summary.commands_executed += 1;
                    summary.execution_results.push(result);
                }
                Ok(None) => {
                    summary.commands_skipped += 1;
                }
                Err(reason) => {
                    summary.commands_skipped += 1;
                    summary.admission_failures.push(reason);
                }
            }
        }

        self.resources.cleanup_temp_dir(&temp_dir).ok();
        Ok(())
    }

    fn resolve_command_path(
        &self,
        command: &CommandSpec,
        config: &RunnerConfig,
        registry: &VariableRegistry,
    ) -> Result<PathBuf, RunnerError> {
        let (cmd_str, _args) = self.expand_command(command, config, registry)?;
        path_safety::resolve_command(&cmd_str, &self.path_env).map_err(RunnerError::Io)
    }

    fn expand_command(
        &self,
        command: &CommandSpec,
        config: &RunnerConfig,
        registry: &VariableRegistry,
    ) -> Result<(String, Vec<String>), RunnerError> {
        match &command.body {
            CommandBody::Inline { cmd, args, .. } => {
                let params = ParamMap::new();
                let cmd_str = expand(cmd, "cmd", "inline", &params, registry)
                    .map_err(RunnerError::Config)?;
                let mut expanded_args = Vec::with_capacity(args.len());
                for (idx, arg) in args.iter().enumerate() {
                    expanded_args.push(
                        expand(arg, &format!("args[{idx}]"), "inline", &params, registry)
                            .map_err(RunnerError::Config)?,
                    );
                }
                Ok((cmd_str, expanded_args))
            }
            CommandBody::Templated { template, params } => {
                let tmpl = config
                    .command_templates
                    .get(template)
                    .ok_or_else(|| RunnerError::Config(ConfigError::UndefinedTemplate(template.clone())))?;
                let mut param_map = ParamMap::new();
                for (name, value) in params {
                    param_map.insert(name.clone(), value.clone());
                }
                let cmd_str = expand(&tmpl.cmd, "cmd", template, &param_map, registry)
                    .map_err(RunnerError::Config)?;
                let mut expanded_args = Vec::with_capacity(tmpl.args.len());
                for (idx, arg) in tmpl.args.iter().enumerate() {
                    expanded_args.push(
                        expand(arg, &format!("args[{idx}]"), template, &param_map, registry)
                            .map_err(RunnerError::Config)?,
                    );
                }
                Ok((cmd_str, expanded_args))
            }
        }
    }

    fn record_admission(
        &self,
        group_name: &str,
        command: &str,
        detected_risk: RiskLevel,
        max_allowed: RiskLevel,
        outcome: AdmissionOutcome,
        reason: Option<String>,
    ) {
        let mut guard = self.audit.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(log) = guard.as_mut() {
            if let Err(err) = log.record(group_name, command, detected_risk, max_allowed, outcome, reason)
            {
                tracing::warn!(error = %err, "failed to append admission audit entry");
            }
        }
    }

    fn run_command(
        &self,
        group_name: &str,
        command: &CommandSpec,
        config: &RunnerConfig,
        registry: &VariableRegistry,
        _skip_policy: SkipPolicy,
        temp_dir: &std::path::Path,
    ) -> Result<Option<ExecutionResult>, String> {
        let (cmd_str, args) = self
            .expand_command(command, config, registry)
            .map_err(|e| e.to_string())?;

        let risk = risk::evaluate(&cmd_str, &args).map_err(|e| e.to_string())?;
        let max_allowed = RiskLevel::from(command.max_risk_level);
        if let Err(err) = risk::admit(&cmd_str, risk, command.max_risk_level) {
            self.record_admission(
                group_name,
                &cmd_str,
                risk,
                max_allowed,
                AdmissionOutcome::Rejected,
                Some(err.to_string()),
            );
            return Err(err.to_string());
        }
        self.record_admission(
            group_name,
            &cmd_str,
            risk,
            max_allowed,
            AdmissionOutcome::Admitted,
            None,
        );

        let ctx = ExecutionContext {
            group_name: group_name.to_string(),
            workdir: Some(temp_dir.to_path_buf()),
            env: Vec::new(),
            timeout: command.timeout.map(std::time::Duration::from_secs),
            run_as_user: command.run_as_user.clone(),
            run_as_group: command.run_as_group.clone(),
        };

        if command.run_as_user.is_some() || command.run_as_group.is_some() {
            let cmd_str_owned = cmd_str.clone();
            let args_owned = args.clone();
            let ctx_for_closure = ctx.clone();
            let resources = self.resources;
            let result = self.resources.with_privileges(
                &ctx,
                Box::new(move || {
                    resources.execute_command(&ctx_for_closure, &cmd_str_owned, &args_owned)
                }),
            );
            result.map(Some).map_err(|e| e.to_string())
        } else {
            self.resources
                .execute_command(&ctx, &cmd_str, &args)
                .map(Some)
                .map_err(|e| e.to_string())
        }
    }
}

/// Top-level entry point (§4.10 steps 1-8): verifies and loads
/// configuration, then runs the expand/admit/execute phases.
pub fn run(
    config_path: &std::path::Path,
    verifier: &VerificationManager,
    resources: &dyn ResourceManager,
    env_file: Option<&std::path::Path>,
    path_env: &str,
    audit_dir: Option<PathBuf>,
) -> Result<RunSummary, PipelineError> {
    let started = Instant::now();

    // Step 1: config verify.
    let bytes = verifier.verify_and_read_config(config_path)?;
    let text = String::from_utf8(bytes)
        .map_err(|e| PipelineError::Config(ConfigError::ParseError(e.to_string())))?;

    // Step 2: parse & validate.
    let raw = config_model::parse(&text)?;
    let config = config_model::validate(raw)?;

    // Step 5: verify env file, if declared.
    if let Some(env_path) = env_file.or(config.global.from_env_file.as_deref().map(std::path::Path::new)) {
        verifier
            .verify_env_file(env_path)
            .map_err(|e| PipelineError::Runner(RunnerError::Integrity(e)))?;
    }

    // Step 6: verify global files.
    verifier
        .verify_global_files(&config.global)
        .map_err(|e| PipelineError::Runner(RunnerError::Integrity(e)))?;

    let pipeline = Pipeline::with_audit_dir(resources, path_env.to_string(), audit_dir);
    let summary = pipeline.execute(&config, verifier)?;

    tracing::info!(
        target: "warden_runner::pipeline",
        elapsed_ms = started.elapsed().as_millis(),
        executed = summary.commands_executed,
        skipped = summary.commands_skipped,
        "run finished"
    );

    Ok(summary)
}

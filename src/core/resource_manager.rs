//! C9 — Resource Manager (Normal + DryRun)
//!
//! A two-variant façade over every side-effecting operation, so the Runner
//! Pipeline (C10) is written once and exercised identically in both modes
//! (§9: "cyclic and dynamic dispatch -> tagged variants"). Grounded on
//! `PyRo1121-omg`'s `core/security/audit.rs` JSON-serializable record
//! style, generalized from an audit log to a dry-run analysis report.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use wait_timeout::ChildExt;

use crate::core::error::{ExecutionError, PrivilegeError};
use crate::core::privilege::{ElevationContext, PrivilegeManager};
use crate::core::verify::VerificationSummary;

/// Result of executing (or simulating) one command.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub command: String,
    pub args: Vec<String>,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub simulated: bool,
}

/// Context accompanying a command execution request.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub group_name: String,
    pub workdir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub run_as_user: Option<String>,
    pub run_as_group: Option<String>,
}

/// Per-command resource analysis recorded during dry-run (and, for
/// symmetry, computable in normal mode too).
#[derive(Debug, Clone, Serialize)]
pub struct ResourceAnalysis {
    pub command: String,
    pub would_elevate: bool,
    pub temp_dirs_touched: Vec<String>,
}

/// Aggregated dry-run report (§4.9, §6 "Dry-run output (JSON)").
#[derive(Debug, Clone, Serialize, Default)]
pub struct DryRunReport {
    pub metadata: HashMap<String, String>,
    pub status: String,
    pub phase: String,
    pub summary: String,
    pub resource_analyses: Vec<ResourceAnalysis>,
    pub security_analysis: Vec<String>,
    pub notifications: Vec<(String, String)>,
    pub file_verification: Option<DryRunVerificationSummary>,
    pub environment_info: HashMap<String, String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Serializable mirror of [`VerificationSummary`] (which itself is not
/// `Serialize` since it carries a `Duration`/`PathBuf` mix unsuited to a
/// stable wire shape).
#[derive(Debug, Clone, Serialize)]
pub struct DryRunVerificationSummary {
    pub total: usize,
    pub verified: usize,
    pub skipped: usize,
    pub failed: usize,
    pub duration_ms: u128,
    pub hash_dir_exists: bool,
}

impl DryRunReport {
    /// One line per verbosity tier (§6 "summary"): pass/fail status plus
    /// the headline counts, nothing per-command.
    #[must_use]
    pub fn render_summary(&self) -> String {
        let mut out = format!(
            "status: {}\ncommands analyzed: {}\n",
            self.status,
            self.resource_analyses.len()
        );
        if let Some(fv) = &self.file_verification {
            out.push_str(&format!(
                "file verification: total={} verified={} skipped={} failed={}\n",
                fv.total, fv.verified, fv.skipped, fv.failed
            ));
        }
        out
    }

    /// Adds one line per analyzed command (§6 "detailed").
    #[must_use]
    pub fn render_detailed(&self) -> String {
        let mut out = self.render_summary();
        out.push_str("\ncommands:\n");
        for analysis in &self.resource_analyses {
            out.push_str(&format!(
                "  {} (would_elevate={})\n",
                crate::core::secrets::redact(&analysis.command),
                analysis.would_elevate
            ));
        }
        out
    }

    /// Adds temp directories and notifications (§6 "full").
    #[must_use]
    pub fn render_full(&self) -> String {
        let mut out = self.render_detailed();
        out.push_str("\ntemp directories:\n");
        for analysis in &self.resource_analyses {
            for dir in &analysis.temp_dirs_touched {
                out.push_str(&format!("  {dir}\n"));
            }
        }
        out.push_str("\nnotifications:\n");
        for (message, details) in &self.notifications {
            out.push_str(&format!("  {message}: {details}\n"));
        }
        if !self.environment_info.is_empty() {
            out.push_str("\nenvironment:\n");
            for (key, value) in &self.environment_info {
                out.push_str(&format!("  {key}={value}\n"));
            }
        }
        if !self.security_analysis.is_empty() {
            out.push_str("\nsecurity analysis:\n");
            for entry in &self.security_analysis {
                out.push_str(&format!("  {entry}\n"));
            }
        }
        if !self.warnings.is_empty() {
            out.push_str("\nwarnings:\n");
            for entry in &self.warnings {
                out.push_str(&format!("  {entry}\n"));
            }
        }
        if !self.errors.is_empty() {
            out.push_str("\nerrors:\n");
            for entry in &self.errors {
                out.push_str(&format!("  {entry}\n"));
            }
        }
        out
    }
}

impl From<&VerificationSummary> for DryRunVerificationSummary {
    fn from(summary: &VerificationSummary) -> Self {
        Self {
            total: summary.total,
            verified: summary.verified,
            skipped: summary.skipped,
            failed: summary.failed,
            duration_ms: summary.duration.as_millis(),
            hash_dir_exists: summary.hash_dir_exists,
        }
    }
}

/// Façade trait implemented by both the [`NormalResourceManager`] and the
/// [`DryRunResourceManager`]. The Runner Pipeline holds a `&dyn
/// ResourceManager` and never branches on mode itself.
pub trait ResourceManager {
    fn execute_command(
        &self,
        ctx: &ExecutionContext,
        cmd: &str,
        args: &[String],
    ) -> Result<ExecutionResult, ExecutionError>;

    fn create_temp_dir(&self, group_name: &str) -> std::io::Result<PathBuf>;

    fn cleanup_temp_dir(&self, path: &Path) -> std::io::Result<()>;

    fn cleanup_all_temp_dirs(&self) -> std::io::Result<()>;

    fn with_privileges(
        &self,
        ctx: &ExecutionContext,
        f: Box<dyn FnOnce() -> Result<ExecutionResult, ExecutionError> + '_>,
    ) -> Result<ExecutionResult, ExecutionError>;

    fn is_privilege_escalation_required(&self, cmd: &str) -> bool;

    fn send_notification(&self, message: &str, details: &str);

    fn get_dry_run_results(&self) -> Option<DryRunReport>;
}

/// Normal mode: every operation delegates to the real implementation.
pub struct NormalResourceManager<'a> {
    privilege: &'a PrivilegeManager,
    temp_dirs: Mutex<Vec<PathBuf>>,
    temp_root: PathBuf,
}

impl<'a> NormalResourceManager<'a> {
    #[must_use]
    pub fn new(privilege: &'a PrivilegeManager, temp_root: PathBuf) -> Self {
        Self {
            privilege,
            temp_dirs: Mutex::new(Vec::new()),
            temp_root,
        }
    }

    fn run_child(
        &self,
        ctx: &ExecutionContext,
        cmd: &str,
        args: &[String],
    ) -> Result<ExecutionResult, ExecutionError> {
        let started = Instant::now();
        tracing::debug!(command = cmd, ?args, "spawning command");
        tracing::info!(
            command = cmd,
            args = ?crate::core::secrets::redact_args(args),
            "executing command"
        );
        let mut command = Command::new(cmd);
        command.args(args);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        if let Some(workdir) = &ctx.workdir {
            command.current_dir(workdir);
        }
        command.env_clear();
        for (key, value) in &ctx.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|e| ExecutionError::ExecutionFailed {
            command: cmd.to_string(),
            reason: e.to_string(),
        })?;

        let status = match ctx.timeout {
            Some(timeout) => match child.wait_timeout(timeout).map_err(|e| {
                ExecutionError::ExecutionFailed {
                    command: cmd.to_string(),
                    reason: e.to_string(),
                }
            })? {
                Some(status) => status,
                None => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ExecutionError::Timeout {
                        command: cmd.to_string(),
                        timeout_secs: timeout.as_secs(),
                    });
                }
            },
            None => child.wait().map_err(|e| ExecutionError::ExecutionFailed {
                command: cmd.to_string(),
                reason: e.to_string(),
            })?,
        };

        let output = child.wait_with_output().unwrap_or_else(|_| std::process::Output {
            status,
            stdout: Vec::new(),
            stderr: Vec::new(),
        });

        Ok(ExecutionResult {
            command: cmd.to_string(),
            args: args.to_vec(),
            exit_code: status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: started.elapsed(),
            simulated: false,
        })
    }
}

impl<'a> ResourceManager for NormalResourceManager<'a> {
    fn execute_command(
        &self,
        ctx: &ExecutionContext,
        cmd: &str,
        args: &[String],
    ) -> Result<ExecutionResult, ExecutionError> {
        self.run_child(ctx, cmd, args)
    }

    fn create_temp_dir(&self, group_name: &str) -> std::io::Result<PathBuf> {
        let dir = self
            .temp_root
            .join(format!("warden-{group_name}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir)?;
        self.temp_dirs.lock().unwrap().push(dir.clone());
        Ok(dir)
    }

    fn cleanup_temp_dir(&self, path: &Path) -> std::io::Result<()> {
        if path.is_dir() {
            std::fs::remove_dir_all(path)?;
        }
        self.temp_dirs.lock().unwrap().retain(|p| p != path);
        Ok(())
    }

    fn cleanup_all_temp_dirs(&self) -> std::io::Result<()> {
        let dirs: Vec<PathBuf> = self.temp_dirs.lock().unwrap().drain(..).collect();
        for dir in dirs {
            if dir.is_dir() {
                std::fs::remove_dir_all(&dir)?;
            }
        }
        Ok(())
    }

    fn with_privileges(
        &self,
        ctx: &ExecutionContext,
        f: Box<dyn FnOnce() -> Result<ExecutionResult, ExecutionError> + '_>,
    ) -> Result<ExecutionResult, ExecutionError> {
        if ctx.run_as_user.is_none() && ctx.run_as_group.is_none() {
            return f();
        }
        let elevation = ElevationContext {
            operation: ctx.group_name.clone(),
            run_as_user: ctx.run_as_user.clone(),
            run_as_group: ctx.run_as_group.clone(),
        };
        self.privilege
            .with_user_group(
                ctx.run_as_user.as_deref(),
                ctx.run_as_group.as_deref(),
                f,
            )
            .unwrap_or_else(|e: PrivilegeError| {
                Err(ExecutionError::ExecutionFailed {
                    command: elevation.operation.clone(),
                    reason: e.to_string(),
                })
            })
    }

    fn is_privilege_escalation_required(&self, cmd: &str) -> bool {
        self.privilege
            .is_privilege_escalation_required(cmd)
            .unwrap_or(true)
    }

    fn send_notification(&self, message: &str, details: &str) {
        // Real notification sinks (webhooks, system log) are an out-of-scope
        // external collaborator; this is the seam where they would attach.
        tracing::info!(
            message = %crate::core::secrets::redact(message),
            details = %crate::core::secrets::redact(details),
            "notification"
        );
    }

    fn get_dry_run_results(&self) -> Option<DryRunReport> {
        None
    }
}

/// Dry-run mode: every side-effecting operation is simulated. Observations
/// accumulate into a [`DryRunReport`].
pub struct DryRunResourceManager {
    analyses: Mutex<Vec<ResourceAnalysis>>,
    notifications: Mutex<Vec<(String, String)>>,
    verification: Mutex<Option<VerificationSummary>>,
    admission_failures: Mutex<Vec<String>>,
    pipeline_error: Mutex<Option<String>>,
}

impl DryRunResourceManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            analyses: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
            verification: Mutex::new(None),
            admission_failures: Mutex::new(Vec::new()),
            pipeline_error: Mutex::new(None),
        }
    }

    pub fn set_file_verification(&self, summary: VerificationSummary) {
        *self.verification.lock().unwrap() = Some(summary);
    }

    /// Record the admission/group failures a completed pipeline run
    /// collected (§4.9: a rejected command must be visible in the dry-run
    /// report itself, not only in the separate admission audit log).
    pub fn set_admission_failures(&self, failures: Vec<String>) {
        *self.admission_failures.lock().unwrap() = failures;
    }

    /// Record a fatal-in-normal-mode pipeline error so dry-run still
    /// surfaces it in the report's `errors` rather than dropping it.
    pub fn set_pipeline_error(&self, error: String) {
        *self.pipeline_error.lock().unwrap() = Some(error);
    }
}

impl Default for DryRunResourceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceManager for DryRunResourceManager {
    fn execute_command(
        &self,
        ctx: &ExecutionContext,
        cmd: &str,
        args: &[String],
    ) -> Result<ExecutionResult, ExecutionError> {
        let would_elevate = ctx.run_as_user.is_some() || ctx.run_as_group.is_some();
        self.analyses.lock().unwrap().push(ResourceAnalysis {
            command: cmd.to_string(),
            would_elevate,
            temp_dirs_touched: Vec::new(),
        });
        Ok(ExecutionResult {
            command: cmd.to_string(),
            args: args.to_vec(),
            exit_code: 0,
            stdout: format!("[DRY-RUN] Would execute: {cmd} {}", args.join(" ")),
            stderr: String::new(),
            duration: Duration::ZERO,
            simulated: true,
        })
    }

    fn create_temp_dir(&self, group_name: &str) -> std::io::Result<PathBuf> {
        Ok(PathBuf::from(format!("/tmp/warden-dryrun-{group_name}")))
    }

    fn cleanup_temp_dir(&self, _path: &Path) -> std::io::Result<()> {
        Ok(())
    }

    fn cleanup_all_temp_dirs(&self) -> std::io::Result<()> {
        Ok(())
    }

    fn with_privileges(
        &self,
        _ctx: &ExecutionContext,
        f: Box<dyn FnOnce() -> Result<ExecutionResult, ExecutionError> + '_>,
    ) -> Result<ExecutionResult, ExecutionError> {
        f()
    }

    fn is_privilege_escalation_required(&self, cmd: &str) -> bool {
        crate::core::path_safety::is_privilege_escalation(cmd).unwrap_or(true)
    }

    fn send_notification(&self, message: &str, details: &str) {
        self.notifications.lock().unwrap().push((
            crate::core::secrets::redact(message),
            crate::core::secrets::redact(details),
        ));
    }

    fn get_dry_run_results(&self) -> Option<DryRunReport> {
        let analyses = self.analyses.lock().unwrap().clone();
        let notifications = self.notifications.lock().unwrap().clone();
        let admission_failures = self.admission_failures.lock().unwrap().clone();
        let raw_verification = self.verification.lock().unwrap();
        let verification = raw_verification.as_ref().map(DryRunVerificationSummary::from);

        let verification_failed = verification.as_ref().is_some_and(|v| v.failed > 0);
        let admission_failed = !admission_failures.is_empty();
        let pipeline_failed = self.pipeline_error.lock().unwrap().is_some();
        let status = if verification_failed || admission_failed || pipeline_failed {
            "error"
        } else {
            "success"
        };

        let mut warnings = Vec::new();
        let mut errors: Vec<String> = admission_failures.clone();
        if let Some(pipeline_error) = self.pipeline_error.lock().unwrap().clone() {
            errors.push(pipeline_error);
        }
        if let Some(raw) = raw_verification.as_ref() {
            for failure in &raw.failures {
                let line = format!(
                    "{} ({}): {:?}",
                    failure.path.display(),
                    failure.context,
                    failure.reason
                );
                match failure.level {
                    crate::core::verify::Level::Error => errors.push(line),
                    crate::core::verify::Level::Warn | crate::core::verify::Level::Info => {
                        warnings.push(line)
                    }
                }
            }
        }
        drop(raw_verification);

        let summary = format!(
            "{} commands analyzed, {} admission failure(s), status={status}",
            analyses.len(),
            admission_failures.len()
        );

        let mut metadata = HashMap::new();
        metadata.insert(
            "generated_at".to_string(),
            jiff::Zoned::now().strftime("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        );
        metadata.insert("mode".to_string(), "dry-run".to_string());

        Some(DryRunReport {
            metadata,
            status: status.to_string(),
            phase: "execute".to_string(),
            summary,
            resource_analyses: analyses,
            security_analysis: admission_failures,
            notifications,
            file_verification: verification,
            environment_info: HashMap::new(),
            errors,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dry_run_execute_never_spawns_and_returns_zero() {
        let manager = DryRunResourceManager::new();
        let ctx = ExecutionContext::default();
        let result = manager
            .execute_command(&ctx, "/bin/rm", &["-rf".to_string(), "/".to_string()])
            .unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(result.simulated);
        assert!(result.stdout.starts_with("[DRY-RUN] Would execute:"));
    }

    #[test]
    fn dry_run_temp_dir_is_predictable_and_uncreated() {
        let manager = DryRunResourceManager::new();
        let path = manager.create_temp_dir("backup").unwrap();
        assert!(!path.exists());
        assert!(path.to_string_lossy().contains("backup"));
    }

    #[test]
    fn dry_run_report_status_reflects_verification_failures() {
        let manager = DryRunResourceManager::new();
        manager.set_file_verification(VerificationSummary {
            total: 2,
            verified: 1,
            skipped: 0,
            failed: 1,
            duration: Duration::from_millis(5),
            hash_dir_exists: true,
            failures: Vec::new(),
        });
        let report = manager.get_dry_run_results().unwrap();
        assert_eq!(report.status, "error");
    }

    #[test]
    fn dry_run_report_status_reflects_admission_failures() {
        let manager = DryRunResourceManager::new();
        manager.set_admission_failures(vec!["sudo ls: privilege-escalation wrapper".to_string()]);
        let report = manager.get_dry_run_results().unwrap();
        assert_eq!(report.status, "error");
        assert_eq!(report.security_analysis.len(), 1);
        assert!(report.errors.iter().any(|e| e.contains("sudo")));
    }

    #[test]
    fn dry_run_report_status_reflects_pipeline_error() {
        let manager = DryRunResourceManager::new();
        manager.set_pipeline_error("configuration: scope mismatch".to_string());
        let report = manager.get_dry_run_results().unwrap();
        assert_eq!(report.status, "error");
        assert!(report.errors.iter().any(|e| e.contains("scope mismatch")));
    }

    #[test]
    fn normal_mode_executes_real_process() {
        let privilege = PrivilegeManager::new();
        let manager = NormalResourceManager::new(&privilege, std::env::temp_dir());
        let ctx = ExecutionContext::default();
        let result = manager
            .execute_command(&ctx, "/bin/echo", &["hello".to_string()])
            .unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(!result.simulated);
        assert!(result.stdout.contains("hello"));
    }

    #[test]
    fn normal_mode_temp_dir_lifecycle() {
        let privilege = PrivilegeManager::new();
        let manager = NormalResourceManager::new(&privilege, std::env::temp_dir());
        let dir = manager.create_temp_dir("backup").unwrap();
        assert!(dir.is_dir());
        manager.cleanup_temp_dir(&dir).unwrap();
        assert!(!dir.exists());
    }
}

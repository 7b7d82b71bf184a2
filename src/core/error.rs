//! Error taxonomy for the runner
//!
//! Mirrors `spec.md` §7: one `thiserror` enum per concern, composed into a
//! single [`RunnerError`] so call sites can match on concern without losing
//! the specific variant, and so causality is always preserved via `#[from]`.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Errors from the safe file I/O layer (C1).
#[derive(Error, Debug)]
pub enum IoError {
    #[error("path is not absolute: {0}")]
    PathNotAbsolute(PathBuf),

    #[error("path exceeds maximum length of {limit} bytes: {path}")]
    PathTooLong { path: PathBuf, limit: usize },

    #[error("symlink encountered in path: {0}")]
    SymlinkInPath(PathBuf),

    #[error("not a regular file: {0}")]
    NotARegularFile(PathBuf),

    #[error("file exceeds size cap of {limit} bytes: {path}")]
    FileTooLarge { path: PathBuf, limit: u64 },

    #[error("permission denied reading {0}")]
    PermissionDenied(PathBuf),

    #[error("symlink depth exceeded cap of {limit} while resolving {path}")]
    SymlinkDepthExceeded { path: PathBuf, limit: u32 },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the file-hash store (C2).
#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("hash directory does not exist: {0}")]
    HashDirMissing(PathBuf),

    #[error("no manifest recorded for {0}")]
    HashFileMissing(PathBuf),

    #[error("hash mismatch for {path}: expected {expected}, computed {actual}")]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error(
        "manifest filename collision: {existing} and {incoming} both hash to {manifest_name}"
    )]
    HashCollision {
        existing: PathBuf,
        incoming: PathBuf,
        manifest_name: String,
    },

    #[error("manifest for {0} is malformed")]
    MalformedManifest(PathBuf),

    #[error(transparent)]
    Io(#[from] IoError),
}

/// Errors from configuration parsing and validation (C5).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("duplicate key '{key}' in {section}")]
    DuplicateKey { section: String, key: String },

    #[error("unknown field '{field}' in {section}")]
    UnknownField { section: String, field: String },

    #[error("invalid variable name '{0}': must match [A-Za-z0-9_]+ and be non-empty")]
    InvalidVariableName(String),

    #[error("reserved variable name '{0}': names beginning with '__' are forbidden")]
    ReservedVariableName(String),

    #[error(
        "scope mismatch for '{name}' in {location}: expected {expected}, name implies {actual}"
    )]
    ScopeMismatch {
        name: String,
        location: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error(
        "template '{template}' field '{field}' references local variable '{name}' \
         (templates may only reference Global variables — pass '{name}' as a ${{param}} instead)"
    )]
    LocalVariableInTemplate {
        template: String,
        field: String,
        name: String,
    },

    #[error("template '{template}' field '{field}' references undefined global '{name}'")]
    UndefinedGlobalInTemplate {
        template: String,
        field: String,
        name: String,
    },

    #[error("template '{template}' field '{field}' references undefined local '{name}'")]
    UndefinedLocalInTemplate {
        template: String,
        field: String,
        name: String,
    },

    #[error("max_risk_level cannot be 'critical' in configuration ({location})")]
    InvalidMaxRiskLevel { location: String },

    #[error("undefined template referenced: {0}")]
    UndefinedTemplate(String),

    #[error("undefined template parameter '{param}' in {location}")]
    UndefinedParameter { param: String, location: String },

    #[error(
        "template parameter '{param}' is a list but is used in a scalar position in {location}"
    )]
    ParameterTypeMismatch { param: String, location: String },

    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}

/// Errors from the risk evaluator / admission controller (C7).
#[derive(Error, Debug)]
pub enum AdmissionError {
    #[error(
        "command '{command}' denied: detected risk {detected_risk} exceeds max_risk_level {max_allowed} ({reason})"
    )]
    CommandSecurityViolation {
        command: String,
        detected_risk: String,
        max_allowed: String,
        reason: String,
    },

    #[error("command '{0}' is a privilege-escalation wrapper and is always rejected")]
    PrivilegeEscalationProhibited(String),
}

/// Errors from the execution engine (C9).
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("failed to execute '{command}': {reason}")]
    ExecutionFailed { command: String, reason: String },

    #[error("command '{command}' timed out after {timeout_secs}s")]
    Timeout { command: String, timeout_secs: u64 },

    #[error("run cancelled before executing '{0}'")]
    Cancelled(String),
}

/// Errors from the privilege manager (C8). `RestorationFailed` is
/// non-recoverable and is handled specially by the caller (emergency
/// shutdown), never propagated as an ordinary `Result`.
#[derive(Error, Debug)]
pub enum PrivilegeError {
    #[error("failed to elevate privileges: {0}")]
    ElevationFailed(String),

    #[error("unknown user '{0}'")]
    UnknownUser(String),

    #[error("unknown group '{0}'")]
    UnknownGroup(String),

    #[error("failed to restore original privileges: {0}")]
    RestorationFailed(String),
}

/// Top-level error type wrapping every concern.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error(transparent)]
    Io(#[from] IoError),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Privilege(#[from] PrivilegeError),

    #[error("{0}")]
    Other(String),
}

impl RunnerError {
    /// Phase identifier used for user-facing "what/where" error reporting.
    #[must_use]
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Io(_) => "file-io",
            Self::Integrity(_) => "integrity-verification",
            Self::Config(_) => "configuration",
            Self::Admission(_) => "admission",
            Self::Execution(_) => "execution",
            Self::Privilege(_) => "privilege",
            Self::Other(_) => "runner",
        }
    }
}

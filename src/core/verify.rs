//! C6 — Integrity Verification Manager
//!
//! Orchestrates C1–C3 to verify the configuration file, the env file,
//! global files, and each group's files, under a uniform "warn-only on
//! dry-run, strict on normal" policy. Grounded on `PyRo1121-omg`'s
//! `core/security/audit.rs` accumulator style (`AuditLogger` recording
//! structured entries into an in-memory, thread-safe log) generalized from
//! an append-only audit trail to a verification-result collector.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::core::config_model::GlobalSection;
use crate::core::error::{ConfigError, IntegrityError, IoError};
use crate::core::hash_store::FileHashStore;
use crate::core::path_safety::{self, SkipPolicy};
use crate::core::safe_io;

/// Outcome of verifying a single path, as recorded into the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    HashDirMissing,
    HashFileMissing,
    HashMismatch,
    ReadError,
    PermissionDenied,
    StandardPathSkipped,
}

/// Log level a failure should be recorded at, per spec §3's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl FailureReason {
    #[must_use]
    pub fn level(&self) -> Level {
        match self {
            Self::StandardPathSkipped => Level::Info,
            Self::HashFileMissing | Self::PermissionDenied => Level::Warn,
            Self::HashDirMissing | Self::HashMismatch | Self::ReadError => Level::Error,
        }
    }
}

/// One recorded failure in a verification summary.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub path: PathBuf,
    pub reason: FailureReason,
    pub level: Level,
    pub context: String,
}

/// Aggregate result of a verification run (spec §3, §4.6).
#[derive(Debug, Clone)]
pub struct VerificationSummary {
    pub total: usize,
    pub verified: usize,
    pub skipped: usize,
    pub failed: usize,
    pub duration: Duration,
    pub hash_dir_exists: bool,
    pub failures: Vec<FailureRecord>,
}

/// Raised in strict mode on the first verification failure.
#[derive(Debug, thiserror::Error)]
#[error("verification failed for {path} in {context}: {details}")]
pub struct VerificationError {
    pub op: &'static str,
    pub path: PathBuf,
    pub context: String,
    pub details: String,
}

/// Thread-safe accumulator used in warn-only (dry-run) mode. Never writes
/// to disk; `total == success + skip + failure` is maintained by
/// construction.
#[derive(Default)]
pub struct ResultCollector {
    inner: Mutex<CollectorState>,
}

#[derive(Default)]
struct CollectorState {
    verified: usize,
    skipped: usize,
    failures: Vec<FailureRecord>,
    hash_dir_exists: bool,
}

impl ResultCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, _path: &Path, _context: &str) {
        self.inner.lock().unwrap().verified += 1;
    }

    pub fn record_failure(&self, path: &Path, reason: FailureReason, context: &str) {
        let mut state = self.inner.lock().unwrap();
        let level = reason.level();
        state.failures.push(FailureRecord {
            path: path.to_path_buf(),
            reason,
            level,
            context: context.to_string(),
        });
    }

    pub fn record_skip(&self, path: &Path, context: &str, reason: FailureReason) {
        let mut state = self.inner.lock().unwrap();
        state.skipped += 1;
        state.failures.push(FailureRecord {
            path: path.to_path_buf(),
            reason,
            level: Level::Info,
            context: context.to_string(),
        });
    }

    pub fn set_hash_dir_status(&self, exists: bool) {
        self.inner.lock().unwrap().hash_dir_exists = exists;
    }

    #[must_use]
    pub fn snapshot(&self, started_at: Instant) -> VerificationSummary {
        let state = self.inner.lock().unwrap();
        let failed = state
            .failures
            .iter()
            .filter(|f| f.reason.level() != Level::Info)
            .count();
        VerificationSummary {
            total: state.verified + state.skipped + failed,
            verified: state.verified,
            skipped: state.skipped,
            failed,
            duration: started_at.elapsed(),
            hash_dir_exists: state.hash_dir_exists,
            failures: state.failures.clone(),
        }
    }
}

/// Whether verification failures should raise (Strict) or be recorded and
/// continue (WarnOnly, used by dry-run).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationMode {
    Strict,
    WarnOnly,
}

/// Orchestrates C1–C3 against a hash store under the configured skip
/// policy and verification mode.
pub struct VerificationManager {
    store: FileHashStore,
    mode: VerificationMode,
    skip_policy: SkipPolicy,
    collector: ResultCollector,
}

impl VerificationManager {
    #[must_use]
    pub fn new(hash_dir: impl Into<PathBuf>, mode: VerificationMode, skip_policy: SkipPolicy) -> Self {
        let store = FileHashStore::new(hash_dir);
        let collector = ResultCollector::new();
        collector.set_hash_dir_status(store.hash_dir_exists());
        Self {
            store,
            mode,
            skip_policy,
            collector,
        }
    }

    #[must_use]
    pub fn collector(&self) -> &ResultCollector {
        &self.collector
    }

    /// Verify and read the configuration file itself.
    pub fn verify_and_read_config(&self, path: &Path) -> Result<Vec<u8>, ConfigError> {
        self.verify_one(path, "config")
            .map_err(ConfigError::Integrity)?;
        safe_io::safe_read(path)
            .map_err(|e| ConfigError::Integrity(IntegrityError::Io(e)))
    }

    /// Verify the env file declared in `[global]`, if any.
    pub fn verify_env_file(&self, path: &Path) -> Result<(), IntegrityError> {
        self.verify_one(path, "env")
    }

    /// Verify every file in `global.verify_files`.
    pub fn verify_global_files(&self, global: &GlobalSection) -> Result<(), IntegrityError> {
        for path in &global.verify_files {
            self.verify_one(Path::new(path), "global")?;
        }
        Ok(())
    }

    /// Verify a group's explicit `verify_files` plus each command's
    /// resolved executable path.
    pub fn verify_group_files(
        &self,
        group_name: &str,
        verify_files: &[String],
        resolved_commands: &[PathBuf],
    ) -> Result<(), IntegrityError> {
        let context = format!("group:{group_name}");
        for path in verify_files {
            self.verify_one(Path::new(path), &context)?;
        }
        for path in resolved_commands {
            self.verify_one(path, &context)?;
        }
        Ok(())
    }

    /// Verify a single path against the hash store, honoring the skip
    /// policy and recording into the collector in warn-only mode.
    pub fn verify_one(&self, path: &Path, context: &str) -> Result<(), IntegrityError> {
        if path_safety::should_skip_verification(path, self.skip_policy) {
            self.collector
                .record_skip(path, context, FailureReason::StandardPathSkipped);
            return Ok(());
        }

        if !self.store.hash_dir_exists() {
            return self.handle_outcome(
                path,
                context,
                Err(IntegrityError::HashDirMissing(self.store.hash_dir().to_path_buf())),
            );
        }

        let result = self.store.verify(path);
        self.handle_outcome(path, context, result)
    }

    fn handle_outcome(
        &self,
        path: &Path,
        context: &str,
        result: Result<(), IntegrityError>,
    ) -> Result<(), IntegrityError> {
        match result {
            Ok(()) => {
                self.collector.record_success(path, context);
                Ok(())
            }
            Err(err) => {
                if self.mode == VerificationMode::Strict {
                    return Err(err);
                }
                let reason = classify_failure(&err);
                self.collector.record_failure(path, reason, context);
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn snapshot(&self, started_at: Instant) -> VerificationSummary {
        self.collector.snapshot(started_at)
    }
}

fn classify_failure(err: &IntegrityError) -> FailureReason {
    match err {
        IntegrityError::HashDirMissing(_) => FailureReason::HashDirMissing,
        IntegrityError::HashFileMissing(_) => FailureReason::HashFileMissing,
        IntegrityError::HashMismatch { .. } => FailureReason::HashMismatch,
        IntegrityError::HashCollision { .. } | IntegrityError::MalformedManifest(_) => {
            FailureReason::ReadError
        }
        IntegrityError::Io(IoError::PermissionDenied(_)) => FailureReason::PermissionDenied,
        IntegrityError::Io(_) => FailureReason::ReadError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_manager(mode: VerificationMode) -> (TempDir, TempDir, VerificationManager) {
        let hash_dir = TempDir::new().unwrap();
        let target_dir = TempDir::new().unwrap();
        let manager = VerificationManager::new(hash_dir.path(), mode, SkipPolicy::default());
        (hash_dir, target_dir, manager)
    }

    #[test]
    fn s1_verify_one_succeeds_after_record() {
        let (hash_dir, target_dir, manager) = make_manager(VerificationMode::Strict);
        let target = target_dir.path().join("cfg");
        std::fs::write(&target, b"data").unwrap();
        let store = FileHashStore::new(hash_dir.path());
        store.record(&target).unwrap();

        assert!(manager.verify_one(&target, "global").is_ok());
        let summary = manager.snapshot(Instant::now());
        assert_eq!(summary.verified, 1);
        assert_eq!(summary.failed, 0);
    }

    #[test]
    fn s2_strict_mode_returns_error_on_mismatch() {
        let (hash_dir, target_dir, manager) = make_manager(VerificationMode::Strict);
        let target = target_dir.path().join("cfg");
        std::fs::write(&target, b"data").unwrap();
        let store = FileHashStore::new(hash_dir.path());
        store.record(&target).unwrap();
        std::fs::write(&target, b"tampered").unwrap();

        let err = manager.verify_one(&target, "global").unwrap_err();
        assert!(matches!(err, IntegrityError::HashMismatch { .. }));
    }

    #[test]
    fn s3_warn_only_mode_records_and_continues() {
        let (hash_dir, target_dir, manager) = make_manager(VerificationMode::WarnOnly);
        let target = target_dir.path().join("cfg");
        std::fs::write(&target, b"data").unwrap();
        let store = FileHashStore::new(hash_dir.path());
        store.record(&target).unwrap();
        std::fs::write(&target, b"tampered").unwrap();

        assert!(manager.verify_one(&target, "global").is_ok());
        let summary = manager.snapshot(Instant::now());
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.verified, 0);
        assert_eq!(summary.total, summary.verified + summary.skipped + summary.failed);
        assert_eq!(summary.failures[0].reason, FailureReason::HashMismatch);
        assert_eq!(summary.failures[0].level, Level::Error);
    }

    #[test]
    fn skip_policy_records_info_level_skip() {
        let hash_dir = TempDir::new().unwrap();
        let manager = VerificationManager::new(
            hash_dir.path(),
            VerificationMode::WarnOnly,
            SkipPolicy {
                skip_standard_paths: true,
            },
        );
        manager.verify_one(Path::new("/bin/ls"), "global").unwrap();
        let summary = manager.snapshot(Instant::now());
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 0);
    }

    #[test]
    fn missing_hash_dir_strict_is_fatal() {
        let target_dir = TempDir::new().unwrap();
        let target = target_dir.path().join("cfg");
        std::fs::write(&target, b"data").unwrap();
        let manager = VerificationManager::new(
            target_dir.path().join("no_such_hash_dir"),
            VerificationMode::Strict,
            SkipPolicy::default(),
        );
        let err = manager.verify_one(&target, "global").unwrap_err();
        assert!(matches!(err, IntegrityError::HashDirMissing(_)));
    }

    #[test]
    fn total_invariant_holds_across_mixed_outcomes() {
        let (hash_dir, target_dir, manager) = make_manager(VerificationMode::WarnOnly);
        let store = FileHashStore::new(hash_dir.path());

        let good = target_dir.path().join("good");
        std::fs::write(&good, b"ok").unwrap();
        store.record(&good).unwrap();
        manager.verify_one(&good, "global").unwrap();

        let missing = target_dir.path().join("missing");
        std::fs::write(&missing, b"no manifest").unwrap();
        manager.verify_one(&missing, "global").unwrap();

        let summary = manager.snapshot(Instant::now());
        assert_eq!(summary.total, summary.verified + summary.skipped + summary.failed);
    }
}

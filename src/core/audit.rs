//! Admission-decision audit trail (SPEC_FULL §B.4)
//!
//! Every admitted or rejected command is recorded as a hash-chained JSONL
//! entry so the evidence trail is tamper-evident, regardless of whether the
//! run was Normal or DryRun. Grounded directly on `PyRo1121-omg`'s
//! `core/security/audit.rs` `AuditLogger`/`AuditEntry` (append-only JSONL,
//! `prev_hash`/`hash` chaining, `jiff` timestamps, `uuid` entry ids),
//! narrowed from a general event taxonomy to the single `AdmissionOutcome`
//! this crate needs.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::risk::RiskLevel;

/// Whether a command was let through or blocked by the admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionOutcome {
    Admitted,
    Rejected,
}

/// One hash-chained record of an admission decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: String,
    pub group: String,
    pub command: String,
    pub detected_risk: String,
    pub max_allowed: String,
    pub outcome: AdmissionOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub prev_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl AuditEntry {
    fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(self.timestamp.as_bytes());
        hasher.update(self.group.as_bytes());
        hasher.update(self.command.as_bytes());
        hasher.update(self.detected_risk.as_bytes());
        hasher.update(self.max_allowed.as_bytes());
        hasher.update(format!("{:?}", self.outcome).as_bytes());
        if let Some(reason) = &self.reason {
            hasher.update(reason.as_bytes());
        }
        hasher.update(self.prev_hash.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Verify this entry's recorded hash matches its fields.
    #[must_use]
    pub fn verify(&self) -> bool {
        self.hash.as_deref() == Some(self.compute_hash().as_str())
    }
}

/// Append-only, hash-chained admission-decision log.
pub struct AdmissionAuditLog {
    log_path: PathBuf,
    last_hash: String,
}

impl AdmissionAuditLog {
    /// Open (or create) the audit log under `audit_dir`.
    pub fn open(audit_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(audit_dir)?;
        let log_path = audit_dir.join("admissions.jsonl");
        let last_hash = Self::last_hash(&log_path)?;
        Ok(Self { log_path, last_hash })
    }

    fn last_hash(path: &Path) -> std::io::Result<String> {
        if !path.exists() {
            return Ok("genesis".to_string());
        }
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut last = "genesis".to_string();
        for line in reader.lines().map_while(Result::ok) {
            if let Ok(entry) = serde_json::from_str::<AuditEntry>(&line) {
                if let Some(hash) = entry.hash {
                    last = hash;
                }
            }
        }
        Ok(last)
    }

    /// Record one admission decision.
    pub fn record(
        &mut self,
        group: &str,
        command: &str,
        detected_risk: RiskLevel,
        max_allowed: RiskLevel,
        outcome: AdmissionOutcome,
        reason: Option<String>,
    ) -> std::io::Result<()> {
        let mut entry = AuditEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: jiff::Zoned::now()
                .strftime("%Y-%m-%dT%H:%M:%S%.3fZ")
                .to_string(),
            group: group.to_string(),
            command: command.to_string(),
            detected_risk: detected_risk.to_string(),
            max_allowed: max_allowed.to_string(),
            outcome,
            reason,
            prev_hash: self.last_hash.clone(),
            hash: None,
        };
        entry.hash = Some(entry.compute_hash());
        self.last_hash = entry.hash.clone().unwrap();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(file, "{}", serde_json::to_string(&entry)?)?;
        Ok(())
    }

    /// Replay the log, verifying every entry's hash chains to the one
    /// before it. Returns the index of the first broken link, if any.
    pub fn verify_chain(&self) -> std::io::Result<Option<usize>> {
        if !self.log_path.exists() {
            return Ok(None);
        }
        let file = File::open(&self.log_path)?;
        let reader = BufReader::new(file);
        let mut expected_prev = "genesis".to_string();
        for (idx, line) in reader.lines().enumerate() {
            let entry: AuditEntry = serde_json::from_str(&line?)?;
            if !entry.verify() || entry.prev_hash != expected_prev {
                return Ok(Some(idx));
            }
            expected_prev = entry.hash.clone().unwrap_or_default();
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn chain_verifies_after_several_records() {
        let dir = TempDir::new().unwrap();
        let mut log = AdmissionAuditLog::open(dir.path()).unwrap();
        log.record(
            "backup",
            "/usr/local/bin/aws",
            RiskLevel::Low,
            RiskLevel::Low,
            AdmissionOutcome::Admitted,
            None,
        )
        .unwrap();
        log.record(
            "backup",
            "sudo",
            RiskLevel::Critical,
            RiskLevel::High,
            AdmissionOutcome::Rejected,
            Some("privilege escalation prohibited".to_string()),
        )
        .unwrap();

        assert_eq!(log.verify_chain().unwrap(), None);
    }

    #[test]
    fn tampered_entry_breaks_chain() {
        let dir = TempDir::new().unwrap();
        let mut log = AdmissionAuditLog::open(dir.path()).unwrap();
        log.record(
            "backup",
            "/bin/ls",
            RiskLevel::Low,
            RiskLevel::Low,
            AdmissionOutcome::Admitted,
            None,
        )
        .unwrap();

        let path = dir.path().join("admissions.jsonl");
        let content = std::fs::read_to_string(&path).unwrap();
        let tampered = content.replace("/bin/ls", "/bin/evil");
        std::fs::write(&path, tampered).unwrap();

        assert_eq!(log.verify_chain().unwrap(), Some(0));
    }
}

//! C7 — Risk Evaluator
//!
//! Classifies an expanded command into a totally-ordered [`RiskLevel`] and
//! decides admission against a configured ceiling. Grounded on
//! `PyRo1121-omg`'s `core/security/secrets.rs` `ThreatPattern` severity
//! ordering (here a five-level total order instead of a pattern table) and
//! on the `other_examples` threat-classification sweep that chains several
//! boolean classifiers into one decision.

use crate::core::config_model::ConfiguredRiskLevel;
use crate::core::error::AdmissionError;
use crate::core::path_safety::{
    is_destructive_file_operation, is_network_operation, is_privilege_escalation,
    is_system_modification,
};

/// Totally ordered risk classification (spec §3): `Unknown < Low < Medium <
/// High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Unknown => "unknown",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{label}")
    }
}

impl From<ConfiguredRiskLevel> for RiskLevel {
    fn from(value: ConfiguredRiskLevel) -> Self {
        match value {
            ConfiguredRiskLevel::Low => Self::Low,
            ConfiguredRiskLevel::Medium => Self::Medium,
            ConfiguredRiskLevel::High => Self::High,
        }
    }
}

/// Classify an expanded command (§4.7). `cmd` should already be resolved to
/// an absolute path where possible so `is_privilege_escalation` can follow
/// the symlink chain.
pub fn evaluate(cmd: &str, args: &[String]) -> Result<RiskLevel, crate::core::error::IoError> {
    if is_privilege_escalation(cmd)? {
        return Ok(RiskLevel::Critical);
    }
    if is_destructive_file_operation(cmd, args) {
        return Ok(RiskLevel::High);
    }
    let (is_network, is_high_risk) = is_network_operation(cmd, args);
    if is_network {
        return Ok(if is_high_risk {
            RiskLevel::High
        } else {
            RiskLevel::Medium
        });
    }
    if is_system_modification(cmd, args) {
        return Ok(RiskLevel::Medium);
    }
    Ok(RiskLevel::Low)
}

/// Admission decision: permitted iff `risk <= ceiling`. Privilege-escalation
/// commands always evaluate to `Critical`, which exceeds every declared
/// ceiling (ceilings cannot be set to `Critical` in configuration), so they
/// are unconditionally rejected.
pub fn admit(
    command: &str,
    risk: RiskLevel,
    ceiling: ConfiguredRiskLevel,
) -> Result<(), AdmissionError> {
    let ceiling: RiskLevel = ceiling.into();
    if risk <= ceiling {
        return Ok(());
    }
    if risk == RiskLevel::Critical {
        return Err(AdmissionError::PrivilegeEscalationProhibited(
            command.to_string(),
        ));
    }
    Err(AdmissionError::CommandSecurityViolation {
        command: command.to_string(),
        detected_risk: risk.to_string(),
        max_allowed: ceiling.to_string(),
        reason: format!("evaluated risk {risk} exceeds ceiling {ceiling}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_matches_spec() {
        assert!(RiskLevel::Unknown < RiskLevel::Low);
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
    }

    #[test]
    fn sudo_is_always_critical() {
        let risk = evaluate("/usr/bin/sudo", &["ls".to_string()]).unwrap();
        assert_eq!(risk, RiskLevel::Critical);
    }

    #[test]
    fn s4_privilege_escalation_rejected_regardless_of_ceiling() {
        let risk = evaluate("sudo", &["ls".to_string()]).unwrap();
        let err = admit("sudo", risk, ConfiguredRiskLevel::High).unwrap_err();
        assert!(matches!(
            err,
            AdmissionError::PrivilegeEscalationProhibited(_)
        ));
    }

    #[test]
    fn plain_command_is_low_and_admitted_at_low_ceiling() {
        let risk = evaluate("/bin/echo", &["hi".to_string()]).unwrap();
        assert_eq!(risk, RiskLevel::Low);
        assert!(admit("/bin/echo", risk, ConfiguredRiskLevel::Low).is_ok());
    }

    #[test]
    fn destructive_rm_exceeds_low_ceiling() {
        let risk = evaluate("rm", &["-rf".to_string(), "/data".to_string()]).unwrap();
        assert_eq!(risk, RiskLevel::High);
        let err = admit("rm", risk, ConfiguredRiskLevel::Low).unwrap_err();
        assert!(matches!(
            err,
            AdmissionError::CommandSecurityViolation { .. }
        ));
        assert!(admit("rm", risk, ConfiguredRiskLevel::High).is_ok());
    }

    #[test]
    fn network_command_is_medium_unless_high_risk_flag() {
        let risk = evaluate("curl", &["https://example.com".to_string()]).unwrap();
        assert_eq!(risk, RiskLevel::Medium);

        let risk = evaluate(
            "curl",
            &["-X".to_string(), "POST".to_string(), "https://example.com".to_string()],
        )
        .unwrap();
        assert_eq!(risk, RiskLevel::High);
    }
}

//! Property-based tests for the quantified invariants in spec §8.
//!
//! Grounded on `PyRo1121-omg`'s `tests/property_tests_v2.rs` (`proptest!`
//! macro usage, one module per invariant family).

#![allow(clippy::unwrap_used)]

use proptest::prelude::*;

use warden_runner::core::risk::RiskLevel;
use warden_runner::core::variables::{determine_scope, Scope};

// ═══════════════════════════════════════════════════════════════
// SCOPE DETERMINATION (spec §8 invariant 3)
// ═══════════════════════════════════════════════════════════════

proptest! {
    /// Every name resolves to exactly one of the three scopes — the
    /// function never panics and always returns a concrete variant.
    #[test]
    fn prop_scope_determination_is_total(name in "[A-Za-z0-9_]{0,24}") {
        let scope = determine_scope(&name);
        prop_assert!(matches!(scope, Scope::Global | Scope::Local | Scope::Invalid));
    }

    /// Any name starting with an uppercase ASCII letter and containing
    /// only alphanumerics/underscore is Global.
    #[test]
    fn prop_uppercase_first_char_is_always_global(
        first in "[A-Z]",
        rest in "[A-Za-z0-9_]{0,16}"
    ) {
        let name = format!("{first}{rest}");
        prop_assert_eq!(determine_scope(&name), Scope::Global);
    }

    /// Any name starting with a lowercase letter and not starting with
    /// `__` is Local.
    #[test]
    fn prop_lowercase_first_char_is_local_unless_reserved(
        first in "[a-z]",
        rest in "[A-Za-z0-9_]{0,16}"
    ) {
        let name = format!("{first}{rest}");
        prop_assert_eq!(determine_scope(&name), Scope::Local);
    }

    /// Any name beginning with the reserved `__` prefix is always
    /// Invalid, regardless of what follows.
    #[test]
    fn prop_double_underscore_prefix_is_always_invalid(rest in "[A-Za-z0-9_]{0,16}") {
        let name = format!("__{rest}");
        prop_assert_eq!(determine_scope(&name), Scope::Invalid);
    }

    /// A name containing any character outside `[A-Za-z0-9_]` is
    /// Invalid, no matter what the rest of the name looks like.
    #[test]
    fn prop_non_alnum_underscore_char_makes_name_invalid(
        prefix in "[A-Za-z]{1,8}",
        suffix in "[A-Za-z0-9_]{0,8}"
    ) {
        let name = format!("{prefix}-{suffix}");
        prop_assert_eq!(determine_scope(&name), Scope::Invalid);
    }
}

// ═══════════════════════════════════════════════════════════════
// VERIFICATION ACCOUNTING (spec §8 invariant 8)
// ═══════════════════════════════════════════════════════════════

proptest! {
    /// For any sequence of success/failure/skip recordings, the collector's
    /// snapshot always satisfies `total == verified + skipped + failed`.
    #[test]
    fn prop_verification_total_equals_verified_skipped_failed(
        ops in prop::collection::vec(0u8..3, 0..50)
    ) {
        use std::path::Path;
        use std::time::Instant;
        use warden_runner::core::verify::{FailureReason, ResultCollector};

        let collector = ResultCollector::new();
        let path = Path::new("/tmp/example");
        for op in &ops {
            match op {
                0 => collector.record_success(path, "ctx"),
                1 => collector.record_failure(path, FailureReason::HashMismatch, "ctx"),
                _ => collector.record_skip(path, "ctx", FailureReason::StandardPathSkipped),
            }
        }

        let summary = collector.snapshot(Instant::now());
        prop_assert_eq!(summary.total, summary.verified + summary.skipped + summary.failed);
    }
}

// ═══════════════════════════════════════════════════════════════
// RISK ORDERING (spec §8 invariants 5-6, via the RiskLevel ordering itself)
// ═══════════════════════════════════════════════════════════════

proptest! {
    /// `Critical` is strictly greater than every non-Critical level
    /// (used by admission to reject privilege escalation unconditionally).
    #[test]
    fn prop_critical_outranks_every_other_level(level_idx in 0usize..4) {
        let levels = [RiskLevel::Unknown, RiskLevel::Low, RiskLevel::Medium, RiskLevel::High];
        prop_assert!(RiskLevel::Critical > levels[level_idx]);
    }
}

// ═══════════════════════════════════════════════════════════════
// NON-RECURSIVE EXPANSION (spec §8 invariant 10)
// ═══════════════════════════════════════════════════════════════

proptest! {
    /// A value containing a literal `%{...}`-shaped substring, once
    /// substituted in for a variable reference, appears verbatim in the
    /// output rather than being expanded a second time.
    #[test]
    fn prop_expansion_does_not_rescan_substituted_values(inner in "[A-Za-z]{1,8}") {
        use warden_runner::core::variables::{expand_variables, VarValue, VariableRegistry};

        let mut registry = VariableRegistry::new();
        let literal_marker = format!("%{{{inner}}}");
        registry
            .register_global("Carrier", VarValue::Scalar(literal_marker.clone()))
            .unwrap();

        let result = expand_variables("%{Carrier}", &registry).unwrap();
        prop_assert_eq!(result, literal_marker);
    }
}

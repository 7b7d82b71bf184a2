//! Shared filesystem policy inputs with test-friendly overrides.
//!
//! Spec §9 treats "standard system paths" as a policy input rather than a
//! hardcoded constant; this module owns that policy plus a couple of
//! environment-driven defaults, following `PyRo1121-omg`'s
//! `OnceLock<RwLock<..>>` override pattern so tests can swap them out
//! without poisoning global state across test binaries.

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

#[derive(Default, Debug)]
struct PathOverrides {
    standard_paths: Option<Vec<String>>,
}

static OVERRIDES: OnceLock<RwLock<PathOverrides>> = OnceLock::new();

fn get_overrides() -> &'static RwLock<PathOverrides> {
    OVERRIDES.get_or_init(|| RwLock::new(PathOverrides::default()))
}

/// Override the standard-path prefixes used by `should_skip_verification`.
/// Test-only escape hatch; production code should rely on the fixed default.
pub fn set_standard_paths_override(paths: Option<Vec<String>>) {
    get_overrides().write().standard_paths = paths;
}

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var_os(var).map(PathBuf::from)
}

/// The fixed set of standard system-binary prefixes eligible for
/// verification skipping (spec §4.3 point 4, §9 open question: fixed list,
/// exposed as policy rather than inlined at every call site).
#[must_use]
pub fn standard_path_prefixes() -> Vec<String> {
    if let Some(ref overridden) = get_overrides().read().standard_paths {
        return overridden.clone();
    }
    vec![
        "/bin/".to_string(),
        "/sbin/".to_string(),
        "/usr/bin/".to_string(),
        "/usr/sbin/".to_string(),
    ]
}

/// Default hash directory when none is configured in `[global]`.
#[must_use]
pub fn default_hash_dir() -> PathBuf {
    env_path("WARDEN_HASH_DIR").unwrap_or_else(|| PathBuf::from("/usr/local/etc/warden/hashes"))
}

/// Base directory under which per-run temp directories are created.
#[must_use]
pub fn temp_dir_root() -> PathBuf {
    env_path("WARDEN_TEMP_ROOT").unwrap_or_else(std::env::temp_dir)
}

/// Runner config directory, used only to resolve a config path given as a
/// bare filename on the CLI (default: /etc/warden).
#[must_use]
pub fn config_dir() -> PathBuf {
    env_path("WARDEN_CONFIG_DIR").unwrap_or_else(|| PathBuf::from("/etc/warden"))
}

/// Audit-trail directory for admission-decision logging (ambient stack,
/// §A.4 of SPEC_FULL.md): nested under the run's hash directory unless
/// overridden.
#[must_use]
pub fn audit_dir(hash_dir: &Path) -> PathBuf {
    env_path("WARDEN_AUDIT_DIR").unwrap_or_else(|| hash_dir.join("audit"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_standard_paths_match_fixed_list() {
        set_standard_paths_override(None);
        let paths = standard_path_prefixes();
        assert_eq!(paths, vec!["/bin/", "/sbin/", "/usr/bin/", "/usr/sbin/"]);
    }

    #[test]
    fn override_replaces_standard_paths() {
        set_standard_paths_override(Some(vec!["/opt/approved/".to_string()]));
        assert_eq!(standard_path_prefixes(), vec!["/opt/approved/"]);
        set_standard_paths_override(None);
    }

    #[test]
    fn default_hash_dir_is_absolute() {
        assert!(default_hash_dir().is_absolute());
    }

    #[test]
    fn audit_dir_nests_under_hash_dir_by_default() {
        let hash_dir = PathBuf::from("/usr/local/etc/warden/hashes");
        assert_eq!(audit_dir(&hash_dir), hash_dir.join("audit"));
    }
}

//! C3 — Path & Command Safety
//!
//! `PATH` resolution, privilege-escalation detection, and the command-shape
//! classifiers consumed by the risk evaluator (C7). Grounded on
//! `PyRo1121-omg`'s `core/security/secrets.rs` regex-table style (here
//! adapted to plain string/slice matching, since these are structural
//! command-shape checks rather than content scanning) and on `paths.rs`
//! for the standard-path policy input.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use crate::core::error::IoError;
use crate::core::paths;

/// Names that always indicate a privilege-escalation wrapper.
const ESCALATION_NAMES: &[&str] = &["sudo", "su", "doas"];

/// Maximum number of symlink hops followed while collecting plausible names.
pub const SYMLINK_DEPTH_CAP: u32 = 40;

/// Resolve `cmdname` to an absolute path using `path_env` (a `:`-joined
/// `PATH`-style string). An absolute `cmdname` is returned after a basic
/// path-traversal sanity check (no `..` components); a relative `cmdname`
/// is resolved by walking `path_env` via `which`, which already applies the
/// executable-bit check `is_executable_regular_file` used to do by hand.
pub fn resolve_command(cmdname: &str, path_env: &str) -> Result<PathBuf, IoError> {
    let candidate = Path::new(cmdname);
    if candidate.is_absolute() {
        if candidate
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(IoError::PathNotAbsolute(candidate.to_path_buf()));
        }
        return Ok(candidate.to_path_buf());
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    which::which_in(cmdname, Some(path_env), cwd)
        .map_err(|_| IoError::NotARegularFile(PathBuf::from(cmdname)))
}

fn basename(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// Collect the basename of `cmdname` plus the basename of every symlink
/// target encountered while following the chain, up to [`SYMLINK_DEPTH_CAP`]
/// hops. Returns `SymlinkDepthExceeded` if the chain is longer than that.
pub fn plausible_names(cmdname: &str) -> Result<Vec<String>, IoError> {
    let mut names = Vec::new();
    let path = Path::new(cmdname);
    if let Some(name) = basename(path) {
        names.push(name);
    }

    if !path.is_absolute() {
        return Ok(names);
    }

    let mut current = path.to_path_buf();
    let mut hops = 0u32;
    loop {
        match std::fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                hops += 1;
                if hops > SYMLINK_DEPTH_CAP {
                    return Err(IoError::SymlinkDepthExceeded {
                        path: path.to_path_buf(),
                        limit: SYMLINK_DEPTH_CAP,
                    });
                }
                let target = std::fs::read_link(&current).map_err(|source| IoError::Io {
                    path: current.clone(),
                    source,
                })?;
                current = if target.is_absolute() {
                    target
                } else {
                    current
                        .parent()
                        .map(|p| p.join(&target))
                        .unwrap_or(target)
                };
                if let Some(name) = basename(&current) {
                    names.push(name);
                }
            }
            _ => break,
        }
    }
    Ok(names)
}

/// True if `cmdname` (or any name along its symlink chain) is a known
/// privilege-escalation wrapper.
pub fn is_privilege_escalation(cmdname: &str) -> Result<bool, IoError> {
    let names = plausible_names(cmdname)?;
    Ok(names
        .iter()
        .any(|n| ESCALATION_NAMES.contains(&n.as_str())))
}

const DESTRUCTIVE_RM_FLAGS: &[&str] = &["-rf", "-fr", "-r", "-f", "--recursive", "--force"];

/// Structural classifier: `rm -rf ...`, `find ... -delete`, `shred`, etc.
#[must_use]
pub fn is_destructive_file_operation(cmd: &str, args: &[String]) -> bool {
    let base = Path::new(cmd)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| cmd.to_string());

    match base.as_str() {
        "rm" | "rmdir" | "shred" => args
            .iter()
            .any(|a| DESTRUCTIVE_RM_FLAGS.contains(&a.as_str()))
            || base == "shred",
        "find" => args.iter().any(|a| a == "-delete" || a == "-exec"),
        "dd" => args.iter().any(|a| a.starts_with("of=")),
        "mkfs" | "wipefs" => true,
        _ => false,
    }
}

const NETWORK_COMMANDS: &[&str] = &["curl", "wget", "ssh", "scp", "rsync", "nc", "ncat", "ftp"];
const HIGH_RISK_NETWORK_FLAGS: &[&str] = &["-X", "--upload-file", "-T", "--data-binary"];

/// Returns `(is_network, is_high_risk)`.
#[must_use]
pub fn is_network_operation(cmd: &str, args: &[String]) -> (bool, bool) {
    let base = Path::new(cmd)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| cmd.to_string());
    if !NETWORK_COMMANDS.contains(&base.as_str()) {
        return (false, false);
    }
    let high_risk = args
        .iter()
        .any(|a| HIGH_RISK_NETWORK_FLAGS.contains(&a.as_str()))
        || matches!(base.as_str(), "ssh" | "scp" | "rsync");
    (true, high_risk)
}

const SYSTEM_MODIFICATION_COMMANDS: &[&str] = &[
    "mount", "umount", "systemctl", "service", "apt", "apt-get", "yum", "dnf", "pacman",
    "useradd", "userdel", "usermod", "groupadd", "chown", "chmod", "sysctl",
];

/// Structural classifier: package managers, service managers, `mount`, etc.
#[must_use]
pub fn is_system_modification(cmd: &str, _args: &[String]) -> bool {
    let base = Path::new(cmd)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| cmd.to_string());
    SYSTEM_MODIFICATION_COMMANDS.contains(&base.as_str())
}

/// Policy governing standard-path verification skipping (§4.3 point 4).
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipPolicy {
    pub skip_standard_paths: bool,
}

/// True if `policy` enables skipping and `path` begins with a standard
/// system-binary prefix.
#[must_use]
pub fn should_skip_verification(path: &Path, policy: SkipPolicy) -> bool {
    if !policy.skip_standard_paths {
        return false;
    }
    let path_str = path.to_string_lossy();
    paths::standard_path_prefixes()
        .iter()
        .any(|prefix| path_str.starts_with(prefix.as_str()))
}

/// Best-effort sanity check used before trusting a resolved directory entry
/// during PATH walking: the entry must be owned sanely and not world-writable
/// alongside being group/other writable without the sticky bit. This is a
/// permissive accessibility check, not a strict policy gate (spec §4.3.1).
#[must_use]
pub fn directory_is_accessible(dir: &Path) -> bool {
    std::fs::metadata(dir)
        .map(|meta| meta.is_dir() && meta.uid() != u32::MAX)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::{symlink, PermissionsExt};
    use tempfile::TempDir;

    #[test]
    fn resolves_absolute_command_verbatim() {
        let resolved = resolve_command("/usr/bin/env", "").unwrap();
        assert_eq!(resolved, PathBuf::from("/usr/bin/env"));
    }

    #[test]
    fn rejects_absolute_command_with_parent_traversal() {
        let err = resolve_command("/usr/bin/../bin/env", "").unwrap_err();
        assert!(matches!(err, IoError::PathNotAbsolute(_)));
    }

    #[test]
    fn resolves_relative_command_from_path_env() {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("mytool");
        std::fs::write(&bin, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        let path_env = dir.path().to_string_lossy().to_string();
        let resolved = resolve_command("mytool", &path_env).unwrap();
        assert_eq!(resolved, bin);
    }

    #[test]
    fn resolve_skips_non_executable_entries() {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("mytool");
        std::fs::write(&bin, b"not executable").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o644)).unwrap();

        let path_env = dir.path().to_string_lossy().to_string();
        assert!(resolve_command("mytool", &path_env).is_err());
    }

    #[test]
    fn detects_sudo_directly() {
        assert!(is_privilege_escalation("/usr/bin/sudo").unwrap());
        assert!(is_privilege_escalation("sudo").unwrap());
        assert!(!is_privilege_escalation("/usr/bin/ls").unwrap());
    }

    #[test]
    fn detects_escalation_through_symlink() {
        let dir = TempDir::new().unwrap();
        let real_sudo = dir.path().join("sudo");
        std::fs::write(&real_sudo, b"").unwrap();
        let disguised = dir.path().join("backup-tool");
        symlink(&real_sudo, &disguised).unwrap();

        assert!(is_privilege_escalation(disguised.to_str().unwrap()).unwrap());
    }

    #[test]
    fn symlink_chain_at_cap_depth_succeeds() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("real");
        std::fs::write(&target, b"bin").unwrap();

        let mut previous = target.clone();
        let mut entry = target.clone();
        for i in 0..SYMLINK_DEPTH_CAP {
            let link = dir.path().join(format!("hop{i}"));
            symlink(&previous, &link).unwrap();
            previous = link.clone();
            entry = link;
        }

        let names = plausible_names(entry.to_str().unwrap()).unwrap();
        assert!(names.contains(&"real".to_string()));
    }

    #[test]
    fn symlink_chain_past_cap_depth_is_rejected() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("real");
        std::fs::write(&target, b"bin").unwrap();

        let mut previous = target.clone();
        let mut entry = target.clone();
        for i in 0..(SYMLINK_DEPTH_CAP + 1) {
            let link = dir.path().join(format!("hop{i}"));
            symlink(&previous, &link).unwrap();
            previous = link.clone();
            entry = link;
        }

        let err = plausible_names(entry.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, IoError::SymlinkDepthExceeded { .. }));
    }

    #[test]
    fn destructive_rm_detected() {
        assert!(is_destructive_file_operation(
            "rm",
            &["-rf".to_string(), "/data".to_string()]
        ));
        assert!(!is_destructive_file_operation(
            "rm",
            &["/data/single-file".to_string()]
        ));
    }

    #[test]
    fn find_delete_detected() {
        assert!(is_destructive_file_operation(
            "find",
            &[".".to_string(), "-delete".to_string()]
        ));
    }

    #[test]
    fn network_classification() {
        let (is_net, high) = is_network_operation("curl", &["https://example.com".to_string()]);
        assert!(is_net);
        assert!(!high);

        let (is_net, high) = is_network_operation(
            "curl",
            &["-X".to_string(), "POST".to_string(), "https://example.com".to_string()],
        );
        assert!(is_net);
        assert!(high);

        let (is_net, _) = is_network_operation("ls", &[]);
        assert!(!is_net);
    }

    #[test]
    fn system_modification_classification() {
        assert!(is_system_modification("mount", &[]));
        assert!(is_system_modification("/usr/bin/apt-get", &["update".to_string()]));
        assert!(!is_system_modification("ls", &[]));
    }

    #[test]
    fn skip_verification_respects_policy_and_prefix() {
        let disabled = SkipPolicy {
            skip_standard_paths: false,
        };
        assert!(!should_skip_verification(Path::new("/bin/ls"), disabled));

        let enabled = SkipPolicy {
            skip_standard_paths: true,
        };
        assert!(should_skip_verification(Path::new("/bin/ls"), enabled));
        assert!(!should_skip_verification(Path::new("/opt/custom/tool"), enabled));
    }
}

//! C8 — Privilege Manager
//!
//! Process-global, mutex-guarded effective-UID/GID elevation with
//! guaranteed restoration. Grounded on `PyRo1121-omg`'s use of
//! `rustix::process::geteuid` for privilege checks (`core/privilege.rs`),
//! generalized here from a one-shot "re-exec under sudo" pattern to
//! in-process `seteuid`/`setegid` scoping, since the spec's runner is
//! installed setuid-root and must drop and restore privileges around each
//! command rather than re-executing itself.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;

use rustix::process::{Gid, Uid};

use crate::core::error::PrivilegeError;

/// `rustix` only exposes per-thread `set_thread_{u,g}id` (kernel semantics),
/// not the process-wide, all-threads `seteuid`/`setegid` this setuid-root
/// runner requires, so those two calls go straight to libc here.
fn seteuid(uid: Uid) -> rustix::io::Result<()> {
    // SAFETY: FFI call with a valid uid_t; failure is reported via errno.
    if unsafe { libc::seteuid(uid.as_raw()) } == 0 {
        Ok(())
    } else {
        Err(rustix::io::Errno::from_raw_os_error(
            std::io::Error::last_os_error().raw_os_error().unwrap_or(0),
        ))
    }
}

fn setegid(gid: Gid) -> rustix::io::Result<()> {
    // SAFETY: FFI call with a valid gid_t; failure is reported via errno.
    if unsafe { libc::setegid(gid.as_raw()) } == 0 {
        Ok(())
    } else {
        Err(rustix::io::Errno::from_raw_os_error(
            std::io::Error::last_os_error().raw_os_error().unwrap_or(0),
        ))
    }
}

/// Metadata describing why a `with_privileges` call is elevating, used for
/// logging and for the dry-run resource analysis (§9, "Elevation context").
#[derive(Debug, Clone, Default)]
pub struct ElevationContext {
    pub operation: String,
    pub run_as_user: Option<String>,
    pub run_as_group: Option<String>,
}

fn lookup_user(name: &str) -> Result<(Uid, Gid), PrivilegeError> {
    let cname = std::ffi::CString::new(name)
        .map_err(|_| PrivilegeError::UnknownUser(name.to_string()))?;
    unsafe {
        let pwd = libc::getpwnam(cname.as_ptr());
        if pwd.is_null() {
            return Err(PrivilegeError::UnknownUser(name.to_string()));
        }
        let uid = Uid::from_raw((*pwd).pw_uid);
        let gid = Gid::from_raw((*pwd).pw_gid);
        Ok((uid, gid))
    }
}

fn lookup_group(name: &str) -> Result<Gid, PrivilegeError> {
    let cname = std::ffi::CString::new(name)
        .map_err(|_| PrivilegeError::UnknownGroup(name.to_string()))?;
    unsafe {
        let grp = libc::getgrnam(cname.as_ptr());
        if grp.is_null() {
            return Err(PrivilegeError::UnknownGroup(name.to_string()));
        }
        Ok(Gid::from_raw((*grp).gr_gid))
    }
}

/// Single process-global instance guarding a single mutex (§4.8, §9:
/// "global mutable state -> explicit single-owner service"). Constructed
/// once at startup and passed by reference; never cloned.
pub struct PrivilegeManager {
    original_euid: Uid,
    original_egid: Gid,
    lock: Mutex<()>,
}

impl PrivilegeManager {
    /// Capture the process's current effective UID/GID as the restoration
    /// baseline. Must be called once, before any elevation, at startup.
    #[must_use]
    pub fn new() -> Self {
        Self {
            original_euid: rustix::process::geteuid(),
            original_egid: rustix::process::getegid(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        rustix::process::geteuid().is_root()
    }

    #[must_use]
    pub fn is_user_group_supported(&self) -> bool {
        self.is_root()
    }

    /// Elevate to root, run `fn`, then restore — regardless of outcome.
    /// Elevation is serialized process-wide via the manager's mutex: this
    /// is a correctness requirement, not just data-race avoidance, because
    /// a nested elevation would corrupt the restoration baseline.
    pub fn with_privileges<F, T>(&self, _ctx: &ElevationContext, f: F) -> Result<T, PrivilegeError>
    where
        F: FnOnce() -> T,
    {
        let _guard = self.lock.lock().unwrap();
        self.elevate_to_root()?;
        let result = catch_unwind(AssertUnwindSafe(f));
        self.restore_or_shutdown();
        match result {
            Ok(value) => Ok(value),
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }

    /// Set effective GID then effective UID to the named identities, run
    /// `f`, then restore. `group` defaults to the user's primary group if
    /// only `user` is given.
    pub fn with_user_group<F, T>(
        &self,
        user: Option<&str>,
        group: Option<&str>,
        f: F,
    ) -> Result<T, PrivilegeError>
    where
        F: FnOnce() -> T,
    {
        let _guard = self.lock.lock().unwrap();

        let (target_uid, primary_gid) = match user {
            Some(name) => lookup_user(name)?,
            None => (self.original_euid, self.original_egid),
        };
        let target_gid = match group {
            Some(name) => lookup_group(name)?,
            None => primary_gid,
        };

        setegid(target_gid)
            .map_err(|e| PrivilegeError::ElevationFailed(e.to_string()))?;
        if let Err(e) = seteuid(target_uid) {
            // Best-effort: restore gid before surfacing the uid failure.
            let _ = setegid(self.original_egid);
            return Err(PrivilegeError::ElevationFailed(e.to_string()));
        }

        let result = catch_unwind(AssertUnwindSafe(f));
        self.restore_or_shutdown();
        match result {
            Ok(value) => Ok(value),
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }

    fn elevate_to_root(&self) -> Result<(), PrivilegeError> {
        setegid(Gid::ROOT)
            .map_err(|e| PrivilegeError::ElevationFailed(e.to_string()))?;
        if let Err(e) = seteuid(Uid::ROOT) {
            // Best-effort: restore gid before surfacing the uid failure.
            let _ = setegid(self.original_egid);
            return Err(PrivilegeError::ElevationFailed(e.to_string()));
        }
        Ok(())
    }

    /// Restoration is mandatory. A failed restore is unrecoverable: log
    /// through every available channel, then terminate the process. This
    /// is the only path by which the core deliberately exits (§4.8, §7).
    fn restore_or_shutdown(&self) {
        let uid_ok = seteuid(self.original_euid).is_ok();
        let gid_ok = setegid(self.original_egid).is_ok();
        if uid_ok && gid_ok {
            return;
        }

        let message = "privilege restoration failed: effective UID/GID could not be reset";
        tracing::error!(target: "warden_runner::privilege", "{message}");
        eprintln!("FATAL: {message}");
        // SAFETY: best-effort multi-channel notice before an unconditional exit.
        unsafe {
            libc::syslog(
                libc::LOG_CRIT,
                b"warden-runner: %s\0".as_ptr().cast(),
                message.as_ptr(),
            );
        }
        std::process::exit(70); // EX_SOFTWARE
    }

    /// Delegates to §4.3's privilege-escalation-command detector.
    pub fn is_privilege_escalation_required(
        &self,
        cmd: &str,
    ) -> Result<bool, crate::core::error::IoError> {
        crate::core::path_safety::is_privilege_escalation(cmd)
    }

    /// Current effective UID, used by tests to assert restoration (§8
    /// invariant 7).
    #[must_use]
    pub fn current_euid(&self) -> Uid {
        rustix::process::geteuid()
    }

    #[must_use]
    pub fn original_euid(&self) -> Uid {
        self.original_euid
    }
}

impl Default for PrivilegeManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_restoration_invariant_holds_for_non_privileged_process() {
        let manager = PrivilegeManager::new();
        let ctx = ElevationContext {
            operation: "noop".to_string(),
            ..Default::default()
        };
        // Unprivileged test processes can't actually seteuid(0); we still
        // exercise the guarded call shape and confirm euid is unchanged
        // whenever elevation itself is a no-op (already at baseline).
        let before = manager.current_euid();
        let _ = manager.with_privileges(&ctx, || 1 + 1);
        if manager.is_root() {
            assert_eq!(manager.current_euid(), before);
        }
    }

    #[test]
    fn is_privilege_escalation_required_delegates_to_path_safety() {
        let manager = PrivilegeManager::new();
        assert!(manager
            .is_privilege_escalation_required("/usr/bin/sudo")
            .unwrap());
        assert!(!manager
            .is_privilege_escalation_required("/usr/bin/ls")
            .unwrap());
    }

    #[test]
    fn unknown_user_lookup_fails_closed() {
        let manager = PrivilegeManager::new();
        let result = manager.with_user_group(Some("definitely-not-a-real-user"), None, || 1);
        assert!(matches!(result, Err(PrivilegeError::UnknownUser(_))));
    }
}

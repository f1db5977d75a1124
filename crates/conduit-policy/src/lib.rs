//! # conduit-policy
//!
//! A deny-by-default filesystem sandbox for Conduit capability servers.
//!
//! ## Overview
//!
//! This crate provides [`FsSandbox`], which implements the
//! [`SandboxEvaluator`](conduit_core::traits::SandboxEvaluator) trait, and
//! [`FromToml`], which reads a
//! [`SandboxPolicy`](conduit_contracts::sandbox::SandboxPolicy) from TOML.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use conduit_contracts::sandbox::SandboxPolicy;
//! use conduit_policy::{FsSandbox, FromToml};
//!
//! let policy = SandboxPolicy::from_file(Path::new("policies/filesystem.toml"))?;
//! // Pass `FsSandbox` to `conduit_core::Dispatcher::new(...)`.
//! ```
//!
//! ## Path containment
//!
//! Paths are compared component-wise after symlink resolution, so
//! `/sandbox-evil` is not inside `/sandbox`, and a link inside an allowed
//! root that points elsewhere is denied as `symlink_escape`.

pub mod engine;
pub mod loader;
pub mod resolve;

pub use engine::FsSandbox;
pub use loader::FromToml;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::{fs, path::PathBuf};

    use conduit_contracts::{
        invocation::DenyReason,
        sandbox::{AccessRequest, SandboxPolicy, SandboxVerdict},
        tool::SideEffectClass,
    };
    use conduit_core::traits::SandboxEvaluator;

    use crate::{FsSandbox, FromToml};

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn policy(roots: &[&str]) -> SandboxPolicy {
        SandboxPolicy {
            allowed_roots: roots.iter().map(PathBuf::from).collect(),
            ..SandboxPolicy::default()
        }
    }

    fn read(path: impl Into<PathBuf>) -> AccessRequest {
        AccessRequest::new("read_file", SideEffectClass::Read).with_path(path)
    }

    fn reason(verdict: SandboxVerdict) -> DenyReason {
        match verdict {
            SandboxVerdict::Deny { reason, .. } => reason,
            SandboxVerdict::Allow => panic!("expected Deny, got Allow"),
        }
    }

    // ── 1. containment ────────────────────────────────────────────────────────

    #[test]
    fn parent_traversal_is_path_escape() {
        let verdict = FsSandbox.evaluate(&policy(&["/sandbox"]), &read("/sandbox/../etc/passwd"));
        assert_eq!(reason(verdict), DenyReason::PathEscape);
    }

    #[test]
    fn relative_path_is_invalid() {
        let verdict = FsSandbox.evaluate(&policy(&["/sandbox"]), &read("notes.txt"));
        assert_eq!(reason(verdict), DenyReason::InvalidPath);
    }

    #[test]
    fn empty_allowed_roots_deny_everything() {
        let verdict = FsSandbox.evaluate(&SandboxPolicy::default(), &read("/tmp/a.txt"));
        assert_eq!(reason(verdict), DenyReason::OutsideAllowedRoots);
    }

    /// Prefix matching is per component: `/sandbox-evil` is not in `/sandbox`.
    #[test]
    fn sibling_with_shared_prefix_is_outside() {
        let verdict = FsSandbox.evaluate(&policy(&["/sandbox"]), &read("/sandbox-evil/a.txt"));
        assert_eq!(reason(verdict), DenyReason::OutsideAllowedRoots);
    }

    #[test]
    fn path_inside_root_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let root = dir.path().to_str().unwrap();

        let verdict = FsSandbox.evaluate(&policy(&[root]), &read(dir.path().join("a.txt")));
        assert_eq!(verdict, SandboxVerdict::Allow);

        // Not-yet-existing files under the root are fine too.
        let verdict = FsSandbox.evaluate(&policy(&[root]), &read(dir.path().join("new/b.txt")));
        assert_eq!(verdict, SandboxVerdict::Allow);
    }

    #[test]
    fn denied_root_wins_inside_allowed_root() {
        let dir = tempfile::tempdir().unwrap();
        let secrets = dir.path().join("secrets");
        fs::create_dir(&secrets).unwrap();

        let mut p = policy(&[dir.path().to_str().unwrap()]);
        p.denied_roots = vec![secrets.clone()];
        let verdict = FsSandbox.evaluate(&p, &read(secrets.join("key.pem")));
        assert_eq!(reason(verdict), DenyReason::DeniedRoot);
    }

    // ── 2. symlinks ───────────────────────────────────────────────────────────

    /// A link inside the sandbox that points outside it must be denied.
    #[cfg(unix)]
    #[test]
    fn symlink_out_of_root_is_denied() {
        let sandbox = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("passwd"), "root:x:0:0").unwrap();
        let link = sandbox.path().join("innocent");
        std::os::unix::fs::symlink(outside.path().join("passwd"), &link).unwrap();

        let verdict = FsSandbox.evaluate(&policy(&[sandbox.path().to_str().unwrap()]), &read(&link));
        assert_eq!(reason(verdict), DenyReason::SymlinkEscape);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directory_escape_is_denied_for_new_files() {
        let sandbox = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let link = sandbox.path().join("out");
        std::os::unix::fs::symlink(outside.path(), &link).unwrap();

        let write = AccessRequest::new("write_file", SideEffectClass::Write).with_path(link.join("dropped.txt"));
        let verdict = FsSandbox.evaluate(&policy(&[sandbox.path().to_str().unwrap()]), &write);
        assert_eq!(reason(verdict), DenyReason::SymlinkEscape);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_staying_inside_root_is_allowed() {
        let sandbox = tempfile::tempdir().unwrap();
        fs::write(sandbox.path().join("real.txt"), "x").unwrap();
        let link = sandbox.path().join("alias.txt");
        std::os::unix::fs::symlink(sandbox.path().join("real.txt"), &link).unwrap();

        let verdict = FsSandbox.evaluate(&policy(&[sandbox.path().to_str().unwrap()]), &read(&link));
        assert_eq!(verdict, SandboxVerdict::Allow);
    }

    // ── 3. extensions and size ────────────────────────────────────────────────

    #[test]
    fn denied_extension_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = policy(&[dir.path().to_str().unwrap()]);
        p.denied_extensions = vec!["exe".to_string()];

        let verdict = FsSandbox.evaluate(&p, &read(dir.path().join("setup.EXE")));
        assert_eq!(reason(verdict), DenyReason::ExtensionDenied);
    }

    #[test]
    fn allow_list_rejects_other_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = policy(&[dir.path().to_str().unwrap()]);
        p.allowed_extensions = vec![".txt".to_string(), "md".to_string()];

        assert_eq!(FsSandbox.evaluate(&p, &read(dir.path().join("a.md"))), SandboxVerdict::Allow);
        let verdict = FsSandbox.evaluate(&p, &read(dir.path().join("a.sh")));
        assert_eq!(reason(verdict), DenyReason::ExtensionNotAllowed);
        // Existing directories are exempt.
        assert_eq!(FsSandbox.evaluate(&p, &read(dir.path())), SandboxVerdict::Allow);
    }

    #[test]
    fn oversized_existing_file_is_denied_for_reads() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("big.log"), vec![b'x'; 64]).unwrap();
        let mut p = policy(&[dir.path().to_str().unwrap()]);
        p.max_resource_bytes = Some(32);

        let verdict = FsSandbox.evaluate(&p, &read(dir.path().join("big.log")));
        assert_eq!(reason(verdict), DenyReason::SizeExceeded);
    }

    #[test]
    fn declared_write_size_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = policy(&[dir.path().to_str().unwrap()]);
        p.max_resource_bytes = Some(10);

        let mut write = AccessRequest::new("write_file", SideEffectClass::Write).with_path(dir.path().join("a.txt"));
        write.declared_bytes = Some(11);
        assert_eq!(reason(FsSandbox.evaluate(&p, &write)), DenyReason::SizeExceeded);

        write.declared_bytes = Some(10);
        assert_eq!(FsSandbox.evaluate(&p, &write), SandboxVerdict::Allow);
    }

    // ── 4. side effects and names ─────────────────────────────────────────────

    #[test]
    fn read_only_rejects_writes_before_paths() {
        let mut p = policy(&["/sandbox"]);
        p.read_only = true;
        let write = AccessRequest::new("delete_file", SideEffectClass::Destructive)
            .with_path("/sandbox/../etc/passwd");
        assert_eq!(reason(FsSandbox.evaluate(&p, &write)), DenyReason::ReadOnly);
    }

    #[test]
    fn blocked_process_and_application() {
        let p = SandboxPolicy {
            blocked_processes: vec!["sshd".to_string()],
            blocked_applications: vec!["Keychain Access".to_string()],
            ..SandboxPolicy::default()
        };

        let mut kill = AccessRequest::new("kill_process", SideEffectClass::System);
        kill.processes = vec!["SSHD".to_string()];
        assert_eq!(reason(FsSandbox.evaluate(&p, &kill)), DenyReason::BlockedProcess);

        let mut open = AccessRequest::new("open_app", SideEffectClass::System);
        open.applications = vec!["keychain access".to_string()];
        assert_eq!(reason(FsSandbox.evaluate(&p, &open)), DenyReason::BlockedApplication);

        let mut other = AccessRequest::new("kill_process", SideEffectClass::System);
        other.processes = vec!["firefox".to_string()];
        assert_eq!(FsSandbox.evaluate(&p, &other), SandboxVerdict::Allow);
    }

    // ── 5. loading ────────────────────────────────────────────────────────────

    #[test]
    fn policy_loads_from_toml() {
        let toml = r#"
            allowed_roots = ["/home/user/sandbox"]
            denied_extensions = ["exe", "dll"]
            max_resource_bytes = 10485760
            read_only = true
            require_confirmation = ["move_file"]
        "#;
        let p = SandboxPolicy::from_toml_str(toml).unwrap();
        assert_eq!(p.allowed_roots, vec![PathBuf::from("/home/user/sandbox")]);
        assert_eq!(p.max_resource_bytes, Some(10_485_760));
        assert!(p.read_only);
        assert!(p.demands_confirmation("move_file"));
        assert!(p.blocked_processes.is_empty());
    }

    #[test]
    fn malformed_policy_is_config_error() {
        let err = SandboxPolicy::from_toml_str("read_only = \"sometimes\"").unwrap_err();
        assert!(matches!(err, conduit_contracts::error::ConduitError::Config { .. }));
    }
}

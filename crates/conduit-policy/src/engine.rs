//! Filesystem sandbox evaluator.
//!
//! `FsSandbox` implements the `SandboxEvaluator` trait from conduit-core. It
//! holds no state: every verdict is a function of the policy, the access
//! request, and the filesystem as it is at call time.
//!
//! Evaluation order (first failure wins):
//!
//! 1. Read-only policy and a tool that is not `read` → `read_only`.
//! 2. Blocked process / application names (case-insensitive).
//! 3. Every path, in order:
//!    a. must be absolute, must not contain `..`;
//!    b. is resolved through symlinks, then checked against denied roots and
//!       allowed roots (an empty allowed set admits nothing);
//!    c. extension deny list, then allow list;
//!    d. an existing file read by the tool must fit the size limit.
//! 4. The size the call declares it will write must fit the size limit.

use std::{fs, path::Path};

use tracing::{debug, warn};

use conduit_contracts::{
    invocation::DenyReason,
    sandbox::{AccessRequest, SandboxPolicy, SandboxVerdict},
    tool::SideEffectClass,
};
use conduit_core::traits::SandboxEvaluator;

use crate::resolve::{has_parent_component, resolve};

/// The deny-by-default filesystem sandbox.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSandbox;

impl FsSandbox {
    pub fn new() -> Self {
        Self
    }

    fn check_path(&self, policy: &SandboxPolicy, access: &AccessRequest, path: &Path) -> Option<SandboxVerdict> {
        let shown = path.display().to_string();

        if !path.is_absolute() {
            return Some(SandboxVerdict::deny(DenyReason::InvalidPath, format!("'{shown}' is not absolute")));
        }
        if has_parent_component(path) {
            return Some(SandboxVerdict::deny(DenyReason::PathEscape, format!("'{shown}' contains '..'")));
        }

        let Some(resolved) = resolve(path) else {
            return Some(SandboxVerdict::deny(
                DenyReason::InvalidPath,
                format!("'{shown}' has too many levels of symbolic links"),
            ));
        };

        let resolve_root = |root: &Path| resolve(root).unwrap_or_else(|| root.to_path_buf());

        if let Some(root) = policy
            .denied_roots
            .iter()
            .find(|root| resolved.starts_with(resolve_root(root)))
        {
            return Some(SandboxVerdict::deny(
                DenyReason::DeniedRoot,
                format!("'{shown}' is inside denied root '{}'", root.display()),
            ));
        }

        let inside_allowed = policy
            .allowed_roots
            .iter()
            .any(|root| resolved.starts_with(resolve_root(root)));
        if !inside_allowed {
            let lexically_inside = policy.allowed_roots.iter().any(|root| path.starts_with(root));
            return Some(if lexically_inside {
                SandboxVerdict::deny(
                    DenyReason::SymlinkEscape,
                    format!("'{shown}' resolves to '{}' outside every allowed root", resolved.display()),
                )
            } else {
                SandboxVerdict::deny(DenyReason::OutsideAllowedRoots, format!("'{shown}' is outside every allowed root"))
            });
        }

        let metadata = fs::metadata(&resolved).ok();

        // Directories carry no meaningful extension.
        let is_dir = metadata.as_ref().is_some_and(|m| m.is_dir());
        if !is_dir {
            let extension = resolved
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();
            if policy.denied_extensions.iter().any(|d| normalize_ext(d) == extension) {
                return Some(SandboxVerdict::deny(
                    DenyReason::ExtensionDenied,
                    format!("extension '{extension}' of '{shown}' is denied"),
                ));
            }
            if !policy.allowed_extensions.is_empty()
                && !policy.allowed_extensions.iter().any(|a| normalize_ext(a) == extension)
            {
                return Some(SandboxVerdict::deny(
                    DenyReason::ExtensionNotAllowed,
                    format!("extension '{extension}' of '{shown}' is not in the allowed list"),
                ));
            }
        }

        if let (Some(max), Some(meta)) = (policy.max_resource_bytes, metadata.as_ref()) {
            if access.side_effect_class == SideEffectClass::Read && meta.is_file() && meta.len() > max {
                return Some(SandboxVerdict::deny(
                    DenyReason::SizeExceeded,
                    format!("'{shown}' is {} bytes, limit is {max}", meta.len()),
                ));
            }
        }

        None
    }
}

fn normalize_ext(ext: &str) -> String {
    ext.trim_start_matches('.').to_ascii_lowercase()
}

impl SandboxEvaluator for FsSandbox {
    fn evaluate(&self, policy: &SandboxPolicy, access: &AccessRequest) -> SandboxVerdict {
        debug!(
            tool = %access.tool,
            side_effect = access.side_effect_class.as_str(),
            path_count = access.paths.len(),
            "evaluating sandbox policy"
        );

        let verdict = self.evaluate_inner(policy, access);
        if let SandboxVerdict::Deny { reason, detail } = &verdict {
            warn!(tool = %access.tool, reason = %reason, %detail, "sandbox denied access");
        }
        verdict
    }
}

impl FsSandbox {
    fn evaluate_inner(&self, policy: &SandboxPolicy, access: &AccessRequest) -> SandboxVerdict {
        // ── 1. Read-only ─────────────────────────────────────────────────────
        if policy.read_only && access.side_effect_class != SideEffectClass::Read {
            return SandboxVerdict::deny(
                DenyReason::ReadOnly,
                format!(
                    "'{}' is a {} tool and the sandbox is read-only",
                    access.tool,
                    access.side_effect_class.as_str()
                ),
            );
        }

        // ── 2. Blocked processes and applications ────────────────────────────
        if let Some(name) = first_blocked(&access.processes, &policy.blocked_processes) {
            return SandboxVerdict::deny(DenyReason::BlockedProcess, format!("process '{name}' is blocked"));
        }
        if let Some(name) = first_blocked(&access.applications, &policy.blocked_applications) {
            return SandboxVerdict::deny(
                DenyReason::BlockedApplication,
                format!("application '{name}' is blocked"),
            );
        }

        // ── 3. Paths ─────────────────────────────────────────────────────────
        for path in &access.paths {
            if let Some(deny) = self.check_path(policy, access, path) {
                return deny;
            }
        }

        // ── 4. Declared size ─────────────────────────────────────────────────
        if let (Some(max), Some(declared)) = (policy.max_resource_bytes, access.declared_bytes) {
            if declared > max {
                return SandboxVerdict::deny(
                    DenyReason::SizeExceeded,
                    format!("declared size {declared} bytes exceeds limit {max}"),
                );
            }
        }

        SandboxVerdict::Allow
    }
}

fn first_blocked<'a>(names: &'a [String], blocked: &[String]) -> Option<&'a str> {
    names
        .iter()
        .find(|n| blocked.iter().any(|b| b.eq_ignore_ascii_case(n)))
        .map(String::as_str)
}

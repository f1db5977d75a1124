//! Symlink-aware path resolution.
//!
//! A tool may name a path that does not exist yet (a file it is about to
//! write). Such paths are resolved by canonicalizing the longest prefix that
//! does exist and re-appending the remaining components, so a symlinked
//! parent directory is still followed.

use std::{
    fs,
    path::{Component, Path, PathBuf},
};

/// Symlink hops followed before giving up on a path.
const MAX_LINK_DEPTH: u32 = 40;

/// True if `path` has any `..` component.
pub fn has_parent_component(path: &Path) -> bool {
    path.components().any(|c| matches!(c, Component::ParentDir))
}

/// Resolve every symlink in `path`, which must be absolute.
///
/// Returns `None` when the chain of links is too deep to follow.
pub fn resolve(path: &Path) -> Option<PathBuf> {
    resolve_at_depth(path, 0)
}

fn resolve_at_depth(path: &Path, depth: u32) -> Option<PathBuf> {
    if depth > MAX_LINK_DEPTH {
        return None;
    }

    for ancestor in path.ancestors() {
        // symlink_metadata succeeds for dangling links; metadata would not.
        if fs::symlink_metadata(ancestor).is_err() {
            continue;
        }
        let rest = path.strip_prefix(ancestor).unwrap_or_else(|_| Path::new(""));

        if let Ok(canonical) = fs::canonicalize(ancestor) {
            return Some(join_rest(canonical, rest));
        }

        // The ancestor exists but cannot be canonicalized: a dangling link or
        // a loop. Follow it by hand.
        let target = fs::read_link(ancestor).ok()?;
        let target = if target.is_absolute() {
            target
        } else {
            ancestor.parent().unwrap_or_else(|| Path::new("/")).join(target)
        };
        if has_parent_component(&target) {
            // `..` in a link target is relative to the link's directory.
            return resolve_at_depth(&join_rest(lexical_normalize(&target), rest), depth + 1);
        }
        return resolve_at_depth(&join_rest(target, rest), depth + 1);
    }

    // Nothing exists, not even the root; treat the path as already resolved.
    Some(path.to_path_buf())
}

fn join_rest(base: PathBuf, rest: &Path) -> PathBuf {
    if rest.as_os_str().is_empty() {
        base
    } else {
        base.join(rest)
    }
}

/// Collapse `.` and `..` without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

//! Path resolution for project-root confinement

use std::path::{Component, Path, PathBuf};

/// A path that resolves outside the project root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathValidationError {
    pub path: String,
    pub root: String,
}

impl std::fmt::Display for PathValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "path {} is outside project root {}", self.path, self.root)
    }
}

impl std::error::Error for PathValidationError {}

/// Resolve `path` against `root` and require the result to stay inside it.
///
/// Steps:
/// 1. Expand `~/` to the home directory, or join relative paths to the root
/// 2. Canonicalize the longest existing prefix so symlinks and `..` behave
///    as the OS would resolve them
/// 3. Apply the components that do not exist yet lexically
/// 4. Require the result to start with the canonical root
pub fn resolve_in_root(path: &str, root: &Path) -> Result<PathBuf, PathValidationError> {
    let canonical = canonical_root(root);
    let resolved = resolve_existing_prefix(&join_to_root(path, root));

    if !is_path_within_root(&resolved, &canonical) {
        return Err(PathValidationError {
            path: path.to_string(),
            root: canonical.display().to_string(),
        });
    }
    Ok(resolved)
}

/// Canonical form of the project root, or the root as given if it does not exist
pub fn canonical_root(root: &Path) -> PathBuf {
    std::fs::canonicalize(root).unwrap_or_else(|_| normalize_lexically(&absolute(root)))
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Absolute, `..`-free form of `path` relative to `root`, without touching the filesystem
pub fn resolve_lexical(path: &str, root: &Path) -> PathBuf {
    normalize_lexically(&join_to_root(path, root))
}

fn join_to_root(path: &str, root: &Path) -> PathBuf {
    if path.starts_with('~') {
        return expand_tilde(path);
    }
    let candidate = PathBuf::from(path);
    if candidate.is_absolute() {
        candidate
    } else {
        absolute(root).join(candidate)
    }
}

/// Collapse `.` and `..` components without consulting the filesystem
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn resolve_existing_prefix(path: &Path) -> PathBuf {
    let components: Vec<Component> = path.components().collect();

    for split in (1..=components.len()).rev() {
        let prefix: PathBuf = components[..split].iter().collect();
        if let Ok(mut resolved) = std::fs::canonicalize(&prefix) {
            for component in &components[split..] {
                match component {
                    Component::CurDir => {}
                    Component::ParentDir => {
                        resolved.pop();
                    }
                    other => resolved.push(other.as_os_str()),
                }
            }
            return resolved;
        }
    }
    normalize_lexically(path)
}

/// Component-wise prefix check
pub fn is_path_within_root(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
}

/// Whether two resolved paths name the same entry or one contains the other
pub fn paths_overlap(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

/// Expand tilde (~) to home directory
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

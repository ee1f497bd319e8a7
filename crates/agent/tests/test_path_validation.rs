//! Tests for project-root confinement of paths

use std::fs;
use tempfile::TempDir;
use warden_agent::tools::path_utils::{canonical_root, resolve_in_root};
use warden_agent::SafetyGuard;

fn project() -> (TempDir, std::path::PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("project");
    fs::create_dir(&root).unwrap();
    (temp_dir, root)
}

#[test]
fn test_resolve_existing_file_inside() {
    let (_temp, root) = project();
    fs::write(root.join("test.txt"), "content").unwrap();

    let resolved = resolve_in_root("test.txt", &root).unwrap();
    assert_eq!(resolved, root.join("test.txt").canonicalize().unwrap());
}

#[test]
fn test_resolve_new_nested_path_inside() {
    let (_temp, root) = project();

    let resolved = resolve_in_root("src/new/mod.rs", &root).unwrap();
    assert_eq!(resolved, canonical_root(&root).join("src/new/mod.rs"));
}

#[test]
fn test_resolve_absolute_path_inside() {
    let (_temp, root) = project();
    let absolute = root.join("a.txt");

    assert!(resolve_in_root(absolute.to_str().unwrap(), &root).is_ok());
}

#[test]
fn test_traversal_outside_is_rejected() {
    let (temp, root) = project();
    fs::write(temp.path().join("outside.txt"), "content").unwrap();

    let err = resolve_in_root("../outside.txt", &root).unwrap_err();
    assert!(
        err.to_string().contains("is outside project root"),
        "Expected root error, got: {}",
        err
    );
    assert!(resolve_in_root("src/../../outside.txt", &root).is_err());
    assert!(resolve_in_root("missing/../../../x", &root).is_err());
}

#[test]
fn test_traversal_that_stays_inside_is_accepted() {
    let (_temp, root) = project();
    fs::create_dir(root.join("src")).unwrap();

    assert!(resolve_in_root("src/../README.md", &root).is_ok());
    assert!(resolve_in_root("./src/./lib.rs", &root).is_ok());
}

#[test]
fn test_sibling_with_common_prefix_is_outside() {
    let (temp, root) = project();
    let sibling = temp.path().join("project-other");
    fs::create_dir(&sibling).unwrap();

    assert!(resolve_in_root(sibling.join("x").to_str().unwrap(), &root).is_err());
}

#[test]
fn test_system_and_home_paths_are_outside() {
    let (_temp, root) = project();

    assert!(resolve_in_root("/etc/passwd", &root).is_err());
    assert!(resolve_in_root("~/.ssh/id_rsa", &root).is_err());
}

#[cfg(unix)]
#[test]
fn test_symlink_escape_is_rejected() {
    let (temp, root) = project();
    let outside = temp.path().join("outside");
    fs::create_dir(&outside).unwrap();
    fs::write(outside.join("secret.txt"), "secret").unwrap();
    std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

    assert!(resolve_in_root("link/secret.txt", &root).is_err());
    // not-yet-existing file under the link still resolves through it
    assert!(resolve_in_root("link/new.txt", &root).is_err());
}

#[cfg(unix)]
#[test]
fn test_symlink_inside_root_is_accepted() {
    let (_temp, root) = project();
    fs::create_dir(root.join("real")).unwrap();
    std::os::unix::fs::symlink(root.join("real"), root.join("alias")).unwrap();

    assert!(resolve_in_root("alias/file.txt", &root).is_ok());
}

#[test]
fn test_guard_path_verdicts_match_resolution() {
    let (_temp, root) = project();
    let guard = SafetyGuard::new(&root);

    assert!(guard.check_path("src/main.rs").is_allow());
    let verdict = guard.check_path("../../etc/shadow");
    assert!(verdict.is_deny());
    assert!(verdict.reason().unwrap().contains("outside project root"));
}

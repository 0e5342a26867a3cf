//! Black-box coverage for §8 testable property 5: every resolved path in a
//! file-reading/writing tool is a descendant of the workspace root.

use arcco_agent::tools::workspace::Workspace;

#[test]
fn nested_relative_paths_resolve_under_the_root() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = Workspace::new(dir.path());
    let resolved = workspace.resolve("reports/2026/q1.csv").unwrap();
    assert!(resolved.starts_with(dir.path()));
}

#[test]
fn traversal_through_a_symlinked_ancestor_is_still_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = Workspace::new(dir.path());
    for attempt in ["../escape.txt", "a/../../escape.txt", "../../../etc/shadow"] {
        let result = workspace.resolve(attempt);
        assert!(result.is_err(), "expected '{attempt}' to be rejected");
    }
}

//! CLI integration tests for arbor
//!
//! These tests run the binary against a repository home in a temporary
//! directory, covering the workflow from initialization through editing.

use predicates::prelude::*;
use tempfile::TempDir;

/// Get a command instance for the arbor binary, run inside `dir`
fn arbor_cmd(dir: &TempDir) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::new(assert_cmd::cargo::cargo_bin!("arbor"));
    cmd.current_dir(dir.path()).env_remove("ARBOR_HOME").env_remove("RUST_LOG");
    cmd
}

/// Create a temporary directory and initialize a repository home
fn setup_home() -> TempDir {
    let dir = TempDir::new().unwrap();
    arbor_cmd(&dir).arg("init").assert().success();
    dir
}

// =============================================================================
// Initialization Tests
// =============================================================================

#[test]
fn test_init_creates_structure() {
    let dir = TempDir::new().unwrap();

    arbor_cmd(&dir)
        .arg("init")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized repository"));

    assert!(dir.path().join(".arbor").is_dir());
    assert!(dir.path().join(".arbor/config.toml").is_file());
    assert!(dir.path().join(".arbor/.gitignore").is_file());
}

#[test]
fn test_init_is_idempotent() {
    let dir = setup_home();
    let config = std::fs::read_to_string(dir.path().join(".arbor/config.toml")).unwrap();

    arbor_cmd(&dir).arg("init").assert().success();

    let again = std::fs::read_to_string(dir.path().join(".arbor/config.toml")).unwrap();
    assert_eq!(config, again);
}

#[test]
fn test_commands_outside_a_home_fail() {
    let dir = TempDir::new().unwrap();

    arbor_cmd(&dir)
        .args(["ls", "/"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("arbor init"));
}

// =============================================================================
// Editing Tests
// =============================================================================

#[test]
fn test_add_set_get() {
    let dir = setup_home();

    arbor_cmd(&dir)
        .args(["add", "/docs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Added /docs"));
    arbor_cmd(&dir)
        .args(["set", "/docs/title", "Release notes"])
        .assert()
        .success();

    arbor_cmd(&dir)
        .args(["get", "/docs/title"])
        .assert()
        .success()
        .stdout("Release notes\n");
}

#[test]
fn test_typed_and_multi_valued_properties() {
    let dir = setup_home();
    arbor_cmd(&dir).args(["add", "/n"]).assert().success();

    arbor_cmd(&dir)
        .args(["set", "/n/count", "42", "--kind", "long"])
        .assert()
        .success();
    arbor_cmd(&dir)
        .args(["set", "/n/tags", "a", "b"])
        .assert()
        .success();

    arbor_cmd(&dir)
        .args(["--format", "json", "get", "/n/count"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""values":["42"]"#))
        .stdout(predicate::str::contains(r#""multiple":false"#));
    arbor_cmd(&dir)
        .args(["get", "/n/tags"])
        .assert()
        .success()
        .stdout("a\nb\n");
}

#[test]
fn test_bad_long_value_is_rejected() {
    let dir = setup_home();
    arbor_cmd(&dir).args(["add", "/n"]).assert().success();

    arbor_cmd(&dir)
        .args(["set", "/n/count", "many", "--kind", "long"])
        .assert()
        .failure();
    arbor_cmd(&dir).args(["get", "/n/count"]).assert().failure();
}

#[test]
fn test_ls_shows_children_and_properties() {
    let dir = setup_home();
    arbor_cmd(&dir).args(["add", "/a"]).assert().success();
    arbor_cmd(&dir).args(["add", "/a/b"]).assert().success();
    arbor_cmd(&dir).args(["add", "/a/b"]).assert().success();
    arbor_cmd(&dir)
        .args(["set", "/a/title", "hello"])
        .assert()
        .success();

    arbor_cmd(&dir)
        .args(["ls", "/a"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/a [nt:unstructured]"))
        .stdout(predicate::str::contains("/a/b/"))
        .stdout(predicate::str::contains("/a/b[2]/"))
        .stdout(predicate::str::contains("title\tstring\thello"));
}

#[test]
fn test_ls_json() {
    let dir = setup_home();
    arbor_cmd(&dir).args(["add", "/a"]).assert().success();

    let output = arbor_cmd(&dir)
        .args(["--format", "json", "ls", "/"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["path"], "/");
    assert_eq!(json["children"], serde_json::json!(["/a"]));
    assert_eq!(json["primary_type"], "nt:unstructured");
}

#[test]
fn test_rm_renumbers_siblings() {
    let dir = setup_home();
    for _ in 0..3 {
        arbor_cmd(&dir).args(["add", "/item"]).assert().success();
    }
    arbor_cmd(&dir)
        .args(["set", "/item[3]/marker", "last"])
        .assert()
        .success();

    arbor_cmd(&dir)
        .args(["rm", "/item"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed /item"));

    arbor_cmd(&dir)
        .args(["get", "/item[2]/marker"])
        .assert()
        .success()
        .stdout("last\n");
    arbor_cmd(&dir).args(["ls", "/item[3]"]).assert().failure();
}

#[test]
fn test_mv() {
    let dir = setup_home();
    arbor_cmd(&dir).args(["add", "/from"]).assert().success();
    arbor_cmd(&dir).args(["add", "/to"]).assert().success();
    arbor_cmd(&dir)
        .args(["set", "/from/kept", "yes"])
        .assert()
        .success();

    arbor_cmd(&dir)
        .args(["mv", "/from", "/to/moved"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Moved /from to /to/moved"));

    arbor_cmd(&dir)
        .args(["get", "/to/moved/kept"])
        .assert()
        .success()
        .stdout("yes\n");
    arbor_cmd(&dir).args(["ls", "/from"]).assert().failure();
}

// =============================================================================
// Workspace Tests
// =============================================================================

#[test]
fn test_workspaces_lists_default() {
    let dir = setup_home();

    arbor_cmd(&dir)
        .arg("workspaces")
        .assert()
        .success()
        .stdout(predicate::str::contains("* default"));
}

#[test]
fn test_unknown_workspace_fails() {
    let dir = setup_home();

    arbor_cmd(&dir)
        .args(["--workspace", "missing", "ls", "/"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no such workspace"));
}

#[test]
fn test_home_flag_from_another_directory() {
    let home = setup_home();
    let elsewhere = TempDir::new().unwrap();

    arbor_cmd(&elsewhere)
        .arg("--home")
        .arg(home.path())
        .args(["add", "/remote"])
        .assert()
        .success();

    arbor_cmd(&home).args(["ls", "/remote"]).assert().success();
}

#[test]
fn test_json_success_message() {
    let dir = setup_home();

    arbor_cmd(&dir)
        .args(["-f", "json", "add", "/j"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""success":true"#));
}

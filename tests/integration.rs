use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn searchr_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_searchr"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("notes.txt"),
        "Deployment notes.\n\nThe office moved to Bangalore 560001.",
    )
    .unwrap();
    fs::write(files_dir.join("empty.txt"), "").unwrap();

    let config_content = format!(
        r#"[index]
db_path = "{}/data/searchr.sqlite"

[storage]
backend = "memory"
bucket = "docs"

[extraction]
backend = "builtin"

[server]
bind = "127.0.0.1:0"
max_upload_bytes = 1024
"#,
        root.display()
    );

    let config_path = config_dir.join("searchr.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_searchr(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = searchr_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run searchr binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_searchr(&config, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(stdout.contains("Index 'searchr' ready"));
    assert!(tmp.path().join("data/searchr.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config) = setup_test_env();
    let (_, _, ok1) = run_searchr(&config, &["init"]);
    let (_, stderr, ok2) = run_searchr(&config, &["init"]);
    assert!(ok1);
    assert!(ok2, "second init failed: {}", stderr);
}

#[test]
fn test_search_no_results() {
    let (_tmp, config) = setup_test_env();
    run_searchr(&config, &["init"]);
    let (stdout, stderr, ok) = run_searchr(&config, &["search", "560001"]);
    assert!(ok, "search failed: {}", stderr);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_blank_term_errors() {
    let (_tmp, config) = setup_test_env();
    run_searchr(&config, &["init"]);
    let (stdout, stderr, ok) = run_searchr(&config, &["search", "  "]);
    assert!(!ok);
    assert!(!stdout.contains("No results."));
    assert!(stderr.contains("search term must not be empty"));

    let (_, stderr, ok) = run_searchr(&config, &["search", "* : ()"]);
    assert!(!ok);
    assert!(stderr.contains("no searchable characters"));
}

#[test]
fn test_search_unknown_sort_order_errors() {
    let (_tmp, config) = setup_test_env();
    run_searchr(&config, &["init"]);
    let (_, stderr, ok) = run_searchr(&config, &["search", "x", "--sort", "size:up"]);
    assert!(!ok);
    assert!(stderr.contains("Unknown sort order"));
}

#[test]
fn test_get_missing_document() {
    let (_tmp, config) = setup_test_env();
    run_searchr(&config, &["init"]);
    let (_, stderr, ok) = run_searchr(&config, &["get", "no-such-id"]);
    assert!(!ok);
    assert!(stderr.contains("document not found"));
}

#[test]
fn test_sync_empty_bucket() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_searchr(&config, &["sync"]);
    assert!(ok, "sync failed: {}", stderr);
    assert!(stdout.contains("received: 0"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_upload_file() {
    let (tmp, config) = setup_test_env();
    let file = tmp.path().join("files/notes.txt");
    let (stdout, stderr, ok) = run_searchr(
        &config,
        &["upload", file.to_str().unwrap(), "--key", "2024/notes.txt"],
    );
    assert!(ok, "upload failed: {}", stderr);
    assert!(stdout.contains("Uploaded 2024/notes.txt"));
    assert!(stdout.contains("memory://docs/2024/notes.txt"));
}

#[test]
fn test_upload_rejects_empty_file() {
    let (tmp, config) = setup_test_env();
    let file = tmp.path().join("files/empty.txt");
    let (_, stderr, ok) = run_searchr(&config, &["upload", file.to_str().unwrap()]);
    assert!(!ok);
    assert!(stderr.contains("is empty"));
}

#[test]
fn test_upload_rejects_oversized_file() {
    let (tmp, config) = setup_test_env();
    let file = tmp.path().join("files/big.txt");
    fs::write(&file, vec![b'a'; 2048]).unwrap();
    let (_, stderr, ok) = run_searchr(&config, &["upload", file.to_str().unwrap()]);
    assert!(!ok);
    assert!(stderr.contains("upload limit"));
}

#[test]
fn test_missing_config_errors() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, ok) = run_searchr(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!ok);
    assert!(stderr.contains("Failed to read config file"));
}

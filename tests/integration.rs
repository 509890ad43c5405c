use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("house-rules.md"),
        "# House rules\n\nNo parties. Quiet hours start at 22:00.",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/grag.sqlite"

[chunking]
size = 500
overlap = 50

[retrieval]
candidate_k = 30
top_k = 10

[server]
bind = "127.0.0.1:7341"
"#,
        root.display()
    );

    let config_path = config_dir.join("grag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_grag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_grag"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .expect("failed to run grag binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_grag(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data").join("grag.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_grag(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_grag(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_errors_when_embeddings_disabled() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("files").join("house-rules.md");

    run_grag(&config_path, &["init"]);
    let (_, stderr, success) = run_grag(
        &config_path,
        &["ingest", file.to_str().unwrap(), "--tenant", "acme"],
    );
    assert!(!success, "ingest should fail with the disabled embedder");
    assert!(stderr.to_lowercase().contains("embed"), "stderr={}", stderr);
}

#[test]
fn test_directory_ingest_reports_failures() {
    let (tmp, config_path) = setup_test_env();
    let dir = tmp.path().join("files");

    let (stdout, stderr, success) = run_grag(
        &config_path,
        &["ingest", dir.to_str().unwrap(), "--tenant", "acme"],
    );
    assert!(success, "stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Ingested 0 of 1 files (1 failed)"), "{}", stdout);
}

#[test]
fn test_doc_id_rejected_for_directory() {
    let (tmp, config_path) = setup_test_env();
    let dir = tmp.path().join("files");

    let (_, stderr, success) = run_grag(
        &config_path,
        &["ingest", dir.to_str().unwrap(), "--tenant", "acme", "--doc-id", "x"],
    );
    assert!(!success);
    assert!(stderr.contains("--doc-id"));
}

#[test]
fn test_blank_tenant_rejected() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success) = run_grag(&config_path, &["search", "refund", "--tenant", "  "]);
    assert!(!success);
}

#[test]
fn test_ask_errors_when_providers_disabled() {
    let (_tmp, config_path) = setup_test_env();

    run_grag(&config_path, &["init"]);
    let (_, _, success) = run_grag(&config_path, &["ask", "quiet hours?", "--tenant", "acme"]);
    assert!(!success);
}

#[test]
fn test_invalid_config_rejected() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("config").join("bad.toml");
    fs::write(&bad, "[chunking]\nsize = 10\noverlap = 10\n").unwrap();

    let (_, stderr, success) = run_grag(&bad, &["init"]);
    assert!(!success);
    assert!(stderr.contains("overlap"), "stderr={}", stderr);
}

#[test]
fn test_duplicate_stems_rejected_before_ingest() {
    let (tmp, config_path) = setup_test_env();
    let dir = tmp.path().join("faqs");
    fs::create_dir_all(dir.join("a")).unwrap();
    fs::create_dir_all(dir.join("b")).unwrap();
    fs::write(dir.join("a").join("faq.md"), "# FAQ\n\nCheckout is at eleven.").unwrap();
    fs::write(dir.join("b").join("faq.txt"), "Pets are not allowed.").unwrap();

    let (stdout, stderr, success) = run_grag(
        &config_path,
        &["ingest", dir.to_str().unwrap(), "--tenant", "acme"],
    );
    assert!(!success, "stdout={}", stdout);
    assert!(stderr.contains("'faq'"), "stderr={}", stderr);
    assert!(stderr.contains("faq.md") && stderr.contains("faq.txt"), "stderr={}", stderr);
    assert!(!stdout.contains("Ingested"), "stdout={}", stdout);
}

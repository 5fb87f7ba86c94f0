use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const CSV: &str = "budget,homepage,original_language,original_title,overview,release_date,revenue,runtime,status,title,vote_average,vote_count,production_company_id,genre_id,languages
30000000,,en,Toy Story,A cowboy doll is threatened by a new spaceman figure.,1995-10-30,373554033,81,Released,Toy Story,7.7,5415,3,16,\"['English']\"
65000000,,en,Jumanji,Siblings discover an enchanted board game.,1995-12-15,262797249,104,Released,Jumanji,6.9,2413,559,12,\"['English', 'Français']\"
";

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    fs::write(root.join("movies.csv"), CSV).unwrap();

    let config_content = format!(
        r#"[db]
connection_string = "sqlite://{}/data/movies.sqlite"
name = "imdb"

[server]
bind = "127.0.0.1:0"

[upload]
max_file_size_mb = 5
"#,
        root.display()
    );

    let config_path = config_dir.join("movies.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_movies(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_movies"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        // Keep the file's settings authoritative.
        .env_remove("MOVIES_DB_CONNECTION_STRING")
        .env_remove("MOVIES_DB_PASSWORD")
        .env_remove("MAX_CSV_FILE_SIZE_IN_MB")
        .output()
        .expect("failed to run movies binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_indexes() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_movies(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("created  release_year_index"));
    assert!(stdout.contains("Indexes ready on imdb.movies_data"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_movies(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (stdout, _, success2) = run_movies(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
    assert!(stdout.contains("exists   language_release_date_ratings_index"));
    assert!(!stdout.contains("created"));
}

#[test]
fn test_indexes_lists_keys() {
    let (_tmp, config_path) = setup_test_env();
    run_movies(&config_path, &["init"]);

    let (stdout, _, success) = run_movies(&config_path, &["indexes"]);
    assert!(success);
    assert!(stdout.contains("_id_"));
    assert!(stdout.contains("languages: 1, vote_average: -1"));
}

#[test]
fn test_upload_then_fetch() {
    let (tmp, config_path) = setup_test_env();
    let csv_path = tmp.path().join("movies.csv");

    let (stdout, stderr, success) =
        run_movies(&config_path, &["upload", csv_path.to_str().unwrap()]);
    assert!(success, "upload failed: stdout={}, stderr={}", stdout, stderr);
    assert_eq!(stdout.trim(), "Data uploaded successfully");

    let (stdout, stderr, success) = run_movies(
        &config_path,
        &["fetch", "--filter", r#"{"languages":"Français"}"#],
    );
    assert!(success, "fetch failed: stdout={}, stderr={}", stdout, stderr);

    let body: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(body["message"], "Data fetched successfully");
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["title"], "Jumanji");
}

#[test]
fn test_fetch_page_out_of_range_fails() {
    let (tmp, config_path) = setup_test_env();
    let csv_path = tmp.path().join("movies.csv");
    run_movies(&config_path, &["upload", csv_path.to_str().unwrap()]);

    let (_, stderr, success) = run_movies(&config_path, &["fetch", "--page", "2"]);
    assert!(!success);
    assert!(stderr.contains("Requested page 2 doesn't exist"));
}

#[test]
fn test_upload_missing_file() {
    let (tmp, config_path) = setup_test_env();
    let missing = tmp.path().join("nope.csv");

    let (_, stderr, success) = run_movies(&config_path, &["upload", missing.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Failed to read CSV file"));
}

#[test]
fn test_fetch_rejects_invalid_filter_json() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_movies(&config_path, &["fetch", "--filter", "{oops"]);
    assert!(!success);
    assert!(stderr.contains("--filter is not valid JSON"));
}

//! Tests for the `geoharvest` binary.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn load_fixture(name: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to load {}: {}", path.display(), e))
}

fn write_job(dir: &Path, source_url: &str) -> std::path::PathBuf {
    let job = dir.join("job.yaml");
    fs::write(
        &job,
        format!(
            "source_id: geo\nsource_url: {source_url}\nmax_records: 2\nhttp:\n  max_retries: 1\n  timeout_secs: 5\ncoupling:\n  enabled: false\n"
        ),
    )
    .unwrap();
    job
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("geoharvest")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("harvest"))
        .stdout(predicate::str::contains("check"));
}

#[test]
fn test_missing_config_fails() {
    Command::cargo_bin("geoharvest")
        .unwrap()
        .args(["check", "--config", "does-not-exist.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("Error:"));
}

#[test]
fn test_invalid_settings_fail_before_any_request() {
    let dir = tempdir().unwrap();
    let job = write_job(dir.path(), "ftp://example.org/csw");

    Command::cargo_bin("geoharvest")
        .unwrap()
        .args(["check", "--config"])
        .arg(&job)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid settings"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_check_prints_record_count() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("resultType", "hits"))
        .respond_with(ResponseTemplate::new(200).set_body_string(load_fixture("hits.xml")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let job = write_job(dir.path(), &format!("{}/csw", server.uri()));

    Command::cargo_bin("geoharvest")
        .unwrap()
        .args(["check", "--config"])
        .arg(&job)
        .assert()
        .success()
        .stdout(predicate::str::contains("3 matching records"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_harvest_writes_store_directory() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("resultType", "hits"))
        .respond_with(ResponseTemplate::new(200).set_body_string(load_fixture("hits.xml")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("resultType", "results"))
        .and(query_param("startPosition", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(load_fixture("page_1.xml")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("resultType", "results"))
        .and(query_param("startPosition", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            load_fixture("page_2.xml").replace("{{WFS_URL}}", "https://example.org/wfs"),
        ))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let job = write_job(dir.path(), &format!("{}/csw", server.uri()));
    let store = dir.path().join("store");

    Command::cargo_bin("geoharvest")
        .unwrap()
        .args(["harvest", "--config"])
        .arg(&job)
        .arg("--output")
        .arg(&store)
        .assert()
        .success()
        .stdout(predicate::str::contains("Committed"));

    assert!(store.join("geo/records/ds-1.yaml").exists());
    assert!(store.join("geo/records/svc-1.yaml").exists());
}

//! E2E tests for the index and recommend commands.
//!
//! Everything here runs with the hash embedder, which needs no model files
//! and no network — the offline degraded mode the service guarantees.

use assert_cmd::Command;
use predicates::prelude::*;

mod util;
use util::{write_catalog, FIXTURE_ROWS};

fn bookrec() -> Command {
    Command::cargo_bin("bookrec").unwrap()
}

#[test]
fn index_builds_then_reports_cached() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = tmp.path().join("books.csv");
    let data_dir = tmp.path().join("data");
    write_catalog(&catalog, FIXTURE_ROWS);

    bookrec()
        .args(["index", "--embedder", "hash"])
        .arg("--catalog")
        .arg(&catalog)
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("indexed 3 books"));

    assert!(data_dir
        .join("vector_index")
        .join("index-fnv1a-384.bkvi")
        .is_file());
    assert!(data_dir.join("provision.json").is_file());

    // Unchanged catalog: the rebuild is skipped.
    bookrec()
        .args(["index", "--embedder", "hash"])
        .arg("--catalog")
        .arg(&catalog)
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("index up to date (3 books)"));
}

#[test]
fn full_flag_forces_rebuild() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = tmp.path().join("books.csv");
    let data_dir = tmp.path().join("data");
    write_catalog(&catalog, FIXTURE_ROWS);

    for _ in 0..2 {
        bookrec()
            .args(["index", "--embedder", "hash", "--full"])
            .arg("--catalog")
            .arg(&catalog)
            .arg("--data-dir")
            .arg(&data_dir)
            .assert()
            .success()
            .stdout(predicate::str::contains("indexed 3 books"));
    }
}

#[test]
fn catalog_edit_triggers_rebuild() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = tmp.path().join("books.csv");
    let data_dir = tmp.path().join("data");
    write_catalog(&catalog, FIXTURE_ROWS);

    bookrec()
        .args(["index", "--embedder", "hash"])
        .arg("--catalog")
        .arg(&catalog)
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success();

    write_catalog(
        &catalog,
        &format!("{FIXTURE_ROWS}Neuromancer,William Gibson,Cyberpunk heist,Cyberpunk\n"),
    );

    bookrec()
        .args(["index", "--embedder", "hash"])
        .arg("--catalog")
        .arg(&catalog)
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("indexed 4 books"));
}

#[test]
fn recommend_returns_json_results() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = tmp.path().join("books.csv");
    let data_dir = tmp.path().join("data");
    write_catalog(&catalog, FIXTURE_ROWS);

    bookrec()
        .args(["index", "--embedder", "hash"])
        .arg("--catalog")
        .arg(&catalog)
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success();

    let output = bookrec()
        .args(["recommend", "stranded astronaut on mars", "-k", "2"])
        .args(["--embedder", "hash"])
        .arg("--catalog")
        .arg(&catalog)
        .arg("--data-dir")
        .arg(&data_dir)
        .output()
        .unwrap();
    assert!(output.status.success());

    let results: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["title"], "The Martian");
    assert!(results[0]["score"].is_number());
}

#[test]
fn recommend_without_index_fails_with_guidance() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = tmp.path().join("books.csv");
    write_catalog(&catalog, FIXTURE_ROWS);

    bookrec()
        .args(["recommend", "mars", "--embedder", "hash"])
        .arg("--catalog")
        .arg(&catalog)
        .arg("--data-dir")
        .arg(tmp.path().join("empty-data"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("vector index missing"));
}

#[test]
fn minilm_index_without_model_fails_offline() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = tmp.path().join("books.csv");
    write_catalog(&catalog, FIXTURE_ROWS);

    // No model was ever fetched: the build must fail fast with guidance,
    // not attempt a download.
    bookrec()
        .args(["index", "--embedder", "minilm"])
        .arg("--catalog")
        .arg(&catalog)
        .arg("--data-dir")
        .arg(tmp.path().join("data"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("fetch-model"));
}

#[test]
fn missing_catalog_falls_back_to_builtin_list() {
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = tmp.path().join("data");

    bookrec()
        .args(["index", "--embedder", "hash"])
        .arg("--catalog")
        .arg(tmp.path().join("nope.csv"))
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("indexed 12 books"));
}

#[test]
fn unknown_embedder_is_rejected() {
    bookrec()
        .args(["index", "--embedder", "bert"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown embedder"));
}

//! E2E tests for model pre-materialization against a mock registry.
//!
//! The point of `fetch-model` is that it is the *only* networked step: these
//! tests stand up a local mock of the model host and verify install,
//! idempotence, and fail-fast behavior with no partial artifacts.

use assert_cmd::Command;
use httpmock::prelude::*;
use predicates::prelude::*;

const MODEL_FILES: &[&str] = &[
    "model.onnx",
    "tokenizer.json",
    "config.json",
    "special_tokens_map.json",
    "tokenizer_config.json",
];

fn bookrec() -> Command {
    Command::cargo_bin("bookrec").unwrap()
}

fn mock_registry(server: &MockServer) {
    for name in MODEL_FILES {
        server.mock(|when, then| {
            when.method(GET).path(format!("/model/{name}"));
            then.status(200)
                .header("content-type", "application/octet-stream")
                .body(format!("fake bytes of {name}"));
        });
    }
}

#[test]
fn fetch_model_installs_files_and_lock() {
    let server = MockServer::start();
    mock_registry(&server);
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = tmp.path().join("data");

    bookrec()
        .arg("fetch-model")
        .arg("--data-dir")
        .arg(&data_dir)
        .env("BOOKREC_MODEL_BASE_URL", server.url("/model"))
        .assert()
        .success()
        .stdout(predicate::str::contains("model installed"));

    let model_dir = data_dir.join("models").join("all-MiniLM-L6-v2");
    for name in MODEL_FILES {
        assert!(model_dir.join(name).is_file(), "missing {name}");
    }

    let lock: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(model_dir.join("model.lock.json")).unwrap())
            .unwrap();
    assert_eq!(lock["model"], "all-MiniLM-L6-v2");
    assert!(lock["files"]["model.onnx"]["sha256"].is_string());
}

#[test]
fn second_fetch_is_a_no_op() {
    let server = MockServer::start();
    mock_registry(&server);
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = tmp.path().join("data");

    for expectation in ["model installed", "model already installed"] {
        bookrec()
            .arg("fetch-model")
            .arg("--data-dir")
            .arg(&data_dir)
            .env("BOOKREC_MODEL_BASE_URL", server.url("/model"))
            .assert()
            .success()
            .stdout(predicate::str::contains(expectation));
    }
}

#[test]
fn missing_file_aborts_with_no_partial_install() {
    let server = MockServer::start();
    // Registry is missing everything but the first file.
    server.mock(|when, then| {
        when.method(GET).path("/model/model.onnx");
        then.status(200).body("weights");
    });
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = tmp.path().join("data");

    bookrec()
        .arg("fetch-model")
        .arg("--data-dir")
        .arg(&data_dir)
        .env("BOOKREC_MODEL_BASE_URL", server.url("/model"))
        .assert()
        .failure();

    // Fail-fast left no model directory behind.
    assert!(!data_dir.join("models").join("all-MiniLM-L6-v2").exists());
}

#[test]
fn tampered_install_is_refetched() {
    let server = MockServer::start();
    mock_registry(&server);
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = tmp.path().join("data");

    bookrec()
        .arg("fetch-model")
        .arg("--data-dir")
        .arg(&data_dir)
        .env("BOOKREC_MODEL_BASE_URL", server.url("/model"))
        .assert()
        .success();

    let onnx = data_dir
        .join("models")
        .join("all-MiniLM-L6-v2")
        .join("model.onnx");
    std::fs::write(&onnx, "corrupted").unwrap();

    bookrec()
        .arg("fetch-model")
        .arg("--data-dir")
        .arg(&data_dir)
        .env("BOOKREC_MODEL_BASE_URL", server.url("/model"))
        .assert()
        .success()
        .stdout(predicate::str::contains("model installed"));

    // The corrupt file was replaced with the registry copy.
    assert_eq!(
        std::fs::read_to_string(&onnx).unwrap(),
        "fake bytes of model.onnx"
    );
}

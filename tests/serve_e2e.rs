//! E2E test for the serve command: provision offline, bind, answer HTTP.

use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

mod util;
use util::{write_catalog, FIXTURE_ROWS};

struct ChildGuard(Child);

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn wait_for_health(client: &reqwest::blocking::Client, base: &str) {
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        if let Ok(res) = client.get(format!("{base}/health")).send() {
            if res.status().is_success() {
                return;
            }
        }
        assert!(Instant::now() < deadline, "server did not become healthy");
        std::thread::sleep(Duration::from_millis(100));
    }
}

#[test]
fn serve_provisions_and_answers_requests() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = tmp.path().join("books.csv");
    write_catalog(&catalog, FIXTURE_ROWS);
    let port = free_port();

    let child = Command::new(assert_cmd::cargo::cargo_bin("bookrec"))
        .args(["serve", "--embedder", "hash", "--host", "127.0.0.1"])
        .args(["--port", &port.to_string()])
        .arg("--catalog")
        .arg(&catalog)
        .arg("--data-dir")
        .arg(tmp.path().join("data"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let _guard = ChildGuard(child);

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    let base = format!("http://127.0.0.1:{port}");
    wait_for_health(&client, &base);

    // Health contract.
    let health: serde_json::Value = client
        .get(format!("{base}/health"))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(health["status"], "healthy");

    // Homepage is HTML.
    let home = client.get(format!("{base}/")).send().unwrap();
    assert!(home.status().is_success());
    assert!(home.text().unwrap().contains("<!doctype html>"));

    // Recommendations flow end to end.
    let res = client
        .post(format!("{base}/recommend"))
        .json(&serde_json::json!({"text": "stranded astronaut on mars", "k": 2}))
        .send()
        .unwrap();
    assert!(res.status().is_success());
    let body: serde_json::Value = res.json().unwrap();
    assert_eq!(body["results"].as_array().unwrap().len(), 2);
    assert_eq!(body["results"][0]["title"], "The Martian");

    // Missing text is a 400 with the JSON error shape.
    let res = client
        .post(format!("{base}/recommend"))
        .json(&serde_json::json!({"k": 2}))
        .send()
        .unwrap();
    assert_eq!(res.status().as_u16(), 400);
    let body: serde_json::Value = res.json().unwrap();
    assert_eq!(body["error"], "provide 'text' in JSON");
}

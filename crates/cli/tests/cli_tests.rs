#![allow(deprecated)] // cargo_bin is deprecated but still functional

use assert_cmd::Command;
use httpmock::Method::{DELETE, GET, POST, PUT};
use httpmock::MockServer;
use parcel_core::{FileId, Fingerprint};
use predicates::str::contains;
use serde_json::json;
use std::fs;
use std::net::TcpListener;
use tempfile::TempDir;

fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

fn parcelctl() -> Command {
    let mut cmd = Command::cargo_bin("parcelctl").unwrap();
    cmd.env_remove("PARCEL_CLIENT_CONFIG")
        .env_remove("PARCEL_SERVER_URL")
        .env_remove("PARCEL_CHUNK_SIZE");
    cmd
}

#[test]
fn hash_prints_fingerprint_and_layout() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("hello.txt");
    fs::write(&path, b"hello world").unwrap();
    let fp = Fingerprint::compute(b"hello world").to_hex();

    parcelctl()
        .args(["hash", "--chunk-size", "4"])
        .arg(&path)
        .assert()
        .success()
        .stdout(contains(format!("Fingerprint: {fp}")))
        .stdout(contains("Chunks: 3 x 4 B"));
}

#[test]
fn hash_reads_stdin_when_path_is_dash() {
    let fp = Fingerprint::compute(b"hello world").to_hex();

    parcelctl()
        .args(["hash", "--chunk-size", "4", "-"])
        .write_stdin("hello world")
        .assert()
        .success()
        .stdout(contains(format!("Fingerprint: {fp}")))
        .stdout(contains("(11 bytes)"))
        .stdout(contains("Chunks: 3 x 4 B"));
}

#[test]
fn hash_missing_file_fails() {
    parcelctl()
        .args(["hash", "/nonexistent/parcel-input.bin"])
        .assert()
        .failure()
        .stderr(contains("failed to open"));
}

#[test]
fn upload_sends_only_missing_chunks() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("hello.txt");
    fs::write(&path, b"hello world").unwrap();

    let fp = Fingerprint::compute(b"hello world").to_hex();
    let file_id = FileId::new();

    let init = server.mock(|when, then| {
        when.method(POST).path("/v1/uploads").json_body(json!({
            "fingerprint": fp,
            "total_size": 11,
            "chunk_size": 4,
            "file_name": "hello.txt"
        }));
        then.status(200).json_body(json!({
            "fingerprint": fp,
            "status": "in_progress",
            "total_size": 11,
            "chunk_size": 4,
            "total_chunks": 3,
            "received_chunk_indices": [0, 2]
        }));
    });

    let chunk = server.mock(|when, then| {
        when.method(PUT)
            .path(format!("/v1/uploads/{fp}/chunks/1"))
            .body("o wo");
        then.status(200).json_body(json!({
            "fingerprint": fp,
            "index": 1,
            "received_chunks": 3,
            "total_chunks": 3
        }));
    });

    let complete = server.mock(|when, then| {
        when.method(POST).path(format!("/v1/uploads/{fp}/complete"));
        then.status(200).json_body(json!({
            "fingerprint": fp,
            "file_id": file_id.to_string(),
            "download_reference": format!("/v1/files/{file_id}"),
            "size": 11
        }));
    });

    parcelctl()
        .args(["--server", &server.base_url(), "upload", "--chunk-size", "4", "--quiet"])
        .arg(&path)
        .assert()
        .success()
        .stdout(contains(format!("File ID: {file_id}")));

    init.assert();
    chunk.assert_hits(1);
    complete.assert();
}

#[test]
fn upload_reports_rejection() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("big.bin");
    fs::write(&path, vec![7u8; 64]).unwrap();

    server.mock(|when, then| {
        when.method(POST).path("/v1/uploads");
        then.status(400).json_body(json!({
            "code": "invalid_request",
            "message": "chunk_size 8 must be between 16 and 64"
        }));
    });

    parcelctl()
        .args(["--server", &server.base_url(), "upload", "--chunk-size", "8", "-q"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(contains("chunk_size 8 must be between 16 and 64"));
}

#[test]
fn list_download_delete() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let file_id = FileId::new();
    let fp = Fingerprint::compute(b"report body").to_hex();

    server.mock(|when, then| {
        when.method(GET).path("/v1/files");
        then.status(200).json_body(json!({
            "files": [{
                "file_id": file_id.to_string(),
                "fingerprint": fp,
                "file_name": "report.txt",
                "mime_type": "text/plain",
                "size": 11,
                "created_at": "2026-01-02T03:04:05Z",
                "completed_at": "2026-01-02T03:05:00Z"
            }]
        }));
    });
    server.mock(|when, then| {
        when.method(GET).path(format!("/v1/files/{file_id}"));
        then.status(200)
            .header("content-type", "text/plain")
            .body("report body");
    });
    let delete = server.mock(|when, then| {
        when.method(DELETE).path(format!("/v1/files/{file_id}"));
        then.status(204);
    });

    parcelctl()
        .args(["--server", &server.base_url(), "list"])
        .assert()
        .success()
        .stdout(contains(file_id.to_string()))
        .stdout(contains("report.txt"));

    let temp = TempDir::new().unwrap();
    let output = temp.path().join("out.txt");
    parcelctl()
        .args(["--server", &server.base_url(), "download", &file_id.to_string(), "-o"])
        .arg(&output)
        .assert()
        .success();
    assert_eq!(fs::read(&output).unwrap(), b"report body");

    parcelctl()
        .args(["--server", &server.base_url(), "delete", &file_id.to_string()])
        .assert()
        .success()
        .stdout(contains(format!("Deleted {file_id}")));
    delete.assert();
}

#[test]
fn status_shows_missing_chunks() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let fp = Fingerprint::compute(b"partial").to_hex();
    server.mock(|when, then| {
        when.method(GET).path(format!("/v1/uploads/{fp}"));
        then.status(200).json_body(json!({
            "fingerprint": fp,
            "status": "in_progress",
            "total_size": 7000,
            "chunk_size": 1000,
            "total_chunks": 7,
            "received_chunk_indices": [0, 3, 4]
        }));
    });

    parcelctl()
        .args(["--server", &server.base_url(), "status", &fp])
        .assert()
        .success()
        .stdout(contains("Status: in_progress"))
        .stdout(contains("Chunks: 3/7 received"))
        .stdout(contains("Missing: 1-2, 5-6"));
}

#[test]
fn health_uses_config_file() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v1/health");
        then.status(200)
            .json_body(json!({ "status": "ok", "version": "0.1.0" }));
    });

    let temp = TempDir::new().unwrap();
    let config = temp.path().join("client.toml");
    fs::write(&config, format!("server_url = \"{}\"\n", server.base_url())).unwrap();

    parcelctl()
        .arg("--config")
        .arg(&config)
        .arg("health")
        .assert()
        .success()
        .stdout(contains("Status: ok"))
        .stdout(contains("Version: 0.1.0"));
}

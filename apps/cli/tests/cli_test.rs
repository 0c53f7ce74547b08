//! CLI smoke tests.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn list_on_empty_store_succeeds() {
    let dir = TempDir::new().unwrap();
    Command::cargo_bin("mimic")
        .unwrap()
        .args(["list", "--workflow-dir"])
        .arg(dir.path().join("workflows"))
        .assert()
        .success()
        .stdout(predicate::str::contains("No stored workflows"));
}

#[test]
fn report_writes_catalog() {
    let dir = TempDir::new().unwrap();
    let workflow_dir = dir.path().join("workflows");
    Command::cargo_bin("mimic")
        .unwrap()
        .args(["report", "--workflow-dir"])
        .arg(&workflow_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Catalog refreshed"));
    assert!(workflow_dir.join("parts/catalog.json").exists());
}

#[test]
fn stats_on_empty_store_succeeds() {
    let dir = TempDir::new().unwrap();
    Command::cargo_bin("mimic")
        .unwrap()
        .args(["stats", "--workflow-dir"])
        .arg(dir.path().join("workflows"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Learning statistics"));
}

#[test]
fn unknown_report_format_fails() {
    let dir = TempDir::new().unwrap();
    Command::cargo_bin("mimic")
        .unwrap()
        .args(["report", "--format", "yaml", "--workflow-dir"])
        .arg(dir.path().join("workflows"))
        .assert()
        .failure();
}

#[test]
fn help_without_subcommand() {
    Command::cargo_bin("mimic").unwrap().assert().success();
}

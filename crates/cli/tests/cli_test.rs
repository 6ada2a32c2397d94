//! # CLI Tests
//!
//! Runs the `storytrack` binary for the commands that work offline.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;
use tempfile::tempdir;

fn storytrack(dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("storytrack").unwrap();
    cmd.current_dir(dir)
        .env_remove("SUPABASE_URL")
        .env_remove("SUPABASE_ANON_KEY")
        .env_remove("STORYTRACK_BACKEND_URL")
        .env_remove("STORYTRACK_ANON_KEY")
        .env_remove("STORYTRACK_CONFIG")
        .env("STORYTRACK_DATA_DIR", dir.join("data"));
    cmd
}

#[test]
fn test_help_lists_commands() {
    let dir = tempdir().unwrap();
    storytrack(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("recommend"))
        .stdout(predicate::str::contains("reset-password"));
}

#[test]
fn test_stores_are_sorted_by_distance() {
    let dir = tempdir().unwrap();
    // Standing next to Powell's in Portland.
    let output = storytrack(dir.path())
        .args(["stores", "--lat", "45.52", "--lon", "-122.68"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let rows: Vec<&str> = stdout.lines().skip(2).collect();
    assert!(rows[0].starts_with("Powell's City of Books"));
    assert!(rows[1].starts_with("Elliott Bay Book Company"));
}

#[test]
fn test_out_of_range_coordinates_fail() {
    let dir = tempdir().unwrap();
    storytrack(dir.path())
        .args(["stores", "--lat", "123", "--lon", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Stores failed"));
}

#[test]
fn test_theme_is_persisted() {
    let dir = tempdir().unwrap();
    storytrack(dir.path())
        .args(["theme", "dark"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Theme: dark"));
    storytrack(dir.path())
        .args(["theme", "toggle"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Theme: light"));
    storytrack(dir.path())
        .arg("theme")
        .assert()
        .success()
        .stdout(predicate::str::contains("Theme: light"));
    assert!(dir.path().join("data").join("theme.json").exists());
}

#[test]
fn test_backend_commands_need_configuration() {
    let dir = tempdir().unwrap();
    storytrack(dir.path())
        .arg("books")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Books failed"))
        .stderr(predicate::str::contains("backend_url"));
}

#[test]
fn test_invalid_rating_is_rejected_by_the_parser() {
    let dir = tempdir().unwrap();
    storytrack(dir.path())
        .args(["rate", "1", "9"])
        .assert()
        .failure();
}

// Command line behavior against a fake tracing directory

mod utils;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use utils::fake_tracefs;

fn tracerec(tracefs: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("tracerec").unwrap();
    cmd.arg("--tracing-dir").arg(tracefs.path());
    cmd
}

fn read(dir: &TempDir, name: &str) -> String {
    std::fs::read_to_string(dir.path().join(name)).unwrap()
}

#[test]
fn test_stop_turns_tracing_off() {
    let dir = TempDir::new().unwrap();
    fake_tracefs(dir.path(), 1);
    std::fs::write(dir.path().join("tracing_on"), "1").unwrap();

    tracerec(&dir).arg("stop").assert().success();
    assert_eq!(read(&dir, "tracing_on"), "0");
}

#[test]
fn test_reset_blanks_the_facility() {
    let dir = TempDir::new().unwrap();
    fake_tracefs(dir.path(), 1);
    std::fs::write(dir.path().join("current_tracer"), "function").unwrap();
    std::fs::write(dir.path().join("events/enable"), "1").unwrap();

    tracerec(&dir).arg("reset").assert().success();
    assert_eq!(read(&dir, "tracing_on"), "0");
    assert_eq!(read(&dir, "current_tracer"), "nop");
    assert_eq!(read(&dir, "events/enable"), "0");
}

#[test]
fn test_list_without_flags_prints_every_catalogue() {
    let dir = TempDir::new().unwrap();
    fake_tracefs(dir.path(), 1);

    tracerec(&dir)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("events:"))
        .stdout(predicate::str::contains("sched:sched_switch"))
        .stdout(predicate::str::contains("plugins:"))
        .stdout(predicate::str::contains("irqsoff"))
        .stdout(predicate::str::contains("options:"));
}

#[test]
fn test_list_plugins_only() {
    let dir = TempDir::new().unwrap();
    fake_tracefs(dir.path(), 1);

    tracerec(&dir)
        .args(["list", "-p"])
        .assert()
        .success()
        .stdout("function nop irqsoff\n");
}

#[test]
fn test_record_without_events_or_plugin_aborts() {
    let dir = TempDir::new().unwrap();
    fake_tracefs(dir.path(), 1);

    tracerec(&dir)
        .args(["record", "true"])
        .assert()
        .failure()
        .code(255)
        .stderr(predicate::str::contains("no event or plugin was specified"));
}

#[test]
fn test_missing_tracing_dir_exits_with_errno() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("not-mounted");

    Command::cargo_bin("tracerec")
        .unwrap()
        .arg("--tracing-dir")
        .arg(&missing)
        .arg("stop")
        .assert()
        .failure()
        .code(libc::ENOENT)
        .stderr(predicate::str::contains("tracing_on"));
}

#[test]
fn test_unknown_subcommand_is_usage_error() {
    Command::cargo_bin("tracerec")
        .unwrap()
        .arg("view")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

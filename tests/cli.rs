//! End-to-end CLI tests.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, content: &str) {
    std::fs::write(dir.path().join(name), content).unwrap();
}

fn scriptest() -> Command {
    Command::cargo_bin("scriptest").unwrap()
}

#[test]
fn version_flag_works() {
    scriptest()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("scriptest"));
}

#[test]
fn passing_suite_exits_zero() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "ok.rhai",
        r#"
        it("adds", || {
            if 1 + 1 != 2 { throw "arithmetic is broken"; }
        });
        it("concats", || "a" + "b");
        run()
        "#,
    );

    scriptest()
        .current_dir(dir.path())
        .args(["--pattern", "*.rhai"])
        .assert()
        .success()
        .stdout(predicate::str::contains("All test files passed"));
}

#[test]
fn failing_suite_exits_one() {
    let dir = TempDir::new().unwrap();
    write(&dir, "bad.rhai", r#"it("boom", || { throw "broken"; }); run()"#);

    scriptest()
        .current_dir(dir.path())
        .args(["--pattern", "*.rhai"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Some test files failed"));
}

#[test]
fn invalid_report_exits_one() {
    let dir = TempDir::new().unwrap();
    write(&dir, "num.rhai", "42");

    scriptest()
        .current_dir(dir.path())
        .args(["--pattern", "*.rhai"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("invalid report"));
}

#[test]
fn softfail_alone_exits_zero() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "soft.rhai",
        r#"fail("known flaky", || { throw "still broken"; }); run()"#,
    );

    scriptest()
        .current_dir(dir.path())
        .args(["--pattern", "*.rhai"])
        .assert()
        .success();
}

#[test]
fn no_matching_files_exits_zero() {
    let dir = TempDir::new().unwrap();

    scriptest()
        .current_dir(dir.path())
        .args(["--pattern", "*.rhai"])
        .assert()
        .success();
}

#[test]
fn collect_only_lists_without_running() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "would_fail.rhai",
        r#"it("explodes when run", || { throw "boom"; }); run()"#,
    );

    scriptest()
        .current_dir(dir.path())
        .args(["--pattern", "*.rhai", "--collect-only"])
        .assert()
        .success();
}

#[test]
fn junit_reporter_writes_the_output_dir() {
    let dir = TempDir::new().unwrap();
    write(&dir, "ok.rhai", r#"it("a", || 1); run()"#);
    write(
        &dir,
        "scriptest.toml",
        r#"
        [run]
        pattern = ["*.rhai"]

        [report]
        output_dir = "results"
        reporters = ["console", "junit", "json"]
        "#,
    );

    scriptest().current_dir(dir.path()).assert().success();

    let junit = std::fs::read_to_string(dir.path().join("results/junit.xml")).unwrap();
    assert!(junit.contains("<testsuites"));
    assert!(junit.contains("ok.rhai"));

    let json = std::fs::read_to_string(dir.path().join("results/report.json")).unwrap();
    assert!(json.contains("\"files_passed\""));
}

#[test]
fn explicit_file_and_timeout_flags() {
    let dir = TempDir::new().unwrap();
    write(&dir, "spin.rhai", "let x = 0; loop { x += 1; }");

    scriptest()
        .current_dir(dir.path())
        .args(["--file", "spin.rhai", "--timeout", "300"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("timed out after 300 ms"));
}

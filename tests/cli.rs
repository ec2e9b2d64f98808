use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

#[test]
fn checker_run_quickstart() {
    let mut cmd = Command::cargo_bin("checker").expect("binary exists");
    cmd.arg("run").arg("demos/quickstart.ckl");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Hello from Checker!"))
        .stdout(predicate::str::contains("squares: [1, 4, 9, 16]"))
        .stdout(predicate::str::contains("pears are sold out"))
        .stdout(predicate::str::contains("total: -1"));
}

#[test]
fn checker_eval_snippet() {
    let mut cmd = Command::cargo_bin("checker").expect("binary exists");
    cmd.arg("eval").arg("1 + 2 + 3");
    cmd.assert().success().stdout(predicate::str::contains("6"));
}

#[test]
fn checker_eval_reports_errors() {
    let mut cmd = Command::cargo_bin("checker").expect("binary exists");
    cmd.arg("eval").arg("nope");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("undefined symbol `nope`"));
}

#[test]
fn checker_run_resolves_modules_from_include_dirs() {
    let dir = tempdir().expect("create temp dir");
    let lib = dir.path().join("lib");
    fs::create_dir(&lib).expect("create lib dir");
    fs::write(lib.join("greet.ckl"), "def hello(name) 'hello ' + name\n")
        .expect("write module");
    let script = dir.path().join("main.ckl");
    fs::write(&script, "require greet\nprintln(greet->hello('world'))\n").expect("write script");

    let mut cmd = Command::cargo_bin("checker").expect("binary exists");
    cmd.arg("run").arg(&script).arg("-I").arg(&lib);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("hello world"));
}

#[test]
fn checker_run_resolves_modules_next_to_script() {
    let dir = tempdir().expect("create temp dir");
    fs::write(dir.path().join("consts.ckl"), "def answer = 42\n").expect("write module");
    let script = dir.path().join("main.ckl");
    fs::write(&script, "require consts unqualified\nprintln(answer)\n").expect("write script");

    let mut cmd = Command::cargo_bin("checker").expect("binary exists");
    cmd.arg("run").arg(&script);
    cmd.assert().success().stdout(predicate::str::contains("42"));
}

#[test]
fn checker_check_flags_undefined_names() {
    let dir = tempdir().expect("create temp dir");
    let good = dir.path().join("good.ckl");
    fs::write(&good, "def x = 1\nprintln(x + 1)\n").expect("write script");
    let bad = dir.path().join("bad.ckl");
    fs::write(&bad, "println(missing)\n").expect("write script");

    let mut cmd = Command::cargo_bin("checker").expect("binary exists");
    cmd.arg("check").arg(&good);
    cmd.assert().success().stdout(predicate::str::contains("ok"));

    let mut cmd = Command::cargo_bin("checker").expect("binary exists");
    cmd.arg("check").arg(&bad);
    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("undefined symbol `missing`"));
}

#[test]
fn checker_check_accepts_last_error_in_handlers() {
    let dir = tempdir().expect("create temp dir");
    let script = dir.path().join("handler.ckl");
    fs::write(&script, "do\n  error 'boom'\ncatch all\n  println(last_error)\nend\n")
        .expect("write script");

    let mut cmd = Command::cargo_bin("checker").expect("binary exists");
    cmd.arg("check").arg(&script);
    cmd.assert().success().stdout(predicate::str::contains("ok"));
}

use std::io::Write;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::NamedTempFile;

fn kiln() -> Command {
    Command::cargo_bin("kiln").expect("kiln binary")
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../kiln_jit/tests/fixtures")
        .join(name)
}

fn source_file(text: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".kasm")
        .tempfile()
        .expect("temp file");
    file.write_all(text.as_bytes()).expect("write");
    file
}

const ADD: &str = "\
/// CHECK-START: int Main.add(int, int) constant_folding (after)
/// CHECK: Add
.method static int Main.add(int, int)
    iload 0
    iload 1
    iadd
    ireturn
.end
";

#[test]
fn test_fixture_passes() {
    kiln()
        .arg(fixture("fold.kasm"))
        .assert()
        .success()
        .stdout(predicate::str::contains("0 failed"));
}

#[test]
fn test_isa_flag_skips_other_blocks() {
    kiln()
        .arg(fixture("arm64.kasm"))
        .args(["--isa", "x86_64"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 passed, 0 failed, 4 skipped"));
}

#[test]
fn test_failing_check_exits_one() {
    let file = source_file(&ADD.replace("CHECK: Add", "CHECK: Mul"));
    kiln()
        .arg(file.path())
        .assert()
        .code(1)
        .stdout(predicate::str::contains("0 passed, 1 failed"))
        .stderr(predicate::str::contains("FAIL").and(predicate::str::contains("CHECK: Mul")));
}

#[test]
fn test_asm_error_points_at_line() {
    let file = source_file(".method static void Main.f()\n    frob\n.end\n");
    kiln()
        .arg(file.path())
        .assert()
        .code(1)
        .stderr(
            predicate::str::contains("unknown instruction `frob`")
                .and(predicate::str::contains(" 2 |     frob")),
        );
}

#[test]
fn test_dump_prints_selected_pass() {
    let file = source_file(ADD);
    kiln()
        .arg(file.path())
        .args(["--dump", "--pass", "BCE", "--method", "add"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("== int Main.add(int, int) BCE (before)")
                .and(predicate::str::contains("== int Main.add(int, int) BCE (after)"))
                .and(predicate::str::contains("constant_folding").not()),
        );
}

#[test]
fn test_method_glob_excludes_everything() {
    let file = source_file(ADD);
    kiln()
        .arg(file.path())
        .args(["--method", "nothing*"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0 passed, 0 failed, 1 skipped"));
}

#[test]
fn test_list_passes() {
    kiln()
        .args(["--list-passes", "--isa", "x86_64"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("BCE")
                .and(predicate::str::contains("dead_code_elimination$final"))
                .and(predicate::str::contains("instruction_simplifier_arm64").not()),
        );
}

#[test]
fn test_config_file_selects_isa() {
    let mut config = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp file");
    writeln!(config, "isa = \"x86_64\"").expect("write");
    kiln()
        .arg(fixture("arm64.kasm"))
        .arg("--config")
        .arg(config.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("4 skipped"));
}

#[test]
fn test_usage_errors_exit_two() {
    kiln()
        .assert()
        .code(2)
        .stderr(predicate::str::contains("required arguments were not provided"));
    kiln().args(["f.kasm", "--isa", "mips"]).assert().code(2);
    kiln()
        .arg("/nonexistent/input.kasm")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("cannot read"));

    let file = source_file(ADD);
    let mut config = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp file");
    writeln!(config, "enable_bce = 3").expect("write");
    kiln()
        .arg(file.path())
        .arg("--config")
        .arg(config.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("invalid config"));
}

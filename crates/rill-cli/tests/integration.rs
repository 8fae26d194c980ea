//! Integration tests for rill-cli.
//!
//! Tests invoke the built binary against patch files written to a temporary
//! directory.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

/// Helper to get the path to the `rill` binary built by cargo.
fn rill_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_rill"))
}

const DRIFT: &str = r#"
name = "drift"

[[block]]
id = "speed"
type = "input"
params = { default = 1 }

[[block]]
id = "pos"
type = "integrate"

[[wire]]
from = "speed.out"
to = "pos.in"

[[output]]
name = "pos"
from = "pos.out"
"#;

const LOOP: &str = r#"
[[block]]
id = "one"
type = "const"
params = { value = 1 }

[[block]]
id = "sum"
type = "add"

[[block]]
id = "half"
type = "mul"

[[block]]
id = "k"
type = "const"
params = { value = 0.5 }

[[wire]]
from = "one.out"
to = "sum.a"

[[wire]]
from = "half.out"
to = "sum.b"

[[wire]]
from = "sum.out"
to = "half.a"

[[wire]]
from = "k.out"
to = "half.b"

[[output]]
name = "sum"
from = "sum.out"
"#;

fn write_patch(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn run_ok(args: &[&str]) -> String {
    let output = rill_bin().args(args).output().expect("failed to run rill");
    assert!(
        output.status.success(),
        "rill {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

// ---------------------------------------------------------------------------
// `rill blocks`
// ---------------------------------------------------------------------------

#[test]
fn blocks_lists_every_category() {
    let stdout = run_ok(&["blocks"]);
    assert!(stdout.contains("Available blocks"));
    for name in ["Math", "Signal", "State", "Field"] {
        assert!(stdout.contains(name), "missing category {name}");
    }
    for block in ["lfo", "integrate", "delay", "trail", "reduce"] {
        assert!(stdout.contains(block), "missing block {block}");
    }
}

#[test]
fn blocks_shows_ports_of_one_type() {
    let stdout = run_ok(&["blocks", "lfo"]);
    assert!(stdout.contains("Inputs:"));
    assert!(stdout.contains("rate"));
    assert!(stdout.contains("Outputs:"));
    assert!(stdout.contains("phase"));
}

#[test]
fn blocks_rejects_unknown_type() {
    let output = rill_bin().args(["blocks", "wobbler"]).output().unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown block type"));
}

// ---------------------------------------------------------------------------
// `rill check`
// ---------------------------------------------------------------------------

#[test]
fn check_summarizes_schedule() {
    let dir = TempDir::new().unwrap();
    let path = write_patch(dir.path(), "drift.toml", DRIFT);
    let stdout = run_ok(&["check", path.to_str().unwrap(), "--steps"]);
    assert!(stdout.contains("drift: ok"));
    for phase in ["latch-read", "compute", "rail-resolve", "latch-commit"] {
        assert!(stdout.contains(phase), "missing phase {phase}");
    }
    assert!(stdout.contains("LatchCommit"));
}

#[test]
fn check_reports_instantaneous_cycle() {
    let dir = TempDir::new().unwrap();
    let path = write_patch(dir.path(), "loop.toml", LOOP);
    let output = rill_bin()
        .args(["check", path.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("instantaneous cycle"), "stderr: {stderr}");
    assert!(stderr.contains("wire #"), "stderr: {stderr}");
}

#[test]
fn check_reports_validation_errors() {
    let dir = TempDir::new().unwrap();
    let path = write_patch(
        dir.path(),
        "bad.toml",
        "[[block]]\nid = \"x\"\ntype = \"wobbler\"\n",
    );
    let output = rill_bin()
        .args(["check", path.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("wobbler"));
}

#[test]
fn check_missing_patch_fails() {
    let output = rill_bin()
        .args(["check", "definitely-not-a-patch-anywhere"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}

// ---------------------------------------------------------------------------
// `rill run`
// ---------------------------------------------------------------------------

#[test]
fn run_prints_outputs_per_frame() {
    let dir = TempDir::new().unwrap();
    let path = write_patch(dir.path(), "drift.toml", DRIFT);
    let stdout = run_ok(&[
        "run",
        path.to_str().unwrap(),
        "--frames",
        "2",
        "--dt",
        "1000",
        "--input",
        "speed=2",
    ]);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("pos=2"), "line: {}", lines[0]);
    assert!(lines[1].ends_with("pos=4"), "line: {}", lines[1]);
}

#[test]
fn run_rejects_unknown_input() {
    let dir = TempDir::new().unwrap();
    let path = write_patch(dir.path(), "drift.toml", DRIFT);
    let output = rill_bin()
        .args(["run", path.to_str().unwrap(), "--input", "gain=1"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown input 'gain'"));
}

#[test]
fn run_resumes_from_saved_state() {
    let dir = TempDir::new().unwrap();
    let path = write_patch(dir.path(), "drift.toml", DRIFT);
    let snap = dir.path().join("drift.json");
    let patch = path.to_str().unwrap();

    run_ok(&[
        "run",
        patch,
        "--frames",
        "2",
        "--dt",
        "1000",
        "--save-state",
        snap.to_str().unwrap(),
    ]);
    assert!(snap.is_file());

    let stdout = run_ok(&[
        "run",
        patch,
        "--frames",
        "1",
        "--dt",
        "1000",
        "--resume",
        snap.to_str().unwrap(),
    ]);
    assert!(stdout.trim_end().ends_with("pos=3"), "stdout: {stdout}");
}

// ---------------------------------------------------------------------------
// `rill export`
// ---------------------------------------------------------------------------

#[test]
fn export_writes_every_frame() {
    let dir = TempDir::new().unwrap();
    let path = write_patch(dir.path(), "drift.toml", DRIFT);
    let out = dir.path().join("frames.json");
    run_ok(&[
        "export",
        path.to_str().unwrap(),
        "--frames",
        "10",
        "--dt",
        "100",
        "--out",
        out.to_str().unwrap(),
    ]);

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    let frames = json["frames"].as_array().unwrap();
    assert_eq!(frames.len(), 10);
    assert_eq!(frames[0]["frame"], 0);
    assert_eq!(frames[9]["frame"], 9);
    assert!(json.get("final_state").is_some());
}

#[test]
fn export_matches_run() {
    let dir = TempDir::new().unwrap();
    let path = write_patch(dir.path(), "drift.toml", DRIFT);
    let patch = path.to_str().unwrap();

    let stdout = run_ok(&["export", patch, "--frames", "3", "--dt", "250"]);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let last = &json["frames"][2]["outputs"]["pos"]["float"];

    let live = run_ok(&["run", patch, "--frames", "3", "--dt", "250"]);
    let expected = format!("pos={}", last.as_f64().unwrap());
    assert!(live.trim_end().ends_with(&expected), "live: {live}");
}

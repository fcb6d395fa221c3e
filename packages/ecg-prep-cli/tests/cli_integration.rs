use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn ecgprep() -> Command {
    let mut cmd = Command::cargo_bin("ecgprep").unwrap();
    cmd.env_remove("ECGPREP_ROOT");
    cmd
}

const BASE_YAML: &str = "target_fs: 250\n\
bandpass:\n  low: 0.5\n  high: 40\n  order: 4\n\
win_sec: 2\n\
drop_last: true\n";

fn write_config(root: &Path, yaml: &str) {
    fs::create_dir_all(root.join("configs")).unwrap();
    fs::write(root.join("configs/base.yaml"), yaml).unwrap();
}

/// One-lead format-16 record of `n` samples at 250 Hz under `{root}/raw/{name}`
fn write_record(root: &Path, name: &str, n: usize) {
    fs::create_dir_all(root.join("raw")).unwrap();
    fs::write(
        root.join(format!("raw/{}.hea", name)),
        format!("{name} 1 250 {n}\n{name}.dat 16 200 16 0 0 0 0 II\n"),
    )
    .unwrap();
    let bytes: Vec<u8> = (0..n)
        .flat_map(|t| {
            let v = (300.0 * (t as f64 * 0.2).sin()) as i16;
            v.to_le_bytes()
        })
        .collect();
    fs::write(root.join(format!("raw/{}.dat", name)), bytes).unwrap();
}

fn write_table(root: &Path, class: &str, label: u8, names: &[&str]) {
    fs::create_dir_all(root.join("data")).unwrap();
    let mut text = String::from("class,label,basepath,recname,patient_id\n");
    for name in names {
        text.push_str(&format!("{},{},raw/{},{},p{}\n", class, label, name, name, name));
    }
    fs::write(root.join(format!("data/records_{}.csv", class)), text).unwrap();
}

fn project(normal: &[&str], af: &[&str]) -> TempDir {
    let tmp = TempDir::new().unwrap();
    write_config(tmp.path(), BASE_YAML);
    for name in normal.iter().chain(af) {
        write_record(tmp.path(), name, 1500);
    }
    write_table(tmp.path(), "normal", 0, normal);
    write_table(tmp.path(), "af", 1, af);
    tmp
}

// =============================================================================
// GENERAL
// =============================================================================

#[test]
fn test_no_args_shows_help() {
    ecgprep()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

#[test]
fn test_version_flag() {
    ecgprep()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ecgprep"));
}

#[test]
fn test_help_flag() {
    ecgprep()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("validate"));
}

// =============================================================================
// STEPS SUBCOMMAND
// =============================================================================

#[test]
fn test_steps_subcommand() {
    ecgprep()
        .arg("steps")
        .assert()
        .success()
        .stdout(predicate::str::contains("interim"))
        .stdout(predicate::str::contains("window"))
        .stdout(predicate::str::contains("metadata"));
}

#[test]
fn test_steps_json_in_canonical_order() {
    let output = ecgprep().args(["steps", "--json"]).assert().success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let names: Vec<&str> = parsed
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["interim", "window", "metadata"]);
}

// =============================================================================
// VALIDATE SUBCOMMAND
// =============================================================================

#[test]
fn test_validate_default_config() {
    let tmp = TempDir::new().unwrap();
    write_config(tmp.path(), BASE_YAML);
    ecgprep()
        .args(["validate", "--root"])
        .arg(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("window 500 samples"));
}

#[test]
fn test_validate_missing_config() {
    let tmp = TempDir::new().unwrap();
    ecgprep()
        .args(["validate", "--root"])
        .arg(tmp.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn test_validate_rejects_inverted_band() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("bad.yaml");
    fs::write(&path, "target_fs: 250\nbandpass: {low: 40, high: 1}\nwin_sec: 10\n").unwrap();
    ecgprep()
        .arg("validate")
        .arg("--config")
        .arg(&path)
        .assert()
        .code(1);
}

#[test]
fn test_validate_json_output() {
    let tmp = TempDir::new().unwrap();
    write_config(tmp.path(), "target_fs: 250\nbandpass: {low: 0.5, high: 40}\nwin_sec: 10\nstride_sec: 5\n");
    let output = ecgprep()
        .args(["validate", "--json", "--root"])
        .arg(tmp.path())
        .assert()
        .success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed["valid"], true);
    assert_eq!(parsed["window_samples"], 2500);
    assert_eq!(parsed["stride_samples"], 1250);
}

// =============================================================================
// RUN SUBCOMMAND
// =============================================================================

#[test]
fn test_run_unknown_step() {
    ecgprep()
        .args(["run", "--steps", "00_extract"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown step"));
}

#[test]
fn test_run_missing_config() {
    let tmp = TempDir::new().unwrap();
    ecgprep()
        .args(["run", "--root"])
        .arg(tmp.path())
        .assert()
        .code(1);
}

#[test]
fn test_run_all_steps() {
    let tmp = project(&["100", "101"], &["04015"]);
    ecgprep()
        .args(["run", "--root"])
        .arg(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("interim"))
        .stdout(predicate::str::contains("processed=3"));

    let root = tmp.path();
    assert!(root.join("data/interim/250hz/250hz_index.csv").exists());
    assert!(root.join("data/windows/250hz_2s/af/04015_w000000000.npy").exists());
    let metadata = fs::read_to_string(root.join("data/metadata.csv")).unwrap();
    // header + 3 recordings x 3 windows
    assert_eq!(metadata.lines().count(), 10);
}

#[test]
fn test_run_with_missing_recording_is_partial() {
    let tmp = project(&["100"], &[]);
    write_table(tmp.path(), "af", 1, &["ghost"]);

    let output = ecgprep()
        .args(["run", "--json", "--steps", "interim", "--root"])
        .arg(tmp.path())
        .assert()
        .code(3);
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let report = &parsed["reports"][0];
    assert_eq!(report["step"], "interim");
    assert_eq!(report["processed"], 1);
    assert_eq!(report["skipped"], 1);
    assert_eq!(report["skipped_recordings"][0]["recname"], "ghost");
}

#[test]
fn test_single_step_subcommands() {
    let tmp = project(&["100"], &[]);
    ecgprep().arg("interim").arg("--root").arg(tmp.path()).assert().success();
    ecgprep().arg("window").arg("--root").arg(tmp.path()).assert().success();
    ecgprep()
        .arg("metadata")
        .arg("--root")
        .arg(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("rows=3"));
}

#[test]
fn test_metadata_before_window_fails() {
    let tmp = project(&["100"], &[]);
    ecgprep()
        .args(["metadata", "--root"])
        .arg(tmp.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("run the window step first"));
}

#[test]
fn test_cutoff_above_nyquist_is_config_error() {
    let tmp = project(&["100"], &[]);
    write_config(
        tmp.path(),
        "target_fs: 250\nbandpass: {low: 0.5, high: 200}\nwin_sec: 2\n",
    );
    ecgprep()
        .args(["interim", "--root"])
        .arg(tmp.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_report_written_to_file() {
    let tmp = project(&["100"], &[]);
    let out = tmp.path().join("reports/interim.json");
    ecgprep()
        .args(["interim", "--json", "--compact", "--root"])
        .arg(tmp.path())
        .arg("--output")
        .arg(&out)
        .assert()
        .success();
    let parsed: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out).unwrap()).unwrap();
    assert_eq!(parsed["config"]["target_fs"], 250);
}

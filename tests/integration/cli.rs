//! Tests for the `delta-update` binary's offline commands.

use crate::common::TestEnv;
use predicates::prelude::*;

#[test]
fn test_help_lists_commands() {
    let env = TestEnv::new();
    env.cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("schedule"))
        .stdout(predicate::str::contains("rollback"))
        .stdout(predicate::str::contains("daemon"));
}

#[test]
fn test_config_defaults_and_set() {
    let env = TestEnv::new();

    env.cmd()
        .args(["config", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"channel\": \"stable\""))
        .stdout(predicate::str::contains("\"github_repository\": \"delta-cli/delta\""));

    env.cmd()
        .args(["config", "--set", "channel=beta", "--set", "check_interval=weekly"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Updated 2 setting(s)"));
    assert!(env.config_path().exists());

    env.cmd()
        .args(["config", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"channel\": \"beta\""))
        .stdout(predicate::str::contains("\"check_interval\": \"weekly\""));
}

#[test]
fn test_config_flag_overrides_env() {
    let env = TestEnv::new();
    let alternate = env.path().join("alternate.json");

    env.cmd()
        .arg("--config")
        .arg(&alternate)
        .args(["config", "--set", "auto_install=true"])
        .assert()
        .success();

    assert!(alternate.exists());
    assert!(!env.config_path().exists());
}

#[test]
fn test_config_rejects_unknown_key() {
    let env = TestEnv::new();
    env.cmd()
        .args(["config", "--set", "color=blue"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown configuration key"));
}

#[test]
fn test_config_path() {
    let env = TestEnv::new();
    env.cmd()
        .args(["config", "--path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("update.json"));
}

#[test]
fn test_pending_empty() {
    let env = TestEnv::new();
    env.cmd()
        .arg("pending")
        .assert()
        .success()
        .stdout(predicate::str::contains("No scheduled updates"));
}

#[test]
fn test_schedule_then_cancel() {
    let env = TestEnv::new();

    let output = env
        .cmd()
        .args(["schedule", "v1.2.0", "--at", "+1h"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Scheduled"))
        .get_output()
        .stdout
        .clone();
    assert!(env.data_dir().join("schedule.json").exists());

    let stdout = String::from_utf8(output).unwrap();
    let id = stdout
        .lines()
        .find_map(|line| line.trim().strip_prefix("id: "))
        .expect("task id in output")
        .to_string();
    assert!(id.starts_with("update_v1.2.0_"));

    env.cmd()
        .arg("pending")
        .assert()
        .success()
        .stdout(predicate::str::contains(&id))
        .stdout(predicate::str::contains("pending"));

    env.cmd().args(["cancel", &id]).assert().success();

    env.cmd()
        .arg("pending")
        .assert()
        .success()
        .stdout(predicate::str::contains("No scheduled updates"));

    env.cmd()
        .args(["pending", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cancelled"));
}

#[test]
fn test_schedule_recurring() {
    let env = TestEnv::new();
    env.cmd()
        .args(["schedule", "latest", "--cron", "0 0 * * 0", "--auto-confirm"])
        .assert()
        .success()
        .stdout(predicate::str::contains("repeats: @weekly"));

    env.cmd()
        .arg("pending")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 recurring"));
}

#[test]
fn test_schedule_rejects_unsupported_cron() {
    let env = TestEnv::new();
    env.cmd()
        .args(["schedule", "v1.2.0", "--at", "+1h", "--cron", "*/5 * * * *"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported cron expression"));

    assert!(!env.data_dir().join("schedule.json").exists());
}

#[test]
fn test_schedule_rejects_bad_version_and_time() {
    let env = TestEnv::new();
    env.cmd()
        .args(["schedule", "not-a-version", "--at", "now"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid version"));

    env.cmd()
        .args(["schedule", "v1.2.0", "--at", "whenever"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unrecognized time"));
}

#[test]
fn test_cancel_unknown_task() {
    let env = TestEnv::new();
    env.cmd()
        .args(["cancel", "update_v9.9.9_deadbeef"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Scheduled update not found"));
}

#[test]
fn test_history_and_rollback_without_backups() {
    let env = TestEnv::new();
    env.cmd()
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("No updates recorded"))
        .stdout(predicate::str::contains("No backups"));

    env.cmd()
        .args(["history", "--format", "csv"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("id,timestamp,kind,from_version,to_version,status"));

    env.cmd()
        .args(["history", "--format", "xml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported audit format"));

    env.cmd()
        .args(["rollback", "--yes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No backups available"));
}

#[test]
fn test_skip_persists() {
    let env = TestEnv::new();
    env.cmd().args(["skip", "v2.0.0"]).assert().success();

    env.cmd()
        .args(["config", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"skip_version\": \"v2.0.0\""));
}

#[test]
fn test_postpone_explicit_release() {
    let env = TestEnv::new();
    env.cmd()
        .args(["postpone", "4h", "--release", "v2.0.0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Postponed"));

    env.cmd()
        .args(["config", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"postponed_version\": \"v2.0.0\""));
}

#[test]
fn test_disabled_updates_block_install() {
    let env = TestEnv::new();
    env.cmd().args(["config", "--set", "enabled=false"]).assert().success();

    env.cmd()
        .args(["install", "v1.2.0", "--yes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("disabled"));
}

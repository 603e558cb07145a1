//! CLI integration tests.
//!
//! Uses `assert_cmd` to spawn the `aafs` binary against a database file in
//! a temporary directory and checks exit codes, stdout and stderr.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Env {
    dir: TempDir,
}

impl Env {
    fn new() -> Self {
        Env {
            dir: TempDir::new().expect("tempdir"),
        }
    }

    fn db(&self) -> PathBuf {
        self.dir.path().join("aafs.jsonl")
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// The `aafs` binary pointed at this environment's database.
    fn aafs(&self) -> Command {
        aafs_with_db(&self.db())
    }

    /// Run with `--output json` and parse stdout.
    fn json(&self, args: &[&str]) -> serde_json::Value {
        let out = self
            .aafs()
            .args(["--output", "json"])
            .args(args)
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        serde_json::from_slice(&out).expect("stdout is JSON")
    }
}

fn aafs_with_db(db: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("aafs");
    cmd.arg("--db").arg(db);
    cmd.env_remove("RUST_LOG");
    cmd
}

// ──────────────────────────────────────────────
// 1. Help
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    cargo_bin_cmd!("aafs")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("AAFS coordination core administration"));
}

#[test]
fn task_help_lists_subcommands() {
    cargo_bin_cmd!("aafs")
        .args(["task", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("requeue"));
}

// ──────────────────────────────────────────────
// 2. Task queue
// ──────────────────────────────────────────────

#[test]
fn submitted_task_persists_between_runs() {
    let env = Env::new();
    let submitted = env.json(&[
        "task",
        "submit",
        "--opcode",
        "2",
        "--sched-time",
        "1000",
        "--event-id",
        "us7000abcd",
        "--details",
        r#"{"lag":3600}"#,
    ]);
    assert_eq!(submitted[0]["exec_time"], 1000);
    assert_eq!(submitted[0]["submit_id"], "server1");
    assert!(env.db().exists());

    let listed = env.json(&["task", "list", "--event-id", "us7000abcd"]);
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
    assert_eq!(listed[0]["_id"], submitted[0]["_id"]);
    assert_eq!(listed[0]["details"]["lag"], 3600);
}

#[test]
fn claim_is_exclusive_and_restart_is_detected() {
    let env = Env::new();
    env.json(&["task", "submit", "--opcode", "0", "--sched-time", "100"]);

    env.aafs()
        .args(["task", "claim", "--cutoff", "1000"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no_op(0)"));
    env.aafs()
        .args(["task", "claim", "--cutoff", "1000"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no task ready"));

    let restarted = env.json(&["task", "restarted"]);
    assert_eq!(restarted[0]["exec_time"], 0);

    let requeued = env.json(&["task", "requeue", "--exec-time", "500"]);
    assert_eq!(requeued[0]["exec_time"], 500);
    let again = env.json(&["task", "claim", "--cutoff", "500"]);
    assert_eq!(again[0]["exec_time"], 500);
}

#[test]
fn stage_and_delete_by_id() {
    let env = Env::new();
    let task = env.json(&["task", "submit", "--opcode", "3", "--sched-time", "100"]);
    let id = task[0]["_id"].as_str().expect("id").to_string();

    let staged = env.json(&[
        "task",
        "stage",
        &id,
        "--exec-time",
        "900",
        "--stage",
        "2",
        "--event-id",
        "ci40",
    ]);
    assert_eq!(staged[0]["stage"], 2);
    assert_eq!(staged[0]["event_id"], "ci40");

    env.aafs()
        .args(["task", "delete", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("deleted"));
    env.aafs()
        .args(["task", "delete", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no task with id"));
}

#[test]
fn invalid_submission_exits_1() {
    let env = Env::new();
    env.aafs()
        .args(["task", "submit", "--opcode", "0", "--sched-time", "0"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("error: validation error"));
    assert!(!env.db().exists());
}

#[test]
fn json_errors_are_objects() {
    let env = Env::new();
    let out = env
        .aafs()
        .args(["--output", "json", "task", "delete", "not-an-id"])
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let err: serde_json::Value = serde_json::from_slice(&out).expect("stderr is JSON");
    assert!(err["error"]
        .as_str()
        .is_some_and(|m| m.contains("invalid document id")));
}

// ──────────────────────────────────────────────
// 3. Aliases
// ──────────────────────────────────────────────

#[test]
fn observe_then_resolve() {
    let env = Env::new();
    env.aafs()
        .args(["alias", "observe", "--time", "100", "--group", "us1,ci2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("written"));
    env.aafs()
        .args(["alias", "observe", "--time", "200", "--group", "us1,ci2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("unchanged"));

    env.aafs()
        .args(["alias", "resolve", "ci2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ci2 -> ccid_us1 (primary us1"));

    // Split and check the history keeps both snapshots.
    env.aafs()
        .args([
            "alias", "observe", "--time", "300", "--group", "us1", "--group", "ci2",
        ])
        .assert()
        .success();
    let history = env.json(&["alias", "history", "--comcat-ids", "ci2"]);
    assert_eq!(history.as_array().map(Vec::len), Some(2));
    assert_eq!(history[0]["family_time"], 300);

    let before = env.json(&["alias", "resolve", "ci2", "--before", "250"]);
    assert_eq!(before["timeline_id"], "ccid_us1");
    let now = env.json(&["alias", "resolve", "ci2"]);
    assert_eq!(now["timeline_id"], "ccid_ci2");
}

#[test]
fn observe_keeps_unrelated_groups_apart() {
    let env = Env::new();
    let families = env.json(&[
        "alias", "observe", "--time", "100", "--group", "us1,ci2", "--group", "ak9",
    ]);
    assert_eq!(families.as_array().map(Vec::len), Some(2));
    assert_eq!(families[0]["timeline_ids"][0], "ccid_us1");
    assert_eq!(families[1]["timeline_ids"][0], "ccid_ak9");
    assert_ne!(families[0]["_id"], families[1]["_id"]);
}

#[test]
fn submit_rejects_shared_ids() {
    let env = Env::new();
    env.aafs()
        .args([
            "alias", "submit", "--time", "10", "--timeline", "t1=a,b", "--timeline", "t2=b",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("duplicate comcat id: b"));
}

// ──────────────────────────────────────────────
// 4. Relay items
// ──────────────────────────────────────────────

#[test]
fn relay_put_reports_outcomes() {
    let env = Env::new();
    let put = |time: &str, extra: &[&str]| {
        let mut cmd = env.aafs();
        cmd.args(["relay", "put", "pdl", "us1", "--time", time, "--details", "1"]);
        cmd.args(extra);
        cmd.assert().success()
    };
    put("100", &[]).stdout(predicate::str::contains("pdl_us1 inserted"));
    put("100", &[]).stdout(predicate::str::contains("pdl_us1 identical"));
    put("50", &[]).stdout(predicate::str::contains("pdl_us1 stale"));
    put("50", &["--force"]).stdout(predicate::str::contains("pdl_us1 updated"));

    let item = env.json(&["relay", "get", "pdl_us1"]);
    assert_eq!(item[0]["relay_time"], 101);
}

#[test]
fn relay_uses_configured_stamp() {
    let env = Env::new();
    let config = env.path("aafs.toml");
    fs::write(&config, "[server]\nserver_number = 2\nrelay_stamp = 7\n").expect("write config");

    env.aafs()
        .arg("--config")
        .arg(&config)
        .args(["relay", "put", "prm", "us1", "--time", "5"])
        .assert()
        .success();
    let items = env.json(&["relay", "list", "--prefix", "prm_"]);
    assert_eq!(items[0]["relay_stamp"], 7);
}

#[test]
fn invalid_config_exits_1() {
    let env = Env::new();
    let config = env.path("bad.toml");
    fs::write(&config, "[server]\nserver_number = 3\n").expect("write config");
    env.aafs()
        .arg("--config")
        .arg(&config)
        .args(["task", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("server_number must be 1 or 2"));
}

// ──────────────────────────────────────────────
// 5. Backup and restore
// ──────────────────────────────────────────────

#[test]
fn backup_restores_into_fresh_database() {
    let env = Env::new();
    env.json(&["task", "submit", "--opcode", "1", "--sched-time", "100"]);
    env.aafs()
        .args(["alias", "observe", "--time", "100", "--group", "us1"])
        .assert()
        .success();
    env.aafs()
        .args(["relay", "put", "pdl", "us1", "--time", "100"])
        .assert()
        .success();

    let backup = env.path("backup.jsonl");
    env.aafs()
        .arg("backup")
        .arg(&backup)
        .assert()
        .success()
        .stdout(predicate::str::contains("backed up 3 record(s)"));
    let text = fs::read_to_string(&backup).expect("read backup");
    assert!(text.contains(r#""kind":"task""#));
    assert!(text.contains(r#""kind":"alias_family""#));
    assert!(text.contains(r#""kind":"relay_item""#));

    let other = env.path("other.jsonl");
    aafs_with_db(&other)
        .arg("restore")
        .arg(&backup)
        .assert()
        .success()
        .stdout(predicate::str::contains("restored 3 record(s)"));
    aafs_with_db(&other)
        .args(["alias", "resolve", "us1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ccid_us1"));

    // Restoring the same records again collides on ids.
    aafs_with_db(&other)
        .arg("restore")
        .arg(&backup)
        .assert()
        .failure()
        .stderr(predicate::str::contains("duplicate key"));
}

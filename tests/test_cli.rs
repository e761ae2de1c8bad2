use assert_cmd::prelude::*;
use predicates::prelude::*;

use std::process::Command;

fn platform(name: &str) -> String {
    format!("{}/resources/platforms/{}", env!("CARGO_MANIFEST_DIR"), name)
}

fn dispatchsim() -> Command {
    let mut cmd = Command::cargo_bin("dispatchsim").expect("Calling binary failed");
    // keep the runs independent of the caller's environment
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli() {
    dispatchsim().assert().failure();
}

#[test]
fn test_version() {
    let expected_version = "dispatchsim 0.1.0\n";
    dispatchsim().arg("--version").assert().stdout(expected_version);
}

#[test]
fn missing_lambda_is_a_usage_error() {
    dispatchsim()
        .arg(platform("small.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("USAGE"));
}

#[test]
fn run_prints_summary_line() {
    dispatchsim()
        .arg(platform("small.toml"))
        .args(&["0.5", "sqf", "sjf", "--jobs", "200", "--seed", "cli"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("mean sojourn time: "))
        .stdout(predicate::str::contains("mean queue length: "))
        .stdout(predicate::str::contains("mean system occupancy: "))
        .stdout(predicate::str::ends_with("jobs: 200\n"));
}

#[test]
fn same_seed_same_output() {
    let run = || {
        dispatchsim()
            .arg(platform("small.toml"))
            .args(&["0.7", "two-random", "--jobs", "300", "--seed", "again"])
            .output()
            .expect("run failed")
            .stdout
    };
    assert_eq!(run(), run());
}

#[test]
fn unknown_policy_falls_back_with_warning() {
    dispatchsim()
        .arg(platform("small.toml"))
        .args(&["0.5", "fastest", "--jobs", "50"])
        .assert()
        .success()
        .stdout(predicate::str::contains("jobs: 50"))
        .stderr(predicate::str::contains("unknown dispatch policy"));
}

#[test]
fn json_summary() {
    dispatchsim()
        .arg(platform("small.toml"))
        .args(&["0.5", "rr", "ljf", "--jobs", "40", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""jobs":40"#))
        .stdout(predicate::str::contains(r#""servers":4"#))
        .stdout(predicate::str::contains(r#""per_server":["#));
}

#[test]
fn non_positive_lambda_is_rejected() {
    dispatchsim()
        .arg(platform("small.toml"))
        .args(&["0", "--jobs", "10"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("arrival_rate"));
}

#[test]
fn dump_config_shows_layers() {
    dispatchsim()
        .arg(platform("cluster100.yaml"))
        .args(&["0.25", "two-rr-random", "--dump-config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("servers: 100"))
        .stdout(predicate::str::contains("arrival_rate: 0.25"))
        .stdout(predicate::str::contains("dispatch: two-rr-random"));
}

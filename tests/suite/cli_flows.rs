//! End-to-end runs of the `lantern` binary against the fake tool.

use std::io::{BufRead, BufReader};
use std::process::Stdio;
use std::time::{Duration, Instant};

use crate::common::{Fixture, exit_code, path_str, stdout_json};

#[test]
fn check_clean_file_passes() {
    let fx = Fixture::new();
    let output = fx.run(&["check", "/src/clean.ts"]);
    assert_eq!(exit_code(&output), 0);
    let report = stdout_json(&output);
    assert_eq!(report["status"], "pass");
    assert_eq!(report["findings"].as_array().unwrap().len(), 0);

    let calls = fx.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].ends_with("| <check> </src/clean.ts> <--format> <json>"));
}

#[test]
fn check_findings_exit_one_with_report() {
    let fx = Fixture::new();
    let output = fx.run(&["check", "/src/dirty.ts"]);
    assert_eq!(exit_code(&output), 1);
    let report = stdout_json(&output);
    assert_eq!(report["status"], "fail");
    assert_eq!(report["findings"][0]["rule"], "no-todo");
}

#[test]
fn tool_internal_error_surfaces_stderr() {
    let fx = Fixture::new();
    let output = fx.run(&["check", "/src/broken.ts"]);
    assert_eq!(exit_code(&output), 2);
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("exited with code 2"), "{stderr}");
    assert!(stderr.contains("rule pack missing"), "{stderr}");
}

#[test]
fn malformed_output_is_an_error() {
    let fx = Fixture::new();
    let output = fx.run(&["check", "/src/garbled.ts"]);
    assert_eq!(exit_code(&output), 2);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("malformed JSON"), "{stderr}");
    assert!(stderr.contains("Segmentation fault"), "{stderr}");
}

#[test]
fn hostile_path_is_one_argument() {
    let fx = Fixture::new();
    let hostile = "/src/a b; touch pwned $(id) `id`.ts";
    let output = fx.run(&["check", hostile]);
    assert_eq!(exit_code(&output), 0);
    assert!(!fx.workspace().join("pwned").exists());
    let calls = fx.calls();
    assert!(calls[0].ends_with(&format!("| <check> <{hostile}> <--format> <json>")));
}

#[test]
fn check_stdin_sends_buffer_on_stdin() {
    let fx = Fixture::new();
    let output = fx.run_with_stdin(
        &["check", "--stdin", "--filepath", "/src/new.rs"],
        "// TODO: finish\nfn main() {}\n",
    );
    assert_eq!(exit_code(&output), 1);
    assert_eq!(stdout_json(&output)["findings"][0]["line"], 1);
    assert!(fx.calls()[0].ends_with("| <check> <--stdin> <--format> <json>"));
}

#[test]
fn child_env_is_plain_and_runs_in_workspace() {
    let fx = Fixture::new();
    let output = fx.run(&["state"]);
    assert_eq!(exit_code(&output), 0);
    let workspace = fx.workspace().canonicalize().unwrap();
    let expected = format!("NO_COLOR=1 LC_ALL=C PWD={} |", path_str(&workspace));
    assert!(fx.calls()[0].starts_with(&expected), "{:?}", fx.calls());
}

#[test]
fn state_keeps_unknown_fields() {
    let fx = Fixture::new();
    let state = stdout_json(&fx.run(&["state"]));
    assert_eq!(state["intent"]["text"], "ship the parser");
    assert_eq!(state["branch"], "main");
}

#[test]
fn caps_probes_every_feature() {
    let fx = Fixture::new();
    let output = fx.run(&["caps"]);
    assert_eq!(exit_code(&output), 0);
    let caps = stdout_json(&output);
    assert_eq!(caps["correlator"], true);
    assert_eq!(caps["scope"], true);
    assert_eq!(caps["drift"], true);
    assert_eq!(caps["kernel"], false);
    assert_eq!(caps["preflight"], false);

    let calls = fx.calls();
    assert_eq!(calls.len(), 7);
    assert!(calls.iter().all(|c| c.ends_with("<--help>")));
}

#[test]
fn missing_executable_is_reported() {
    let fx = Fixture::new();
    let output = std::process::Command::new(env!("CARGO_BIN_EXE_lantern"))
        .args(["--executable", "/nonexistent/warden", "--cwd"])
        .arg(fx.workspace())
        .arg("state")
        .env("LANTERN_CONFIG", fx.dir.path().join("absent.toml"))
        .output()
        .unwrap();
    assert_eq!(exit_code(&output), 2);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cannot run /nonexistent/warden"), "{stderr}");
}

#[test]
fn doctor_and_preflight() {
    let fx = Fixture::new();
    let doctor = fx.run(&["doctor"]);
    assert_eq!(exit_code(&doctor), 0);
    assert_eq!(stdout_json(&doctor)["healthy"], true);

    let clear = fx.run(&["preflight"]);
    assert_eq!(exit_code(&clear), 0);

    let blocked = fx.run(&["preflight", "/src/schema.sql"]);
    assert_eq!(exit_code(&blocked), 1);
    assert_eq!(stdout_json(&blocked)["blocked"], true);
}

#[test]
fn intent_set_show_clear() {
    let fx = Fixture::new();
    let set = fx.run(&["intent", "set", "refactor auth"]);
    assert_eq!(exit_code(&set), 0);
    assert_eq!(stdout_json(&set)["text"], "refactor auth");

    let shown = fx.run(&["intent"]);
    assert_eq!(stdout_json(&shown)["text"], "refactor auth");

    let cleared = fx.run(&["intent", "clear"]);
    assert_eq!(stdout_json(&cleared)["cleared"], true);
    let shown = fx.run(&["intent", "show"]);
    assert!(stdout_json(&shown)["text"].is_null());

    assert!(
        fx.calls()
            .iter()
            .any(|c| c.ends_with("| <intent> <set> <refactor auth>"))
    );
}

#[test]
fn watch_reports_state_until_interrupted() {
    let fx = Fixture::new();
    let mut child = fx
        .command(&["watch"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    let stdout = child.stdout.take().unwrap();
    let mut first = String::new();
    for line in BufReader::new(stdout).lines() {
        let line = line.unwrap();
        first.push_str(&line);
        if line == "}" {
            break;
        }
    }
    let initial: serde_json::Value = serde_json::from_str(&first).unwrap();
    assert_eq!(initial["alerted"], false);

    let polled = |fx: &Fixture| {
        fx.calls()
            .iter()
            .any(|c| c.ends_with("| <correlator> <status> <--format> <json>"))
    };
    let deadline = Instant::now() + Duration::from_secs(10);
    while !polled(&fx) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(polled(&fx), "{:?}", fx.calls());

    let status = std::process::Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());
    let output = child.wait_with_output().unwrap();
    assert_eq!(
        output.status.code(),
        Some(0),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
}

//! Shared test utilities and fixtures
//!
//! A fake `warden` shell script stands in for the governed tool. It logs
//! every argument vector to `calls.log` and answers a small, fixed set of
//! subcommands.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

const FAKE_WARDEN: &str = r#"#!/bin/sh
here=$(dirname "$0")
{
    printf 'NO_COLOR=%s LC_ALL=%s PWD=%s |' "$NO_COLOR" "$LC_ALL" "$(pwd)"
    for arg in "$@"; do printf ' <%s>' "$arg"; done
    printf '\n'
} >> "$here/calls.log"

if [ "$2" = "--help" ]; then
    case "$1" in
        correlator|scope|drift)
            echo "usage: warden $1"
            exit 0 ;;
        *)
            echo "unknown command: $1" >&2
            exit 2 ;;
    esac
fi

if [ "$1" = "check" ] && [ "$2" = "--stdin" ]; then
    payload=$(cat)
    case "$payload" in
        *TODO*)
            echo '{"status":"fail","findings":[{"rule":"no-todo","severity":"error","message":"TODO left in code","line":1}]}'
            exit 1 ;;
        *)
            echo '{"status":"pass","findings":[]}'
            exit 0 ;;
    esac
fi

case "$1" in
    check)
        case "$2" in
            *dirty*)
                echo '{"status":"fail","findings":[{"rule":"no-todo","message":"TODO left in code"}]}'
                exit 1 ;;
            *broken*)
                echo 'internal error: rule pack missing' >&2
                exit 2 ;;
            *garbled*)
                echo 'Segmentation fault (core dumped)'
                exit 0 ;;
            *)
                echo '{"status":"pass","findings":[]}' ;;
        esac ;;
    state)
        echo '{"intent":{"text":"ship the parser"},"overrides":[],"branch":"main"}' ;;
    doctor)
        echo '{"healthy":true,"checks":[{"name":"config","status":"pass"}]}' ;;
    preflight)
        if [ "$#" -gt 3 ]; then
            echo '{"status":"fail","blocked":true,"findings":[]}'
            exit 1
        fi
        echo '{"status":"pass","blocked":false,"findings":[]}' ;;
    intent)
        case "$2" in
            show)
                if [ -f "$here/intent.txt" ]; then
                    printf '{"text":"%s"}\n' "$(cat "$here/intent.txt")"
                else
                    echo '{}'
                fi ;;
            set) printf '%s' "$3" > "$here/intent.txt" ;;
            clear) rm -f "$here/intent.txt" ;;
        esac ;;
    correlator)
        echo '{"captured":false}' ;;
    *)
        echo "unknown command: $1" >&2
        exit 2 ;;
esac
"#;

/// A temp directory holding the fake tool and a workspace to run it in.
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let script = dir.path().join("warden");
        std::fs::write(&script, FAKE_WARDEN).expect("write fake tool");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
                .expect("make fake tool executable");
        }
        std::fs::create_dir(dir.path().join("workspace")).expect("create workspace");
        Self { dir }
    }

    pub fn tool(&self) -> PathBuf {
        self.dir.path().join("warden")
    }

    pub fn workspace(&self) -> PathBuf {
        self.dir.path().join("workspace")
    }

    /// Each logged invocation: env prefix, then `<arg>` tokens.
    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_lantern"));
        cmd.arg("--executable")
            .arg(self.tool())
            .arg("--cwd")
            .arg(self.workspace())
            .args(args)
            .env("LANTERN_CONFIG", self.dir.path().join("absent.toml"))
            .env("RUST_LOG", "warn")
            .env_remove("NO_COLOR")
            .env_remove("LC_ALL");
        cmd
    }

    pub fn run(&self, args: &[&str]) -> Output {
        self.command(args)
            .stdin(Stdio::null())
            .output()
            .expect("run lantern")
    }

    pub fn run_with_stdin(&self, args: &[&str], input: &str) -> Output {
        use std::io::Write;
        let mut child = self
            .command(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("spawn lantern");
        child
            .stdin
            .take()
            .expect("stdin piped")
            .write_all(input.as_bytes())
            .expect("write stdin");
        child.wait_with_output().expect("wait for lantern")
    }
}

pub fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({e}):\n{}\nstderr:\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

pub fn exit_code(output: &Output) -> i32 {
    output.status.code().expect("lantern exited normally")
}

pub fn path_str(path: &Path) -> &str {
    path.to_str().expect("utf-8 temp path")
}

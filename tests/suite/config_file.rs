//! Config file handling through the binary.

use crate::common::{Fixture, exit_code, path_str, stdout_json};

#[test]
fn config_file_supplies_executable_and_exit_codes() {
    let fx = Fixture::new();
    let config = fx.dir.path().join("config.toml");
    std::fs::write(
        &config,
        format!(
            "[tool]\nexecutable = \"{}\"\ncwd = \"{}\"\n\n[exit_codes]\ncheck = [0]\n",
            path_str(&fx.tool()),
            path_str(&fx.workspace()),
        ),
    )
    .unwrap();

    let output = std::process::Command::new(env!("CARGO_BIN_EXE_lantern"))
        .args(["--config", path_str(&config), "check", "/src/dirty.ts"])
        .output()
        .unwrap();
    assert_eq!(exit_code(&output), 2);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("exited with code 1"), "{stderr}");

    let output = std::process::Command::new(env!("CARGO_BIN_EXE_lantern"))
        .args(["--config", path_str(&config), "check", "/src/clean.ts"])
        .output()
        .unwrap();
    assert_eq!(exit_code(&output), 0);
    assert_eq!(stdout_json(&output)["status"], "pass");
}

#[test]
fn invalid_config_is_rejected_before_spawning() {
    let fx = Fixture::new();
    let config = fx.dir.path().join("config.toml");
    std::fs::write(&config, "[correlator]\nalert_threshold = 0\n").unwrap();
    let output = fx
        .command(&["--config", path_str(&config), "state"])
        .output()
        .unwrap();
    assert_eq!(exit_code(&output), 2);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("alert_threshold must be at least 1"), "{stderr}");
    assert!(fx.calls().is_empty());
}

#[test]
fn env_var_expansion_in_executable() {
    let fx = Fixture::new();
    let config = fx.dir.path().join("config.toml");
    std::fs::write(
        &config,
        "[tool]\nexecutable = \"${LANTERN_TEST_TOOL_DIR}/warden\"\n",
    )
    .unwrap();
    let output = std::process::Command::new(env!("CARGO_BIN_EXE_lantern"))
        .args(["--config", path_str(&config), "--cwd", path_str(&fx.workspace()), "state"])
        .env("LANTERN_TEST_TOOL_DIR", fx.dir.path())
        .output()
        .unwrap();
    assert_eq!(exit_code(&output), 0, "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(stdout_json(&output)["intent"]["text"], "ship the parser");
}

use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn mirrorflow_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mirrorflow"))
}

fn run_cli(home: &Path, args: &[&str]) -> Output {
    Command::new(mirrorflow_bin())
        .args(args)
        .env("MIRRORFLOW_HOME", home)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to execute mirrorflow CLI")
}

fn parse_json_output(output: &Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let json_start = stdout.find(|c| c == '{' || c == '[').unwrap_or_else(|| {
        panic!(
            "no JSON payload found in output\nstdout:\n{}\nstderr:\n{}",
            stdout,
            String::from_utf8_lossy(&output.stderr)
        )
    });
    let mut deserializer = serde_json::Deserializer::from_str(&stdout[json_start..]);
    Value::deserialize(&mut deserializer).unwrap_or_else(|err| {
        panic!(
            "failed to parse JSON output: {}\nstdout:\n{}\nstderr:\n{}",
            err,
            stdout,
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

fn run_cli_json(home: &Path, args: &[&str]) -> Value {
    let output = run_cli(home, args);
    assert!(
        output.status.success(),
        "command failed: {}\nstdout:\n{}\nstderr:\n{}",
        args.join(" "),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    parse_json_output(&output)
}

#[test]
fn test_config_json_reports_layout() {
    let home = TempDir::new().unwrap();
    let json = run_cli_json(home.path(), &["config", "--json"]);

    assert_eq!(json["config_file_exists"], false);
    assert_eq!(
        json["catalog_dir"],
        home.path().join("catalog").to_string_lossy().to_string()
    );
    assert_eq!(json["settings"]["operations"]["max_concurrent"], 2);
}

#[test]
fn test_channels_fall_back_without_fetched_data() {
    let home = TempDir::new().unwrap();

    let json = run_cli_json(
        home.path(),
        &[
            "catalog", "channels", "cert-manager", "--source", "redhat", "--version", "4.16",
            "--json",
        ],
    );
    assert_eq!(json["origin"], "static_fallback");
    assert_eq!(json["channels"], serde_json::json!(["candidate", "stable"]));

    let json = run_cli_json(
        home.path(),
        &[
            "catalog", "channels", "made-up-operator", "--source", "community", "--version",
            "4.16", "--json",
        ],
    );
    assert_eq!(json["origin"], "default");
    assert_eq!(json["channels"], serde_json::json!(["stable"]));
}

#[test]
fn test_catalog_list_without_fetch() {
    let home = TempDir::new().unwrap();
    let json = run_cli_json(home.path(), &["catalog", "list", "--json"]);

    let catalogs = json["catalogs"].as_array().unwrap();
    assert_eq!(catalogs.len(), 3);
    for catalog in catalogs {
        for version in catalog["versions"].as_array().unwrap() {
            assert_eq!(version["prefetched"], false);
        }
    }
}

#[test]
fn test_unknown_operation_is_json_not_found() {
    let home = TempDir::new().unwrap();
    let output = run_cli(
        home.path(),
        &["op", "show", "7f0c2b1e-4a4e-4a8e-9d55-1f2a3b4c5d6e", "--json"],
    );

    assert!(!output.status.success());
    let json = parse_json_output(&output);
    assert_eq!(json["code"], "NOT_FOUND");
}

#[test]
fn test_empty_operation_list() {
    let home = TempDir::new().unwrap();
    let json = run_cli_json(home.path(), &["op", "list", "--json"]);
    assert_eq!(json, serde_json::json!([]));
}

#[cfg(unix)]
mod unix {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn install_tool(home: &Path, body: &str) {
        let tool = home.join("fake-oc-mirror");
        std::fs::write(&tool, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut perms = std::fs::metadata(&tool).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&tool, perms).unwrap();

        std::fs::write(
            home.join("config.toml"),
            format!("[operations]\nmirror_binary = \"{}\"\n", tool.display()),
        )
        .unwrap();
        std::fs::create_dir_all(home.join("configs")).unwrap();
        std::fs::write(home.join("configs/ocp.yaml"), "kind: ImageSetConfiguration\n").unwrap();
    }

    #[test]
    fn test_start_runs_to_completion() {
        let home = TempDir::new().unwrap();
        install_tool(home.path(), "echo 'mirroring done'\nexit 0");

        let json = run_cli_json(home.path(), &["op", "start", "nightly", "ocp", "--json"]);
        assert_eq!(json["status"], "success");
        assert_eq!(json["exit_code"], 0);

        let id = json["id"].as_str().unwrap().to_string();
        let output = run_cli(home.path(), &["op", "logs", &id]);
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout), "mirroring done\n");

        let listed = run_cli_json(home.path(), &["op", "list", "--status", "success", "--json"]);
        assert_eq!(listed.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_failed_operation_exits_nonzero() {
        let home = TempDir::new().unwrap();
        install_tool(home.path(), "echo 'error: manifest unknown' >&2\nexit 0");

        let output = run_cli(home.path(), &["op", "start", "nightly", "ocp", "--json"]);
        assert!(!output.status.success());
        let json = parse_json_output(&output);
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error_message"], "error: manifest unknown");
    }

    #[test]
    fn test_missing_configuration_is_not_found() {
        let home = TempDir::new().unwrap();
        install_tool(home.path(), "exit 0");

        let output = run_cli(home.path(), &["op", "start", "nightly", "absent", "--json"]);
        assert!(!output.status.success());
        let json = parse_json_output(&output);
        assert_eq!(json["code"], "NOT_FOUND");
        assert!(json["error"].as_str().unwrap().contains("absent"));
    }
}

//! CLI integration tests

use std::process::Command;

fn scalectl(args: &[&str]) -> std::process::Output {
    Command::new("cargo")
        .args(["run", "-q", "-p", "scalectl", "--"])
        .args(args)
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = scalectl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Resource Scaler"), "Should show app name");
    assert!(stdout.contains("ingest"), "Should show ingest command");
    assert!(stdout.contains("alarm"), "Should show alarm command");
    assert!(stdout.contains("aggregate"), "Should show aggregate command");
    assert!(stdout.contains("health"), "Should show health command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = scalectl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("scalectl"), "Should show binary name");
}

/// Test alarm subcommand help
#[test]
fn test_alarm_help() {
    let output = scalectl(&["alarm", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Alarm help should succeed");
    assert!(stdout.contains("--state"), "Should show state option");
    assert!(stdout.contains("--alarm-name"), "Should show alarm-name option");
}

/// Test that an unknown encoding is refused
#[test]
fn test_unknown_encoding_is_rejected() {
    let output = scalectl(&["aggregate", "batch.json", "--encoding", "zstd"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "Unknown encoding should fail");
    assert!(stderr.contains("zstd"), "Should name the bad encoding");
}

/// Test offline aggregation of a captured batch
#[test]
fn test_aggregate_json_output() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("batch.json");
    std::fs::write(
        &path,
        r#"{"messageType":"DATA_MESSAGE","logEvents":[
            {"timestamp":1700000000000,"message":"{\"ClusterName\":\"c\",\"ServiceName\":\"s\",\"CpuUtilized\":10,\"MemoryUtilized\":100}"},
            {"timestamp":1700000000001,"message":"{\"ClusterName\":\"c\",\"ServiceName\":\"s\",\"CpuUtilized\":20,\"MemoryUtilized\":300}"}
        ]}"#,
    )
    .unwrap();

    let output = scalectl(&[
        "--format",
        "json",
        "aggregate",
        path.to_str().unwrap(),
        "--container-name",
        "BackendContainer",
    ]);
    assert!(output.status.success(), "Aggregate should succeed");

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["cpu"]["Value"], 15.0);
    assert_eq!(result["memory"]["Value"], 200.0);
    assert_eq!(result["sample_count"], 2);
}

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Command isolated from any user or project config
fn vertexflow(workdir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("vertexflow").unwrap();
    cmd.current_dir(workdir.path())
        .env("HOME", workdir.path())
        .env_remove("VERTEXFLOW_ISOLATION_LEVEL")
        .env_remove("VERTEXFLOW_MAX_CONCURRENCY")
        .env("RUST_LOG", "warn");
    cmd
}

#[test]
fn test_order_prints_topological_order() {
    let dir = tempfile::tempdir().unwrap();
    vertexflow(&dir)
        .arg("order")
        .arg(fixture("chain.yml"))
        .assert()
        .success()
        .stdout("A\nB\nC\n");
}

#[test]
fn test_order_rejects_cycle() {
    let dir = tempfile::tempdir().unwrap();
    vertexflow(&dir)
        .arg("order")
        .arg(fixture("cycle.yml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Cycle detected"));
}

#[test]
fn test_run_builds_and_saves() {
    let dir = tempfile::tempdir().unwrap();
    vertexflow(&dir)
        .arg("run")
        .arg(fixture("chain.yml"))
        .arg("--save")
        .assert()
        .success()
        .stdout(predicate::str::contains("C\tbuilt"));

    let runs = vertexflow::RunResult::list_runs(&dir.path().join(".vertexflow/runs")).unwrap();
    assert_eq!(runs.len(), 1);
    let latest = vertexflow::RunResult::load_latest(&dir.path().join(".vertexflow/runs")).unwrap();
    assert_eq!(latest.outcomes["C"].results["output"], serde_json::json!("hello"));
}

#[test]
fn test_run_reports_cached_vertices() {
    let dir = tempfile::tempdir().unwrap();
    let flow = dir.path().join("frozen.yml");
    let content = std::fs::read_to_string(fixture("chain.yml"))
        .unwrap()
        .replace("type: Constant", "type: Constant\n    frozen: true");
    std::fs::write(&flow, content).unwrap();

    for expected in ["A\tbuilt\n", "A\tbuilt (cached)\n"] {
        vertexflow(&dir)
            .arg("run")
            .arg(&flow)
            .arg("--cache-dir")
            .arg(dir.path().join("cache"))
            .assert()
            .success()
            .stdout(predicate::str::contains(expected));
    }
}

#[test]
fn test_run_fails_when_no_terminal_builds() {
    let dir = tempfile::tempdir().unwrap();
    vertexflow(&dir)
        .arg("run")
        .arg(fixture("broken.json"))
        .assert()
        .failure()
        .stdout(predicate::str::contains("Sink\tfailed: Blocked by failed dependency Feed"));
}

#[test]
fn test_classify_custom_source() {
    let dir = tempfile::tempdir().unwrap();
    vertexflow(&dir)
        .arg("classify")
        .arg(fixture("json_component.py"))
        .args(["--level", "strict"])
        .assert()
        .success()
        .stdout(predicate::str::contains("custom").and(predicate::str::contains("modules: json")));

    vertexflow(&dir)
        .arg("classify")
        .arg(fixture("shell_component.py"))
        .args(["--level", "strict"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Module 'subprocess' is blocked"));
}

#[test]
fn test_classify_core_source_bypasses_policy() {
    let dir = tempfile::tempdir().unwrap();
    vertexflow(&dir)
        .arg("classify")
        .arg(fixture("shell_component.py"))
        .arg("--index")
        .arg(fixture("component_index.json"))
        .args(["--name", "ShellComponent", "--level", "strict"])
        .assert()
        .success()
        .stdout("core\n");
}

#[test]
fn test_env_isolation_level_is_validated() {
    let dir = tempfile::tempdir().unwrap();
    vertexflow(&dir)
        .env("VERTEXFLOW_ISOLATION_LEVEL", "loose")
        .arg("run")
        .arg(fixture("chain.yml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("VERTEXFLOW_ISOLATION_LEVEL"));
}

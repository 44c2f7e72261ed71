//! Black-box tests for the `cascade` binary.

use assert_cmd::Command;
use cascade_core::NodeId;
use cascade_workflow::{Mapper, NodeDefinition, PortSpec, WorkflowBuilder, WorkflowDefinition};
use predicates::prelude::*;

fn cascade() -> Command {
    Command::cargo_bin("cascade").unwrap()
}

fn key(name: &str) -> cascade_core::StepKey {
    cascade_core::StepKey::new(name).unwrap()
}

fn write_workflow(dir: &std::path::Path, definition: &WorkflowDefinition) -> std::path::PathBuf {
    let path = dir.join("workflow.json");
    std::fs::write(&path, serde_json::to_string_pretty(definition).unwrap()).unwrap();
    path
}

fn echo_workflow() -> WorkflowDefinition {
    let node = NodeDefinition::new(NodeId::v4(), "say", key("command"))
        .with_input(PortSpec::json("program"))
        .with_input(PortSpec::json("args"))
        .with_output(PortSpec::json("stdout"))
        .with_output(PortSpec::json("stderr"))
        .with_output(PortSpec::json("exit_code"))
        .with_default("program", serde_json::json!("echo"))
        .with_default("args", serde_json::json!(["hello"]));
    WorkflowBuilder::new("echo").add_node(node).build().unwrap()
}

#[test]
fn validate_accepts_a_well_formed_workflow() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_workflow(dir.path(), &echo_workflow());

    cascade()
        .arg("validate")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 nodes"));
}

#[test]
fn validate_rejects_zip_length_mismatch() {
    let node = NodeDefinition::new(NodeId::v4(), "add", key("command"))
        .with_input(PortSpec::json("a"))
        .with_input(PortSpec::json("b"))
        .with_output(PortSpec::json("stdout"))
        .with_default("a", serde_json::json!([1, 2, 3]))
        .with_default("b", serde_json::json!([10, 20]))
        .with_mapper(Mapper::zip([Mapper::input("a"), Mapper::input("b")]));
    let workflow = WorkflowBuilder::new("bad-zip").add_node(node).build().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = write_workflow(dir.path(), &workflow);

    cascade()
        .arg("validate")
        .arg(&path)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("mismatched lengths"));
}

#[test]
fn validate_rejects_unreadable_documents() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();

    cascade()
        .arg("validate")
        .arg(&path)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("invalid JSON"));
}

#[test]
fn run_executes_and_then_resumes_from_the_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_workflow(dir.path(), &echo_workflow());

    cascade()
        .arg("run")
        .arg(&path)
        .arg("--root")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("completed 1"));

    // The ledger was written under the root.
    assert!(dir.path().join(".cascade").join("ledger.jsonl").exists());

    // A second run serves the instance from the ledger.
    cascade()
        .arg("run")
        .arg(&path)
        .arg("--root")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("cached 1"));
}

#[test]
fn run_reports_failure_with_nonzero_exit() {
    let node = NodeDefinition::new(NodeId::v4(), "fail", key("command"))
        .with_input(PortSpec::json("program"))
        .with_output(PortSpec::json("stdout"))
        .with_output(PortSpec::json("stderr"))
        .with_output(PortSpec::json("exit_code"))
        .with_default("program", serde_json::json!("false"));
    let workflow = WorkflowBuilder::new("failing").add_node(node).build().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = write_workflow(dir.path(), &workflow);

    cascade()
        .arg("run")
        .arg(&path)
        .arg("--root")
        .arg(dir.path())
        .assert()
        .code(1)
        .stdout(predicate::str::contains("failed 1"));
}

#[test]
fn run_with_pool_backend_matches_serial() {
    let node = NodeDefinition::new(NodeId::v4(), "fan", key("command"))
        .with_input(PortSpec::json("program"))
        .with_input(PortSpec::json("args"))
        .with_output(PortSpec::json("stdout"))
        .with_output(PortSpec::json("stderr"))
        .with_output(PortSpec::json("exit_code"))
        .with_default("program", serde_json::json!("echo"))
        .with_default("args", serde_json::json!([["a"], ["b"], ["c"]]))
        .with_mapper(Mapper::input("args"));
    let workflow = WorkflowBuilder::new("fan").add_node(node).build().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = write_workflow(dir.path(), &workflow);

    cascade()
        .arg("run")
        .arg(&path)
        .arg("--root")
        .arg(dir.path())
        .arg("--backend")
        .arg("pool")
        .arg("--concurrency")
        .arg("3")
        .assert()
        .success()
        .stdout(predicate::str::contains("completed 3"));
}

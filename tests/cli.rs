#![cfg(feature = "cli")]

use assert_cmd::prelude::*;
use predicates::prelude::*;
use serde_json::{Value, json};
use std::fs;
use std::process::Command;
use tempfile::tempdir;
use treesync::{Operation, Snapshot, SyncTree};

fn write_fixture(dir: &std::path::Path) -> (SyncTree, treesync::NodeId) {
    let mut tree = SyncTree::root(json!("Test"));
    let child = tree.add_child(tree.root_id(), json!("first_child")).unwrap();
    fs::write(
        dir.join("snapshot.json"),
        serde_json::to_string(&tree.to_snapshot().unwrap()).unwrap(),
    )
    .unwrap();
    (tree, child)
}

fn write_ops(dir: &std::path::Path, ops: &[Operation]) {
    let lines: Vec<String> = ops.iter().map(|op| op.to_json().unwrap()).collect();
    fs::write(dir.join("ops.jsonl"), lines.join("\n")).unwrap();
}

#[test]
#[allow(deprecated)]
fn test_apply_replays_log_onto_snapshot() {
    let dir = tempdir().unwrap();
    let (tree, child) = write_fixture(dir.path());
    write_ops(
        dir.path(),
        &[
            tree.create_insertion(child, 1, "X").unwrap(),
            tree.create_child_append(child, json!("leaf")).unwrap(),
        ],
    );

    let mut cmd = Command::cargo_bin("treesync").unwrap();
    cmd.args(["apply", "--snapshot", "snapshot.json", "--ops", "ops.jsonl", "--out", "out.json"])
        .current_dir(dir.path());
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("\"applied\":2"));

    let out: Snapshot =
        serde_json::from_str(&fs::read_to_string(dir.path().join("out.json")).unwrap()).unwrap();
    assert_eq!(out.children[0].data, Some(json!("fXirst_child")));
    assert_eq!(out.children[0].children[0].data, Some(json!("leaf")));
}

#[test]
#[allow(deprecated)]
fn test_apply_strict_reports_stale_operations() {
    let dir = tempdir().unwrap();
    let (tree, child) = write_fixture(dir.path());
    let deletion = tree.create_node_deletion(child).unwrap();
    write_ops(dir.path(), &[deletion.clone(), deletion]);

    let mut cmd = Command::cargo_bin("treesync").unwrap();
    cmd.args(["apply", "--snapshot", "snapshot.json", "--ops", "ops.jsonl", "--strict"])
        .current_dir(dir.path());
    cmd.assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("\"stale\":1"));
}

#[test]
#[allow(deprecated)]
fn test_apply_without_snapshot_needs_init() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("ops.jsonl"), "").unwrap();

    let mut cmd = Command::cargo_bin("treesync").unwrap();
    cmd.args(["apply", "--ops", "ops.jsonl"]).current_dir(dir.path());
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("no INIT"));
}

#[test]
#[allow(deprecated)]
fn test_apply_rejects_malformed_lines() {
    let dir = tempdir().unwrap();
    write_fixture(dir.path());
    fs::write(dir.path().join("ops.jsonl"), "{not json}\n").unwrap();

    let mut cmd = Command::cargo_bin("treesync").unwrap();
    cmd.args(["apply", "--snapshot", "snapshot.json", "--ops", "ops.jsonl"])
        .current_dir(dir.path());
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("ops.jsonl:1"));
}

#[test]
#[allow(deprecated)]
fn test_apply_failure_still_reports_progress() {
    let dir = tempdir().unwrap();
    let (tree, child) = write_fixture(dir.path());
    let mut unknown = tree.create_insertion(child, 0, "x").unwrap();
    unknown.op_type = treesync::OperationType::Unknown("CLOSE".to_string());
    write_ops(
        dir.path(),
        &[tree.create_insertion(child, 1, "X").unwrap(), unknown],
    );

    let mut cmd = Command::cargo_bin("treesync").unwrap();
    cmd.args(["apply", "--snapshot", "snapshot.json", "--ops", "ops.jsonl"])
        .current_dir(dir.path());
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("\"applied\":1"))
        .stderr(predicate::str::contains("CLOSE"));
}

#[test]
#[allow(deprecated)]
fn test_inspect_lists_paths() {
    let dir = tempdir().unwrap();
    let (_, child) = write_fixture(dir.path());

    let mut cmd = Command::cargo_bin("treesync").unwrap();
    cmd.args(["inspect", "--snapshot", "snapshot.json", "--json"])
        .current_dir(dir.path());
    let output = cmd.assert().success().get_output().stdout.clone();

    let listings: Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(listings[1]["path"], json!(r#"["children",0]"#));
    assert_eq!(listings[1]["node_id"], json!(child.to_string()));
}

#[test]
#[allow(deprecated)]
fn test_save_and_load_store() {
    let dir = tempdir().unwrap();
    let (tree, _) = write_fixture(dir.path());

    let mut cmd = Command::cargo_bin("treesync").unwrap();
    cmd.args(["save", "--snapshot", "snapshot.json", "--store", "store"])
        .current_dir(dir.path());
    cmd.assert().success().code(0);
    assert!(dir.path().join("store").join("superblock_a").exists());
    assert!(dir.path().join("store").join("segment.1").exists());

    let mut cmd = Command::cargo_bin("treesync").unwrap();
    cmd.args(["load", "--store", "store"]).current_dir(dir.path());
    let output = cmd.assert().success().get_output().stdout.clone();
    let loaded: Snapshot = serde_json::from_slice(&output).unwrap();
    assert_eq!(loaded, tree.to_snapshot().unwrap());
}

//! Integration tests for the CLI binary.
//!
//! Runs the `akf` binary against key sets and chains written to a temp
//! directory and checks what it prints.
//!
//! This test is registered as a [[test]] in the agentic-keyfamily-cli crate
//! so that CARGO_BIN_EXE_akf is available.

use std::path::Path;
use std::process::Command;

use agentic_keyfamily::{GenericKey, KeyRole, Kid, LinkRecord, NaclKey, SigId};
use ed25519_dalek::SigningKey;
use x25519_dalek::{PublicKey, StaticSecret};

/// Get a Command pointing to the `akf` binary.
fn akf_binary() -> Command {
    Command::new(env!("CARGO_BIN_EXE_akf"))
}

fn link(seqno: u64, signer: &Kid) -> LinkRecord {
    LinkRecord {
        seqno,
        sig_id: SigId::new(format!("{seqno:02x}aa")),
        kid: signer.clone(),
        fingerprint: None,
        delegated_kid: None,
        parent_kid: None,
        role: KeyRole::None,
        ctime: 1_700_000_000,
        etime: 0,
        revoke_sigs: Vec::new(),
        revoke_kids: Vec::new(),
        device: None,
        self_signed: false,
    }
}

/// Write a two-key family (eldest plus encryption subkey) into `dir`.
fn write_family(dir: &Path) -> (Kid, Kid) {
    let eldest = NaclKey::from_ed25519(SigningKey::from_bytes(&[1; 32]).verifying_key());
    let enc = NaclKey::from_x25519(PublicKey::from(&StaticSecret::from([2; 32])));

    let keys = serde_json::json!({
        "all_bundles": [eldest.kid().to_string(), enc.kid().to_string()],
    });
    std::fs::write(dir.join("keys.json"), keys.to_string()).unwrap();

    let mut first = link(1, eldest.kid());
    first.self_signed = true;
    let mut sub = link(2, eldest.kid());
    sub.delegated_kid = Some(enc.kid().clone());
    sub.parent_kid = Some(eldest.kid().clone());
    sub.role = KeyRole::Subkey;
    std::fs::write(
        dir.join("chain.json"),
        serde_json::to_string(&vec![first, sub]).unwrap(),
    )
    .unwrap();

    (eldest.kid().clone(), enc.kid().clone())
}

#[test]
fn cli_help_lists_subcommands() {
    let output = akf_binary()
        .arg("--help")
        .output()
        .expect("failed to execute akf --help");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    for cmd in ["inspect", "store", "devices", "bundle"] {
        assert!(stdout.contains(cmd), "missing {cmd} in help: {stdout}");
    }
    assert!(stdout.contains("--username"), "help: {stdout}");
}

#[test]
fn cli_version_reports_package_version() {
    let output = akf_binary().arg("--version").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("akf {}", env!("CARGO_PKG_VERSION")),
        "version output: {stdout}"
    );
}

#[test]
fn cli_inspect_requires_chain_input() {
    let dir = tempfile::tempdir().unwrap();
    write_family(dir.path());

    let output = akf_binary()
        .args(["--username", "alice", "inspect", "--keys"])
        .arg(dir.path().join("keys.json"))
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--chain"), "stderr: {stderr}");
}

#[test]
fn cli_bundle_decodes_signing_key() {
    let key = NaclKey::from_ed25519(SigningKey::from_bytes(&[5; 32]).verifying_key());
    let output = akf_binary()
        .args(["bundle", key.kid().as_str()])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(key.kid().as_str()), "stdout: {stdout}");
    assert!(stdout.contains("Ed25519"), "stdout: {stdout}");
    assert!(stdout.contains("Signs:     true"), "stdout: {stdout}");
}

#[test]
fn cli_inspect_json_reports_roles() {
    let dir = tempfile::tempdir().unwrap();
    let (eldest, enc) = write_family(dir.path());

    let output = akf_binary()
        .args(["--username", "alice", "inspect", "--json", "--at", "1700000100"])
        .arg("--keys")
        .arg(dir.path().join("keys.json"))
        .arg("--chain")
        .arg(dir.path().join("chain.json"))
        .output()
        .expect("failed to execute akf inspect");

    assert!(
        output.status.success(),
        "akf inspect should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["at"], 1_700_000_100);
    let keys = report["keys"].as_array().unwrap();
    assert_eq!(keys.len(), 2);
    let role_of = |kid: &Kid| {
        keys.iter()
            .find(|k| k["kid"] == kid.as_str())
            .map(|k| k["role"].clone())
            .unwrap()
    };
    assert_eq!(role_of(&eldest), "sibkey");
    assert_eq!(role_of(&enc), "subkey");
}

#[test]
fn cli_inspect_before_chain_start_is_inactive() {
    let dir = tempfile::tempdir().unwrap();
    let (eldest, _) = write_family(dir.path());

    let output = akf_binary()
        .args(["--username", "alice", "inspect", "--json"])
        .args(["--at", "2020-01-01T00:00:00Z"])
        .arg("--keys")
        .arg(dir.path().join("keys.json"))
        .arg("--chain")
        .arg(dir.path().join("chain.json"))
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let eldest_row = report["keys"]
        .as_array()
        .unwrap()
        .iter()
        .find(|k| k["kid"] == eldest.as_str())
        .cloned()
        .unwrap();
    assert_eq!(eldest_row["role"], "none");
    assert_eq!(eldest_row["eldest"], true);
}

#[test]
fn cli_rejects_malformed_bundle() {
    let output = akf_binary().args(["bundle", "0120zz"]).output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("bundle"), "stderr: {stderr}");
}

#[test]
fn cli_requires_username_for_replay() {
    let dir = tempfile::tempdir().unwrap();
    write_family(dir.path());

    let output = akf_binary()
        .arg("inspect")
        .arg("--keys")
        .arg(dir.path().join("keys.json"))
        .arg("--chain")
        .arg(dir.path().join("chain.json"))
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn cli_store_writes_cache_file() {
    let dir = tempfile::tempdir().unwrap();
    write_family(dir.path());
    let out = dir.path().join("store.json");

    let output = akf_binary()
        .args(["--username", "alice", "store"])
        .arg("--keys")
        .arg(dir.path().join("keys.json"))
        .arg("--chain")
        .arg(dir.path().join("chain.json"))
        .arg("--out")
        .arg(&out)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let json = std::fs::read_to_string(&out).unwrap();
    let store = agentic_keyfamily::KeyStatusStore::from_json(&json).unwrap();
    assert_eq!(store.len(), 2);
}

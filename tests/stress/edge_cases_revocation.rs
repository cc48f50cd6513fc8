//! Edge cases around revocation, resurrection, and device rebinding.

use agentic_keyfamily::status::StatusEvent;
use agentic_keyfamily::{
    Delegation, Device, DeviceId, DeviceKind, DualTime, KeyFamilyError, KeyRef, KeyStatusStore,
    Kid, Liveness, SigId,
};

fn kid(s: &str) -> Kid {
    Kid::new(s)
}

fn delegation(k: &str, sig: &str, ctime: i64, etime: i64) -> Delegation {
    Delegation {
        kid: kid(k),
        fingerprint: None,
        sig_id: SigId::new(sig),
        signing_kid: kid("e0"),
        parent: None,
        sibkey: true,
        ctime,
        etime,
        at: DualTime::new(ctime, 2),
    }
}

fn store() -> KeyStatusStore {
    let mut store = KeyStatusStore::new();
    store.install_eldest(&KeyRef::from(kid("e0")), 0, 0).unwrap();
    store
}

#[test]
fn revoked_key_is_revoked_at_every_time() {
    let mut store = store();
    store.delegate(delegation("a1", "51", 100, 0));
    assert!(store.revoke_by_signature(&SigId::new("51"), DualTime::new(300, 3)).unwrap());

    let status = store.get_by_kid(&kid("a1")).unwrap();
    for t in [0, 99, 100, 150, 300, i64::MAX] {
        assert!(matches!(
            status.check_active_at("a1", t),
            Err(KeyFamilyError::Revoked(_))
        ));
    }
}

#[test]
fn revoke_by_kid_is_idempotent() {
    let mut once = store();
    once.delegate(delegation("a1", "51", 100, 0));
    let mut twice = once.snapshot();

    assert!(once.revoke_by_kid(&kid("a1"), DualTime::new(200, 3)));
    assert!(twice.revoke_by_kid(&kid("a1"), DualTime::new(200, 3)));
    assert!(!twice.revoke_by_kid(&kid("a1"), DualTime::new(250, 4)));

    assert_eq!(once.get_by_kid(&kid("a1")), twice.get_by_kid(&kid("a1")));
}

#[test]
fn revoking_unknown_things_is_harmless() {
    let mut store = store();
    store.mark_clean();
    assert!(!store.revoke_by_kid(&kid("ff"), DualTime::new(1, 1)));
    assert!(!store
        .revoke_by_signature(&SigId::new("beef"), DualTime::new(1, 1))
        .unwrap());
    assert!(!store.is_dirty());
}

#[test]
fn tampered_signature_index_is_invalid_revocation() {
    let mut store = store();
    store.delegate(delegation("a1", "51", 100, 0));
    store.delegate(delegation("b2", "52", 100, 0));

    // Point sig 52 at a1's record, whose delegations never included it.
    let mut doc: serde_json::Value = serde_json::from_str(&store.to_json().unwrap()).unwrap();
    let a1_slot = doc["sigs"]["51"].clone();
    doc["sigs"]["52"] = a1_slot;
    let mut tampered = KeyStatusStore::from_json(&doc.to_string()).unwrap();

    let err = tampered
        .revoke_by_signature(&SigId::new("52"), DualTime::new(200, 3))
        .unwrap_err();
    assert!(matches!(err, KeyFamilyError::InvalidRevocation(_)));
    assert_eq!(
        tampered.get_by_kid(&kid("a1")).unwrap().liveness,
        Liveness::Uncancelled
    );
}

#[test]
fn dangling_index_is_rejected_on_load() {
    let mut store = store();
    store.delegate(delegation("a1", "51", 100, 0));
    let mut doc: serde_json::Value = serde_json::from_str(&store.to_json().unwrap()).unwrap();
    doc["sigs"]["51"] = serde_json::json!(99);
    assert!(matches!(
        KeyStatusStore::from_json(&doc.to_string()),
        Err(KeyFamilyError::Serialization(_))
    ));
}

#[test]
fn redelegation_resurrects_and_is_recorded() {
    let mut store = store();
    store.delegate(delegation("a1", "51", 100, 200));
    store.revoke_by_signature(&SigId::new("51"), DualTime::new(150, 3)).unwrap();
    store.delegate(delegation("a1", "53", 400, 0));

    let status = store.get_by_kid(&kid("a1")).unwrap();
    assert_eq!(status.liveness, Liveness::Uncancelled);
    assert!(status.revoked_at.is_none());
    assert_eq!((status.ctime, status.etime), (400, 0));
    assert_eq!(status.resurrections(), 1);
    assert!(status
        .history
        .iter()
        .any(|e| matches!(e, StatusEvent::Revoked { sig_id: Some(s), .. } if s.as_str() == "51")));

    // Both delegating signatures stay on record; either can revoke again.
    assert_eq!(status.delegations.len(), 2);
    assert!(store.revoke_by_signature(&SigId::new("51"), DualTime::new(500, 5)).unwrap());
}

#[test]
fn rebinding_device_moves_reverse_mapping() {
    let mut store = store();
    let did = DeviceId::new("d1");
    store.bind_device(Device::new(did.clone()).with_kid(kid("a1")));
    store.bind_device(Device::new(did.clone()).with_kid(kid("b2")));

    assert!(store.device_id_for_kid(&kid("a1")).is_none());
    assert_eq!(store.device_id_for_kid(&kid("b2")), Some(&did));
}

#[test]
fn last_web_device_wins() {
    let mut store = store();
    store.bind_device(Device::new(DeviceId::new("w1")).with_kind(DeviceKind::Web));
    store.bind_device(Device::new(DeviceId::new("w2")).with_kind(DeviceKind::Web));
    store.bind_device(Device::new(DeviceId::new("m1")).with_kind(DeviceKind::Mobile));
    assert_eq!(store.web_device_id(), Some(&DeviceId::new("w2")));
}

//! Concurrency test: readers query snapshots while a writer keeps replaying.
//!
//! The store has a single writer. Readers work on independent snapshots,
//! so what they see never changes under them.

use std::sync::Arc;
use std::thread;

use agentic_keyfamily::{
    Clock, Config, Context, Delegation, DualTime, GenericKey, KeyRef, KeyRegistry, KeyRole,
    KeyStatusStore, Kid, NaclKey, SigId, TrustedKeyView,
};
use ed25519_dalek::SigningKey;

fn key(i: u64) -> Arc<dyn GenericKey> {
    let mut seed = [3u8; 32];
    seed[..8].copy_from_slice(&i.to_le_bytes());
    Arc::new(NaclKey::from_ed25519(
        SigningKey::from_bytes(&seed).verifying_key(),
    ))
}

fn delegation(kid: &Kid, by: &Kid, seqno: u64) -> Delegation {
    Delegation {
        kid: kid.clone(),
        fingerprint: None,
        sig_id: SigId::new(format!("{seqno:04x}")),
        signing_kid: by.clone(),
        parent: None,
        sibkey: true,
        ctime: 100,
        etime: 0,
        at: DualTime::new(100 + seqno as i64, seqno),
    }
}

fn family(n: u64) -> (Vec<Arc<dyn GenericKey>>, TrustedKeyView) {
    let keys: Vec<_> = (0..n).map(key).collect();
    let mut registry = KeyRegistry::new();
    for k in &keys {
        registry.add_local(k.clone());
    }
    let ctx = Context::new(Config::new("reader").with_clock(Clock::Fixed(10_000)));
    let mut view = TrustedKeyView::new(ctx, registry, KeyStatusStore::new());
    view.install_local_eldest(&keys[0].key_ref()).unwrap();
    (keys, view)
}

#[test]
fn stress_50_concurrent_readers() {
    let (keys, mut view) = family(64);
    for (i, k) in keys.iter().enumerate().skip(1).take(31) {
        view.delegate(delegation(k.kid(), keys[0].kid(), i as u64));
    }

    let shared = Arc::new(view.snapshot());
    let mut handles = Vec::new();
    for _ in 0..50 {
        let view = Arc::clone(&shared);
        let keys = keys.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..20 {
                assert_eq!(view.all_active_sibkeys().len(), 32);
                for k in &keys[..32] {
                    assert_eq!(view.role(k.kid()), KeyRole::Sibkey);
                }
                for k in &keys[32..] {
                    assert!(view.status_active_now(&KeyRef::from(k.kid())).is_err());
                }
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn stress_snapshot_isolated_from_writer() {
    let (keys, mut view) = family(64);
    let before = view.snapshot();

    thread::scope(|s| {
        let reader = s.spawn(|| {
            for _ in 0..200 {
                assert_eq!(before.all_active_sibkeys().len(), 1);
                assert_eq!(before.store().len(), 1);
            }
        });

        for (i, k) in keys.iter().enumerate().skip(1) {
            view.delegate(delegation(k.kid(), keys[0].kid(), i as u64));
        }
        for k in &keys[1..32] {
            view.revoke_by_kid(k.kid(), DualTime::new(500, 100));
        }

        reader.join().unwrap();
    });

    assert_eq!(before.all_active_sibkeys().len(), 1);
    assert_eq!(view.all_active_sibkeys().len(), 33);
}

//! Stress test: replay a long chain of sibkey rotations.
//!
//! Each link delegates a fresh sibkey signed by the previous one and
//! revokes the one before that, so at the end exactly two sibkeys are live.

use std::sync::Arc;

use agentic_keyfamily::{
    replay, Clock, Config, Context, GenericKey, KeyRegistry, KeyRole, KeyStatusStore, Kid,
    LinkRecord, NaclKey, SigId, TrustedKeyView,
};
use ed25519_dalek::SigningKey;

fn key(i: u64) -> Arc<dyn GenericKey> {
    let mut seed = [7u8; 32];
    seed[..8].copy_from_slice(&i.to_le_bytes());
    Arc::new(NaclKey::from_ed25519(
        SigningKey::from_bytes(&seed).verifying_key(),
    ))
}

fn sig(seqno: u64) -> SigId {
    SigId::new(format!("{seqno:08x}0f"))
}

fn base_link(seqno: u64, signer: &Kid) -> LinkRecord {
    LinkRecord {
        seqno,
        sig_id: sig(seqno),
        kid: signer.clone(),
        fingerprint: None,
        delegated_kid: None,
        parent_kid: None,
        role: KeyRole::None,
        ctime: 1_000 + seqno as i64,
        etime: 0,
        revoke_sigs: Vec::new(),
        revoke_kids: Vec::new(),
        device: None,
        self_signed: false,
    }
}

/// Key `i` is delegated by link `i + 1`, signed by key `i - 1`.
fn rotation_chain(n: u64) -> (Vec<Arc<dyn GenericKey>>, Vec<LinkRecord>) {
    let keys: Vec<_> = (0..=n).map(key).collect();
    let mut links = Vec::with_capacity(n as usize + 1);

    let mut first = base_link(1, keys[0].kid());
    first.self_signed = true;
    links.push(first);

    for i in 1..=n {
        let seqno = i + 1;
        let mut l = base_link(seqno, keys[i as usize - 1].kid());
        l.delegated_kid = Some(keys[i as usize].kid().clone());
        l.role = KeyRole::Sibkey;
        if i == 2 {
            // The eldest key has no delegating signature.
            l.revoke_kids = vec![keys[0].kid().clone()];
        } else if i > 2 {
            // Key i - 2 was delegated by link i - 1.
            l.revoke_sigs = vec![sig(i - 1)];
        }
        links.push(l);
    }
    (keys, links)
}

fn view(keys: &[Arc<dyn GenericKey>]) -> TrustedKeyView {
    let mut registry = KeyRegistry::new();
    for k in keys {
        registry.add_local(k.clone());
    }
    let ctx = Context::new(Config::new("rotator").with_clock(Clock::Fixed(1_000_000)));
    TrustedKeyView::new(ctx, registry, KeyStatusStore::new())
}

#[test]
fn stress_rotation_chain_500() {
    let n = 500;
    let (keys, links) = rotation_chain(n);
    let mut view = view(&keys);

    let replayer = replay(&mut view, &links).expect("rotation chain should replay");
    assert_eq!(replayer.applied(), n as usize + 1);

    let live = view.all_active_sibkeys();
    assert_eq!(live.len(), 2, "only the last two keys stay live");
    assert_eq!(view.role(keys[n as usize].kid()), KeyRole::Sibkey);
    assert_eq!(view.role(keys[n as usize - 1].kid()), KeyRole::Sibkey);
    assert_eq!(view.role(keys[n as usize - 2].kid()), KeyRole::None);
    assert_eq!(view.store().len(), n as usize + 1);
}

#[test]
fn stress_rotation_chain_keys_valid_at_their_own_time() {
    let (keys, links) = rotation_chain(100);
    let mut view = view(&keys);
    replay(&mut view, &links).unwrap();

    // Time travel doesn't undo revocation, only expiry.
    for k in &keys[..99] {
        assert_eq!(view.role_at(k.kid(), 1_050), KeyRole::None);
    }
}

#[test]
fn stress_replay_is_deterministic() {
    let (keys, links) = rotation_chain(200);

    let mut a = view(&keys);
    let mut b = view(&keys);
    replay(&mut a, &links).unwrap();
    replay(&mut b, &links).unwrap();

    for k in &keys {
        assert_eq!(
            a.store().get_by_kid(k.kid()),
            b.store().get_by_kid(k.kid()),
            "replays of the same chain must agree on {}",
            k.kid()
        );
    }
}

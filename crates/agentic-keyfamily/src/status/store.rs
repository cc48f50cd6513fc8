//! The key status store — replayed chain state for one identity.
//!
//! Status records live once in an arena (`records`). The alias index maps
//! both a key's kid and its fingerprint to the same slot, so a lookup by
//! either form lands on the identical record. The signature index maps
//! each delegating signature to the slot it delegated, for revocation by
//! signature.
//!
//! The store has a single writer. Readers that may overlap a replay take
//! a [`KeyStatusStore::snapshot`] first.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{KeyFamilyError, Result};
use crate::keys::{DeviceId, Fingerprint, KeyRef, Kid, LookupKey, SigId};
use crate::time::DualTime;

use super::device::Device;
use super::{KeyStatus, Liveness, StatusEvent};

/// Everything one delegation event says about the delegated key.
#[derive(Debug, Clone)]
pub struct Delegation {
    pub kid: Kid,
    pub fingerprint: Option<Fingerprint>,
    pub sig_id: SigId,
    pub signing_kid: Kid,
    /// Set for subkey delegations.
    pub parent: Option<Kid>,
    pub sibkey: bool,
    pub ctime: i64,
    pub etime: i64,
    pub at: DualTime,
}

/// Computed key state, keyed by kid/fingerprint, signature, and device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyStatusStore {
    /// Set on every mutation; the cache layer clears it after a rewrite.
    #[serde(skip)]
    dirty: bool,
    records: Vec<KeyStatus>,
    index: HashMap<LookupKey, usize>,
    sigs: HashMap<SigId, usize>,
    devices: HashMap<DeviceId, Device>,
    kid_to_device: HashMap<Kid, DeviceId>,
    /// The last-bound web device; last write wins.
    web_device_id: Option<DeviceId>,
}

impl KeyStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Dirty tracking ────────────────────────────────────────────────────────

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    // ── Lookups ───────────────────────────────────────────────────────────────

    fn slot_of(&self, key_ref: &KeyRef) -> Option<usize> {
        key_ref
            .lookup_keys()
            .iter()
            .find_map(|k| self.index.get(k).copied())
    }

    fn slot_of_kid(&self, kid: &Kid) -> Option<usize> {
        self.index.get(&LookupKey::Kid(kid.clone())).copied()
    }

    pub fn get(&self, key_ref: &KeyRef) -> Option<&KeyStatus> {
        self.slot_of(key_ref).and_then(|s| self.records.get(s))
    }

    pub fn get_by_kid(&self, kid: &Kid) -> Option<&KeyStatus> {
        self.slot_of_kid(kid).and_then(|s| self.records.get(s))
    }

    pub fn get_by_sig(&self, sig_id: &SigId) -> Option<&KeyStatus> {
        self.sigs.get(sig_id).and_then(|&s| self.records.get(s))
    }

    /// Do `a` and `b` resolve to the very same record?
    pub fn same_record(&self, a: &KeyRef, b: &KeyRef) -> bool {
        matches!((self.slot_of(a), self.slot_of(b)), (Some(x), Some(y)) if x == y)
    }

    /// All status records, one per key regardless of aliasing.
    pub fn statuses(&self) -> impl Iterator<Item = &KeyStatus> {
        self.records.iter()
    }

    pub fn eldest(&self) -> Option<&KeyStatus> {
        self.records.iter().find(|r| r.eldest)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    // ── Eldest ─────────────────────────────────────────────────────────────────

    /// Install the eldest key of the lineage with window `[ctime, etime]`.
    ///
    /// Reinstalling the same key updates its role and window in place;
    /// liveness, delegations, and history survive, so a revoked eldest stays
    /// revoked. A different key while an eldest already exists is an
    /// [`KeyFamilyError::EldestConflict`].
    pub fn install_eldest(&mut self, key_ref: &KeyRef, ctime: i64, etime: i64) -> Result<()> {
        log::debug!("| KeyStatusStore::install_eldest {key_ref} [{ctime}, {etime}]");

        let own_slot = self.slot_of(key_ref);
        if let Some((slot, existing)) = self
            .records
            .iter()
            .enumerate()
            .find(|(_, r)| r.eldest)
        {
            if Some(slot) != own_slot {
                return Err(KeyFamilyError::EldestConflict {
                    existing: existing
                        .kid
                        .as_ref()
                        .map(|k| k.to_string())
                        .unwrap_or_else(|| "<fingerprint-only>".into()),
                    requested: key_ref.to_string(),
                });
            }
        }

        let slot = match own_slot {
            Some(slot) => {
                let status = &mut self.records[slot];
                status.eldest = true;
                status.sibkey = true;
                status.ctime = ctime;
                status.etime = etime;
                if status.kid.is_none() {
                    status.kid = key_ref.kid().cloned();
                }
                slot
            }
            None => {
                self.records
                    .push(KeyStatus::new(key_ref.kid().cloned(), true, true, ctime, etime));
                self.records.len() - 1
            }
        };
        for key in key_ref.lookup_keys() {
            self.index.insert(key, slot);
        }
        self.detach_parent(slot);
        self.records[slot].history.push(StatusEvent::Eldest);
        self.dirty = true;
        Ok(())
    }

    // ── Delegation ────────────────────────────────────────────────────────────

    /// Record a sibkey or subkey delegation.
    ///
    /// A first delegation creates the status. A repeat delegation of a known
    /// key resets it to uncancelled and overwrites its window, even if it
    /// had been revoked; the resurrection is kept in the history.
    pub fn delegate(&mut self, d: Delegation) {
        log::debug!(
            "| KeyStatusStore::delegate {} by {} at sig {}",
            d.kid,
            d.signing_kid,
            d.sig_id
        );

        let key_ref = KeyRef::new(d.kid.clone(), d.fingerprint.clone());
        let mut resurrected = false;

        let slot = match self.slot_of(&key_ref) {
            None => {
                let mut status = KeyStatus::new(Some(d.kid.clone()), false, d.sibkey, d.ctime, d.etime);
                status.delegated_at = Some(d.at);
                self.records.push(status);
                self.records.len() - 1
            }
            Some(slot) => {
                let status = &mut self.records[slot];
                if status.is_revoked() {
                    log::debug!("| re-delegation resurrects revoked key {}", d.kid);
                    resurrected = true;
                    status.revoked_at = None;
                }
                status.liveness = Liveness::Uncancelled;
                status.ctime = d.ctime;
                status.etime = d.etime;
                if status.kid.is_none() {
                    status.kid = Some(d.kid.clone());
                }
                slot
            }
        };
        for key in key_ref.lookup_keys() {
            self.index.insert(key, slot);
        }

        let status = &mut self.records[slot];
        status.delegations.insert(d.sig_id.clone(), d.signing_kid.clone());
        status.sibkey = d.sibkey;
        status.history.push(StatusEvent::Delegated {
            sig_id: d.sig_id.clone(),
            by: d.signing_kid.clone(),
            at: d.at,
            resurrected,
        });
        self.sigs.insert(d.sig_id, slot);

        match d.parent {
            Some(parent) if !d.sibkey => self.link_parent(slot, &d.kid, parent),
            _ => self.detach_parent(slot),
        }

        self.dirty = true;
    }

    /// Point the subkey at `slot` to `parent`, and `parent` back at it.
    fn link_parent(&mut self, slot: usize, kid: &Kid, parent: Kid) {
        let previous = self.records[slot].parent.replace(parent.clone());

        // Re-parenting: the old parent must stop claiming this subkey.
        if let Some(old) = previous.filter(|old| *old != parent) {
            self.release_child(&old, kid);
        }

        if let Some(parent_slot) = self.slot_of_kid(&parent) {
            self.records[parent_slot].subkey = Some(kid.clone());
        }
    }

    /// Drop the record at `slot`'s parent link, both ways. Sibkeys have no
    /// parent.
    fn detach_parent(&mut self, slot: usize) {
        let Some(old) = self.records[slot].parent.take() else {
            return;
        };
        if let Some(kid) = self.records[slot].kid.clone() {
            self.release_child(&old, &kid);
        }
    }

    /// Clear `parent`'s subkey pointer if it still names `child`.
    fn release_child(&mut self, parent: &Kid, child: &Kid) {
        if let Some(parent_slot) = self.slot_of_kid(parent) {
            let record = &mut self.records[parent_slot];
            if record.subkey.as_ref() == Some(child) {
                record.subkey = None;
            }
        }
    }

    // ── Revocation ────────────────────────────────────────────────────────────

    /// Revoke whatever key signature `sig_id` delegated.
    ///
    /// Returns `Ok(false)` when the signature delegated no key (it may have
    /// been a non-key link) or the key is already revoked. Fails with
    /// [`KeyFamilyError::InvalidRevocation`] when the signature index points
    /// at a record whose own delegations don't include `sig_id`.
    pub fn revoke_by_signature(&mut self, sig_id: &SigId, at: DualTime) -> Result<bool> {
        let Some(&slot) = self.sigs.get(sig_id) else {
            log::debug!("| KeyStatusStore::revoke_by_signature {sig_id}: no delegated key");
            return Ok(false);
        };
        let status = self.records.get_mut(slot).ok_or_else(|| {
            KeyFamilyError::InvalidRevocation(format!("signature {sig_id} indexes a missing key"))
        })?;
        if !status.delegations.contains_key(sig_id) {
            return Err(KeyFamilyError::InvalidRevocation(format!(
                "can't find sig {sig_id} in delegation list"
            )));
        }
        if status.is_revoked() {
            return Ok(false);
        }

        log::debug!("| KeyStatusStore::revoke_by_signature {sig_id}");
        status.liveness = Liveness::Revoked;
        status.revoked_at = Some(at);
        status.history.push(StatusEvent::Revoked {
            at,
            sig_id: Some(sig_id.clone()),
        });
        self.dirty = true;
        Ok(true)
    }

    /// Revoke `kid` directly. Unknown or already-revoked keys are a no-op.
    pub fn revoke_by_kid(&mut self, kid: &Kid, at: DualTime) -> bool {
        let Some(slot) = self.slot_of_kid(kid) else {
            log::debug!("| KeyStatusStore::revoke_by_kid {kid}: never delegated");
            return false;
        };
        let status = &mut self.records[slot];
        if status.is_revoked() {
            return false;
        }

        log::debug!("| KeyStatusStore::revoke_by_kid {kid}");
        status.liveness = Liveness::Revoked;
        status.revoked_at = Some(at);
        status.history.push(StatusEvent::Revoked { at, sig_id: None });
        self.dirty = true;
        true
    }

    /// Mark `kid`'s status as referring to a key the server no longer has.
    pub fn flag_nuked(&mut self, kid: &Kid) -> bool {
        match self.slot_of_kid(kid) {
            Some(slot) if !self.records[slot].nuked => {
                self.records[slot].nuked = true;
                self.dirty = true;
                true
            }
            _ => false,
        }
    }

    // ── Devices ───────────────────────────────────────────────────────────────

    /// Insert or merge a device, and move its key binding.
    pub fn bind_device(&mut self, device: Device) {
        log::debug!("+ KeyStatusStore::bind_device {}", device.id);

        let did = device.id.clone();
        let previous_kid = match self.devices.get_mut(&did) {
            Some(existing) => {
                log::debug!("| merge with existing");
                let prev = existing.kid.clone();
                existing.merge(&device);
                prev
            }
            None => {
                log::debug!("| new insert");
                self.devices.insert(did.clone(), device);
                None
            }
        };

        // The old binding goes first, even if it is about to be reinstalled.
        if let Some(prev) = previous_kid {
            if self.kid_to_device.get(&prev) == Some(&did) {
                self.kid_to_device.remove(&prev);
            }
        }

        if let Some(current) = self.devices.get(&did) {
            if let Some(kid) = current.kid.clone() {
                self.kid_to_device.insert(kid, did.clone());
            }
            if current.is_web() {
                log::debug!("| set web device {did}");
                self.web_device_id = Some(did.clone());
            }
        }

        self.dirty = true;
    }

    pub fn device(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn device_id_for_kid(&self, kid: &Kid) -> Option<&DeviceId> {
        self.kid_to_device.get(kid)
    }

    pub fn device_for_kid(&self, kid: &Kid) -> Option<&Device> {
        self.kid_to_device
            .get(kid)
            .and_then(|did| self.devices.get(did))
    }

    pub fn web_device_id(&self) -> Option<&DeviceId> {
        self.web_device_id.as_ref()
    }

    // ── Snapshots and serialization ───────────────────────────────────────────

    /// An independent copy for readers that may overlap a replay.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| KeyFamilyError::Serialization(e.to_string()))
    }

    /// Load a store written by [`KeyStatusStore::to_json`].
    ///
    /// Index entries that point outside the record arena are rejected.
    pub fn from_json(json: &str) -> Result<Self> {
        let store: Self =
            serde_json::from_str(json).map_err(|e| KeyFamilyError::Serialization(e.to_string()))?;
        let n = store.records.len();
        if store.index.values().chain(store.sigs.values()).any(|&s| s >= n) {
            return Err(KeyFamilyError::Serialization(
                "index refers to a missing status record".into(),
            ));
        }
        Ok(store)
    }
}

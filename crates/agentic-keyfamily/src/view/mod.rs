//! Trusted key view — the registry joined with replayed status.
//!
//! The [`KeyRegistry`] is what the server claims; the [`KeyStatusStore`] is
//! what the client computed by replaying the identity's chain. Every
//! validity, role, and device question goes through this view.
//!
//! Time-scoped queries take `t` in Unix seconds. Replay passes each link's
//! own time; live callers use the `*_now` variants, which read the
//! context's clock. Going back in time only affects expiry, never
//! revocation.

pub mod replay;

use std::sync::Arc;

use crate::context::Context;
use crate::error::{KeyFamilyError, Result};
use crate::keys::{DeviceId, GenericKey, KeyRef, Kid, SigId};
use crate::registry::KeyRegistry;
use crate::status::{Delegation, Device, KeyRole, KeyStatus, KeyStatusStore};
use crate::time::DualTime;

pub use replay::{replay, ChainLink, ChainReplayer, LinkRecord};

/// The query facade over one identity's keys.
#[derive(Debug, Clone)]
pub struct TrustedKeyView {
    ctx: Context,
    registry: KeyRegistry,
    store: KeyStatusStore,
}

impl TrustedKeyView {
    /// Join `registry` and `store`.
    ///
    /// Statuses whose key the registry no longer carries are flagged as
    /// server-nuked.
    pub fn new(ctx: Context, registry: KeyRegistry, store: KeyStatusStore) -> Self {
        let mut view = Self {
            ctx,
            registry,
            store,
        };
        for kid in view.missing_from_registry() {
            if view.store.flag_nuked(&kid) {
                log::warn!("key {kid} has a computed status but the server no longer lists it");
            }
        }
        view
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn registry(&self) -> &KeyRegistry {
        &self.registry
    }

    pub fn store(&self) -> &KeyStatusStore {
        &self.store
    }

    /// Hand the store back, e.g. for the cache layer to persist.
    pub fn into_store(self) -> KeyStatusStore {
        self.store
    }

    /// An independent copy for readers that may overlap a replay.
    pub fn snapshot(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            registry: self.registry.clone(),
            store: self.store.snapshot(),
        }
    }

    fn missing_from_registry(&self) -> Vec<Kid> {
        self.store
            .statuses()
            .filter_map(|s| s.kid.clone())
            .filter(|kid| !self.registry.contains(kid))
            .collect()
    }

    // ── Mutation entry points ─────────────────────────────────────────────────

    /// Add a locally generated key the server has not seen yet.
    pub fn add_local_key(&mut self, key: Arc<dyn GenericKey>) {
        self.registry.add_local(key);
    }

    /// Trust `key_ref` as eldest with no window, for an identity that has no
    /// chain yet.
    pub fn install_local_eldest(&mut self, key_ref: &KeyRef) -> Result<()> {
        self.store.install_eldest(key_ref, 0, 0)
    }

    /// Trust the server-reported eldest key of an identity with no chain
    /// links. Only a PGP key whose self-certification matches the context's
    /// username qualifies; its certification supplies the window.
    pub fn install_server_eldest(&mut self, kid: &Kid) -> Result<()> {
        let key = self.registry.find_by_kid(kid)?;
        let check = key.check_identity(self.ctx.username()).ok_or_else(|| {
            KeyFamilyError::EldestMismatch(format!("server eldest key {kid} is not a PGP key"))
        })?;
        if !check.matched {
            return Err(KeyFamilyError::EldestMismatch(format!(
                "server eldest key {kid} does not certify {}",
                self.ctx.username()
            )));
        }
        self.store.install_eldest(
            &key.key_ref(),
            check.ctime.unwrap_or(0),
            check.etime.unwrap_or(0),
        )
    }

    /// Record a delegation. A known fingerprint for the kid is aliased; a
    /// kid the registry doesn't list is flagged as server-nuked.
    pub fn delegate(&mut self, mut delegation: Delegation) {
        if delegation.fingerprint.is_none() {
            delegation.fingerprint = self.registry.fingerprint_for(&delegation.kid).cloned();
        }
        let kid = delegation.kid.clone();
        self.store.delegate(delegation);
        if !self.registry.contains(&kid) && self.store.flag_nuked(&kid) {
            log::warn!("key {kid} was delegated but the server doesn't list it");
        }
    }

    pub fn revoke_by_signature(&mut self, sig_id: &SigId, at: DualTime) -> Result<bool> {
        self.store.revoke_by_signature(sig_id, at)
    }

    pub fn revoke_by_kid(&mut self, kid: &Kid, at: DualTime) -> bool {
        self.store.revoke_by_kid(kid, at)
    }

    pub fn bind_device(&mut self, device: Device) {
        self.store.bind_device(device);
    }

    // ── Status queries ────────────────────────────────────────────────────────

    /// The status of `key_ref` if it is live and `t` is inside its window.
    pub fn status_active_at(&self, key_ref: &KeyRef, t: i64) -> Result<&KeyStatus> {
        let status = self
            .store
            .get(key_ref)
            .ok_or_else(|| KeyFamilyError::NotFound(format!("the key '{key_ref}' wasn't found")))?;
        status.check_active_at(&key_ref.to_string(), t)?;
        Ok(status)
    }

    pub fn status_active_now(&self, key_ref: &KeyRef) -> Result<&KeyStatus> {
        self.status_active_at(key_ref, self.ctx.now())
    }

    /// The key and status of `key_ref`, if it is an active sibkey at `t`.
    pub fn active_sibkey_at(
        &self,
        key_ref: &KeyRef,
        t: i64,
    ) -> Result<(Arc<dyn GenericKey>, KeyStatus)> {
        let status = self.status_active_at(key_ref, t)?;
        if !status.sibkey {
            return Err(KeyFamilyError::wrong_role(
                key_ref,
                "wasn't delegated as a sibkey",
            ));
        }
        let key = self.registry.find_by_ref(key_ref)?;
        Ok((key, status.clone()))
    }

    pub fn active_sibkey(&self, key_ref: &KeyRef) -> Result<(Arc<dyn GenericKey>, KeyStatus)> {
        self.active_sibkey_at(key_ref, self.ctx.now())
    }

    /// The key for `kid` if it is an active, encryption-capable subkey now.
    pub fn active_encryption_subkey(&self, kid: &Kid) -> Result<Arc<dyn GenericKey>> {
        let status = self.status_active_now(&KeyRef::from(kid))?;
        if status.sibkey {
            return Err(KeyFamilyError::wrong_role(kid, "was delegated as a sibkey"));
        }
        let key = self.registry.find_by_kid(kid)?;
        if !key.can_encrypt() {
            return Err(KeyFamilyError::wrong_role(kid, "cannot encrypt"));
        }
        Ok(key)
    }

    /// Sibkey, subkey, or none (for any failure) at `t`.
    pub fn role_at(&self, kid: &Kid, t: i64) -> KeyRole {
        match self.status_active_at(&KeyRef::from(kid), t) {
            Ok(status) => status.delegated_role(),
            Err(_) => KeyRole::None,
        }
    }

    pub fn role(&self, kid: &Kid) -> KeyRole {
        self.role_at(kid, self.ctx.now())
    }

    fn keys_with_role_at(&self, role: KeyRole, t: i64) -> Vec<Arc<dyn GenericKey>> {
        self.registry
            .keys()
            .filter(|key| self.role_at(key.kid(), t) == role)
            .cloned()
            .collect()
    }

    /// Every registry key that is an active sibkey at `t`, in no particular order.
    pub fn all_active_sibkeys_at(&self, t: i64) -> Vec<Arc<dyn GenericKey>> {
        self.keys_with_role_at(KeyRole::Sibkey, t)
    }

    pub fn all_active_sibkeys(&self) -> Vec<Arc<dyn GenericKey>> {
        self.all_active_sibkeys_at(self.ctx.now())
    }

    /// Every registry key that is an active subkey at `t`, in no particular order.
    pub fn all_active_subkeys_at(&self, t: i64) -> Vec<Arc<dyn GenericKey>> {
        self.keys_with_role_at(KeyRole::Subkey, t)
    }

    pub fn all_active_subkeys(&self) -> Vec<Arc<dyn GenericKey>> {
        self.all_active_subkeys_at(self.ctx.now())
    }

    /// Does any registry key still resolve to an active sibkey?
    ///
    /// `false` means the identity's whole key history has been invalidated.
    pub fn has_any_active_key(&self) -> bool {
        self.registry
            .keys()
            .any(|key| self.role(key.kid()) == KeyRole::Sibkey)
    }

    /// Kids with a computed status that the registry no longer lists.
    pub fn server_nuked_keys(&self) -> Vec<Kid> {
        let mut kids: Vec<Kid> = self
            .store
            .statuses()
            .filter(|s| s.nuked)
            .filter_map(|s| s.kid.clone())
            .collect();
        kids.extend(self.missing_from_registry());
        kids.sort();
        kids.dedup();
        kids
    }

    // ── PGP queries ───────────────────────────────────────────────────────────

    /// Is there a live PGP sibkey certifying the context's username?
    pub fn find_self_identity(&self) -> bool {
        let claim = self.ctx.username();
        self.registry.pgp_keys().any(|pgp| {
            let live_sibkey = self
                .store
                .get_by_kid(pgp.kid())
                .is_some_and(|s| !s.is_revoked() && s.sibkey);
            live_sibkey
                && pgp
                    .check_identity(claim)
                    .is_some_and(|check| check.matched)
        })
    }

    /// Active PGP keys now; only sibkeys when `sibkeys_only`.
    pub fn active_pgp_keys(&self, sibkeys_only: bool) -> Vec<Arc<dyn GenericKey>> {
        self.registry
            .pgp_keys()
            .filter(|pgp| match self.role(pgp.kid()) {
                KeyRole::Sibkey => true,
                KeyRole::Subkey => !sibkeys_only,
                KeyRole::None => false,
            })
            .cloned()
            .collect()
    }

    // ── Device queries ────────────────────────────────────────────────────────

    fn bound_kid(&self, did: &DeviceId) -> Result<&Kid> {
        let device = self
            .store
            .device(did)
            .ok_or_else(|| KeyFamilyError::NoDevice(did.to_string()))?;
        device
            .kid
            .as_ref()
            .ok_or_else(|| KeyFamilyError::NotFound(format!("device {did} has no bound key")))
    }

    /// Every active key of device `did`: its sibkeys, each followed by the
    /// active subkeys parented to it.
    pub fn keys_for_device(&self, did: &DeviceId) -> Result<Vec<Kid>> {
        if self.store.device(did).is_none() {
            return Err(KeyFamilyError::NoDevice(did.to_string()));
        }

        let now = self.ctx.now();
        let mut sibkeys: Vec<Kid> = self
            .all_active_sibkeys_at(now)
            .iter()
            .map(|k| k.kid().clone())
            .filter(|kid| self.store.device_id_for_kid(kid) == Some(did))
            .collect();
        sibkeys.sort();

        // Subkeys belong to a device only through their parent sibkey.
        let subkeys = self.all_active_subkeys_at(now);
        let mut ret = Vec::new();
        for sibkey in sibkeys {
            let mut children: Vec<Kid> = subkeys
                .iter()
                .map(|k| k.kid().clone())
                .filter(|kid| {
                    self.store
                        .get_by_kid(kid)
                        .is_some_and(|s| s.parent.as_ref() == Some(&sibkey))
                })
                .collect();
            children.sort();
            ret.push(sibkey);
            ret.extend(children);
        }
        Ok(ret)
    }

    /// The active sibkey device `did` is bound to.
    pub fn sibkey_for_device(&self, did: &DeviceId) -> Result<Arc<dyn GenericKey>> {
        let kid = self.bound_kid(did)?;
        self.active_sibkey(&KeyRef::from(kid))
            .map(|(key, _)| key)
            .map_err(|e| match e {
                KeyFamilyError::WrongRole { .. } => e,
                other => KeyFamilyError::wrong_role(
                    kid,
                    format!("bound to device {did} but not an active sibkey: {other}"),
                ),
            })
    }

    /// The active encryption subkey of device `did`'s sibkey, if one is
    /// recorded.
    pub fn encryption_subkey_for_device(
        &self,
        did: &DeviceId,
    ) -> Result<Option<Arc<dyn GenericKey>>> {
        let kid = self.bound_kid(did)?;
        match self.store.get_by_kid(kid).and_then(|s| s.subkey.as_ref()) {
            Some(subkey) => self.active_encryption_subkey(subkey).map(Some),
            None => Ok(None),
        }
    }

    pub fn device_for_key(&self, kid: &Kid) -> Option<&Device> {
        self.store.device_for_kid(kid)
    }

    /// This process's own device, per the context.
    pub fn current_device(&self) -> Result<&Device> {
        let did = self.ctx.device_id().ok_or(KeyFamilyError::NotProvisioned)?;
        self.store
            .device(did)
            .ok_or_else(|| KeyFamilyError::NotFound(format!("device {did}")))
    }

    pub fn all_devices(&self) -> Vec<&Device> {
        self.store.devices().collect()
    }

    pub fn web_device(&self) -> Option<&Device> {
        self.store.web_device_id().and_then(|did| self.store.device(did))
    }

    /// Is `kid` a passphrase-derived web key, either directly or as the
    /// subkey of one?
    pub fn is_deterministic_key(&self, kid: &Kid) -> bool {
        if self.is_bound_to_web(kid) {
            return true;
        }
        match self.store.get_by_kid(kid) {
            Some(status) if !status.sibkey => status
                .parent
                .as_ref()
                .is_some_and(|parent| self.is_bound_to_web(parent)),
            _ => false,
        }
    }

    fn is_bound_to_web(&self, kid: &Kid) -> bool {
        self.store.device_for_kid(kid).is_some_and(Device::is_web)
    }
}

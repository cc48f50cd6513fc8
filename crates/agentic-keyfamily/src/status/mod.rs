//! Computed key status — what replaying the chain says about each key.
//!
//! The status module provides:
//! - [`KeyStatus`], the trusted per-key record (role, liveness, window)
//! - [`Device`] records and their merge rules
//! - [`KeyStatusStore`], the state machine that chain replay mutates

pub mod device;
pub mod store;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{KeyFamilyError, Result};
use crate::keys::{Kid, SigId};
use crate::time::DualTime;

pub use device::{Device, DeviceKind};
pub use store::{Delegation, KeyStatusStore};

/// Whether a key has been cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Uncancelled,
    Revoked,
}

/// The role a key plays at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyRole {
    /// Not active: unknown, revoked, or outside its window.
    #[default]
    None,
    Sibkey,
    Subkey,
}

/// One entry in a status's transition history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    Eldest,
    Delegated {
        sig_id: SigId,
        by: Kid,
        at: DualTime,
        /// The key was revoked when this delegation arrived.
        resurrected: bool,
    },
    Revoked {
        at: DualTime,
        /// Set for signature revocations; `None` for kid revocations.
        sig_id: Option<SigId>,
    },
}

/// Trusted per-key state, built by replaying chain links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyStatus {
    /// The key's kid, when known (a local eldest key may be fingerprint-only).
    pub kid: Option<Kid>,
    pub liveness: Liveness,
    pub eldest: bool,
    pub sibkey: bool,
    /// Validity start, Unix seconds.
    pub ctime: i64,
    /// Validity end, Unix seconds; `0` for no upper bound.
    pub etime: i64,
    /// For subkeys, the sibkey that delegated it.
    pub parent: Option<Kid>,
    /// For sibkeys, the most recently delegated subkey.
    pub subkey: Option<Kid>,
    /// Signature id → delegating kid, for every delegation of this key.
    pub delegations: BTreeMap<SigId, Kid>,
    pub delegated_at: Option<DualTime>,
    pub revoked_at: Option<DualTime>,
    #[serde(default)]
    pub history: Vec<StatusEvent>,
    /// The registry no longer has this key, but history still refers to it.
    #[serde(default)]
    pub nuked: bool,
}

impl KeyStatus {
    pub(crate) fn new(kid: Option<Kid>, eldest: bool, sibkey: bool, ctime: i64, etime: i64) -> Self {
        Self {
            kid,
            liveness: Liveness::Uncancelled,
            eldest,
            sibkey,
            ctime,
            etime,
            parent: None,
            subkey: None,
            delegations: BTreeMap::new(),
            delegated_at: None,
            revoked_at: None,
            history: Vec::new(),
            nuked: false,
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.liveness == Liveness::Revoked
    }

    /// Is `t` inside `[ctime, etime]`, both bounds inclusive?
    pub fn is_within_window(&self, t: i64) -> bool {
        t >= self.ctime && (self.etime == 0 || t <= self.etime)
    }

    /// Check liveness, then the window. Revocation wins over expiry and
    /// ignores `t`.
    pub fn check_active_at(&self, label: &str, t: i64) -> Result<()> {
        if self.is_revoked() {
            return Err(KeyFamilyError::Revoked(label.to_string()));
        }
        if !self.is_within_window(t) {
            return Err(KeyFamilyError::Expired {
                kid: label.to_string(),
                ctime: self.ctime,
                etime: self.etime,
            });
        }
        Ok(())
    }

    /// The delegated role, ignoring liveness and window.
    pub fn delegated_role(&self) -> KeyRole {
        if self.sibkey {
            KeyRole::Sibkey
        } else {
            KeyRole::Subkey
        }
    }

    /// How many times a revoked status was brought back by re-delegation.
    pub fn resurrections(&self) -> usize {
        self.history
            .iter()
            .filter(|e| matches!(e, StatusEvent::Delegated { resurrected: true, .. }))
            .count()
    }
}

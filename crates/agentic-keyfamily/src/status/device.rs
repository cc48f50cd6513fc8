//! Devices an identity has provisioned, and the key each is bound to.

use serde::{Deserialize, Serialize};

use crate::keys::{DeviceId, Kid};

/// Kind of a provisioned device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Desktop,
    Mobile,
    /// Browser access; its keys are derived from the passphrase.
    Web,
    /// Offline backup (paper) key.
    Backup,
}

/// A device record as carried by a chain link.
///
/// Everything but the id is optional so that a later link can update a
/// single field; see [`Device::merge`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    #[serde(default)]
    pub kid: Option<Kid>,
    #[serde(default)]
    pub kind: Option<DeviceKind>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Device {
    pub fn new(id: DeviceId) -> Self {
        Self {
            id,
            kid: None,
            kind: None,
            description: None,
        }
    }

    pub fn with_kid(mut self, kid: Kid) -> Self {
        self.kid = Some(kid);
        self
    }

    pub fn with_kind(mut self, kind: DeviceKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_web(&self) -> bool {
        self.kind == Some(DeviceKind::Web)
    }

    /// Field-wise merge: every non-empty field of `newer` wins.
    pub fn merge(&mut self, newer: &Device) {
        if let Some(kid) = newer.kid.as_ref().filter(|k| !k.is_empty()) {
            self.kid = Some(kid.clone());
        }
        if newer.kind.is_some() {
            self.kind = newer.kind;
        }
        if let Some(desc) = newer.description.as_ref().filter(|d| !d.is_empty()) {
            self.description = Some(desc.clone());
        }
    }
}

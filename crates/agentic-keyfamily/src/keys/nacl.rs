//! Reference parser for NaCl key bundles.
//!
//! A NaCl bundle is the hex of its own KID:
//!
//! ```text
//! 01 | type | 32-byte public key | 0a
//! ```
//!
//! where `type` is `0x20` for an Ed25519 signing key and `0x21` for an
//! X25519 encryption key. PGP bundles are not handled here; callers plug a
//! PGP-aware [`KeyBundleParser`] in front of this one.

use std::sync::Arc;

use ed25519_dalek::VerifyingKey;
use x25519_dalek::PublicKey as X25519PublicKey;

use crate::error::{KeyFamilyError, Result};

use super::{GenericKey, KeyAlgorithm, KeyBundleParser, Kid};

const KID_VERSION: u8 = 0x01;
const KID_TRAILER: u8 = 0x0a;
const TYPE_ED25519: u8 = 0x20;
const TYPE_X25519: u8 = 0x21;
const KID_LEN: usize = 35;

#[derive(Debug, Clone)]
enum Material {
    Signing(VerifyingKey),
    Encryption(X25519PublicKey),
}

/// An Ed25519 or X25519 public key, addressed by its KID.
#[derive(Debug, Clone)]
pub struct NaclKey {
    kid: Kid,
    material: Material,
}

impl NaclKey {
    pub fn from_ed25519(key: VerifyingKey) -> Self {
        Self {
            kid: encode_kid(TYPE_ED25519, key.as_bytes()),
            material: Material::Signing(key),
        }
    }

    pub fn from_x25519(key: X25519PublicKey) -> Self {
        Self {
            kid: encode_kid(TYPE_X25519, key.as_bytes()),
            material: Material::Encryption(key),
        }
    }

    /// Decode a KID-form bundle.
    pub fn from_bundle(bundle: &str) -> Result<Self> {
        let raw = hex::decode(bundle.trim())
            .map_err(|e| KeyFamilyError::MalformedInput(format!("bundle is not hex: {e}")))?;
        if raw.len() != KID_LEN {
            return Err(KeyFamilyError::MalformedInput(format!(
                "NaCl bundle must be {KID_LEN} bytes, got {}",
                raw.len()
            )));
        }
        if raw[0] != KID_VERSION || raw[KID_LEN - 1] != KID_TRAILER {
            return Err(KeyFamilyError::MalformedInput(
                "NaCl bundle has a bad version or trailer byte".into(),
            ));
        }

        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&raw[2..34]);

        match raw[1] {
            TYPE_ED25519 => {
                let key = VerifyingKey::from_bytes(&bytes).map_err(|e| {
                    KeyFamilyError::MalformedInput(format!("invalid Ed25519 key: {e}"))
                })?;
                Ok(Self::from_ed25519(key))
            }
            TYPE_X25519 => Ok(Self::from_x25519(X25519PublicKey::from(bytes))),
            other => Err(KeyFamilyError::MalformedInput(format!(
                "unknown NaCl key type 0x{other:02x}"
            ))),
        }
    }

    /// The verifying key, for Ed25519 keys.
    pub fn verifying_key(&self) -> Option<&VerifyingKey> {
        match &self.material {
            Material::Signing(k) => Some(k),
            Material::Encryption(_) => None,
        }
    }
}

fn encode_kid(key_type: u8, key: &[u8; 32]) -> Kid {
    let mut raw = Vec::with_capacity(KID_LEN);
    raw.push(KID_VERSION);
    raw.push(key_type);
    raw.extend_from_slice(key);
    raw.push(KID_TRAILER);
    Kid::new(hex::encode(raw))
}

impl GenericKey for NaclKey {
    fn kid(&self) -> &Kid {
        &self.kid
    }

    fn algorithm(&self) -> KeyAlgorithm {
        match self.material {
            Material::Signing(_) => KeyAlgorithm::Ed25519,
            Material::Encryption(_) => KeyAlgorithm::X25519,
        }
    }

    fn can_encrypt(&self) -> bool {
        matches!(self.material, Material::Encryption(_))
    }

    fn can_sign(&self) -> bool {
        matches!(self.material, Material::Signing(_))
    }
}

/// [`KeyBundleParser`] for NaCl KID-form bundles.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaclBundleParser;

impl KeyBundleParser for NaclBundleParser {
    fn parse_bundle(&self, bundle: &str) -> Result<Arc<dyn GenericKey>> {
        Ok(Arc::new(NaclKey::from_bundle(bundle)?))
    }
}

//! Key identifiers and the key-material seam.
//!
//! Keys are addressed by a [`Kid`] (public identifier) and, for PGP-family
//! keys, a [`Fingerprint`]. A [`KeyRef`] carries either or both. Decoding
//! of concrete key material happens behind [`KeyBundleParser`]; the crate
//! ships a reference NaCl parser in [`nacl`].

pub mod nacl;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{KeyFamilyError, Result};

pub use nacl::{NaclBundleParser, NaclKey};

macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a hex string, normalizing to lowercase.
            pub fn new(s: impl AsRef<str>) -> Self {
                Self(s.as_ref().trim().to_ascii_lowercase())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

hex_id!(
    /// Public key identifier.
    Kid
);
hex_id!(
    /// Content fingerprint of a PGP-family key.
    Fingerprint
);
hex_id!(
    /// Identifier of a signature (chain link) that delegated a key.
    SigId
);

/// Identifier of a device an identity has provisioned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fingerprint-or-kid reference. At least one form is always present.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyRef {
    Kid(Kid),
    Fingerprint(Fingerprint),
    Both(Kid, Fingerprint),
}

impl KeyRef {
    pub fn new(kid: Kid, fingerprint: Option<Fingerprint>) -> Self {
        match fingerprint {
            Some(fp) => Self::Both(kid, fp),
            None => Self::Kid(kid),
        }
    }

    pub fn kid(&self) -> Option<&Kid> {
        match self {
            Self::Kid(k) | Self::Both(k, _) => Some(k),
            Self::Fingerprint(_) => None,
        }
    }

    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        match self {
            Self::Fingerprint(fp) | Self::Both(_, fp) => Some(fp),
            Self::Kid(_) => None,
        }
    }

    /// Every map key this reference is known under.
    pub fn lookup_keys(&self) -> Vec<LookupKey> {
        let mut keys = Vec::with_capacity(2);
        if let Some(kid) = self.kid() {
            keys.push(LookupKey::Kid(kid.clone()));
        }
        if let Some(fp) = self.fingerprint() {
            keys.push(LookupKey::Fingerprint(fp.clone()));
        }
        keys
    }

    /// The preferred map key: the kid when known, else the fingerprint.
    pub fn primary_lookup_key(&self) -> LookupKey {
        match self {
            Self::Kid(k) | Self::Both(k, _) => LookupKey::Kid(k.clone()),
            Self::Fingerprint(fp) => LookupKey::Fingerprint(fp.clone()),
        }
    }
}

impl From<Kid> for KeyRef {
    fn from(kid: Kid) -> Self {
        Self::Kid(kid)
    }
}

impl From<&Kid> for KeyRef {
    fn from(kid: &Kid) -> Self {
        Self::Kid(kid.clone())
    }
}

impl From<Fingerprint> for KeyRef {
    fn from(fp: Fingerprint) -> Self {
        Self::Fingerprint(fp)
    }
}

impl std::fmt::Display for KeyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kid(k) => write!(f, "{k}"),
            Self::Fingerprint(fp) => write!(f, "{fp}"),
            Self::Both(k, fp) => write!(f, "{k} ({fp})"),
        }
    }
}

/// A single map key in the status alias index.
///
/// Serialized as `kid:<hex>` or `fp:<hex>` so that JSON maps keyed by it
/// stay string-keyed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum LookupKey {
    Kid(Kid),
    Fingerprint(Fingerprint),
}

impl From<LookupKey> for String {
    fn from(key: LookupKey) -> Self {
        match key {
            LookupKey::Kid(k) => format!("kid:{k}"),
            LookupKey::Fingerprint(fp) => format!("fp:{fp}"),
        }
    }
}

impl TryFrom<String> for LookupKey {
    type Error = KeyFamilyError;

    fn try_from(s: String) -> Result<Self> {
        if let Some(rest) = s.strip_prefix("kid:") {
            Ok(Self::Kid(Kid::new(rest)))
        } else if let Some(rest) = s.strip_prefix("fp:") {
            Ok(Self::Fingerprint(Fingerprint::new(rest)))
        } else {
            Err(KeyFamilyError::MalformedInput(format!(
                "unrecognized lookup key: {s}"
            )))
        }
    }
}

/// Broad key families the registry distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAlgorithm {
    Ed25519,
    X25519,
    Pgp,
}

/// Outcome of checking a PGP key's self-certifications against a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityCheck {
    pub matched: bool,
    /// Certification creation time, if the certification carries one.
    pub ctime: Option<i64>,
    /// Certification expiry time, if the certification carries one.
    pub etime: Option<i64>,
}

/// A decoded public key, as the bundle parser hands it over.
pub trait GenericKey: Send + Sync + std::fmt::Debug {
    fn kid(&self) -> &Kid;

    fn fingerprint(&self) -> Option<&Fingerprint> {
        None
    }

    fn algorithm(&self) -> KeyAlgorithm;

    fn can_encrypt(&self) -> bool;

    fn can_sign(&self) -> bool;

    /// Check the key's identity assertions against `claim`.
    ///
    /// Only PGP-family keys carry identity assertions; everything else
    /// returns `None`.
    fn check_identity(&self, _claim: &str) -> Option<IdentityCheck> {
        None
    }

    fn key_ref(&self) -> KeyRef {
        KeyRef::new(self.kid().clone(), self.fingerprint().cloned())
    }

    fn is_pgp(&self) -> bool {
        self.algorithm() == KeyAlgorithm::Pgp
    }
}

/// Decodes one serialized key bundle.
pub trait KeyBundleParser {
    fn parse_bundle(&self, bundle: &str) -> Result<Arc<dyn GenericKey>>;
}

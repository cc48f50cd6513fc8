//! Key registry — the raw, server-supplied key set of an identity.
//!
//! Nothing in the registry is trusted. It decodes the bundles the server
//! returned and indexes them by kid and fingerprint; whether any of those
//! keys is currently valid is decided by [`crate::view::TrustedKeyView`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{KeyFamilyError, Result};
use crate::keys::{Fingerprint, GenericKey, KeyBundleParser, KeyRef, Kid};

/// The key set as returned by the server's user lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawKeySet {
    pub all_bundles: Vec<String>,
}

impl RawKeySet {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| KeyFamilyError::MalformedInput(format!("invalid key set: {e}")))
    }
}

/// Decoded keys plus kid ↔ fingerprint indices.
#[derive(Debug, Clone, Default)]
pub struct KeyRegistry {
    all_keys: HashMap<Kid, Arc<dyn GenericKey>>,
    /// Kids of PGP-family keys, in bundle order.
    pgp_kids: Vec<Kid>,
    fp_to_kid: HashMap<Fingerprint, Kid>,
    kid_to_fp: HashMap<Kid, Fingerprint>,
}

impl KeyRegistry {
    /// An empty registry, for identities with no server-side keys yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode every bundle of `raw` with `parser`.
    ///
    /// One malformed bundle fails the whole parse.
    pub fn parse(raw: &RawKeySet, parser: &dyn KeyBundleParser) -> Result<Self> {
        log::debug!("+ KeyRegistry::parse ({} bundles)", raw.all_bundles.len());

        let mut registry = Self::new();
        for (i, bundle) in raw.all_bundles.iter().enumerate() {
            let key = parser.parse_bundle(bundle).map_err(|e| match e {
                KeyFamilyError::MalformedInput(msg) => {
                    KeyFamilyError::MalformedInput(format!("bundle {i}: {msg}"))
                }
                other => other,
            })?;
            registry.insert(key);
        }

        log::debug!("- KeyRegistry::parse -> {} keys", registry.len());
        Ok(registry)
    }

    /// Add a key generated locally, before the server has acknowledged it.
    pub fn add_local(&mut self, key: Arc<dyn GenericKey>) {
        log::debug!("| KeyRegistry::add_local {}", key.kid());
        self.insert(key);
    }

    fn insert(&mut self, key: Arc<dyn GenericKey>) {
        let kid = key.kid().clone();
        if let Some(fp) = key.fingerprint() {
            self.fp_to_kid.insert(fp.clone(), kid.clone());
            self.kid_to_fp.insert(kid.clone(), fp.clone());
        }
        if key.is_pgp() && !self.pgp_kids.contains(&kid) {
            self.pgp_kids.push(kid.clone());
        }
        self.all_keys.insert(kid, key);
    }

    /// Look up a key by kid. Performs no validity check.
    pub fn find_by_kid(&self, kid: &Kid) -> Result<Arc<dyn GenericKey>> {
        self.all_keys
            .get(kid)
            .cloned()
            .ok_or_else(|| KeyFamilyError::NotFound(format!("no key found for {kid}")))
    }

    /// Look up a key by kid, or by fingerprint when no kid is given.
    /// Performs no validity check.
    pub fn find_by_ref(&self, key_ref: &KeyRef) -> Result<Arc<dyn GenericKey>> {
        let kid = match key_ref.kid() {
            Some(kid) => kid,
            None => {
                let fp = key_ref
                    .fingerprint()
                    .ok_or_else(|| KeyFamilyError::NotFound("empty key reference".into()))?;
                self.kid_for_fingerprint(fp).ok_or_else(|| {
                    KeyFamilyError::NotFound(format!("no kid for fingerprint {fp}"))
                })?
            }
        };
        self.find_by_kid(kid)
    }

    /// Expand a bare kid into a reference that includes its fingerprint,
    /// when the registry knows one.
    pub fn key_ref_for(&self, kid: &Kid) -> KeyRef {
        KeyRef::new(kid.clone(), self.kid_to_fp.get(kid).cloned())
    }

    pub fn fingerprint_for(&self, kid: &Kid) -> Option<&Fingerprint> {
        self.kid_to_fp.get(kid)
    }

    pub fn kid_for_fingerprint(&self, fp: &Fingerprint) -> Option<&Kid> {
        self.fp_to_kid.get(fp)
    }

    pub fn contains(&self, kid: &Kid) -> bool {
        self.all_keys.contains_key(kid)
    }

    /// All keys, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &Arc<dyn GenericKey>> {
        self.all_keys.values()
    }

    pub fn pgp_keys(&self) -> impl Iterator<Item = &Arc<dyn GenericKey>> {
        self.pgp_kids.iter().filter_map(|kid| self.all_keys.get(kid))
    }

    pub fn len(&self) -> usize {
        self.all_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all_keys.is_empty()
    }
}

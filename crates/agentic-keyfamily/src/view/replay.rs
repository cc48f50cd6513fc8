//! Chain replay — applying validated chain links to a view.
//!
//! Links arrive from the chain-link validator, which has already checked
//! their signatures. Replay is strictly sequential: each link is judged
//! against the state every earlier link installed, so any error aborts the
//! replay and nothing computed so far should be trusted.

use serde::{Deserialize, Serialize};

use crate::error::{KeyFamilyError, Result};
use crate::keys::{Fingerprint, KeyRef, Kid, SigId};
use crate::status::{Delegation, Device, KeyRole};
use crate::time::DualTime;

use super::TrustedKeyView;

/// A validated chain link, as the replay needs to see it.
pub trait ChainLink {
    /// Global chain sequence number.
    fn seqno(&self) -> u64;

    fn sig_id(&self) -> &SigId;

    /// The key that signed this link.
    fn signing_kid(&self) -> &Kid;

    fn signing_fingerprint(&self) -> Option<&Fingerprint> {
        None
    }

    /// The key this link delegates, if it is a delegation.
    fn delegated_kid(&self) -> Option<&Kid>;

    /// For subkey delegations, the sibkey the subkey hangs off.
    fn parent_kid(&self) -> Option<&Kid>;

    fn role(&self) -> KeyRole;

    /// Creation time, Unix seconds.
    fn ctime(&self) -> i64;

    /// Expiry time, Unix seconds; `0` for none.
    fn etime(&self) -> i64;

    fn revoked_sigs(&self) -> &[SigId];

    fn revoked_kids(&self) -> &[Kid];

    fn device(&self) -> Option<&Device>;

    /// Is this the identity's self-signing first link?
    fn is_self_signed(&self) -> bool;

    fn time(&self) -> DualTime {
        DualTime::new(self.ctime(), self.seqno())
    }

    fn signing_key_ref(&self) -> KeyRef {
        KeyRef::new(self.signing_kid().clone(), self.signing_fingerprint().cloned())
    }
}

/// A plain, serializable chain link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRecord {
    pub seqno: u64,
    pub sig_id: SigId,
    pub kid: Kid,
    #[serde(default)]
    pub fingerprint: Option<Fingerprint>,
    #[serde(default)]
    pub delegated_kid: Option<Kid>,
    #[serde(default)]
    pub parent_kid: Option<Kid>,
    #[serde(default)]
    pub role: KeyRole,
    pub ctime: i64,
    #[serde(default)]
    pub etime: i64,
    #[serde(default)]
    pub revoke_sigs: Vec<SigId>,
    #[serde(default)]
    pub revoke_kids: Vec<Kid>,
    #[serde(default)]
    pub device: Option<Device>,
    #[serde(default)]
    pub self_signed: bool,
}

impl ChainLink for LinkRecord {
    fn seqno(&self) -> u64 {
        self.seqno
    }
    fn sig_id(&self) -> &SigId {
        &self.sig_id
    }
    fn signing_kid(&self) -> &Kid {
        &self.kid
    }
    fn signing_fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }
    fn delegated_kid(&self) -> Option<&Kid> {
        self.delegated_kid.as_ref()
    }
    fn parent_kid(&self) -> Option<&Kid> {
        self.parent_kid.as_ref()
    }
    fn role(&self) -> KeyRole {
        self.role
    }
    fn ctime(&self) -> i64 {
        self.ctime
    }
    fn etime(&self) -> i64 {
        self.etime
    }
    fn revoked_sigs(&self) -> &[SigId] {
        &self.revoke_sigs
    }
    fn revoked_kids(&self) -> &[Kid] {
        &self.revoke_kids
    }
    fn device(&self) -> Option<&Device> {
        self.device.as_ref()
    }
    fn is_self_signed(&self) -> bool {
        self.self_signed
    }
}

impl TrustedKeyView {
    /// Install the eldest key from the identity's first link.
    ///
    /// The window comes from the link when it is self-signed, and is
    /// overridden by the PGP self-certification's times when the eldest
    /// key is a PGP key certifying the context's username.
    pub fn install_eldest_link(&mut self, link: &dyn ChainLink) -> Result<()> {
        log::debug!("+ install_eldest_link seqno {}", link.seqno());

        let key = self.registry.find_by_ref(&link.signing_key_ref())?;

        let mut found = link.is_self_signed();
        let (mut ctime, mut etime) = if found {
            (link.ctime(), link.etime())
        } else {
            (0, 0)
        };

        if key.is_pgp() {
            if let Some(check) = key
                .check_identity(self.ctx.username())
                .filter(|c| c.matched)
            {
                found = true;
                if let Some(c) = check.ctime {
                    ctime = c;
                }
                if let Some(e) = check.etime {
                    etime = e;
                }
            }
            if !found {
                return Err(KeyFamilyError::EldestMismatch(
                    "first link signed by a key that doesn't match the user id".into(),
                ));
            }
        } else if !found {
            return Err(KeyFamilyError::EldestMismatch(
                "first link is neither self-signed nor PGP-signed".into(),
            ));
        }

        // A fingerprint-only reference is widened to include the kid.
        self.store.install_eldest(&key.key_ref(), ctime, etime)
    }

    /// Apply the delegation a link carries, if any.
    pub fn delegate_link(&mut self, link: &dyn ChainLink) -> Result<()> {
        let Some(kid) = link.delegated_kid() else {
            return Ok(());
        };
        let sibkey = match link.role() {
            KeyRole::Sibkey => true,
            KeyRole::Subkey => false,
            KeyRole::None => {
                return Err(KeyFamilyError::MalformedInput(format!(
                    "link {} delegates {kid} without a role",
                    link.seqno()
                )))
            }
        };
        self.delegate(Delegation {
            kid: kid.clone(),
            fingerprint: None,
            sig_id: link.sig_id().clone(),
            signing_kid: link.signing_kid().clone(),
            parent: link.parent_kid().cloned(),
            sibkey,
            ctime: link.ctime(),
            etime: link.etime(),
            at: link.time(),
        });
        Ok(())
    }

    /// Apply a link's revocations: signatures first, then kids.
    pub fn revoke_link(&mut self, link: &dyn ChainLink) -> Result<()> {
        let at = link.time();
        for sig in link.revoked_sigs().iter().filter(|s| !s.is_empty()) {
            self.store.revoke_by_signature(sig, at)?;
        }
        for kid in link.revoked_kids().iter().filter(|k| !k.is_empty()) {
            self.store.revoke_by_kid(kid, at);
        }
        Ok(())
    }

    /// Apply the device record a link carries, if any.
    pub fn update_devices(&mut self, link: &dyn ChainLink) -> Result<()> {
        if let Some(device) = link.device() {
            log::debug!("| device {} kid {:?}", device.id, device.kid);
            self.store.bind_device(device.clone());
        }
        Ok(())
    }
}

/// Incremental, in-order replay of one identity's chain.
#[derive(Debug, Clone, Default)]
pub struct ChainReplayer {
    last_seqno: Option<u64>,
    applied: usize,
}

impl ChainReplayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_seqno(&self) -> Option<u64> {
        self.last_seqno
    }

    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Apply one link.
    ///
    /// The first link installs the eldest key. Every later link must be
    /// signed by a key that was an active sibkey at the link's own time.
    pub fn apply(&mut self, view: &mut TrustedKeyView, link: &dyn ChainLink) -> Result<()> {
        match self.last_seqno {
            Some(last) if link.seqno() <= last => {
                return Err(KeyFamilyError::OutOfOrder {
                    last,
                    got: link.seqno(),
                });
            }
            Some(_) => {
                view.active_sibkey_at(&link.signing_key_ref(), link.ctime())?;
            }
            None => view.install_eldest_link(link)?,
        }

        view.delegate_link(link)?;
        view.revoke_link(link)?;
        view.update_devices(link)?;

        self.last_seqno = Some(link.seqno());
        self.applied += 1;
        Ok(())
    }
}

/// Replay `links` in order onto `view`, stopping at the first error.
pub fn replay<L: ChainLink>(view: &mut TrustedKeyView, links: &[L]) -> Result<ChainReplayer> {
    let mut replayer = ChainReplayer::new();
    for link in links {
        replayer.apply(view, link)?;
    }
    log::debug!("replayed {} links", replayer.applied());
    Ok(replayer)
}

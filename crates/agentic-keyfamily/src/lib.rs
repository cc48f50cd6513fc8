//! AgenticKeyFamily — the trust engine behind an identity's key family.
//!
//! Replays an identity's signature chain into a trusted, time-scoped view
//! of its keys: which are sibkeys, which are subkeys, when each was valid,
//! which were revoked, and which device each belongs to. The server's key
//! list is only a claim; every answer comes from replayed status.

pub mod context;
pub mod error;
pub mod keys;
pub mod registry;
pub mod status;
pub mod time;
pub mod view;

// Re-export primary types
pub use context::{Clock, Config, Context};
pub use error::{KeyFamilyError, Result};
pub use keys::{
    DeviceId, Fingerprint, GenericKey, IdentityCheck, KeyAlgorithm, KeyBundleParser, KeyRef, Kid,
    LookupKey, NaclBundleParser, NaclKey, SigId,
};
pub use registry::{KeyRegistry, RawKeySet};
pub use status::{
    Delegation, Device, DeviceKind, KeyRole, KeyStatus, KeyStatusStore, Liveness, StatusEvent,
};
pub use time::DualTime;
pub use view::{replay, ChainLink, ChainReplayer, LinkRecord, TrustedKeyView};

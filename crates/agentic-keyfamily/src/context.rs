//! Explicit per-identity context.
//!
//! Everything that would otherwise be ambient process state (who the
//! identity is, which device this process runs as, what "now" means) is
//! carried in a [`Context`] handed to [`crate::view::TrustedKeyView::new`].

use serde::{Deserialize, Serialize};

use crate::error::{KeyFamilyError, Result};
use crate::keys::DeviceId;

/// Source of "now" for the `*_now` query variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Clock {
    /// The host's wall clock.
    #[default]
    System,
    /// A pinned time, in Unix seconds.
    Fixed(i64),
}

impl Clock {
    pub fn now(&self) -> i64 {
        match self {
            Self::System => crate::time::now_unix(),
            Self::Fixed(t) => *t,
        }
    }
}

/// Deserializable configuration for a key family context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Username whose identity claim PGP self-certifications must match.
    #[serde(default)]
    pub username: String,
    /// This process's own provisioned device, if any.
    #[serde(default)]
    pub device_id: Option<DeviceId>,
    #[serde(default)]
    pub clock: Clock,
}

impl Config {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            device_id: None,
            clock: Clock::System,
        }
    }

    pub fn with_device(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| KeyFamilyError::MalformedInput(format!("invalid config: {e}")))
    }
}

/// The context threaded through a view.
#[derive(Debug, Clone)]
pub struct Context {
    config: Config,
}

impl Context {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn username(&self) -> &str {
        &self.config.username
    }

    pub fn device_id(&self) -> Option<&DeviceId> {
        self.config.device_id.as_ref()
    }

    pub fn now(&self) -> i64 {
        self.config.clock.now()
    }
}

mod error;

pub use error::ShoalError;

use std::collections::BTreeSet;
use std::fmt;

pub type Key = String;
pub type Value = Vec<u8>;

/// Identity of a grid member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Address(String);

impl Address {
    pub fn new(name: impl Into<String>) -> Self {
        Address(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Address(value.to_string())
    }
}

/// Behavioural flags carried by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum Flag {
    /// Apply on this member only; never replicate.
    CacheModeLocal,
    /// Put issued on behalf of an external read; never overwrites and never fails loudly.
    PutForExternalRead,
    SkipLocking,
    SkipListenerNotification,
    SkipStatistics,
    /// Set on puts carrying a delta payload.
    DeltaWrite,
    ForceSynchronous,
    ForceAsynchronous,
    ZeroLockAcquisitionTimeout,
}

impl Flag {
    /// Flags that only steer the originating member and are not shipped to peers.
    pub fn is_local_only(self) -> bool {
        matches!(
            self,
            Flag::ForceSynchronous | Flag::ForceAsynchronous | Flag::ZeroLockAcquisitionTimeout
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Flags(BTreeSet<Flag>);

impl Flags {
    pub fn new() -> Self {
        Flags(BTreeSet::new())
    }

    pub fn of(flags: impl IntoIterator<Item = Flag>) -> Self {
        Flags(flags.into_iter().collect())
    }

    pub fn contains(&self, flag: Flag) -> bool {
        self.0.contains(&flag)
    }

    pub fn insert(&mut self, flag: Flag) {
        self.0.insert(flag);
    }

    pub fn with(mut self, flag: Flag) -> Self {
        self.0.insert(flag);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Flag> + '_ {
        self.0.iter().copied()
    }

    /// Copy without the flags that must not travel to other members.
    pub fn remotable(&self) -> Flags {
        Flags(self.0.iter().copied().filter(|f| !f.is_local_only()).collect())
    }
}

/// Per-entry metadata: expiration and an optional caller-supplied version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Metadata {
    pub lifespan_ms: Option<u64>,
    pub max_idle_ms: Option<u64>,
    pub version: Option<u64>,
}

impl Metadata {
    pub fn with_lifespan_ms(mut self, lifespan_ms: u64) -> Self {
        self.lifespan_ms = Some(lifespan_ms);
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AvailabilityMode {
    Available,
    Degraded,
}

impl fmt::Display for AvailabilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AvailabilityMode::Available => f.pad("AVAILABLE"),
            AvailabilityMode::Degraded => f.pad("DEGRADED"),
        }
    }
}

/// Receives every membership view installed by the transport.
pub trait ViewListener: Send + Sync + 'static {
    fn view_changed(&self, view: &[Address]);
}

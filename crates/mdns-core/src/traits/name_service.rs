// # Name Service Trait
//
// Defines the record-group protocol of a local mDNS daemon.
//
// ## Implementations
//
// - Avahi over D-Bus: `mdns-publisher-avahi` crate
//
// ## Protocol
//
// ```text
// create_group() ─► add_record(group, hostname, ttl) ─► commit(group)
//                                                         │
//      reset(group) / free_group(group)  ◄── withdraw ────┘
//
// daemon ── collision (async) ──► CollisionNotice { record } ──► bounded queue
// ```
//
// The engine owns ordering, retries and policy. Implementations translate
// one call into one daemon request and report what happened.

use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

/// Daemon-side handle of a record group
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupHandle(String);

impl GroupHandle {
    /// Wrap an implementation-specific group identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one added record, as used by collision notices
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordId(String);

impl RecordId {
    /// Wrap an implementation-specific record identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of looking up the current owner of a hostname
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Nobody answers for the name
    Available,
    /// The name already resolves to this host
    OwnedBySelf,
    /// Another host answers for the name
    OwnedBy(String),
}

/// Asynchronous notification that a committed record collided
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollisionNotice {
    /// Record that lost the name
    pub record: RecordId,
    /// Daemon-provided detail, if any
    pub reason: String,
}

impl CollisionNotice {
    /// Create a collision notice
    pub fn new(record: RecordId, reason: impl Into<String>) -> Self {
        Self {
            record,
            reason: reason.into(),
        }
    }
}

/// Sending half of the bounded collision queue
pub type CollisionSender = mpsc::Sender<CollisionNotice>;

/// Trait for mDNS daemon implementations
///
/// # Contract
///
/// - One daemon request per call; no retry or backoff (owned by the engine)
/// - Connectivity problems are reported as [`crate::Error::Transport`]
/// - A name already claimed elsewhere is reported as [`crate::Error::Collision`]
/// - Collision notices are pushed with `try_send`; a full queue drops the
///   notice and the engine reconverges on a later tick
#[async_trait]
pub trait NameService: Send + Sync {
    /// Check that the daemon is reachable, reconnecting if needed
    ///
    /// # Returns
    ///
    /// A session number. It changes every time the implementation had to
    /// establish a new connection, which means every group created under an
    /// older session is gone and must be republished.
    async fn ping(&self) -> Result<u64, crate::Error>;

    /// Look up who currently answers for `hostname`
    async fn probe(&self, hostname: &str) -> Result<ProbeOutcome, crate::Error>;

    /// Create a new, empty record group
    async fn create_group(&self) -> Result<GroupHandle, crate::Error>;

    /// Add a record for `hostname` pointing at this host
    ///
    /// # Returns
    ///
    /// - `Ok(RecordId)`: The record was added to the (uncommitted) group
    /// - `Err(Error::Collision)`: The daemon refused the name
    async fn add_record(
        &self,
        group: &GroupHandle,
        hostname: &str,
        ttl: u32,
    ) -> Result<RecordId, crate::Error>;

    /// Publish every record added to the group
    async fn commit(&self, group: &GroupHandle) -> Result<(), crate::Error>;

    /// Withdraw every record of the group
    async fn reset(&self, group: &GroupHandle) -> Result<(), crate::Error>;

    /// Release the group once it is no longer used
    async fn free_group(&self, _group: &GroupHandle) -> Result<(), crate::Error> {
        Ok(())
    }

    /// Hand the implementation the queue for asynchronous collision notices
    ///
    /// Implementations without push notifications can ignore it.
    fn attach_collision_sink(&self, _sink: CollisionSender) {}

    /// Get the name-service name (for logging/debugging)
    fn service_name(&self) -> &'static str;
}

/// Helper trait for constructing name services from configuration
pub trait NameServiceFactory: Send + Sync {
    /// Create a NameService instance from configuration
    fn create(
        &self,
        config: &crate::config::NameServiceConfig,
    ) -> Result<Box<dyn NameService>, crate::Error>;
}

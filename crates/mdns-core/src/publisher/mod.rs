//! Publisher adapter
//!
//! Translates "publish this hostname" and "withdraw that group" into the
//! record-group protocol of a [`NameService`].
//!
//! ## Normal mode
//!
//! ```text
//! probe(hostname) ─┬─ OwnedBy(other) ──► Collided
//!                  ├─ OwnedBySelf ─────► Committed (no group of our own)
//!                  └─ Available ───────► create_group ─► add_record ─► commit ─► Committed
//!                                                           └─ Collision ──────► Collided
//! ```
//!
//! ## Force mode
//!
//! No probe at all: `create_group ─► add_record ─► commit`. This is much
//! faster, but if another host already publishes the name the daemon can end
//! up in an inconsistent state. That hazard is accepted by whoever turns
//! force mode on.

use tracing::{debug, warn};

use crate::error::Result;
use crate::traits::{GroupHandle, NameService, ProbeOutcome, RecordId};

/// What happened to one publication attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The hostname is live
    Committed {
        /// Group holding the record (`None` when the name already resolved to us)
        group: Option<GroupHandle>,
        /// Record identity for collision notices
        record_id: Option<RecordId>,
    },
    /// Someone else holds the hostname
    Collided {
        /// Owner or daemon-provided detail
        reason: String,
    },
}

/// Thin policy layer over a [`NameService`]
pub struct PublisherAdapter<'a> {
    service: &'a dyn NameService,
    ttl: u32,
    force: bool,
}

impl<'a> PublisherAdapter<'a> {
    /// Create an adapter for one tick
    ///
    /// # Parameters
    ///
    /// - `service`: The name-service implementation
    /// - `ttl`: TTL of every record added, in seconds
    /// - `force`: Skip collision probing
    pub fn new(service: &'a dyn NameService, ttl: u32, force: bool) -> Self {
        Self { service, ttl, force }
    }

    /// Whether collision detection is skipped
    pub fn is_forced(&self) -> bool {
        self.force
    }

    /// Publish a hostname, probing first unless forced
    pub async fn publish(&self, hostname: &str) -> Result<PublishOutcome> {
        if self.force {
            return self.add_and_commit(hostname).await;
        }

        let outcome = self.probe(hostname).await?;
        self.publish_probed(hostname, outcome).await
    }

    /// Look up the current owner of a hostname
    pub async fn probe(&self, hostname: &str) -> Result<ProbeOutcome> {
        debug!("Checking for '{}' availability", hostname);
        self.service.probe(hostname).await
    }

    /// Publish a hostname whose probe result is already known
    pub async fn publish_probed(
        &self,
        hostname: &str,
        outcome: ProbeOutcome,
    ) -> Result<PublishOutcome> {
        match outcome {
            ProbeOutcome::OwnedBy(owner) => Ok(PublishOutcome::Collided {
                reason: format!("already owned by {}", owner),
            }),
            ProbeOutcome::OwnedBySelf => {
                warn!("'{}' is already being published by this machine", hostname);
                Ok(PublishOutcome::Committed {
                    group: None,
                    record_id: None,
                })
            }
            ProbeOutcome::Available => self.add_and_commit(hostname).await,
        }
    }

    async fn add_and_commit(&self, hostname: &str) -> Result<PublishOutcome> {
        let group = self.service.create_group().await?;

        let record_id = match self.service.add_record(&group, hostname, self.ttl).await {
            Ok(id) => id,
            Err(err) => return self.abandon(group, err).await,
        };

        if let Err(err) = self.service.commit(&group).await {
            return self.abandon(group, err).await;
        }

        Ok(PublishOutcome::Committed {
            group: Some(group),
            record_id: Some(record_id),
        })
    }

    /// Release a half-built group and turn a collision into an outcome
    async fn abandon(&self, group: GroupHandle, err: crate::Error) -> Result<PublishOutcome> {
        if !err.is_transport() {
            self.discard(&group).await;
        }

        match err {
            crate::Error::Collision { reason, .. } => Ok(PublishOutcome::Collided { reason }),
            other => Err(other),
        }
    }

    /// Withdraw every record of a group
    pub async fn reset(&self, group: &GroupHandle) -> Result<()> {
        self.service.reset(group).await
    }

    /// Release a group that no longer publishes anything
    pub async fn release(&self, group: &GroupHandle) -> Result<()> {
        self.service.free_group(group).await
    }

    /// Best-effort reset and release, used for groups that lost their name
    pub async fn discard(&self, group: &GroupHandle) {
        if let Err(err) = self.service.reset(group).await {
            debug!("Failed to reset group {}: {}", group, err);
        }
        if let Err(err) = self.service.free_group(group).await {
            debug!("Failed to free group {}: {}", group, err);
        }
    }
}

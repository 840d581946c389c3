//! Reconciler
//!
//! Diffs the [`DesiredSet`] of a tick against the [`PublicationState`] and
//! drives the publisher adapter until the two agree.
//!
//! ## Ordering
//!
//! Within one tick the order of protocol calls is fixed: removals first,
//! then additions, each sorted by hostname. Removing first keeps the window
//! in which a renamed hostname is claimed twice as short as possible.
//!
//! ## Failure policy
//!
//! - Collision: the record becomes `Collided` and is retried on later ticks,
//!   at most `max_collision_retries` times; after that it is held and only
//!   re-probed until the competing record disappears.
//! - Transport failure: the remaining calls of the tick are skipped, the
//!   failing record keeps its previous state, and everything is retried on
//!   the next tick.

use tracing::{debug, error, warn};

use crate::config::{EngineConfig, PublishConfig};
use crate::desired::DesiredSet;
use crate::error::Result;
use crate::publisher::{PublishOutcome, PublisherAdapter};
use crate::state::{PublicationState, PublishedRecord, RecordState};
use crate::traits::{CollisionNotice, NameService, ProbeOutcome};

/// Difference between desired and published hostnames
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationResult {
    /// Desired hostnames that are not live (absent, collided, pending or withdrawn)
    pub to_add: Vec<String>,
    /// Tracked hostnames that are no longer desired (reset policy only)
    pub to_remove: Vec<String>,
    /// Desired hostnames that are already committed
    pub unchanged: Vec<String>,
}

impl ReconciliationResult {
    /// Whether the tick has nothing to do
    pub fn is_noop(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Compute the difference between desired and published hostnames
///
/// # Parameters
///
/// - `desired`: Hostnames wanted on this tick
/// - `state`: Records believed published
/// - `reset`: Whether stale records are withdrawn
pub fn plan(desired: &DesiredSet, state: &PublicationState, reset: bool) -> ReconciliationResult {
    let mut result = ReconciliationResult::default();

    for hostname in desired.hostnames() {
        match state.get(hostname) {
            Some(record) if record.is_committed() => result.unchanged.push(hostname.to_string()),
            _ => result.to_add.push(hostname.to_string()),
        }
    }

    if reset {
        result.to_remove = state
            .hostnames()
            .filter(|hostname| !desired.contains(hostname))
            .map(str::to_string)
            .collect();
    }

    result
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tick number
    pub tick: u64,
    /// The plan that was executed
    pub plan: ReconciliationResult,
    /// Hostnames committed on this tick
    pub committed: Vec<String>,
    /// Hostnames that collided on this tick (including held ones still taken)
    pub collided: Vec<String>,
    /// Hostnames withdrawn on this tick
    pub withdrawn: Vec<String>,
    /// Never-published hostnames dropped from the state without protocol calls
    pub forgotten: Vec<String>,
    /// Hostnames whose publication failed for a non-transport reason
    pub failed: Vec<String>,
    /// Set when a transport failure cut the tick short
    pub aborted: Option<String>,
}

/// Policy holder driving the publisher adapter
#[derive(Debug, Clone)]
pub struct Reconciler {
    ttl: u32,
    force: bool,
    reset: bool,
    max_collision_retries: u32,
}

impl Reconciler {
    /// Create a reconciler from the publication policy
    pub fn new(publish: &PublishConfig, engine: &EngineConfig) -> Self {
        Self {
            ttl: publish.ttl_secs,
            force: publish.force,
            reset: publish.reset,
            max_collision_retries: engine.max_collision_retries,
        }
    }

    /// Compute the plan of a tick with this reconciler's reset policy
    pub fn plan(&self, desired: &DesiredSet, state: &PublicationState) -> ReconciliationResult {
        plan(desired, state, self.reset)
    }

    /// Apply the collision notices received since the previous tick
    ///
    /// Committed records named by a notice become `Collided` and their group
    /// is released. Force mode ignores notices.
    pub async fn apply_collisions(
        &self,
        mut state: PublicationState,
        notices: Vec<CollisionNotice>,
        service: &dyn NameService,
    ) -> PublicationState {
        let adapter = PublisherAdapter::new(service, self.ttl, self.force);

        for notice in notices {
            let Some(hostname) = state.find_by_record(&notice.record).map(str::to_string) else {
                debug!("Ignoring collision notice for unknown record {}", notice.record);
                continue;
            };

            if adapter.is_forced() {
                debug!("Force mode: ignoring collision notice for {}", hostname);
                continue;
            }

            let Some(mut record) = state.remove(&hostname) else {
                continue;
            };
            if !record.is_committed() {
                state.upsert(record);
                continue;
            }

            warn!("Lost '{}' to a collision: {}", hostname, notice.reason);
            if let Some(group) = record.group.take() {
                adapter.discard(&group).await;
            }
            record.record_id = None;
            record.collision_attempts += 1;
            record.transition(RecordState::Collided);
            state.upsert(record);
        }

        state
    }

    /// Run one reconciliation pass
    ///
    /// The state is moved in and handed back together with the report; it is
    /// never shared while the pass runs.
    pub async fn reconcile(
        &self,
        mut state: PublicationState,
        desired: &DesiredSet,
        service: &dyn NameService,
        tick: u64,
    ) -> (PublicationState, TickReport) {
        let plan = self.plan(desired, &state);
        let adapter = PublisherAdapter::new(service, self.ttl, self.force);
        let mut report = TickReport {
            tick,
            plan: plan.clone(),
            ..Default::default()
        };

        if !self.reset {
            report.forgotten = forget_unpublished(&mut state, desired);
        }

        for hostname in &plan.to_remove {
            match self.withdraw(&adapter, &mut state, hostname).await {
                Ok(()) => report.withdrawn.push(hostname.clone()),
                Err(err) => {
                    warn!("Failed to withdraw '{}': {}", hostname, err);
                    report.aborted = Some(err.to_string());
                    return (state, report);
                }
            }
        }

        for hostname in &plan.to_add {
            match self.publish(&adapter, &mut state, hostname, tick).await {
                Ok(Some(RecordState::Committed)) => report.committed.push(hostname.clone()),
                Ok(Some(_)) => report.collided.push(hostname.clone()),
                Ok(None) => report.failed.push(hostname.clone()),
                Err(err) => {
                    warn!("Failed to publish '{}': {}", hostname, err);
                    report.aborted = Some(err.to_string());
                    return (state, report);
                }
            }
        }

        (state, report)
    }

    /// Withdraw every tracked record (shutdown path)
    ///
    /// Works on a borrowed state so that progress survives if the caller
    /// cancels this future on timeout.
    ///
    /// # Returns
    ///
    /// Number of hostnames withdrawn.
    pub async fn withdraw_all(
        &self,
        state: &mut PublicationState,
        service: &dyn NameService,
    ) -> Result<usize> {
        let adapter = PublisherAdapter::new(service, self.ttl, self.force);
        let hostnames: Vec<String> = state.hostnames().map(str::to_string).collect();

        let mut withdrawn = 0;
        for hostname in hostnames {
            self.withdraw(&adapter, state, &hostname).await?;
            withdrawn += 1;
        }

        Ok(withdrawn)
    }

    /// Withdraw one hostname
    ///
    /// Only transport failures are returned; a daemon that no longer knows
    /// the group is treated as already withdrawn.
    async fn withdraw(
        &self,
        adapter: &PublisherAdapter<'_>,
        state: &mut PublicationState,
        hostname: &str,
    ) -> Result<()> {
        let Some(mut record) = state.get(hostname).cloned() else {
            return Ok(());
        };

        if let Some(group) = record.group.clone() {
            if record.state != RecordState::Withdrawn {
                match adapter.reset(&group).await {
                    Ok(()) => {
                        record.transition(RecordState::Withdrawn);
                        state.upsert(record.clone());
                    }
                    Err(err) if err.is_transport() => return Err(err),
                    Err(err) => warn!(
                        "Daemon refused to reset group of '{}' ({}), forgetting it",
                        hostname, err
                    ),
                }
            }

            if let Err(err) = adapter.release(&group).await {
                if err.is_transport() {
                    return Err(err);
                }
                debug!("Failed to free group of '{}': {}", hostname, err);
            }
        }

        state.remove(hostname);
        debug!("Withdrew '{}'", hostname);
        Ok(())
    }

    /// Publish one hostname
    ///
    /// # Returns
    ///
    /// - `Ok(Some(state))`: the record's new state
    /// - `Ok(None)`: the daemon rejected the request for another reason;
    ///   the record stays pending and is retried next tick
    /// - `Err(_)`: transport failure, the previous state was restored
    async fn publish(
        &self,
        adapter: &PublisherAdapter<'_>,
        state: &mut PublicationState,
        hostname: &str,
        tick: u64,
    ) -> Result<Option<RecordState>> {
        let previous = state.get(hostname).cloned();
        let mut record = previous
            .clone()
            .unwrap_or_else(|| PublishedRecord::pending(hostname, self.ttl, tick));

        if let Some(stale) = record.group.take() {
            adapter.discard(&stale).await;
            record.record_id = None;
        }

        let held = !self.force
            && record.state == RecordState::Collided
            && record.collision_attempts > self.max_collision_retries;
        let collided_since = record.updated_at;

        record.ttl = self.ttl;
        record.transition(RecordState::Pending);
        state.upsert(record.clone());

        let attempt = if held {
            match adapter.probe(hostname).await {
                Ok(ProbeOutcome::Available) => {
                    debug!("'{}' is free again, publishing", hostname);
                    adapter
                        .publish_probed(hostname, ProbeOutcome::Available)
                        .await
                }
                Ok(_) => {
                    debug!(
                        "'{}' is still held by another host (since {})",
                        hostname,
                        collided_since.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                    record.state = RecordState::Collided;
                    record.updated_at = collided_since;
                    state.upsert(record);
                    return Ok(Some(RecordState::Collided));
                }
                Err(err) => Err(err),
            }
        } else {
            adapter.publish(hostname).await
        };

        match attempt {
            Ok(PublishOutcome::Committed { group, record_id }) => {
                debug!("Published '{}' (ttl {}s)", hostname, self.ttl);
                record.group = group;
                record.record_id = record_id;
                record.collision_attempts = 0;
                record.transition(RecordState::Committed);
                state.upsert(record);
                Ok(Some(RecordState::Committed))
            }
            Ok(PublishOutcome::Collided { reason }) => {
                record.collision_attempts += 1;
                if record.collision_attempts > self.max_collision_retries {
                    warn!(
                        "'{}' collided {} times ({}), holding it until the name is free",
                        hostname, record.collision_attempts, reason
                    );
                } else {
                    warn!(
                        "Cannot publish '{}': {} (attempt {}/{})",
                        hostname,
                        reason,
                        record.collision_attempts,
                        self.max_collision_retries + 1
                    );
                }
                record.transition(RecordState::Collided);
                state.upsert(record);
                Ok(Some(RecordState::Collided))
            }
            Err(err) if err.is_transport() => {
                match previous {
                    Some(mut prior) => {
                        // The stale group was already discarded above.
                        prior.group = None;
                        prior.record_id = None;
                        state.upsert(prior);
                    }
                    None => {
                        state.remove(hostname);
                    }
                }
                Err(err)
            }
            Err(err) => {
                error!("Failed to publish '{}': {}", hostname, err);
                Ok(None)
            }
        }
    }
}

/// Drop records that are neither desired nor live in the daemon
fn forget_unpublished(state: &mut PublicationState, desired: &DesiredSet) -> Vec<String> {
    let stale: Vec<String> = state
        .all()
        .filter(|record| !desired.contains(&record.hostname))
        .filter(|record| {
            record.group.is_none()
                && matches!(record.state, RecordState::Collided | RecordState::Pending)
        })
        .map(|record| record.hostname.clone())
        .collect();

    for hostname in &stale {
        state.remove(hostname);
        debug!("Forgot unpublished '{}'", hostname);
    }

    stale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::extract_claims;
    use crate::traits::ContainerSnapshot;

    fn desired(hosts: &[&str]) -> DesiredSet {
        let statics: Vec<String> = hosts.iter().map(|h| h.to_string()).collect();
        DesiredSet::build(&[], &statics)
    }

    fn record(hostname: &str, state: RecordState) -> PublishedRecord {
        let mut record = PublishedRecord::pending(hostname, 60, 1);
        record.transition(state);
        record
    }

    #[test]
    fn committed_records_are_unchanged() {
        let mut state = PublicationState::new();
        state.upsert(record("a.local", RecordState::Committed));

        let result = plan(&desired(&["a.local", "b.local"]), &state, true);
        assert_eq!(result.to_add, vec!["b.local"]);
        assert_eq!(result.unchanged, vec!["a.local"]);
        assert!(result.to_remove.is_empty());
    }

    #[test]
    fn collided_and_pending_records_are_retried() {
        let mut state = PublicationState::new();
        state.upsert(record("dup.local", RecordState::Collided));
        state.upsert(record("half.local", RecordState::Pending));

        let result = plan(&desired(&["dup.local", "half.local"]), &state, false);
        assert_eq!(result.to_add, vec!["dup.local", "half.local"]);
    }

    #[test]
    fn stale_records_are_removed_only_with_reset() {
        let mut state = PublicationState::new();
        state.upsert(record("gone.local", RecordState::Committed));

        let with_reset = plan(&desired(&[]), &state, true);
        assert_eq!(with_reset.to_remove, vec!["gone.local"]);

        let without_reset = plan(&desired(&[]), &state, false);
        assert!(without_reset.to_remove.is_empty());
        assert!(without_reset.is_noop());
    }

    #[test]
    fn plan_uses_container_claims() {
        let extraction = extract_claims(
            &ContainerSnapshot::new(
                "c1",
                "web",
                [("traefik.http.routers.web.rule", "Host(`app.local`)")],
            ),
            true,
        );
        let set = DesiredSet::build(&[extraction], &[]);

        let result = plan(&set, &PublicationState::new(), false);
        assert_eq!(result.to_add, vec!["app.local"]);
    }

    #[test]
    fn never_published_stale_records_are_forgotten() {
        let mut state = PublicationState::new();
        state.upsert(record("lost.local", RecordState::Collided));
        state.upsert(record("live.local", RecordState::Committed));

        let forgotten = forget_unpublished(&mut state, &desired(&[]));
        assert_eq!(forgotten, vec!["lost.local"]);
        assert!(state.get("live.local").is_some());
    }
}

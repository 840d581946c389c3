//! Test doubles and common utilities for contract tests
//!
//! The doubles record every call they receive so tests can assert on the
//! exact protocol traffic a tick produced.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mdns_core::config::{EngineConfig, MdnsConfig, PublishConfig};
use mdns_core::error::{Error, Result};
use mdns_core::traits::{
    CollisionNotice, CollisionSender, ContainerSnapshot, ContainerSource, GroupHandle,
    NameService, ProbeOutcome, RecordId,
};

/// A container source returning whatever the test put into it
pub struct StaticContainerSource {
    containers: Arc<Mutex<Vec<ContainerSnapshot>>>,
    failing: Arc<AtomicBool>,
    list_call_count: Arc<AtomicUsize>,
}

impl StaticContainerSource {
    pub fn new(containers: Vec<ContainerSnapshot>) -> Self {
        Self {
            containers: Arc::new(Mutex::new(containers)),
            failing: Arc::new(AtomicBool::new(false)),
            list_call_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a source that shares its containers and counters with another
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            containers: Arc::clone(&other.containers),
            failing: Arc::clone(&other.failing),
            list_call_count: Arc::clone(&other.list_call_count),
        }
    }

    /// Replace the running containers
    pub fn set_containers(&self, containers: Vec<ContainerSnapshot>) {
        *self.containers.lock().unwrap() = containers;
    }

    /// Make `list_containers` fail with a transport error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn list_call_count(&self) -> usize {
        self.list_call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ContainerSource for StaticContainerSource {
    async fn list_containers(&self) -> Result<Vec<ContainerSnapshot>> {
        self.list_call_count.fetch_add(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::transport("container engine unreachable"));
        }

        Ok(self.containers.lock().unwrap().clone())
    }

    fn source_name(&self) -> &'static str {
        "static"
    }
}

/// A fake mDNS daemon that tracks calls and group contents
pub struct MockNameService {
    /// Every protocol call, in order (`"probe:a.local"`, `"reset:/group/1"`, ...)
    calls: Arc<Mutex<Vec<String>>>,
    /// Group → hostname added to it
    groups: Arc<Mutex<BTreeMap<String, Option<String>>>>,
    /// Groups whose records are live
    committed: Arc<Mutex<BTreeSet<String>>>,
    /// Hostname → TTL of the last add
    ttls: Arc<Mutex<HashMap<String, u32>>>,
    /// Hostname → owner reported by `probe`
    owners: Arc<Mutex<HashMap<String, ProbeOutcome>>>,
    /// Hostnames whose `add_record` reports a collision
    add_collisions: Arc<Mutex<BTreeSet<String>>>,
    /// Hostnames whose `add_record` fails with a transport error
    add_transport_failures: Arc<Mutex<BTreeSet<String>>>,
    /// Every call fails with a transport error
    unreachable: Arc<AtomicBool>,
    /// Delay applied to `reset`
    reset_delay: Arc<Mutex<Option<Duration>>>,
    session: Arc<AtomicU64>,
    next_group: Arc<AtomicUsize>,
    sink: Arc<Mutex<Option<CollisionSender>>>,
}

impl MockNameService {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            groups: Arc::new(Mutex::new(BTreeMap::new())),
            committed: Arc::new(Mutex::new(BTreeSet::new())),
            ttls: Arc::new(Mutex::new(HashMap::new())),
            owners: Arc::new(Mutex::new(HashMap::new())),
            add_collisions: Arc::new(Mutex::new(BTreeSet::new())),
            add_transport_failures: Arc::new(Mutex::new(BTreeSet::new())),
            unreachable: Arc::new(AtomicBool::new(false)),
            reset_delay: Arc::new(Mutex::new(None)),
            session: Arc::new(AtomicU64::new(1)),
            next_group: Arc::new(AtomicUsize::new(1)),
            sink: Arc::new(Mutex::new(None)),
        }
    }

    /// Create a mock that shares every counter and setting with another
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            calls: Arc::clone(&other.calls),
            groups: Arc::clone(&other.groups),
            committed: Arc::clone(&other.committed),
            ttls: Arc::clone(&other.ttls),
            owners: Arc::clone(&other.owners),
            add_collisions: Arc::clone(&other.add_collisions),
            add_transport_failures: Arc::clone(&other.add_transport_failures),
            unreachable: Arc::clone(&other.unreachable),
            reset_delay: Arc::clone(&other.reset_delay),
            session: Arc::clone(&other.session),
            next_group: Arc::clone(&other.next_group),
            sink: Arc::clone(&other.sink),
        }
    }

    /// Every protocol call so far
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls whose log entry starts with `prefix` (e.g. `"probe"`)
    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.split(':').next() == Some(prefix))
            .count()
    }

    /// Hostnames live in the daemon, sorted
    pub fn published(&self) -> Vec<String> {
        let committed = self.committed.lock().unwrap();
        let groups = self.groups.lock().unwrap();
        let mut hosts: Vec<String> = committed
            .iter()
            .filter_map(|group| groups.get(group).cloned().flatten())
            .collect();
        hosts.sort();
        hosts
    }

    pub fn ttl_of(&self, hostname: &str) -> Option<u32> {
        self.ttls.lock().unwrap().get(hostname).copied()
    }

    /// Make `probe` report an owner for a hostname
    pub fn set_owner(&self, hostname: &str, outcome: ProbeOutcome) {
        self.owners
            .lock()
            .unwrap()
            .insert(hostname.to_string(), outcome);
    }

    pub fn clear_owner(&self, hostname: &str) {
        self.owners.lock().unwrap().remove(hostname);
    }

    pub fn set_add_collision(&self, hostname: &str, collide: bool) {
        let mut set = self.add_collisions.lock().unwrap();
        if collide {
            set.insert(hostname.to_string());
        } else {
            set.remove(hostname);
        }
    }

    pub fn set_add_transport_failure(&self, hostname: &str, fail: bool) {
        let mut set = self.add_transport_failures.lock().unwrap();
        if fail {
            set.insert(hostname.to_string());
        } else {
            set.remove(hostname);
        }
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_reset_delay(&self, delay: Duration) {
        *self.reset_delay.lock().unwrap() = Some(delay);
    }

    /// Simulate a daemon restart: every group is lost and the session changes
    pub fn restart(&self) {
        self.groups.lock().unwrap().clear();
        self.committed.lock().unwrap().clear();
        self.session.fetch_add(1, Ordering::SeqCst);
    }

    /// Push a collision notice for the group publishing `hostname`
    pub fn notify_collision(&self, hostname: &str) -> bool {
        let group = {
            let groups = self.groups.lock().unwrap();
            groups
                .iter()
                .find(|(_, host)| host.as_deref() == Some(hostname))
                .map(|(group, _)| group.clone())
        };

        let Some(group) = group else {
            return false;
        };

        let sink = self.sink.lock().unwrap();
        match sink.as_ref() {
            Some(sink) => sink
                .try_send(CollisionNotice::new(
                    record_id(&group, hostname),
                    "conflicting record on the network",
                ))
                .is_ok(),
            None => false,
        }
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::transport("daemon not reachable"));
        }
        Ok(())
    }
}

fn record_id(group: &str, hostname: &str) -> RecordId {
    RecordId::new(format!("{}/{}", group, hostname))
}

#[async_trait::async_trait]
impl NameService for MockNameService {
    async fn ping(&self) -> Result<u64> {
        self.check_reachable()?;
        Ok(self.session.load(Ordering::SeqCst))
    }

    async fn probe(&self, hostname: &str) -> Result<ProbeOutcome> {
        self.log(format!("probe:{}", hostname));
        self.check_reachable()?;

        Ok(self
            .owners
            .lock()
            .unwrap()
            .get(hostname)
            .cloned()
            .unwrap_or(ProbeOutcome::Available))
    }

    async fn create_group(&self) -> Result<GroupHandle> {
        self.log("create".to_string());
        self.check_reachable()?;

        let id = format!("/group/{}", self.next_group.fetch_add(1, Ordering::SeqCst));
        self.groups.lock().unwrap().insert(id.clone(), None);
        Ok(GroupHandle::new(id))
    }

    async fn add_record(&self, group: &GroupHandle, hostname: &str, ttl: u32) -> Result<RecordId> {
        self.log(format!("add:{}", hostname));
        self.check_reachable()?;

        if self.add_transport_failures.lock().unwrap().contains(hostname) {
            return Err(Error::transport("connection reset by daemon"));
        }
        if self.add_collisions.lock().unwrap().contains(hostname) {
            return Err(Error::collision(hostname, "local name collision"));
        }

        self.groups
            .lock()
            .unwrap()
            .insert(group.as_str().to_string(), Some(hostname.to_string()));
        self.ttls.lock().unwrap().insert(hostname.to_string(), ttl);
        Ok(record_id(group.as_str(), hostname))
    }

    async fn commit(&self, group: &GroupHandle) -> Result<()> {
        self.log(format!("commit:{}", group));
        self.check_reachable()?;

        self.committed
            .lock()
            .unwrap()
            .insert(group.as_str().to_string());
        Ok(())
    }

    async fn reset(&self, group: &GroupHandle) -> Result<()> {
        self.log(format!("reset:{}", group));

        let delay = *self.reset_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_reachable()?;

        self.committed.lock().unwrap().remove(group.as_str());
        if let Some(host) = self.groups.lock().unwrap().get_mut(group.as_str()) {
            *host = None;
        }
        Ok(())
    }

    async fn free_group(&self, group: &GroupHandle) -> Result<()> {
        self.log(format!("free:{}", group));
        self.check_reachable()?;

        self.committed.lock().unwrap().remove(group.as_str());
        self.groups.lock().unwrap().remove(group.as_str());
        Ok(())
    }

    fn attach_collision_sink(&self, sink: CollisionSender) {
        *self.sink.lock().unwrap() = Some(sink);
    }

    fn service_name(&self) -> &'static str {
        "mock"
    }
}

/// A container with arbitrary labels
pub fn container(id: &str, labels: &[(&str, &str)]) -> ContainerSnapshot {
    ContainerSnapshot::new(id, format!("container-{}", id), labels.iter().copied())
}

/// A container routed to one hostname with a current-syntax rule
pub fn routed_container(id: &str, hostname: &str) -> ContainerSnapshot {
    let rule = format!("Host(`{}`)", hostname);
    container(id, &[("traefik.http.routers.web.rule", rule.as_str())])
}

/// Create a minimal configuration for testing
pub fn minimal_config() -> MdnsConfig {
    MdnsConfig {
        publish: PublishConfig {
            wait_secs: 1,
            ..PublishConfig::default()
        },
        engine: EngineConfig {
            event_channel_capacity: 100,
            shutdown_timeout_secs: 2,
            ..EngineConfig::default()
        },
        ..MdnsConfig::new()
    }
}

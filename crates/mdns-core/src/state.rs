// # Publication State
//
// The engine's belief of what is currently live in the name-service daemon.
//
// This is a plain owned value: the engine moves it into the reconciler at
// every tick and gets it back afterwards. There is no global instance and
// no I/O here.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::traits::{GroupHandle, RecordId};

/// Lifecycle of one published hostname
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordState {
    /// Publication started but not confirmed yet
    Pending,
    /// The daemon accepted and committed the record
    Committed,
    /// Someone else holds the name
    Collided,
    /// The daemon no longer publishes the record but its group is not released yet
    Withdrawn,
}

/// One hostname the engine published (or tried to)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedRecord {
    /// Published hostname
    pub hostname: String,
    /// Record TTL in seconds
    pub ttl: u32,
    /// Current state
    pub state: RecordState,
    /// Tick on which the record was first created
    pub created_tick: u64,
    /// Daemon-side group, if one was created
    pub group: Option<GroupHandle>,
    /// Record identity reported by the daemon
    pub record_id: Option<RecordId>,
    /// Collisions seen since the last successful publication
    pub collision_attempts: u32,
    /// Time of the last state change
    pub updated_at: DateTime<Utc>,
}

impl PublishedRecord {
    /// A fresh record in `Pending` state
    pub fn pending(hostname: impl Into<String>, ttl: u32, tick: u64) -> Self {
        Self {
            hostname: hostname.into(),
            ttl,
            state: RecordState::Pending,
            created_tick: tick,
            group: None,
            record_id: None,
            collision_attempts: 0,
            updated_at: Utc::now(),
        }
    }

    /// Change state and stamp the time
    pub fn transition(&mut self, state: RecordState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    /// Whether the record is live in the daemon as far as we know
    pub fn is_committed(&self) -> bool {
        self.state == RecordState::Committed
    }
}

/// Hostname → record map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicationState {
    records: BTreeMap<String, PublishedRecord>,
}

impl PublicationState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a hostname
    pub fn get(&self, hostname: &str) -> Option<&PublishedRecord> {
        self.records.get(hostname)
    }

    /// Insert or replace the record of its hostname
    ///
    /// # Returns
    ///
    /// The previous record of that hostname, if any.
    pub fn upsert(&mut self, record: PublishedRecord) -> Option<PublishedRecord> {
        self.records.insert(record.hostname.clone(), record)
    }

    /// Forget a hostname
    pub fn remove(&mut self, hostname: &str) -> Option<PublishedRecord> {
        self.records.remove(hostname)
    }

    /// Every record, sorted by hostname
    pub fn all(&self) -> impl Iterator<Item = &PublishedRecord> {
        self.records.values()
    }

    /// Every hostname, sorted
    pub fn hostnames(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Hostname owning the given record identity
    pub fn find_by_record(&self, record: &RecordId) -> Option<&str> {
        self.records
            .values()
            .find(|r| r.record_id.as_ref() == Some(record))
            .map(|r| r.hostname.as_str())
    }

    /// Number of records in the given state
    pub fn count_in(&self, state: RecordState) -> usize {
        self.records.values().filter(|r| r.state == state).count()
    }

    /// Number of tracked hostnames
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

//! Desired-state aggregation
//!
//! Merges the claims of every container of one tick, plus the statically
//! configured hostnames, into a [`DesiredSet`] with at most one claim per
//! hostname.
//!
//! Conflict resolution is deterministic and independent of listing order:
//! static configuration wins over any container, otherwise the lowest
//! container identifier wins. Every conflict is logged and reported.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::labels::{DomainClaim, Extraction};

/// Two or more owners claimed the same hostname
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// Contested hostname
    pub hostname: String,
    /// Owner that keeps the hostname (`None` = static configuration)
    pub winner: Option<String>,
    /// Containers whose claim was dropped, sorted
    pub losers: Vec<String>,
}

/// Hostnames wanted on this tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredSet {
    claims: BTreeMap<String, DomainClaim>,
    conflicts: Vec<Conflict>,
}

impl DesiredSet {
    /// Build the desired set of one tick
    ///
    /// # Parameters
    ///
    /// - `extractions`: Output of the label extractor for every container
    /// - `static_domains`: Configured hostnames (always accepted)
    pub fn build(extractions: &[Extraction], static_domains: &[String]) -> Self {
        let mut candidates: BTreeMap<String, Vec<DomainClaim>> = BTreeMap::new();

        for hostname in static_domains {
            candidates
                .entry(hostname.clone())
                .or_default()
                .push(DomainClaim::from_static(hostname.clone()));
        }

        for extraction in extractions {
            for claim in &extraction.claims {
                candidates
                    .entry(claim.hostname.clone())
                    .or_default()
                    .push(claim.clone());
            }
        }

        let mut set = DesiredSet::default();
        for (hostname, mut claims) in candidates {
            // `None` (static) sorts before every container id.
            claims.sort_by(|a, b| a.container_id.cmp(&b.container_id));
            let winner = claims.remove(0);

            let losers: Vec<String> = claims
                .iter()
                .filter(|c| c.container_id != winner.container_id)
                .filter_map(|c| c.container_id.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();

            if !losers.is_empty() {
                warn!(
                    "Hostname {} claimed by several owners; keeping {}, ignoring {}",
                    hostname,
                    winner.owner(),
                    losers.join(", ")
                );
                set.conflicts.push(Conflict {
                    hostname: hostname.clone(),
                    winner: winner.container_id.clone(),
                    losers,
                });
            }

            set.claims.insert(hostname, winner);
        }

        set
    }

    /// The resolved claim for a hostname
    pub fn get(&self, hostname: &str) -> Option<&DomainClaim> {
        self.claims.get(hostname)
    }

    /// Whether the hostname is wanted
    pub fn contains(&self, hostname: &str) -> bool {
        self.claims.contains_key(hostname)
    }

    /// Wanted hostnames, sorted
    pub fn hostnames(&self) -> impl Iterator<Item = &str> {
        self.claims.keys().map(String::as_str)
    }

    /// Resolved claims, sorted by hostname
    pub fn claims(&self) -> impl Iterator<Item = &DomainClaim> {
        self.claims.values()
    }

    /// Conflicts found while building the set
    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    /// Number of wanted hostnames
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    /// Whether nothing is wanted
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

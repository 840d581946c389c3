// # Container Source Trait
//
// Defines the read-only interface used to enumerate running containers
// and their labels.
//
// ## Implementations
//
// - Docker Engine API: `mdns-source-docker` crate
// - Future: Podman, containerd
//
// ## Usage
//
// ```rust,ignore
// use mdns_core::ContainerSource;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let source = /* ContainerSource implementation */;
//
//     for container in source.list_containers().await? {
//         println!("{} has {} labels", container.name, container.labels.len());
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use std::collections::BTreeMap;

/// One container as seen by a single scan tick
///
/// Snapshots are rebuilt on every tick and never carried over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSnapshot {
    /// Container identifier (used for deterministic conflict resolution)
    pub id: String,
    /// Human-readable container name
    pub name: String,
    /// Label key → value, ordered by key
    pub labels: BTreeMap<String, String>,
}

impl ContainerSnapshot {
    /// Create a snapshot from any iterable of label pairs
    pub fn new<I, K, V>(id: impl Into<String>, name: impl Into<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Trait for container listing implementations
///
/// # Contract
///
/// - Read-only: implementations never start, stop or modify containers
/// - Single-shot: one listing per call, no caching between ticks
/// - No retry logic: return [`crate::Error::Transport`] when the runtime
///   is unreachable and the engine will try again on the next tick
#[async_trait]
pub trait ContainerSource: Send + Sync {
    /// List the currently running containers with their labels
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<ContainerSnapshot>)`: Running containers, in any order
    /// - `Err(Error::Transport)`: The container runtime could not be reached
    async fn list_containers(&self) -> Result<Vec<ContainerSnapshot>, crate::Error>;

    /// Get the source name (for logging/debugging)
    fn source_name(&self) -> &'static str;
}

/// Helper trait for constructing container sources from configuration
pub trait ContainerSourceFactory: Send + Sync {
    /// Create a ContainerSource instance from configuration
    fn create(
        &self,
        config: &crate::config::SourceConfig,
    ) -> Result<Box<dyn ContainerSource>, crate::Error>;
}

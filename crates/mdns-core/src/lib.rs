// # mdns-core
//
// Core library for publishing container hostnames over mDNS.
//
// ## Architecture Overview
//
// - **ContainerSource**: Trait for listing running containers and their labels
// - **NameService**: Trait for the record-group protocol of the local mDNS daemon
// - **labels**: Routing-rule and custom-label parsing into hostname claims
// - **DesiredSet**: Per-tick aggregation with deterministic conflict resolution
// - **Reconciler**: Diff of desired vs. published hostnames, driving the publisher
// - **ScanEngine**: Periodic scan loop with graceful withdrawal on shutdown
// - **ComponentRegistry**: Plugin-based registry for sources and name services
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Parsing and reconciliation know nothing about Docker or D-Bus
// 2. **Plugin-Based**: Implementations register factories, no hard-coded if-else
// 3. **Library-First**: All core functionality can be used as a library
// 4. **Idempotency**: An unchanged container set causes no protocol calls

pub mod config;
pub mod desired;
pub mod engine;
pub mod error;
pub mod labels;
pub mod publisher;
pub mod reconciler;
pub mod registry;
pub mod state;
pub mod traits;

// Re-export core types for convenience
pub use config::{EngineConfig, MdnsConfig, NameServiceConfig, PublishConfig, SourceConfig};
pub use desired::{Conflict, DesiredSet};
pub use engine::{EngineEvent, LoopState, ScanEngine};
pub use error::{Error, Result};
pub use labels::{DomainClaim, Extraction, ParsedRule, Provenance, RuleGeneration};
pub use publisher::{PublishOutcome, PublisherAdapter};
pub use reconciler::{ReconciliationResult, Reconciler, TickReport};
pub use registry::ComponentRegistry;
pub use state::{PublicationState, PublishedRecord, RecordState};
pub use traits::{ContainerSnapshot, ContainerSource, NameService};

//! Collaborator traits for the mDNS publication engine
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`ContainerSource`]: Enumerate running containers and their labels
//! - [`NameService`]: Publish and withdraw records in the local mDNS daemon

pub mod container_source;
pub mod name_service;

pub use container_source::{ContainerSnapshot, ContainerSource, ContainerSourceFactory};
pub use name_service::{
    CollisionNotice, CollisionSender, GroupHandle, NameService, NameServiceFactory, ProbeOutcome,
    RecordId,
};

//! Contract Test: Reset Semantics
//!
//! Constraints verified:
//! - With reset, a hostname whose owner disappeared is withdrawn on the next tick
//! - Without reset, it stays published
//! - Removals are issued before additions within one tick
//!
//! If this test fails, stale hostnames leak (or vanish) unexpectedly.

mod common;

use common::*;
use mdns_core::state::RecordState;
use mdns_core::ScanEngine;

fn engine_with_reset(
    reset: bool,
    source: &StaticContainerSource,
    service: &MockNameService,
) -> ScanEngine {
    let mut config = minimal_config();
    config.publish.reset = reset;

    let (engine, _events) = ScanEngine::new(
        Box::new(StaticContainerSource::sharing_counters_with(source)),
        Box::new(MockNameService::sharing_counters_with(service)),
        config,
    )
    .expect("engine construction succeeds");

    engine
}

#[tokio::test]
async fn reset_withdraws_hostnames_of_removed_containers() {
    let source = StaticContainerSource::new(vec![routed_container("c1", "gone.local")]);
    let service = MockNameService::new();
    let mut engine = engine_with_reset(true, &source, &service);

    engine.tick().await;
    assert_eq!(service.published(), vec!["gone.local"]);

    source.set_containers(Vec::new());
    let report = engine.tick().await;

    assert_eq!(report.plan.to_remove, vec!["gone.local"]);
    assert_eq!(report.withdrawn, vec!["gone.local"]);
    assert!(engine.state().is_empty());
    assert!(service.published().is_empty());
    assert_eq!(service.count("reset"), 1);
    assert_eq!(service.count("free"), 1);
}

#[tokio::test]
async fn without_reset_hostnames_stay_published() {
    let source = StaticContainerSource::new(vec![routed_container("c1", "sticky.local")]);
    let service = MockNameService::new();
    let mut engine = engine_with_reset(false, &source, &service);

    engine.tick().await;

    source.set_containers(Vec::new());
    let report = engine.tick().await;

    assert!(report.plan.to_remove.is_empty());
    assert_eq!(
        engine.state().get("sticky.local").map(|r| r.state),
        Some(RecordState::Committed)
    );
    assert_eq!(service.published(), vec!["sticky.local"]);
    assert_eq!(service.count("reset"), 0);
}

#[tokio::test]
async fn removals_run_before_additions() {
    let source = StaticContainerSource::new(vec![routed_container("c1", "old.local")]);
    let service = MockNameService::new();
    let mut engine = engine_with_reset(true, &source, &service);

    engine.tick().await;
    let before = service.calls().len();

    source.set_containers(vec![routed_container("c1", "new.local")]);
    engine.tick().await;

    assert_eq!(
        service.calls()[before..].to_vec(),
        vec![
            "reset:/group/1",
            "free:/group/1",
            "probe:new.local",
            "create",
            "add:new.local",
            "commit:/group/2",
        ]
    );
    assert_eq!(service.published(), vec!["new.local"]);
}

#[tokio::test]
async fn static_domains_are_never_withdrawn() {
    let source = StaticContainerSource::new(Vec::new());
    let service = MockNameService::new();
    let mut config = minimal_config().with_static_domains(["printer.local"]);
    config.publish.reset = true;

    let (mut engine, _events) = ScanEngine::new(
        Box::new(StaticContainerSource::sharing_counters_with(&source)),
        Box::new(MockNameService::sharing_counters_with(&service)),
        config,
    )
    .expect("engine construction succeeds");

    engine.tick().await;
    source.set_containers(vec![routed_container("c1", "other.local")]);
    engine.tick().await;
    source.set_containers(Vec::new());
    engine.tick().await;

    assert_eq!(service.published(), vec!["printer.local"]);
}

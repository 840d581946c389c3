//! Contract Test: Idempotent Reconciliation
//!
//! Constraints verified:
//! - An unchanged container set causes no protocol calls after the first tick
//! - Every routing-rule form and the custom label produce hostnames
//! - The configured TTL reaches the daemon
//! - Conflicting claims resolve the same way whatever the listing order
//!
//! If this test fails, the engine republishes records it already owns.

mod common;

use common::*;
use mdns_core::engine::EngineEvent;
use mdns_core::state::RecordState;
use mdns_core::ScanEngine;

fn engine_with(
    containers: Vec<mdns_core::ContainerSnapshot>,
    config: mdns_core::MdnsConfig,
) -> (
    ScanEngine,
    tokio::sync::mpsc::Receiver<EngineEvent>,
    StaticContainerSource,
    MockNameService,
) {
    let source = StaticContainerSource::new(containers);
    let service = MockNameService::new();

    let (engine, events) = ScanEngine::new(
        Box::new(StaticContainerSource::sharing_counters_with(&source)),
        Box::new(MockNameService::sharing_counters_with(&service)),
        config,
    )
    .expect("engine construction succeeds");

    (engine, events, source, service)
}

#[tokio::test]
async fn unchanged_containers_cause_no_protocol_calls() {
    let (mut engine, _events, _source, service) =
        engine_with(vec![routed_container("c1", "app.local")], minimal_config());

    let first = engine.tick().await;
    assert_eq!(first.committed, vec!["app.local"]);
    let calls_after_first = service.calls();
    assert_eq!(
        calls_after_first,
        vec!["probe:app.local", "create", "add:app.local", "commit:/group/1"]
    );

    let second = engine.tick().await;
    assert!(second.plan.to_add.is_empty());
    assert!(second.plan.to_remove.is_empty());
    assert_eq!(second.plan.unchanged, vec!["app.local"]);
    assert_eq!(
        service.calls(),
        calls_after_first,
        "second tick over the same containers must not touch the daemon"
    );
}

#[tokio::test]
async fn configured_ttl_is_published() {
    let mut config = minimal_config();
    config.publish.ttl_secs = 120;
    let (mut engine, _events, _source, service) =
        engine_with(vec![routed_container("c1", "app.local")], config);

    engine.tick().await;

    let record = engine.state().get("app.local").expect("record tracked");
    assert_eq!(record.hostname, "app.local");
    assert_eq!(record.ttl, 120);
    assert_eq!(record.state, RecordState::Committed);
    assert_eq!(service.ttl_of("app.local"), Some(120));
}

#[tokio::test]
async fn every_rule_form_is_published() {
    let containers = vec![
        container(
            "c1",
            &[("traefik.http.routers.multi.rule", "Host(`a.local`,`b.local`)")],
        ),
        container("c2", &[("traefik.frontend.rule", "Host:c.local")]),
        container("c3", &[("docker-mdns.domain", "d.local")]),
    ];
    let config = minimal_config().with_static_domains(["nas.local"]);
    let (mut engine, _events, _source, service) = engine_with(containers, config);

    engine.tick().await;

    assert_eq!(
        service.published(),
        vec!["a.local", "b.local", "c.local", "d.local", "nas.local"]
    );
}

#[tokio::test]
async fn disabled_by_default_requires_enable_label() {
    let mut config = minimal_config();
    config.publish.enabled_by_default = false;
    let containers = vec![
        routed_container("c1", "quiet.local"),
        container(
            "c2",
            &[
                ("traefik.http.routers.web.rule", "Host(`loud.local`)"),
                ("docker-mdns.enable", "true"),
            ],
        ),
    ];
    let (mut engine, _events, _source, service) = engine_with(containers, config);

    engine.tick().await;

    assert_eq!(service.published(), vec!["loud.local"]);
    assert!(engine.state().get("quiet.local").is_none());
}

#[tokio::test]
async fn conflicting_claims_are_reported_and_resolved() {
    let (mut engine, mut events, source, _service) = engine_with(
        vec![
            routed_container("c2", "app.local"),
            routed_container("c1", "app.local"),
        ],
        minimal_config(),
    );

    engine.tick().await;

    let mut conflicts = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::ConflictDetected { winner, losers, .. } = event {
            conflicts.push((winner, losers));
        }
    }
    assert_eq!(
        conflicts,
        vec![(Some("c1".to_string()), vec!["c2".to_string()])]
    );

    // Reversed listing order: same winner, nothing to do.
    source.set_containers(vec![
        routed_container("c1", "app.local"),
        routed_container("c2", "app.local"),
    ]);
    let report = engine.tick().await;
    assert!(report.plan.is_noop());
}

#[tokio::test]
async fn malformed_labels_do_not_block_other_containers() {
    let (mut engine, _events, _source, service) = engine_with(
        vec![
            container("bad", &[("traefik.http.routers.x.rule", "Host(`unterminated")]),
            routed_container("good", "fine.local"),
        ],
        minimal_config(),
    );

    let report = engine.tick().await;

    assert!(report.aborted.is_none());
    assert_eq!(service.published(), vec!["fine.local"]);
}

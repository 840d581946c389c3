//! Contract Test: OS Signal Shutdown
//!
//! Constraints verified:
//! - SIGQUIT triggers the same graceful withdrawal as SIGTERM and SIGINT
//!
//! Kept in its own test binary: the signal is delivered to the whole process.

#![cfg(unix)]

mod common;

use std::time::Duration;

use common::*;
use mdns_core::engine::{EngineEvent, LoopState};
use mdns_core::ScanEngine;

#[tokio::test]
async fn sigquit_withdraws_every_record() {
    let service = MockNameService::new();
    let (mut engine, mut events) = ScanEngine::new(
        Box::new(StaticContainerSource::new(vec![routed_container("c1", "a.local")])),
        Box::new(MockNameService::sharing_counters_with(&service)),
        minimal_config(),
    )
    .expect("engine construction succeeds");

    let quit = async {
        while service.published().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // SAFETY: raising a signal that the engine has a handler installed for.
        unsafe {
            libc::raise(libc::SIGQUIT);
        }
    };

    let (result, ()) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(engine.run(), quit)
    })
    .await
    .expect("engine should stop on SIGQUIT");

    assert!(result.is_ok());
    assert_eq!(engine.loop_state(), LoopState::ShuttingDown);
    assert!(service.published().is_empty());

    let mut stopped = None;
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::Stopped { reason, remaining } = event {
            stopped = Some((reason, remaining));
        }
    }
    assert_eq!(stopped, Some(("SIGQUIT".to_string(), 0)));
}

//! Scan engine
//!
//! The ScanEngine is responsible for:
//! - Listing containers via a ContainerSource at a fixed interval
//! - Turning their labels into the desired set of hostnames
//! - Reconciling that set against what is published in the NameService
//! - Withdrawing everything on shutdown
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ ContainerSource │─── snapshots ───┐
//! └─────────────────┘                 │
//!                                     ▼
//!                            ┌──────────────┐      collision notices
//!                            │ ScanEngine   │◄──────────────────────┐
//!                            └──────────────┘                       │
//!                                     │                             │
//!         ┌───────────────────────────┼──────────────────┐          │
//!         ▼                           ▼                  ▼          │
//! ┌───────────────┐          ┌──────────────┐    ┌─────────────┐    │
//! │ labels +      │          │ Reconciler   │───►│ NameService │────┘
//! │ DesiredSet    │          │ (state)      │    └─────────────┘
//! └───────────────┘          └──────────────┘
//! ```
//!
//! ## Tick Flow
//!
//! 1. Drain the collision queue
//! 2. Ping the name service (a new session drops the publication state)
//! 3. List containers
//! 4. Extract claims and build the desired set
//! 5. Reconcile, then sleep `wait_secs`
//!
//! Steps 2 and 3 failing turn the tick into a no-op; the loop never exits
//! because of transient errors.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::MdnsConfig;
use crate::desired::DesiredSet;
use crate::error::Result;
use crate::labels::{extract_claims, Extraction};
use crate::reconciler::{Reconciler, TickReport};
use crate::state::{PublicationState, RecordState};
use crate::traits::{CollisionNotice, ContainerSource, NameService};

/// Events emitted by the ScanEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine started
    Started {
        static_domains: usize,
    },

    /// A hostname is live
    RecordCommitted {
        hostname: String,
    },

    /// A hostname is held by someone else
    RecordCollided {
        hostname: String,
    },

    /// A hostname was withdrawn
    RecordWithdrawn {
        hostname: String,
    },

    /// Several owners claimed one hostname
    ConflictDetected {
        hostname: String,
        winner: Option<String>,
        losers: Vec<String>,
    },

    /// The name service reconnected and lost our records
    SessionChanged {
        republishing: usize,
    },

    /// A tick did nothing because a collaborator was unreachable
    TickSkipped {
        tick: u64,
        reason: String,
    },

    /// A tick ran to completion (or was cut short by a transport failure)
    TickCompleted {
        tick: u64,
        published: usize,
        aborted: bool,
    },

    /// Engine stopped
    Stopped {
        reason: String,
        remaining: usize,
    },
}

/// Lifecycle of the scan loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Scanning and reconciling
    Running,
    /// Withdrawing every record before exit
    ShuttingDown,
}

type ShutdownSignal = Pin<Box<dyn Future<Output = &'static str> + Send>>;

/// Core scan engine
///
/// ## Lifecycle
///
/// 1. Create with [`ScanEngine::new()`]
/// 2. Start with [`ScanEngine::run()`]
/// 3. Engine runs until SIGINT/SIGTERM/SIGQUIT
/// 4. Every published record is withdrawn, bounded by `shutdown_timeout_secs`
///
/// ## Threading
///
/// All protocol calls of a tick are awaited one after another on the
/// engine's task; ticks never overlap.
pub struct ScanEngine {
    /// Container listing
    source: Box<dyn ContainerSource>,

    /// mDNS daemon
    service: Box<dyn NameService>,

    /// Publication policy
    reconciler: Reconciler,

    /// What we believe is live
    state: PublicationState,

    /// Configured hostnames
    static_domains: Vec<String>,

    /// Publish containers without an explicit enable label
    enabled_by_default: bool,

    /// Sleep between ticks
    wait: Duration,

    /// Bound of the withdraw-all pass
    shutdown_timeout: Duration,

    /// Collision notices pushed by the name service
    collision_rx: mpsc::Receiver<CollisionNotice>,

    /// Last session reported by `ping`
    session: Option<u64>,

    /// Ticks run so far
    tick_count: u64,

    loop_state: LoopState,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl ScanEngine {
    /// Create a new scan engine
    ///
    /// # Parameters
    ///
    /// - `source`: Container source implementation
    /// - `service`: Name-service implementation
    /// - `config`: Engine configuration
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        source: Box<dyn ContainerSource>,
        service: Box<dyn NameService>,
        config: MdnsConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.engine.event_channel_capacity);
        let (collision_tx, collision_rx) = mpsc::channel(config.engine.collision_queue_capacity);
        service.attach_collision_sink(collision_tx);

        let engine = Self {
            source,
            service,
            reconciler: Reconciler::new(&config.publish, &config.engine),
            state: PublicationState::new(),
            static_domains: config.static_domains,
            enabled_by_default: config.publish.enabled_by_default,
            wait: Duration::from_secs(config.publish.wait_secs),
            shutdown_timeout: Duration::from_secs(config.engine.shutdown_timeout_secs),
            collision_rx,
            session: None,
            tick_count: 0,
            loop_state: LoopState::Running,
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// Current publication state
    pub fn state(&self) -> &PublicationState {
        &self.state
    }

    /// Number of ticks run so far
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Current loop state
    pub fn loop_state(&self) -> LoopState {
        self.loop_state
    }

    /// Run the engine
    ///
    /// Scans until SIGINT, SIGTERM or SIGQUIT is received, then withdraws every
    /// published record.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Clean shutdown
    /// - `Err(Error)`: Signal handlers could not be installed
    pub async fn run(&mut self) -> Result<()> {
        let signal = os_shutdown_signal()?;
        self.run_internal(signal).await
    }

    /// Run the engine with a controlled shutdown signal
    ///
    /// Without a receiver the engine falls back to OS signals, like [`run()`](Self::run).
    ///
    /// # Parameters
    ///
    /// - `shutdown_rx`: Optional oneshot receiver to trigger shutdown
    pub async fn run_with_shutdown(&mut self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        let signal: ShutdownSignal = match shutdown_rx {
            Some(rx) => Box::pin(async move {
                let _ = rx.await;
                "shutdown channel"
            }),
            None => os_shutdown_signal()?,
        };
        self.run_internal(signal).await
    }

    async fn run_internal(&mut self, mut shutdown: ShutdownSignal) -> Result<()> {
        self.loop_state = LoopState::Running;
        self.emit_event(EngineEvent::Started {
            static_domains: self.static_domains.len(),
        });
        info!(
            "Scanning {} every {:?} (publishing via {})",
            self.source.source_name(),
            self.wait,
            self.service.service_name()
        );

        let reason = loop {
            self.tick().await;

            tokio::select! {
                _ = tokio::time::sleep(self.wait) => {}
                reason = &mut shutdown => break reason,
            }
        };

        info!("Shutdown signal received ({})", reason);
        self.shutdown(reason).await;
        Ok(())
    }

    /// Run one scan and reconciliation pass
    pub async fn tick(&mut self) -> TickReport {
        self.tick_count += 1;
        let tick = self.tick_count;

        let mut notices = Vec::new();
        while let Ok(notice) = self.collision_rx.try_recv() {
            notices.push(notice);
        }
        if !notices.is_empty() {
            debug!("Processing {} collision notice(s)", notices.len());
            let state = std::mem::take(&mut self.state);
            self.state = self
                .reconciler
                .apply_collisions(state, notices, self.service.as_ref())
                .await;
        }

        match self.service.ping().await {
            Ok(session) => self.observe_session(session),
            Err(e) => return self.skip(tick, format!("name service unreachable: {}", e)),
        }

        let containers = match self.source.list_containers().await {
            Ok(containers) => containers,
            Err(e) => return self.skip(tick, format!("cannot list containers: {}", e)),
        };

        let extractions: Vec<Extraction> = containers
            .iter()
            .map(|container| extract_claims(container, self.enabled_by_default))
            .collect();
        let desired = DesiredSet::build(&extractions, &self.static_domains);
        debug!(
            "Tick {}: {} container(s), {} desired hostname(s)",
            tick,
            containers.len(),
            desired.len()
        );

        for conflict in desired.conflicts() {
            self.emit_event(EngineEvent::ConflictDetected {
                hostname: conflict.hostname.clone(),
                winner: conflict.winner.clone(),
                losers: conflict.losers.clone(),
            });
        }

        let state = std::mem::take(&mut self.state);
        let (state, report) = self
            .reconciler
            .reconcile(state, &desired, self.service.as_ref(), tick)
            .await;
        self.state = state;

        self.report(&report);
        report
    }

    /// Track the daemon session; a new one means our groups are gone
    fn observe_session(&mut self, session: u64) {
        if let Some(previous) = self.session
            && previous != session
        {
            let republishing = self.state.len();
            info!(
                "Name service session changed ({} -> {}), republishing {} record(s)",
                previous, session, republishing
            );
            self.state = PublicationState::new();
            self.emit_event(EngineEvent::SessionChanged { republishing });
        }
        self.session = Some(session);
    }

    fn skip(&mut self, tick: u64, reason: String) -> TickReport {
        warn!("Skipping tick {}: {}", tick, reason);
        self.emit_event(EngineEvent::TickSkipped {
            tick,
            reason: reason.clone(),
        });
        TickReport {
            tick,
            aborted: Some(reason),
            ..Default::default()
        }
    }

    fn report(&self, report: &TickReport) {
        for hostname in &report.committed {
            self.emit_event(EngineEvent::RecordCommitted {
                hostname: hostname.clone(),
            });
        }
        for hostname in &report.collided {
            self.emit_event(EngineEvent::RecordCollided {
                hostname: hostname.clone(),
            });
        }
        for hostname in &report.withdrawn {
            self.emit_event(EngineEvent::RecordWithdrawn {
                hostname: hostname.clone(),
            });
        }

        if let Some(reason) = &report.aborted {
            warn!("Tick {} cut short, retrying next tick: {}", report.tick, reason);
        }

        let published = self.state.count_in(RecordState::Committed);
        if !report.committed.is_empty() || !report.withdrawn.is_empty() {
            info!(
                "Publishing {} hostname(s) (+{} -{})",
                published,
                report.committed.len(),
                report.withdrawn.len()
            );
        }

        self.emit_event(EngineEvent::TickCompleted {
            tick: report.tick,
            published,
            aborted: report.aborted.is_some(),
        });
    }

    /// Withdraw every record within the shutdown timeout
    async fn shutdown(&mut self, reason: &str) {
        self.loop_state = LoopState::ShuttingDown;

        let withdrawal = self
            .reconciler
            .withdraw_all(&mut self.state, self.service.as_ref());

        match tokio::time::timeout(self.shutdown_timeout, withdrawal).await {
            Ok(Ok(count)) => info!("Withdrew {} record(s)", count),
            Ok(Err(e)) => error!("Failed to withdraw every record: {}", e),
            Err(_) => warn!(
                "Shutdown timeout after {:?}, {} record(s) left behind",
                self.shutdown_timeout,
                self.state.len()
            ),
        }

        self.emit_event(EngineEvent::Stopped {
            reason: reason.to_string(),
            remaining: self.state.len(),
        });
    }

    /// Emit an engine event
    ///
    /// # Parameters
    ///
    /// - `event`: The event to emit
    fn emit_event(&self, event: EngineEvent) {
        if self.event_tx.try_send(event).is_err() {
            // Full or closed: monitoring is slower than the engine.
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

/// Resolve on SIGTERM, SIGINT or SIGQUIT
#[cfg(unix)]
fn os_shutdown_signal() -> Result<ShutdownSignal> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigquit = signal(SignalKind::quit())?;

    Ok(Box::pin(async move {
        tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
            _ = sigquit.recv() => "SIGQUIT",
        }
    }))
}

/// Resolve on CTRL-C
#[cfg(not(unix))]
fn os_shutdown_signal() -> Result<ShutdownSignal> {
    Ok(Box::pin(async {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT"
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_event_equality() {
        let event = EngineEvent::ConflictDetected {
            hostname: "app.local".to_string(),
            winner: Some("c1".to_string()),
            losers: vec!["c2".to_string()],
        };

        assert_eq!(event.clone(), event);
        assert_ne!(
            event,
            EngineEvent::RecordCommitted {
                hostname: "app.local".to_string()
            }
        );
    }
}

//! Learning service task.
//!
//! Owns the [`AdaptiveLearningSystem`], drains feedback from a bounded command
//! queue, runs the periodic recompute and environment ticks, and publishes
//! adjustment snapshots through a `watch` channel so readers never lock.

use crate::environment::EnvironmentContext;
use crate::error::LearningError;
use crate::feedback::FeedbackEvent;
use crate::metrics::ModelPerformanceMetrics;
use crate::store::LearningStore;
use crate::system::{AdaptationTrigger, AdaptiveLearningSystem, AdjustmentSnapshot};
use crate::LearningConfig;
use chrono::{DateTime, Utc};
use lawnguard_core::Detection;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Commands accepted by the learning service
#[derive(Debug)]
pub enum LearningCommand {
    Feedback(FeedbackEvent),
    Detections(Vec<Detection>),
    Environment(EnvironmentContext),
    Adapt(AdaptationTrigger),
    Flush(oneshot::Sender<Result<(), LearningError>>),
}

/// Published learning status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningStatus {
    pub examples: usize,
    pub adapting: bool,
    pub global_metrics: Option<ModelPerformanceMetrics>,
    pub last_adaptation: Option<DateTime<Utc>>,
    pub persistence_failures: u64,
}

/// Cloneable handle to a running learning service
#[derive(Clone)]
pub struct LearningHandle {
    commands: mpsc::Sender<LearningCommand>,
    adjustments: watch::Receiver<AdjustmentSnapshot>,
    status: watch::Receiver<LearningStatus>,
    adapting_window: chrono::Duration,
    dropped: Arc<AtomicU64>,
}

impl LearningHandle {
    fn try_command(&self, command: LearningCommand) -> Result<(), LearningError> {
        match self.commands.try_send(command) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(command)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Learning queue full, dropping {:?}", command_name(&command));
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(LearningError::Closed),
        }
    }

    /// Queue a feedback event; dropped and counted when the queue is full
    pub fn submit_feedback(&self, event: FeedbackEvent) -> Result<(), LearningError> {
        self.try_command(LearningCommand::Feedback(event))
    }

    /// Cache detections for later feedback lookup
    pub fn record_detections(&self, detections: Vec<Detection>) -> Result<(), LearningError> {
        self.try_command(LearningCommand::Detections(detections))
    }

    pub fn update_environment(&self, context: EnvironmentContext) -> Result<(), LearningError> {
        self.try_command(LearningCommand::Environment(context))
    }

    /// Ask for an immediate adaptation pass
    pub fn request_adaptation(&self, trigger: AdaptationTrigger) -> Result<(), LearningError> {
        self.try_command(LearningCommand::Adapt(trigger))
    }

    /// Persist now and wait for the result
    pub async fn flush(&self) -> Result<(), LearningError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(LearningCommand::Flush(tx))
            .await
            .map_err(|_| LearningError::Closed)?;
        rx.await.map_err(|_| LearningError::Closed)?
    }

    /// Latest adjustment snapshot
    pub fn adjustments(&self) -> AdjustmentSnapshot {
        self.adjustments.borrow().clone()
    }

    pub fn subscribe_adjustments(&self) -> watch::Receiver<AdjustmentSnapshot> {
        self.adjustments.clone()
    }

    /// Latest status; `adapting` holds for a short window after each pass
    pub fn status(&self) -> LearningStatus {
        let mut status = self.status.borrow().clone();
        status.adapting = self.adapting_at(status.last_adaptation, Utc::now());
        status
    }

    pub fn is_adapting(&self) -> bool {
        self.adapting_at(self.status.borrow().last_adaptation, Utc::now())
    }

    fn adapting_at(&self, last_adaptation: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        last_adaptation.is_some_and(|at| now.signed_duration_since(at) < self.adapting_window)
    }

    pub fn dropped_commands(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn command_name(command: &LearningCommand) -> &'static str {
    match command {
        LearningCommand::Feedback(_) => "feedback",
        LearningCommand::Detections(_) => "detections",
        LearningCommand::Environment(_) => "environment",
        LearningCommand::Adapt(_) => "adapt",
        LearningCommand::Flush(_) => "flush",
    }
}

/// Learning service
pub struct LearningService {
    system: AdaptiveLearningSystem,
    store: Option<Arc<dyn LearningStore>>,
    adjustments: watch::Sender<AdjustmentSnapshot>,
    status: watch::Sender<LearningStatus>,
    persistence_failures: u64,
}

impl LearningService {
    /// Build the system, reloading persisted state when a store is given.
    ///
    /// A load failure is logged and learning starts empty.
    pub fn load_or_new(
        config: LearningConfig,
        store: Option<&dyn LearningStore>,
    ) -> Result<AdaptiveLearningSystem, LearningError> {
        let Some(store) = store else {
            return AdaptiveLearningSystem::new(config);
        };

        match store.load() {
            Ok(Some(snapshot)) => AdaptiveLearningSystem::restore(config, snapshot),
            Ok(None) => AdaptiveLearningSystem::new(config),
            Err(e) => {
                error!("Failed to load learning state, starting fresh: {}", e);
                AdaptiveLearningSystem::new(config)
            }
        }
    }

    /// Spawn the service task
    pub fn spawn(
        system: AdaptiveLearningSystem,
        store: Option<Arc<dyn LearningStore>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> (LearningHandle, JoinHandle<()>) {
        let config = system.config().clone();
        let (command_tx, mut command_rx) = mpsc::channel(config.command_capacity);
        let (adjustments_tx, adjustments_rx) = watch::channel(system.adjustment_snapshot());
        let (status_tx, status_rx) = watch::channel(LearningStatus::default());

        let handle = LearningHandle {
            commands: command_tx,
            adjustments: adjustments_rx,
            status: status_rx,
            adapting_window: chrono::Duration::seconds(config.adapting_window_secs),
            dropped: Arc::new(AtomicU64::new(0)),
        };

        let mut service = LearningService {
            system,
            store,
            adjustments: adjustments_tx,
            status: status_tx,
            persistence_failures: 0,
        };
        service.publish_status();

        let join = tokio::spawn(async move {
            let update_period = Duration::from_secs(config.update_interval_secs);
            let environment_period = Duration::from_secs(config.environment_interval_secs);
            let mut update = interval_at(Instant::now() + update_period, update_period);
            let mut environment = interval_at(Instant::now() + environment_period, environment_period);
            update.set_missed_tick_behavior(MissedTickBehavior::Delay);
            environment.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!("Learning service started with {} examples", service.system.example_count());
            loop {
                tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    command = command_rx.recv() => match command {
                        Some(command) => service.handle(command),
                        None => break,
                    },
                    _ = update.tick() => service.periodic_update(),
                    _ = environment.tick() => service.environment_tick(),
                }
            }

            if let Err(e) = service.flush() {
                error!("Final learning flush failed: {}", e);
            }
            info!("Learning service stopped");
        });

        (handle, join)
    }

    fn handle(&mut self, command: LearningCommand) {
        match command {
            LearningCommand::Feedback(event) => {
                let outcome = self.system.ingest(event, Utc::now());
                if !outcome.triggers.is_empty() {
                    info!("Adaptation triggered by {:?}", outcome.triggers);
                    self.run_adaptation();
                }
                if self.system.needs_flush() {
                    if let Err(e) = self.flush() {
                        error!("Learning flush failed, continuing in memory: {}", e);
                    }
                }
            }
            LearningCommand::Detections(detections) => self.system.record_detections(&detections),
            LearningCommand::Environment(context) => {
                self.system.set_environment(context, Utc::now());
                self.publish_adjustments();
            }
            LearningCommand::Adapt(trigger) => {
                info!("Adaptation requested: {:?}", trigger);
                self.run_adaptation();
            }
            LearningCommand::Flush(reply) => {
                let result = self.flush();
                if reply.send(result).is_err() {
                    warn!("Flush requester went away");
                }
            }
        }
        self.publish_status();
    }

    /// Single adaptation pass
    fn run_adaptation(&mut self) {
        let changed = self.system.adapt(Utc::now());
        for (key, value) in &changed {
            debug!("Adjustment {} -> {:.3}", key, value);
        }
        self.publish_adjustments();
        self.publish_status();
    }

    fn periodic_update(&mut self) {
        if self.system.periodic_update(Utc::now()).is_some() {
            self.publish_adjustments();
            self.publish_status();
        }
    }

    fn environment_tick(&mut self) {
        let tick = self.system.environment_tick(Utc::now());
        if tick.adapted {
            info!(
                "Environment adaptation: changes={:?} fpr={:?}",
                tick.significant_changes, tick.environment_fpr
            );
        }
        self.publish_adjustments();
        self.publish_status();
    }

    fn flush(&mut self) -> Result<(), LearningError> {
        let Some(store) = &self.store else {
            self.system.mark_flushed();
            return Ok(());
        };

        match store.save(&self.system.snapshot()) {
            Ok(()) => {
                self.system.mark_flushed();
                Ok(())
            }
            Err(e) => {
                self.persistence_failures += 1;
                Err(e)
            }
        }
    }

    fn publish_adjustments(&self) {
        self.adjustments.send_if_modified(|current| {
            let next = self.system.adjustment_snapshot();
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn publish_status(&self) {
        self.status.send_replace(LearningStatus {
            examples: self.system.example_count(),
            adapting: self.system.last_adaptation().is_some_and(|at| {
                Utc::now().signed_duration_since(at)
                    < chrono::Duration::seconds(self.system.config().adapting_window_secs)
            }),
            global_metrics: self.system.global_metrics().cloned(),
            last_adaptation: self.system.last_adaptation(),
            persistence_failures: self.persistence_failures,
        });
    }
}

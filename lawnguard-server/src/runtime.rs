//! System runtime: wires the pipeline, learning, safety and supervisor tasks.
//!
//! Data flows one way per cycle: frame -> pipeline -> learning adjustment ->
//! safety. Critical detections bypass filtering and adjustment on their own
//! channel straight into the safety service. Feedback flows back into the
//! learning service asynchronously.

use crate::config::{GuardConfig, PerformanceTargets};
use crate::control::{merge_targets, ControlCommand, ControlResponse};
use crate::health::{compose_health, HealthInputs, HealthState};
use crate::supervisor::{IntegrationSupervisor, PerformanceReport};
use chrono::Utc;
use lawnguard_cns::{ActionSink, PolicyTable, SafetyHandle, SafetyService, SafetyStateMachine};
use lawnguard_core::{Error, OutboundMessage, Result};
use lawnguard_eye::{CycleOutput, DetectionPipeline, Detector, Frame, PipelineHandle, PipelineStatsSnapshot, PipelineWorker};
use lawnguard_learn::{
    AdaptationTrigger, EnvironmentContext, FeedbackEvent, FeedbackKind, LearningHandle, LearningService,
    LearningStore, UnknownOriginPolicy,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Requests served by the supervisor task
#[derive(Debug)]
enum SupervisorCommand {
    SetEnabled {
        enabled: bool,
        reply: oneshot::Sender<bool>,
    },
    Health {
        reply: oneshot::Sender<(HealthState, BTreeMap<String, String>)>,
    },
    Report {
        recent_count: usize,
        reply: oneshot::Sender<PerformanceReport>,
    },
    ConfigureTargets {
        targets: PerformanceTargets,
        reply: oneshot::Sender<std::result::Result<PerformanceTargets, String>>,
    },
    Targets {
        reply: oneshot::Sender<PerformanceTargets>,
    },
}

/// Supervisor task state
struct SupervisorTask {
    supervisor: IntegrationSupervisor,
    pipeline: PipelineHandle,
    learning: LearningHandle,
    safety: SafetyHandle,
    sink: Arc<dyn ActionSink>,
    last_pipeline: PipelineStatsSnapshot,
    stale: bool,
}

impl SupervisorTask {
    async fn run(
        mut self,
        mut results: mpsc::Receiver<CycleOutput>,
        mut commands: mpsc::Receiver<SupervisorCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let monitor_period = Duration::from_secs(self.supervisor.config().monitor_interval_secs);
        let health_period = Duration::from_secs(self.supervisor.config().health_interval_secs);
        let mut monitor = interval_at(Instant::now() + monitor_period, monitor_period);
        let mut health = interval_at(Instant::now() + health_period, health_period);
        monitor.set_missed_tick_behavior(MissedTickBehavior::Delay);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Integration supervisor started");
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                output = results.recv() => match output {
                    Some(output) => self.on_cycle(output).await,
                    None => {
                        debug!("Pipeline result queue closed");
                        break;
                    }
                },
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = monitor.tick() => self.monitor_tick(),
                _ = health.tick() => {
                    let (state, components) = self.health();
                    self.publish(OutboundMessage::HealthStatus {
                        status: state.to_string(),
                        components,
                        timestamp: Utc::now(),
                    })
                    .await;
                }
            }
        }
        info!("Integration supervisor stopped");
    }

    async fn on_cycle(&mut self, output: CycleOutput) {
        let now = Utc::now();
        self.stale = false;

        if !self.supervisor.is_enabled() {
            debug!("Supervisor disabled, discarding frame {}", output.frame_id);
            return;
        }

        let adjustments = self.learning.adjustments();
        let accepted = self.supervisor.apply_adjustments(output.detections, &adjustments);

        let mut seen = accepted.clone();
        seen.extend(output.critical.iter().cloned());
        if !seen.is_empty() {
            if let Err(e) = self.learning.record_detections(seen) {
                warn!("Learning service unavailable: {}", e);
            }
        }

        let graduated: Vec<_> = accepted.iter().filter(|d| !d.is_critical()).cloned().collect();
        if !graduated.is_empty() {
            if let Err(e) = self.safety.submit_detections(graduated) {
                error!("Safety service unavailable: {}", e);
            }
        }

        let learning = self.learning.status();
        if let Some(alert) = self.supervisor.record_cycle(
            output.latency_ms,
            accepted.len(),
            learning.global_metrics.as_ref(),
            now,
        ) {
            self.publish(alert).await;
        }

        self.publish(OutboundMessage::DetectionResults {
            frame_id: output.frame_id,
            detections: accepted,
            latency_ms: output.latency_ms,
        })
        .await;
    }

    fn handle(&mut self, command: SupervisorCommand) {
        match command {
            SupervisorCommand::SetEnabled { enabled, reply } => {
                self.supervisor.set_enabled(enabled);
                let _ = reply.send(self.supervisor.is_enabled());
            }
            SupervisorCommand::Health { reply } => {
                let _ = reply.send(self.health());
            }
            SupervisorCommand::Report { recent_count, reply } => {
                let _ = reply.send(self.supervisor.report(recent_count));
            }
            SupervisorCommand::ConfigureTargets { targets, reply } => {
                let result = self.supervisor.set_targets(targets).map(|_| self.supervisor.targets());
                let _ = reply.send(result);
            }
            SupervisorCommand::Targets { reply } => {
                let _ = reply.send(self.supervisor.targets());
            }
        }
    }

    fn monitor_tick(&mut self) {
        let outcome = self.supervisor.monitor(Utc::now());
        self.stale = outcome.stale;
        if let Some(drop) = outcome.accuracy_drop {
            info!("Requesting re-adaptation after accuracy drop of {:.3}", drop);
            if let Err(e) = self.learning.request_adaptation(AdaptationTrigger::PerformanceDrop) {
                warn!("Learning service unavailable: {}", e);
            }
        }
    }

    fn health(&mut self) -> (HealthState, BTreeMap<String, String>) {
        let pipeline = self.pipeline.stats();
        let pressure = pipeline.frames_dropped > self.last_pipeline.frames_dropped
            || pipeline.queue_pressure > self.last_pipeline.queue_pressure
            || pipeline.critical_dropped > self.last_pipeline.critical_dropped;

        let inputs = HealthInputs {
            enabled: self.supervisor.is_enabled(),
            stale: self.stale,
            recent_violations: self.supervisor.has_recent_violations(),
            pipeline: pipeline.clone(),
            pipeline_pressure: pressure,
            learning: self.learning.status(),
            safety: self.safety.status(),
        };
        self.last_pipeline = pipeline;

        let (state, components) = compose_health(&inputs);
        if state != HealthState::Healthy {
            info!("Health: {} {:?}", state, components);
        }
        (state, components)
    }

    async fn publish(&self, message: OutboundMessage) {
        if let Err(e) = self.sink.publish(&message).await {
            debug!("Dropped {}: {}", message.topic(), e);
        }
    }
}

/// Handle to the supervisor task
#[derive(Clone)]
pub struct SupervisorHandle {
    commands: mpsc::Sender<SupervisorCommand>,
}

impl SupervisorHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> SupervisorCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| Error::Channel("supervisor closed".to_string()))?;
        rx.await.map_err(|_| Error::Channel("supervisor closed".to_string()))
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<bool> {
        self.request(|reply| SupervisorCommand::SetEnabled { enabled, reply }).await
    }

    pub async fn health(&self) -> Result<(HealthState, BTreeMap<String, String>)> {
        self.request(|reply| SupervisorCommand::Health { reply }).await
    }

    pub async fn report(&self, recent_count: usize) -> Result<PerformanceReport> {
        self.request(|reply| SupervisorCommand::Report { recent_count, reply }).await
    }

    pub async fn targets(&self) -> Result<PerformanceTargets> {
        self.request(|reply| SupervisorCommand::Targets { reply }).await
    }

    pub async fn configure_targets(&self, targets: PerformanceTargets) -> Result<PerformanceTargets> {
        self.request(|reply| SupervisorCommand::ConfigureTargets { targets, reply })
            .await?
            .map_err(Error::InvalidInput)
    }
}

/// Running lawnguard system
pub struct GuardRuntime {
    shutdown: watch::Sender<bool>,
    pipeline: PipelineHandle,
    learning: LearningHandle,
    safety: SafetyHandle,
    supervisor: SupervisorHandle,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl GuardRuntime {
    /// Validate the config and spawn every task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: GuardConfig,
        detectors: Vec<Arc<dyn Detector>>,
        sink: Arc<dyn ActionSink>,
        store: Option<Arc<dyn LearningStore>>,
    ) -> Result<Self> {
        config.validate()?;
        let (shutdown, shutdown_rx) = watch::channel(false);

        let system = LearningService::load_or_new(config.learning.clone(), store.as_deref())?;
        let (learning, learning_join) = LearningService::spawn(system, store, shutdown_rx.clone());

        let (critical_tx, critical_rx) = mpsc::channel(config.pipeline.critical_capacity);
        let machine = SafetyStateMachine::new(config.safety.clone(), PolicyTable::standard())?;
        let (safety, safety_join) =
            SafetyService::spawn(machine, sink.clone(), Some(critical_rx), shutdown_rx.clone());

        let pipeline = DetectionPipeline::new(config.pipeline.clone(), detectors)?;
        let worker = PipelineWorker::spawn(pipeline, Some(critical_tx), shutdown_rx.clone());

        let (commands_tx, commands_rx) = mpsc::channel(config.supervisor.command_capacity);
        let task = SupervisorTask {
            supervisor: IntegrationSupervisor::new(config.supervisor.clone(), Utc::now()),
            pipeline: worker.handle.clone(),
            learning: learning.clone(),
            safety: safety.clone(),
            sink,
            last_pipeline: PipelineStatsSnapshot::default(),
            stale: false,
        };
        let supervisor_join = tokio::spawn(task.run(worker.results, commands_rx, shutdown_rx));

        info!("lawnguard runtime started");
        Ok(Self {
            shutdown,
            pipeline: worker.handle,
            learning,
            safety,
            supervisor: SupervisorHandle { commands: commands_tx },
            tasks: vec![
                ("pipeline", worker.join),
                ("supervisor", supervisor_join),
                ("safety", safety_join),
                ("learning", learning_join),
            ],
        })
    }

    /// Queue a frame; a full queue drops it
    pub fn submit_frame(&self, frame: Frame) -> Result<()> {
        Ok(self.pipeline.submit(frame)?)
    }

    /// Feed an operator report to learning; false positives are also suppressed for the session
    pub fn submit_feedback(&self, event: FeedbackEvent) -> Result<()> {
        if FeedbackKind::from_origin(&event.origin, UnknownOriginPolicy::Unknown) == FeedbackKind::FalsePositive {
            self.safety.report_false_positive(event.detection_id.clone())?;
        }
        Ok(self.learning.submit_feedback(event)?)
    }

    pub fn update_environment(&self, context: EnvironmentContext) -> Result<()> {
        Ok(self.learning.update_environment(context)?)
    }

    pub fn pipeline(&self) -> &PipelineHandle {
        &self.pipeline
    }

    pub fn learning(&self) -> &LearningHandle {
        &self.learning
    }

    pub fn safety(&self) -> &SafetyHandle {
        &self.safety
    }

    pub fn supervisor(&self) -> &SupervisorHandle {
        &self.supervisor
    }

    /// Execute an operator command
    pub async fn control(&self, command: ControlCommand) -> ControlResponse {
        let name = command.name();
        match self.execute(command).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Control command {} failed: {}", name, e);
                ControlResponse::Error {
                    command: name.to_string(),
                    message: e.to_string(),
                }
            }
        }
    }

    async fn execute(&self, command: ControlCommand) -> Result<ControlResponse> {
        let name = command.name().to_string();
        let enable = matches!(command, ControlCommand::Enable);
        match command {
            ControlCommand::Enable | ControlCommand::Disable => {
                let enabled = self.supervisor.set_enabled(enable).await?;
                Ok(ControlResponse::Ack { command: name, enabled })
            }
            ControlCommand::HealthCheck => {
                let (status, components) = self.supervisor.health().await?;
                Ok(ControlResponse::Health { status, components })
            }
            ControlCommand::PerformanceReport { recent_count } => {
                Ok(ControlResponse::Performance(self.supervisor.report(recent_count).await?))
            }
            ControlCommand::ConfigureTargets {
                min_accuracy,
                max_false_positive_rate,
                max_latency_ms,
            } => {
                let current = self.supervisor.targets().await?;
                let targets = merge_targets(current, min_accuracy, max_false_positive_rate, max_latency_ms);
                Ok(ControlResponse::Targets(self.supervisor.configure_targets(targets).await?))
            }
            ControlCommand::OverrideEnable { kind, duration_seconds } => {
                let duration = match duration_seconds {
                    Some(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::from_secs_f64(secs)),
                    Some(secs) => {
                        return Err(Error::InvalidInput(format!("invalid override duration {}", secs)))
                    }
                    None => None,
                };
                Ok(ControlResponse::Safety(self.safety.enable_override(kind, duration).await?))
            }
            ControlCommand::OverrideDisable => {
                self.safety.disable_override().await?;
                Ok(ControlResponse::Safety(self.safety.status()))
            }
            ControlCommand::ClearEmergencyStop => {
                Ok(ControlResponse::Safety(self.safety.clear_emergency_stop().await?))
            }
        }
    }

    /// Signal shutdown and wait for every task to finish
    pub async fn stop(self) {
        info!("Stopping lawnguard runtime");
        let _ = self.shutdown.send(true);
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                error!("{} task ended abnormally: {}", name, e);
            }
        }
        info!("lawnguard runtime stopped");
    }
}

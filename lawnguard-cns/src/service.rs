//! Safety service: single owner of the state machine.
//!
//! Critical detections arrive on their own channel and are always drained
//! before queued commands or the supervision tick.

use crate::actuation::ActionSink;
use crate::error::CnsError;
use crate::response::{SafetyStateMachine, SafetyStatus};
use lawnguard_core::{Detection, OutboundMessage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Commands accepted by the safety service
#[derive(Debug)]
pub enum SafetyCommand {
    Critical(Vec<Detection>),
    Detections(Vec<Detection>),
    EnableOverride {
        kind: String,
        duration: Option<Duration>,
        reply: oneshot::Sender<SafetyStatus>,
    },
    DisableOverride {
        reply: oneshot::Sender<bool>,
    },
    ReportFalsePositive(String),
    ClearEmergencyStop {
        reply: oneshot::Sender<SafetyStatus>,
    },
}

/// Cloneable handle to a running safety service
#[derive(Clone)]
pub struct SafetyHandle {
    commands: mpsc::Sender<SafetyCommand>,
    status: watch::Receiver<SafetyStatus>,
    dropped: Arc<AtomicU64>,
}

impl SafetyHandle {
    fn try_submit(&self, command: SafetyCommand) -> Result<(), CnsError> {
        match self.commands.try_send(command) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("Safety command queue full, dropped command ({} total)", dropped);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(CnsError::Closed),
        }
    }

    /// Queue one cycle of graduated-path detections
    pub fn submit_detections(&self, detections: Vec<Detection>) -> Result<(), CnsError> {
        self.try_submit(SafetyCommand::Detections(detections))
    }

    /// Queue critical detections through the command queue.
    ///
    /// The dedicated critical channel given to [`SafetyService::spawn`] is
    /// preferred; this path waits for queue space instead of dropping.
    pub async fn submit_critical(&self, detections: Vec<Detection>) -> Result<(), CnsError> {
        self.commands
            .send(SafetyCommand::Critical(detections))
            .await
            .map_err(|_| CnsError::Closed)
    }

    pub fn report_false_positive(&self, detection_id: impl Into<String>) -> Result<(), CnsError> {
        self.try_submit(SafetyCommand::ReportFalsePositive(detection_id.into()))
    }

    /// Engage manual override; `None` uses the configured default duration
    pub async fn enable_override(
        &self,
        kind: impl Into<String>,
        duration: Option<Duration>,
    ) -> Result<SafetyStatus, CnsError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SafetyCommand::EnableOverride {
                kind: kind.into(),
                duration,
                reply,
            })
            .await
            .map_err(|_| CnsError::Closed)?;
        rx.await.map_err(|_| CnsError::Closed)
    }

    pub async fn disable_override(&self) -> Result<bool, CnsError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SafetyCommand::DisableOverride { reply })
            .await
            .map_err(|_| CnsError::Closed)?;
        rx.await.map_err(|_| CnsError::Closed)
    }

    pub async fn clear_emergency_stop(&self) -> Result<SafetyStatus, CnsError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SafetyCommand::ClearEmergencyStop { reply })
            .await
            .map_err(|_| CnsError::Closed)?;
        rx.await.map_err(|_| CnsError::Closed)
    }

    /// Latest published status
    pub fn status(&self) -> SafetyStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SafetyStatus> {
        self.status.clone()
    }

    pub fn dropped_commands(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Safety service task state
pub struct SafetyService {
    machine: SafetyStateMachine,
    sink: Arc<dyn ActionSink>,
    status: watch::Sender<SafetyStatus>,
    last_error: Option<String>,
}

impl SafetyService {
    /// Spawn the service task.
    ///
    /// `critical` carries detections from the pipeline's critical short-circuit.
    pub fn spawn(
        machine: SafetyStateMachine,
        sink: Arc<dyn ActionSink>,
        critical: Option<mpsc::Receiver<Vec<Detection>>>,
        shutdown: watch::Receiver<bool>,
    ) -> (SafetyHandle, JoinHandle<()>) {
        let capacity = machine.config().command_capacity;
        let (commands_tx, commands_rx) = mpsc::channel(capacity);
        let (status_tx, status_rx) = watch::channel(machine.status(Instant::now()));

        let handle = SafetyHandle {
            commands: commands_tx,
            status: status_rx,
            dropped: Arc::new(AtomicU64::new(0)),
        };

        let service = SafetyService {
            machine,
            sink,
            status: status_tx,
            last_error: None,
        };
        let join = tokio::spawn(service.run(commands_rx, critical, shutdown));
        (handle, join)
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SafetyCommand>,
        mut critical: Option<mpsc::Receiver<Vec<Detection>>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let period = self.machine.config().supervision_period();
        let mut tick = interval_at(tokio::time::Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Safety service started via {} sink", self.sink.name());

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                batch = recv_critical(&mut critical) => {
                    match batch {
                        Some(detections) => self.on_critical(detections).await,
                        None => {
                            debug!("Critical channel closed");
                            critical = None;
                        }
                    }
                }
                command = commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => break,
                    }
                }
                _ = tick.tick() => {
                    let messages = self.machine.supervise(Instant::now());
                    self.dispatch(messages).await;
                }
            }
            self.publish_status();
        }

        info!("Safety service stopped");
    }

    async fn on_critical(&mut self, detections: Vec<Detection>) {
        let messages = self.machine.handle_critical(&detections, Instant::now());
        self.dispatch(messages).await;
    }

    async fn handle_command(&mut self, command: SafetyCommand) {
        let now = Instant::now();
        match command {
            SafetyCommand::Critical(detections) => self.on_critical(detections).await,
            SafetyCommand::Detections(detections) => {
                let messages = self.machine.handle_detections(&detections, now);
                self.dispatch(messages).await;
            }
            SafetyCommand::EnableOverride { kind, duration, reply } => {
                let duration = duration
                    .unwrap_or_else(|| Duration::from_secs(self.machine.config().default_override_secs));
                let messages = self.machine.enable_override(kind, duration, now);
                self.dispatch(messages).await;
                let _ = reply.send(self.current_status());
            }
            SafetyCommand::DisableOverride { reply } => {
                let _ = reply.send(self.machine.disable_override(now));
            }
            SafetyCommand::ReportFalsePositive(id) => {
                let messages = self.machine.report_false_positive(&id);
                self.dispatch(messages).await;
            }
            SafetyCommand::ClearEmergencyStop { reply } => {
                let messages = self.machine.clear_emergency_stop();
                self.last_error = None;
                self.dispatch(messages).await;
                let _ = reply.send(self.current_status());
            }
        }
    }

    /// Publish messages in order. Emergency stops are bounded by their own
    /// timeout and a failure is recorded; other failures are logged.
    async fn dispatch(&mut self, messages: Vec<OutboundMessage>) {
        for message in messages {
            if let OutboundMessage::EmergencyStop { timeout_ms, .. } = &message {
                let timeout_ms = *timeout_ms;
                if let Err(e) = self.publish_emergency_stop(&message, timeout_ms).await {
                    error!("{}", e);
                    self.machine.record_emergency_stop_failure();
                    self.last_error = Some(e.to_string());
                }
                continue;
            }

            let limit = Duration::from_millis(self.machine.config().action_timeout_ms);
            match timeout(limit, self.sink.publish(&message)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Failed to publish {}: {}", message.topic(), e),
                Err(_) => warn!(
                    "Publishing {} {}",
                    message.topic(),
                    CnsError::Timeout(limit.as_millis() as u64)
                ),
            }
        }
    }

    async fn publish_emergency_stop(&self, message: &OutboundMessage, timeout_ms: u64) -> Result<(), CnsError> {
        let limit = Duration::from_millis(timeout_ms.max(1));
        match timeout(limit, self.sink.publish(message)).await {
            Ok(Ok(())) => {
                info!("Emergency stop issued");
                Ok(())
            }
            Ok(Err(e)) => Err(CnsError::EmergencyStop(e.to_string())),
            Err(_) => Err(CnsError::EmergencyStop(CnsError::Timeout(timeout_ms).to_string())),
        }
    }

    fn current_status(&self) -> SafetyStatus {
        let mut status = self.machine.status(Instant::now());
        status.last_actuation_error = self.last_error.clone();
        status
    }

    fn publish_status(&self) {
        let status = self.current_status();
        self.status.send_if_modified(|current| {
            if *current != status {
                *current = status;
                true
            } else {
                false
            }
        });
    }
}

async fn recv_critical(critical: &mut Option<mpsc::Receiver<Vec<Detection>>>) -> Option<Vec<Detection>> {
    match critical {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuation::MemorySink;
    use crate::config::SafetyConfig;
    use crate::policy::PolicyTable;
    use lawnguard_core::messages::{TOPIC_EMERGENCY_STOP, TOPIC_NAV_STOP};
    use lawnguard_core::{BoundingBox, ObjectCategory, ResponseTier};

    fn machine() -> SafetyStateMachine {
        SafetyStateMachine::new(SafetyConfig::default(), PolicyTable::standard()).unwrap()
    }

    fn person(distance: f64) -> Detection {
        Detection::new("p1", ObjectCategory::Person, 0.95, BoundingBox::new(100.0, 100.0, 80.0, 200.0), distance)
    }

    async fn wait_for<F: Fn(&SafetyStatus) -> bool>(handle: &SafetyHandle, predicate: F) -> SafetyStatus {
        let mut rx = handle.subscribe_status();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if predicate(&*rx.borrow()) {
                    return rx.borrow().clone();
                }
                if rx.changed().await.is_err() {
                    return rx.borrow().clone();
                }
            }
        })
        .await
        .expect("status condition not reached")
    }

    #[tokio::test]
    async fn test_critical_channel_issues_emergency_stop() {
        let sink = Arc::new(MemorySink::new());
        let (critical_tx, critical_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, join) = SafetyService::spawn(machine(), sink.clone(), Some(critical_rx), shutdown_rx);

        critical_tx.send(vec![person(1.0)]).await.unwrap();
        let status = wait_for(&handle, |s| s.current_tier == ResponseTier::EmergencyStop).await;
        assert!(status.emergency_stop_latched);
        assert_eq!(sink.count(TOPIC_EMERGENCY_STOP), 1);

        shutdown_tx.send(true).unwrap();
        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_emergency_stop_is_reported() {
        let sink = Arc::new(MemorySink::failing_emergency_stop());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, _join) = SafetyService::spawn(machine(), sink, None, shutdown_rx);

        handle.submit_critical(vec![person(1.0)]).await.unwrap();
        let status = wait_for(&handle, |s| s.last_actuation_error.is_some()).await;
        assert_eq!(status.stats.emergency_stop_failures, 1);
        assert!(status.last_actuation_error.unwrap().starts_with("Emergency stop failed"));
    }

    #[tokio::test]
    async fn test_slow_emergency_stop_times_out() {
        let sink = Arc::new(MemorySink::with_delay(Duration::from_millis(500)));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, _join) = SafetyService::spawn(machine(), sink, None, shutdown_rx);

        handle.submit_critical(vec![person(1.0)]).await.unwrap();
        let status = wait_for(&handle, |s| s.last_actuation_error.is_some()).await;
        assert!(status.last_actuation_error.unwrap().contains("Timed out after 100ms"));
    }

    #[tokio::test]
    async fn test_override_via_handle() {
        let sink = Arc::new(MemorySink::new());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, _join) = SafetyService::spawn(machine(), sink.clone(), None, shutdown_rx);

        let status = handle
            .enable_override("operator", Some(Duration::from_secs(30)))
            .await
            .unwrap();
        assert!(status.override_active);

        handle.submit_critical(vec![person(1.0)]).await.unwrap();
        assert!(handle.disable_override().await.unwrap());
        assert_eq!(sink.count(TOPIC_EMERGENCY_STOP), 0);
    }

    #[tokio::test]
    async fn test_graduated_detections_and_false_positive() {
        let sink = Arc::new(MemorySink::new());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, _join) = SafetyService::spawn(machine(), sink.clone(), None, shutdown_rx);

        handle.submit_detections(vec![person(5.0)]).unwrap();
        wait_for(&handle, |s| s.current_tier == ResponseTier::StopAndAssess).await;
        assert_eq!(sink.count(TOPIC_NAV_STOP), 1);

        handle.report_false_positive("p1").unwrap();
        let status = wait_for(&handle, |s| s.current_tier == ResponseTier::Continue).await;
        assert_eq!(status.suppressed_ids, 1);
    }
}

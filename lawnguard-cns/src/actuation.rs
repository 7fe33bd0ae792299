//! Actuation layer abstraction

use crate::error::CnsError;
use async_trait::async_trait;
use lawnguard_core::OutboundMessage;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;

/// Destination for outbound safety, navigation and status messages
#[async_trait]
pub trait ActionSink: Send + Sync {
    /// Sink name for logs
    fn name(&self) -> &str;

    /// Deliver one message
    async fn publish(&self, message: &OutboundMessage) -> Result<(), CnsError>;
}

/// Fan-out sink backed by a tokio broadcast channel
pub struct BroadcastSink {
    sender: broadcast::Sender<OutboundMessage>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboundMessage> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl ActionSink for BroadcastSink {
    fn name(&self) -> &str {
        "broadcast"
    }

    async fn publish(&self, message: &OutboundMessage) -> Result<(), CnsError> {
        self.sender
            .send(message.clone())
            .map(|_| ())
            .map_err(|_| CnsError::Actuation(format!("no subscribers for {}", message.topic())))
    }
}

/// Recording sink for replay and tests
#[derive(Default)]
pub struct MemorySink {
    messages: Mutex<Vec<OutboundMessage>>,
    fail_emergency_stop: bool,
    delay: Option<Duration>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink whose emergency-stop publishes always fail
    pub fn failing_emergency_stop() -> Self {
        Self {
            fail_emergency_stop: true,
            ..Self::default()
        }
    }

    /// Sink that takes `delay` to accept each message
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.messages.lock().clone()
    }

    pub fn topics(&self) -> Vec<&'static str> {
        self.messages.lock().iter().map(|m| m.topic()).collect()
    }

    pub fn count(&self, topic: &str) -> usize {
        self.messages.lock().iter().filter(|m| m.topic() == topic).count()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

#[async_trait]
impl ActionSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn publish(&self, message: &OutboundMessage) -> Result<(), CnsError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_emergency_stop && message.is_emergency_stop() {
            return Err(CnsError::Actuation("emergency stop line unavailable".to_string()));
        }
        self.messages.lock().push(message.clone());
        Ok(())
    }
}

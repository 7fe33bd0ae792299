//! lawnguard-server: integration supervisor and runtime
//!
//! Wires the detection pipeline, adaptive learning and safety response
//! services together, monitors performance against targets and exposes the
//! operator control surface.

pub mod config;
pub mod control;
pub mod health;
pub mod runtime;
pub mod supervisor;

pub use config::{AdjustmentMode, ConfigError, GuardConfig, PerformanceTargets, SupervisorConfig};
pub use control::{ControlCommand, ControlResponse, Inbound};
pub use health::{compose_health, HealthInputs, HealthState};
pub use runtime::{GuardRuntime, SupervisorHandle};
pub use supervisor::{IntegrationSupervisor, MonitorOutcome, PerformanceRecord, PerformanceReport, TargetViolation};

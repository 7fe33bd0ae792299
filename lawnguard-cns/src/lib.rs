//! lawnguard-cns: graduated safety response for lawnguard
//!
//! Provides:
//! - Category × safety-level response policies
//! - The safety response state machine with escalation and manual override
//! - An actor service that owns the machine and drives actuation
//! - Pluggable actuation sinks

pub mod actuation;
pub mod config;
pub mod error;
pub mod policy;
pub mod response;
pub mod service;

pub use actuation::{ActionSink, BroadcastSink, MemorySink};
pub use config::SafetyConfig;
pub use error::CnsError;
pub use policy::{PolicyTable, ResponsePolicy};
pub use response::{ActiveResponse, ActiveResponseSummary, SafetyStateMachine, SafetyStats, SafetyStatus};
pub use service::{SafetyCommand, SafetyHandle, SafetyService};

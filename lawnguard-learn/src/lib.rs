//! lawnguard-learn: adaptive confidence learning
//!
//! Field feedback becomes labelled learning examples; rolling metrics over
//! those examples drive per-category and per-environment confidence
//! adjustments that the integration supervisor applies to live detections.

pub mod adjustment;
pub mod config;
pub mod environment;
pub mod error;
pub mod feedback;
pub mod metrics;
pub mod service;
pub mod store;
pub mod system;

pub use adjustment::{AdjustmentEntry, AdjustmentKey, AdjustmentTable};
pub use config::{LearningConfig, UnknownOriginPolicy};
pub use environment::{EnvironmentContext, EnvironmentKey, GrassCondition, LightingBand, Weather};
pub use error::LearningError;
pub use feedback::{FeedbackEvent, FeedbackKind, GroundTruth, LearningExample};
pub use metrics::ModelPerformanceMetrics;
pub use service::{LearningCommand, LearningHandle, LearningService, LearningStatus};
pub use store::{JsonFileStore, LearningSnapshot, LearningStore};
pub use system::{AdaptationTrigger, AdaptiveLearningSystem, AdjustmentSnapshot, EnvironmentTick, IngestOutcome};

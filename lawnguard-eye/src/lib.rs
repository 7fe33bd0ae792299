//! lawnguard-eye: obstacle detection pipeline
//!
//! Turns camera frames into fused, temporally confirmed and motion-annotated
//! obstacle detections. Inference runs behind the [`Detector`] trait; the
//! pipeline owns ensemble fusion, the temporal consistency filter and the
//! motion tracker, and escalates CRITICAL detections ahead of filtering.

pub mod config;
pub mod detector;
pub mod error;
pub mod pipeline;
pub mod processing;

pub use config::{PipelineConfig, TemporalConfig};
pub use detector::{estimate_distance, normalize, Detector, Frame, RawDetection, ReplayDetector};
pub use error::VisionError;
pub use pipeline::{
    CycleOutput, DetectionPipeline, PipelineHandle, PipelineStats, PipelineStatsSnapshot, PipelineWorker,
};
pub use processing::{EnsembleFusion, MotionTracker, TemporalFilter};

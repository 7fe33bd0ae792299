//! lawnguard-core: shared data model for the lawnguard safety core
//!
//! Provides:
//! - Detection records and the closed category / safety-level / tier enumerations
//! - Bounding-box geometry (IoU)
//! - The outbound message catalogue with its wire-stable topics
//! - The workspace-wide error type

pub mod error;
pub mod messages;
pub mod types;

pub use error::{Error, Result};
pub use messages::{Envelope, OutboundMessage};
pub use types::{
    BoundingBox, Detection, DetectorSource, MotionVector, ObjectCategory, ResponseTier,
    SafetyLevel, Trajectory, TrajectoryPoint,
};

//! Detection post-processing stages, applied in order: fusion, temporal filter, motion

pub mod fusion;
pub mod motion;
pub mod temporal;

pub use fusion::EnsembleFusion;
pub use motion::MotionTracker;
pub use temporal::{FilterKey, FilterState, TemporalFilter};

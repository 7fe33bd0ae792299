//! Obstacle detection pipeline.
//!
//! [`DetectionPipeline`] runs one cycle (inference, fusion, temporal filter,
//! motion) and owns all per-cycle state. [`PipelineWorker::spawn`] moves it
//! onto a dedicated task fed by a bounded frame queue and drained through a
//! bounded result queue.

use crate::config::PipelineConfig;
use crate::detector::{normalize, Detector, Frame};
use crate::error::VisionError;
use crate::processing::{EnsembleFusion, MotionTracker, TemporalFilter};
use lawnguard_core::Detection;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Result of one pipeline cycle
#[derive(Debug, Clone)]
pub struct CycleOutput {
    pub frame_id: u64,
    /// Fused, temporally confirmed, motion-annotated detections
    pub detections: Vec<Detection>,
    /// Fused detections at CRITICAL level, escalated before filtering
    pub critical: Vec<Detection>,
    pub latency_ms: f64,
    pub inference_failures: u32,
}

/// Shared pipeline counters
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_submitted: AtomicU64,
    frames_dropped: AtomicU64,
    frames_processed: AtomicU64,
    results_dropped: AtomicU64,
    inference_failures: AtomicU64,
    slow_cycles: AtomicU64,
    critical_escalations: AtomicU64,
    critical_dropped: AtomicU64,
    total_latency_us: AtomicU64,
    max_latency_us: AtomicU64,
    last_latency_us: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatsSnapshot {
    pub frames_submitted: u64,
    pub frames_dropped: u64,
    pub frames_processed: u64,
    /// Results dropped because the output queue was full
    pub queue_pressure: u64,
    pub inference_failures: u64,
    pub slow_cycles: u64,
    pub critical_escalations: u64,
    pub critical_dropped: u64,
    pub average_latency_ms: f64,
    pub max_latency_ms: f64,
    pub last_latency_ms: f64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        let processed = self.frames_processed.load(Ordering::Relaxed);
        let total_us = self.total_latency_us.load(Ordering::Relaxed);
        PipelineStatsSnapshot {
            frames_submitted: self.frames_submitted.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_processed: processed,
            queue_pressure: self.results_dropped.load(Ordering::Relaxed),
            inference_failures: self.inference_failures.load(Ordering::Relaxed),
            slow_cycles: self.slow_cycles.load(Ordering::Relaxed),
            critical_escalations: self.critical_escalations.load(Ordering::Relaxed),
            critical_dropped: self.critical_dropped.load(Ordering::Relaxed),
            average_latency_ms: if processed > 0 {
                total_us as f64 / processed as f64 / 1000.0
            } else {
                0.0
            },
            max_latency_ms: self.max_latency_us.load(Ordering::Relaxed) as f64 / 1000.0,
            last_latency_ms: self.last_latency_us.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }

    fn record_cycle(&self, latency_us: u64, slow: bool, failures: u32) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
        self.max_latency_us.fetch_max(latency_us, Ordering::Relaxed);
        self.last_latency_us.store(latency_us, Ordering::Relaxed);
        if slow {
            self.slow_cycles.fetch_add(1, Ordering::Relaxed);
        }
        if failures > 0 {
            self.inference_failures.fetch_add(failures as u64, Ordering::Relaxed);
        }
    }
}

/// Single-owner detection pipeline
pub struct DetectionPipeline {
    config: PipelineConfig,
    detectors: Vec<Arc<dyn Detector>>,
    fusion: EnsembleFusion,
    temporal: TemporalFilter,
    motion: MotionTracker,
}

impl DetectionPipeline {
    /// Create a new detection pipeline
    pub fn new(config: PipelineConfig, detectors: Vec<Arc<dyn Detector>>) -> Result<Self, VisionError> {
        config.validate().map_err(VisionError::Config)?;

        Ok(Self {
            fusion: EnsembleFusion::new(config.fusion_iou_threshold),
            temporal: TemporalFilter::new(config.temporal.clone()),
            motion: MotionTracker::new(),
            detectors,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every detector on the frame.
    ///
    /// A failing detector is logged and contributes nothing; the cycle goes on.
    pub async fn infer(&self, frame: &Frame) -> (Vec<Detection>, u32) {
        let mut detections = Vec::new();
        let mut failures = 0;

        for detector in &self.detectors {
            match detector.detect(frame).await {
                Ok(raw) => detections.extend(normalize(frame, detector.source(), raw)),
                Err(e) => {
                    failures += 1;
                    warn!("Detector {:?} failed on frame {}: {}", detector.source(), frame.id, e);
                }
            }
        }

        (detections, failures)
    }

    /// Ensemble fusion stage
    pub fn fuse(&self, detections: Vec<Detection>) -> Vec<Detection> {
        self.fusion.fuse(detections)
    }

    /// Temporal filter then motion stage
    pub fn filter_and_track(&mut self, fused: Vec<Detection>) -> Vec<Detection> {
        let confirmed: Vec<Detection> = fused
            .into_iter()
            .filter_map(|detection| self.temporal.update(detection))
            .collect();
        self.motion.update(confirmed)
    }

    /// Fusion, filter and motion over already-normalised detections
    pub fn process_detections(&mut self, frame_id: u64, detections: Vec<Detection>) -> CycleOutput {
        let started = Instant::now();
        let fused = self.fuse(detections);
        let critical = critical_of(&fused);
        let detections = self.filter_and_track(fused);

        CycleOutput {
            frame_id,
            detections,
            critical,
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
            inference_failures: 0,
        }
    }

    /// One full cycle over a frame
    pub async fn process_frame(&mut self, frame: &Frame) -> CycleOutput {
        let started = Instant::now();
        let (raw, inference_failures) = self.infer(frame).await;
        let mut output = self.process_detections(frame.id, raw);
        output.inference_failures = inference_failures;
        output.latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        output
    }

    pub fn temporal_filter(&self) -> &TemporalFilter {
        &self.temporal
    }
}

fn critical_of(detections: &[Detection]) -> Vec<Detection> {
    detections.iter().filter(|d| d.is_critical()).cloned().collect()
}

/// Caller-side handle to a running pipeline worker
#[derive(Clone)]
pub struct PipelineHandle {
    frame_sender: mpsc::Sender<Frame>,
    stats: Arc<PipelineStats>,
}

impl PipelineHandle {
    /// Queue a frame without blocking.
    ///
    /// When the input queue is full the frame is dropped and counted.
    pub fn submit(&self, frame: Frame) -> Result<(), VisionError> {
        self.stats.frames_submitted.fetch_add(1, Ordering::Relaxed);
        match self.frame_sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(frame)) => {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Frame queue full, dropping frame {}", frame.id);
                Err(VisionError::QueueFull(format!("frame {}", frame.id)))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(VisionError::Closed),
        }
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Channels produced when a worker is spawned
pub struct PipelineWorker {
    pub handle: PipelineHandle,
    /// Pull-based result queue
    pub results: mpsc::Receiver<CycleOutput>,
    pub join: JoinHandle<()>,
}

impl PipelineWorker {
    /// Spawn the dedicated worker task.
    ///
    /// `critical` receives every cycle's fused CRITICAL detections, taken
    /// ahead of temporal filtering. The worker exits when `shutdown` flips to `true` or every
    /// handle is dropped.
    pub fn spawn(
        mut pipeline: DetectionPipeline,
        critical: Option<mpsc::Sender<Vec<Detection>>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> PipelineWorker {
        let config = pipeline.config().clone();
        let (frame_sender, mut frame_receiver) = mpsc::channel::<Frame>(config.input_capacity);
        let (result_sender, results) = mpsc::channel::<CycleOutput>(config.output_capacity);
        let stats = Arc::new(PipelineStats::default());
        let worker_stats = stats.clone();

        let join = tokio::spawn(async move {
            info!("Detection pipeline worker started");
            loop {
                let frame = tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                    frame = frame_receiver.recv() => match frame {
                        Some(frame) => frame,
                        None => break,
                    },
                };

                let output = pipeline.process_frame(&frame).await;

                if !output.critical.is_empty() {
                    if let Some(sender) = &critical {
                        let count = output.critical.len() as u64;
                        match sender.try_send(output.critical.clone()) {
                            Ok(()) => {
                                worker_stats.critical_escalations.fetch_add(count, Ordering::Relaxed);
                            }
                            Err(e) => {
                                worker_stats.critical_dropped.fetch_add(count, Ordering::Relaxed);
                                error!("Critical escalation channel unavailable: {}", e);
                            }
                        }
                    }
                }

                let slow = output.latency_ms > config.latency_target_ms;
                if slow {
                    warn!(
                        "Pipeline cycle for frame {} took {:.1}ms (target {:.0}ms)",
                        frame.id, output.latency_ms, config.latency_target_ms
                    );
                }
                worker_stats.record_cycle((output.latency_ms * 1000.0) as u64, slow, output.inference_failures);

                match result_sender.try_send(output) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(dropped)) => {
                        worker_stats.results_dropped.fetch_add(1, Ordering::Relaxed);
                        debug!("Result queue full, dropping result for frame {}", dropped.frame_id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        warn!("Result queue closed, stopping pipeline worker");
                        break;
                    }
                }
            }
            info!("Detection pipeline worker stopped");
        });

        PipelineWorker {
            handle: PipelineHandle {
                frame_sender,
                stats,
            },
            results,
            join,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{RawDetection, ReplayDetector};
    use async_trait::async_trait;
    use lawnguard_core::{BoundingBox, DetectorSource, ObjectCategory, SafetyLevel};
    use std::time::Duration;

    struct FailingDetector;

    #[async_trait]
    impl Detector for FailingDetector {
        fn source(&self) -> DetectorSource {
            DetectorSource::Backup
        }

        async fn detect(&self, _frame: &Frame) -> Result<Vec<RawDetection>, VisionError> {
            Err(VisionError::Inference("accelerator unavailable".to_string()))
        }
    }

    fn replay_pipeline() -> DetectionPipeline {
        DetectionPipeline::new(
            PipelineConfig::default(),
            vec![Arc::new(ReplayDetector::new(DetectorSource::Primary))],
        )
        .unwrap()
    }

    fn dog_frame(id: u64, distance: f64) -> Frame {
        Frame::new(id, 640, 480).with_annotations(vec![RawDetection::new(
            "dog",
            0.9,
            BoundingBox::new(100.0, 100.0, 60.0, 60.0),
        )
        .with_id("dog-1")
        .with_distance(distance)])
    }

    #[tokio::test]
    async fn test_process_frame_confirms_after_three_cycles() {
        let mut pipeline = replay_pipeline();
        assert!(pipeline.process_frame(&dog_frame(1, 5.0)).await.detections.is_empty());
        assert!(pipeline.process_frame(&dog_frame(2, 5.0)).await.detections.is_empty());
        let output = pipeline.process_frame(&dog_frame(3, 5.0)).await;
        assert_eq!(output.detections.len(), 1);
        assert_eq!(output.detections[0].category, ObjectCategory::Dog);
        assert!(output.critical.is_empty());
    }

    #[tokio::test]
    async fn test_critical_detection_reported_before_confirmation() {
        let mut pipeline = replay_pipeline();
        let output = pipeline.process_frame(&dog_frame(1, 0.5)).await;
        assert!(output.detections.is_empty());
        assert_eq!(output.critical.len(), 1);
        assert_eq!(output.critical[0].safety_level, SafetyLevel::Critical);
    }

    #[tokio::test]
    async fn test_inference_failure_is_isolated() {
        let mut pipeline = DetectionPipeline::new(
            PipelineConfig::default(),
            vec![
                Arc::new(FailingDetector),
                Arc::new(ReplayDetector::new(DetectorSource::Primary)),
            ],
        )
        .unwrap();
        let output = pipeline.process_frame(&dog_frame(1, 0.5)).await;
        assert_eq!(output.inference_failures, 1);
        assert_eq!(output.critical.len(), 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = PipelineConfig::default();
        config.output_capacity = 0;
        assert!(DetectionPipeline::new(config, Vec::new()).is_err());
    }

    #[tokio::test]
    async fn test_worker_escalates_critical_and_ships_results() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (critical_tx, mut critical_rx) = mpsc::channel(4);
        let mut worker = PipelineWorker::spawn(replay_pipeline(), Some(critical_tx), shutdown_rx);

        worker.handle.submit(dog_frame(1, 0.5)).unwrap();

        let critical = tokio::time::timeout(Duration::from_secs(2), critical_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(critical[0].object_id, "dog-1");

        let output = tokio::time::timeout(Duration::from_secs(2), worker.results.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(output.frame_id, 1);

        let stats = worker.handle.stats();
        assert_eq!(stats.frames_processed, 1);
        assert_eq!(stats.critical_escalations, 1);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), worker.join).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_worker_output_matches_direct_cycle() {
        let detectors = || -> Vec<Arc<dyn Detector>> {
            vec![
                Arc::new(FailingDetector),
                Arc::new(ReplayDetector::new(DetectorSource::Primary)),
            ]
        };
        let mut direct = DetectionPipeline::new(PipelineConfig::default(), detectors()).unwrap();
        let expected = direct.process_frame(&dog_frame(7, 0.5)).await;

        let pipeline = DetectionPipeline::new(PipelineConfig::default(), detectors()).unwrap();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (critical_tx, mut critical_rx) = mpsc::channel(4);
        let mut worker = PipelineWorker::spawn(pipeline, Some(critical_tx), shutdown_rx);
        worker.handle.submit(dog_frame(7, 0.5)).unwrap();

        let output = tokio::time::timeout(Duration::from_secs(2), worker.results.recv())
            .await
            .unwrap()
            .unwrap();
        let critical = critical_rx.try_recv().unwrap();

        let key = |detections: &[Detection]| -> Vec<(String, SafetyLevel, f64)> {
            detections
                .iter()
                .map(|d| (d.object_id.clone(), d.safety_level, d.confidence))
                .collect()
        };
        assert_eq!(key(&output.detections), key(&expected.detections));
        assert_eq!(key(&output.critical), key(&expected.critical));
        assert_eq!(critical, output.critical);
        assert_eq!(output.inference_failures, 1);

        let stats = worker.handle.stats();
        assert_eq!(stats.inference_failures, 1);
        assert!(stats.last_latency_ms >= 0.0);
    }

    #[tokio::test]
    async fn test_full_output_queue_counts_pressure() {
        let mut config = PipelineConfig::default();
        config.output_capacity = 1;
        let pipeline = DetectionPipeline::new(
            config,
            vec![Arc::new(ReplayDetector::new(DetectorSource::Primary))],
        )
        .unwrap();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = PipelineWorker::spawn(pipeline, None, shutdown_rx);

        for id in 0..3 {
            // wait until the previous frame was processed so the input queue never overflows
            worker.handle.submit(dog_frame(id, 5.0)).unwrap();
            for _ in 0..200 {
                if worker.handle.stats().frames_processed > id {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        let stats = worker.handle.stats();
        assert_eq!(stats.frames_processed, 3);
        assert_eq!(stats.queue_pressure, 2);
    }
}

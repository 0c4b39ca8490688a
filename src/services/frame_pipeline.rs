/// Frame Pipeline
///
/// Drives one annotated stream: open a capture device through the fallback
/// chain, then per frame mirror, detect landmarks, advance the analyzer,
/// publish its snapshot, draw the skeleton and encode a multipart part.
///
/// The pipeline is a blocking iterator. It owns the capture device and
/// releases it when dropped, so a client disconnect (receiver dropped)
/// ends the loop and frees the camera.
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::CaptureError;
use crate::models::landmark::LandmarkSet;
use crate::models::session::{FeedbackSnapshot, Highlight};
use crate::services::capture::{open_with_fallback, CaptureBackend, CaptureSettings, CaptureTarget, FrameSource};
use crate::services::exercise_classifier::{AutoDetectSession, AutoSnapshot};
use crate::services::landmark_provider::LandmarkProvider;
use crate::services::overlay;
use crate::services::rep_counter::ExerciseSession;

/// Per-frame analysis stage of a stream
pub trait FrameAnalyzer: Send {
    type Snapshot: Clone + Send + Sync + 'static;

    /// Advance by one frame and return the overlay highlight
    fn analyze(&mut self, landmarks: Option<&LandmarkSet>, now: Instant) -> Highlight;

    fn snapshot(&self) -> Self::Snapshot;

    /// Record a stream-level failure in the published feedback
    fn report_fatal(&mut self, message: &str);

    /// Whether the frame at `index` (0-based) should be analyzed
    fn wants_frame(&self, _index: u64) -> bool {
        true
    }
}

impl FrameAnalyzer for ExerciseSession {
    type Snapshot = FeedbackSnapshot;

    fn analyze(&mut self, landmarks: Option<&LandmarkSet>, _now: Instant) -> Highlight {
        self.process(landmarks).highlight()
    }

    fn snapshot(&self) -> FeedbackSnapshot {
        ExerciseSession::snapshot(self)
    }

    fn report_fatal(&mut self, message: &str) {
        ExerciseSession::report_fatal(self, message)
    }
}

impl FrameAnalyzer for AutoDetectSession {
    type Snapshot = AutoSnapshot;

    fn analyze(&mut self, landmarks: Option<&LandmarkSet>, now: Instant) -> Highlight {
        self.observe(landmarks, now).highlight()
    }

    fn snapshot(&self) -> AutoSnapshot {
        AutoDetectSession::snapshot(self)
    }

    fn report_fatal(&mut self, message: &str) {
        AutoDetectSession::report_fatal(self, message)
    }
}

/// Analyze only every `stride`-th frame; the rest pass through unannotated
#[derive(Debug, Clone)]
pub struct Strided<A> {
    inner: A,
    stride: u64,
}

impl<A> Strided<A> {
    pub fn new(inner: A, stride: u32) -> Self {
        Self {
            inner,
            stride: u64::from(stride.max(1)),
        }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }
}

impl<A: FrameAnalyzer> FrameAnalyzer for Strided<A> {
    type Snapshot = A::Snapshot;

    fn analyze(&mut self, landmarks: Option<&LandmarkSet>, now: Instant) -> Highlight {
        self.inner.analyze(landmarks, now)
    }

    fn snapshot(&self) -> A::Snapshot {
        self.inner.snapshot()
    }

    fn report_fatal(&mut self, message: &str) {
        self.inner.report_fatal(message)
    }

    fn wants_frame(&self, index: u64) -> bool {
        (index + 1) % self.stride == 0
    }
}

/// Capture and encoding options shared by every stream
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub chain: Vec<CaptureTarget>,
    pub settings: CaptureSettings,
    pub jpeg_quality: u8,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            chain: CaptureTarget::default_chain(),
            settings: CaptureSettings::default(),
            jpeg_quality: 80,
        }
    }
}

/// One running annotated stream
pub struct FramePipeline<A: FrameAnalyzer> {
    id: Uuid,
    source: Box<dyn FrameSource>,
    provider: Box<dyn LandmarkProvider>,
    analyzer: A,
    publisher: Arc<watch::Sender<A::Snapshot>>,
    jpeg_quality: u8,
    frame_index: u64,
    finished: bool,
}

impl<A: FrameAnalyzer> FramePipeline<A> {
    /// Open the capture device and publish the analyzer's initial snapshot
    ///
    /// When no device in the chain opens, the fatal message is published
    /// and the error returned; the stream then yields no frames.
    pub fn open(
        backend: &dyn CaptureBackend,
        options: &PipelineOptions,
        provider: Box<dyn LandmarkProvider>,
        mut analyzer: A,
        publisher: Arc<watch::Sender<A::Snapshot>>,
    ) -> Result<Self, CaptureError> {
        let id = Uuid::new_v4();

        let source = match open_with_fallback(backend, &options.chain, &options.settings) {
            Ok(source) => source,
            Err(e) => {
                error!("Stream {}: {}", id, e);
                analyzer.report_fatal(&e.to_string());
                publisher.send_replace(analyzer.snapshot());
                return Err(e);
            }
        };

        publisher.send_replace(analyzer.snapshot());
        info!("Stream {} started", id);

        Ok(Self {
            id,
            source,
            provider,
            analyzer,
            publisher,
            jpeg_quality: options.jpeg_quality,
            frame_index: 0,
            finished: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn analyzer(&self) -> &A {
        &self.analyzer
    }

    fn next_part(&mut self) -> Result<Bytes, CaptureError> {
        let mut frame = self.source.read()?;
        overlay::mirror(&mut frame);

        let index = self.frame_index;
        self.frame_index += 1;

        if self.analyzer.wants_frame(index) {
            let landmarks = match self.provider.detect(&frame) {
                Ok(landmarks) => landmarks,
                Err(e) => {
                    debug!("Stream {}: landmark detection failed: {:#}", self.id, e);
                    None
                }
            };

            let highlight = self.analyzer.analyze(landmarks.as_ref(), Instant::now());
            self.publisher.send_replace(self.analyzer.snapshot());

            if let Some(landmarks) = &landmarks {
                overlay::draw_skeleton(&mut frame, landmarks, highlight);
            }
        }

        let jpeg = overlay::encode_jpeg(&frame, self.jpeg_quality)
            .map_err(|e| CaptureError::Read(format!("{:#}", e)))?;
        Ok(overlay::multipart_part(&jpeg))
    }
}

impl<A: FrameAnalyzer> Iterator for FramePipeline<A> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if self.finished {
            return None;
        }

        match self.next_part() {
            Ok(part) => Some(part),
            Err(CaptureError::EndOfStream) => {
                info!("Stream {}: capture ended", self.id);
                self.finished = true;
                None
            }
            Err(e) => {
                warn!("Stream {}: {}", self.id, e);
                self.finished = true;
                None
            }
        }
    }
}

impl<A: FrameAnalyzer> Drop for FramePipeline<A> {
    fn drop(&mut self) {
        info!("Stream {} released after {} frames", self.id, self.frame_index);
    }
}

/// Run a pipeline on the blocking pool and hand its parts to a channel
///
/// The returned receiver yields nothing when the device cannot be opened.
/// Dropping the receiver stops the pipeline at the next frame.
pub fn spawn_stream<A>(
    backend: Arc<dyn CaptureBackend>,
    options: PipelineOptions,
    provider: Box<dyn LandmarkProvider>,
    analyzer: A,
    publisher: Arc<watch::Sender<A::Snapshot>>,
) -> mpsc::Receiver<Bytes>
where
    A: FrameAnalyzer + 'static,
{
    let (tx, rx) = mpsc::channel(2);

    tokio::task::spawn_blocking(move || {
        let Ok(pipeline) = FramePipeline::open(backend.as_ref(), &options, provider, analyzer, publisher) else {
            return;
        };
        let id = pipeline.id();

        for part in pipeline {
            if tx.blocking_send(part).is_err() {
                debug!("Stream {}: client disconnected", id);
                break;
            }
        }
    });

    rx
}

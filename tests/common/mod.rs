#![allow(dead_code)]

use fitjourney::api::AppState;
use fitjourney::config::AppConfig;
use fitjourney::errors::CaptureError;
use fitjourney::models::landmark::{Landmark, LandmarkSet, PoseLandmark};
use fitjourney::services::capture::{CaptureBackend, CaptureSettings, CaptureTarget, FrameSource};
use fitjourney::services::landmark_provider::{LandmarkProvider, ProviderFactory};
use fitjourney::services::rule_catalog::RuleCatalog;
use image::RgbImage;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Once};

static INIT: Once = Once::new();

/// Initialize test logging
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    });
}

/// Side-view body with vertical shins and hanging arms
///
/// Knee angles are set per leg, `lean` tilts the torso forward from
/// vertical. Hip angle (shoulder-hip-knee) is then `right_knee - lean`.
/// All landmarks lie in the image plane (z = 0).
pub fn side_pose(left_knee: f32, right_knee: f32, lean: f32) -> LandmarkSet {
    const THIGH: f32 = 0.2;
    const SHIN: f32 = 0.2;
    const TORSO: f32 = 0.3;
    const FOREARM: f32 = 0.12;

    let hip = (0.45, 0.5);
    let leg = |knee_angle: f32| {
        let a = knee_angle.to_radians();
        let knee = (hip.0 + THIGH * a.sin(), hip.1 - THIGH * a.cos());
        let ankle = (knee.0, knee.1 + SHIN);
        let heel = (ankle.0 - 0.05, ankle.1);
        (knee, ankle, heel)
    };
    let (left_knee, left_ankle, left_heel) = leg(left_knee);
    let (right_knee, right_ankle, right_heel) = leg(right_knee);

    let phi = lean.to_radians();
    let shoulder = (hip.0 + TORSO * phi.sin(), hip.1 - TORSO * phi.cos());
    let elbow = (shoulder.0, shoulder.1 + FOREARM);
    let wrist = (elbow.0, elbow.1 + FOREARM);

    let at = |(x, y): (f32, f32)| Landmark::at(x, y);
    LandmarkSet::filled(Landmark::at(0.5, 0.3))
        .with(PoseLandmark::LeftShoulder, at(shoulder))
        .with(PoseLandmark::RightShoulder, at(shoulder))
        .with(PoseLandmark::LeftElbow, at(elbow))
        .with(PoseLandmark::RightElbow, at(elbow))
        .with(PoseLandmark::LeftWrist, at(wrist))
        .with(PoseLandmark::RightWrist, at(wrist))
        .with(PoseLandmark::LeftHip, at(hip))
        .with(PoseLandmark::RightHip, at(hip))
        .with(PoseLandmark::LeftKnee, at(left_knee))
        .with(PoseLandmark::RightKnee, at(right_knee))
        .with(PoseLandmark::LeftAnkle, at(left_ankle))
        .with(PoseLandmark::RightAnkle, at(right_ankle))
        .with(PoseLandmark::LeftHeel, at(left_heel))
        .with(PoseLandmark::RightHeel, at(right_heel))
}

/// Standing tall, slight forward lean
pub fn standing() -> LandmarkSet {
    side_pose(170.0, 170.0, 6.0)
}

/// Bottom of a full-body squat
pub fn squat_bottom() -> LandmarkSet {
    side_pose(80.0, 80.0, 20.0)
}

struct BlankFrames {
    remaining: usize,
}

impl FrameSource for BlankFrames {
    fn read(&mut self) -> Result<RgbImage, CaptureError> {
        if self.remaining == 0 {
            return Err(CaptureError::EndOfStream);
        }
        self.remaining -= 1;
        Ok(RgbImage::new(64, 48))
    }
}

/// Capture backend that opens one target only and yields blank frames
pub struct ScriptedBackend {
    opens_on: Option<CaptureTarget>,
    frames: usize,
    attempts: Mutex<Vec<CaptureTarget>>,
}

impl ScriptedBackend {
    pub fn opening_on(target: CaptureTarget, frames: usize) -> Arc<Self> {
        Arc::new(Self {
            opens_on: Some(target),
            frames,
            attempts: Mutex::new(Vec::new()),
        })
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            opens_on: None,
            frames: 0,
            attempts: Mutex::new(Vec::new()),
        })
    }

    pub fn attempts(&self) -> Vec<CaptureTarget> {
        self.attempts.lock().unwrap().clone()
    }
}

impl CaptureBackend for ScriptedBackend {
    fn open(
        &self,
        target: CaptureTarget,
        _settings: &CaptureSettings,
    ) -> Result<Box<dyn FrameSource>, CaptureError> {
        self.attempts.lock().unwrap().push(target);
        if Some(target) == self.opens_on {
            Ok(Box::new(BlankFrames { remaining: self.frames }))
        } else {
            Err(CaptureError::Open {
                target,
                reason: "device busy".to_string(),
            })
        }
    }
}

/// Provider replaying a fixed sequence of detections, then no detection
pub struct ScriptedProvider {
    script: VecDeque<Option<LandmarkSet>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Option<LandmarkSet>>) -> Self {
        Self { script: script.into() }
    }
}

impl LandmarkProvider for ScriptedProvider {
    fn detect(&mut self, _frame: &RgbImage) -> anyhow::Result<Option<LandmarkSet>> {
        Ok(self.script.pop_front().flatten())
    }
}

/// Factory handing every stream a fresh copy of the script
pub fn scripted_factory(script: Vec<Option<LandmarkSet>>) -> ProviderFactory {
    Arc::new(move || Ok(Box::new(ScriptedProvider::new(script.clone())) as Box<dyn LandmarkProvider>))
}

/// Repeat a pose `n` times as provider output
pub fn frames(pose: &LandmarkSet, n: usize) -> Vec<Option<LandmarkSet>> {
    vec![Some(pose.clone()); n]
}

/// Application state over the built-in catalog and default configuration
pub fn test_state(backend: Arc<dyn CaptureBackend>, factory: ProviderFactory) -> AppState {
    init_test_logging();
    AppState::new(RuleCatalog::builtin(), backend, factory, AppConfig::default())
}

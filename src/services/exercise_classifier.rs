/// Exercise Classifier (auto-detect mode)
///
/// Labels every analysed frame with a coarse heuristic, keeps the most recent
/// labels in a vote window and locks onto an exercise once enough of the
/// window agrees. Frames are then routed to that exercise's repetition
/// counter. The lock is dropped again when no repetition is counted for a
/// while.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::errors::{RuleTableError, TrackingError};
use crate::models::landmark::{LandmarkSet, PoseLandmark};
use crate::models::rule_table::{AngleFormula, Measure};
use crate::models::session::{RepState, Side};
use crate::services::angle_engine::AngleEngine;
use crate::services::rep_counter::{
    ExerciseSession, FrameOutcome, NO_POSE_MESSAGE, TRACKING_ERROR_MESSAGE,
};
use crate::services::rule_catalog::RuleCatalog;

pub const DETECTING: &str = "Detecting...";
pub const START_TO_LOCK_MESSAGE: &str = "Start exercising to lock.";
pub const UNLOCK_MESSAGE: &str = "No reps detected. Unlocking...";

/// Closed set of labels the classifier produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExerciseLabel {
    Squat,
    #[serde(rename = "Push-up")]
    PushUp,
    Lunge,
    #[serde(rename = "Jumping Jack")]
    JumpingJack,
    #[serde(rename = "Sit-up")]
    SitUp,
    Unknown,
}

impl ExerciseLabel {
    /// Labels that map to a counting table
    pub const KNOWN: [Self; 5] = [
        Self::Squat,
        Self::PushUp,
        Self::Lunge,
        Self::JumpingJack,
        Self::SitUp,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Squat => "Squat",
            Self::PushUp => "Push-up",
            Self::Lunge => "Lunge",
            Self::JumpingJack => "Jumping Jack",
            Self::SitUp => "Sit-up",
            Self::Unknown => "Unknown",
        }
    }

    /// Counting table used once this label is locked
    pub fn table_id(&self) -> Option<&'static str> {
        match self {
            Self::Squat => Some("auto_squat"),
            Self::PushUp => Some("auto_push_up"),
            Self::Lunge => Some("auto_lunge"),
            Self::JumpingJack => Some("auto_jumping_jack"),
            Self::SitUp => Some("auto_sit_up"),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for ExerciseLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Angles the heuristic looks at, all on the image plane
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierAngles {
    pub left_knee: f64,
    pub right_knee: f64,
    pub left_elbow: f64,
    pub right_elbow: f64,
    /// Shoulder - hip - knee
    pub left_hip: f64,
    /// Elbow - shoulder - hip
    pub left_shoulder: f64,
}

impl ClassifierAngles {
    pub fn from_landmarks(landmarks: &LandmarkSet, engine: &AngleEngine) -> Result<Self, TrackingError> {
        use PoseLandmark::*;
        let joint = |a, vertex, c| {
            engine.measure(
                landmarks,
                &Measure::Joint {
                    a,
                    vertex,
                    c,
                    formula: AngleFormula::Planar,
                },
            )
        };

        Ok(Self {
            left_knee: joint(LeftHip, LeftKnee, LeftAnkle)?,
            right_knee: joint(RightHip, RightKnee, RightAnkle)?,
            left_elbow: joint(LeftShoulder, LeftElbow, LeftWrist)?,
            right_elbow: joint(RightShoulder, RightElbow, RightWrist)?,
            left_hip: joint(LeftShoulder, LeftHip, LeftKnee)?,
            left_shoulder: joint(LeftElbow, LeftShoulder, LeftHip)?,
        })
    }

    pub fn knee_avg(&self) -> f64 {
        (self.left_knee + self.right_knee) / 2.0
    }

    pub fn elbow_avg(&self) -> f64 {
        (self.left_elbow + self.right_elbow) / 2.0
    }

    fn arms_wide(&self) -> bool {
        self.left_shoulder > 90.0 && self.left_elbow > 150.0 && self.right_elbow > 150.0
    }
}

/// Per-frame heuristic; the first matching rule wins
pub fn classify(angles: &ClassifierAngles) -> ExerciseLabel {
    let knee_avg = angles.knee_avg();
    let left_hip = angles.left_hip;

    if knee_avg < 100.0 && left_hip > 70.0 && left_hip < 140.0 {
        ExerciseLabel::Squat
    } else if angles.elbow_avg() < 100.0 && knee_avg > 150.0 {
        ExerciseLabel::PushUp
    } else if left_hip < 100.0 && knee_avg < 140.0 {
        ExerciseLabel::Lunge
    } else if angles.arms_wide() && knee_avg > 160.0 {
        ExerciseLabel::JumpingJack
    } else if left_hip < 90.0 && knee_avg < 90.0 {
        ExerciseLabel::SitUp
    } else {
        ExerciseLabel::Unknown
    }
}

/// Vote window and lock policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LockConfig {
    /// Number of recent labels kept
    pub window: usize,
    /// Votes a label needs to take the lock
    pub lock_threshold: usize,
    /// Minimum time between two switches
    pub cooldown: Duration,
    /// Consecutive frames without a repetition before the lock is dropped
    pub no_rep_limit: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            window: 15,
            lock_threshold: 10,
            cooldown: Duration::from_secs(2),
            no_rep_limit: 25,
        }
    }
}

/// Majority-vote lock over the most recent labels
#[derive(Debug, Clone)]
pub struct LockBuffer {
    config: LockConfig,
    window: VecDeque<ExerciseLabel>,
    active: Option<ExerciseLabel>,
    last_switch: Option<Instant>,
    no_rep_frames: u32,
}

impl LockBuffer {
    pub fn new(config: LockConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(config.window),
            config,
            active: None,
            last_switch: None,
            no_rep_frames: 0,
        }
    }

    pub fn active(&self) -> Option<ExerciseLabel> {
        self.active
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn no_rep_frames(&self) -> u32 {
        self.no_rep_frames
    }

    /// Most frequent label and its count; ties go to the most recently seen
    pub fn majority(&self) -> Option<(ExerciseLabel, usize)> {
        let mut counts: HashMap<ExerciseLabel, usize> = HashMap::new();
        for label in &self.window {
            *counts.entry(*label).or_default() += 1;
        }

        let mut best: Option<(ExerciseLabel, usize)> = None;
        for label in self.window.iter().rev() {
            let count = counts[label];
            if best.map_or(true, |(_, top)| count > top) {
                best = Some((*label, count));
            }
        }
        best
    }

    /// Record a frame's label; returns the new active label if the lock switched
    pub fn push(&mut self, label: ExerciseLabel, now: Instant) -> Option<ExerciseLabel> {
        if self.window.len() == self.config.window {
            self.window.pop_front();
        }
        self.window.push_back(label);

        let (leader, votes) = self.majority()?;
        if leader == ExerciseLabel::Unknown || Some(leader) == self.active {
            return None;
        }

        let cooled_down = self
            .last_switch
            .map_or(true, |last| now.saturating_duration_since(last) > self.config.cooldown);
        if cooled_down && votes >= self.config.lock_threshold {
            self.active = Some(leader);
            self.last_switch = Some(now);
            return Some(leader);
        }
        None
    }

    /// Track whether a locked frame counted a repetition; returns true when the lock is dropped
    pub fn record_outcome(&mut self, rep_completed: bool) -> bool {
        if self.active.is_none() {
            return false;
        }
        if rep_completed {
            self.no_rep_frames = 0;
            return false;
        }

        self.no_rep_frames += 1;
        if self.no_rep_frames >= self.config.no_rep_limit {
            self.active = None;
            self.window.clear();
            self.no_rep_frames = 0;
            return true;
        }
        false
    }
}

/// Read-only view of an auto-detect session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoSnapshot {
    pub current_exercise: String,
    pub active_exercise: Option<ExerciseLabel>,
    pub detected: Option<ExerciseLabel>,
    pub state: RepState,
    pub rep_counts: BTreeMap<String, u32>,
    pub feedback: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_side: Option<Side>,
    pub updated_at: DateTime<Utc>,
}

impl AutoSnapshot {
    pub fn initial() -> Self {
        Self {
            current_exercise: DETECTING.to_string(),
            active_exercise: None,
            detected: None,
            state: RepState::Up,
            rep_counts: ExerciseLabel::KNOWN
                .iter()
                .map(|label| (label.name().to_string(), 0))
                .collect(),
            feedback: vec!["Initializing...".to_string()],
            lead_side: None,
            updated_at: Utc::now(),
        }
    }
}

/// Auto-detect session: lock buffer plus one repetition counter per label
#[derive(Debug, Clone)]
pub struct AutoDetectSession {
    buffer: LockBuffer,
    engine: AngleEngine,
    sessions: BTreeMap<ExerciseLabel, ExerciseSession>,
    detected: Option<ExerciseLabel>,
    state: RepState,
    feedback: Vec<String>,
}

impl AutoDetectSession {
    pub fn new(catalog: &RuleCatalog, config: LockConfig, min_visibility: f32) -> Result<Self, RuleTableError> {
        let mut sessions = BTreeMap::new();
        for label in ExerciseLabel::KNOWN {
            let id = label.table_id().unwrap_or_default();
            let table = catalog
                .auto_table(id)
                .ok_or_else(|| RuleTableError::UnknownExercise(id.to_string()))?;
            sessions.insert(label, ExerciseSession::new(table).with_min_visibility(min_visibility));
        }

        Ok(Self {
            buffer: LockBuffer::new(config),
            engine: AngleEngine::new().with_min_visibility(min_visibility),
            sessions,
            detected: None,
            state: RepState::Up,
            feedback: vec!["Initializing...".to_string()],
        })
    }

    pub fn active(&self) -> Option<ExerciseLabel> {
        self.buffer.active()
    }

    pub fn rep_count(&self, label: ExerciseLabel) -> u32 {
        self.sessions.get(&label).map_or(0, ExerciseSession::rep_count)
    }

    pub fn feedback(&self) -> &[String] {
        &self.feedback
    }

    /// Classify one frame and route it to the locked exercise
    pub fn observe(&mut self, landmarks: Option<&LandmarkSet>, now: Instant) -> FrameOutcome {
        let Some(landmarks) = landmarks else {
            return self.settle(RepState::Wait, NO_POSE_MESSAGE);
        };

        let angles = match ClassifierAngles::from_landmarks(landmarks, &self.engine) {
            Ok(angles) => angles,
            Err(e) => {
                debug!("auto-detect: tracking fault: {}", e);
                return self.settle(RepState::Error, TRACKING_ERROR_MESSAGE);
            }
        };

        let label = classify(&angles);
        self.detected = Some(label);
        if let Some(locked) = self.buffer.push(label, now) {
            info!("auto-detect: locked onto {}", locked);
        }

        let Some(active) = self.buffer.active() else {
            return self.settle(RepState::Up, START_TO_LOCK_MESSAGE);
        };

        let mut outcome = match self.sessions.get_mut(&active) {
            Some(session) => session.process(Some(landmarks)),
            None => return self.settle(RepState::Up, START_TO_LOCK_MESSAGE),
        };

        if self.buffer.record_outcome(outcome.rep_completed) {
            info!("auto-detect: no repetitions for {}, unlocking", active);
            outcome.feedback = vec![UNLOCK_MESSAGE.to_string()];
        }

        self.state = outcome.state;
        self.feedback = outcome.feedback.clone();
        outcome
    }

    fn settle(&mut self, state: RepState, message: &str) -> FrameOutcome {
        self.state = state;
        self.feedback = vec![message.to_string()];
        FrameOutcome {
            state,
            rep_completed: false,
            form_error: false,
            feedback: self.feedback.clone(),
        }
    }

    /// Replace the feedback with a stream-level failure message
    pub fn report_fatal(&mut self, message: &str) {
        self.feedback = vec![message.to_string()];
    }

    pub fn snapshot(&self) -> AutoSnapshot {
        let active = self.buffer.active();
        AutoSnapshot {
            current_exercise: active.map_or_else(|| DETECTING.to_string(), |label| label.name().to_string()),
            active_exercise: active,
            detected: self.detected,
            state: self.state,
            rep_counts: self
                .sessions
                .iter()
                .map(|(label, session)| (label.name().to_string(), session.rep_count()))
                .collect(),
            feedback: self.feedback.clone(),
            lead_side: active
                .and_then(|label| self.sessions.get(&label))
                .and_then(ExerciseSession::lead_side),
            updated_at: Utc::now(),
        }
    }
}

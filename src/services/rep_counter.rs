/// Repetition State Machine
///
/// One engine drives every exercise. Per frame it computes the table's
/// angles, moves between the bottom (DOWN) and top (UP) positions, counts a
/// repetition on each qualifying DOWN -> UP transition and collects ordered
/// form feedback. Per-frame faults are absorbed into the WAIT and ERROR
/// states and never leave this module.
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::models::landmark::LandmarkSet;
use crate::models::rule_table::{render_message, ExerciseRuleTable};
use crate::models::session::{FeedbackSnapshot, Highlight, RepState, Side};
use crate::services::angle_engine::AngleEngine;

pub const NO_POSE_MESSAGE: &str = "No Pose Detected. Step back or adjust camera.";
pub const TRACKING_ERROR_MESSAGE: &str = "Tracking Error. Check joint visibility.";

/// Result of processing one frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameOutcome {
    pub state: RepState,
    pub rep_completed: bool,
    pub form_error: bool,
    pub feedback: Vec<String>,
}

impl FrameOutcome {
    /// Overlay color category for this frame
    pub fn highlight(&self) -> Highlight {
        if self.rep_completed {
            Highlight::RepCompleted
        } else if self.form_error {
            Highlight::FormError
        } else {
            Highlight::Neutral
        }
    }
}

/// Mutable session state of one exercise in one stream
#[derive(Debug, Clone)]
pub struct ExerciseSession {
    table: Arc<ExerciseRuleTable>,
    engine: AngleEngine,
    state: RepState,
    rep_count: u32,
    last_feedback: Vec<String>,
    last_angles: BTreeMap<String, f64>,
    lead_side: Option<Side>,
    /// Previous value of the movement-gated angle
    gate_previous: Option<f64>,
}

impl ExerciseSession {
    pub fn new(table: Arc<ExerciseRuleTable>) -> Self {
        let gate_previous = table.movement_gate.as_ref().map(|gate| gate.initial);
        Self {
            table,
            engine: AngleEngine::new(),
            state: RepState::Up,
            rep_count: 0,
            last_feedback: vec!["Initializing...".to_string()],
            last_angles: BTreeMap::new(),
            lead_side: None,
            gate_previous,
        }
    }

    /// Set the minimum landmark visibility used for angle computation
    pub fn with_min_visibility(mut self, min_visibility: f32) -> Self {
        self.engine = self.engine.with_min_visibility(min_visibility);
        self
    }

    pub fn table(&self) -> &ExerciseRuleTable {
        &self.table
    }

    pub fn state(&self) -> RepState {
        self.state
    }

    pub fn rep_count(&self) -> u32 {
        self.rep_count
    }

    pub fn last_feedback(&self) -> &[String] {
        &self.last_feedback
    }

    pub fn last_angles(&self) -> &BTreeMap<String, f64> {
        &self.last_angles
    }

    pub fn lead_side(&self) -> Option<Side> {
        self.lead_side
    }

    /// Advance the session by one frame
    pub fn process(&mut self, landmarks: Option<&LandmarkSet>) -> FrameOutcome {
        let Some(landmarks) = landmarks else {
            return self.settle(RepState::Wait, NO_POSE_MESSAGE);
        };

        let frame = match self.engine.evaluate(&self.table, landmarks) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("{}: tracking fault: {}", self.table.id, e);
                return self.settle(RepState::Error, TRACKING_ERROR_MESSAGE);
            }
        };
        let angles = frame.angles;
        let thresholds = &self.table.thresholds;

        let is_down = self.table.down.iter().all(|check| check.holds(&angles, thresholds));
        let is_up = self.table.up.iter().all(|check| check.holds(&angles, thresholds));

        // Movement gate: the gated angle must have moved enough since the previous frame
        let mut gate_blocked = false;
        if let Some(gate) = &self.table.movement_gate {
            let current = angles.get(&gate.angle).copied();
            let previous = self.gate_previous.unwrap_or(gate.initial);
            let min_movement = thresholds.get(&gate.threshold).copied().unwrap_or(0.0);
            if let Some(current) = current {
                gate_blocked = (previous - current).abs() < min_movement;
                self.gate_previous = Some(current);
            }
        }

        let mut rep_completed = false;
        let mut gate_suppressed = false;
        if is_down {
            self.state = RepState::Down;
        } else if is_up && self.state == RepState::Down {
            if gate_blocked {
                gate_suppressed = true;
            } else {
                self.rep_count += 1;
                self.state = RepState::Up;
                rep_completed = true;
                info!("{}: repetition {} completed", self.table.id, self.rep_count);
            }
        }

        let lead = frame.lead_side;
        let form_messages: Vec<String> = self
            .table
            .feedback
            .iter()
            .filter(|rule| rule.guard.map_or(true, |guard| guard.allows(self.state)))
            .filter(|rule| rule.check.holds(&angles, thresholds))
            .map(|rule| render_message(&rule.message, self.rep_count, lead, None))
            .collect();
        let form_error = !form_messages.is_empty();

        let messages = &self.table.messages;
        let mut feedback = Vec::with_capacity(form_messages.len() + 2);
        if rep_completed {
            feedback.push(render_message(&messages.rep_completed, self.rep_count, lead, None));
        }
        feedback.extend(form_messages);
        if feedback.is_empty() {
            let default = match self.state {
                RepState::Down => &messages.bottom,
                _ => &messages.idle,
            };
            feedback.push(render_message(default, self.rep_count, lead, None));
        }
        if gate_suppressed {
            if let Some(gate) = &self.table.movement_gate {
                let min_movement = thresholds.get(&gate.threshold).copied();
                feedback.push(render_message(&gate.hold_message, self.rep_count, lead, min_movement));
            }
        }

        self.last_angles = angles;
        self.lead_side = lead;
        self.last_feedback = feedback.clone();

        FrameOutcome {
            state: self.state,
            rep_completed,
            form_error,
            feedback,
        }
    }

    /// Enter WAIT or ERROR with a single fixed message
    fn settle(&mut self, state: RepState, message: &str) -> FrameOutcome {
        self.state = state;
        self.last_feedback = vec![message.to_string()];
        FrameOutcome {
            state,
            rep_completed: false,
            form_error: false,
            feedback: self.last_feedback.clone(),
        }
    }

    /// Replace the feedback with a stream-level failure message
    pub fn report_fatal(&mut self, message: &str) {
        self.last_feedback = vec![message.to_string()];
    }

    /// Fully formed copy of the session for publication
    pub fn snapshot(&self) -> FeedbackSnapshot {
        FeedbackSnapshot {
            exercise: self.table.id.clone(),
            state: self.state,
            reps: self.rep_count,
            feedback: self.last_feedback.clone(),
            angles: self.last_angles.clone(),
            lead_side: self.lead_side,
            updated_at: Utc::now(),
        }
    }
}

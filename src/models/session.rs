use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Repetition state of an exercise session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepState {
    /// Top / rest position
    #[default]
    Up,
    /// Bottom / peak exertion position
    Down,
    /// No pose detected in the last frame
    Wait,
    /// Angles could not be computed for the last frame
    Error,
}

impl RepState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Wait => "WAIT",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for RepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Left,
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
        })
    }
}

/// Overlay color category for a processed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Highlight {
    /// Tracking, nothing to report
    #[default]
    Neutral,
    /// At least one form correction was emitted
    FormError,
    /// A repetition was counted on this frame
    RepCompleted,
}

impl Highlight {
    /// RGB color of the joints drawn for this highlight
    pub fn color(&self) -> [u8; 3] {
        match self {
            Self::Neutral => [255, 255, 0],
            Self::FormError => [255, 0, 0],
            Self::RepCompleted => [0, 255, 0],
        }
    }
}

/// Read-only view of an exercise session, published after every frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSnapshot {
    pub exercise: String,
    pub state: RepState,
    pub reps: u32,
    pub feedback: Vec<String>,
    pub angles: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_side: Option<Side>,
    pub updated_at: DateTime<Utc>,
}

impl FeedbackSnapshot {
    /// Snapshot of a session that has not processed any frame yet
    pub fn initial(exercise: impl Into<String>) -> Self {
        Self {
            exercise: exercise.into(),
            state: RepState::Up,
            reps: 0,
            feedback: vec!["Initializing...".to_string()],
            angles: BTreeMap::new(),
            lead_side: None,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serialization() {
        assert_eq!(serde_json::to_string(&RepState::Down).unwrap(), "\"DOWN\"");
        assert_eq!(RepState::Wait.to_string(), "WAIT");
        assert_eq!(serde_json::to_string(&Side::Left).unwrap(), "\"LEFT\"");
    }

    #[test]
    fn test_initial_snapshot() {
        let snapshot = FeedbackSnapshot::initial("jumping_jack");
        assert_eq!(snapshot.state, RepState::Up);
        assert_eq!(snapshot.reps, 0);
        assert_eq!(snapshot.feedback, vec!["Initializing...".to_string()]);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json.get("lead_side").is_none());
    }
}

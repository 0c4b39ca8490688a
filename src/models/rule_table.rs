/// Exercise rule tables
///
/// An exercise is described entirely by data: which angles to measure, which
/// angles to derive from them, the named thresholds, the "down" and "up"
/// conjunctions, ordered feedback rules and the messages shown to the user.
/// One generic repetition engine interprets these tables.
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::errors::RuleTableError;
use crate::models::landmark::PoseLandmark;
use crate::models::session::{RepState, Side};

/// Angle formula for a three-point joint measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AngleFormula {
    /// Image plane only; used where depth is unreliable
    Planar,
    /// Includes the depth coordinate
    Spatial,
}

/// Geometry of one measured angle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Measure {
    /// Angle at `vertex` between `a` and `c`
    Joint {
        a: PoseLandmark,
        vertex: PoseLandmark,
        c: PoseLandmark,
        formula: AngleFormula,
    },
    /// Lean of the `distal -> proximal` segment away from image-up
    LeanFromVertical {
        proximal: PoseLandmark,
        distal: PoseLandmark,
    },
    /// Tilt of the `start -> end` segment from horizontal, in [0, 90]
    TiltFromHorizontal {
        start: PoseLandmark,
        end: PoseLandmark,
    },
    /// Angle between two landmark lines, e.g. shoulders vs hips
    LineMisalignment {
        first: (PoseLandmark, PoseLandmark),
        second: (PoseLandmark, PoseLandmark),
    },
}

impl Measure {
    /// Landmarks this measure reads
    pub fn landmarks(&self) -> Vec<PoseLandmark> {
        match self {
            Self::Joint { a, vertex, c, .. } => vec![*a, *vertex, *c],
            Self::LeanFromVertical { proximal, distal } => vec![*proximal, *distal],
            Self::TiltFromHorizontal { start, end } => vec![*start, *end],
            Self::LineMisalignment { first, second } => vec![first.0, first.1, second.0, second.1],
        }
    }
}

/// Named measured angle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub name: String,
    pub measure: Measure,
}

/// Angle computed from other angles of the same frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Derivation {
    Mean { left: String, right: String },
    AbsDiff { left: String, right: String },
    /// Value of the side picked by the table's lead selector
    Lead { left: String, right: String },
    /// Value of the side opposite to the lead
    Trail { left: String, right: String },
}

impl Derivation {
    fn inputs(&self) -> [&str; 2] {
        match self {
            Self::Mean { left, right }
            | Self::AbsDiff { left, right }
            | Self::Lead { left, right }
            | Self::Trail { left, right } => [left.as_str(), right.as_str()],
        }
    }

    fn needs_lead(&self) -> bool {
        matches!(self, Self::Lead { .. } | Self::Trail { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedAngle {
    pub name: String,
    pub derivation: Derivation,
}

/// Picks the lead side per frame: the side whose angle is smaller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadSelector {
    pub left: String,
    pub right: String,
}

impl LeadSelector {
    pub fn select(&self, angles: &BTreeMap<String, f64>) -> Option<Side> {
        let left = angles.get(&self.left)?;
        let right = angles.get(&self.right)?;
        Some(if left < right { Side::Left } else { Side::Right })
    }
}

/// A single comparison against named thresholds
///
/// `Below` and `Above` are strict, `Within` is a closed range. A comparison
/// over an angle or threshold that does not exist never holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Comparison {
    Below {
        angle: String,
        threshold: String,
    },
    Above {
        angle: String,
        threshold: String,
    },
    Within {
        angle: String,
        min: String,
        max: String,
    },
}

impl Comparison {
    pub fn below(angle: &str, threshold: &str) -> Self {
        Self::Below {
            angle: angle.to_string(),
            threshold: threshold.to_string(),
        }
    }

    pub fn above(angle: &str, threshold: &str) -> Self {
        Self::Above {
            angle: angle.to_string(),
            threshold: threshold.to_string(),
        }
    }

    pub fn within(angle: &str, min: &str, max: &str) -> Self {
        Self::Within {
            angle: angle.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        }
    }

    pub fn angle(&self) -> &str {
        match self {
            Self::Below { angle, .. } | Self::Above { angle, .. } | Self::Within { angle, .. } => {
                angle
            }
        }
    }

    pub fn thresholds(&self) -> Vec<&str> {
        match self {
            Self::Below { threshold, .. } | Self::Above { threshold, .. } => vec![threshold.as_str()],
            Self::Within { min, max, .. } => vec![min.as_str(), max.as_str()],
        }
    }

    pub fn holds(&self, angles: &BTreeMap<String, f64>, thresholds: &BTreeMap<String, f64>) -> bool {
        let value = |name: &str, map: &BTreeMap<String, f64>| map.get(name).copied().unwrap_or(f64::NAN);
        let angle = value(self.angle(), angles);

        match self {
            Self::Below { threshold, .. } => angle < value(threshold.as_str(), thresholds),
            Self::Above { threshold, .. } => angle > value(threshold.as_str(), thresholds),
            Self::Within { min, max, .. } => {
                value(min.as_str(), thresholds) <= angle && angle <= value(max.as_str(), thresholds)
            }
        }
    }
}

/// Restricts a feedback rule to some states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateGuard {
    Only(RepState),
    Except(RepState),
}

impl StateGuard {
    pub fn allows(&self, state: RepState) -> bool {
        match self {
            Self::Only(required) => state == *required,
            Self::Except(excluded) => state != *excluded,
        }
    }
}

/// Form check emitting a correction message when its comparison holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRule {
    pub check: Comparison,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<StateGuard>,
    pub message: String,
}

impl FeedbackRule {
    pub fn new(check: Comparison, message: &str) -> Self {
        Self {
            check,
            guard: None,
            message: message.to_string(),
        }
    }

    pub fn only(mut self, state: RepState) -> Self {
        self.guard = Some(StateGuard::Only(state));
        self
    }

    pub fn except(mut self, state: RepState) -> Self {
        self.guard = Some(StateGuard::Except(state));
        self
    }
}

/// Messages shown when a frame produced no correction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultMessages {
    /// Shown while up and not counting
    pub idle: String,
    /// Shown while holding the bottom position
    pub bottom: String,
    /// Shown on the frame a repetition is counted; supports `{reps}`
    pub rep_completed: String,
}

/// Rejects repetitions when the gated angle barely moved since the last frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementGate {
    pub angle: String,
    /// Threshold holding the minimum frame-to-frame change
    pub threshold: String,
    /// Previous value assumed before the first measured frame
    pub initial: f64,
    /// Supports `{min_movement}`
    pub hold_message: String,
}

/// Declarative description of one exercise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseRuleTable {
    pub id: String,
    pub display_name: String,
    /// Threshold reported as the primary target angle in the catalog
    pub target_threshold: String,
    pub measurements: Vec<Measurement>,
    #[serde(default)]
    pub derived: Vec<DerivedAngle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_selector: Option<LeadSelector>,
    pub thresholds: BTreeMap<String, f64>,
    pub down: Vec<Comparison>,
    pub up: Vec<Comparison>,
    pub feedback: Vec<FeedbackRule>,
    pub messages: DefaultMessages,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movement_gate: Option<MovementGate>,
}

impl ExerciseRuleTable {
    pub fn threshold(&self, name: &str) -> Option<f64> {
        self.thresholds.get(name).copied()
    }

    /// Value of the catalog target threshold
    pub fn target_angle(&self) -> Option<f64> {
        self.threshold(&self.target_threshold)
    }

    /// Names of all angles a frame produces, in evaluation order
    pub fn angle_names(&self) -> impl Iterator<Item = &str> {
        self.measurements
            .iter()
            .map(|m| m.name.as_str())
            .chain(self.derived.iter().map(|d| d.name.as_str()))
    }

    /// Check that every name the table references is defined
    pub fn validate(&self) -> Result<(), RuleTableError> {
        let unknown_angle = |angle: &str| RuleTableError::UnknownAngle {
            table: self.id.clone(),
            angle: angle.to_string(),
        };
        let unknown_threshold = |threshold: &str| RuleTableError::UnknownThreshold {
            table: self.id.clone(),
            threshold: threshold.to_string(),
        };

        let mut defined = BTreeSet::new();
        for measurement in &self.measurements {
            if !defined.insert(measurement.name.as_str()) {
                return Err(RuleTableError::DuplicateAngle {
                    table: self.id.clone(),
                    angle: measurement.name.clone(),
                });
            }
        }

        if let Some(selector) = &self.lead_selector {
            for angle in [&selector.left, &selector.right] {
                if !defined.contains(angle.as_str()) {
                    return Err(RuleTableError::MissingLeadSelector {
                        table: self.id.clone(),
                    });
                }
            }
        }

        for derived in &self.derived {
            if derived.derivation.needs_lead() && self.lead_selector.is_none() {
                return Err(RuleTableError::MissingLeadSelector {
                    table: self.id.clone(),
                });
            }
            for input in derived.derivation.inputs() {
                if !defined.contains(input) {
                    return Err(unknown_angle(input));
                }
            }
            if !defined.insert(derived.name.as_str()) {
                return Err(RuleTableError::DuplicateAngle {
                    table: self.id.clone(),
                    angle: derived.name.clone(),
                });
            }
        }

        let checks = self
            .down
            .iter()
            .chain(self.up.iter())
            .chain(self.feedback.iter().map(|rule| &rule.check));
        for check in checks {
            if !defined.contains(check.angle()) {
                return Err(unknown_angle(check.angle()));
            }
            if let Some(missing) = check
                .thresholds()
                .into_iter()
                .find(|name| !self.thresholds.contains_key(*name))
            {
                return Err(unknown_threshold(missing));
            }
        }

        if !self.thresholds.contains_key(&self.target_threshold) {
            return Err(unknown_threshold(&self.target_threshold));
        }

        if let Some(gate) = &self.movement_gate {
            if !defined.contains(gate.angle.as_str()) {
                return Err(unknown_angle(&gate.angle));
            }
            if !self.thresholds.contains_key(&gate.threshold) {
                return Err(unknown_threshold(&gate.threshold));
            }
        }

        Ok(())
    }

    /// Copy of this table with some thresholds replaced
    pub fn with_overrides(&self, overrides: &BTreeMap<String, f64>) -> Result<Self, RuleTableError> {
        let mut table = self.clone();
        for (name, value) in overrides {
            match table.thresholds.get_mut(name) {
                Some(slot) => *slot = *value,
                None => {
                    return Err(RuleTableError::UnknownThreshold {
                        table: self.id.clone(),
                        threshold: name.clone(),
                    })
                }
            }
        }
        table.validate()?;
        Ok(table)
    }
}

/// Fill `{reps}`, `{lead}` and `{min_movement}` placeholders
pub fn render_message(template: &str, reps: u32, lead: Option<Side>, min_movement: Option<f64>) -> String {
    let mut message = template.replace("{reps}", &reps.to_string());
    if message.contains("{lead}") {
        let lead = lead.map(|side| side.to_string()).unwrap_or_else(|| "N/A".to_string());
        message = message.replace("{lead}", &lead);
    }
    if let Some(min_movement) = min_movement {
        message = message.replace("{min_movement}", &min_movement.to_string());
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn knee_table() -> ExerciseRuleTable {
        ExerciseRuleTable {
            id: "knee_bends".to_string(),
            display_name: "Knee Bends".to_string(),
            target_threshold: "knee_down".to_string(),
            measurements: vec![
                Measurement {
                    name: "knee_L".to_string(),
                    measure: Measure::Joint {
                        a: PoseLandmark::LeftHip,
                        vertex: PoseLandmark::LeftKnee,
                        c: PoseLandmark::LeftAnkle,
                        formula: AngleFormula::Planar,
                    },
                },
                Measurement {
                    name: "knee_R".to_string(),
                    measure: Measure::Joint {
                        a: PoseLandmark::RightHip,
                        vertex: PoseLandmark::RightKnee,
                        c: PoseLandmark::RightAnkle,
                        formula: AngleFormula::Planar,
                    },
                },
            ],
            derived: vec![DerivedAngle {
                name: "knee_avg".to_string(),
                derivation: Derivation::Mean {
                    left: "knee_L".to_string(),
                    right: "knee_R".to_string(),
                },
            }],
            lead_selector: None,
            thresholds: BTreeMap::from([
                ("knee_down".to_string(), 90.0),
                ("knee_up".to_string(), 150.0),
            ]),
            down: vec![Comparison::below("knee_avg", "knee_down")],
            up: vec![Comparison::above("knee_avg", "knee_up")],
            feedback: vec![],
            messages: DefaultMessages {
                idle: "Ready".to_string(),
                bottom: "Bottom".to_string(),
                rep_completed: "REP {reps}".to_string(),
            },
            movement_gate: None,
        }
    }

    #[test]
    fn test_valid_table() {
        assert!(knee_table().validate().is_ok());
    }

    #[test]
    fn test_unknown_angle_rejected() {
        let mut table = knee_table();
        table.up.push(Comparison::above("hip_R", "knee_up"));
        assert_matches!(
            table.validate(),
            Err(RuleTableError::UnknownAngle { angle, .. }) if angle == "hip_R"
        );
    }

    #[test]
    fn test_derived_must_follow_inputs() {
        let mut table = knee_table();
        table.derived.insert(
            0,
            DerivedAngle {
                name: "knee_gap".to_string(),
                derivation: Derivation::AbsDiff {
                    left: "knee_avg".to_string(),
                    right: "knee_R".to_string(),
                },
            },
        );
        assert_matches!(table.validate(), Err(RuleTableError::UnknownAngle { .. }));
    }

    #[test]
    fn test_lead_requires_selector() {
        let mut table = knee_table();
        table.derived.push(DerivedAngle {
            name: "front_knee".to_string(),
            derivation: Derivation::Lead {
                left: "knee_L".to_string(),
                right: "knee_R".to_string(),
            },
        });
        assert_matches!(table.validate(), Err(RuleTableError::MissingLeadSelector { .. }));
    }

    #[test]
    fn test_overrides() {
        let table = knee_table();
        let tuned = table
            .with_overrides(&BTreeMap::from([("knee_down".to_string(), 100.0)]))
            .unwrap();
        assert_eq!(tuned.threshold("knee_down"), Some(100.0));
        assert_eq!(tuned.threshold("knee_up"), Some(150.0));
        assert_eq!(table.threshold("knee_down"), Some(90.0));

        let bad = table.with_overrides(&BTreeMap::from([("hip_down".to_string(), 80.0)]));
        assert_matches!(bad, Err(RuleTableError::UnknownThreshold { threshold, .. }) if threshold == "hip_down");
    }

    #[test]
    fn test_comparisons() {
        let thresholds = BTreeMap::from([("lo".to_string(), 10.0), ("hi".to_string(), 45.0)]);
        let angles = |v: f64| BTreeMap::from([("lean".to_string(), v)]);

        assert!(Comparison::within("lean", "lo", "hi").holds(&angles(10.0), &thresholds));
        assert!(Comparison::within("lean", "lo", "hi").holds(&angles(45.0), &thresholds));
        assert!(!Comparison::below("lean", "lo").holds(&angles(10.0), &thresholds));
        assert!(!Comparison::above("lean", "hi").holds(&angles(45.0), &thresholds));
        assert!(!Comparison::above("missing", "hi").holds(&angles(90.0), &thresholds));
    }

    #[test]
    fn test_render_message() {
        assert_eq!(render_message("REP {reps}. Good form!", 3, None, None), "REP 3. Good form!");
        assert_eq!(
            render_message("Go deeper on your front ({lead}) knee", 0, Some(Side::Left), None),
            "Go deeper on your front (LEFT) knee"
        );
        assert_eq!(
            render_message("HOLD: changed less than {min_movement} degrees.", 0, None, Some(30.0)),
            "HOLD: changed less than 30 degrees."
        );
    }

    #[test]
    fn test_table_json_round_trip_keeps_guards() {
        let mut table = knee_table();
        table.feedback.push(
            FeedbackRule::new(Comparison::above("knee_avg", "knee_down"), "Go deeper").except(RepState::Down),
        );
        let json = serde_json::to_string(&table).unwrap();
        let parsed: ExerciseRuleTable = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.feedback[0].guard, Some(StateGuard::Except(RepState::Down)));
    }
}

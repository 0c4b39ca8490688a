/// Built-in exercise rule tables
///
/// Four user-selectable exercises plus the coarse counting tables used once
/// auto-detect mode has locked onto an exercise. Threshold values are the
/// tuned defaults; deployments adjust them through an override file.
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::errors::RuleTableError;
use crate::models::landmark::PoseLandmark::{self, *};
use crate::models::rule_table::{
    AngleFormula, Comparison, DefaultMessages, Derivation, DerivedAngle, ExerciseRuleTable,
    FeedbackRule, LeadSelector, Measure, Measurement, MovementGate,
};
use crate::models::session::RepState;

pub const BODY_WEIGHT_SQUATS: &str = "body_weight_squats";
pub const BODY_WEIGHT_SQUAT_OHP: &str = "body_weight_squat_ohp";
pub const ALTERNATE_LUNGES_ROTATION: &str = "alternate_lunges_rotation";
pub const JUMPING_JACK: &str = "jumping_jack";

/// Threshold overrides keyed by table id, then threshold name
pub type ThresholdOverrides = BTreeMap<String, BTreeMap<String, f64>>;

fn planar(name: &str, a: PoseLandmark, vertex: PoseLandmark, c: PoseLandmark) -> Measurement {
    Measurement {
        name: name.to_string(),
        measure: Measure::Joint {
            a,
            vertex,
            c,
            formula: AngleFormula::Planar,
        },
    }
}

fn spatial(name: &str, a: PoseLandmark, vertex: PoseLandmark, c: PoseLandmark) -> Measurement {
    Measurement {
        name: name.to_string(),
        measure: Measure::Joint {
            a,
            vertex,
            c,
            formula: AngleFormula::Spatial,
        },
    }
}

fn torso_lean(name: &str) -> Measurement {
    Measurement {
        name: name.to_string(),
        measure: Measure::LeanFromVertical {
            proximal: RightShoulder,
            distal: RightHip,
        },
    }
}

fn derived(name: &str, derivation: fn(String, String) -> Derivation, left: &str, right: &str) -> DerivedAngle {
    DerivedAngle {
        name: name.to_string(),
        derivation: derivation(left.to_string(), right.to_string()),
    }
}

fn mean(left: String, right: String) -> Derivation {
    Derivation::Mean { left, right }
}

fn abs_diff(left: String, right: String) -> Derivation {
    Derivation::AbsDiff { left, right }
}

fn lead(left: String, right: String) -> Derivation {
    Derivation::Lead { left, right }
}

fn trail(left: String, right: String) -> Derivation {
    Derivation::Trail { left, right }
}

fn thresholds(values: &[(&str, f64)]) -> BTreeMap<String, f64> {
    values
        .iter()
        .map(|(name, value)| (name.to_string(), *value))
        .collect()
}

fn messages(idle: &str, bottom: &str, rep_completed: &str) -> DefaultMessages {
    DefaultMessages {
        idle: idle.to_string(),
        bottom: bottom.to_string(),
        rep_completed: rep_completed.to_string(),
    }
}

/// Full-body squat with posture, symmetry and stability checks
pub fn body_weight_squats() -> ExerciseRuleTable {
    ExerciseRuleTable {
        id: BODY_WEIGHT_SQUATS.to_string(),
        display_name: "Body Weight Squats".to_string(),
        target_threshold: "knee_down".to_string(),
        measurements: vec![
            planar("knee_L", LeftHip, LeftKnee, LeftAnkle),
            planar("knee_R", RightHip, RightKnee, RightAnkle),
            spatial("hip_R", RightShoulder, RightHip, RightKnee),
            planar("ankle_R", RightKnee, RightAnkle, RightHeel),
            torso_lean("torso_lean"),
            Measurement {
                name: "shoulder_align".to_string(),
                measure: Measure::TiltFromHorizontal {
                    start: LeftShoulder,
                    end: RightShoulder,
                },
            },
        ],
        derived: vec![
            derived("knee_avg", mean, "knee_L", "knee_R"),
            derived("knee_diff", abs_diff, "knee_L", "knee_R"),
        ],
        lead_selector: None,
        thresholds: thresholds(&[
            ("knee_down", 90.0),
            ("hip_down", 80.0),
            ("torso_lean_down_min", 10.0),
            ("torso_lean_down_max", 45.0),
            ("ankle_stable", 70.0),
            ("shoulder_neutral", 20.0),
            ("knee_up", 150.0),
            ("hip_up", 140.0),
            ("torso_up_neutral", 10.0),
            ("knee_depth_min", 100.0),
            ("hip_pushback_min", 90.0),
            ("torso_lean_max_fb", 45.0),
            ("torso_lean_min_fb", 5.0),
            ("knee_diff_max", 20.0),
            ("ankle_stability_min_fb", 70.0),
            ("shoulder_tilt_max_fb", 15.0),
            ("min_knee_movement", 30.0),
        ]),
        down: vec![
            Comparison::below("knee_avg", "knee_down"),
            Comparison::below("hip_R", "hip_down"),
            Comparison::within("torso_lean", "torso_lean_down_min", "torso_lean_down_max"),
            Comparison::above("ankle_R", "ankle_stable"),
            Comparison::below("shoulder_align", "shoulder_neutral"),
        ],
        up: vec![
            Comparison::above("knee_avg", "knee_up"),
            Comparison::above("hip_R", "hip_up"),
            Comparison::below("torso_lean", "torso_up_neutral"),
            Comparison::above("ankle_R", "ankle_stable"),
            Comparison::below("shoulder_align", "shoulder_neutral"),
        ],
        feedback: vec![
            FeedbackRule::new(Comparison::above("knee_avg", "knee_depth_min"), "Go deeper into the squat")
                .except(RepState::Down),
            FeedbackRule::new(Comparison::above("hip_R", "hip_pushback_min"), "Push your hips back more")
                .except(RepState::Up),
            FeedbackRule::new(
                Comparison::above("torso_lean", "torso_lean_max_fb"),
                "Keep your chest up and back straighter",
            ),
            FeedbackRule::new(
                Comparison::below("torso_lean", "torso_lean_min_fb"),
                "Lean slightly forward for balance",
            )
            .except(RepState::Up),
            FeedbackRule::new(
                Comparison::above("knee_diff", "knee_diff_max"),
                "Keep both knees aligned (Avoid caving)",
            ),
            FeedbackRule::new(
                Comparison::below("ankle_R", "ankle_stability_min_fb"),
                "Keep your heels down and feet stable",
            ),
            FeedbackRule::new(
                Comparison::above("shoulder_align", "shoulder_tilt_max_fb"),
                "Avoid leaning sideways",
            ),
        ],
        messages: messages(
            "Ready to Squat! Lower your hips.",
            "Maximum depth achieved. Drive up!",
            "REP {reps}. Excellent squat form!",
        ),
        movement_gate: Some(MovementGate {
            angle: "knee_avg".to_string(),
            threshold: "min_knee_movement".to_string(),
            initial: 180.0,
            hold_message: "HOLD: Knee angle changed less than {min_movement} degrees.".to_string(),
        }),
    }
}

/// Squat into an overhead press
pub fn body_weight_squat_ohp() -> ExerciseRuleTable {
    ExerciseRuleTable {
        id: BODY_WEIGHT_SQUAT_OHP.to_string(),
        display_name: "Body Weight Squat + Overhead Press".to_string(),
        target_threshold: "knee_down".to_string(),
        measurements: vec![
            planar("knee_L", LeftHip, LeftKnee, LeftAnkle),
            planar("knee_R", RightHip, RightKnee, RightAnkle),
            spatial("hip_R", RightShoulder, RightHip, RightKnee),
            spatial("shoulder_R", RightHip, RightShoulder, RightElbow),
            planar("elbow_R", RightShoulder, RightElbow, RightWrist),
            torso_lean("torso"),
        ],
        derived: vec![
            derived("knee_avg", mean, "knee_L", "knee_R"),
            derived("knee_diff", abs_diff, "knee_L", "knee_R"),
        ],
        lead_selector: None,
        thresholds: thresholds(&[
            ("knee_down", 90.0),
            ("hip_down", 80.0),
            ("shoulder_down", 90.0),
            ("knee_up", 150.0),
            ("hip_up", 140.0),
            ("shoulder_up", 160.0),
            ("elbow_up", 150.0),
            ("torso_too_straight", 5.0),
            ("knee_depth_min", 100.0),
            ("hip_pushback_min", 90.0),
            ("torso_straightness_max", 45.0),
            ("knee_diff_max", 20.0),
        ]),
        down: vec![
            Comparison::below("knee_avg", "knee_down"),
            Comparison::below("hip_R", "hip_down"),
            Comparison::below("shoulder_R", "shoulder_down"),
        ],
        up: vec![
            Comparison::above("knee_avg", "knee_up"),
            Comparison::above("hip_R", "hip_up"),
            Comparison::above("shoulder_R", "shoulder_up"),
            Comparison::above("elbow_R", "elbow_up"),
        ],
        feedback: vec![
            FeedbackRule::new(Comparison::above("knee_avg", "knee_depth_min"), "Go deeper into the squat")
                .only(RepState::Up),
            FeedbackRule::new(Comparison::above("hip_R", "hip_pushback_min"), "Push your hips back more"),
            FeedbackRule::new(
                Comparison::above("torso", "torso_straightness_max"),
                "Keep your chest up and back straight",
            ),
            FeedbackRule::new(
                Comparison::below("torso", "torso_too_straight"),
                "Lean slightly forward for balance",
            ),
            FeedbackRule::new(Comparison::below("shoulder_R", "shoulder_up"), "Raise your arms fully overhead")
                .only(RepState::Up),
            FeedbackRule::new(Comparison::below("elbow_R", "elbow_up"), "Straighten your elbows at the top")
                .only(RepState::Up),
            FeedbackRule::new(
                Comparison::above("knee_diff", "knee_diff_max"),
                "Do not let one knee collapse inward",
            ),
        ],
        messages: messages(
            "Start Squatting! Arms ready for the press.",
            "Squat Bottom Achieved. Drive up and press!",
            "REP {reps}. Excellent form and press!",
        ),
        movement_gate: None,
    }
}

/// Alternating lunges with a torso rotation at the bottom
///
/// The front leg is the one with the more bent knee in each frame.
pub fn alternate_lunges_rotation() -> ExerciseRuleTable {
    ExerciseRuleTable {
        id: ALTERNATE_LUNGES_ROTATION.to_string(),
        display_name: "Alternate Lunges with Rotation".to_string(),
        target_threshold: "front_knee_down".to_string(),
        measurements: vec![
            planar("knee_L", LeftHip, LeftKnee, LeftAnkle),
            planar("knee_R", RightHip, RightKnee, RightAnkle),
            spatial("hip_L", LeftShoulder, LeftHip, LeftKnee),
            spatial("hip_R", RightShoulder, RightHip, RightKnee),
            planar("ankle_L", LeftKnee, LeftAnkle, LeftHeel),
            planar("ankle_R", RightKnee, RightAnkle, RightHeel),
            Measurement {
                name: "rotation".to_string(),
                measure: Measure::LineMisalignment {
                    first: (LeftShoulder, RightShoulder),
                    second: (LeftHip, RightHip),
                },
            },
            torso_lean("lean"),
        ],
        derived: vec![
            derived("front_knee", lead, "knee_L", "knee_R"),
            derived("back_knee", trail, "knee_L", "knee_R"),
            derived("front_hip", lead, "hip_L", "hip_R"),
            derived("back_hip", trail, "hip_L", "hip_R"),
            derived("front_ankle", lead, "ankle_L", "ankle_R"),
            derived("knee_diff", abs_diff, "knee_L", "knee_R"),
            derived("hip_diff", abs_diff, "front_hip", "back_hip"),
        ],
        lead_selector: Some(LeadSelector {
            left: "knee_L".to_string(),
            right: "knee_R".to_string(),
        }),
        thresholds: thresholds(&[
            ("front_knee_down", 90.0),
            ("back_knee_down", 130.0),
            ("rotation_down", 20.0),
            ("front_knee_up", 150.0),
            ("back_knee_up", 150.0),
            ("rotation_up", 10.0),
            ("front_knee_depth", 100.0),
            ("back_knee_depth", 150.0),
            ("hip_diff_max", 25.0),
            ("rotation_min", 20.0),
            ("rotation_max", 50.0),
            ("torso_lean_forward", 40.0),
            ("knee_diff_max", 20.0),
            ("ankle_stability_min", 70.0),
        ]),
        down: vec![
            Comparison::below("front_knee", "front_knee_down"),
            Comparison::below("back_knee", "back_knee_down"),
            Comparison::above("rotation", "rotation_down"),
        ],
        up: vec![
            Comparison::above("front_knee", "front_knee_up"),
            Comparison::above("back_knee", "back_knee_up"),
            Comparison::below("rotation", "rotation_up"),
        ],
        feedback: vec![
            FeedbackRule::new(
                Comparison::above("front_knee", "front_knee_depth"),
                "Go deeper on your front ({lead}) knee",
            )
            .only(RepState::Up),
            FeedbackRule::new(Comparison::above("back_knee", "back_knee_depth"), "Bend your back knee more")
                .only(RepState::Down),
            FeedbackRule::new(
                Comparison::below("rotation", "rotation_min"),
                "Rotate your torso more toward your front leg",
            )
            .only(RepState::Down),
            FeedbackRule::new(
                Comparison::above("rotation", "rotation_max"),
                "Reduce torso rotation to avoid strain",
            ),
            FeedbackRule::new(Comparison::above("lean", "torso_lean_forward"), "Keep your chest more upright"),
            FeedbackRule::new(
                Comparison::above("knee_diff", "knee_diff_max"),
                "Align your knees better (side view)",
            ),
            FeedbackRule::new(Comparison::above("hip_diff", "hip_diff_max"), "Keep your hips square"),
            FeedbackRule::new(
                Comparison::below("front_ankle", "ankle_stability_min"),
                "Keep your front foot stable and flat",
            ),
        ],
        messages: messages(
            "Ready to Lunge! Step forward and rotate.",
            "Bottom achieved. Drive up and unsquare torso!",
            "REP {reps}. Good lunge and rotation!",
        ),
        movement_gate: None,
    }
}

/// Jumping jacks; the open position plays the role of the bottom
pub fn jumping_jack() -> ExerciseRuleTable {
    ExerciseRuleTable {
        id: JUMPING_JACK.to_string(),
        display_name: "Jumping Jack".to_string(),
        target_threshold: "arm_open".to_string(),
        measurements: vec![
            spatial("arm_angle", RightHip, RightShoulder, RightElbow),
            planar("leg_angle", RightKnee, RightHip, LeftHip),
            planar("knee_angle", RightHip, RightKnee, RightAnkle),
        ],
        derived: vec![],
        lead_selector: None,
        thresholds: thresholds(&[
            ("arm_open", 160.0),
            ("arm_close", 30.0),
            ("leg_open", 45.0),
            ("leg_close", 20.0),
            ("arm_low_feedback", 140.0),
            ("arm_high_feedback", 180.0),
            ("leg_low_feedback", 35.0),
            ("knee_bend_feedback", 160.0),
        ]),
        down: vec![
            Comparison::above("arm_angle", "arm_open"),
            Comparison::above("leg_angle", "leg_open"),
        ],
        up: vec![
            Comparison::below("arm_angle", "arm_close"),
            Comparison::below("leg_angle", "leg_close"),
        ],
        feedback: vec![
            FeedbackRule::new(Comparison::below("arm_angle", "arm_low_feedback"), "Raise your arms higher"),
            FeedbackRule::new(
                Comparison::above("arm_angle", "arm_high_feedback"),
                "Do not overextend your shoulders",
            ),
            FeedbackRule::new(Comparison::below("leg_angle", "leg_low_feedback"), "Spread your legs more")
                .except(RepState::Up),
            FeedbackRule::new(Comparison::below("knee_angle", "knee_bend_feedback"), "Keep your knees straighter"),
        ],
        messages: messages(
            "ARMS DOWN! READY!",
            "HOLD OPEN! Return to close to count.",
            "REP {reps}. Good form!",
        ),
        movement_gate: None,
    }
}

/// Planar angles shared by the auto-detect counting tables
fn auto_measurements() -> (Vec<Measurement>, Vec<DerivedAngle>) {
    (
        vec![
            planar("knee_L", LeftHip, LeftKnee, LeftAnkle),
            planar("knee_R", RightHip, RightKnee, RightAnkle),
            planar("elbow_L", LeftShoulder, LeftElbow, LeftWrist),
            planar("elbow_R", RightShoulder, RightElbow, RightWrist),
            planar("hip_L", LeftShoulder, LeftHip, LeftKnee),
            planar("shoulder_L", LeftElbow, LeftShoulder, LeftHip),
        ],
        vec![
            derived("knee_avg", mean, "knee_L", "knee_R"),
            derived("elbow_avg", mean, "elbow_L", "elbow_R"),
        ],
    )
}

/// Single-angle band counter: bottom below 90, top above 160
fn auto_band_table(id: &str, display_name: &str, angle: &str, coaching: &str, noun: &str) -> ExerciseRuleTable {
    let (measurements, derived) = auto_measurements();
    ExerciseRuleTable {
        id: id.to_string(),
        display_name: display_name.to_string(),
        target_threshold: "bottom".to_string(),
        measurements,
        derived,
        lead_selector: None,
        thresholds: thresholds(&[("bottom", 90.0), ("top", 160.0)]),
        down: vec![Comparison::below(angle, "bottom")],
        up: vec![Comparison::above(angle, "top")],
        feedback: vec![FeedbackRule::new(Comparison::within(angle, "bottom", "top"), coaching)],
        messages: messages(
            &format!("{} detected. Keep going!", display_name),
            &format!("Good depth! Finish the {}.", noun),
            &format!("Good {}! Reps: {{reps}}", noun),
        ),
        movement_gate: None,
    }
}

pub fn auto_squat() -> ExerciseRuleTable {
    auto_band_table("auto_squat", "Squat", "knee_avg", "Go deeper!", "squat")
}

pub fn auto_push_up() -> ExerciseRuleTable {
    auto_band_table("auto_push_up", "Push-up", "elbow_avg", "Keep going!", "push-up")
}

pub fn auto_lunge() -> ExerciseRuleTable {
    auto_band_table("auto_lunge", "Lunge", "hip_L", "Lower your hips more!", "lunge")
}

pub fn auto_sit_up() -> ExerciseRuleTable {
    auto_band_table("auto_sit_up", "Sit-up", "hip_L", "Keep pushing!", "sit-up")
}

/// Jumping jack counter for auto-detect mode: open is arms wide with straight legs
pub fn auto_jumping_jack() -> ExerciseRuleTable {
    let (measurements, derived) = auto_measurements();
    ExerciseRuleTable {
        id: "auto_jumping_jack".to_string(),
        display_name: "Jumping Jack".to_string(),
        target_threshold: "arms_wide".to_string(),
        measurements,
        derived,
        lead_selector: None,
        thresholds: thresholds(&[("arms_wide", 90.0), ("elbows_straight", 150.0), ("legs_wide", 160.0)]),
        down: vec![
            Comparison::above("shoulder_L", "arms_wide"),
            Comparison::above("elbow_L", "elbows_straight"),
            Comparison::above("elbow_R", "elbows_straight"),
            Comparison::above("knee_avg", "legs_wide"),
        ],
        up: vec![
            Comparison::below("shoulder_L", "arms_wide"),
            Comparison::below("knee_avg", "legs_wide"),
        ],
        feedback: vec![],
        messages: messages("Keep moving", "Arms and legs open!", "Good jack! Reps: {reps}"),
        movement_gate: None,
    }
}

/// All rule tables known to the server
#[derive(Debug, Clone)]
pub struct RuleCatalog {
    exercises: Vec<Arc<ExerciseRuleTable>>,
    auto: Vec<Arc<ExerciseRuleTable>>,
}

impl RuleCatalog {
    /// Built-in tables with default thresholds
    pub fn builtin() -> Self {
        Self {
            exercises: vec![
                Arc::new(body_weight_squat_ohp()),
                Arc::new(alternate_lunges_rotation()),
                Arc::new(body_weight_squats()),
                Arc::new(jumping_jack()),
            ],
            auto: vec![
                Arc::new(auto_squat()),
                Arc::new(auto_push_up()),
                Arc::new(auto_lunge()),
                Arc::new(auto_jumping_jack()),
                Arc::new(auto_sit_up()),
            ],
        }
    }

    /// Built-in tables with threshold overrides applied
    pub fn with_overrides(overrides: &ThresholdOverrides) -> Result<Self, RuleTableError> {
        let mut catalog = Self::builtin();

        for (id, values) in overrides {
            let slot = catalog
                .exercises
                .iter_mut()
                .chain(catalog.auto.iter_mut())
                .find(|table| table.id == *id)
                .ok_or_else(|| RuleTableError::UnknownExercise(id.clone()))?;
            *slot = Arc::new(slot.with_overrides(values)?);
            info!("Applied {} threshold override(s) to {}", values.len(), id);
        }

        Ok(catalog)
    }

    /// Read an override file of the form `{"table_id": {"threshold": value}}`
    pub fn load_overrides(path: &Path) -> Result<ThresholdOverrides> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rule overrides from {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid rule overrides in {}", path.display()))
    }

    /// User-selectable exercises
    pub fn exercises(&self) -> &[Arc<ExerciseRuleTable>] {
        &self.exercises
    }

    pub fn exercise(&self, id: &str) -> Option<Arc<ExerciseRuleTable>> {
        self.exercises.iter().find(|table| table.id == id).cloned()
    }

    /// Auto-detect counting tables
    pub fn auto_table(&self, id: &str) -> Option<Arc<ExerciseRuleTable>> {
        self.auto.iter().find(|table| table.id == id).cloned()
    }
}

impl Default for RuleCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_builtin_tables_are_valid() {
        let catalog = RuleCatalog::builtin();
        for table in catalog.exercises().iter().chain(catalog.auto.iter()) {
            table
                .validate()
                .unwrap_or_else(|e| panic!("{} is invalid: {}", table.id, e));
        }
        assert_eq!(catalog.exercises().len(), 4);
    }

    #[test]
    fn test_target_angles() {
        let catalog = RuleCatalog::builtin();
        assert_eq!(catalog.exercise(BODY_WEIGHT_SQUATS).unwrap().target_angle(), Some(90.0));
        assert_eq!(catalog.exercise(ALTERNATE_LUNGES_ROTATION).unwrap().target_angle(), Some(90.0));
        assert_eq!(catalog.exercise(JUMPING_JACK).unwrap().target_angle(), Some(160.0));
        assert!(catalog.exercise("burpees").is_none());
    }

    #[test]
    fn test_only_squats_are_movement_gated() {
        let catalog = RuleCatalog::builtin();
        let gated: Vec<&str> = catalog
            .exercises()
            .iter()
            .filter(|table| table.movement_gate.is_some())
            .map(|table| table.id.as_str())
            .collect();
        assert_eq!(gated, vec![BODY_WEIGHT_SQUATS]);
    }

    #[test]
    fn test_catalog_overrides() {
        let overrides: ThresholdOverrides = serde_json::from_str(
            r#"{"jumping_jack": {"arm_open": 150, "leg_open": 40}, "auto_squat": {"bottom": 100}}"#,
        )
        .unwrap();

        let catalog = RuleCatalog::with_overrides(&overrides).unwrap();
        let jack = catalog.exercise(JUMPING_JACK).unwrap();
        assert_eq!(jack.threshold("arm_open"), Some(150.0));
        assert_eq!(jack.threshold("leg_open"), Some(40.0));
        assert_eq!(jack.threshold("arm_close"), Some(30.0));
        assert_eq!(catalog.auto_table("auto_squat").unwrap().threshold("bottom"), Some(100.0));
    }

    #[test]
    fn test_catalog_overrides_reject_unknown_names() {
        let unknown_table = ThresholdOverrides::from([("burpees".to_string(), BTreeMap::new())]);
        assert_matches!(
            RuleCatalog::with_overrides(&unknown_table),
            Err(RuleTableError::UnknownExercise(id)) if id == "burpees"
        );

        let unknown_threshold = ThresholdOverrides::from([(
            JUMPING_JACK.to_string(),
            BTreeMap::from([("knee_down".to_string(), 80.0)]),
        )]);
        assert_matches!(
            RuleCatalog::with_overrides(&unknown_threshold),
            Err(RuleTableError::UnknownThreshold { .. })
        );
    }
}

/// Geometric Angle Engine
///
/// This service provides the joint geometry used by every exercise:
/// - Planar and spatial three-point joint angles
/// - Segment lean from vertical and tilt from horizontal
/// - Misalignment between two landmark lines
/// - Evaluation of a rule table's measurements and derived angles for one frame
///
/// All angles are in degrees and rounded to 2 decimals.
use std::collections::BTreeMap;

use crate::errors::TrackingError;
use crate::models::landmark::{LandmarkSet, PoseLandmark};
use crate::models::rule_table::{AngleFormula, Derivation, ExerciseRuleTable, Measure};
use crate::models::session::Side;

/// Round to 2 decimal places
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Angle at `b` between `a` and `c` on the image plane, in [0, 180]
pub fn angle_2d(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    let radians = (c[1] - b[1]).atan2(c[0] - b[0]) - (a[1] - b[1]).atan2(a[0] - b[0]);
    let mut angle = radians.to_degrees().abs();
    if angle > 180.0 {
        angle = 360.0 - angle;
    }
    round2(angle)
}

/// Angle at `b` between `a` and `c` in 3D, in [0, 180]
///
/// Returns NaN when `a` or `c` coincides with `b`.
pub fn angle_3d(a: [f64; 3], b: [f64; 3], c: [f64; 3]) -> f64 {
    let ba = sub3(a, b);
    let bc = sub3(c, b);
    let magnitude = norm3(ba) * norm3(bc);
    if magnitude == 0.0 {
        return f64::NAN;
    }

    let cos_angle = (dot3(ba, bc) / magnitude).clamp(-1.0, 1.0);
    round2(cos_angle.acos().to_degrees())
}

/// Lean of the segment from `distal` to `proximal` away from image-up
///
/// Image y grows downward, so "up" is (0, -1). Zero-length segments lean 0.
pub fn lean_from_vertical(proximal: [f64; 2], distal: [f64; 2]) -> f64 {
    let segment = [proximal[0] - distal[0], proximal[1] - distal[1]];
    angle_to_axis(segment, [0.0, -1.0])
}

/// Tilt of the segment from `start` to `end` away from horizontal, in [0, 90]
pub fn tilt_from_horizontal(start: [f64; 2], end: [f64; 2]) -> f64 {
    let segment = [end[0] - start[0], end[1] - start[1]];
    let magnitude = (segment[0] * segment[0] + segment[1] * segment[1]).sqrt();
    if magnitude == 0.0 {
        return 0.0;
    }

    // Direction-independent: fold onto the positive x axis
    let cos_angle = (segment[0].abs() / magnitude).clamp(-1.0, 1.0);
    round2(cos_angle.acos().to_degrees())
}

/// 3D angle between the lines `a0 -> a1` and `b0 -> b1`
pub fn line_misalignment(a0: [f64; 3], a1: [f64; 3], b0: [f64; 3], b1: [f64; 3]) -> f64 {
    let first = sub3(a1, a0);
    let second = sub3(b1, b0);
    let magnitude = norm3(first) * norm3(second);
    if magnitude == 0.0 {
        return 0.0;
    }

    let cos_angle = (dot3(first, second) / magnitude).clamp(-1.0, 1.0);
    round2(cos_angle.acos().to_degrees())
}

fn angle_to_axis(vector: [f64; 2], axis: [f64; 2]) -> f64 {
    let magnitude = (vector[0] * vector[0] + vector[1] * vector[1]).sqrt()
        * (axis[0] * axis[0] + axis[1] * axis[1]).sqrt();
    if magnitude == 0.0 {
        return 0.0;
    }

    let cos_angle = ((vector[0] * axis[0] + vector[1] * axis[1]) / magnitude).clamp(-1.0, 1.0);
    round2(cos_angle.acos().to_degrees())
}

fn sub3(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot3(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn norm3(a: [f64; 3]) -> f64 {
    dot3(a, a).sqrt()
}

/// Angles of one frame, ready for rule evaluation
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameAngles {
    pub angles: BTreeMap<String, f64>,
    pub lead_side: Option<Side>,
}

/// Evaluates rule-table geometry against landmark sets
#[derive(Debug, Clone)]
pub struct AngleEngine {
    /// Minimum visibility for a landmark to take part in a measurement
    min_visibility: f32,
}

impl Default for AngleEngine {
    fn default() -> Self {
        Self { min_visibility: 0.3 }
    }
}

impl AngleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum landmark visibility
    pub fn with_min_visibility(mut self, min_visibility: f32) -> Self {
        self.min_visibility = min_visibility;
        self
    }

    pub fn min_visibility(&self) -> f32 {
        self.min_visibility
    }

    fn planar(&self, landmarks: &LandmarkSet, landmark: PoseLandmark) -> Result<[f64; 2], TrackingError> {
        Ok(landmarks.trackable(landmark, self.min_visibility)?.planar())
    }

    fn spatial(&self, landmarks: &LandmarkSet, landmark: PoseLandmark) -> Result<[f64; 3], TrackingError> {
        Ok(landmarks.trackable(landmark, self.min_visibility)?.spatial())
    }

    /// Compute one measured angle
    pub fn measure(&self, landmarks: &LandmarkSet, measure: &Measure) -> Result<f64, TrackingError> {
        let value = match measure {
            Measure::Joint {
                a,
                vertex,
                c,
                formula: AngleFormula::Planar,
            } => angle_2d(
                self.planar(landmarks, *a)?,
                self.planar(landmarks, *vertex)?,
                self.planar(landmarks, *c)?,
            ),
            Measure::Joint {
                a,
                vertex,
                c,
                formula: AngleFormula::Spatial,
            } => angle_3d(
                self.spatial(landmarks, *a)?,
                self.spatial(landmarks, *vertex)?,
                self.spatial(landmarks, *c)?,
            ),
            Measure::LeanFromVertical { proximal, distal } => lean_from_vertical(
                self.planar(landmarks, *proximal)?,
                self.planar(landmarks, *distal)?,
            ),
            Measure::TiltFromHorizontal { start, end } => tilt_from_horizontal(
                self.planar(landmarks, *start)?,
                self.planar(landmarks, *end)?,
            ),
            Measure::LineMisalignment { first, second } => line_misalignment(
                self.spatial(landmarks, first.0)?,
                self.spatial(landmarks, first.1)?,
                self.spatial(landmarks, second.0)?,
                self.spatial(landmarks, second.1)?,
            ),
        };
        Ok(value)
    }

    /// Compute every measured and derived angle a table declares
    ///
    /// Fails on the first landmark that cannot be tracked or angle that is
    /// undefined; a frame is never evaluated on partial angles.
    pub fn evaluate(&self, table: &ExerciseRuleTable, landmarks: &LandmarkSet) -> Result<FrameAngles, TrackingError> {
        let mut angles = BTreeMap::new();

        for measurement in &table.measurements {
            let value = self.measure(landmarks, &measurement.measure)?;
            if !value.is_finite() {
                return Err(TrackingError::Degenerate(measurement.name.clone()));
            }
            angles.insert(measurement.name.clone(), value);
        }

        let lead_side = table
            .lead_selector
            .as_ref()
            .and_then(|selector| selector.select(&angles));

        for derived in &table.derived {
            let value = derive(&derived.derivation, &angles, lead_side)
                .filter(|value| value.is_finite())
                .ok_or_else(|| TrackingError::Degenerate(derived.name.clone()))?;
            angles.insert(derived.name.clone(), value);
        }

        Ok(FrameAngles { angles, lead_side })
    }
}

fn derive(derivation: &Derivation, angles: &BTreeMap<String, f64>, lead: Option<Side>) -> Option<f64> {
    let pair = |left: &str, right: &str| Some((*angles.get(left)?, *angles.get(right)?));

    match derivation {
        Derivation::Mean { left, right } => pair(left.as_str(), right.as_str()).map(|(l, r)| (l + r) / 2.0),
        Derivation::AbsDiff { left, right } => pair(left.as_str(), right.as_str()).map(|(l, r)| (l - r).abs()),
        Derivation::Lead { left, right } => {
            let (l, r) = pair(left.as_str(), right.as_str())?;
            match lead? {
                Side::Left => Some(l),
                Side::Right => Some(r),
            }
        }
        Derivation::Trail { left, right } => {
            let (l, r) = pair(left.as_str(), right.as_str())?;
            match lead? {
                Side::Left => Some(r),
                Side::Right => Some(l),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::landmark::Landmark;
    use crate::models::rule_table::{
        DefaultMessages, DerivedAngle, LeadSelector, Measurement,
    };
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    fn is_rounded(value: f64) -> bool {
        ((value * 100.0).round() - value * 100.0).abs() < 1e-6
    }

    #[test]
    fn test_right_angle() {
        assert_eq!(angle_2d([0.0, 1.0], [0.0, 0.0], [1.0, 0.0]), 90.0);
        assert_eq!(angle_3d([0.0, 1.0, 0.0], [0.0, 0.0, 0.0], [0.0, 0.0, 1.0]), 90.0);
    }

    #[test]
    fn test_collinear_is_straight() {
        assert_eq!(angle_2d([0.5, 0.2], [0.5, 0.5], [0.5, 0.8]), 180.0);
        assert_eq!(angle_3d([0.0, 0.0, -1.0], [0.0, 0.0, 0.0], [0.0, 0.0, 2.0]), 180.0);
    }

    #[test]
    fn test_reflex_angle_folds() {
        // Rays at -90 and 180 degrees differ by 270, which folds to 90
        assert_eq!(angle_2d([0.0, -1.0], [0.0, 0.0], [-1.0, 0.0]), 90.0);
    }

    #[test]
    fn test_lean_from_vertical() {
        assert_eq!(lean_from_vertical([0.5, 0.3], [0.5, 0.6]), 0.0);
        assert_eq!(lean_from_vertical([0.6, 0.5], [0.5, 0.6]), 45.0);
        assert_eq!(lean_from_vertical([0.5, 0.5], [0.5, 0.5]), 0.0);
    }

    #[test]
    fn test_tilt_is_direction_independent() {
        assert_eq!(tilt_from_horizontal([0.4, 0.3], [0.6, 0.3]), 0.0);
        assert_eq!(tilt_from_horizontal([0.6, 0.3], [0.4, 0.3]), 0.0);
        assert_eq!(tilt_from_horizontal([0.4, 0.3], [0.5, 0.4]), 45.0);
        assert_eq!(tilt_from_horizontal([0.5, 0.4], [0.4, 0.3]), 45.0);
        assert_eq!(tilt_from_horizontal([0.5, 0.4], [0.5, 0.4]), 0.0);
    }

    #[test]
    fn test_line_misalignment() {
        let square = line_misalignment(
            [0.4, 0.3, 0.0],
            [0.6, 0.3, 0.0],
            [0.4, 0.6, 0.0],
            [0.6, 0.6, 0.0],
        );
        assert_eq!(square, 0.0);

        let rotated = line_misalignment(
            [0.4, 0.3, 0.0],
            [0.6, 0.3, 0.2],
            [0.4, 0.6, 0.0],
            [0.6, 0.6, 0.0],
        );
        assert_eq!(rotated, 45.0);
        assert_eq!(line_misalignment([0.1; 3], [0.1; 3], [0.0; 3], [1.0; 3]), 0.0);
    }

    #[test]
    fn test_spatial_degenerate_is_nan() {
        assert!(angle_3d([0.5; 3], [0.5; 3], [0.1, 0.2, 0.3]).is_nan());
    }

    proptest! {
        #[test]
        fn prop_planar_angle_in_range(
            ax in 0.0f64..1.0, ay in 0.0f64..1.0,
            bx in 0.0f64..1.0, by in 0.0f64..1.0,
            cx in 0.0f64..1.0, cy in 0.0f64..1.0,
        ) {
            let angle = angle_2d([ax, ay], [bx, by], [cx, cy]);
            prop_assert!((0.0..=180.0).contains(&angle));
            prop_assert!(is_rounded(angle));
        }

        #[test]
        fn prop_spatial_angle_in_range(
            a in prop::array::uniform3(0.0f64..1.0),
            b in prop::array::uniform3(0.0f64..1.0),
            c in prop::array::uniform3(0.0f64..1.0),
        ) {
            prop_assume!(a != b && c != b);
            let angle = angle_3d(a, b, c);
            prop_assert!((0.0..=180.0).contains(&angle));
            prop_assert!(is_rounded(angle));
        }

        #[test]
        fn prop_collinear_is_straight(
            bx in 0.2f64..0.8, by in 0.2f64..0.8,
            dx in -0.1f64..0.1, dy in -0.1f64..0.1,
            scale in 0.5f64..2.0,
        ) {
            prop_assume!(dx.abs() > 1e-3 || dy.abs() > 1e-3);
            let a = [bx - dx, by - dy];
            let c = [bx + dx * scale, by + dy * scale];
            prop_assert!((angle_2d(a, [bx, by], c) - 180.0).abs() < 0.011);
        }

        #[test]
        fn prop_lean_and_tilt_in_range(
            p in prop::array::uniform2(0.0f64..1.0),
            q in prop::array::uniform2(0.0f64..1.0),
        ) {
            let lean = lean_from_vertical(p, q);
            let tilt = tilt_from_horizontal(p, q);
            prop_assert!((0.0..=180.0).contains(&lean));
            prop_assert!((0.0..=90.0).contains(&tilt));
        }
    }

    fn lunge_table() -> ExerciseRuleTable {
        let joint = |name: &str, a, vertex, c| Measurement {
            name: name.to_string(),
            measure: Measure::Joint {
                a,
                vertex,
                c,
                formula: AngleFormula::Planar,
            },
        };
        let derived = |name: &str, derivation| DerivedAngle {
            name: name.to_string(),
            derivation,
        };
        let sides = || ("knee_L".to_string(), "knee_R".to_string());

        ExerciseRuleTable {
            id: "lunges".to_string(),
            display_name: "Lunges".to_string(),
            target_threshold: "front_down".to_string(),
            measurements: vec![
                joint("knee_L", PoseLandmark::LeftHip, PoseLandmark::LeftKnee, PoseLandmark::LeftAnkle),
                joint("knee_R", PoseLandmark::RightHip, PoseLandmark::RightKnee, PoseLandmark::RightAnkle),
            ],
            derived: vec![
                derived("front_knee", Derivation::Lead { left: sides().0, right: sides().1 }),
                derived("back_knee", Derivation::Trail { left: sides().0, right: sides().1 }),
                derived("knee_gap", Derivation::AbsDiff { left: "front_knee".to_string(), right: "back_knee".to_string() }),
            ],
            lead_selector: Some(LeadSelector { left: sides().0, right: sides().1 }),
            thresholds: BTreeMap::from([("front_down".to_string(), 90.0)]),
            down: vec![],
            up: vec![],
            feedback: vec![],
            messages: DefaultMessages {
                idle: String::new(),
                bottom: String::new(),
                rep_completed: String::new(),
            },
            movement_gate: None,
        }
    }

    fn lunge_pose() -> LandmarkSet {
        LandmarkSet::filled(Landmark::at(0.5, 0.5))
            // Left leg bent at 90 degrees
            .with(PoseLandmark::LeftHip, Landmark::at(0.4, 0.5))
            .with(PoseLandmark::LeftKnee, Landmark::at(0.3, 0.5))
            .with(PoseLandmark::LeftAnkle, Landmark::at(0.3, 0.7))
            // Right leg straight
            .with(PoseLandmark::RightHip, Landmark::at(0.6, 0.5))
            .with(PoseLandmark::RightKnee, Landmark::at(0.6, 0.7))
            .with(PoseLandmark::RightAnkle, Landmark::at(0.6, 0.9))
    }

    #[test]
    fn test_evaluate_lead_and_trail() {
        let frame = AngleEngine::new().evaluate(&lunge_table(), &lunge_pose()).unwrap();

        assert_eq!(frame.lead_side, Some(Side::Left));
        assert_eq!(frame.angles["front_knee"], 90.0);
        assert_eq!(frame.angles["back_knee"], 180.0);
        assert_eq!(frame.angles["knee_gap"], 90.0);
    }

    #[test]
    fn test_evaluate_rejects_hidden_landmark() {
        let pose = lunge_pose().with(PoseLandmark::RightKnee, Landmark::new(0.6, 0.7, 0.0, 0.1));

        let result = AngleEngine::new().evaluate(&lunge_table(), &pose);
        assert_matches!(
            result,
            Err(TrackingError::LowVisibility { landmark: PoseLandmark::RightKnee, .. })
        );

        let relaxed = AngleEngine::new().with_min_visibility(0.05);
        assert!(relaxed.evaluate(&lunge_table(), &pose).is_ok());
    }

    #[test]
    fn test_evaluate_rejects_degenerate_spatial_angle() {
        let mut table = lunge_table();
        table.measurements[0].measure = Measure::Joint {
            a: PoseLandmark::LeftHip,
            vertex: PoseLandmark::LeftKnee,
            c: PoseLandmark::LeftAnkle,
            formula: AngleFormula::Spatial,
        };
        let pose = lunge_pose().with(PoseLandmark::LeftAnkle, Landmark::at(0.3, 0.5));

        assert_matches!(
            AngleEngine::new().evaluate(&table, &pose),
            Err(TrackingError::Degenerate(name)) if name == "knee_L"
        );
    }
}

/// Pose landmark models
///
/// This module provides the 33-point body landmark topology produced by the
/// pose model, the per-frame landmark set and the skeleton connections used
/// when drawing the overlay.
use serde::{Deserialize, Serialize};

use crate::errors::TrackingError;

/// Number of landmarks produced per detected pose
pub const LANDMARK_COUNT: usize = 33;

/// A single body landmark
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    /// X coordinate normalized to frame width (0-1)
    pub x: f32,
    /// Y coordinate normalized to frame height (0-1)
    pub y: f32,
    /// Depth relative to the hips, same scale as x
    pub z: f32,
    /// Visibility / presence confidence (0-1)
    pub visibility: f32,
}

impl Landmark {
    /// Create a new landmark
    pub fn new(x: f32, y: f32, z: f32, visibility: f32) -> Self {
        Self {
            x,
            y,
            z,
            visibility,
        }
    }

    /// Fully visible landmark on the image plane
    pub fn at(x: f32, y: f32) -> Self {
        Self::new(x, y, 0.0, 1.0)
    }

    /// Check that the landmark can be used for geometry
    pub fn is_trackable(&self, min_visibility: f32) -> bool {
        self.visibility >= min_visibility
            && self.x.is_finite()
            && self.y.is_finite()
            && self.z.is_finite()
    }

    /// Image-plane coordinates
    pub fn planar(&self) -> [f64; 2] {
        [self.x as f64, self.y as f64]
    }

    /// Image-plane coordinates plus depth
    pub fn spatial(&self) -> [f64; 3] {
        [self.x as f64, self.y as f64, self.z as f64]
    }
}

/// Landmark indices of the 33-point pose topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseLandmark {
    Nose = 0,
    LeftEyeInner = 1,
    LeftEye = 2,
    LeftEyeOuter = 3,
    RightEyeInner = 4,
    RightEye = 5,
    RightEyeOuter = 6,
    LeftEar = 7,
    RightEar = 8,
    MouthLeft = 9,
    MouthRight = 10,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftPinky = 17,
    RightPinky = 18,
    LeftIndex = 19,
    RightIndex = 20,
    LeftThumb = 21,
    RightThumb = 22,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
    LeftHeel = 29,
    RightHeel = 30,
    LeftFootIndex = 31,
    RightFootIndex = 32,
}

impl PoseLandmark {
    /// Position of this landmark in a landmark set
    pub fn index(self) -> usize {
        self as usize
    }

    /// Get landmark name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Nose => "nose",
            Self::LeftEyeInner => "left_eye_inner",
            Self::LeftEye => "left_eye",
            Self::LeftEyeOuter => "left_eye_outer",
            Self::RightEyeInner => "right_eye_inner",
            Self::RightEye => "right_eye",
            Self::RightEyeOuter => "right_eye_outer",
            Self::LeftEar => "left_ear",
            Self::RightEar => "right_ear",
            Self::MouthLeft => "mouth_left",
            Self::MouthRight => "mouth_right",
            Self::LeftShoulder => "left_shoulder",
            Self::RightShoulder => "right_shoulder",
            Self::LeftElbow => "left_elbow",
            Self::RightElbow => "right_elbow",
            Self::LeftWrist => "left_wrist",
            Self::RightWrist => "right_wrist",
            Self::LeftPinky => "left_pinky",
            Self::RightPinky => "right_pinky",
            Self::LeftIndex => "left_index",
            Self::RightIndex => "right_index",
            Self::LeftThumb => "left_thumb",
            Self::RightThumb => "right_thumb",
            Self::LeftHip => "left_hip",
            Self::RightHip => "right_hip",
            Self::LeftKnee => "left_knee",
            Self::RightKnee => "right_knee",
            Self::LeftAnkle => "left_ankle",
            Self::RightAnkle => "right_ankle",
            Self::LeftHeel => "left_heel",
            Self::RightHeel => "right_heel",
            Self::LeftFootIndex => "left_foot_index",
            Self::RightFootIndex => "right_foot_index",
        }
    }

    /// Get all landmarks in index order
    pub fn all() -> [Self; LANDMARK_COUNT] {
        use PoseLandmark::*;
        [
            Nose,
            LeftEyeInner,
            LeftEye,
            LeftEyeOuter,
            RightEyeInner,
            RightEye,
            RightEyeOuter,
            LeftEar,
            RightEar,
            MouthLeft,
            MouthRight,
            LeftShoulder,
            RightShoulder,
            LeftElbow,
            RightElbow,
            LeftWrist,
            RightWrist,
            LeftPinky,
            RightPinky,
            LeftIndex,
            RightIndex,
            LeftThumb,
            RightThumb,
            LeftHip,
            RightHip,
            LeftKnee,
            RightKnee,
            LeftAnkle,
            RightAnkle,
            LeftHeel,
            RightHeel,
            LeftFootIndex,
            RightFootIndex,
        ]
    }
}

/// Skeleton connections drawn on the annotated frame
pub const POSE_CONNECTIONS: [(PoseLandmark, PoseLandmark); 35] = {
    use PoseLandmark::*;
    [
        (Nose, LeftEyeInner),
        (LeftEyeInner, LeftEye),
        (LeftEye, LeftEyeOuter),
        (LeftEyeOuter, LeftEar),
        (Nose, RightEyeInner),
        (RightEyeInner, RightEye),
        (RightEye, RightEyeOuter),
        (RightEyeOuter, RightEar),
        (MouthLeft, MouthRight),
        (LeftShoulder, RightShoulder),
        (LeftShoulder, LeftElbow),
        (LeftElbow, LeftWrist),
        (LeftWrist, LeftPinky),
        (LeftWrist, LeftIndex),
        (LeftWrist, LeftThumb),
        (LeftPinky, LeftIndex),
        (RightShoulder, RightElbow),
        (RightElbow, RightWrist),
        (RightWrist, RightPinky),
        (RightWrist, RightIndex),
        (RightWrist, RightThumb),
        (RightPinky, RightIndex),
        (LeftShoulder, LeftHip),
        (RightShoulder, RightHip),
        (LeftHip, RightHip),
        (LeftHip, LeftKnee),
        (RightHip, RightKnee),
        (LeftKnee, LeftAnkle),
        (RightKnee, RightAnkle),
        (LeftAnkle, LeftHeel),
        (RightAnkle, RightHeel),
        (LeftHeel, LeftFootIndex),
        (RightHeel, RightFootIndex),
        (LeftAnkle, LeftFootIndex),
        (RightAnkle, RightFootIndex),
    ]
};

/// Landmarks of one detected pose in one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Landmark>", into = "Vec<Landmark>")]
pub struct LandmarkSet {
    landmarks: Vec<Landmark>,
}

impl LandmarkSet {
    /// Build a set from exactly [`LANDMARK_COUNT`] landmarks in index order
    pub fn new(landmarks: Vec<Landmark>) -> Result<Self, TrackingError> {
        if landmarks.len() != LANDMARK_COUNT {
            return Err(TrackingError::LandmarkCount {
                expected: LANDMARK_COUNT,
                actual: landmarks.len(),
            });
        }
        Ok(Self { landmarks })
    }

    /// Set where every landmark has the same value
    pub fn filled(landmark: Landmark) -> Self {
        Self {
            landmarks: vec![landmark; LANDMARK_COUNT],
        }
    }

    /// Get a landmark
    pub fn get(&self, landmark: PoseLandmark) -> &Landmark {
        &self.landmarks[landmark.index()]
    }

    /// Replace a landmark
    pub fn set(&mut self, landmark: PoseLandmark, value: Landmark) {
        self.landmarks[landmark.index()] = value;
    }

    /// Builder form of [`LandmarkSet::set`]
    pub fn with(mut self, landmark: PoseLandmark, value: Landmark) -> Self {
        self.set(landmark, value);
        self
    }

    /// Get a landmark that is usable for angle computation
    pub fn trackable(
        &self,
        landmark: PoseLandmark,
        min_visibility: f32,
    ) -> Result<&Landmark, TrackingError> {
        let point = self.get(landmark);
        if !point.x.is_finite() || !point.y.is_finite() || !point.z.is_finite() {
            return Err(TrackingError::NonFiniteCoordinate { landmark });
        }
        if point.visibility < min_visibility {
            return Err(TrackingError::LowVisibility {
                landmark,
                visibility: point.visibility,
            });
        }
        Ok(point)
    }

    /// Iterate landmarks with their identities
    pub fn iter(&self) -> impl Iterator<Item = (PoseLandmark, &Landmark)> {
        PoseLandmark::all().into_iter().zip(self.landmarks.iter())
    }
}

impl TryFrom<Vec<Landmark>> for LandmarkSet {
    type Error = TrackingError;

    fn try_from(landmarks: Vec<Landmark>) -> Result<Self, Self::Error> {
        Self::new(landmarks)
    }
}

impl From<LandmarkSet> for Vec<Landmark> {
    fn from(set: LandmarkSet) -> Self {
        set.landmarks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_landmark_indices_match_topology() {
        for (position, landmark) in PoseLandmark::all().iter().enumerate() {
            assert_eq!(landmark.index(), position);
        }
        assert_eq!(PoseLandmark::LeftShoulder.index(), 11);
        assert_eq!(PoseLandmark::RightFootIndex.index(), 32);
    }

    #[test]
    fn test_landmark_names() {
        assert_eq!(PoseLandmark::Nose.name(), "nose");
        assert_eq!(PoseLandmark::LeftHeel.name(), "left_heel");
        assert_eq!(PoseLandmark::RightHip.name(), "right_hip");
    }

    #[test]
    fn test_set_requires_full_topology() {
        let result = LandmarkSet::new(vec![Landmark::at(0.5, 0.5); 17]);
        assert_matches!(
            result,
            Err(TrackingError::LandmarkCount {
                expected: 33,
                actual: 17
            })
        );
    }

    #[test]
    fn test_trackable_checks_visibility() {
        let set = LandmarkSet::filled(Landmark::at(0.5, 0.5)).with(
            PoseLandmark::LeftKnee,
            Landmark::new(0.4, 0.7, 0.0, 0.1),
        );

        assert!(set.trackable(PoseLandmark::RightKnee, 0.3).is_ok());
        assert_matches!(
            set.trackable(PoseLandmark::LeftKnee, 0.3),
            Err(TrackingError::LowVisibility { landmark: PoseLandmark::LeftKnee, .. })
        );
    }

    #[test]
    fn test_trackable_rejects_nan() {
        let set = LandmarkSet::filled(Landmark::at(0.5, 0.5))
            .with(PoseLandmark::Nose, Landmark::at(f32::NAN, 0.2));

        assert_matches!(
            set.trackable(PoseLandmark::Nose, 0.0),
            Err(TrackingError::NonFiniteCoordinate { .. })
        );
    }

    #[test]
    fn test_set_deserializes_from_array() {
        let json = serde_json::to_string(&vec![Landmark::at(0.1, 0.2); 33]).unwrap();
        let set: LandmarkSet = serde_json::from_str(&json).unwrap();
        assert_eq!(set.get(PoseLandmark::RightAnkle).y, 0.2);

        let short = serde_json::to_string(&vec![Landmark::at(0.1, 0.2); 3]).unwrap();
        assert!(serde_json::from_str::<LandmarkSet>(&short).is_err());
    }
}

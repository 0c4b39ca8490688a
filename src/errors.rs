use thiserror::Error;

use crate::models::landmark::PoseLandmark;
use crate::services::capture::CaptureTarget;

/// Per-frame geometry faults. These never leave the frame that raised them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackingError {
    #[error("Expected {expected} landmarks, got {actual}")]
    LandmarkCount { expected: usize, actual: usize },
    #[error("Landmark {} has non-finite coordinates", .landmark.name())]
    NonFiniteCoordinate { landmark: PoseLandmark },
    #[error("Landmark {} visibility {visibility:.2} is below the tracking minimum", .landmark.name())]
    LowVisibility {
        landmark: PoseLandmark,
        visibility: f32,
    },
    #[error("Angle {0} is undefined for the current pose")]
    Degenerate(String),
}

/// Capture device errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to open camera {target}: {reason}")]
    Open { target: CaptureTarget, reason: String },
    #[error(
        "FATAL ERROR: Camera could not be opened. Checked indices {}. Please verify camera is not in use by another program.",
        describe_indices(.attempts)
    )]
    Unavailable { attempts: Vec<CaptureTarget> },
    #[error("Failed to read frame: {0}")]
    Read(String),
    #[error("Capture stream ended")]
    EndOfStream,
}

/// Rule table construction and override errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleTableError {
    #[error("Table {table}: angle {angle} is referenced before it is defined")]
    UnknownAngle { table: String, angle: String },
    #[error("Table {table}: angle {angle} is defined twice")]
    DuplicateAngle { table: String, angle: String },
    #[error("Table {table}: threshold {threshold} is not defined")]
    UnknownThreshold { table: String, threshold: String },
    #[error("Table {table}: lead/trail angles need a lead selector over measured angles")]
    MissingLeadSelector { table: String },
    #[error("Threshold override for unknown exercise {0}")]
    UnknownExercise(String),
}

fn describe_indices(attempts: &[CaptureTarget]) -> String {
    let mut indices: Vec<i32> = attempts.iter().map(|target| target.index).collect();
    indices.sort_unstable();
    indices.dedup();

    let labels: Vec<String> = indices.iter().map(|index| index.to_string()).collect();
    match labels.as_slice() {
        [] => "none".to_string(),
        [only] => only.clone(),
        [head @ .., last] => format!("{} and {}", head.join(", "), last),
    }
}

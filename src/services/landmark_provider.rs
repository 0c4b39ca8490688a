/// Landmark Provider
///
/// Boundary to the body-pose estimation model. Given one RGB frame a
/// provider returns the 33 pose landmarks or `None` when nobody is in view.
/// Provider failures are treated as "no detection" by the frame pipeline.
///
/// Model Details (`onnx` feature):
/// - Input: [1, 256, 256, 3] FP32 (NHWC, RGB, normalized [0,1])
/// - Output `Identity`: [1, 195] FP32 (39 points x 5 = x, y, z, visibility, presence)
/// - Output `Identity_1`: [1, 1] FP32 pose presence score
/// - Only the first 33 points are body landmarks; x, y and z are in input pixels
use anyhow::Result;
use image::RgbImage;
use std::sync::Arc;

use crate::models::landmark::LandmarkSet;

/// Body-pose estimation model
pub trait LandmarkProvider: Send {
    fn detect(&mut self, frame: &RgbImage) -> Result<Option<LandmarkSet>>;
}

/// Creates one provider per stream
pub type ProviderFactory = Arc<dyn Fn() -> Result<Box<dyn LandmarkProvider>> + Send + Sync>;

/// Provider that never detects a pose
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDetectionProvider;

impl LandmarkProvider for NoDetectionProvider {
    fn detect(&mut self, _frame: &RgbImage) -> Result<Option<LandmarkSet>> {
        Ok(None)
    }
}

/// Factory for [`NoDetectionProvider`]
pub fn no_detection_factory() -> ProviderFactory {
    Arc::new(|| Ok(Box::new(NoDetectionProvider) as Box<dyn LandmarkProvider>))
}

fn sigmoid(value: f32) -> f32 {
    1.0 / (1.0 + (-value).exp())
}

/// Decode the raw landmark tensor into a landmark set
///
/// `raw` holds at least 33 rows of (x, y, z, visibility logit, presence logit)
/// in input pixel units.
pub fn decode_landmarks(raw: &[f32], input_size: f32) -> Option<LandmarkSet> {
    use crate::models::landmark::{Landmark, LANDMARK_COUNT};

    const STRIDE: usize = 5;
    if raw.len() < LANDMARK_COUNT * STRIDE || input_size <= 0.0 {
        return None;
    }

    let landmarks = raw
        .chunks_exact(STRIDE)
        .take(LANDMARK_COUNT)
        .map(|row| {
            Landmark::new(
                row[0] / input_size,
                row[1] / input_size,
                row[2] / input_size,
                sigmoid(row[3]),
            )
        })
        .collect();

    LandmarkSet::new(landmarks).ok()
}

#[cfg(feature = "onnx")]
pub use onnx::{onnx_factory, OnnxLandmarkProvider};

#[cfg(feature = "onnx")]
mod onnx {
    use super::*;
    use anyhow::Context;
    use image::imageops::FilterType;
    use ndarray::{Array4, ArrayViewD};
    use ort::session::builder::GraphOptimizationLevel;
    use ort::session::Session;
    use ort::value::Tensor;
    use std::path::{Path, PathBuf};
    use tracing::info;

    const INPUT_SIZE: u32 = 256;
    const INPUT_NAME: &str = "input_1";
    const LANDMARKS_OUTPUT: &str = "Identity";
    const PRESENCE_OUTPUT: &str = "Identity_1";

    /// BlazePose-style landmark model on ONNX Runtime
    pub struct OnnxLandmarkProvider {
        session: Session,
        min_presence: f32,
    }

    impl OnnxLandmarkProvider {
        /// Load the model from disk
        pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
            let session = Session::builder()
                .context("Failed to create session builder")?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .commit_from_file(model_path.as_ref())
                .context("Failed to load ONNX landmark model")?;

            info!("Loaded pose landmark model from {}", model_path.as_ref().display());

            Ok(Self {
                session,
                min_presence: 0.5,
            })
        }

        /// Set the minimum pose presence score
        ///
        /// Default: 0.5
        pub fn with_min_presence(mut self, min_presence: f32) -> Self {
            self.min_presence = min_presence.clamp(0.0, 1.0);
            self
        }

        fn preprocess(frame: &RgbImage) -> Array4<f32> {
            let resized = image::imageops::resize(frame, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
            let size = INPUT_SIZE as usize;
            let mut tensor = Array4::<f32>::zeros((1, size, size, 3));
            for (x, y, pixel) in resized.enumerate_pixels() {
                for channel in 0..3 {
                    tensor[[0, y as usize, x as usize, channel]] = pixel[channel] as f32 / 255.0;
                }
            }
            tensor
        }
    }

    impl LandmarkProvider for OnnxLandmarkProvider {
        fn detect(&mut self, frame: &RgbImage) -> Result<Option<LandmarkSet>> {
            let input = Tensor::from_array(Self::preprocess(frame))?;
            let outputs = self
                .session
                .run(ort::inputs![INPUT_NAME => input])
                .context("Inference failed")?;

            let presence: ArrayViewD<f32> = outputs[PRESENCE_OUTPUT]
                .try_extract_array()
                .context("Failed to extract pose presence")?;
            if presence.iter().next().copied().unwrap_or(0.0) < self.min_presence {
                return Ok(None);
            }

            let raw: ArrayViewD<f32> = outputs[LANDMARKS_OUTPUT]
                .try_extract_array()
                .context("Failed to extract landmarks")?;
            let raw: Vec<f32> = raw.iter().copied().collect();

            Ok(decode_landmarks(&raw, INPUT_SIZE as f32))
        }
    }

    /// Factory loading one model session per stream
    pub fn onnx_factory(model_path: PathBuf) -> ProviderFactory {
        Arc::new(move || {
            let provider = OnnxLandmarkProvider::new(&model_path)?;
            Ok(Box::new(provider) as Box<dyn LandmarkProvider>)
        })
    }
}

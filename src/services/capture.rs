/// Capture device abstraction
///
/// A capture device yields a lazy, non-restartable sequence of RGB frames.
/// Opening one walks an ordered chain of (backend, index) attempts and stops
/// at the first device that opens. Handles are released when the boxed
/// source is dropped.
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use crate::errors::CaptureError;

/// Capture API used to open a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureApi {
    /// Let the capture library pick
    Any,
    /// Windows DirectShow
    DirectShow,
    /// Windows Media Foundation
    MediaFoundation,
    /// Linux Video4Linux2
    V4l2,
    /// macOS AVFoundation
    AvFoundation,
}

impl CaptureApi {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::DirectShow => "dshow",
            Self::MediaFoundation => "msmf",
            Self::V4l2 => "v4l2",
            Self::AvFoundation => "avfoundation",
        }
    }
}

impl FromStr for CaptureApi {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any" => Ok(Self::Any),
            "dshow" | "directshow" => Ok(Self::DirectShow),
            "msmf" | "mediafoundation" => Ok(Self::MediaFoundation),
            "v4l2" | "v4l" => Ok(Self::V4l2),
            "avfoundation" => Ok(Self::AvFoundation),
            other => Err(format!("unknown capture api: {}", other)),
        }
    }
}

/// One attempt in the device fallback chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaptureTarget {
    pub api: CaptureApi,
    pub index: i32,
}

impl CaptureTarget {
    pub fn new(api: CaptureApi, index: i32) -> Self {
        Self { api, index }
    }

    /// DirectShow and default backends on the first two device indices
    pub fn default_chain() -> Vec<Self> {
        vec![
            Self::new(CaptureApi::DirectShow, 0),
            Self::new(CaptureApi::Any, 0),
            Self::new(CaptureApi::DirectShow, 1),
            Self::new(CaptureApi::Any, 1),
        ]
    }

    /// Parse a chain like `dshow:0,any:0,v4l2:1`
    pub fn parse_chain(list: &str) -> Result<Vec<Self>, String> {
        list.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl fmt::Display for CaptureTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.api.as_str(), self.index)
    }
}

impl FromStr for CaptureTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (api, index) = match s.split_once(':') {
            Some((api, index)) => (api.parse()?, index),
            None => (CaptureApi::Any, s),
        };
        let index = index
            .trim()
            .parse()
            .map_err(|_| format!("invalid camera index in {}", s))?;
        Ok(Self { api, index })
    }
}

/// Requested capture properties
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 60,
        }
    }
}

/// An opened capture device
pub trait FrameSource: Send {
    /// Block until the next frame is available
    fn read(&mut self) -> Result<RgbImage, CaptureError>;
}

/// Opens capture devices
pub trait CaptureBackend: Send + Sync {
    fn open(
        &self,
        target: CaptureTarget,
        settings: &CaptureSettings,
    ) -> Result<Box<dyn FrameSource>, CaptureError>;
}

/// Walk the fallback chain and return the first device that opens
pub fn open_with_fallback(
    backend: &dyn CaptureBackend,
    chain: &[CaptureTarget],
    settings: &CaptureSettings,
) -> Result<Box<dyn FrameSource>, CaptureError> {
    for target in chain {
        match backend.open(*target, settings) {
            Ok(source) => {
                info!("Opened camera {}", target);
                return Ok(source);
            }
            Err(err) => warn!("{}", err),
        }
    }

    Err(CaptureError::Unavailable {
        attempts: chain.to_vec(),
    })
}

/// Backend used when the binary is built without capture support
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableBackend;

impl CaptureBackend for UnavailableBackend {
    fn open(
        &self,
        target: CaptureTarget,
        _settings: &CaptureSettings,
    ) -> Result<Box<dyn FrameSource>, CaptureError> {
        Err(CaptureError::Open {
            target,
            reason: "built without the `camera` feature".to_string(),
        })
    }
}

#[cfg(feature = "camera")]
pub use opencv_backend::OpenCvBackend;

#[cfg(feature = "camera")]
mod opencv_backend {
    use super::*;
    use opencv::{
        core::{AlgorithmHint, Mat},
        imgproc,
        prelude::*,
        videoio::{self, VideoCapture},
    };

    /// OpenCV `videoio` capture backend
    #[derive(Debug, Default, Clone, Copy)]
    pub struct OpenCvBackend;

    impl OpenCvBackend {
        fn api_preference(api: CaptureApi) -> i32 {
            match api {
                CaptureApi::Any => videoio::CAP_ANY,
                CaptureApi::DirectShow => videoio::CAP_DSHOW,
                CaptureApi::MediaFoundation => videoio::CAP_MSMF,
                CaptureApi::V4l2 => videoio::CAP_V4L2,
                CaptureApi::AvFoundation => videoio::CAP_AVFOUNDATION,
            }
        }
    }

    impl CaptureBackend for OpenCvBackend {
        fn open(
            &self,
            target: CaptureTarget,
            settings: &CaptureSettings,
        ) -> Result<Box<dyn FrameSource>, CaptureError> {
            let open_error = |reason: String| CaptureError::Open { target, reason };

            let mut capture = VideoCapture::new(target.index, Self::api_preference(target.api))
                .map_err(|e| open_error(e.to_string()))?;
            if !capture.is_opened().map_err(|e| open_error(e.to_string()))? {
                return Err(open_error("device did not open".to_string()));
            }

            for (property, value) in [
                (videoio::CAP_PROP_FRAME_WIDTH, settings.width),
                (videoio::CAP_PROP_FRAME_HEIGHT, settings.height),
                (videoio::CAP_PROP_FPS, settings.fps),
            ] {
                if let Err(e) = capture.set(property, value as f64) {
                    warn!("Camera {} rejected property {}: {}", target, property, e);
                }
            }

            Ok(Box::new(OpenCvSource { capture }))
        }
    }

    struct OpenCvSource {
        capture: VideoCapture,
    }

    impl FrameSource for OpenCvSource {
        fn read(&mut self) -> Result<RgbImage, CaptureError> {
            let mut frame = Mat::default();
            let grabbed = self
                .capture
                .read(&mut frame)
                .map_err(|e| CaptureError::Read(e.to_string()))?;
            if !grabbed || frame.empty() {
                return Err(CaptureError::EndOfStream);
            }

            let mut rgb = Mat::default();
            imgproc::cvt_color(
                &frame,
                &mut rgb,
                imgproc::COLOR_BGR2RGB,
                0,
                AlgorithmHint::ALGO_HINT_DEFAULT,
            )
            .map_err(|e| CaptureError::Read(e.to_string()))?;

            let width = rgb.cols() as u32;
            let height = rgb.rows() as u32;
            let bytes = rgb
                .data_bytes()
                .map_err(|e| CaptureError::Read(e.to_string()))?
                .to_vec();

            RgbImage::from_raw(width, height, bytes)
                .ok_or_else(|| CaptureError::Read("frame buffer size mismatch".to_string()))
        }
    }

    impl Drop for OpenCvSource {
        fn drop(&mut self) {
            if let Err(e) = self.capture.release() {
                warn!("Failed to release camera: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::Mutex;

    // `assert_matches!` formats the whole Result on failure
    impl std::fmt::Debug for dyn FrameSource {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("FrameSource")
        }
    }

    struct ScriptedBackend {
        opens_on: Option<CaptureTarget>,
        attempts: Mutex<Vec<CaptureTarget>>,
    }

    struct BlankSource;

    impl FrameSource for BlankSource {
        fn read(&mut self) -> Result<RgbImage, CaptureError> {
            Ok(RgbImage::new(4, 4))
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
                Ok(Box::new(BlankSource))
            } else {
                Err(CaptureError::Open {
                    target,
                    reason: "busy".to_string(),
                })
            }
        }
    }

    #[test]
    fn test_parse_chain() {
        let chain = CaptureTarget::parse_chain("dshow:0, any:0,v4l2:1, 2").unwrap();
        assert_eq!(
            chain,
            vec![
                CaptureTarget::new(CaptureApi::DirectShow, 0),
                CaptureTarget::new(CaptureApi::Any, 0),
                CaptureTarget::new(CaptureApi::V4l2, 1),
                CaptureTarget::new(CaptureApi::Any, 2),
            ]
        );
        assert!(CaptureTarget::parse_chain("firewire:0").is_err());
        assert!(CaptureTarget::parse_chain("dshow:x").is_err());
    }

    #[test]
    fn test_fallback_short_circuits_on_first_success() {
        let backend = ScriptedBackend {
            opens_on: Some(CaptureTarget::new(CaptureApi::Any, 0)),
            attempts: Mutex::new(Vec::new()),
        };

        let source = open_with_fallback(
            &backend,
            &CaptureTarget::default_chain(),
            &CaptureSettings::default(),
        );

        assert!(source.is_ok());
        assert_eq!(
            *backend.attempts.lock().unwrap(),
            vec![
                CaptureTarget::new(CaptureApi::DirectShow, 0),
                CaptureTarget::new(CaptureApi::Any, 0),
            ]
        );
    }

    #[test]
    fn test_fallback_exhausted() {
        let backend = ScriptedBackend {
            opens_on: None,
            attempts: Mutex::new(Vec::new()),
        };
        let chain = CaptureTarget::default_chain();

        let result = open_with_fallback(&backend, &chain, &CaptureSettings::default());

        assert_matches!(result, Err(CaptureError::Unavailable { ref attempts }) if attempts.len() == 4);
        assert_eq!(backend.attempts.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_unavailable_backend_never_opens() {
        let result = open_with_fallback(
            &UnavailableBackend,
            &CaptureTarget::default_chain(),
            &CaptureSettings::default(),
        );
        assert_matches!(result, Err(CaptureError::Unavailable { .. }));
    }
}

use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::services::capture::{CaptureSettings, CaptureTarget};
use crate::services::exercise_classifier::LockConfig;
use crate::services::frame_pipeline::PipelineOptions;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub log_level: String,
    pub camera_fallbacks: Vec<CaptureTarget>,
    pub capture: CaptureSettings,
    pub pose_model_path: PathBuf,
    pub min_visibility: f32,
    pub jpeg_quality: u8,
    pub auto: AutoDetectConfig,
    pub rule_overrides_path: Option<PathBuf>,
}

/// Auto-detect lock policy and frame stride
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoDetectConfig {
    pub window: usize,
    pub lock_threshold: usize,
    pub switch_cooldown: Duration,
    pub no_rep_limit: u32,
    pub frame_stride: u32,
}

impl Default for AutoDetectConfig {
    fn default() -> Self {
        let lock = LockConfig::default();
        Self {
            window: lock.window,
            lock_threshold: lock.lock_threshold,
            switch_cooldown: lock.cooldown,
            no_rep_limit: lock.no_rep_limit,
            frame_stride: 2,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            environment: "development".to_string(),
            log_level: "info".to_string(),
            camera_fallbacks: CaptureTarget::default_chain(),
            capture: CaptureSettings::default(),
            pose_model_path: PathBuf::from("models/pose_landmark_full.onnx"),
            min_visibility: 0.3,
            jpeg_quality: 80,
            auto: AutoDetectConfig::default(),
            rule_overrides_path: None,
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let host = lookup("HOST").unwrap_or(defaults.host);
        let port = parse_var(&lookup, "PORT", defaults.port)?;
        let environment = lookup("ENVIRONMENT").unwrap_or(defaults.environment);
        let log_level = lookup("LOG_LEVEL").unwrap_or(defaults.log_level);

        let camera_fallbacks = match lookup("CAMERA_FALLBACKS") {
            Some(raw) => CaptureTarget::parse_chain(&raw)
                .map_err(|e| anyhow!(e))
                .context("Invalid value for CAMERA_FALLBACKS")?,
            None => defaults.camera_fallbacks,
        };
        if camera_fallbacks.is_empty() {
            return Err(anyhow!("CAMERA_FALLBACKS must name at least one device"));
        }

        let capture = CaptureSettings {
            width: parse_var(&lookup, "CAMERA_WIDTH", defaults.capture.width)?,
            height: parse_var(&lookup, "CAMERA_HEIGHT", defaults.capture.height)?,
            fps: parse_var(&lookup, "CAMERA_FPS", defaults.capture.fps)?,
        };

        let pose_model_path = lookup("POSE_MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.pose_model_path);

        let min_visibility: f32 = parse_var(&lookup, "MIN_VISIBILITY", defaults.min_visibility)?;
        if !(0.0..=1.0).contains(&min_visibility) {
            return Err(anyhow!("MIN_VISIBILITY must be within [0, 1], got {}", min_visibility));
        }

        let jpeg_quality: u8 = parse_var(&lookup, "JPEG_QUALITY", defaults.jpeg_quality)?;
        if !(1..=100).contains(&jpeg_quality) {
            return Err(anyhow!("JPEG_QUALITY must be within [1, 100], got {}", jpeg_quality));
        }

        let auto = AutoDetectConfig {
            window: parse_var(&lookup, "AUTO_WINDOW", defaults.auto.window)?,
            lock_threshold: parse_var(&lookup, "AUTO_LOCK_THRESHOLD", defaults.auto.lock_threshold)?,
            switch_cooldown: Duration::from_millis(parse_var(
                &lookup,
                "AUTO_SWITCH_COOLDOWN_MS",
                defaults.auto.switch_cooldown.as_millis() as u64,
            )?),
            no_rep_limit: parse_var(&lookup, "AUTO_NO_REP_LIMIT", defaults.auto.no_rep_limit)?,
            frame_stride: parse_var(&lookup, "AUTO_FRAME_STRIDE", defaults.auto.frame_stride)?,
        };
        if auto.window == 0 || auto.lock_threshold == 0 || auto.lock_threshold > auto.window {
            return Err(anyhow!(
                "AUTO_LOCK_THRESHOLD ({}) must be between 1 and AUTO_WINDOW ({})",
                auto.lock_threshold,
                auto.window
            ));
        }

        let rule_overrides_path = lookup("RULE_OVERRIDES_PATH")
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        Ok(AppConfig {
            host,
            port,
            environment,
            log_level,
            camera_fallbacks,
            capture,
            pose_model_path,
            min_visibility,
            jpeg_quality,
            auto,
            rule_overrides_path,
        })
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn lock_config(&self) -> LockConfig {
        LockConfig {
            window: self.auto.window,
            lock_threshold: self.auto.lock_threshold,
            cooldown: self.auto.switch_cooldown,
            no_rep_limit: self.auto.no_rep_limit,
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            chain: self.camera_fallbacks.clone(),
            settings: self.capture,
            jpeg_quality: self.jpeg_quality,
        }
    }
}

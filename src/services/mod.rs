// Analysis and streaming services

pub mod angle_engine;
pub mod capture;
pub mod exercise_classifier;
pub mod frame_pipeline;
pub mod landmark_provider;
pub mod overlay;
pub mod rep_counter;
pub mod rule_catalog;
pub mod session_registry;

pub use angle_engine::AngleEngine;
pub use exercise_classifier::AutoDetectSession;
pub use frame_pipeline::FramePipeline;
pub use rep_counter::ExerciseSession;
pub use rule_catalog::RuleCatalog;
pub use session_registry::SessionRegistry;

// Library exports for FitJourney
// This allows testing of internal modules

pub mod api;
pub mod config;
pub mod errors;
pub mod models;
pub mod services;

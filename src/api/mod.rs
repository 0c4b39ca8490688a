// API routes and handlers

pub mod errors;
pub mod exercises;
pub mod health;
pub mod routes;
pub mod state;

pub use errors::ApiError;
pub use routes::create_routes;
pub use state::AppState;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::errors::RuleTableError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("No exercise registered under '{0}'")]
    ExerciseNotFound(String),
    #[error("Rule table error: {0}")]
    RuleTable(#[from] RuleTableError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::ExerciseNotFound(_) => (StatusCode::NOT_FOUND, "Exercise not registered"),
            ApiError::RuleTable(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };

        let body = Json(json!({
            "error": error_message,
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}

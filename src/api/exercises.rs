use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use futures::StreamExt;
use serde::Serialize;
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use super::errors::ApiError;
use super::state::AppState;
use crate::models::session::FeedbackSnapshot;
use crate::services::exercise_classifier::{AutoDetectSession, AutoSnapshot};
use crate::services::frame_pipeline::{spawn_stream, FrameAnalyzer, Strided};
use crate::services::overlay::STREAM_CONTENT_TYPE;
use crate::services::rep_counter::ExerciseSession;
use crate::services::session_registry::SnapshotPublisher;

/// Catalog entry
#[derive(Debug, Clone, Serialize)]
pub struct ExerciseSummary {
    pub id: String,
    pub display_name: String,
    pub target_angle: Option<f64>,
}

/// List the registered exercises
pub async fn list_exercises(State(state): State<AppState>) -> Json<Vec<ExerciseSummary>> {
    let exercises = state
        .catalog
        .exercises()
        .iter()
        .map(|table| ExerciseSummary {
            id: table.id.clone(),
            display_name: table.display_name.clone(),
            target_angle: table.target_angle(),
        })
        .collect();

    Json(exercises)
}

fn stream_response<A>(state: &AppState, analyzer: A, publisher: SnapshotPublisher<A::Snapshot>) -> Response
where
    A: FrameAnalyzer + 'static,
{
    let parts = spawn_stream(
        state.backend.clone(),
        state.config.pipeline_options(),
        state.create_provider(),
        analyzer,
        publisher,
    );
    let body = Body::from_stream(ReceiverStream::new(parts).map(Ok::<_, Infallible>));

    (
        [
            (header::CONTENT_TYPE, STREAM_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

/// Annotated stream for one exercise
pub async fn stream_exercise(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let table = state
        .catalog
        .exercise(&id)
        .ok_or_else(|| ApiError::ExerciseNotFound(id.clone()))?;
    let publisher = state
        .registry
        .exercise(&id)
        .ok_or_else(|| ApiError::ExerciseNotFound(id.clone()))?;

    info!("Starting stream for {}", id);
    let session = ExerciseSession::new(table).with_min_visibility(state.config.min_visibility);

    Ok(stream_response(&state, session, publisher))
}

/// Latest snapshot for one exercise
pub async fn exercise_feedback(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<FeedbackSnapshot>, ApiError> {
    let snapshot = state
        .registry
        .latest(&id)
        .ok_or(ApiError::ExerciseNotFound(id))?;

    Ok(Json(snapshot))
}

/// Annotated auto-detect stream
pub async fn stream_auto(State(state): State<AppState>) -> Result<Response, ApiError> {
    let session = AutoDetectSession::new(
        &state.catalog,
        state.config.lock_config(),
        state.config.min_visibility,
    )?;

    info!("Starting auto-detect stream");
    let analyzer = Strided::new(session, state.config.auto.frame_stride);

    Ok(stream_response(&state, analyzer, state.registry.auto()))
}

/// Latest auto-detect snapshot
pub async fn auto_feedback(State(state): State<AppState>) -> Json<AutoSnapshot> {
    Json(state.registry.latest_auto())
}

pub fn exercise_routes(state: AppState) -> Router {
    Router::new()
        .route("/exercises", get(list_exercises))
        .route("/exercises/:id/stream", get(stream_exercise))
        .route("/exercises/:id/feedback", get(exercise_feedback))
        .route("/auto/stream", get(stream_auto))
        .route("/auto/feedback", get(auto_feedback))
        .with_state(state)
}

/// Paths kept for clients of the first release
pub fn legacy_routes(state: AppState) -> Router {
    Router::new()
        .route("/video_feed/:id", get(stream_exercise))
        .route("/get_feedback/:id", get(exercise_feedback))
        .route("/auto_classify_video_feed", get(stream_auto))
        .route("/exercise_info", get(auto_feedback))
        .with_state(state)
}

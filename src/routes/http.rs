//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs parameters and basic result info.

use std::sync::Arc;
use axum::{
  extract::{Path, Query, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use tracing::{info, instrument};

use crate::domain::Level;
use crate::error::{GameError, RequestError};
use crate::logic::*;
use crate::protocol::*;
use crate::state::AppState;

impl IntoResponse for RequestError {
  fn into_response(self) -> Response {
    let status = match &self {
      RequestError::InvalidLevel(_) => StatusCode::BAD_REQUEST,
      RequestError::Game(GameError::UnknownSession(_)) => StatusCode::NOT_FOUND,
      RequestError::Game(GameError::InvalidPhase { .. }) => StatusCode::CONFLICT,
    };
    (status, Json(ErrorOut { error: self.to_string() })).into_response()
  }
}

pub fn parse_level(n: Option<u8>) -> Result<Level, RequestError> {
  n.map(Level::try_from)
    .transpose()
    .map(Option::unwrap_or_default)
    .map_err(RequestError::InvalidLevel)
}

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(HealthOut { ok: true, service: state.acquirer.health() })
}

#[instrument(level = "info", skip(state))]
pub async fn http_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(state.acquirer.health())
}

#[instrument(level = "info", skip(state), fields(level = ?q.level))]
pub async fn http_get_challenge(
  State(state): State<Arc<AppState>>,
  Query(q): Query<ChallengeQuery>,
) -> Result<impl IntoResponse, RequestError> {
  let level = parse_level(q.level)?;
  let ch = state.acquirer.acquire_challenge(level).await;
  info!(target: "challenge", %level, source = ?ch.source, "HTTP challenge served");
  Ok(Json(ch))
}

#[instrument(level = "info", skip(state))]
pub async fn http_start_game(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  let session = start_game(&state).await;
  (StatusCode::CREATED, Json(game_out(&session, state.acquirer.health())))
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_get_game(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<impl IntoResponse, RequestError> {
  let session = state
    .get_session(&id)
    .await
    .ok_or_else(|| GameError::UnknownSession(id.clone()))?;
  Ok(Json(game_out(&session, state.acquirer.health())))
}

#[instrument(level = "info", skip(state, body), fields(%id, answer_len = body.selected_option.len()))]
pub async fn http_post_answer(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<AnswerIn>,
) -> Result<impl IntoResponse, RequestError> {
  let (evaluation, session) = submit_answer(&state, &id, &body.selected_option).await?;
  info!(target: "challenge", %id, correct = evaluation.is_correct, score = session.score, "HTTP answer evaluated");
  Ok(Json(AnswerOut { evaluation, game: game_out(&session, state.acquirer.health()) }))
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_post_next(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<impl IntoResponse, RequestError> {
  let session = next_level(&state, &id).await?;
  Ok(Json(game_out(&session, state.acquirer.health())))
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_post_restart(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<impl IntoResponse, RequestError> {
  let session = restart(&state, &id).await?;
  Ok(Json(game_out(&session, state.acquirer.health())))
}

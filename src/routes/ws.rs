//! WebSocket upgrade + message loop. Each client message is parsed as JSON and
//! forwarded to core logic; we reply with a single JSON message per request.
//! Service health changes are pushed as `service_status` messages.

use std::sync::Arc;
use tokio::sync::watch;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tracing::{info, error, instrument, debug};

use crate::domain::{Level, ServiceHealth};
use crate::error::{GameError, RequestError};
use crate::logic::*;
use crate::protocol::{game_out, ClientWsMessage, ServerWsMessage};
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "tense_master", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

fn encode(msg: &ServerWsMessage) -> String {
  serde_json::to_string(msg).unwrap_or_else(|e| {
    serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
  })
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "tense_master", "WebSocket connected");
  let mut health = state.acquirer.subscribe();

  loop {
    let reply = tokio::select! {
      incoming = socket.recv() => match incoming {
        Some(Ok(Message::Text(txt))) => match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(msg) => {
            debug!(target: "tense_master", "WS received: {:?}", &msg);
            handle_client_ws(msg, &state).await
          }
          Err(e) => ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) },
        },
        Some(Ok(Message::Ping(payload))) => {
          if let Err(e) = socket.send(Message::Pong(payload)).await {
            error!(target: "tense_master", error = %e, "WS pong send error");
            break;
          }
          continue;
        }
        Some(Ok(Message::Close(_))) | None => break,
        Some(Ok(_)) => continue,
        Some(Err(e)) => {
          error!(target: "tense_master", error = %e, "WS receive error");
          break;
        }
      },
      pushed = next_status(&mut health) => match pushed {
        Some(status) => status,
        None => break,
      }
    };

    if let Err(e) = socket.send(Message::Text(encode(&reply))).await {
      error!(target: "tense_master", error = %e, "WS send error");
      break;
    }
  }
  info!(target: "tense_master", "WebSocket disconnected");
}

/// Wait for the next health change and wrap it for the client. `None` once the
/// sender is gone.
async fn next_status(health: &mut watch::Receiver<ServiceHealth>) -> Option<ServerWsMessage> {
  health.changed().await.ok()?;
  let service = health.borrow_and_update().clone();
  Some(ServerWsMessage::ServiceStatus { service })
}

fn error_reply(e: RequestError) -> ServerWsMessage {
  ServerWsMessage::Error { message: e.to_string() }
}

#[instrument(level = "info", skip(state))]
async fn handle_client_ws(msg: ClientWsMessage, state: &AppState) -> ServerWsMessage {
  match msg {
    ClientWsMessage::Ping => ServerWsMessage::Pong,

    ClientWsMessage::Status => ServerWsMessage::ServiceStatus { service: state.acquirer.health() },

    ClientWsMessage::NewChallenge { level } => match Level::try_from(level) {
      Ok(level) => {
        let challenge = state.acquirer.acquire_challenge(level).await;
        info!(target: "challenge", %level, source = ?challenge.source, "WS new_challenge served");
        ServerWsMessage::Challenge { challenge }
      }
      Err(e) => error_reply(RequestError::InvalidLevel(e)),
    },

    ClientWsMessage::StartGame => {
      let session = start_game(state).await;
      ServerWsMessage::Game { game: game_out(&session, state.acquirer.health()) }
    }

    ClientWsMessage::SubmitAnswer { session_id, selected_option } => {
      match submit_answer(state, &session_id, &selected_option).await {
        Ok((evaluation, session)) => {
          info!(target: "challenge", id = %session_id, correct = evaluation.is_correct, "WS submit_answer evaluated");
          ServerWsMessage::Feedback { evaluation, game: game_out(&session, state.acquirer.health()) }
        }
        Err(e) => error_reply(e.into()),
      }
    }

    ClientWsMessage::NextLevel { session_id } => reply_game(state, next_level(state, &session_id).await),

    ClientWsMessage::Restart { session_id } => reply_game(state, restart(state, &session_id).await),
  }
}

fn reply_game(state: &AppState, r: Result<crate::domain::GameSession, GameError>) -> ServerWsMessage {
  match r {
    Ok(session) => ServerWsMessage::Game { game: game_out(&session, state.acquirer.health()) },
    Err(e) => error_reply(e.into()),
  }
}

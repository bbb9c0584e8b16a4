//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - Evaluating a selected option (exact match, 100 or 0 points)
//!   - Per-level learning tips
//!   - Game progression: start, answer, next level, restart

use tracing::{info, instrument};

use crate::domain::{Challenge, Evaluation, GamePhase, GameSession, Level};
use crate::error::GameError;
use crate::state::AppState;

pub const CORRECT_SCORE: u32 = 100;

struct LevelTip {
  correct: &'static str,
  incorrect: &'static str,
}

fn level_tip(level: Level) -> LevelTip {
  match level {
    Level::One => LevelTip {
      correct: "Great job! You've correctly used past tense forms throughout the paragraph. Remember that when describing past events (indicated by 'yesterday'), all verbs should be in past tense.",
      incorrect: "When describing past events (indicated by 'yesterday'), all verbs should be in past tense. Check each verb and make sure it matches the time of the action.",
    },
    Level::Two => LevelTip {
      correct: "Excellent! You've maintained proper tense sequence. In complex sentences, the main action uses simple past tense, while earlier actions use past perfect ('had + verb').",
      incorrect: "For events that happened before another past action, use past perfect tense ('had + verb'). The main narrative should use simple past tense.",
    },
    Level::Three => LevelTip {
      correct: "Perfect! You've correctly aligned verb tenses with time markers. Future events use 'will' or 'going to', present actions use present tense, and past events use past tense.",
      incorrect: "Pay attention to time markers (next week, now, yesterday, etc.) and match your verb tenses accordingly. Future events need 'will' or 'going to'.",
    },
  }
}

/// Exact string comparison against the corrected paragraph. No partial credit.
pub fn evaluate(selected: &str, challenge: &Challenge) -> Evaluation {
  let is_correct = selected == challenge.correct_text;
  let tip = level_tip(challenge.level);
  Evaluation {
    is_correct,
    score_delta: if is_correct { CORRECT_SCORE } else { 0 },
    feedback: if is_correct {
      "✨ Excellent! You've chosen the correct tense usage.".into()
    } else {
      "Keep trying! Check the correct version and errors below:".into()
    },
    user_answer: selected.to_string(),
    correct_answer: challenge.correct_text.clone(),
    errors: challenge.errors.clone(),
    explanation: if is_correct { tip.correct } else { tip.incorrect }.into(),
  }
}

#[instrument(level = "info", skip(state))]
pub async fn start_game(state: &AppState) -> GameSession {
  let challenge = state.acquirer.acquire_challenge(Level::One).await;
  let session = state.create_session(challenge).await;
  info!(target: "challenge", id = %session.id, source = ?session.challenge.source, "Game started");
  session
}

#[instrument(level = "info", skip(state, selected), fields(%session_id, answer_len = selected.len()))]
pub async fn submit_answer(state: &AppState, session_id: &str, selected: &str) -> Result<(Evaluation, GameSession), GameError> {
  let mut sessions = state.sessions.write().await;
  let session = sessions
    .get_mut(session_id)
    .ok_or_else(|| GameError::UnknownSession(session_id.to_string()))?;
  if session.phase != GamePhase::Playing {
    return Err(GameError::InvalidPhase { action: "answer", phase: session.phase.as_str() });
  }

  let eval = evaluate(selected, &session.challenge);
  session.touch();
  session.score += eval.score_delta;
  session.phase = GamePhase::Feedback;
  session.feedback = Some(eval.clone());
  info!(target: "challenge", id = %session_id, level = %session.level, correct = eval.is_correct, score = session.score, "Answer evaluated");
  Ok((eval, session.clone()))
}

/// Advance after feedback. The last level completes the game instead.
#[instrument(level = "info", skip(state), fields(%session_id))]
pub async fn next_level(state: &AppState, session_id: &str) -> Result<GameSession, GameError> {
  let next = {
    let sessions = state.sessions.read().await;
    let session = sessions
      .get(session_id)
      .ok_or_else(|| GameError::UnknownSession(session_id.to_string()))?;
    if session.phase != GamePhase::Feedback {
      return Err(GameError::InvalidPhase { action: "advance", phase: session.phase.as_str() });
    }
    session.level.next()
  };

  // Acquire without holding the lock; generation may take several seconds.
  let challenge = match next {
    Some(level) => Some(state.acquirer.acquire_challenge(level).await),
    None => None,
  };

  let mut sessions = state.sessions.write().await;
  let session = sessions
    .get_mut(session_id)
    .ok_or_else(|| GameError::UnknownSession(session_id.to_string()))?;
  if session.phase != GamePhase::Feedback {
    return Err(GameError::InvalidPhase { action: "advance", phase: session.phase.as_str() });
  }
  session.touch();
  match challenge {
    Some(c) => {
      session.level = c.level;
      session.challenge = c;
      session.phase = GamePhase::Playing;
      session.feedback = None;
    }
    None => session.phase = GamePhase::Complete,
  }
  info!(target: "challenge", id = %session_id, level = %session.level, phase = session.phase.as_str(), score = session.score, "Session advanced");
  Ok(session.clone())
}

#[instrument(level = "info", skip(state), fields(%session_id))]
pub async fn restart(state: &AppState, session_id: &str) -> Result<GameSession, GameError> {
  if !state.sessions.read().await.contains_key(session_id) {
    return Err(GameError::UnknownSession(session_id.to_string()));
  }
  let challenge = state.acquirer.acquire_challenge(Level::One).await;

  let mut sessions = state.sessions.write().await;
  let session = sessions
    .get_mut(session_id)
    .ok_or_else(|| GameError::UnknownSession(session_id.to_string()))?;
  session.touch();
  session.level = Level::One;
  session.score = 0;
  session.phase = GamePhase::Playing;
  session.challenge = challenge;
  session.feedback = None;
  info!(target: "challenge", id = %session_id, "Session restarted");
  Ok(session.clone())
}

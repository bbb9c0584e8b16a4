//! Error types for challenge acquisition and game sessions.

use thiserror::Error;

/// Why a single generation attempt failed. Every kind counts against the retry budget.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AcquireError {
  #[error("API request failed: {0}")]
  TransportFailure(String),

  #[error("Request timed out")]
  Timeout,

  #[error("Failed to parse API response: {0}")]
  MalformedResponse(String),

  #[error("API key not found in environment variables")]
  ConfigurationMissing,
}

impl AcquireError {
  pub fn kind(&self) -> &'static str {
    match self {
      AcquireError::TransportFailure(_) => "transport_failure",
      AcquireError::Timeout => "timeout",
      AcquireError::MalformedResponse(_) => "malformed_response",
      AcquireError::ConfigurationMissing => "configuration_missing",
    }
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GameError {
  #[error("unknown session: {0}")]
  UnknownSession(String),

  #[error("cannot {action} while the game is {phase}")]
  InvalidPhase { action: &'static str, phase: &'static str },
}

/// Failures surfaced to HTTP/WS callers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
  #[error("{0}")]
  InvalidLevel(String),

  #[error(transparent)]
  Game(#[from] GameError),
}

//! Domain models: levels, challenges and their provenance, service health.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Difficulty level. The game is three levels long.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Level {
  One,
  Two,
  Three,
}

impl Level {
  pub const ALL: [Level; 3] = [Level::One, Level::Two, Level::Three];

  pub fn number(self) -> u8 {
    match self {
      Level::One => 1,
      Level::Two => 2,
      Level::Three => 3,
    }
  }

  /// The following level, or `None` once the last level is reached.
  pub fn next(self) -> Option<Level> {
    match self {
      Level::One => Some(Level::Two),
      Level::Two => Some(Level::Three),
      Level::Three => None,
    }
  }
}

impl Default for Level {
  fn default() -> Self { Level::One }
}

impl TryFrom<u8> for Level {
  type Error = String;

  fn try_from(n: u8) -> Result<Self, Self::Error> {
    match n {
      1 => Ok(Level::One),
      2 => Ok(Level::Two),
      3 => Ok(Level::Three),
      other => Err(format!("unsupported level {other} (expected 1..=3)")),
    }
  }
}

impl From<Level> for u8 {
  fn from(l: Level) -> u8 { l.number() }
}

impl fmt::Display for Level {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.number())
  }
}

/// Where did the challenge come from?
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeSource {
  Generated, // produced by the chat-completion API
  Fallback,  // static bank
}

/// One quiz unit. Built once per acquisition and never mutated afterwards.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
  pub level: Level,
  pub text: String,
  pub correct_text: String,
  pub errors: Vec<String>,
  pub options: Vec<String>,
  pub source: ChallengeSource,
}

/// Whether live generation is currently considered reliable.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceHealth {
  pub available: bool,
  pub message: String,
}

impl ServiceHealth {
  pub fn available(message: impl Into<String>) -> Self {
    Self { available: true, message: message.into() }
  }

  pub fn unavailable(message: impl Into<String>) -> Self {
    Self { available: false, message: message.into() }
  }
}

impl Default for ServiceHealth {
  fn default() -> Self { Self::available("") }
}

/// Outcome of checking one selected option against a challenge.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
  pub is_correct: bool,
  pub score_delta: u32,
  pub feedback: String,
  pub user_answer: String,
  pub correct_answer: String,
  pub errors: Vec<String>,
  pub explanation: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
  Playing,
  Feedback,
  Complete,
}

impl GamePhase {
  pub fn as_str(self) -> &'static str {
    match self {
      GamePhase::Playing => "playing",
      GamePhase::Feedback => "feedback",
      GamePhase::Complete => "complete",
    }
  }
}

/// One player's run through the levels.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSession {
  pub id: String,
  pub level: Level,
  pub score: u32,
  pub phase: GamePhase,
  pub challenge: Challenge,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub feedback: Option<Evaluation>,
  /// Last time a player acted on this session; drives idle eviction.
  #[serde(skip)]
  pub last_active: tokio::time::Instant,
}

impl GameSession {
  pub fn touch(&mut self) {
    self.last_active = tokio::time::Instant::now();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn level_parses_only_supported_numbers() {
    assert_eq!(Level::try_from(2), Ok(Level::Two));
    assert!(Level::try_from(0).is_err());
    assert!(Level::try_from(4).is_err());
    let parsed: Result<Level, _> = serde_json::from_str("7");
    assert!(parsed.is_err());
  }

  #[test]
  fn level_progression_ends_after_three() {
    assert_eq!(Level::One.next(), Some(Level::Two));
    assert_eq!(Level::Two.next(), Some(Level::Three));
    assert_eq!(Level::Three.next(), None);
  }

  #[test]
  fn challenge_serializes_camel_case() {
    let c = Challenge {
      level: Level::One,
      text: "t".into(),
      correct_text: "c".into(),
      errors: vec![],
      options: vec!["c".into()],
      source: ChallengeSource::Fallback,
    };
    let v = serde_json::to_value(&c).unwrap();
    assert_eq!(v["correctText"], "c");
    assert_eq!(v["level"], 1);
    assert_eq!(v["source"], "fallback");
  }
}

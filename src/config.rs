//! Loading agent configuration (prompts, generation parameters, retry policy,
//! fallback overrides) from TOML.
//!
//! Every section is optional; missing keys fall back to the built-in defaults.
//!
//! ```toml
//! [prompts]
//! system = "You are an English grammar tutor. ..."
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 1000
//!
//! [sessions]
//! max_sessions = 10000
//! idle_ttl_secs = 3600
//!
//! [[fallback]]
//! level = 1
//! text = "..."
//! correct_text = "..."
//! errors = ["..."]
//! options = ["...", "...", "...", "..."]
//! ```

use serde::Deserialize;
use tracing::{error, info};

use crate::domain::Level;
use crate::util::fill_template;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AgentConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub generation: GenerationCfg,
  #[serde(default)]
  pub retry: RetryCfg,
  #[serde(default)]
  pub sessions: SessionCfg,
  #[serde(default)]
  pub fallback: Vec<ChallengeCfg>,
}

/// Fallback bank entry accepted in TOML configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct ChallengeCfg {
  pub level: u8,
  pub text: String,
  #[serde(alias = "correctText")]
  pub correct_text: String,
  #[serde(default)]
  pub errors: Vec<String>,
  pub options: Vec<String>,
}

const JSON_FORMAT: &str = r#"{
  "text": "paragraph with errors",
  "correctText": "corrected paragraph",
  "errors": ["error1", "error2"],
  "options": [
    "corrected paragraph",
    "incorrect option 1",
    "incorrect option 2",
    "incorrect option 3"
  ]
}"#;

/// Prompts sent to the chat-completion API.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub system: String,
  /// Placeholders: `{level}`, `{focus}`, `{format}`.
  pub challenge_user_template: String,
  pub focus_level_1: String,
  pub focus_level_2: String,
  pub focus_level_3: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      system: "You are an English grammar tutor. Respond ONLY with valid JSON matching the requested format.".into(),
      challenge_user_template: "Generate a paragraph with {focus}. Also generate 3 incorrect options that are common mistakes. Format response as strict JSON:\n{format}".into(),
      focus_level_1: "3-4 tense errors mixing present and past tenses".into(),
      focus_level_2: "mixed tense errors (present/past/future)".into(),
      focus_level_3: "complex tense errors (present perfect, future perfect, past perfect)".into(),
    }
  }
}

impl Prompts {
  pub fn focus(&self, level: Level) -> &str {
    match level {
      Level::One => &self.focus_level_1,
      Level::Two => &self.focus_level_2,
      Level::Three => &self.focus_level_3,
    }
  }

  /// The user message for one generation request at `level`.
  pub fn user_prompt(&self, level: Level) -> String {
    let n = level.to_string();
    fill_template(
      &self.challenge_user_template,
      &[("level", &n), ("focus", self.focus(level)), ("format", JSON_FORMAT)],
    )
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GenerationCfg {
  pub temperature: f32,
  pub max_tokens: u32,
}

impl Default for GenerationCfg {
  fn default() -> Self {
    Self { temperature: 0.3, max_tokens: 1000 }
  }
}

/// Retry policy knobs, in milliseconds.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryCfg {
  pub max_attempts: u32,
  pub base_delay_ms: u64,
  pub timeout_ms: u64,
  pub recovery_delay_ms: u64,
}

impl Default for RetryCfg {
  fn default() -> Self {
    Self { max_attempts: 3, base_delay_ms: 1000, timeout_ms: 10_000, recovery_delay_ms: 30_000 }
  }
}

/// Bounds on the in-memory session store.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionCfg {
  pub max_sessions: usize,
  pub idle_ttl_secs: u64,
}

impl Default for SessionCfg {
  fn default() -> Self {
    Self { max_sessions: 10_000, idle_ttl_secs: 3600 }
  }
}

/// Attempt to load `AgentConfig` from AGENT_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_agent_config_from_env() -> Option<AgentConfig> {
  let path = std::env::var("AGENT_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_agent_config(&s) {
      Ok(cfg) => {
        info!(target: "tense_master", %path, fallback_overrides = cfg.fallback.len(), "Loaded agent config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "tense_master", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "tense_master", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

pub fn parse_agent_config(s: &str) -> Result<AgentConfig, toml::de::Error> {
  toml::from_str::<AgentConfig>(s)
}

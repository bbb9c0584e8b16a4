//! Application state: the acquisition controller and the in-memory session store.
//!
//! This module owns:
//!   - the challenge acquirer (chat client, prompts, retry policy, fallback bank)
//!   - game sessions by id, bounded by an idle TTL and a size cap
//!
//! Configuration comes from environment variables plus the optional TOML file
//! named by AGENT_CONFIG_PATH.

use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::acquire::{Acquirer, RetryPolicy};
use crate::config::{load_agent_config_from_env, AgentConfig, SessionCfg};
use crate::domain::{Challenge, GamePhase, GameSession};
use crate::openai::OpenAI;
use crate::seeds::FallbackBank;

pub struct AppState {
    pub acquirer: Acquirer<OpenAI>,
    pub sessions: Arc<RwLock<HashMap<String, GameSession>>>,
    session_limits: SessionCfg,
}

impl AppState {
    /// Build state from env: load config, fallback bank, chat client.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Result<Self, reqwest::Error> {
        let cfg = load_agent_config_from_env().unwrap_or_default();
        let openai = OpenAI::from_env()?;
        if openai.api_key.is_some() {
            info!(target: "tense_master", base_url = %openai.base_url, model = %openai.model, "Challenge generation enabled.");
        } else {
            warn!(target: "tense_master", "GROQ_API_KEY not set; every challenge will come from the fallback bank.");
        }
        Ok(Self::from_parts(openai, cfg))
    }

    pub fn from_parts(openai: OpenAI, cfg: AgentConfig) -> Self {
        let mut bank = FallbackBank::builtin();
        let applied = bank.merge_overrides(&cfg.fallback);
        let policy = RetryPolicy::from(&cfg.retry);
        info!(
            target: "challenge",
            fallback_overrides = applied,
            max_attempts = policy.max_attempts,
            base_delay = ?policy.base_delay,
            timeout = ?policy.timeout,
            "Acquisition policy ready"
        );

        Self {
            acquirer: Acquirer::new(openai, cfg.prompts, cfg.generation, policy, bank),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            session_limits: cfg.sessions,
        }
    }

    /// Insert a fresh level-1 session around an already acquired challenge.
    /// Idle sessions are swept first; a full store then drops completed
    /// sessions before the least recently active ones.
    #[instrument(level = "debug", skip(self, challenge))]
    pub async fn create_session(&self, challenge: Challenge) -> GameSession {
        let session = GameSession {
            id: Uuid::new_v4().to_string(),
            level: challenge.level,
            score: 0,
            phase: GamePhase::Playing,
            challenge,
            feedback: None,
            last_active: Instant::now(),
        };
        let mut sessions = self.sessions.write().await;
        let evicted = evict(&mut sessions, &self.session_limits, session.last_active);
        if evicted > 0 {
            debug!(target: "tense_master", evicted, remaining = sessions.len(), "Evicted game sessions");
        }
        sessions.insert(session.id.clone(), session.clone());
        session
    }

    /// Read-only access to a session by id.
    #[instrument(level = "debug", skip(self), fields(%id))]
    pub async fn get_session(&self, id: &str) -> Option<GameSession> {
        self.sessions.read().await.get(id).cloned()
    }

    /// State with no API key: every acquisition exhausts its retries and falls back.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self::for_tests_with(AgentConfig::default())
    }

    #[cfg(test)]
    pub fn for_tests_with(cfg: AgentConfig) -> Self {
        let openai = OpenAI {
            client: reqwest::Client::new(),
            api_key: None,
            base_url: "http://127.0.0.1:9".into(),
            model: "test-model".into(),
        };
        Self::from_parts(openai, cfg)
    }
}

/// Make room for one insert. Returns how many sessions were removed.
fn evict(sessions: &mut HashMap<String, GameSession>, limits: &SessionCfg, now: Instant) -> usize {
    let before = sessions.len();
    let ttl = Duration::from_secs(limits.idle_ttl_secs);
    sessions.retain(|_, s| now.saturating_duration_since(s.last_active) < ttl);

    let cap = limits.max_sessions.max(1);
    while sessions.len() >= cap {
        let oldest = sessions
            .values()
            .min_by_key(|s| (s.phase != GamePhase::Complete, s.last_active))
            .map(|s| s.id.clone());
        match oldest {
            Some(id) => sessions.remove(&id),
            None => break,
        };
    }
    before - sessions.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Level;

    fn challenge() -> Challenge {
        FallbackBank::builtin().get(Level::One).clone()
    }

    fn limited(max_sessions: usize, idle_ttl_secs: u64) -> AppState {
        AppState::for_tests_with(AgentConfig {
            sessions: SessionCfg { max_sessions, idle_ttl_secs },
            ..AgentConfig::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_expire_on_next_insert() {
        let state = limited(100, 60);
        let old = state.create_session(challenge()).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        let recent = state.create_session(challenge()).await;

        tokio::time::sleep(Duration::from_secs(31)).await;
        let fresh = state.create_session(challenge()).await;

        assert!(state.get_session(&old.id).await.is_none());
        assert!(state.get_session(&recent.id).await.is_some());
        assert!(state.get_session(&fresh.id).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn full_store_drops_completed_then_least_recent() {
        let state = limited(3, 3600);
        let a = state.create_session(challenge()).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        let b = state.create_session(challenge()).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        let c = state.create_session(challenge()).await;
        state.sessions.write().await.get_mut(&c.id).unwrap().phase = GamePhase::Complete;

        let d = state.create_session(challenge()).await;
        assert!(state.get_session(&c.id).await.is_none(), "completed session goes first");
        assert!(state.get_session(&a.id).await.is_some());

        let e = state.create_session(challenge()).await;
        assert!(state.get_session(&a.id).await.is_none(), "then the least recently active");
        for id in [&b.id, &d.id, &e.id] {
            assert!(state.get_session(id).await.is_some());
        }
        assert_eq!(state.sessions.read().await.len(), 3);
    }
}

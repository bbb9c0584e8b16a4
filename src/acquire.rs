//! Challenge acquisition: bounded generation attempts with exponential backoff,
//! a per-attempt timeout, payload validation and fallback to the static bank.
//!
//! The controller owns `ServiceHealth`. Readers either poll `health()` or hold a
//! `watch::Receiver` from `subscribe()`. Exhausting the retry budget marks the
//! service unavailable and arms a one-shot recovery task that fires 30 s after
//! that failure, even if further failures follow. A later success aborts every
//! pending recovery task so a stale notice never lands.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::config::{GenerationCfg, Prompts, RetryCfg};
use crate::domain::{Challenge, ChallengeSource, Level, ServiceHealth};
use crate::error::AcquireError;
use crate::openai::{ChatPrompt, ChatTransport};
use crate::seeds::FallbackBank;
use crate::util::{extract_json_object, trunc_for_log};

pub const RECOVERED_MESSAGE: &str = "Connection restored. Next challenge will use AI generation.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub base_delay: Duration,
  pub timeout: Duration,
  pub recovery_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self { Self::from(&RetryCfg::default()) }
}

impl From<&RetryCfg> for RetryPolicy {
  fn from(cfg: &RetryCfg) -> Self {
    Self {
      max_attempts: cfg.max_attempts.max(1),
      base_delay: Duration::from_millis(cfg.base_delay_ms),
      timeout: Duration::from_millis(cfg.timeout_ms),
      recovery_delay: Duration::from_millis(cfg.recovery_delay_ms),
    }
  }
}

/// Wait before the attempt following failed attempt `attempt` (1-based):
/// `base * 2^(attempt-1)`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
  let exp = attempt.saturating_sub(1).min(31);
  base.saturating_mul(1u32 << exp)
}

/// One failed generation attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcquisitionAttempt {
  pub index: u32,
  pub timed_out: bool,
  pub error: AcquireError,
}

/// The acquired challenge plus the failed attempts that preceded it.
#[derive(Clone, Debug)]
pub struct Acquisition {
  pub challenge: Challenge,
  pub attempts: Vec<AcquisitionAttempt>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedPayload {
  #[serde(default)] text: Option<String>,
  #[serde(default)] correct_text: Option<String>,
  #[serde(default)] errors: Option<Vec<String>>,
  #[serde(default)] options: Option<Vec<String>>,
}

/// Parse model output into an unshuffled generated challenge.
pub fn parse_generated(raw: &str, level: Level) -> Result<Challenge, AcquireError> {
  let json = extract_json_object(raw)
    .ok_or_else(|| AcquireError::MalformedResponse("no JSON object in model output".into()))?;
  let payload: GeneratedPayload =
    serde_json::from_str(json).map_err(|e| AcquireError::MalformedResponse(e.to_string()))?;

  let non_empty = |s: Option<String>| s.filter(|s| !s.trim().is_empty());
  let (Some(text), Some(correct_text), Some(errors), Some(options)) = (
    non_empty(payload.text),
    non_empty(payload.correct_text),
    payload.errors,
    payload.options,
  ) else {
    return Err(AcquireError::MalformedResponse("Incomplete response from API".into()));
  };

  if options.len() != 4 {
    return Err(AcquireError::MalformedResponse(format!("expected 4 options, got {}", options.len())));
  }
  let hits = options.iter().filter(|o| **o == correct_text).count();
  if hits != 1 {
    return Err(AcquireError::MalformedResponse(format!(
      "corrected text must appear exactly once among options, found {hits}"
    )));
  }

  Ok(Challenge { level, text, correct_text, errors, options, source: ChallengeSource::Generated })
}

/// Uniform in-place permutation (Fisher–Yates).
pub fn shuffle_options<R: Rng + ?Sized>(options: &mut [String], rng: &mut R) {
  options.shuffle(rng);
}

fn shuffled(mut options: Vec<String>) -> Vec<String> {
  shuffle_options(&mut options, &mut rand::thread_rng());
  options
}

pub struct Acquirer<T> {
  transport: T,
  prompts: Prompts,
  generation: GenerationCfg,
  policy: RetryPolicy,
  fallback: FallbackBank,
  health: Arc<watch::Sender<ServiceHealth>>,
  recovery: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: ChatTransport> Acquirer<T> {
  pub fn new(
    transport: T,
    prompts: Prompts,
    generation: GenerationCfg,
    policy: RetryPolicy,
    fallback: FallbackBank,
  ) -> Self {
    let (tx, _rx) = watch::channel(ServiceHealth::default());
    Self {
      transport,
      prompts,
      generation,
      policy,
      fallback,
      health: Arc::new(tx),
      recovery: Mutex::new(Vec::new()),
    }
  }

  /// Current service health snapshot.
  pub fn health(&self) -> ServiceHealth {
    self.health.borrow().clone()
  }

  /// Change notifications for service health.
  pub fn subscribe(&self) -> watch::Receiver<ServiceHealth> {
    self.health.subscribe()
  }

  fn prompt_for(&self, level: Level) -> ChatPrompt {
    ChatPrompt {
      system: self.prompts.system.clone(),
      user: self.prompts.user_prompt(level),
      temperature: self.generation.temperature,
      max_tokens: self.generation.max_tokens,
    }
  }

  /// Produce one validated challenge for `level`. Never fails: exhausted
  /// retries resolve to the static fallback entry.
  pub async fn acquire_challenge(&self, level: Level) -> Challenge {
    self.acquire_detailed(level).await.challenge
  }

  #[instrument(level = "info", skip(self), fields(%level, max_attempts = self.policy.max_attempts))]
  pub async fn acquire_detailed(&self, level: Level) -> Acquisition {
    let prompt = self.prompt_for(level);
    let max = self.policy.max_attempts;
    let mut attempts = Vec::new();

    for index in 1..=max {
      match self.attempt(&prompt, level).await {
        Ok(challenge) => {
          self.mark_available().await;
          info!(target: "challenge", %level, attempt = index, preview = %trunc_for_log(&challenge.text, 40), "Generated challenge accepted");
          return Acquisition { challenge, attempts };
        }
        Err(error) => {
          warn!(target: "challenge", %level, attempt = index, kind = error.kind(), error = %error, "Generation attempt failed");
          attempts.push(AcquisitionAttempt { index, timed_out: error == AcquireError::Timeout, error });
          if index < max {
            let delay = backoff_delay(self.policy.base_delay, index);
            info!(target: "challenge", ?delay, attempt = index, max, "Retrying generation");
            tokio::time::sleep(delay).await;
          }
        }
      }
    }

    let detail = attempts
      .last()
      .map(|a| a.error.to_string())
      .unwrap_or_else(|| "no attempts made".into());
    self.mark_degraded(&detail).await;
    let timeouts = attempts.iter().filter(|a| a.timed_out).count();
    warn!(target: "challenge", %level, attempts = attempts.len(), timeouts, last_attempt = ?attempts.last().map(|a| a.index), "Generation exhausted; serving fallback challenge");
    Acquisition { challenge: self.fallback.get(level).clone(), attempts }
  }

  async fn attempt(&self, prompt: &ChatPrompt, level: Level) -> Result<Challenge, AcquireError> {
    let raw = tokio::time::timeout(self.policy.timeout, self.transport.complete(prompt))
      .await
      .map_err(|_| AcquireError::Timeout)??;
    let mut challenge = parse_generated(&raw, level)?;
    challenge.options = shuffled(challenge.options);
    Ok(challenge)
  }

  async fn mark_available(&self) {
    for stale in self.recovery.lock().await.drain(..) {
      stale.abort();
    }
    self.health.send_replace(ServiceHealth::available(""));
  }

  async fn mark_degraded(&self, detail: &str) {
    self.health.send_replace(ServiceHealth::unavailable(format!(
      "Connection issue: {detail}. Using practice questions. Retrying in background..."
    )));

    let health = self.health.clone();
    let delay = self.policy.recovery_delay;
    let task = tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      health.send_replace(ServiceHealth::available(RECOVERED_MESSAGE));
      info!(target: "challenge", "Service health reset after recovery delay");
    });
    let mut pending = self.recovery.lock().await;
    pending.retain(|t| !t.is_finished());
    pending.push(task);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::{HashMap, VecDeque};
  use std::future::Future;
  use std::sync::Mutex as StdMutex;

  use rand::rngs::StdRng;
  use rand::SeedableRng;
  use tokio::time::Instant;

  #[derive(Clone)]
  enum Step {
    Reply(String),
    Fail(AcquireError),
    Hang,
  }

  struct FakeTransport {
    steps: StdMutex<VecDeque<Step>>,
    otherwise: Step,
    calls: StdMutex<Vec<Instant>>,
  }

  impl FakeTransport {
    fn new(steps: Vec<Step>, otherwise: Step) -> Self {
      Self { steps: StdMutex::new(steps.into()), otherwise, calls: StdMutex::new(Vec::new()) }
    }

    fn calls(&self) -> Vec<Instant> {
      self.calls.lock().unwrap().clone()
    }
  }

  impl ChatTransport for FakeTransport {
    fn complete(&self, _prompt: &ChatPrompt) -> impl Future<Output = Result<String, AcquireError>> + Send {
      let step = self.steps.lock().unwrap().pop_front().unwrap_or_else(|| self.otherwise.clone());
      self.calls.lock().unwrap().push(Instant::now());
      async move {
        match step {
          Step::Reply(s) => Ok(s),
          Step::Fail(e) => Err(e),
          Step::Hang => std::future::pending().await,
        }
      }
    }
  }

  fn good_payload(tag: &str) -> String {
    format!(
      r#"Here you go: {{"text":"I go {tag}.","correctText":"I went {tag}.","errors":["'go' should be 'went'"],"options":["I went {tag}.","I go {tag}.","I goes {tag}.","I gone {tag}."]}} Hope it helps!"#
    )
  }

  fn assert_gap(actual: Duration, expected_ms: u64) {
    let expected = Duration::from_millis(expected_ms);
    assert!(
      actual >= expected && actual <= expected + Duration::from_millis(5),
      "gap {actual:?}, expected {expected:?}"
    );
  }

  fn http_503() -> Step {
    Step::Fail(AcquireError::TransportFailure("HTTP 503: overloaded".into()))
  }

  fn acquirer(transport: FakeTransport) -> Acquirer<FakeTransport> {
    Acquirer::new(
      transport,
      Prompts::default(),
      GenerationCfg::default(),
      RetryPolicy::default(),
      FallbackBank::builtin(),
    )
  }

  #[test]
  fn backoff_doubles_from_base() {
    let base = Duration::from_millis(1000);
    assert_eq!(backoff_delay(base, 1), Duration::from_millis(1000));
    assert_eq!(backoff_delay(base, 2), Duration::from_millis(2000));
    assert_eq!(backoff_delay(base, 3), Duration::from_millis(4000));
  }

  #[test]
  fn policy_defaults_and_floor() {
    let p = RetryPolicy::default();
    assert_eq!(p.max_attempts, 3);
    assert_eq!(p.timeout, Duration::from_secs(10));
    assert_eq!(p.recovery_delay, Duration::from_secs(30));
    let zero = RetryPolicy::from(&RetryCfg { max_attempts: 0, ..RetryCfg::default() });
    assert_eq!(zero.max_attempts, 1);
  }

  #[test]
  fn parse_accepts_wrapped_payload() {
    let c = parse_generated(&good_payload("home"), Level::Two).unwrap();
    assert_eq!(c.correct_text, "I went home.");
    assert_eq!(c.level, Level::Two);
    assert_eq!(c.source, ChallengeSource::Generated);
    assert_eq!(c.options[0], "I went home.");
  }

  #[test]
  fn parse_rejects_missing_fields() {
    let raw = r#"{"text":"I go.","errors":[],"options":["a","b","c","d"]}"#;
    assert_eq!(
      parse_generated(raw, Level::One),
      Err(AcquireError::MalformedResponse("Incomplete response from API".into()))
    );
    let empty = r#"{"text":"","correctText":"a","errors":[],"options":["a","b","c","d"]}"#;
    assert!(matches!(parse_generated(empty, Level::One), Err(AcquireError::MalformedResponse(_))));
  }

  #[test]
  fn parse_rejects_options_without_correct_text() {
    let raw = r#"{"text":"I go.","correctText":"I went.","errors":[],"options":["a","b","c","d"]}"#;
    assert!(matches!(parse_generated(raw, Level::One), Err(AcquireError::MalformedResponse(_))));
    let dup = r#"{"text":"I go.","correctText":"a","errors":[],"options":["a","a","c","d"]}"#;
    assert!(matches!(parse_generated(dup, Level::One), Err(AcquireError::MalformedResponse(_))));
    let three = r#"{"text":"I go.","correctText":"a","errors":[],"options":["a","b","c"]}"#;
    assert!(matches!(parse_generated(three, Level::One), Err(AcquireError::MalformedResponse(_))));
  }

  #[test]
  fn parse_rejects_non_json() {
    assert!(matches!(parse_generated("sorry, I cannot", Level::One), Err(AcquireError::MalformedResponse(_))));
    assert!(matches!(parse_generated("{not: json}", Level::One), Err(AcquireError::MalformedResponse(_))));
  }

  #[test]
  fn shuffle_is_a_uniform_permutation() {
    let base: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
    let mut rng = StdRng::seed_from_u64(7);
    let mut counts: HashMap<Vec<String>, usize> = HashMap::new();
    let trials = 24_000;
    for _ in 0..trials {
      let mut opts = base.clone();
      shuffle_options(&mut opts, &mut rng);
      let mut sorted = opts.clone();
      sorted.sort();
      assert_eq!(sorted, base);
      *counts.entry(opts).or_default() += 1;
    }
    assert_eq!(counts.len(), 24);
    for (order, n) in counts {
      assert!((700..=1300).contains(&n), "ordering {order:?} seen {n} times");
    }
  }

  #[tokio::test(start_paused = true)]
  async fn success_returns_generated_challenge_for_every_level() {
    let acq = acquirer(FakeTransport::new(vec![], Step::Reply(good_payload("out"))));
    for level in Level::ALL {
      let c = acq.acquire_challenge(level).await;
      assert_eq!(c.source, ChallengeSource::Generated);
      assert_eq!(c.level, level);
      assert_eq!(c.options.len(), 4);
      assert_eq!(c.options.iter().filter(|o| **o == c.correct_text).count(), 1);
    }
    assert_eq!(acq.transport.calls().len(), 3);
    assert_eq!(acq.health(), ServiceHealth::available(""));
  }

  #[tokio::test(start_paused = true)]
  async fn always_failing_transport_makes_three_spaced_attempts() {
    let acq = acquirer(FakeTransport::new(vec![], http_503()));
    let outcome = acq.acquire_detailed(Level::One).await;

    let calls = acq.transport.calls();
    assert_eq!(calls.len(), 3);
    assert_gap(calls[1] - calls[0], 1000);
    assert_gap(calls[2] - calls[1], 2000);
    assert_eq!(outcome.attempts.len(), 3);
    assert_eq!(outcome.attempts[2].index, 3);
  }

  #[tokio::test(start_paused = true)]
  async fn no_delay_after_final_attempt() {
    let acq = acquirer(FakeTransport::new(vec![], http_503()));
    let start = Instant::now();
    acq.acquire_challenge(Level::One).await;
    assert_gap(start.elapsed(), 3000);
  }

  #[tokio::test(start_paused = true)]
  async fn exhausted_level_two_serves_its_fallback() {
    let acq = acquirer(FakeTransport::new(vec![], Step::Fail(AcquireError::ConfigurationMissing)));
    let c = acq.acquire_challenge(Level::Two).await;
    assert_eq!(&c, FallbackBank::builtin().get(Level::Two));
    assert_eq!(c.source, ChallengeSource::Fallback);
  }

  #[tokio::test(start_paused = true)]
  async fn retry_recovers_after_malformed_reply() {
    let acq = acquirer(FakeTransport::new(
      vec![Step::Reply("not json at all".into()), http_503()],
      Step::Reply(good_payload("late")),
    ));
    let outcome = acq.acquire_detailed(Level::Three).await;
    assert_eq!(outcome.challenge.source, ChallengeSource::Generated);
    assert_eq!(outcome.challenge.correct_text, "I went late.");
    assert_eq!(outcome.attempts.len(), 2);
    assert!(matches!(outcome.attempts[0].error, AcquireError::MalformedResponse(_)));
  }

  #[tokio::test(start_paused = true)]
  async fn hanging_transport_times_out_and_consumes_one_attempt() {
    let acq = acquirer(FakeTransport::new(vec![Step::Hang], Step::Reply(good_payload("x"))));
    let outcome = acq.acquire_detailed(Level::One).await;

    assert_eq!(outcome.challenge.source, ChallengeSource::Generated);
    assert_eq!(outcome.attempts.len(), 1);
    assert!(outcome.attempts[0].timed_out);
    assert_eq!(outcome.attempts[0].error.to_string(), "Request timed out");

    let calls = acq.transport.calls();
    assert_gap(calls[1] - calls[0], 10_000 + 1000);
  }

  #[tokio::test(start_paused = true)]
  async fn timeout_detail_reaches_health_message() {
    let acq = acquirer(FakeTransport::new(vec![], Step::Hang));
    let c = acq.acquire_challenge(Level::One).await;
    assert_eq!(c.source, ChallengeSource::Fallback);
    let h = acq.health();
    assert!(!h.available);
    assert_eq!(
      h.message,
      "Connection issue: Request timed out. Using practice questions. Retrying in background..."
    );
  }

  #[tokio::test(start_paused = true)]
  async fn health_recovers_after_delay() {
    let acq = acquirer(FakeTransport::new(vec![], http_503()));
    let mut rx = acq.subscribe();
    acq.acquire_challenge(Level::One).await;

    assert!(rx.has_changed().unwrap());
    assert!(!rx.borrow_and_update().available);
    assert!(acq.health().message.contains("HTTP 503"));

    tokio::time::sleep(Duration::from_millis(29_999)).await;
    assert!(!acq.health().available);

    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow(), ServiceHealth::available(RECOVERED_MESSAGE));
  }

  #[tokio::test(start_paused = true)]
  async fn each_failure_keeps_its_own_recovery_deadline() {
    let acq = acquirer(FakeTransport::new(vec![], http_503()));
    let mut rx = acq.subscribe();

    acq.acquire_challenge(Level::One).await;
    let first_failed = Instant::now();
    tokio::time::sleep(Duration::from_secs(10)).await;
    acq.acquire_challenge(Level::One).await;
    let second_failed = Instant::now();
    assert!(!rx.borrow_and_update().available);

    rx.changed().await.unwrap();
    assert_gap(first_failed.elapsed(), 30_000);
    assert_eq!(*rx.borrow_and_update(), ServiceHealth::available(RECOVERED_MESSAGE));

    rx.changed().await.unwrap();
    assert_gap(second_failed.elapsed(), 30_000);
    assert_eq!(*rx.borrow(), ServiceHealth::available(RECOVERED_MESSAGE));
  }

  #[tokio::test(start_paused = true)]
  async fn success_cancels_pending_recovery_notice() {
    let mut steps = vec![http_503(); 6];
    steps.push(Step::Reply(good_payload("ok")));
    let acq = acquirer(FakeTransport::new(steps, http_503()));

    acq.acquire_challenge(Level::One).await;
    acq.acquire_challenge(Level::Two).await;
    assert!(!acq.health().available);
    assert_eq!(acq.recovery.lock().await.len(), 2);

    tokio::time::sleep(Duration::from_secs(5)).await;
    let c = acq.acquire_challenge(Level::One).await;
    assert_eq!(c.source, ChallengeSource::Generated);
    assert_eq!(acq.health(), ServiceHealth::available(""));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(acq.health(), ServiceHealth::available(""));
  }
}

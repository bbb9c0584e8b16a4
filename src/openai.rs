//! Minimal OpenAI-compatible chat client (Groq by default).
//!
//! We only call chat.completions with a strict JSON-object response format.
//! Calls are instrumented and log model names, latencies, and response sizes (not contents).
//!
//! NOTE: We never log the API key.

use std::future::Future;
use std::time::Instant;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::AcquireError;

/// One generation request as the acquisition controller sees it.
#[derive(Clone, Debug)]
pub struct ChatPrompt {
  pub system: String,
  pub user: String,
  pub temperature: f32,
  pub max_tokens: u32,
}

/// Seam between the acquisition controller and the network.
/// Resolves to the raw `choices[0].message.content` text.
pub trait ChatTransport: Send + Sync + 'static {
  fn complete(&self, prompt: &ChatPrompt) -> impl Future<Output = Result<String, AcquireError>> + Send;
}

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: Option<String>,
  pub base_url: String,
  pub model: String,
}

impl OpenAI {
  /// Build the client from GROQ_API_KEY / GROQ_BASE_URL / GROQ_MODEL.
  /// A missing key is not an error here: each attempt reports it instead.
  pub fn from_env() -> Result<Self, reqwest::Error> {
    let api_key = std::env::var("GROQ_API_KEY").ok().filter(|k| !k.trim().is_empty());
    let base_url =
      std::env::var("GROQ_BASE_URL").unwrap_or_else(|_| "https://api.groq.com/openai/v1".into());
    let model = std::env::var("GROQ_MODEL").unwrap_or_else(|_| "llama3-70b-8192".into());

    // Per-attempt timeouts are enforced by the caller.
    let client = reqwest::Client::builder().build()?;

    Ok(Self { client, api_key, base_url, model })
  }

  fn build_request(&self, prompt: &ChatPrompt) -> ChatCompletionRequest {
    ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: prompt.system.clone() },
        ChatMessageReq { role: "user".into(), content: prompt.user.clone() },
      ],
      temperature: prompt.temperature,
      response_format: Some(ResponseFormat { r#type: "json_object".into() }),
      max_tokens: Some(prompt.max_tokens),
    }
  }

  /// JSON-object chat completion returning the message content untouched.
  #[instrument(level = "info", skip(self, prompt), fields(model = %self.model, user_len = prompt.user.len()))]
  async fn chat_json_raw(&self, prompt: &ChatPrompt) -> Result<String, AcquireError> {
    let api_key = self.api_key.as_deref().ok_or(AcquireError::ConfigurationMissing)?;
    let url = format!("{}/chat/completions", self.base_url);
    let req = self.build_request(prompt);
    let start = Instant::now();

    let res = self.client.post(&url)
      .header(USER_AGENT, "tense-master-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", api_key))
      .json(&req).send().await
      .map_err(|e| AcquireError::TransportFailure(e.to_string()))?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_openai_error(&body).unwrap_or_else(|| crate::util::trunc_for_log(&body, 200));
      return Err(AcquireError::TransportFailure(format!("HTTP {}: {}", status.as_u16(), msg)));
    }

    let body: ChatCompletionResponse = res
      .json()
      .await
      .map_err(|e| AcquireError::MalformedResponse(e.to_string()))?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "Chat usage");
    }
    let text = body.choices.into_iter().next()
      .and_then(|c| c.message.content)
      .ok_or_else(|| AcquireError::MalformedResponse("response has no message content".into()))?;

    info!(elapsed = ?start.elapsed(), content_len = text.len(), "Model response received");
    Ok(text)
  }
}

impl ChatTransport for OpenAI {
  fn complete(&self, prompt: &ChatPrompt) -> impl Future<Output = Result<String, AcquireError>> + Send {
    self.chat_json_raw(prompt)
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from an OpenAI-style error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  match serde_json::from_str::<EWrap>(body) {
    Ok(w) => Some(w.error.message),
    Err(_) => None,
  }
}

// gemflows — HTTP-based generation provider (OpenAI-compatible)

use super::*;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

pub const GEMINI_OPENAI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// HttpProvider speaks the OpenAI-compatible chat completions API.
/// Works with Gemini's OpenAI endpoint, OpenAI, OpenRouter, Groq, vLLM, etc.
pub struct HttpProvider {
    api_key: String,
    api_base: String,
    client: Client,
    model: String,
    max_retries: usize,
    retry_delay: Duration,
}

impl HttpProvider {
    pub fn new(
        api_key: String,
        api_base: String,
        model: String,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        let base = if api_base.is_empty() {
            default_api_base(&api_key).to_string()
        } else {
            api_base
        };

        Ok(Self {
            api_key,
            api_base: base,
            client,
            model,
            max_retries: 2,
            retry_delay: Duration::from_millis(1000),
        })
    }

    /// Transport-level retries for 429/5xx responses and network errors.
    pub fn with_retries(mut self, max_retries: usize, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Model used when a request names none.
    pub fn default_model(&self) -> &str {
        &self.model
    }

    /// Send one chat completion request.
    pub async fn chat(&self, messages: &[Message], model: &str) -> anyhow::Result<ChatResponse> {
        let use_model = if model.is_empty() { &self.model } else { model };
        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));

        let body = json!({
            "model": use_model,
            "messages": messages,
        });

        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tracing::info!(
                    attempt = attempt,
                    "Retrying generation request after {}ms delay",
                    self.retry_delay.as_millis()
                );
                tokio::time::sleep(self.retry_delay).await;
            }

            tracing::debug!(
                url = %url,
                model = %use_model,
                attempt = attempt,
                "Sending generation request"
            );

            let res = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match res {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let response_body = response.text().await?;
                        tracing::debug!(status = %status, body_len = response_body.len(), "Generation response received");
                        return parse_response(&response_body);
                    }

                    let is_transient = status.is_server_error() || status.as_u16() == 429;
                    let response_body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "could not read body".to_string());

                    if is_transient && attempt < self.max_retries {
                        tracing::warn!(status = %status, attempt = attempt, "Transient provider error: {}", response_body);
                        last_error = Some(anyhow::anyhow!(
                            "provider error ({}): {}",
                            status,
                            response_body
                        ));
                        continue;
                    }
                    anyhow::bail!("provider error ({}): {}", status, response_body);
                }
                Err(e) if attempt < self.max_retries => {
                    tracing::warn!(error = %e, attempt = attempt, "Network error during generation request");
                    last_error = Some(anyhow::Error::from(e));
                    continue;
                }
                Err(e) => return Err(anyhow::Error::from(e)),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            anyhow::anyhow!(
                "generation request failed after {} attempts",
                self.max_retries + 1
            )
        }))
    }
}

#[async_trait]
impl GenerationProvider for HttpProvider {
    async fn generate(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> anyhow::Result<String> {
        let messages = build_messages(system_prompt, user_prompt);
        let response = self.chat(&messages, model).await?;

        if let Some(usage) = &response.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                finish_reason = %response.finish_reason,
                "Generation usage"
            );
        }
        if response.content.is_empty() {
            anyhow::bail!("no text in response");
        }
        Ok(response.content)
    }
}

/// Pick an API base from the shape of the key when none is configured.
fn default_api_base(api_key: &str) -> &'static str {
    if api_key.starts_with("sk-or-") {
        "https://openrouter.ai/api/v1"
    } else if api_key.starts_with("gsk_") {
        "https://api.groq.com/openai/v1"
    } else if api_key.starts_with("sk-") {
        "https://api.openai.com/v1"
    } else {
        GEMINI_OPENAI_BASE
    }
}

/// Parse an OpenAI-compatible chat completion response.
fn parse_response(body: &str) -> anyhow::Result<ChatResponse> {
    let v: serde_json::Value = serde_json::from_str(body)?;

    if let Some(err) = v.get("error") {
        let msg = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        anyhow::bail!("provider error: {}", msg);
    }

    let choice = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| anyhow::anyhow!("empty response"))?;

    let message = choice
        .get("message")
        .ok_or_else(|| anyhow::anyhow!("empty response"))?;

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string();

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|f| f.as_str())
        .unwrap_or("stop")
        .to_string();

    let usage = v.get("usage").map(|u| UsageInfo {
        prompt_tokens: u.get("prompt_tokens").and_then(|n| n.as_u64()).unwrap_or(0) as usize,
        completion_tokens: u
            .get("completion_tokens")
            .and_then(|n| n.as_u64())
            .unwrap_or(0) as usize,
        total_tokens: u.get("total_tokens").and_then(|n| n.as_u64()).unwrap_or(0) as usize,
    });

    Ok(ChatResponse {
        content,
        finish_reason,
        usage,
    })
}

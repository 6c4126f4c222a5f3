//! Generation backends. Each one only ever sees a prompt built from
//! guard-approved evidence.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use manualqa_core::error::{Error, Result};
use manualqa_core::guard::REFUSAL_TEXT;
use manualqa_core::retry::{with_backoff, RetryPolicy};
use manualqa_core::settings::Settings;
use manualqa_core::traits::{Generator, Prompt};
use manualqa_embed::{use_fake_embeddings, ServiceClient};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize)]
struct ChatContent {
    #[serde(default)]
    content: Option<String>,
}

/// `/chat/completions` on an OpenAI-compatible service.
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    client: ServiceClient,
    model: String,
    temperature: f32,
}

impl HttpGenerator {
    pub fn new(client: ServiceClient, model: impl Into<String>, temperature: f32) -> Self {
        Self { client, model: model.into(), temperature }
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: [
                ChatMessage { role: "system", content: &prompt.system },
                ChatMessage { role: "user", content: &prompt.user },
            ],
        };
        let response: ChatResponse = self.client.post_json("chat/completions", &request).await?;
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::Service("generation service returned no content".into()))?;
        debug!(model = %self.model, chars = text.len(), "generated answer");
        Ok(text)
    }
}

/// Offline answers: quotes the best evidence passage verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractiveGenerator {
    max_chars: Option<usize>,
}

impl ExtractiveGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_chars(max_chars: usize) -> Self {
        Self { max_chars: Some(max_chars) }
    }
}

#[async_trait]
impl Generator for ExtractiveGenerator {
    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        let Some(best) = prompt.passages.first() else {
            return Ok(REFUSAL_TEXT.to_string());
        };
        let text = match self.max_chars {
            Some(max) if best.chars().count() > max => {
                let cut: String = best.chars().take(max).collect();
                format!("{}...", cut.trim_end())
            }
            _ => best.clone(),
        };
        Ok(format!("From the manual:\n{text}"))
    }
}

/// Retries rate-limited generation with bounded backoff.
#[derive(Clone)]
pub struct RetryingGenerator {
    inner: Arc<dyn Generator>,
    retry: RetryPolicy,
}

impl RetryingGenerator {
    pub fn new(inner: Arc<dyn Generator>, retry: RetryPolicy) -> Self {
        Self { inner, retry }
    }
}

#[async_trait]
impl Generator for RetryingGenerator {
    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        with_backoff(&self.retry, "generate", || self.inner.generate(prompt)).await
    }
}

/// The HTTP generator when an API key is configured, otherwise the
/// extractive one. `APP_USE_FAKE_EMBEDDINGS` also selects the offline path.
pub fn get_default_generator(settings: &Settings) -> Result<Arc<dyn Generator>> {
    let service = &settings.service;
    let has_key = std::env::var(&service.api_key_env).map(|k| !k.trim().is_empty()).unwrap_or(false);
    if use_fake_embeddings() || !has_key {
        info!("using extractive generator");
        return Ok(Arc::new(ExtractiveGenerator::with_max_chars(1_200)));
    }
    let client = ServiceClient::from_settings(service)?;
    info!(model = %service.chat_model, "using http generator");
    let http: Arc<dyn Generator> = Arc::new(HttpGenerator::new(client, &service.chat_model, service.temperature));
    Ok(Arc::new(RetryingGenerator::new(http, settings.embedding.retry_policy())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(passages: &[&str]) -> Prompt {
        Prompt {
            system: String::new(),
            user: String::new(),
            passages: passages.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn extractive_quotes_best_passage() {
        let out = ExtractiveGenerator::new().generate(&prompt(&["Check oil monthly.", "other"])).await.unwrap();
        assert_eq!(out, "From the manual:\nCheck oil monthly.");
    }

    #[tokio::test]
    async fn extractive_truncates_long_passages() {
        let out = ExtractiveGenerator::with_max_chars(5).generate(&prompt(&["abcdefghij"])).await.unwrap();
        assert_eq!(out, "From the manual:\nabcde...");
    }

    #[tokio::test]
    async fn extractive_without_passages_refuses() {
        let out = ExtractiveGenerator::new().generate(&prompt(&[])).await.unwrap();
        assert_eq!(out, REFUSAL_TEXT);
    }
}

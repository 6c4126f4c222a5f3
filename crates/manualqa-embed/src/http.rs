//! Client for an OpenAI-compatible HTTP service, and the embedder built on it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use manualqa_core::error::{Error, Result};
use manualqa_core::settings::ServiceSettings;
use manualqa_core::traits::Embedder;

/// Thin JSON-over-HTTP client. Status codes are mapped onto the error
/// contract: 429 is `RateLimited`, every other failure is `Service`.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ServiceClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Service(format!("http client: {e}")))?;
        Ok(Self::with_http(http, base_url, api_key))
    }

    pub fn with_http(http: reqwest::Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self { http, base_url: base_url.into().trim_end_matches('/').to_string(), api_key }
    }

    /// Build from settings, reading the API key from the configured env var.
    pub fn from_settings(settings: &ServiceSettings) -> Result<Self> {
        let api_key = std::env::var(&settings.api_key_env).ok().filter(|k| !k.trim().is_empty());
        Self::new(&settings.base_url, api_key, Duration::from_millis(settings.request_timeout_ms))
    }

    pub async fn post_json<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned + Send,
    {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut request = self.http.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|e| Error::Service(format!("POST {url}: {e}")))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::RateLimited(format!("POST {url}: {text}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Service(format!("POST {url} returned {status}: {text}")));
        }
        debug!(%url, %status, "service call ok");
        response
            .json::<Resp>()
            .await
            .map_err(|e| Error::Service(format!("POST {url}: invalid response body: {e}")))
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Embeddings from the `/embeddings` endpoint, resized to `dim` and
/// L2-normalized.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    client: ServiceClient,
    model: String,
    dim: usize,
    id: String,
}

impl HttpEmbedder {
    pub fn new(client: ServiceClient, model: impl Into<String>, dim: usize) -> Self {
        let model = model.into();
        let id = format!("http-{model}-{dim}");
        Self { client, model, dim, id }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn embedder_id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| Error::Service("embedding service returned no vectors".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = EmbedRequest { model: &self.model, input: texts, dimensions: self.dim };
        let mut response: EmbedResponse = self.client.post_json("embeddings", &request).await?;
        if response.data.len() != texts.len() {
            return Err(Error::Service(format!(
                "embedding service returned {} vectors for {} inputs",
                response.data.len(),
                texts.len()
            )));
        }
        response.data.sort_by_key(|d| d.index.unwrap_or(0));
        Ok(response.data.into_iter().map(|d| normalize(d.embedding, self.dim)).collect())
    }
}

fn normalize(mut v: Vec<f32>, dim: usize) -> Vec<f32> {
    v.resize(dim, 0.0);
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
    for x in &mut v {
        *x /= norm;
    }
    v
}

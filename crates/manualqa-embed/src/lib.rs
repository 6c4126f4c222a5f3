pub mod hash;
pub mod http;
pub mod pool;

use std::sync::Arc;

use tracing::info;

use manualqa_core::error::{Error, Result};
use manualqa_core::settings::{EmbeddingProvider, Settings};
use manualqa_core::traits::Embedder;

pub use hash::HashEmbedder;
pub use http::{HttpEmbedder, ServiceClient};
pub use pool::ThrottledEmbedder;

/// `APP_USE_FAKE_EMBEDDINGS=1` (or `true`) forces the hashing embedder.
pub fn use_fake_embeddings() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// The configured embedder behind the bounded worker pool.
pub fn get_default_embedder(settings: &Settings) -> Result<ThrottledEmbedder> {
    let embedding = &settings.embedding;
    let inner: Arc<dyn Embedder> = if use_fake_embeddings() || embedding.provider == EmbeddingProvider::Hash {
        info!(dim = embedding.dim, "using hashing embedder");
        Arc::new(HashEmbedder::new(embedding.dim))
    } else {
        let client = ServiceClient::from_settings(&settings.service)?;
        if std::env::var(&settings.service.api_key_env).is_err() {
            return Err(Error::InvalidConfig(format!(
                "embedding.provider = http needs an API key in ${}",
                settings.service.api_key_env
            )));
        }
        info!(model = %settings.service.embed_model, dim = embedding.dim, "using http embedder");
        Arc::new(HttpEmbedder::new(client, &settings.service.embed_model, embedding.dim))
    };
    Ok(ThrottledEmbedder::new(inner, embedding.concurrency, embedding.batch_size, embedding.retry_policy()))
}

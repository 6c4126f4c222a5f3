//! Typed settings tree. Every numeric weight and threshold used by the
//! chunker, retrieval engine and guard lives here so it can be tuned without
//! code changes.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app: AppSettings,
    pub data: DataSettings,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub guard: GuardPolicy,
    pub embedding: EmbeddingSettings,
    pub service: ServiceSettings,
    pub scope: ScopeSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        self.retrieval.validate()?;
        self.guard.validate()?;
        self.embedding.validate()?;
        self.scope.validate()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Raises log verbosity and echoes pipeline events; never changes answers.
    pub debug: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub manuals_dir: String,
    pub store_dir: String,
    pub table: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            manuals_dir: "./data/manuals".to_string(),
            store_dir: "./data/store".to_string(),
            table: "manual_chunks".to_string(),
        }
    }
}

/// Budgets are in approximate tokens (see `chunker::count_tokens`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub small_tokens: usize,
    pub small_overlap_tokens: usize,
    pub mid_tokens: usize,
    pub big_tokens: usize,
    pub detect_headings: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            small_tokens: 300,
            small_overlap_tokens: 50,
            mid_tokens: 800,
            big_tokens: 1500,
            detect_headings: true,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.small_tokens == 0 {
            return Err(Error::InvalidConfig("chunking.small_tokens must be > 0".into()));
        }
        if self.small_tokens > self.mid_tokens || self.mid_tokens > self.big_tokens {
            return Err(Error::InvalidConfig(format!(
                "chunking budgets must grow small <= mid <= big (got {} / {} / {})",
                self.small_tokens, self.mid_tokens, self.big_tokens
            )));
        }
        if self.small_overlap_tokens >= self.small_tokens {
            return Err(Error::InvalidConfig("chunking.small_overlap_tokens must be below small_tokens".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub per_level_k: usize,
    pub small_weight: f32,
    pub mid_weight: f32,
    pub big_weight: f32,
    /// Multiplier for ancestors that only entered through expansion.
    pub expansion_weight: f32,
    /// Added once per ancestor that was also retrieved on its own.
    pub cooccurrence_boost: f32,
    pub timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 8,
            per_level_k: 8,
            small_weight: 1.0,
            mid_weight: 0.9,
            big_weight: 0.8,
            expansion_weight: 0.85,
            cooccurrence_boost: 0.1,
            timeout_ms: 10_000,
        }
    }
}

impl RetrievalConfig {
    pub fn level_weight(&self, level: crate::types::ChunkLevel) -> f32 {
        match level {
            crate::types::ChunkLevel::Small => self.small_weight,
            crate::types::ChunkLevel::Mid => self.mid_weight,
            crate::types::ChunkLevel::Big => self.big_weight,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 || self.per_level_k == 0 {
            return Err(Error::InvalidConfig("retrieval.top_k and per_level_k must be > 0".into()));
        }
        let weights = [self.small_weight, self.mid_weight, self.big_weight, self.expansion_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || self.cooccurrence_boost < 0.0 {
            return Err(Error::InvalidConfig("retrieval weights must be finite and non-negative".into()));
        }
        if self.timeout_ms == 0 {
            return Err(Error::InvalidConfig("retrieval.timeout_ms must be > 0".into()));
        }
        Ok(())
    }
}

/// Evidence thresholds applied by the grounding guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardPolicy {
    pub min_confidence: f32,
    pub coverage_threshold: f32,
    pub min_coverage_hits: usize,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self { min_confidence: 0.35, coverage_threshold: 0.25, min_coverage_hits: 2 }
    }
}

impl GuardPolicy {
    pub fn validate(&self) -> Result<()> {
        for (name, v) in [("min_confidence", self.min_confidence), ("coverage_threshold", self.coverage_threshold)] {
            if !(0.0..=1.0).contains(&v) {
                return Err(Error::InvalidConfig(format!("guard.{name} must be within [0, 1], got {v}")));
            }
        }
        if self.min_coverage_hits == 0 {
            return Err(Error::InvalidConfig("guard.min_coverage_hits must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    Hash,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProvider,
    pub dim: usize,
    pub batch_size: usize,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hash,
            dim: 1024,
            batch_size: 16,
            concurrency: 4,
            max_attempts: 8,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
        }
    }
}

impl EmbeddingSettings {
    pub fn retry_policy(&self) -> crate::retry::RetryPolicy {
        crate::retry::RetryPolicy::new(self.max_attempts, self.base_delay_ms, self.max_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 || self.batch_size == 0 || self.concurrency == 0 || self.max_attempts == 0 {
            return Err(Error::InvalidConfig(
                "embedding.dim, batch_size, concurrency and max_attempts must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// OpenAI-compatible endpoint used for HTTP embeddings and generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub base_url: String,
    /// Name of the env var holding the API key; the key itself is never stored in config.
    pub api_key_env: String,
    pub embed_model: String,
    pub chat_model: String,
    pub temperature: f32,
    pub request_timeout_ms: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            embed_model: "text-embedding-3-large".to_string(),
            chat_model: "gpt-4o".to_string(),
            temperature: 0.2,
            request_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeSettings {
    pub fuzzy_threshold: f32,
    pub min_token_len: usize,
}

impl Default for ScopeSettings {
    fn default() -> Self {
        Self { fuzzy_threshold: 0.88, min_token_len: 3 }
    }
}

impl ScopeSettings {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.fuzzy_threshold) {
            return Err(Error::InvalidConfig("scope.fuzzy_threshold must be within [0, 1]".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Settings::default().validate().expect("defaults are consistent");
    }

    #[test]
    fn rejects_shrinking_budgets() {
        let mut s = Settings::default();
        s.chunking.mid_tokens = 100;
        assert!(matches!(s.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut s = Settings::default();
        s.guard.min_confidence = 1.5;
        assert!(s.validate().is_err());
    }
}

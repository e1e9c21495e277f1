use serde::{Deserialize, Serialize};
use std::env;

const MIN_CACHE_TTL_SECS: u64 = 60;
const MAX_CACHE_TTL_SECS: u64 = 7 * 24 * 3600;
const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

const MAX_HISTORY_CAP: usize = 50;

/// Application configuration, read once from the environment at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// LLM API key; absent means the chat endpoint reports a config error
    #[serde(skip_serializing)]
    pub openai_api_key: Option<String>,

    /// OpenAI-compatible base URL
    pub openai_base_url: Option<String>,

    /// Model name for chat completions
    pub model_name: Option<String>,

    /// Tavily search API key
    #[serde(skip_serializing)]
    pub tavily_api_key: Option<String>,

    /// Search cache TTL in seconds, clamped to [60s, 7d]
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// History window length, clamped to [0, 50]
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Server host
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_cache_ttl() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

fn default_max_history() -> usize {
    classchat_core::DEFAULT_MAX_HISTORY
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        let settings = Settings {
            openai_api_key: env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            openai_base_url: env::var("OPENAI_BASE_URL").ok(),
            model_name: env::var("MODEL_NAME").ok(),
            tavily_api_key: env::var("TAVILY_API_KEY").ok().filter(|k| !k.is_empty()),
            cache_ttl_secs: clamp_cache_ttl(
                env::var("SEARCH_CACHE_TTL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_CACHE_TTL_SECS),
            ),
            max_history: clamp_max_history(
                env::var("MAX_HISTORY")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(classchat_core::DEFAULT_MAX_HISTORY),
            ),
            host: env::var("HOST").unwrap_or_else(|_| default_host()),
            port: env::var("PORT")
                .map(|p| p.parse().unwrap_or(default_port()))
                .unwrap_or(default_port()),
        };

        Ok(settings)
    }

    /// Get the server address as a string
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn model(&self) -> String {
        self.model_name
            .clone()
            .unwrap_or_else(|| classchat_core::llm_client::config::DEFAULT_MODEL.to_string())
    }
}

fn clamp_cache_ttl(secs: u64) -> u64 {
    secs.clamp(MIN_CACHE_TTL_SECS, MAX_CACHE_TTL_SECS)
}

fn clamp_max_history(len: usize) -> usize {
    len.min(MAX_HISTORY_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_ttl_clamped() {
        assert_eq!(clamp_cache_ttl(0), 60);
        assert_eq!(clamp_cache_ttl(3600), 3600);
        assert_eq!(clamp_cache_ttl(u64::MAX), 7 * 24 * 3600);
    }

    #[test]
    fn test_max_history_clamped() {
        assert_eq!(clamp_max_history(0), 0);
        assert_eq!(clamp_max_history(10), 10);
        assert_eq!(clamp_max_history(500), 50);
    }
}

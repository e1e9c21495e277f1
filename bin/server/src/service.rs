use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use classchat_core::{
    ChatPipeline, LlmConfig, OpenAiClient, SearchCache, SearchProvider, StatsRecorder,
    StatsSnapshot, TavilyClient,
};

use crate::config::Settings;

/// Application context constructed once at startup
///
/// Exclusively owns the cache and stats recorder; handlers only borrow it
/// through an `Arc`.
pub struct AppContext {
    pub pipeline: ChatPipeline,
    cache: Arc<SearchCache>,
    stats: Arc<StatsRecorder>,
    model: String,
    openai_configured: bool,
    tavily_configured: bool,
}

impl AppContext {
    pub fn new(settings: &Settings) -> Result<Self> {
        let mut llm_config = LlmConfig::new().with_model(settings.model());
        if let Some(key) = &settings.openai_api_key {
            llm_config = llm_config.with_api_key(key.clone());
        }
        if let Some(base_url) = &settings.openai_base_url {
            llm_config = llm_config.with_base_url(base_url.clone());
        }

        let llm = Arc::new(
            OpenAiClient::new(llm_config)
                .map_err(|e| anyhow::anyhow!("Failed to create LLM client: {}", e))?,
        );
        let tavily = Arc::new(
            TavilyClient::new(settings.tavily_api_key.clone())
                .map_err(|e| anyhow::anyhow!("Failed to create search client: {}", e))?,
        );

        let cache = Arc::new(SearchCache::new(Duration::from_secs(settings.cache_ttl_secs)));
        let stats = Arc::new(StatsRecorder::new());
        let provider = Arc::new(SearchProvider::new(tavily.clone(), cache.clone()));

        let openai_configured = llm.configured();
        let tavily_configured = tavily.configured();
        let model = settings.model();

        let pipeline = ChatPipeline::new(llm, provider, stats.clone(), settings.max_history);

        Ok(Self {
            pipeline,
            cache,
            stats,
            model,
            openai_configured,
            tavily_configured,
        })
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot(self.cache.len(), &self.model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn openai_configured(&self) -> bool {
        self.openai_configured
    }

    pub fn tavily_configured(&self) -> bool {
        self.tavily_configured
    }
}

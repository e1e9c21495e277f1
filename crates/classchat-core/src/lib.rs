/*
Copyright 2024, Zep Software, Inc.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! # classchat core
//!
//! Chat orchestration pipeline for a teaching platform: a multi-round LLM
//! tool-calling protocol, a cached web search provider, progress streaming
//! hooks and thread-safe usage statistics.

pub mod errors;
pub mod helpers;
pub mod llm_client;
pub mod pipeline;
pub mod search;
pub mod stats;
pub mod types;

// Re-export commonly used types
pub use errors::{ChatError, ChatResult};
pub use pipeline::{ChatPipeline, DEFAULT_MAX_HISTORY};
pub use stats::{StatsRecorder, StatsSnapshot};
pub use types::{ChatRequest, ChatResponse, NoopSink, Source, StatusSink, StatusUpdate};

// Re-export traits
pub use llm_client::LlmClient;
pub use search::SearchBackend;

// Re-export concrete types
pub use llm_client::{
    config::LlmConfig,
    models::{ChatMessage, ToolCall},
    openai_client::OpenAiClient,
};
pub use search::{SearchCache, SearchPayload, SearchProvider, TavilyClient};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exports() {
        // This test ensures that all the main exports are available
        // and can be used together
        let _config = LlmConfig::default();
        let _stats = StatsRecorder::new();
    }
}

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

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use super::cache::SearchCache;
use super::tavily::SearchBackend;
use crate::errors::{ChatError, ChatResult};
use crate::helpers::{collapse_whitespace, truncate_chars};
use crate::types::Source;

pub const DEPTH_BASIC: &str = "basic";
pub const DEPTH_ADVANCED: &str = "advanced";

/// Fixed text used when a search produced no usable sources
pub const NO_SOURCES_SENTINEL: &str = "未找到相关的搜索结果。";

const MAX_SUMMARY_LEN: usize = 1200;
const MAX_SNIPPET_LEN: usize = 500;

/// Formatted result set for one (query, depth) search
#[derive(Debug, Clone, Serialize)]
pub struct SearchPayload {
    pub query: String,
    pub depth: String,
    pub ai_summary: String,
    pub sources: Vec<Source>,
    /// Numbered plain-text digest fed back to the LLM as tool output
    pub context_text: String,
}

/// Resolves a (query, depth) pair to a formatted result set, consulting the
/// cache before the backend
pub struct SearchProvider {
    backend: Arc<dyn SearchBackend>,
    cache: Arc<SearchCache>,
}

impl SearchProvider {
    pub fn new(backend: Arc<dyn SearchBackend>, cache: Arc<SearchCache>) -> Self {
        Self { backend, cache }
    }

    /// Run one search. The second element of the pair is true when the
    /// payload came from the cache without any network call.
    pub async fn search(&self, query: &str, depth: &str) -> ChatResult<(SearchPayload, bool)> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ChatError::invalid_request("Search query cannot be empty"));
        }
        let depth = normalize_depth(depth);

        let key = SearchCache::key(query, depth);
        if let Some(payload) = self.cache.get(&key) {
            info!(%query, %depth, "search cache hit");
            return Ok((payload, true));
        }

        let max_results = if depth == DEPTH_ADVANCED { 10 } else { 5 };
        let raw = self.backend.search(query, depth, max_results).await?;
        let payload = format_payload(query, depth, &raw, max_results);

        info!(%query, %depth, sources = payload.sources.len(), "search completed");
        self.cache.set(&key, payload.clone());
        Ok((payload, false))
    }
}

/// Clamp depth to exactly `basic` or `advanced`
pub fn normalize_depth(depth: &str) -> &'static str {
    if depth.trim().eq_ignore_ascii_case(DEPTH_ADVANCED) {
        DEPTH_ADVANCED
    } else {
        DEPTH_BASIC
    }
}

/// Shape a raw backend payload into the stable format the pipeline and
/// clients consume
fn format_payload(query: &str, depth: &str, raw: &Value, max_results: usize) -> SearchPayload {
    let ai_summary = raw
        .get("answer")
        .and_then(Value::as_str)
        .map(|a| truncate_chars(&collapse_whitespace(a), MAX_SUMMARY_LEN))
        .unwrap_or_default();

    let mut sources: Vec<Source> = Vec::new();
    if let Some(results) = raw.get("results").and_then(Value::as_array) {
        for item in results {
            let Some(url) = item.get("url").and_then(Value::as_str).filter(|u| !u.is_empty())
            else {
                continue;
            };
            let title = item
                .get("title")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .unwrap_or(url);
            let snippet = item
                .get("content")
                .and_then(Value::as_str)
                .map(|c| truncate_chars(c, MAX_SNIPPET_LEN))
                .unwrap_or_default();

            sources.push(Source {
                title: title.to_string(),
                url: url.to_string(),
                snippet,
                relevance: item.get("score").and_then(Value::as_f64),
                query: query.to_string(),
                depth: depth.to_string(),
            });
        }
    }
    let mut sources = crate::types::dedup_sources(sources);
    sources.truncate(max_results);

    let context_text = build_context_text(&ai_summary, &sources);

    SearchPayload {
        query: query.to_string(),
        depth: depth.to_string(),
        ai_summary,
        sources,
        context_text,
    }
}

fn build_context_text(ai_summary: &str, sources: &[Source]) -> String {
    if sources.is_empty() {
        return NO_SOURCES_SENTINEL.to_string();
    }

    let mut blocks = Vec::with_capacity(sources.len() + 1);
    if !ai_summary.is_empty() {
        blocks.push(format!("AI摘要: {}", ai_summary));
    }
    for (i, source) in sources.iter().enumerate() {
        let mut block = format!("[{}] {}\n链接: {}", i + 1, source.title, source.url);
        if let Some(relevance) = source.relevance {
            block.push_str(&format!("\n相关度: {:.2}", relevance));
        }
        if !source.snippet.is_empty() {
            block.push_str(&format!("\n摘要: {}", source.snippet));
        }
        blocks.push(block);
    }
    blocks.join("\n\n")
}

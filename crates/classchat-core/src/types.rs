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

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Maximum length of a single user message, in characters
pub const MAX_MESSAGE_LEN: usize = 8000;

/// Maximum length of the optional course context appended to a message
pub const MAX_CONTEXT_LEN: usize = 2000;

/// One prior conversation turn as submitted by the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

/// A single chat turn request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub context: Option<String>,
}

/// A web source cited in a chat response, unique by url
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub url: String,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f64>,
    pub query: String,
    pub depth: String,
}

/// The completed answer for one chat turn
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub response: String,
    /// Alias of `response`, kept for older clients
    pub answer: String,
    pub used_search: bool,
    pub search_queries: Vec<String>,
    pub sources: Vec<Source>,
}

/// Progress notification emitted while a turn is in flight
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Thinking,
    Searching,
    SearchCompleted {
        query: String,
        cached: bool,
        source_count: usize,
    },
    Generating,
}

/// Receives status updates from the pipeline
///
/// The synchronous transport plugs in [`NoopSink`]; the streaming session
/// forwards each update as a frame before any chunk of the answer.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn emit(&self, update: StatusUpdate);
}

/// Sink that discards every update
pub struct NoopSink;

#[async_trait]
impl StatusSink for NoopSink {
    async fn emit(&self, _update: StatusUpdate) {}
}

/// Remove duplicate sources by url, first occurrence wins
pub fn dedup_sources(sources: Vec<Source>) -> Vec<Source> {
    let mut seen = std::collections::HashSet::new();
    sources
        .into_iter()
        .filter(|s| seen.insert(s.url.clone()))
        .collect()
}

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

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::{ChatError, ChatResult};

const TAVILY_URL: &str = "https://api.tavily.com/search";

// Search runs inside an interactive turn, so its budget is much tighter
// than the LLM round budget.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const TOTAL_TIMEOUT: Duration = Duration::from_secs(20);

/// Raw search backend behind [`super::SearchProvider`]
///
/// Providers are swappable at this seam; only the formatted payload shape
/// is part of the crate contract.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str, depth: &str, max_results: usize) -> ChatResult<Value>;
}

/// Tavily web search API client
pub struct TavilyClient {
    api_key: Option<String>,
    http_client: Client,
}

impl TavilyClient {
    pub fn new(api_key: Option<String>) -> ChatResult<Self> {
        let http_client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(TOTAL_TIMEOUT)
            .build()
            .map_err(|e| ChatError::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            http_client,
        })
    }

    pub fn configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

#[async_trait]
impl SearchBackend for TavilyClient {
    async fn search(&self, query: &str, depth: &str, max_results: usize) -> ChatResult<Value> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ChatError::config("Search API key is not configured"))?;

        let request = json!({
            "api_key": api_key,
            "query": query,
            "search_depth": depth,
            "max_results": max_results,
            "include_answer": true,
        });

        debug!(%query, %depth, max_results, "calling search API");

        let response = self
            .http_client
            .post(TAVILY_URL)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChatError::search(format!("Search request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::upstream(format!(
                "Search API returned HTTP {}: {}",
                status,
                body.chars().take(300).collect::<String>()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ChatError::upstream(format!("Non-JSON search response: {}", e)))
    }
}

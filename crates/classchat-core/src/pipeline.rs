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

//! Chat turn orchestration: LLM round 1, optional tool execution, LLM
//! round 2, stats recording.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::errors::{ChatError, ChatResult};
use crate::helpers::truncate_chars;
use crate::llm_client::{web_search_tool, ChatMessage, LlmClient, WEB_SEARCH_TOOL};
use crate::search::SearchProvider;
use crate::stats::StatsRecorder;
use crate::types::{
    dedup_sources, ChatRequest, ChatResponse, Source, StatusSink, StatusUpdate, MAX_CONTEXT_LEN,
    MAX_MESSAGE_LEN,
};

pub const DEFAULT_MAX_HISTORY: usize = 10;

const SYSTEM_PROMPT: &str = "你是一名耐心的教学助手，帮助学生理解课程内容。\
回答要准确、循序渐进，并使用提问者的语言。\
当问题涉及时事、最新版本或你不确定的事实时，调用 web_search 工具获取资料，\
并在回答中结合搜索结果。";

/// Drives one full chat turn
pub struct ChatPipeline {
    llm: Arc<dyn LlmClient>,
    search: Arc<SearchProvider>,
    stats: Arc<StatsRecorder>,
    max_history: usize,
}

/// Records exactly one stats sample when dropped
///
/// Living on the stack of `run`, it fires on success, on error, and when
/// the future is dropped by a disconnecting transport.
struct StatsGuard {
    stats: Arc<StatsRecorder>,
    started: Instant,
    used_search: bool,
    search_requests: i64,
    cache_hits: i64,
}

impl Drop for StatsGuard {
    fn drop(&mut self) {
        self.stats.record(
            self.started.elapsed().as_millis() as i64,
            self.used_search,
            self.search_requests,
            self.cache_hits,
        );
    }
}

impl ChatPipeline {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        search: Arc<SearchProvider>,
        stats: Arc<StatsRecorder>,
        max_history: usize,
    ) -> Self {
        Self {
            llm,
            search,
            stats,
            max_history,
        }
    }

    /// Run one chat turn, emitting status updates into `sink` as the turn
    /// progresses
    pub async fn run(
        &self,
        request: ChatRequest,
        sink: &dyn StatusSink,
    ) -> ChatResult<ChatResponse> {
        let mut guard = StatsGuard {
            stats: self.stats.clone(),
            started: Instant::now(),
            used_search: false,
            search_requests: 0,
            cache_hits: 0,
        };
        self.run_inner(request, sink, &mut guard).await
    }

    async fn run_inner(
        &self,
        request: ChatRequest,
        sink: &dyn StatusSink,
        guard: &mut StatsGuard,
    ) -> ChatResult<ChatResponse> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(ChatError::invalid_request("Message cannot be empty"));
        }
        if message.chars().count() > MAX_MESSAGE_LEN {
            return Err(ChatError::invalid_request(format!(
                "Message exceeds {} characters",
                MAX_MESSAGE_LEN
            )));
        }

        let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];
        messages.extend(self.windowed_history(&request));
        messages.push(ChatMessage::user(user_content(message, &request.context)));

        sink.emit(StatusUpdate::Thinking).await;
        let tools = [web_search_tool()];
        let first = self
            .llm
            .chat_completion(&messages, Some(tools.as_slice()), Some("auto"))
            .await?;

        let tool_calls = first.tool_calls.clone().unwrap_or_default();
        let mut search_queries = Vec::new();
        let mut sources: Vec<Source> = Vec::new();

        let answer = if tool_calls.is_empty() {
            sink.emit(StatusUpdate::Generating).await;
            first.content_str().trim().to_string()
        } else {
            guard.used_search = true;
            sink.emit(StatusUpdate::Searching).await;
            messages.push(first.clone());

            for call in &tool_calls {
                if call.function.name != WEB_SEARCH_TOOL {
                    continue;
                }
                let args = parse_tool_arguments(&call.function.arguments);
                let query = args
                    .get("query")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|q| !q.is_empty())
                    .unwrap_or(message)
                    .to_string();
                let depth = args
                    .get("search_depth")
                    .and_then(Value::as_str)
                    .unwrap_or(crate::search::DEPTH_BASIC)
                    .to_string();

                search_queries.push(query.clone());
                guard.search_requests += 1;

                match self.search.search(&query, &depth).await {
                    Ok((payload, cached)) => {
                        if cached {
                            guard.cache_hits += 1;
                        }
                        let source_count = payload.sources.len();
                        sources.extend(payload.sources.iter().cloned());
                        let body = json!({
                            "query": payload.query,
                            "depth": payload.depth,
                            "cached": cached,
                            "ai_summary": payload.ai_summary,
                            "sources": payload.sources,
                            "context_text": payload.context_text,
                        });
                        messages.push(ChatMessage::tool(&call.id, &call.function.name, body));
                        sink.emit(StatusUpdate::SearchCompleted {
                            query,
                            cached,
                            source_count,
                        })
                        .await;
                    }
                    // One failing search never fails the turn; the model
                    // sees the error and answers from what it has.
                    Err(e) => {
                        warn!(%query, error = %e, "search tool call failed");
                        let body = json!({
                            "query": query,
                            "depth": depth,
                            "error": e.to_string(),
                        });
                        messages.push(ChatMessage::tool(&call.id, &call.function.name, body));
                    }
                }
            }

            sink.emit(StatusUpdate::Generating).await;
            let second = self.llm.chat_completion(&messages, None, None).await?;
            second.content_str().trim().to_string()
        };

        if answer.is_empty() {
            return Err(ChatError::UpstreamEmpty);
        }

        let sources = dedup_sources(sources);
        info!(
            used_search = guard.used_search,
            searches = guard.search_requests,
            sources = sources.len(),
            "chat turn completed"
        );

        Ok(ChatResponse {
            response: answer.clone(),
            answer,
            used_search: guard.used_search,
            search_queries,
            sources,
        })
    }

    /// Last `max_history` user/assistant entries with non-empty content,
    /// oldest dropped first
    fn windowed_history(&self, request: &ChatRequest) -> Vec<ChatMessage> {
        let kept: Vec<&crate::types::HistoryEntry> = request
            .history
            .iter()
            .filter(|e| {
                (e.role == "user" || e.role == "assistant") && !e.content.trim().is_empty()
            })
            .collect();
        let skip = kept.len().saturating_sub(self.max_history);
        kept.into_iter()
            .skip(skip)
            .map(|e| ChatMessage::new(e.role.clone(), e.content.clone()))
            .collect()
    }
}

fn user_content(message: &str, context: &Option<String>) -> String {
    match context.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        Some(context) => format!(
            "{}\n\n参考上下文:\n{}",
            message,
            truncate_chars(context, MAX_CONTEXT_LEN)
        ),
        None => message.to_string(),
    }
}

/// Lenient tool-argument parsing: exact JSON object, else the first
/// `{...}` substring, else an empty map. Never fails; malformed and absent
/// arguments are indistinguishable.
fn parse_tool_arguments(raw: &str) -> Map<String, Value> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) {
        return map;
    }
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if start < end {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&raw[start..=end]) {
                return map;
            }
        }
    }
    Map::new()
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::llm_client::{ToolCall, ToolFunction};
    use crate::search::{SearchBackend, SearchCache};
    use crate::types::HistoryEntry;

    /// Replays a fixed sequence of replies and captures each request
    struct ScriptedLlm {
        replies: Mutex<VecDeque<ChatResult<ChatMessage>>>,
        requests: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<ChatResult<ChatMessage>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn request(&self, round: usize) -> Vec<ChatMessage> {
            self.requests.lock().unwrap()[round].clone()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat_completion(
            &self,
            messages: &[ChatMessage],
            _tools: Option<&[Value]>,
            _tool_choice: Option<&str>,
        ) -> ChatResult<ChatMessage> {
            self.requests.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("scripted reply available")
        }
    }

    /// Backend returning `source_count` sources, optionally failing from
    /// call number `fail_from` onwards
    struct FakeBackend {
        source_count: usize,
        fail_from: Option<usize>,
        calls: AtomicUsize,
    }

    impl FakeBackend {
        fn new(source_count: usize) -> Self {
            Self {
                source_count,
                fail_from: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing_from(mut self, call: usize) -> Self {
            self.fail_from = Some(call);
            self
        }
    }

    #[async_trait]
    impl SearchBackend for FakeBackend {
        async fn search(&self, query: &str, _depth: &str, _max: usize) -> ChatResult<Value> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_from.is_some_and(|from| call >= from) {
                return Err(ChatError::search("connection timed out"));
            }
            let results: Vec<Value> = (0..self.source_count)
                .map(|i| {
                    json!({
                        "title": format!("Result {}", i + 1),
                        "url": format!("https://example.com/{}/{}", query.len(), i + 1),
                        "content": "snippet",
                        "score": 0.9,
                    })
                })
                .collect();
            Ok(json!({"answer": "摘要", "results": results}))
        }
    }

    struct CollectSink(Mutex<Vec<StatusUpdate>>);

    #[async_trait]
    impl StatusSink for CollectSink {
        async fn emit(&self, update: StatusUpdate) {
            self.0.lock().unwrap().push(update);
        }
    }

    fn tool_call(id: &str, arguments: &str) -> ChatMessage {
        ChatMessage {
            role: "assistant".to_string(),
            content: None,
            tool_calls: Some(vec![ToolCall {
                id: id.to_string(),
                call_type: "function".to_string(),
                function: ToolFunction {
                    name: WEB_SEARCH_TOOL.to_string(),
                    arguments: arguments.to_string(),
                },
            }]),
            tool_call_id: None,
            name: None,
        }
    }

    fn pipeline_with(
        llm: Arc<ScriptedLlm>,
        backend: FakeBackend,
    ) -> (ChatPipeline, Arc<StatsRecorder>, Arc<SearchCache>) {
        let cache = Arc::new(SearchCache::new(Duration::from_secs(60)));
        let stats = Arc::new(StatsRecorder::new());
        let provider = Arc::new(SearchProvider::new(Arc::new(backend), cache.clone()));
        (
            ChatPipeline::new(llm, provider, stats.clone(), DEFAULT_MAX_HISTORY),
            stats,
            cache,
        )
    }

    fn request(message: &str) -> ChatRequest {
        ChatRequest {
            message: message.to_string(),
            history: Vec::new(),
            context: None,
        }
    }

    #[tokio::test]
    async fn test_direct_answer_without_search() {
        let llm = ScriptedLlm::new(vec![Ok(ChatMessage::assistant(
            "快速排序是一种分治排序算法。",
        ))]);
        let (pipeline, stats, _) = pipeline_with(llm.clone(), FakeBackend::new(0));
        let sink = CollectSink(Mutex::new(Vec::new()));

        let response = pipeline.run(request("什么是快速排序？"), &sink).await.unwrap();

        assert_eq!(response.response, "快速排序是一种分治排序算法。");
        assert_eq!(response.answer, response.response);
        assert!(!response.used_search);
        assert!(response.search_queries.is_empty());
        assert!(response.sources.is_empty());
        assert_eq!(
            *sink.0.lock().unwrap(),
            vec![StatusUpdate::Thinking, StatusUpdate::Generating]
        );

        let snap = stats.snapshot(0, "m");
        assert_eq!(snap.total_queries, 1);
        assert_eq!(snap.search_triggered, 0);
    }

    #[tokio::test]
    async fn test_search_turn_collects_sources() {
        let llm = ScriptedLlm::new(vec![
            Ok(tool_call("call_1", r#"{"query": "今天的新闻"}"#)),
            Ok(ChatMessage::assistant("根据搜索结果……")),
        ]);
        let (pipeline, stats, _) = pipeline_with(llm.clone(), FakeBackend::new(3));
        let sink = CollectSink(Mutex::new(Vec::new()));

        let response = pipeline.run(request("今天的新闻"), &sink).await.unwrap();

        assert!(response.used_search);
        assert_eq!(response.search_queries, vec!["今天的新闻"]);
        assert_eq!(response.sources.len(), 3);
        let urls: std::collections::HashSet<_> =
            response.sources.iter().map(|s| s.url.clone()).collect();
        assert_eq!(urls.len(), 3);

        let statuses = sink.0.lock().unwrap();
        assert_eq!(statuses[0], StatusUpdate::Thinking);
        assert_eq!(statuses[1], StatusUpdate::Searching);
        assert!(matches!(
            statuses[2],
            StatusUpdate::SearchCompleted { source_count: 3, cached: false, .. }
        ));
        assert_eq!(statuses[3], StatusUpdate::Generating);

        // Round 2 saw the assistant tool-call message plus the tool result
        let round2 = llm.request(1);
        assert_eq!(round2.last().unwrap().role, "tool");
        assert_eq!(round2.last().unwrap().tool_call_id.as_deref(), Some("call_1"));

        let snap = stats.snapshot(0, "m");
        assert_eq!(snap.search_triggered, 1);
        assert_eq!(snap.search_requests, 1);
    }

    #[tokio::test]
    async fn test_one_failing_search_does_not_fail_turn() {
        let first = ChatMessage {
            tool_calls: Some(vec![
                ToolCall {
                    id: "call_1".to_string(),
                    call_type: "function".to_string(),
                    function: ToolFunction {
                        name: WEB_SEARCH_TOOL.to_string(),
                        arguments: r#"{"query": "rust 1.80"}"#.to_string(),
                    },
                },
                ToolCall {
                    id: "call_2".to_string(),
                    call_type: "function".to_string(),
                    function: ToolFunction {
                        name: WEB_SEARCH_TOOL.to_string(),
                        arguments: r#"{"query": "tokio release"}"#.to_string(),
                    },
                },
            ]),
            ..ChatMessage::assistant("")
        };
        let llm = ScriptedLlm::new(vec![Ok(first), Ok(ChatMessage::assistant("answer"))]);
        let (pipeline, stats, _) =
            pipeline_with(llm.clone(), FakeBackend::new(2).failing_from(2));
        let sink = CollectSink(Mutex::new(Vec::new()));

        let response = pipeline.run(request("news"), &sink).await.unwrap();

        // Only the successful call contributed sources
        assert_eq!(response.sources.len(), 2);
        assert_eq!(response.search_queries.len(), 2);

        // The failed call still produced a tool message carrying an error
        let round2 = llm.request(1);
        let failed = round2
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("call_2"))
            .unwrap();
        assert!(failed.content_str().contains("error"));

        let snap = stats.snapshot(0, "m");
        assert_eq!(snap.search_requests, 2);
        assert_eq!(snap.cache_hits, 0);
    }

    #[tokio::test]
    async fn test_repeat_query_counts_cache_hit() {
        let replies = |q: &str| {
            vec![
                Ok(tool_call("call_1", &format!(r#"{{"query": "{}"}}"#, q))),
                Ok(ChatMessage::assistant("answer")),
            ]
        };
        let cache = Arc::new(SearchCache::new(Duration::from_secs(60)));
        let stats = Arc::new(StatsRecorder::new());
        let provider = Arc::new(SearchProvider::new(
            Arc::new(FakeBackend::new(1)),
            cache.clone(),
        ));

        for _ in 0..2 {
            let llm = ScriptedLlm::new(replies("llm agents"));
            let pipeline =
                ChatPipeline::new(llm, provider.clone(), stats.clone(), DEFAULT_MAX_HISTORY);
            pipeline
                .run(request("llm agents"), &crate::types::NoopSink)
                .await
                .unwrap();
        }

        let snap = stats.snapshot(cache.len(), "m");
        assert_eq!(snap.search_requests, 2);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.cache_entries, 1);
    }

    #[tokio::test]
    async fn test_history_window_keeps_most_recent() {
        let llm = ScriptedLlm::new(vec![Ok(ChatMessage::assistant("ok"))]);
        let (pipeline, _, _) = pipeline_with(llm.clone(), FakeBackend::new(0));

        let mut req = request("next question");
        for i in 0..25 {
            let role = if i % 2 == 0 { "user" } else { "assistant" };
            req.history.push(HistoryEntry {
                role: role.to_string(),
                content: format!("turn {}", i),
            });
        }
        // Entries the window must ignore
        req.history.push(HistoryEntry {
            role: "system".to_string(),
            content: "injected".to_string(),
        });
        req.history.push(HistoryEntry {
            role: "user".to_string(),
            content: "   ".to_string(),
        });

        pipeline.run(req, &crate::types::NoopSink).await.unwrap();

        let round1 = llm.request(0);
        // system + MAX_HISTORY entries + current user message
        assert_eq!(round1.len(), 1 + DEFAULT_MAX_HISTORY + 1);
        assert_eq!(round1[1].content_str(), "turn 15");
        assert_eq!(round1[DEFAULT_MAX_HISTORY].content_str(), "turn 24");
    }

    #[tokio::test]
    async fn test_context_appended_truncated() {
        let llm = ScriptedLlm::new(vec![Ok(ChatMessage::assistant("ok"))]);
        let (pipeline, _, _) = pipeline_with(llm.clone(), FakeBackend::new(0));

        let mut req = request("explain");
        req.context = Some("c".repeat(3000));
        pipeline.run(req, &crate::types::NoopSink).await.unwrap();

        let user = llm.request(0).last().unwrap().content_str().to_string();
        assert!(user.starts_with("explain\n\n参考上下文:\n"));
        assert!(user.chars().count() < 3000);
    }

    #[tokio::test]
    async fn test_malformed_arguments_fall_back_to_message() {
        let llm = ScriptedLlm::new(vec![
            Ok(tool_call("call_1", "definitely not json")),
            Ok(ChatMessage::assistant("answer")),
        ]);
        let (pipeline, _, _) = pipeline_with(llm.clone(), FakeBackend::new(1));

        let response = pipeline
            .run(request("original question"), &crate::types::NoopSink)
            .await
            .unwrap();
        assert_eq!(response.search_queries, vec!["original question"]);
    }

    #[tokio::test]
    async fn test_empty_message_rejected_but_sampled() {
        let llm = ScriptedLlm::new(vec![]);
        let (pipeline, stats, _) = pipeline_with(llm, FakeBackend::new(0));

        let result = pipeline.run(request("   "), &crate::types::NoopSink).await;
        assert!(matches!(result, Err(ChatError::InvalidRequest { .. })));

        // The failed turn still recorded exactly one sample
        assert_eq!(stats.snapshot(0, "m").total_queries, 1);
    }

    #[tokio::test]
    async fn test_empty_final_answer_is_upstream_empty() {
        let llm = ScriptedLlm::new(vec![Ok(ChatMessage::assistant("   "))]);
        let (pipeline, _, _) = pipeline_with(llm, FakeBackend::new(0));

        let result = pipeline.run(request("hi"), &crate::types::NoopSink).await;
        assert!(matches!(result, Err(ChatError::UpstreamEmpty)));
    }

    #[tokio::test]
    async fn test_first_round_failure_aborts() {
        let llm = ScriptedLlm::new(vec![Err(ChatError::upstream("boom"))]);
        let (pipeline, stats, _) = pipeline_with(llm, FakeBackend::new(0));

        let result = pipeline.run(request("hi"), &crate::types::NoopSink).await;
        assert!(matches!(result, Err(ChatError::Upstream { .. })));
        assert_eq!(stats.snapshot(0, "m").total_queries, 1);
    }

    #[test]
    fn test_parse_tool_arguments_exact() {
        let args = parse_tool_arguments(r#"{"query": "rust", "search_depth": "advanced"}"#);
        assert_eq!(args.get("query").unwrap(), "rust");
        assert_eq!(args.get("search_depth").unwrap(), "advanced");
    }

    #[test]
    fn test_parse_tool_arguments_embedded_object() {
        let args = parse_tool_arguments("some prefix {\"query\": \"x\"} trailing");
        assert_eq!(args.get("query").unwrap(), "x");
    }

    #[test]
    fn test_parse_tool_arguments_garbage_is_empty() {
        assert!(parse_tool_arguments("").is_empty());
        assert!(parse_tool_arguments("{broken").is_empty());
        assert!(parse_tool_arguments("[1, 2]").is_empty());
    }
}

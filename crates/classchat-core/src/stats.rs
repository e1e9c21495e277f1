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

//! Thread-safe usage counters and derived-rate snapshots.

use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;

#[derive(Debug, Default, Clone)]
struct Counters {
    total_queries: u64,
    search_triggered: u64,
    search_requests: u64,
    cache_hits: u64,
    total_response_time_ms: u64,
}

/// Process-lifetime usage recorder
///
/// Counters only ever increase while the process is live; one sample is
/// recorded per pipeline invocation regardless of its outcome.
pub struct StatsRecorder {
    counters: Mutex<Counters>,
    started_at: Instant,
}

/// Point-in-time view served by `GET /api/stats`
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub total_queries: u64,
    pub search_triggered: u64,
    pub search_trigger_rate: f64,
    pub search_requests: u64,
    pub cache_hits: u64,
    pub cache_hit_rate: f64,
    pub avg_response_time_ms: f64,
    pub cache_entries: usize,
    pub uptime_seconds: u64,
    pub model: String,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            started_at: Instant::now(),
        }
    }

    /// Record one pipeline sample
    pub fn record(
        &self,
        response_time_ms: i64,
        used_search: bool,
        search_requests: i64,
        cache_hits: i64,
    ) {
        let mut counters = self.counters.lock().unwrap();
        counters.total_queries += 1;
        if used_search {
            counters.search_triggered += 1;
        }
        counters.search_requests += search_requests.max(0) as u64;
        counters.cache_hits += cache_hits.max(0) as u64;
        counters.total_response_time_ms += response_time_ms.max(0) as u64;
    }

    /// Compute derived rates without mutating any counter
    pub fn snapshot(&self, cache_entries: usize, model: &str) -> StatsSnapshot {
        let counters = self.counters.lock().unwrap().clone();

        let search_trigger_rate = if counters.total_queries > 0 {
            round2(counters.search_triggered as f64 / counters.total_queries as f64 * 100.0)
        } else {
            0.0
        };
        let cache_hit_rate = if counters.search_requests > 0 {
            round2(counters.cache_hits as f64 / counters.search_requests as f64 * 100.0)
        } else {
            0.0
        };
        let avg_response_time_ms = if counters.total_queries > 0 {
            round2(counters.total_response_time_ms as f64 / counters.total_queries as f64)
        } else {
            0.0
        };

        StatsSnapshot {
            total_queries: counters.total_queries,
            search_triggered: counters.search_triggered,
            search_trigger_rate,
            search_requests: counters.search_requests,
            cache_hits: counters.cache_hits,
            cache_hit_rate,
            avg_response_time_ms,
            cache_entries,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            model: model.to_string(),
        }
    }
}

impl Default for StatsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

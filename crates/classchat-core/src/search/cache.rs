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

//! TTL key/value store for formatted search payloads.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::provider::SearchPayload;

struct CacheEntry {
    payload: SearchPayload,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(payload: SearchPayload, ttl: Duration) -> Self {
        Self {
            payload,
            expires_at: Instant::now() + ttl,
        }
    }
}

/// In-memory search cache with per-entry expiry
///
/// Expired keys are purged lazily: every access sweeps the whole map under
/// the single lock before acting. TTL is the only bound; there is no
/// capacity cap.
pub struct SearchCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl SearchCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cache key for a (query, depth) pair; queries are normalized so
    /// trivially different spellings share an entry
    pub fn key(query: &str, depth: &str) -> String {
        format!("{}_{}", query.trim().to_lowercase(), depth)
    }

    pub fn get(&self, key: &str) -> Option<SearchPayload> {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);
        entries.get(key).map(|e| e.payload.clone())
    }

    pub fn set(&self, key: &str, payload: SearchPayload) {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(key.to_string(), CacheEntry::new(payload, self.ttl));
    }

    /// Live (unexpired) entry count
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);
        entries.len()
    }
}

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

//! Cached web search: a TTL cache consulted before the provider backend,
//! and formatting of raw provider payloads into a stable shape.

pub mod cache;
pub mod provider;
pub mod tavily;

pub use cache::SearchCache;
pub use provider::{
    normalize_depth, SearchPayload, SearchProvider, DEPTH_ADVANCED, DEPTH_BASIC,
    NO_SOURCES_SENTINEL,
};
pub use tavily::{SearchBackend, TavilyClient};

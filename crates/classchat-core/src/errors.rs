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

use thiserror::Error;

/// Base error type for classchat operations
///
/// The variant set is closed on purpose: transports map each kind to a
/// status code or error frame at the boundary, so adding a variant means
/// deciding how every transport presents it.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Upstream timeout: {message}")]
    Timeout { message: String },

    #[error("Upstream error: {message}")]
    Upstream { message: String },

    #[error("Upstream returned an empty response")]
    UpstreamEmpty,

    #[error("Search error: {message}")]
    Search { message: String },
}

impl ChatError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    pub fn search(message: impl Into<String>) -> Self {
        Self::Search {
            message: message.into(),
        }
    }
}

/// Result type alias for classchat operations
pub type ChatResult<T> = Result<T, ChatError>;

// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Error types for the analytics pipeline.
//!
//! None of these ever reach a caller of the public [`crate::Pipeline`]
//! operations. Components catch them at their own boundary, log them and
//! degrade to "no value this call".

use thiserror::Error;

/// Failures of a key/value or cookie backend.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("storage quota exceeded while writing {key}")]
    QuotaExceeded { key: String },

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored value could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Invalid agent configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid origin URL {origin}: {source}")]
    InvalidOrigin {
        origin: String,
        #[source]
        source: url::ParseError,
    },

    #[error("origin URL has no host: {0}")]
    MissingHost(String),

    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Delivery failures. Logged and dropped, never retried.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("beacon worker channel closed")]
    ChannelClosed,

    #[error("beacon queue full")]
    ChannelFull,

    #[error("no async runtime available for dispatch")]
    NoRuntime,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

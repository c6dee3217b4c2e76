//! Page ↔ worker message protocol.
//!
//! Pages post `{type, data?}` commands; the worker answers status queries
//! through a one-shot reply channel and broadcasts everything else as a
//! `Notification` to every subscribed page.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{CacheError, Result};

/// Commands a page can post to the worker.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    SyncData,
    ClearCache,
    CacheCountryData { data: Value },
    CacheSearchResults { data: SearchResults },
    GetCacheStatus,
    #[serde(other)]
    Unknown,
}

impl Message {
    /// A known type with a malformed payload is a `Protocol` error; an
    /// unrecognised type parses as `Unknown`.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| CacheError::Protocol(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub query: String,
    pub results: Value,
}

pub type ResponseChannel = oneshot::Sender<StatusReply>;

/// An incoming message plus the port to answer on, if the page sent one.
#[derive(Debug)]
pub struct MessageEvent {
    pub data: Value,
    pub reply: Option<ResponseChannel>,
}

impl MessageEvent {
    pub fn new(data: Value) -> Self {
        Self { data, reply: None }
    }

    pub fn with_reply(data: Value) -> (Self, oneshot::Receiver<StatusReply>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                data,
                reply: Some(tx),
            },
            rx,
        )
    }
}

/// Reply to `GET_CACHE_STATUS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusReply {
    Status(CacheStatus),
    Error { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub caches: BTreeMap<String, PartitionStatus>,
    pub is_online: bool,
    /// Epoch milliseconds of the last successful sync.
    pub last_sync: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionStatus {
    pub size: usize,
    pub items: Vec<String>,
}

/// Broadcast to every page context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Notification {
    SyncComplete {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    CacheCleared {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Notification {
    pub fn sync_complete(result: &Result<()>) -> Self {
        Self::SyncComplete {
            success: result.is_ok(),
            error: result.as_ref().err().map(|e| e.to_string()),
        }
    }

    pub fn cache_cleared(result: &Result<()>) -> Self {
        Self::CacheCleared {
            success: result.is_ok(),
            error: result.as_ref().err().map(|e| e.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        match self {
            Self::SyncComplete { success, .. } | Self::CacheCleared { success, .. } => *success,
        }
    }
}

/// Body of the `/internal/last-sync` record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub timestamp: Option<i64>,
}

/// A stored JSON record read back for a page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedItem {
    pub key: String,
    pub value: Value,
    pub stored_at: DateTime<Utc>,
    /// Human-readable age, e.g. "5m ago".
    pub age: String,
    pub expires_at: Option<DateTime<Utc>>,
    /// "fresh for 25m" or "expired 3h ago", when there is an expiry hint.
    pub freshness: Option<String>,
    /// The expiry hint has passed. Informational only; nothing is evicted.
    pub expired: bool,
}

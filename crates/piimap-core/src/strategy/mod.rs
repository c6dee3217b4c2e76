//! Fetch strategies.
//!
//! Each strategy coordinates one network fetch with reads and writes against
//! a single partition and always produces a response:
//!
//! - `cache_first` (static assets): serve the cached copy and refresh it in
//!   a detached task; on a miss fetch and store.
//! - `network_first_with_cache` (data endpoints): fetch and store; on
//!   failure serve the cached copy marked `x-served-from: cache`, else a
//!   structured 503.
//! - `network_first_with_offline_page` (page navigations): fetch; on failure
//!   serve the cached page, else the synthesised offline page.
//!
//! The background refresh is last-write-wins: a refresh that completes after
//! a newer write to the same key replaces it.

pub mod offline;

use tracing::{debug, warn};

use crate::classify::RequestCategory;
use crate::http::{Request, Response, X_SERVED_FROM};
use crate::net::SharedNetwork;
use crate::registry::PartitionKind;
use crate::store::{CacheRecord, SharedStorage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    CacheFirst,
    NetworkFirstWithCache,
    NetworkFirstWithOfflinePage,
}

impl Strategy {
    /// `None` for `Other`: those requests go straight to the network.
    pub fn for_category(category: RequestCategory) -> Option<Self> {
        match category {
            RequestCategory::StaticAsset => Some(Self::CacheFirst),
            RequestCategory::DataEndpoint => Some(Self::NetworkFirstWithCache),
            RequestCategory::PageNavigation => Some(Self::NetworkFirstWithOfflinePage),
            RequestCategory::Other => None,
        }
    }

    pub fn partition_kind(&self) -> PartitionKind {
        match self {
            Self::CacheFirst | Self::NetworkFirstWithOfflinePage => PartitionKind::Static,
            Self::NetworkFirstWithCache => PartitionKind::Data,
        }
    }
}

/// Storage and network handles shared by every strategy invocation.
/// Clone is cheap - both are `Arc`s.
#[derive(Clone)]
pub struct StrategyContext {
    storage: SharedStorage,
    network: SharedNetwork,
}

impl StrategyContext {
    pub fn new(storage: SharedStorage, network: SharedNetwork) -> Self {
        Self { storage, network }
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    pub fn network(&self) -> &SharedNetwork {
        &self.network
    }

    pub async fn run(&self, strategy: Strategy, request: &Request, partition: &str) -> Response {
        match strategy {
            Strategy::CacheFirst => self.cache_first(request, partition).await,
            Strategy::NetworkFirstWithCache => self.network_first_with_cache(request, partition).await,
            Strategy::NetworkFirstWithOfflinePage => {
                self.network_first_with_offline_page(request, partition).await
            }
        }
    }

    pub async fn cache_first(&self, request: &Request, partition: &str) -> Response {
        let key = request.cache_key();

        if let Some(record) = self.lookup(partition, &key).await {
            debug!(key = %key, partition, "Cache hit, refreshing in background");
            self.spawn_refresh(request.clone(), partition.to_string());
            return record.to_response();
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    self.store(partition, &key, &response).await;
                }
                response
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache first strategy failed");
                offline::content_unavailable()
            }
        }
    }

    pub async fn network_first_with_cache(&self, request: &Request, partition: &str) -> Response {
        let key = request.cache_key();

        match self.network.fetch(request).await {
            Ok(response) if response.is_success() => {
                self.store(partition, &key, &response).await;
                return response;
            }
            Ok(response) => {
                debug!(key = %key, status = response.status(), "Network response not ok, trying cache")
            }
            Err(e) => debug!(key = %key, error = %e, "Network failed, trying cache"),
        }

        match self.lookup(partition, &key).await {
            Some(record) => record.to_response().with_header(X_SERVED_FROM, "cache"),
            None => {
                debug!(key = %key, "No cached copy, serving offline payload");
                offline::data_unavailable()
            }
        }
    }

    pub async fn network_first_with_offline_page(&self, request: &Request, partition: &str) -> Response {
        let key = request.cache_key();

        match self.network.fetch(request).await {
            Ok(response) if response.is_success() => return response,
            Ok(response) => {
                debug!(key = %key, status = response.status(), "Page response not ok, trying cache")
            }
            Err(e) => debug!(key = %key, error = %e, "Page fetch failed, trying cache"),
        }

        match self.lookup(partition, &key).await {
            Some(record) => record.to_response(),
            None => offline::offline_page(),
        }
    }

    /// Fire-and-forget: never delays the caller's response.
    fn spawn_refresh(&self, request: Request, partition: String) {
        let ctx = self.clone();
        tokio::spawn(async move {
            let key = request.cache_key();
            match ctx.network.fetch(&request).await {
                Ok(response) if response.is_success() => {
                    ctx.store(&partition, &key, &response).await;
                }
                Ok(response) => {
                    debug!(key = %key, status = response.status(), "Background cache update skipped")
                }
                Err(e) => debug!(key = %key, error = %e, "Background cache update failed"),
            }
        });
    }

    /// Lookup errors are logged and treated as a miss.
    async fn lookup(&self, partition: &str, key: &str) -> Option<CacheRecord> {
        match self.storage.get(partition, key).await {
            Ok(record) => record,
            Err(e) => {
                warn!(key, partition, error = %e, "Cache lookup failed");
                None
            }
        }
    }

    /// Write errors are logged and swallowed; the response is served regardless.
    async fn store(&self, partition: &str, key: &str, response: &Response) -> bool {
        match self
            .storage
            .put(partition, CacheRecord::from_response(key, response))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(key, partition, error = %e, "Failed to cache response");
                false
            }
        }
    }
}

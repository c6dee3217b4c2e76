//! Message dispatch and the operations pages can trigger.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

use chrono::Utc;
use futures::future::try_join_all;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{CacheError, Result};
use crate::http::{cache_key, Request, Response, ACCEPT, CACHE_CONTROL};
use crate::message::{
    CacheStatus, CachedItem, Message, MessageEvent, Notification, PartitionStatus, SearchResults,
    StatusReply, SyncState,
};
use crate::registry::PartitionKind;
use crate::store::CacheRecord;
use crate::worker::Worker;

/// Reserved key of the sync timestamp record in the data partition.
pub const LAST_SYNC_PATH: &str = "/internal/last-sync";

/// Tag of the platform sync event that triggers a data sync.
pub const BACKGROUND_SYNC_TAG: &str = "background-sync";

const COUNTRY_MAX_AGE_SECS: u64 = 3600;
const SEARCH_MAX_AGE_SECS: u64 = 1800;

impl Worker {
    /// Entry point for everything a page posts. Never fails: malformed and
    /// unknown messages are logged and dropped.
    pub async fn handle_message(&self, event: MessageEvent) {
        let MessageEvent { data, reply } = event;

        let message = match Message::from_value(data) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed message");
                return;
            }
        };

        match message {
            Message::SyncData => {
                self.sync_data().await;
            }
            Message::ClearCache => {
                self.clear_cache().await;
            }
            Message::CacheCountryData { data } => {
                if let Err(e) = self.cache_country_data(&data).await {
                    warn!(error = %e, "Failed to cache country data");
                }
            }
            Message::CacheSearchResults { data } => {
                if let Err(e) = self.cache_search_results(&data).await {
                    warn!(error = %e, "Failed to cache search results");
                }
            }
            Message::GetCacheStatus => {
                let Some(reply) = reply else {
                    warn!("GET_CACHE_STATUS without a reply channel");
                    return;
                };
                let status = match self.cache_status().await {
                    Ok(status) => StatusReply::Status(status),
                    Err(e) => {
                        warn!(error = %e, "Failed to get cache status");
                        StatusReply::Error {
                            error: e.to_string(),
                        }
                    }
                };
                if reply.send(status).is_err() {
                    debug!("Status requester went away before the reply");
                }
            }
            Message::Unknown => debug!("Ignoring unknown message type"),
        }
    }

    /// Platform sync signal.
    pub async fn handle_sync_event(&self, tag: &str) -> Option<Notification> {
        if tag != BACKGROUND_SYNC_TAG {
            debug!(tag, "Ignoring sync event");
            return None;
        }
        self.sync_data().await
    }

    /// Refresh both critical data endpoints. `None` when offline (nothing is
    /// attempted); otherwise the notification that was broadcast.
    pub async fn sync_data(&self) -> Option<Notification> {
        if !self.connectivity.is_online() {
            debug!("Offline, skipping data sync");
            return None;
        }

        info!("Starting background sync");
        let result = self.run_sync().await;
        match result {
            Ok(()) => info!("Background sync complete"),
            Err(ref e) => warn!(error = %e, "Background sync failed"),
        }

        let notification = Notification::sync_complete(&result);
        self.notify(notification.clone());
        Some(notification)
    }

    async fn run_sync(&self) -> Result<()> {
        let urls = self.config.critical_data_urls()?;
        let requests: Vec<Request> = urls
            .into_iter()
            .map(|url| Request::get(url).with_header(ACCEPT, "application/json"))
            .collect();

        let responses = try_join_all(requests.iter().map(|request| self.fetch_ok(request))).await?;

        let partition = self.partition(PartitionKind::Data);
        try_join_all(requests.iter().zip(&responses).map(|(request, response)| {
            self.storage()
                .put(&partition, CacheRecord::from_response(request.cache_key(), response))
        }))
        .await?;

        self.set_last_sync(Utc::now().timestamp_millis()).await;
        Ok(())
    }

    /// Delete every partition in the namespace, whatever its version, and
    /// ask the host to re-install. The outcome is broadcast.
    pub async fn clear_cache(&self) -> Notification {
        let result = self.delete_namespaced().await;
        match result {
            Ok(()) => {
                info!("All caches cleared");
                self.update_requested.store(true, Ordering::SeqCst);
            }
            Err(ref e) => warn!(error = %e, "Failed to clear caches"),
        }

        let notification = Notification::cache_cleared(&result);
        self.notify(notification.clone());
        notification
    }

    async fn delete_namespaced(&self) -> Result<()> {
        let names = self.storage().partition_names().await?;
        for name in names.into_iter().filter(|n| self.owns_partition(n)) {
            self.storage().delete_partition(&name).await?;
            debug!(partition = %name, "Deleted cache");
        }
        Ok(())
    }

    /// Store one country record under `/countries/{id}`. Returns the key.
    pub async fn cache_country_data(&self, data: &Value) -> Result<String> {
        let id = match data.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                return Err(CacheError::Protocol(
                    "country record needs a string or numeric id".to_string(),
                ))
            }
        };
        // Dot segments would be dropped from the path and collide on /countries
        if id == "." || id == ".." {
            return Err(CacheError::Protocol(format!("invalid country id {:?}", id)));
        }

        let mut url = self.config.origin_url()?;
        url.path_segments_mut()
            .map_err(|_| CacheError::Config("origin cannot hold a path".to_string()))?
            .clear()
            .extend(["countries", id.as_str()]);

        let key = self.store_json(&url, data, COUNTRY_MAX_AGE_SECS).await?;
        info!(id = %id, "Cached country data");
        Ok(key)
    }

    /// Store search results under `/search?q={query}`. Returns the key.
    pub async fn cache_search_results(&self, search: &SearchResults) -> Result<String> {
        let url = search_key(&self.config.origin_url()?, &search.query);
        let key = self
            .store_json(&url, &search.results, SEARCH_MAX_AGE_SECS)
            .await?;
        info!(query = %search.query.trim(), "Cached search results");
        Ok(key)
    }

    async fn store_json(&self, url: &Url, value: &Value, max_age_secs: u64) -> Result<String> {
        let response = Response::json(200, value)
            .with_header(CACHE_CONTROL, format!("max-age={}", max_age_secs));
        let key = cache_key(url);
        self.storage()
            .put(
                &self.partition(PartitionKind::Data),
                CacheRecord::from_response(key.clone(), &response),
            )
            .await?;
        Ok(key)
    }

    /// Every namespaced partition with its keys, plus connectivity and the
    /// last sync time.
    pub async fn cache_status(&self) -> Result<CacheStatus> {
        let mut caches = BTreeMap::new();
        for name in self.storage().partition_names().await? {
            if !self.owns_partition(&name) {
                continue;
            }
            let items = self.storage().keys(&name).await?;
            caches.insert(
                name,
                PartitionStatus {
                    size: items.len(),
                    items,
                },
            );
        }

        Ok(CacheStatus {
            caches,
            is_online: self.connectivity.is_online(),
            last_sync: self.last_sync().await,
        })
    }

    /// Read a stored JSON record back, with its expiry hint evaluated.
    /// `key` may be absolute or origin-relative.
    pub async fn cached_item(&self, key: &str) -> Result<CachedItem> {
        let key = cache_key(&self.config.resolve(key)?);
        let record = self
            .storage()
            .get(&self.partition(PartitionKind::Data), &key)
            .await?
            .ok_or_else(|| CacheError::NotFound(key.clone()))?;

        let value: Value = serde_json::from_slice(&record.body)?;
        let now = Utc::now();
        Ok(CachedItem {
            expires_at: record.expires_at(),
            expired: record.is_expired_at(now),
            freshness: record.freshness_at(now),
            stored_at: record.stored_at,
            age: record.age_display_at(now),
            key,
            value,
        })
    }

    /// Epoch millis of the last successful sync. Read failures count as
    /// never synced.
    pub async fn last_sync(&self) -> Option<i64> {
        let key = match self.config.resolve(LAST_SYNC_PATH) {
            Ok(url) => cache_key(&url),
            Err(e) => {
                warn!(error = %e, "Invalid last sync key");
                return None;
            }
        };

        match self
            .storage()
            .get(&self.partition(PartitionKind::Data), &key)
            .await
        {
            Ok(Some(record)) => match serde_json::from_slice::<SyncState>(&record.body) {
                Ok(state) => state.timestamp,
                Err(e) => {
                    debug!(error = %e, "Unreadable sync state");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                debug!(error = %e, "No last sync time found");
                None
            }
        }
    }

    async fn set_last_sync(&self, timestamp: i64) {
        let url = match self.config.resolve(LAST_SYNC_PATH) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Invalid last sync key");
                return;
            }
        };

        let state = SyncState {
            timestamp: Some(timestamp),
        };
        let response = match serde_json::to_value(state) {
            Ok(value) => Response::json(200, &value),
            Err(e) => {
                warn!(error = %e, "Failed to encode sync state");
                return;
            }
        };

        let record = CacheRecord::from_response(cache_key(&url), &response);
        if let Err(e) = self
            .storage()
            .put(&self.partition(PartitionKind::Data), record)
            .await
        {
            warn!(error = %e, "Failed to set last sync time");
        }
    }
}

/// `/search?q=...` with the trimmed query form-encoded.
pub fn search_key(origin: &Url, query: &str) -> Url {
    let mut url = origin.clone();
    url.set_path("/search");
    url.set_fragment(None);
    url.query_pairs_mut().clear().append_pair("q", query.trim());
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::registry::PartitionRegistry;
    use crate::store::{CacheStorage, MemoryStorage};
    use crate::test_support::{config_with_assets, url, FailingStorage, ScriptedNetwork, ORIGIN};

    const DATA: &str = "openpiimap-data-v1";

    async fn active_worker(storage: Arc<dyn CacheStorage>, network: Arc<ScriptedNetwork>) -> Worker {
        network.respond("/a.css", 200, "a{}");
        let worker = Worker::new(
            config_with_assets(&["/a.css"]),
            PartitionRegistry::shared("openpiimap"),
            storage,
            network,
        )
        .unwrap();
        worker.install_and_activate().await.unwrap();
        worker
    }

    async fn status(worker: &Worker) -> CacheStatus {
        let (event, rx) = MessageEvent::with_reply(json!({"type": "GET_CACHE_STATUS"}));
        worker.handle_message(event).await;
        match rx.await.unwrap() {
            StatusReply::Status(status) => status,
            StatusReply::Error { error } => panic!("status failed: {}", error),
        }
    }

    #[test]
    fn test_search_key_trims_and_encodes() {
        let origin = Url::parse(ORIGIN).unwrap();
        assert_eq!(
            search_key(&origin, "  data protection  ").as_str(),
            "https://openpiimap.org/search?q=data+protection"
        );
        assert_eq!(
            search_key(&origin, "a&b=c").as_str(),
            "https://openpiimap.org/search?q=a%26b%3Dc"
        );
    }

    #[tokio::test]
    async fn test_clear_cache_twice_leaves_store_empty() {
        let storage = Arc::new(MemoryStorage::new());
        storage.open("openpiimap-static-v0").await.unwrap();
        storage.open("elsewhere").await.unwrap();
        let worker = active_worker(storage.clone(), ScriptedNetwork::new()).await;
        let mut notifications = worker.subscribe();

        for _ in 0..2 {
            worker
                .handle_message(MessageEvent::new(json!({"type": "CLEAR_CACHE"})))
                .await;
            assert_eq!(
                notifications.recv().await.unwrap(),
                Notification::CacheCleared {
                    success: true,
                    error: None
                }
            );
        }

        assert_eq!(storage.partition_names().await.unwrap(), vec!["elsewhere"]);
        assert!(status(&worker).await.caches.is_empty());
        assert!(worker.take_update_request());
    }

    #[tokio::test]
    async fn test_clear_cache_storage_failure_is_reported() {
        let storage = FailingStorage::new();
        let worker = active_worker(storage.clone(), ScriptedNetwork::new()).await;
        storage.fail_deletes(true);

        let notification = worker.clear_cache().await;
        match notification {
            Notification::CacheCleared { success, error } => {
                assert!(!success);
                assert!(error.unwrap().contains("delete rejected"));
            }
            other => panic!("unexpected notification: {:?}", other),
        }
        assert!(!worker.take_update_request());
    }

    #[tokio::test]
    async fn test_cached_country_shows_in_status() {
        let storage = Arc::new(MemoryStorage::new());
        let worker = active_worker(storage.clone(), ScriptedNetwork::new()).await;

        worker
            .handle_message(MessageEvent::new(json!({
                "type": "CACHE_COUNTRY_DATA",
                "data": {"id": "DE", "name": "Germany", "frameworks": ["GDPR", "BDSG"]}
            })))
            .await;

        let status = status(&worker).await;
        let data = &status.caches[DATA];
        assert!(data.items.contains(&url("/countries/DE").to_string()));
        assert_eq!(data.size, data.items.len());
        assert!(status.is_online);
        assert_eq!(status.last_sync, None);

        let record = storage.get(DATA, url("/countries/DE").as_str()).await.unwrap().unwrap();
        assert_eq!(record.max_age(), Some(chrono::Duration::seconds(3600)));
        assert_eq!(
            record.to_response().content_type(),
            Some("application/json")
        );
    }

    #[tokio::test]
    async fn test_numeric_country_id_and_missing_id() {
        let worker = active_worker(Arc::new(MemoryStorage::new()), ScriptedNetwork::new()).await;

        let key = worker
            .cache_country_data(&json!({"id": 276, "name": "Germany"}))
            .await
            .unwrap();
        assert_eq!(key, url("/countries/276").to_string());

        let err = worker
            .cache_country_data(&json!({"name": "Nowhere"}))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_dot_country_ids_are_rejected() {
        let storage = Arc::new(MemoryStorage::new());
        let worker = active_worker(storage.clone(), ScriptedNetwork::new()).await;
        let before = storage.keys(DATA).await.unwrap();

        for id in [".", ".."] {
            let err = worker
                .cache_country_data(&json!({"id": id}))
                .await
                .unwrap_err();
            assert!(matches!(err, CacheError::Protocol(_)), "id {:?}", id);
        }
        assert_eq!(storage.keys(DATA).await.unwrap(), before);

        let key = worker.cache_country_data(&json!({"id": "a.b"})).await.unwrap();
        assert_eq!(key, url("/countries/a.b").to_string());
    }

    #[tokio::test]
    async fn test_cached_search_results_can_be_read_back() {
        let worker = active_worker(Arc::new(MemoryStorage::new()), ScriptedNetwork::new()).await;
        worker
            .handle_message(MessageEvent::new(json!({
                "type": "CACHE_SEARCH_RESULTS",
                "data": {"query": " gdpr ", "results": [{"id": "EU"}]}
            })))
            .await;

        let item = worker.cached_item("/search?q=gdpr").await.unwrap();
        assert_eq!(item.value, json!([{"id": "EU"}]));
        assert!(!item.expired);
        assert_eq!(item.age, "just now");
        assert!(item.expires_at.unwrap() > item.stored_at);
        assert!(item.freshness.unwrap().starts_with("fresh for "));

        assert!(matches!(
            worker.cached_item("/search?q=ccpa").await,
            Err(CacheError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cached_item_with_huge_max_age_has_no_expiry() {
        let storage = Arc::new(MemoryStorage::new());
        let worker = active_worker(storage.clone(), ScriptedNetwork::new()).await;
        let response = Response::json(200, &json!({"ok": true}))
            .with_header(CACHE_CONTROL, "max-age=100000000000000");
        storage
            .put(
                DATA,
                CacheRecord::from_response(url("/api/x").to_string(), &response),
            )
            .await
            .unwrap();

        let item = worker.cached_item("/api/x").await.unwrap();
        assert_eq!(item.value, json!({"ok": true}));
        assert_eq!(item.expires_at, None);
        assert_eq!(item.freshness, None);
        assert!(!item.expired);
    }

    #[tokio::test]
    async fn test_sync_offline_is_a_no_op() {
        let network = ScriptedNetwork::new();
        let worker = active_worker(Arc::new(MemoryStorage::new()), network.clone()).await;
        let before = network.calls_to("/json/countries.json");
        worker.set_online(false);

        assert_eq!(worker.sync_data().await, None);
        assert_eq!(network.calls_to("/json/countries.json"), before);
    }

    #[tokio::test]
    async fn test_sync_success_stores_and_notifies() {
        let network = ScriptedNetwork::new();
        let storage = Arc::new(MemoryStorage::new());
        let worker = active_worker(storage.clone(), network.clone()).await;
        network.respond_json("/json/countries.json", json!({"countries": ["DE"]}));
        network.respond_json("/json/frameworks.json", json!({"frameworks": ["GDPR"]}));
        let mut notifications = worker.subscribe();

        worker
            .handle_message(MessageEvent::new(json!({"type": "SYNC_DATA"})))
            .await;

        assert_eq!(
            notifications.recv().await.unwrap(),
            Notification::SyncComplete {
                success: true,
                error: None
            }
        );
        let stored = storage
            .get(DATA, url("/json/countries.json").as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.body, br#"{"countries":["DE"]}"#);
        assert!(status(&worker).await.last_sync.is_some());
    }

    #[tokio::test]
    async fn test_sync_failure_notifies_with_error() {
        let network = ScriptedNetwork::new();
        let worker = active_worker(Arc::new(MemoryStorage::new()), network.clone()).await;
        network.respond_json("/json/countries.json", json!({"countries": []}));
        network.fail("/json/frameworks.json");
        let mut notifications = worker.subscribe();

        worker.handle_sync_event(BACKGROUND_SYNC_TAG).await;

        match notifications.recv().await.unwrap() {
            Notification::SyncComplete { success, error } => {
                assert!(!success);
                assert!(error.is_some());
            }
            other => panic!("unexpected notification: {:?}", other),
        }
        assert_eq!(worker.last_sync().await, None);
    }

    #[tokio::test]
    async fn test_other_sync_tags_are_ignored() {
        let network = ScriptedNetwork::new();
        let worker = active_worker(Arc::new(MemoryStorage::new()), network.clone()).await;
        let before = network.calls_to("/json/frameworks.json");

        assert_eq!(worker.handle_sync_event("periodic-refresh").await, None);
        assert_eq!(network.calls_to("/json/frameworks.json"), before);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_messages_are_ignored() {
        let storage = Arc::new(MemoryStorage::new());
        let worker = active_worker(storage.clone(), ScriptedNetwork::new()).await;
        let before = status(&worker).await;

        worker
            .handle_message(MessageEvent::new(json!({"type": "SKIP_WAITING"})))
            .await;
        worker
            .handle_message(MessageEvent::new(json!({"type": "CACHE_COUNTRY_DATA"})))
            .await;
        worker.handle_message(MessageEvent::new(json!("not an object"))).await;

        assert_eq!(status(&worker).await, before);
    }

    #[tokio::test]
    async fn test_status_without_reply_channel_is_ignored() {
        let worker = active_worker(Arc::new(MemoryStorage::new()), ScriptedNetwork::new()).await;
        worker
            .handle_message(MessageEvent::new(json!({"type": "GET_CACHE_STATUS"})))
            .await;
    }

    #[tokio::test]
    async fn test_status_reports_offline() {
        let worker = active_worker(Arc::new(MemoryStorage::new()), ScriptedNetwork::new()).await;
        worker.set_online(false);
        assert!(!status(&worker).await.is_online);
    }
}

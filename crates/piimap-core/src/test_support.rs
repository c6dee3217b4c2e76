//! Scripted collaborators for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::http::{Request, Response};
use crate::net::Network;
use crate::store::{CacheRecord, CacheStorage, MemoryStorage};

pub(crate) const ORIGIN: &str = "https://openpiimap.org/";

pub(crate) fn url(path: &str) -> url::Url {
    url::Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

pub(crate) fn config_with_assets(assets: &[&str]) -> Config {
    Config {
        origin: ORIGIN.to_string(),
        assets: assets.iter().map(|a| a.to_string()).collect(),
        ..Config::default()
    }
}

#[derive(Clone)]
enum Reply {
    Respond(Response),
    Fail,
    Hang,
}

/// Network that answers from a per-URL script. Unscripted URLs get a 404.
#[derive(Default)]
pub(crate) struct ScriptedNetwork {
    replies: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<String>>,
    offline: AtomicBool,
}

impl ScriptedNetwork {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn script(&self, path: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .insert(url(path).to_string(), reply);
    }

    pub(crate) fn respond(&self, path: &str, status: u16, body: &str) {
        self.script(path, Reply::Respond(Response::new(status, body)));
    }

    pub(crate) fn respond_json(&self, path: &str, value: serde_json::Value) {
        self.script(path, Reply::Respond(Response::json(200, &value)));
    }

    pub(crate) fn fail(&self, path: &str) {
        self.script(path, Reply::Fail);
    }

    pub(crate) fn hang(&self, path: &str) {
        self.script(path, Reply::Hang);
    }

    /// Every fetch fails until `go_online`.
    pub(crate) fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    pub(crate) fn go_online(&self) {
        self.offline.store(false, Ordering::SeqCst);
    }

    pub(crate) fn calls_to(&self, path: &str) -> usize {
        let target = url(path).to_string();
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| **c == target)
            .count()
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let key = request.url().to_string();
        self.calls.lock().unwrap().push(key.clone());

        if self.offline.load(Ordering::SeqCst) {
            return Err(CacheError::Network("offline".to_string()));
        }

        let reply = self.replies.lock().unwrap().get(&key).cloned();
        match reply {
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::Fail) => Err(CacheError::Network(format!("connection refused: {}", key))),
            Some(Reply::Hang) => futures::future::pending().await,
            None => Ok(Response::new(404, "not found")),
        }
    }
}

/// Memory storage whose writes and deletes can be switched to fail.
#[derive(Default)]
pub(crate) struct FailingStorage {
    inner: MemoryStorage,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
}

impl FailingStorage {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheStorage for FailingStorage {
    async fn partition_names(&self) -> Result<Vec<String>> {
        self.inner.partition_names().await
    }

    async fn has_partition(&self, partition: &str) -> Result<bool> {
        self.inner.has_partition(partition).await
    }

    async fn open(&self, partition: &str) -> Result<()> {
        self.inner.open(partition).await
    }

    async fn delete_partition(&self, partition: &str) -> Result<bool> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(CacheError::Storage("delete rejected".to_string()));
        }
        self.inner.delete_partition(partition).await
    }

    async fn put(&self, partition: &str, record: CacheRecord) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::Storage("quota exceeded".to_string()));
        }
        self.inner.put(partition, record).await
    }

    async fn get(&self, partition: &str, key: &str) -> Result<Option<CacheRecord>> {
        self.inner.get(partition, key).await
    }

    async fn keys(&self, partition: &str) -> Result<Vec<String>> {
        self.inner.keys(partition).await
    }
}

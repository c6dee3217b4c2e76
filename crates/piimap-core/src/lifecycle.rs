//! Worker lifecycle: install, activate, resume.
//!
//! Install pre-populates this version's partitions without touching what is
//! current. Activate promotes the version in the registry and only then
//! evicts older partitions in the namespace, so the registry never points at
//! a deleted partition. Partitions of a newer version waiting to activate
//! are left alone.

use std::sync::PoisonError;

use futures::future::{join_all, try_join_all};
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{CacheError, Result};
use crate::http::{cache_key, Request, ACCEPT};
use crate::registry::PartitionKind;
use crate::store::CacheRecord;
use crate::worker::{read_registry, write_registry, Worker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Uninstalled,
    Installing,
    Installed,
    Active,
    /// A newer version took control; fetches are no longer intercepted.
    Superseded,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Uninstalled => "uninstalled",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Active => "active",
            Self::Superseded => "superseded",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    /// Manifest entries stored in the static partition.
    pub precached: usize,
    /// Critical data endpoints stored in the data partition.
    pub data_cached: usize,
    /// Always true: a new version activates without waiting for old pages.
    pub skip_waiting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationReport {
    /// Stale partitions whose deletion completed.
    pub deleted: Vec<String>,
    /// Partitions now authoritative.
    pub current: Vec<String>,
}

impl Worker {
    pub async fn install(&self) -> Result<InstallReport> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != LifecycleState::Uninstalled {
                return Err(CacheError::InvalidState {
                    expected: LifecycleState::Uninstalled.to_string(),
                    actual: state.to_string(),
                });
            }
            *state = LifecycleState::Installing;
        }

        let version = self.version();
        write_registry(&self.registry).stage(version);
        info!(version, "Installing worker");

        let precached = match self.precache_assets().await {
            Ok(count) => count,
            Err(e) => {
                warn!(version, error = %e, "Install failed, nothing was cached");
                write_registry(&self.registry).unstage(version);
                self.set_state(LifecycleState::Uninstalled);
                return Err(e);
            }
        };
        let data_cached = self.precache_critical_data().await;

        self.set_state(LifecycleState::Installed);
        info!(version, precached, data_cached, "Worker installed");

        Ok(InstallReport {
            precached,
            data_cached,
            skip_waiting: true,
        })
    }

    pub async fn activate(&self) -> Result<ActivationReport> {
        let state = self.state();
        if !matches!(state, LifecycleState::Installed | LifecycleState::Active) {
            return Err(CacheError::InvalidState {
                expected: LifecycleState::Installed.to_string(),
                actual: state.to_string(),
            });
        }

        let version = self.version();
        let static_partition = self.own_partition(PartitionKind::Static);
        if !self.storage().has_partition(&static_partition).await? {
            return Err(CacheError::NotInstalled(version));
        }

        let current: Vec<String> = write_registry(&self.registry)
            .promote(version)?
            .iter()
            .map(|id| id.name())
            .collect();
        self.set_state(LifecycleState::Active);

        let deleted = self.evict_stale(version, &current).await;
        info!(version, deleted = deleted.len(), "Worker activated");

        Ok(ActivationReport { deleted, current })
    }

    /// Install and, since install always asks to skip waiting, activate.
    pub async fn install_and_activate(&self) -> Result<(InstallReport, ActivationReport)> {
        let install = self.install().await?;
        let activation = self.activate().await?;
        Ok((install, activation))
    }

    /// Bring back a version installed by an earlier process, without
    /// fetching anything.
    pub async fn resume(&self) -> Result<ActivationReport> {
        let static_partition = self.own_partition(PartitionKind::Static);
        if !self.storage().has_partition(&static_partition).await? {
            return Err(CacheError::NotInstalled(self.version()));
        }

        let state = self.state();
        if state == LifecycleState::Uninstalled {
            self.set_state(LifecycleState::Installed);
        }
        debug!(version = self.version(), "Resuming installed worker");
        self.activate().await
    }

    /// Fetch the whole manifest before storing anything. Any failure aborts.
    async fn precache_assets(&self) -> Result<usize> {
        let urls = self.config.asset_urls()?;
        let responses = try_join_all(
            urls.iter()
                .map(|url| async move { self.fetch_ok(&Request::get(url.clone())).await }),
        )
        .await?;

        let partition = self.own_partition(PartitionKind::Static);
        self.storage().open(&partition).await?;

        let mut stored = 0;
        for (url, response) in urls.iter().zip(responses) {
            let key = cache_key(url);
            match self
                .storage()
                .put(&partition, CacheRecord::from_response(key, &response))
                .await
            {
                Ok(()) => stored += 1,
                Err(e) => warn!(url = %url, error = %e, "Failed to precache asset"),
            }
        }
        Ok(stored)
    }

    /// Best effort: failures are logged and the install proceeds.
    async fn precache_critical_data(&self) -> usize {
        let urls: Vec<Url> = match self.config.critical_data_urls() {
            Ok(urls) => urls,
            Err(e) => {
                warn!(error = %e, "Invalid critical data URL");
                return 0;
            }
        };

        let partition = self.own_partition(PartitionKind::Data);
        let partition = partition.as_str();
        let results = join_all(urls.iter().map(|url| async move {
            let request = Request::get(url.clone()).with_header(ACCEPT, "application/json");
            let response = self.fetch_ok(&request).await?;
            self.storage()
                .put(partition, CacheRecord::from_response(request.cache_key(), &response))
                .await
        }))
        .await;

        let mut cached = 0;
        for (url, result) in urls.iter().zip(results) {
            match result {
                Ok(()) => cached += 1,
                Err(e) => warn!(url = %url, error = %e, "Failed to cache initial data"),
            }
        }
        cached
    }

    /// Delete namespaced partitions older than `version`, plus unversioned
    /// ones. Current and staged partitions are kept. A partition is reported
    /// only after its deletion completed.
    async fn evict_stale(&self, version: u32, current: &[String]) -> Vec<String> {
        let names = match self.storage().partition_names().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Could not enumerate partitions for eviction");
                return Vec::new();
            }
        };

        let stale: Vec<String> = {
            let registry = read_registry(&self.registry);
            names
                .into_iter()
                .filter(|name| registry.owns(name) && !current.contains(name))
                .filter(|name| match registry.version_of(name) {
                    Some(v) => v < version && !registry.is_staged(v),
                    None => true,
                })
                .collect()
        };

        let mut deleted = Vec::new();
        for name in stale {
            match self.storage().delete_partition(&name).await {
                Ok(true) => {
                    info!(partition = %name, "Deleted old cache");
                    deleted.push(name);
                }
                Ok(false) => {}
                Err(e) => warn!(partition = %name, error = %e, "Failed to delete old cache"),
            }
        }
        deleted
    }
}

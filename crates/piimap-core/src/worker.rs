//! The worker: one versioned instance of the caching engine.
//!
//! A `Worker` owns its configuration, classifier and lifecycle state and
//! shares the partition registry, storage and network with every other
//! worker of the same origin. Fetch interception lives here; install and
//! activate live in `lifecycle`, message dispatch in `router`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;
use tracing::debug;

use crate::classify::Classifier;
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::http::{Request, Response};
use crate::lifecycle::LifecycleState;
use crate::message::Notification;
use crate::net::{Connectivity, SharedNetwork};
use crate::registry::{PartitionKind, PartitionRegistry, SharedRegistry};
use crate::store::SharedStorage;
use crate::strategy::{Strategy, StrategyContext};

/// Capacity of the page notification channel. Slow subscribers that fall
/// further behind than this miss notifications.
const NOTIFICATION_CAPACITY: usize = 32;

/// What the worker did with an intercepted fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not intercepted: a non-GET request, or this worker is not controlling.
    Bypass,
    /// Answered by one of the caching strategies. Never an error.
    Served(Response),
    /// `other` category: passed to the network as-is, no caching or fallback.
    Forwarded(Result<Response>),
}

impl FetchOutcome {
    pub fn is_intercepted(&self) -> bool {
        !matches!(self, Self::Bypass)
    }
}

pub struct Worker {
    pub(crate) config: Config,
    pub(crate) classifier: Classifier,
    pub(crate) registry: SharedRegistry,
    pub(crate) strategies: StrategyContext,
    pub(crate) connectivity: Connectivity,
    pub(crate) state: Mutex<LifecycleState>,
    pub(crate) notifications: broadcast::Sender<Notification>,
    pub(crate) update_requested: AtomicBool,
}

impl Worker {
    pub fn new(
        config: Config,
        registry: SharedRegistry,
        storage: SharedStorage,
        network: SharedNetwork,
    ) -> Result<Self> {
        config.validate()?;

        let namespace = read_registry(&registry).namespace().to_string();
        if namespace != config.namespace {
            return Err(CacheError::Config(format!(
                "registry namespace '{}' does not match configured namespace '{}'",
                namespace, config.namespace
            )));
        }

        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Ok(Self {
            classifier: Classifier::from_config(&config),
            config,
            registry,
            strategies: StrategyContext::new(storage, network),
            connectivity: Connectivity::default(),
            state: Mutex::new(LifecycleState::Uninstalled),
            notifications,
            update_requested: AtomicBool::new(false),
        })
    }

    /// Share an existing connectivity flag instead of the default (online).
    pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn version(&self) -> u32 {
        self.config.version
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn storage(&self) -> &SharedStorage {
        self.strategies.storage()
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Platform online/offline signal.
    pub fn set_online(&self, online: bool) {
        if self.connectivity.set_online(online) != online {
            debug!(online, "Connectivity changed");
        }
    }

    /// Page contexts subscribe here to receive notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    pub(crate) fn notify(&self, notification: Notification) {
        if self.notifications.send(notification).is_err() {
            debug!("No page contexts subscribed, notification dropped");
        }
    }

    /// Set by clear-cache. The host answers it by re-installing.
    pub fn take_update_request(&self) -> bool {
        self.update_requested.swap(false, Ordering::SeqCst)
    }

    pub fn state(&self) -> LifecycleState {
        let state = *self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state == LifecycleState::Active {
            if let Some(controller) = read_registry(&self.registry).controller() {
                if controller > self.version() {
                    return LifecycleState::Superseded;
                }
            }
        }
        state
    }

    pub(crate) fn set_state(&self, state: LifecycleState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Active and still the version the registry says controls pages.
    pub fn is_controlling(&self) -> bool {
        self.state() == LifecycleState::Active
            && read_registry(&self.registry).controller() == Some(self.version())
    }

    /// Physical name of the authoritative partition of `kind`, falling back
    /// to this worker's own version before the first activation.
    pub fn partition(&self, kind: PartitionKind) -> String {
        let registry = read_registry(&self.registry);
        registry
            .current(kind)
            .unwrap_or_else(|| registry.partition(kind, self.version()))
            .name()
    }

    /// This worker's own partition of `kind`, regardless of what is current.
    pub(crate) fn own_partition(&self, kind: PartitionKind) -> String {
        read_registry(&self.registry)
            .partition(kind, self.version())
            .name()
    }

    pub(crate) fn owns_partition(&self, name: &str) -> bool {
        read_registry(&self.registry).owns(name)
    }

    pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
        if !self.is_controlling() {
            return FetchOutcome::Bypass;
        }
        let Some(category) = self.classifier.classify(request) else {
            return FetchOutcome::Bypass;
        };

        debug!(url = %request.url(), category = %category, "Intercepted fetch");
        match Strategy::for_category(category) {
            Some(strategy) => {
                let partition = self.partition(strategy.partition_kind());
                FetchOutcome::Served(self.strategies.run(strategy, request, &partition).await)
            }
            None => FetchOutcome::Forwarded(self.strategies.network().fetch(request).await),
        }
    }

    /// Fetch that treats a non-success status as a failure.
    pub(crate) async fn fetch_ok(&self, request: &Request) -> Result<Response> {
        let response = self.strategies.network().fetch(request).await?;
        if !response.is_success() {
            return Err(CacheError::from_status(
                response.status(),
                request.url().as_str(),
            ));
        }
        Ok(response)
    }
}

/// Registry guards never span an `.await`, so a poisoned lock still holds
/// consistent data.
pub(crate) fn read_registry(registry: &SharedRegistry) -> RwLockReadGuard<'_, PartitionRegistry> {
    registry.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_registry(registry: &SharedRegistry) -> RwLockWriteGuard<'_, PartitionRegistry> {
    registry.write().unwrap_or_else(PoisonError::into_inner)
}

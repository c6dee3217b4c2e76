//! Offline caching engine for the OpenPIIMap reference site.
//!
//! A `Worker` intercepts the site's requests, classifies them and answers
//! each category with its own strategy against versioned cache partitions:
//!
//! - static assets: cache first, refreshed in the background
//! - data endpoints: network first, falling back to the last stored copy
//! - page navigations: network first, falling back to an offline page
//!
//! Pages talk to the worker through `handle_message` and receive
//! notifications from `subscribe`.

pub mod classify;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod message;
pub mod net;
pub mod registry;
pub mod router;
pub mod store;
pub mod strategy;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use classify::{Classifier, RequestCategory};
pub use config::Config;
pub use error::{CacheError, Result};
pub use http::{Request, Response};
pub use lifecycle::{ActivationReport, InstallReport, LifecycleState};
pub use message::{CacheStatus, Message, MessageEvent, Notification, StatusReply};
pub use net::{Connectivity, HttpNetwork, Network};
pub use registry::{PartitionKind, PartitionRegistry, SharedRegistry};
pub use store::{CacheRecord, CacheStorage, DiskStorage, MemoryStorage};
pub use worker::{FetchOutcome, Worker};

//! Network access for the strategies.
//!
//! This module provides:
//! - `Network`: the fetch seam every strategy goes through
//! - `HttpNetwork`: the reqwest-backed implementation
//! - `Connectivity`: the shared online/offline flag consulted by sync

pub mod client;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::http::{Request, Response};

pub use client::HttpNetwork;

#[async_trait]
pub trait Network: Send + Sync {
    /// Returns `Ok` for every HTTP response, including non-success statuses.
    /// `Err(CacheError::Network)` means no response arrived at all.
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

pub type SharedNetwork = Arc<dyn Network>;

/// Last connectivity state reported by the platform.
#[derive(Debug, Clone)]
pub struct Connectivity {
    online: Arc<AtomicBool>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Returns the previous state.
    pub fn set_online(&self, online: bool) -> bool {
        self.online.swap(online, Ordering::SeqCst)
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

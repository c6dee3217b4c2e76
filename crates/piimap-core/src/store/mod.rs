//! Partitioned response storage.
//!
//! This module provides the `CacheStorage` trait, the Rust-side counterpart of
//! the browser's Cache Storage: a set of named partitions, each mapping a
//! request key (absolute URL) to a `CacheRecord`.
//!
//! Two backends are available:
//! - `MemoryStorage`: process-lifetime storage
//! - `DiskStorage`: one directory per partition, one JSON file per record
//!
//! A `put` either replaces the whole record or fails leaving the previous
//! record in place. Concurrent puts to the same key race; the last one to
//! complete wins.

pub mod disk;
pub mod memory;
pub mod record;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;
pub use record::CacheRecord;

#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// All partition names, sorted.
    async fn partition_names(&self) -> Result<Vec<String>>;

    async fn has_partition(&self, partition: &str) -> Result<bool>;

    /// Create the partition if it does not exist yet.
    async fn open(&self, partition: &str) -> Result<()>;

    /// Returns `true` if a partition was removed.
    async fn delete_partition(&self, partition: &str) -> Result<bool>;

    /// Store a record, creating the partition if needed.
    async fn put(&self, partition: &str, record: CacheRecord) -> Result<()>;

    async fn get(&self, partition: &str, key: &str) -> Result<Option<CacheRecord>>;

    /// Keys stored in a partition, sorted. Empty for a missing partition.
    async fn keys(&self, partition: &str) -> Result<Vec<String>>;
}

pub type SharedStorage = Arc<dyn CacheStorage>;

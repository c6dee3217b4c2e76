use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use super::{CacheRecord, CacheStorage};
use crate::error::{CacheError, Result};

type Partition = BTreeMap<String, CacheRecord>;

#[derive(Debug, Default)]
pub struct MemoryStorage {
    partitions: RwLock<HashMap<String, Partition>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> CacheError {
        CacheError::Storage("memory storage lock poisoned".to_string())
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn partition_names(&self) -> Result<Vec<String>> {
        let partitions = self.partitions.read().map_err(|_| Self::poisoned())?;
        let mut names: Vec<String> = partitions.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn has_partition(&self, partition: &str) -> Result<bool> {
        let partitions = self.partitions.read().map_err(|_| Self::poisoned())?;
        Ok(partitions.contains_key(partition))
    }

    async fn open(&self, partition: &str) -> Result<()> {
        let mut partitions = self.partitions.write().map_err(|_| Self::poisoned())?;
        partitions.entry(partition.to_string()).or_default();
        Ok(())
    }

    async fn delete_partition(&self, partition: &str) -> Result<bool> {
        let mut partitions = self.partitions.write().map_err(|_| Self::poisoned())?;
        Ok(partitions.remove(partition).is_some())
    }

    async fn put(&self, partition: &str, record: CacheRecord) -> Result<()> {
        let mut partitions = self.partitions.write().map_err(|_| Self::poisoned())?;
        partitions
            .entry(partition.to_string())
            .or_default()
            .insert(record.key.clone(), record);
        Ok(())
    }

    async fn get(&self, partition: &str, key: &str) -> Result<Option<CacheRecord>> {
        let partitions = self.partitions.read().map_err(|_| Self::poisoned())?;
        Ok(partitions
            .get(partition)
            .and_then(|records| records.get(key))
            .cloned())
    }

    async fn keys(&self, partition: &str) -> Result<Vec<String>> {
        let partitions = self.partitions.read().map_err(|_| Self::poisoned())?;
        Ok(partitions
            .get(partition)
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default())
    }
}

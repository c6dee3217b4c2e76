use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{CacheRecord, CacheStorage};
use crate::error::{CacheError, Result};

const RECORD_EXTENSION: &str = "json";

/// Disk-backed storage: `<root>/<partition>/<sha256(key)>.json`.
///
/// Each record is written to a uniquely named temp file and renamed into
/// place, so readers see either the previous record or the new one.
pub struct DiskStorage {
    root: PathBuf,
    write_seq: AtomicU64,
}

impl DiskStorage {
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)
            .map_err(|e| CacheError::storage(&format!("create {}", root.display()), e))?;
        Ok(Self {
            root,
            write_seq: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_path(&self, partition: &str) -> Result<PathBuf> {
        if partition.is_empty()
            || partition.starts_with('.')
            || partition.contains(['/', '\\'])
        {
            return Err(CacheError::Storage(format!(
                "invalid partition name '{}'",
                partition
            )));
        }
        Ok(self.root.join(partition))
    }

    fn record_path(&self, partition: &str, key: &str) -> Result<PathBuf> {
        Ok(self
            .partition_path(partition)?
            .join(format!("{}.{}", record_file_stem(key), RECORD_EXTENSION)))
    }

    async fn read_record(path: &Path) -> Result<Option<CacheRecord>> {
        let contents = match tokio::fs::read(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::storage(&format!("read {}", path.display()), e)),
        };
        let record: CacheRecord = serde_json::from_slice(&contents)
            .map_err(|e| CacheError::storage(&format!("parse {}", path.display()), e))?;
        Ok(Some(record))
    }
}

fn record_file_stem(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn partition_names(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| CacheError::storage("list partitions", e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn has_partition(&self, partition: &str) -> Result<bool> {
        let path = self.partition_path(partition)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::storage(&format!("stat {}", path.display()), e)),
        }
    }

    async fn open(&self, partition: &str) -> Result<()> {
        let path = self.partition_path(partition)?;
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| CacheError::storage(&format!("open {}", partition), e))
    }

    async fn delete_partition(&self, partition: &str) -> Result<bool> {
        let path = self.partition_path(partition)?;
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {
                debug!(partition, "Partition removed from disk");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::storage(&format!("delete {}", partition), e)),
        }
    }

    async fn put(&self, partition: &str, record: CacheRecord) -> Result<()> {
        self.open(partition).await?;

        let path = self.record_path(partition, &record.key)?;
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("{}.{}.tmp", std::process::id(), seq));
        let contents = serde_json::to_vec(&record)?;

        if let Err(e) = tokio::fs::write(&tmp, &contents).await {
            return Err(CacheError::storage(&format!("write {}", record.key), e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                warn!(error = %cleanup, "Failed to remove temp record file");
            }
            return Err(CacheError::storage(&format!("commit {}", record.key), e));
        }
        Ok(())
    }

    async fn get(&self, partition: &str, key: &str) -> Result<Option<CacheRecord>> {
        let path = self.record_path(partition, key)?;
        Ok(Self::read_record(&path)
            .await?
            .filter(|record| record.key == key))
    }

    async fn keys(&self, partition: &str) -> Result<Vec<String>> {
        let dir = self.partition_path(partition)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::storage(&format!("list {}", partition), e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match Self::read_record(&path).await {
                Ok(Some(record)) => keys.push(record.key),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Skipping unreadable record"),
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Headers;

    fn record(key: &str, body: &[u8]) -> CacheRecord {
        CacheRecord::new(key, 200, Headers::new(), body.to_vec())
    }

    #[tokio::test]
    async fn test_put_get_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let key = "https://openpiimap.org/json/countries.json";
        {
            let storage = DiskStorage::new(dir.path().to_path_buf()).unwrap();
            storage
                .put("openpiimap-data-v1", record(key, b"{\"countries\":[]}"))
                .await
                .unwrap();
        }

        let storage = DiskStorage::new(dir.path().to_path_buf()).unwrap();
        let stored = storage.get("openpiimap-data-v1", key).await.unwrap().unwrap();
        assert_eq!(stored.body, b"{\"countries\":[]}");
        assert_eq!(storage.keys("openpiimap-data-v1").await.unwrap(), vec![key]);
        assert_eq!(
            storage.partition_names().await.unwrap(),
            vec!["openpiimap-data-v1"]
        );
    }

    #[tokio::test]
    async fn test_put_replaces_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path().to_path_buf()).unwrap();
        storage.put("p", record("k", b"one")).await.unwrap();
        storage.put("p", record("k", b"two")).await.unwrap();

        assert_eq!(storage.get("p", "k").await.unwrap().unwrap().body, b"two");
        let files: Vec<_> = std::fs::read_dir(dir.path().join("p")).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_partition_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path().to_path_buf()).unwrap();
        assert!(storage.keys("absent").await.unwrap().is_empty());
        assert!(storage.get("absent", "k").await.unwrap().is_none());
        assert!(!storage.has_partition("absent").await.unwrap());
        assert!(!storage.delete_partition("absent").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_partition() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path().to_path_buf()).unwrap();
        storage.put("old", record("k", b"x")).await.unwrap();
        storage.open("new").await.unwrap();

        assert!(storage.delete_partition("old").await.unwrap());
        assert_eq!(storage.partition_names().await.unwrap(), vec!["new"]);
    }

    #[tokio::test]
    async fn test_rejects_path_like_partition_names() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path().to_path_buf()).unwrap();
        assert!(storage.open("../escape").await.is_err());
        assert!(storage.put("a/b", record("k", b"x")).await.is_err());
    }

    #[test]
    fn test_record_file_stem_is_stable_hex() {
        let a = record_file_stem("https://openpiimap.org/");
        assert_eq!(a, record_file_stem("https://openpiimap.org/"));
        assert_ne!(a, record_file_stem("https://openpiimap.org/index.html"));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

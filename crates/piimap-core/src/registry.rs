//! Partition registry.
//!
//! Process-wide record of which physical partition is authoritative for each
//! logical name. Workers stage their version at install and promote it at
//! activate; strategies and message handlers only read it. The registry is
//! shared explicitly as a `SharedRegistry` rather than living in a global.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use crate::error::{CacheError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PartitionKind {
    Static,
    Data,
}

impl PartitionKind {
    pub const ALL: [PartitionKind; 2] = [PartitionKind::Static, PartitionKind::Data];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Data => "data",
        }
    }
}

/// Identity of a physical partition: namespace, logical name and version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionId {
    namespace: String,
    kind: PartitionKind,
    version: u32,
}

impl PartitionId {
    pub fn new(namespace: impl Into<String>, kind: PartitionKind, version: u32) -> Self {
        Self {
            namespace: namespace.into(),
            kind,
            version,
        }
    }

    pub fn kind(&self) -> PartitionKind {
        self.kind
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Physical partition name, e.g. `openpiimap-static-v1`.
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for PartitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-v{}", self.namespace, self.kind.as_str(), self.version)
    }
}

#[derive(Debug)]
pub struct PartitionRegistry {
    namespace: String,
    current: HashMap<PartitionKind, u32>,
    staged: BTreeSet<u32>,
    controller: Option<u32>,
}

pub type SharedRegistry = Arc<RwLock<PartitionRegistry>>;

impl PartitionRegistry {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            current: HashMap::new(),
            staged: BTreeSet::new(),
            controller: None,
        }
    }

    pub fn shared(namespace: impl Into<String>) -> SharedRegistry {
        Arc::new(RwLock::new(Self::new(namespace)))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Whether a physical partition name belongs to this namespace.
    pub fn owns(&self, partition: &str) -> bool {
        partition
            .strip_prefix(self.namespace.as_str())
            .map(|rest| rest.starts_with('-'))
            .unwrap_or(false)
    }

    /// Version suffix of a namespaced partition name (`...-v{N}`).
    pub fn version_of(&self, partition: &str) -> Option<u32> {
        if !self.owns(partition) {
            return None;
        }
        let (_, version) = partition.rsplit_once("-v")?;
        version.parse().ok()
    }

    pub fn partition(&self, kind: PartitionKind, version: u32) -> PartitionId {
        PartitionId::new(self.namespace.clone(), kind, version)
    }

    /// Record that `version` is installing. Does not change what is current.
    pub fn stage(&mut self, version: u32) {
        self.staged.insert(version);
    }

    pub fn unstage(&mut self, version: u32) {
        self.staged.remove(&version);
    }

    pub fn is_staged(&self, version: u32) -> bool {
        self.staged.contains(&version)
    }

    pub fn current(&self, kind: PartitionKind) -> Option<PartitionId> {
        self.current
            .get(&kind)
            .map(|version| self.partition(kind, *version))
    }

    pub fn current_names(&self) -> Vec<String> {
        PartitionKind::ALL
            .iter()
            .filter_map(|kind| self.current(*kind))
            .map(|id| id.name())
            .collect()
    }

    /// Version of the worker that currently controls all page contexts.
    pub fn controller(&self) -> Option<u32> {
        self.controller
    }

    /// Make `version` authoritative for every logical partition and the
    /// controlling version. Versions never move backwards.
    pub fn promote(&mut self, version: u32) -> Result<Vec<PartitionId>> {
        if let Some(current) = self.controller {
            if version < current {
                return Err(CacheError::StaleVersion {
                    requested: version,
                    current,
                });
            }
        }

        for kind in PartitionKind::ALL {
            self.current.insert(kind, version);
        }
        self.controller = Some(version);
        self.staged.retain(|v| *v > version);

        Ok(PartitionKind::ALL
            .iter()
            .map(|kind| self.partition(*kind, version))
            .collect())
    }
}

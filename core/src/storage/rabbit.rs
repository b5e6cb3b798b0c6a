// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

use super::{root::RootStore, trunk::TrunkStore};
use std::{collections::HashMap, sync::Arc};

enum Parent {
    Trunk(Arc<TrunkStore>),
    /// RPC read-only mode sits directly on the root.
    Root(Arc<RootStore>),
}

struct CacheEntry {
    value: Option<Vec<u8>>,
    dirty: bool,
}

/// The per-transaction cache. Buffers both reads and writes; `write_back`
/// merges the writes into the parent trunk, `close(false)` discards them.
pub struct RabbitStore {
    parent: Parent,
    cache: HashMap<Vec<u8>, CacheEntry>,
}

impl RabbitStore {
    pub fn new(trunk: Arc<TrunkStore>) -> RabbitStore {
        RabbitStore {
            parent: Parent::Trunk(trunk),
            cache: HashMap::new(),
        }
    }

    pub fn new_readonly(root: Arc<RootStore>) -> RabbitStore {
        RabbitStore {
            parent: Parent::Root(root),
            cache: HashMap::new(),
        }
    }

    /// A fresh empty rabbit over the same parent.
    pub fn fork(&self) -> RabbitStore {
        RabbitStore {
            parent: match &self.parent {
                Parent::Trunk(trunk) => Parent::Trunk(trunk.clone()),
                Parent::Root(root) => Parent::Root(root.clone()),
            },
            cache: HashMap::new(),
        }
    }

    fn parent_get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match &self.parent {
            Parent::Trunk(trunk) => trunk.get(key),
            Parent::Root(root) => root.get(key),
        }
    }

    pub fn get(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(entry) = self.cache.get(key) {
            return entry.value.clone();
        }
        let value = self.parent_get(key);
        self.cache.insert(
            key.to_vec(),
            CacheEntry {
                value: value.clone(),
                dirty: false,
            },
        );
        value
    }

    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.cache.insert(
            key,
            CacheEntry {
                value: Some(value),
                dirty: true,
            },
        );
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.cache.insert(
            key,
            CacheEntry {
                value: None,
                dirty: true,
            },
        );
    }

    /// Keys this rabbit has read from its parent (cache misses), used by the
    /// engine's conflict detection.
    pub fn read_keys(&self) -> impl Iterator<Item = &Vec<u8>> {
        self.cache
            .iter()
            .filter(|(_, entry)| !entry.dirty)
            .map(|(key, _)| key)
    }

    /// Keys this rabbit has written.
    pub fn write_keys(&self) -> impl Iterator<Item = &Vec<u8>> {
        self.cache
            .iter()
            .filter(|(_, entry)| entry.dirty)
            .map(|(key, _)| key)
    }

    pub fn write_back(&mut self) {
        let trunk = match &self.parent {
            Parent::Trunk(trunk) => trunk.clone(),
            Parent::Root(_) => {
                panic!("write-back from a read-only rabbit")
            }
        };
        let cache = std::mem::take(&mut self.cache);
        trunk.update(
            cache
                .into_iter()
                .filter(|(_, entry)| entry.dirty)
                .map(|(key, entry)| (key, entry.value)),
        );
    }

    pub fn close(mut self, dirty: bool) {
        if dirty {
            self.write_back();
        }
    }
}

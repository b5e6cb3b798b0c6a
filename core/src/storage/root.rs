// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

use ember_types::H256;
use keccak_hash::keccak;
use parking_lot::RwLock;
use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicI64, Ordering},
};

/// The authoritative world state plus the current block height.
///
/// The persistent Merkle engine behind the production deployment is an
/// external collaborator; this store implements its contract: ordered raw
/// key-value reads, batched writes and a deterministic 32-byte root digest.
pub struct RootStore {
    kv: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    height: AtomicI64,
}

impl RootStore {
    pub fn new() -> RootStore {
        RootStore {
            kv: RwLock::new(BTreeMap::new()),
            height: AtomicI64::new(0),
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.kv.read().get(key).cloned()
    }

    pub fn height(&self) -> i64 { self.height.load(Ordering::SeqCst) }

    pub fn set_height(&self, height: i64) {
        self.height.store(height, Ordering::SeqCst);
    }

    /// Applies a flushed trunk buffer; `None` deletes the key.
    pub fn apply<I>(&self, batch: I)
    where I: IntoIterator<Item = (Vec<u8>, Option<Vec<u8>>)> {
        let mut kv = self.kv.write();
        for (key, value) in batch {
            match value {
                Some(value) => {
                    kv.insert(key, value);
                }
                None => {
                    kv.remove(&key);
                }
            }
        }
    }

    /// A deterministic digest over the height and every entry in key order.
    /// Two nodes holding the same state at the same height agree on it
    /// bit for bit.
    pub fn root_hash(&self) -> H256 {
        let kv = self.kv.read();
        let mut buf = Vec::with_capacity(8 + kv.len() * 64);
        buf.extend_from_slice(&self.height().to_be_bytes());
        for (key, value) in kv.iter() {
            buf.extend_from_slice(keccak(key).as_bytes());
            buf.extend_from_slice(keccak(value).as_bytes());
        }
        keccak(&buf)
    }
}

impl Default for RootStore {
    fn default() -> Self { Self::new() }
}

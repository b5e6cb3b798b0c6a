// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

use super::root::RootStore;
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// A write-buffering overlay on top of the root store.
///
/// Exactly one read-write trunk and one read-only (check) trunk exist
/// between commits. `close(true)` flushes the buffer into the root,
/// `close(false)` discards it; either way the trunk is finished and any
/// rabbit still holding it falls through to the root.
pub struct TrunkStore {
    root: Arc<RootStore>,
    buffer: RwLock<HashMap<Vec<u8>, Option<Vec<u8>>>>,
    writable: bool,
    closed: AtomicBool,
}

impl TrunkStore {
    pub fn new(root: Arc<RootStore>, writable: bool) -> TrunkStore {
        TrunkStore {
            root,
            buffer: RwLock::new(HashMap::new()),
            writable,
            closed: AtomicBool::new(false),
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(buffered) = self.buffer.read().get(key) {
            return buffered.clone();
        }
        self.root.get(key)
    }

    /// Absorbs a rabbit's dirty entries.
    pub fn update<I>(&self, batch: I)
    where I: IntoIterator<Item = (Vec<u8>, Option<Vec<u8>>)> {
        debug_assert!(self.writable, "write-back into a read-only trunk");
        debug_assert!(!self.is_closed(), "write-back into a closed trunk");
        let mut buffer = self.buffer.write();
        for (key, value) in batch {
            buffer.insert(key, value);
        }
    }

    pub fn close(&self, dirty: bool) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug_assert!(false, "trunk closed twice");
            return;
        }
        let buffer = std::mem::take(&mut *self.buffer.write());
        if dirty {
            debug_assert!(self.writable, "flushing a read-only trunk");
            self.root.apply(buffer);
        }
    }

    pub fn is_closed(&self) -> bool { self.closed.load(Ordering::SeqCst) }
}

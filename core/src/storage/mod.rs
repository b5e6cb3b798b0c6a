// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

//! The layered world-state store.
//!
//! `RootStore` is the authoritative versioned state, `TrunkStore` is the
//! per-block write buffer on top of it and `RabbitStore` is the
//! per-transaction cache on top of a trunk. Every mutation path funnels
//! through a rabbit; nothing writes to the trunk or the root directly.

mod rabbit;
mod root;
mod trunk;

pub use self::{
    rabbit::RabbitStore,
    root::RootStore,
    trunk::TrunkStore,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn kv(k: &str, v: &str) -> (Vec<u8>, Vec<u8>) {
        (k.as_bytes().to_vec(), v.as_bytes().to_vec())
    }

    #[test]
    fn rabbit_write_back_reaches_root_through_trunk() {
        let root = Arc::new(RootStore::new());
        let trunk = Arc::new(TrunkStore::new(root.clone(), true));

        let mut rabbit = RabbitStore::new(trunk.clone());
        let (k, v) = kv("alpha", "1");
        rabbit.set(k.clone(), v.clone());
        assert_eq!(rabbit.get(&k), Some(v.clone()));
        // Not visible below until written back.
        assert_eq!(trunk.get(&k), None);
        rabbit.close(true);
        assert_eq!(trunk.get(&k), Some(v.clone()));
        // Not visible in root until the trunk flushes.
        assert_eq!(root.get(&k), None);
        trunk.close(true);
        assert_eq!(root.get(&k), Some(v));
    }

    #[test]
    fn dirty_false_discards_on_every_layer() {
        let root = Arc::new(RootStore::new());
        let trunk = Arc::new(TrunkStore::new(root.clone(), true));

        let mut rabbit = RabbitStore::new(trunk.clone());
        let (k, v) = kv("beta", "2");
        rabbit.set(k.clone(), v.clone());
        rabbit.close(false);
        assert_eq!(trunk.get(&k), None);

        let mut rabbit = RabbitStore::new(trunk.clone());
        rabbit.set(k.clone(), v);
        rabbit.close(true);
        trunk.close(false);
        assert_eq!(root.get(&k), None);
    }

    #[test]
    fn deletes_shadow_parent_entries() {
        let root = Arc::new(RootStore::new());
        let (k, v) = kv("gamma", "3");
        root.apply(vec![(k.clone(), Some(v.clone()))]);

        let trunk = Arc::new(TrunkStore::new(root.clone(), true));
        let mut rabbit = RabbitStore::new(trunk.clone());
        assert_eq!(rabbit.get(&k), Some(v));
        rabbit.delete(k.clone());
        assert_eq!(rabbit.get(&k), None);
        rabbit.close(true);
        assert_eq!(trunk.get(&k), None);
        trunk.close(true);
        assert_eq!(root.get(&k), None);
    }

    #[test]
    fn root_hash_tracks_content_and_height() {
        let a = Arc::new(RootStore::new());
        let b = Arc::new(RootStore::new());
        assert_eq!(a.root_hash(), b.root_hash());

        a.apply(vec![kv("k1", "v1")].into_iter().map(|(k, v)| (k, Some(v))));
        assert_ne!(a.root_hash(), b.root_hash());

        b.apply(vec![kv("k1", "v1")].into_iter().map(|(k, v)| (k, Some(v))));
        assert_eq!(a.root_hash(), b.root_hash());

        a.set_height(5);
        assert_ne!(a.root_hash(), b.root_hash());
        b.set_height(5);
        assert_eq!(a.root_hash(), b.root_hash());
    }

    #[test]
    fn readonly_rabbit_reads_root_directly() {
        let root = Arc::new(RootStore::new());
        let (k, v) = kv("delta", "4");
        root.apply(vec![(k.clone(), Some(v.clone()))]);
        let mut rabbit = RabbitStore::new_readonly(root);
        assert_eq!(rabbit.get(&k), Some(v));
    }
}

//! Block cache.
//!
//! The finality and chain-head queries keep asking for the same handful of
//! recent blocks, so fetched blocks are kept in a `HashMap` keyed by
//! [`BlockHash`]. When the map grows to twice its capacity it is pruned
//! back to the `capacity` highest-numbered blocks, which keeps eviction
//! amortized O(1) per insert.

use std::collections::HashMap;

use crate::rpc::{BlockHash, SignedBlock};

pub struct BlockCache {
    capacity: usize,
    blocks: HashMap<BlockHash, SignedBlock>,
}

impl BlockCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            blocks: HashMap::with_capacity(capacity * 2),
        }
    }

    pub fn get(&self, hash: &BlockHash) -> Option<&SignedBlock> {
        self.blocks.get(hash)
    }

    pub fn insert(&mut self, hash: BlockHash, block: SignedBlock) {
        if self.blocks.len() >= self.capacity * 2 && !self.blocks.contains_key(&hash) {
            self.prune();
        }
        self.blocks.insert(hash, block);
    }

    fn prune(&mut self) {
        let mut entries: Vec<_> = self.blocks.drain().collect();
        entries.sort_unstable_by(|a, b| b.1.number.cmp(&a.1.number));
        entries.truncate(self.capacity);
        self.blocks.extend(entries);
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(n: u64) -> BlockHash {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&n.to_be_bytes());
        BlockHash(bytes)
    }

    fn block(n: u64) -> SignedBlock {
        SignedBlock {
            number: n,
            extrinsics: 1,
        }
    }

    #[test]
    fn insert_and_get() {
        let mut cache = BlockCache::new(4);
        assert!(cache.is_empty());

        cache.insert(hash(7), block(7));
        assert_eq!(cache.get(&hash(7)).map(|b| b.number), Some(7));
        assert!(cache.get(&hash(8)).is_none());
    }

    #[test]
    fn prune_keeps_highest_blocks() {
        let mut cache = BlockCache::new(2);
        for n in 1..=4 {
            cache.insert(hash(n), block(n));
        }
        assert_eq!(cache.len(), 4);

        // Fifth insert hits 2 * capacity and prunes down to blocks 3 and 4 first.
        cache.insert(hash(5), block(5));
        assert_eq!(cache.len(), 3);
        assert!(cache.get(&hash(1)).is_none());
        assert!(cache.get(&hash(2)).is_none());
        assert!(cache.get(&hash(3)).is_some());
        assert!(cache.get(&hash(4)).is_some());
        assert!(cache.get(&hash(5)).is_some());
    }

    #[test]
    fn reinserting_a_known_block_does_not_prune() {
        let mut cache = BlockCache::new(1);
        cache.insert(hash(1), block(1));
        cache.insert(hash(2), block(2));
        cache.insert(hash(1), block(1));
        assert_eq!(cache.len(), 2);
    }
}

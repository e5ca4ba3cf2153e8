//! Two-list LRU block cache with write-back semantics (spec §4.2).
//!
//! Blocks move between a free list and an in-use list; the in-use list is
//! kept LRU-ordered so the least recently touched resident block is the
//! one evicted (and, if dirty, written back) when a new block must be
//! brought in. A slot's status is `Same` (clean, matches the device) or
//! `Changed` (dirty, must be flushed before reuse or close).
//!
//! `BlockCache` also supports an "unbuffered" mode where reads/writes go
//! straight to the device with no residency at all; `format` uses this
//! so that laying out a fresh image does not have to reason about cache
//! eviction ordering.

use std::collections::HashMap;

use crate::device::RawDevice;
use crate::error::Result;
use crate::layout::BLOCK_SIZE;

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Same,
    Changed,
}

struct Slot {
    block: u64,
    data: [u8; BLOCK_SIZE],
    status: SlotStatus,
}

pub struct BlockCache {
    device: RawDevice,
    capacity: usize,
    /// Index into `free` ++ `in_use` by block number.
    index: HashMap<u64, usize>,
    slots: Vec<Slot>,
    /// Free slot indices (the "free list" half of the two-list scheme).
    free: Vec<usize>,
    /// Resident slot indices in LRU order, oldest first (the "in-use list").
    in_use: Vec<usize>,
    unbuffered: bool,
}

impl BlockCache {
    pub fn new(device: RawDevice) -> Self {
        Self::with_capacity(device, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(device: RawDevice, capacity: usize) -> Self {
        Self {
            device,
            capacity: capacity.max(1),
            index: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            in_use: Vec::new(),
            unbuffered: false,
        }
    }

    /// Run `f` with caching disabled: reads/writes pass straight through to
    /// the device. Used by fresh-image formatting, which touches every
    /// block exactly once and gains nothing from caching it.
    pub fn with_unbuffered<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let prev = self.unbuffered;
        self.unbuffered = true;
        let result = f(self);
        self.unbuffered = prev;
        result
    }

    fn touch_mru(&mut self, pos: usize) {
        let slot_idx = self.in_use.remove(pos);
        self.in_use.push(slot_idx);
    }

    fn evict_one(&mut self) -> Result<()> {
        let slot_idx = self.in_use.remove(0);
        let slot = &self.slots[slot_idx];
        self.index.remove(&slot.block);
        if slot.status == SlotStatus::Changed {
            self.device.write_block(slot.block, &slot.data)?;
        }
        self.free.push(slot_idx);
        Ok(())
    }

    fn slot_for(&mut self, block: u64) -> Result<usize> {
        if let Some(&slot_idx) = self.index.get(&block) {
            let pos = self.in_use.iter().position(|&i| i == slot_idx).unwrap();
            self.touch_mru(pos);
            return Ok(slot_idx);
        }

        if self.free.is_empty() && self.slots.len() < self.capacity {
            self.slots.push(Slot {
                block: u64::MAX,
                data: [0u8; BLOCK_SIZE],
                status: SlotStatus::Same,
            });
            self.free.push(self.slots.len() - 1);
        }
        if self.free.is_empty() {
            self.evict_one()?;
        }
        let slot_idx = self.free.pop().unwrap();

        let mut data = [0u8; BLOCK_SIZE];
        self.device.read_block(block, &mut data)?;
        self.slots[slot_idx] = Slot {
            block,
            data,
            status: SlotStatus::Same,
        };
        self.index.insert(block, slot_idx);
        self.in_use.push(slot_idx);
        Ok(slot_idx)
    }

    pub fn read_block(&mut self, block: u64, buf: &mut [u8; BLOCK_SIZE]) -> Result<()> {
        if self.unbuffered {
            return self.device.read_block(block, buf);
        }
        let slot_idx = self.slot_for(block)?;
        buf.copy_from_slice(&self.slots[slot_idx].data);
        Ok(())
    }

    pub fn write_block(&mut self, block: u64, buf: &[u8; BLOCK_SIZE]) -> Result<()> {
        if self.unbuffered {
            return self.device.write_block(block, buf);
        }
        let slot_idx = self.slot_for(block)?;
        self.slots[slot_idx].data.copy_from_slice(buf);
        self.slots[slot_idx].status = SlotStatus::Changed;
        Ok(())
    }

    /// Write every dirty resident slot back to the device without
    /// evicting it.
    pub fn flush(&mut self) -> Result<()> {
        for &slot_idx in &self.in_use {
            let slot = &mut self.slots[slot_idx];
            if slot.status == SlotStatus::Changed {
                self.device.write_block(slot.block, &slot.data)?;
                slot.status = SlotStatus::Same;
            }
        }
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.flush()?;
        self.device.sync()
    }

    /// Flush and release all residency, then close the underlying device.
    pub fn close(&mut self) -> Result<()> {
        self.flush()?;
        self.index.clear();
        self.free.clear();
        self.in_use.clear();
        self.slots.clear();
        self.device.close();
        Ok(())
    }

    pub fn n_blocks(&self) -> u64 {
        self.device.n_blocks()
    }

    pub fn read_only(&self) -> bool {
        self.device.read_only()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::BLOCKS_PER_CLUSTER;
    use tempfile::NamedTempFile;

    fn fresh_cache(n_blocks: u64, capacity: usize) -> BlockCache {
        let tmp = NamedTempFile::new().unwrap();
        let device = RawDevice::create(tmp.path(), n_blocks).unwrap();
        std::mem::forget(tmp);
        BlockCache::with_capacity(device, capacity)
    }

    #[test]
    fn write_then_read_hits_cache() {
        let mut cache = fresh_cache(8, 4);
        let buf = [7u8; BLOCK_SIZE];
        cache.write_block(2, &buf).unwrap();
        let mut out = [0u8; BLOCK_SIZE];
        cache.read_block(2, &mut out).unwrap();
        assert_eq!(buf, out);
    }

    #[test]
    fn eviction_writes_back_dirty_slots() {
        let mut cache = fresh_cache(8, 2);
        let a = [1u8; BLOCK_SIZE];
        let b = [2u8; BLOCK_SIZE];
        let c = [3u8; BLOCK_SIZE];
        cache.write_block(0, &a).unwrap();
        cache.write_block(1, &b).unwrap();
        // capacity 2: writing block 2 evicts block 0 (LRU), flushing it.
        cache.write_block(2, &c).unwrap();
        let mut out = [0u8; BLOCK_SIZE];
        cache.read_block(0, &mut out).unwrap();
        assert_eq!(a, out);
    }

    #[test]
    fn unbuffered_mode_bypasses_residency() {
        let mut cache = fresh_cache(BLOCKS_PER_CLUSTER as u64 * 2, 4);
        let buf = [9u8; BLOCK_SIZE];
        cache
            .with_unbuffered(|c| c.write_block(0, &buf))
            .unwrap();
        assert!(cache.in_use.is_empty());
    }
}

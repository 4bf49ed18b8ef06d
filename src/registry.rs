// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 linkmem contributors
//
// The shared-block registry (spec §4.1). Grounded on
// `proto/service_registry.rs`'s entry-table pattern, generalized from a
// fixed shm array of `ServiceEntry` to a growable, insertion-ordered list
// of blocks. Each block's storage is guarded by its own explicit lock
// object rather than a registry-wide one, the same separation
// `shm.rs` (raw mapped bytes) and `mutex.rs` (external lock) keep in the
// teacher crate.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::crc::crc32_be;
use crate::error::{LinkError, Result};

/// A block's kind: opaque bytes, or a fixed-stride array of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Blob,
    Array { stride: usize },
}

/// A block's role on this peer: the authoritative copy, or a consumer of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRole {
    /// This peer serves the block on demand (the wire-protocol slave for it).
    SlaveOwned,
    /// This peer pulls the block from its counterpart (the wire-protocol master for it).
    MasterConsumer,
}

/// The contents guarded by a block's lock: storage bytes and their checksum.
struct Storage {
    bytes: Vec<u8>,
    checksum: u32,
}

/// One named entry in the registry.
///
/// Storage lives behind an explicit, non-RAII lock (mirrors the teacher's
/// `IpcMutex`: callers call `lock_within`/`unlock` themselves, matching
/// spec.md's `grab`/`return` pair). `accessor`/`master`/`slave` build
/// scoped wrappers on top where that is more convenient, the same way
/// `scoped_access.rs` layers a guard on top of the raw `IpcMutex`.
pub struct Block {
    name: String,
    kind: BlockKind,
    role: BlockRole,
    trigger: [u8; 8],
    pattern: [u8; 8],
    locked: Mutex<bool>,
    cv: Condvar,
    storage: Mutex<Storage>,
}

impl Block {
    fn new(name: String, kind: BlockKind, role: BlockRole, trigger: [u8; 8], pattern: [u8; 8], bytes: Vec<u8>) -> Self {
        let checksum = crc32_be(&bytes);
        Self {
            name,
            kind,
            role,
            trigger,
            pattern,
            locked: Mutex::new(false),
            cv: Condvar::new(),
            storage: Mutex::new(Storage { bytes, checksum }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    pub fn role(&self) -> BlockRole {
        self.role
    }

    pub fn trigger(&self) -> &[u8; 8] {
        &self.trigger
    }

    pub fn pattern(&self) -> &[u8; 8] {
        &self.pattern
    }

    /// Acquire the block's mutex within `timeout`. Returns `false` on timeout.
    fn lock_within(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut locked = match self.locked.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        loop {
            if !*locked {
                *locked = true;
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (g, result) = match self.cv.wait_timeout(locked, deadline - now) {
                Ok(pair) => pair,
                Err(poisoned) => poisoned.into_inner(),
            };
            locked = g;
            if result.timed_out() && *locked {
                return false;
            }
        }
    }

    /// Release the block's mutex, recomputing the checksum first.
    fn unlock(&self) {
        {
            let mut data = match self.storage.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            data.checksum = crc32_be(&data.bytes);
        }
        let mut locked = match self.locked.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *locked = false;
        drop(locked);
        self.cv.notify_one();
    }

    pub fn checksum(&self) -> u32 {
        self.storage.lock().map(|s| s.checksum).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.storage.lock().map(|s| s.bytes.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Swap this block's entire contents for `bytes`. Used by a successful
    /// master transfer (spec §4.6 ending state) and by `resize`.
    fn replace_storage(&self, bytes: Vec<u8>) {
        let checksum = crc32_be(&bytes);
        let mut data = match self.storage.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        data.bytes = bytes;
        data.checksum = checksum;
    }
}

/// A scoped, mutable view over a locked block's storage. Returned by
/// [`Registry::grab`]; dropping it is *not* sufficient to release the
/// lock — call [`BlockAccess::release`] (or [`Registry::release`]),
/// mirroring spec.md's explicit `grab`/`return` pair rather than Rust's
/// usual RAII-guard convention.
pub struct BlockAccess {
    block: Arc<Block>,
}

impl BlockAccess {
    /// The block's current length in bytes.
    pub fn len(&self) -> usize {
        self.block.storage.lock().map(|s| s.bytes.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read-only view of the locked storage.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let data = self.block.storage.lock().unwrap_or_else(|p| p.into_inner());
        f(&data.bytes)
    }

    /// Mutable view of the locked storage. The checksum is recomputed on
    /// [`Registry::release`], not here.
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
        let mut data = self.block.storage.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut data.bytes)
    }

    pub fn block(&self) -> &Arc<Block> {
        &self.block
    }
}

/// The named, mutex-guarded block registry.
///
/// Insertion order is preserved and iterable (spec §9 design notes: the
/// slave's idle scan walks every slave-owned block looking for a trigger
/// match; order need only be stable, not creation order). A plain `Vec`
/// under one registry-wide lock is sufficient: insertion happens during
/// single-threaded init, and once inserted a block is never removed, so
/// the registry lock is only ever held briefly.
#[derive(Default)]
pub struct Registry {
    blocks: Mutex<Vec<Arc<Block>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, block: Block) -> Result<Arc<Block>> {
        let mut blocks = self.blocks.lock().unwrap_or_else(|p| p.into_inner());
        if blocks.iter().any(|b| b.name == block.name) {
            return Err(LinkError::AlreadyExists(block.name.clone()));
        }
        let arc = Arc::new(block);
        blocks.push(arc.clone());
        Ok(arc)
    }

    /// Allocate a zero-initialized blob of `length` bytes.
    pub fn new_blob(
        &self,
        name: &str,
        length: usize,
        role: BlockRole,
        trigger: [u8; 8],
        pattern: [u8; 8],
    ) -> Result<Arc<Block>> {
        self.insert(Block::new(
            name.to_string(),
            BlockKind::Blob,
            role,
            trigger,
            pattern,
            vec![0u8; length],
        ))
    }

    /// Allocate a zero-initialized array of `n` elements of `stride` bytes each.
    pub fn new_array(
        &self,
        name: &str,
        n: usize,
        stride: usize,
        role: BlockRole,
        trigger: [u8; 8],
        pattern: [u8; 8],
    ) -> Result<Arc<Block>> {
        self.insert(Block::new(
            name.to_string(),
            BlockKind::Array { stride },
            role,
            trigger,
            pattern,
            vec![0u8; n * stride],
        ))
    }

    /// Look up a block by name without locking it.
    pub fn lookup(&self, name: &str) -> Option<Arc<Block>> {
        let blocks = self.blocks.lock().unwrap_or_else(|p| p.into_inner());
        blocks.iter().find(|b| b.name == name).cloned()
    }

    /// Every block currently in the registry, in insertion order.
    pub fn iter(&self) -> Vec<Arc<Block>> {
        self.blocks.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Acquire a block's mutex within `timeout`, yielding a mutable view.
    pub fn grab(&self, name: &str, timeout: Duration) -> Result<BlockAccess> {
        let block = self.lookup(name).ok_or_else(|| LinkError::NotFound(name.to_string()))?;
        if block.lock_within(timeout) {
            Ok(BlockAccess { block })
        } else {
            Err(LinkError::LockTimeout(name.to_string()))
        }
    }

    /// Recompute the block's checksum and release its mutex.
    pub fn release(&self, access: BlockAccess) -> Result<()> {
        access.block.unlock();
        Ok(())
    }

    /// Acquire the lock, reallocate preserving `[0, min(old, n))`, release.
    pub fn resize(&self, name: &str, n: usize) -> Result<()> {
        let block = self.lookup(name).ok_or_else(|| LinkError::NotFound(name.to_string()))?;
        if !block.lock_within(Duration::from_secs(5)) {
            return Err(LinkError::LockTimeout(name.to_string()));
        }
        let new_bytes = {
            let data = block.storage.lock().unwrap_or_else(|p| p.into_inner());
            let keep = data.bytes.len().min(n);
            let mut new_bytes = vec![0u8; n];
            new_bytes[..keep].copy_from_slice(&data.bytes[..keep]);
            new_bytes
        };
        block.replace_storage(new_bytes);
        block.unlock();
        Ok(())
    }

    pub fn get_length(&self, name: &str) -> Result<usize> {
        let block = self.lookup(name).ok_or_else(|| LinkError::NotFound(name.to_string()))?;
        Ok(block.len())
    }

    /// Copy one stride-sized element out of an array block at `idx`.
    pub fn borrow_element(&self, name: &str, out: &mut [u8], idx: usize) -> Result<()> {
        let block = self.lookup(name).ok_or_else(|| LinkError::NotFound(name.to_string()))?;
        let stride = match block.kind {
            BlockKind::Array { stride } => stride,
            BlockKind::Blob => return Err(LinkError::NotAnArray(name.to_string())),
        };
        if !block.lock_within(Duration::from_secs(5)) {
            return Err(LinkError::LockTimeout(name.to_string()));
        }
        let result = {
            let data = block.storage.lock().unwrap_or_else(|p| p.into_inner());
            let start = idx * stride;
            let end = start + stride;
            if end > data.bytes.len() {
                Err(LinkError::IndexOutOfRange {
                    name: name.to_string(),
                    index: idx,
                    len: data.bytes.len() / stride,
                })
            } else {
                out[..stride].copy_from_slice(&data.bytes[start..end]);
                Ok(())
            }
        };
        block.unlock();
        result
    }

    /// Copy one stride-sized element into an array block at `idx`.
    pub fn return_element(&self, name: &str, input: &[u8], idx: usize) -> Result<()> {
        let block = self.lookup(name).ok_or_else(|| LinkError::NotFound(name.to_string()))?;
        let stride = match block.kind {
            BlockKind::Array { stride } => stride,
            BlockKind::Blob => return Err(LinkError::NotAnArray(name.to_string())),
        };
        if !block.lock_within(Duration::from_secs(5)) {
            return Err(LinkError::LockTimeout(name.to_string()));
        }
        let result = {
            let mut data = block.storage.lock().unwrap_or_else(|p| p.into_inner());
            let start = idx * stride;
            let end = start + stride;
            if end > data.bytes.len() {
                Err(LinkError::IndexOutOfRange {
                    name: name.to_string(),
                    index: idx,
                    len: data.bytes.len() / stride,
                })
            } else {
                data.bytes[start..end].copy_from_slice(&input[..stride]);
                Ok(())
            }
        };
        block.unlock();
        result
    }

    /// Used by [`crate::master::MasterMachine`] on a successful transfer:
    /// swap the block's owned storage for the freshly received accumulator.
    pub(crate) fn complete_master_transfer(&self, block: &Arc<Block>, bytes: Vec<u8>) {
        block.replace_storage(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trig(tag: &str) -> [u8; 8] {
        let mut t = [0u8; 8];
        let bytes = tag.as_bytes();
        let n = bytes.len().min(8);
        t[..n].copy_from_slice(&bytes[..n]);
        t
    }

    #[test]
    fn new_blob_twice_returns_already_exists() {
        let reg = Registry::new();
        reg.new_blob("x", 10, BlockRole::SlaveOwned, trig("xt"), trig("xp")).unwrap();
        let err = reg
            .new_blob("x", 20, BlockRole::SlaveOwned, trig("xt"), trig("xp"))
            .unwrap_err();
        assert_eq!(err, LinkError::AlreadyExists("x".into()));
        assert_eq!(reg.get_length("x").unwrap(), 10);
    }

    #[test]
    fn grab_then_release_leaves_checksum_unchanged() {
        let reg = Registry::new();
        reg.new_blob("b", 8, BlockRole::SlaveOwned, trig("bt"), trig("bp")).unwrap();
        let before = reg.lookup("b").unwrap().checksum();
        let access = reg.grab("b", Duration::from_secs(1)).unwrap();
        reg.release(access).unwrap();
        assert_eq!(reg.lookup("b").unwrap().checksum(), before);
    }

    #[test]
    fn resize_then_get_length_preserves_prefix() {
        let reg = Registry::new();
        reg.new_blob("r", 4, BlockRole::MasterConsumer, trig("rt"), trig("rp")).unwrap();
        {
            let access = reg.grab("r", Duration::from_secs(1)).unwrap();
            access.with_bytes_mut(|b| b.copy_from_slice(&[1, 2, 3, 4]));
            reg.release(access).unwrap();
        }
        reg.resize("r", 8).unwrap();
        assert_eq!(reg.get_length("r").unwrap(), 8);
        let access = reg.grab("r", Duration::from_secs(1)).unwrap();
        access.with_bytes(|b| assert_eq!(&b[..4], &[1, 2, 3, 4]));
        reg.release(access).unwrap();
    }

    #[test]
    fn array_length_is_multiple_of_stride() {
        let reg = Registry::new();
        reg.new_array("arr", 5, 3, BlockRole::SlaveOwned, trig("at"), trig("ap")).unwrap();
        let len = reg.get_length("arr").unwrap();
        assert_eq!(len, 15);
        assert_eq!(len % 3, 0);
    }

    #[test]
    fn borrow_element_out_of_range_is_rejected() {
        let reg = Registry::new();
        reg.new_array("e", 2, 4, BlockRole::SlaveOwned, trig("et"), trig("ep")).unwrap();
        let mut out = [0u8; 4];
        let err = reg.borrow_element("e", &mut out, 5).unwrap_err();
        assert!(matches!(err, LinkError::IndexOutOfRange { .. }));
    }

    #[test]
    fn borrow_element_on_blob_is_rejected() {
        let reg = Registry::new();
        reg.new_blob("blob", 4, BlockRole::SlaveOwned, trig("bt"), trig("bp")).unwrap();
        let mut out = [0u8; 4];
        let err = reg.borrow_element("blob", &mut out, 0).unwrap_err();
        assert_eq!(err, LinkError::NotAnArray("blob".into()));
    }

    #[test]
    fn lookup_missing_block_is_not_found() {
        let reg = Registry::new();
        assert!(reg.lookup("nope").is_none());
        assert_eq!(
            reg.get_length("nope").unwrap_err(),
            LinkError::NotFound("nope".into())
        );
    }
}

//! `InodeAllocator`: the doubly linked free-inode list of spec §4.4.

use log::debug;

use crate::cache::BlockCache;
use crate::error::{Error, Result};
use crate::inode_ops::{self, InodeStatus};
use crate::layout::{FileType, Inode, NULL_REF};
use crate::meta::MetaStore;
use crate::time;

/// Remove the head of the free-inode list, clean it if it was left dirty
/// by a prior `free`, and reinitialize it as a fresh inode of `file_type`.
pub fn alloc(
    meta: &mut MetaStore,
    cache: &mut BlockCache,
    file_type: FileType,
    owner: u32,
    group: u32,
) -> Result<u32> {
    if meta.superblock()?.i_free == 0 {
        return Err(Error::NoSpace);
    }
    let n_inode = meta.superblock()?.i_head;

    let raw = inode_ops::read_inode(meta, cache, n_inode, InodeStatus::FreeDirty)?;
    let is_dirty = raw.direct.iter().any(|&r| r != NULL_REF) || raw.i1 != NULL_REF || raw.i2 != NULL_REF;
    if is_dirty {
        inode_ops::clean_inode(meta, cache, n_inode)?;
    }
    let next = match raw.var_context() {
        crate::layout::VarContext::Free { next, .. } => next,
        crate::layout::VarContext::InUse { .. } => unreachable!("validated free above"),
    };

    let mut new_inode = Inode::free();
    new_inode.mode = file_type.mode_bit();
    new_inode.owner = owner;
    new_inode.group = group;
    let t = time::now();
    new_inode.set_times(t, t);
    inode_ops::write_inode(meta, cache, n_inode, InodeStatus::InUse, new_inode)?;

    {
        let sb = meta.superblock_mut()?;
        sb.i_head = next;
        sb.i_free -= 1;
        if sb.i_free == 0 {
            sb.i_tail = NULL_REF;
        }
    }

    if next != NULL_REF {
        let mut succ = inode_ops::read_inode(meta, cache, next, InodeStatus::FreeDirty)?;
        if let crate::layout::VarContext::Free { next: succ_next, .. } = succ.var_context() {
            succ.set_free_links(succ_next, NULL_REF);
        }
        inode_ops::write_inode(meta, cache, next, InodeStatus::FreeDirty, succ)?;
    }

    debug!("inode {n_inode} allocated ({file_type:?})");
    Ok(n_inode)
}

/// Append `n_inode` to the tail of the free-inode list in dirty state.
pub fn free(meta: &mut MetaStore, cache: &mut BlockCache, n_inode: u32) -> Result<()> {
    if n_inode == crate::layout::ROOT_INODE {
        return Err(Error::InvalidInode(n_inode));
    }
    let mut inode = inode_ops::read_inode(meta, cache, n_inode, InodeStatus::InUse)?;
    let old_tail = meta.superblock()?.i_tail;

    inode.mode = crate::layout::Mode::FREE;
    inode.set_free_links(NULL_REF, old_tail);
    inode_ops::write_inode(meta, cache, n_inode, InodeStatus::FreeDirty, inode)?;

    if old_tail != NULL_REF {
        let mut tail_inode = inode_ops::read_inode(meta, cache, old_tail, InodeStatus::FreeDirty)?;
        if let crate::layout::VarContext::Free { prev, .. } = tail_inode.var_context() {
            tail_inode.set_free_links(n_inode, prev);
        }
        inode_ops::write_inode(meta, cache, old_tail, InodeStatus::FreeDirty, tail_inode)?;
    }

    let sb = meta.superblock_mut()?;
    sb.i_tail = n_inode;
    if sb.i_head == NULL_REF {
        sb.i_head = n_inode;
    }
    sb.i_free += 1;
    debug!("inode {n_inode} freed (dirty)");
    Ok(())
}

//! `InodeOps`: inode read/write with timestamping, and `cleanInode`
//! (spec §4.6).

use log::warn;

use crate::cache::BlockCache;
use crate::content_tree::{handle_file_clusters, TreeOp};
use crate::error::{Error, Result};
use crate::layout::{Inode, NULL_REF};
use crate::meta::MetaStore;
use crate::time;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeStatus {
    InUse,
    FreeDirty,
}

fn validate_status(n_inode: u32, inode: &Inode, status: InodeStatus) -> Result<()> {
    match status {
        InodeStatus::InUse => {
            if inode.is_free() || inode.file_type().is_none() {
                return Err(Error::InconsistentInUseInode(
                    n_inode,
                    "expected an in-use inode of a legal type".into(),
                ));
            }
        }
        InodeStatus::FreeDirty => {
            if !inode.is_free() {
                return Err(Error::InconsistentInodeInUse(n_inode));
            }
        }
    }
    Ok(())
}

fn load_and_locate(meta: &mut MetaStore, cache: &mut BlockCache, n_inode: u32) -> Result<u32> {
    let sb = meta.superblock()?;
    let (block_idx, offset) = MetaStore::convert_inode_ref(n_inode, sb.i_total)?;
    let itable_start = sb.itable_start;
    meta.load_inode_block(cache, itable_start, block_idx)?;
    Ok(offset)
}

/// Read an inode's record, validating its state matches `status`; refresh
/// its access time (and persist that refresh) when in use.
pub fn read_inode(
    meta: &mut MetaStore,
    cache: &mut BlockCache,
    n_inode: u32,
    status: InodeStatus,
) -> Result<Inode> {
    let offset = load_and_locate(meta, cache, n_inode)?;
    let mut inode = meta.inode_at(offset)?;
    validate_status(n_inode, &inode, status)?;

    if !inode.is_free() {
        inode.v_d1 = time::now();
        meta.set_inode_at(offset, inode)?;
        let itable_start = meta.superblock()?.itable_start;
        meta.store_inode_block(cache, itable_start)?;
    }
    Ok(inode)
}

/// Write an inode's record back, validating `status`; force access and
/// modification times to now when in use.
pub fn write_inode(
    meta: &mut MetaStore,
    cache: &mut BlockCache,
    n_inode: u32,
    status: InodeStatus,
    mut inode: Inode,
) -> Result<()> {
    validate_status(n_inode, &inode, status)?;
    if !inode.is_free() {
        let t = time::now();
        inode.set_times(t, t);
    }
    let offset = load_and_locate(meta, cache, n_inode)?;
    meta.set_inode_at(offset, inode)?;
    let itable_start = meta.superblock()?.itable_start;
    meta.store_inode_block(cache, itable_start)
}

/// Tear down a free-dirty inode's stale content tree, leaving it
/// free-clean.
pub fn clean_inode(meta: &mut MetaStore, cache: &mut BlockCache, n_inode: u32) -> Result<()> {
    let mut inode = read_inode(meta, cache, n_inode, InodeStatus::FreeDirty)?;
    if inode.direct.iter().any(|&r| r != NULL_REF) || inode.i1 != NULL_REF || inode.i2 != NULL_REF {
        warn!("reclaiming dirty inode {n_inode}");
    }
    handle_file_clusters(meta, cache, &mut inode, n_inode, 0, TreeOp::Clean)?;
    inode.direct = [NULL_REF; crate::layout::N_DIRECT];
    inode.i1 = NULL_REF;
    inode.i2 = NULL_REF;
    inode.clu_count = 0;
    write_inode(meta, cache, n_inode, InodeStatus::FreeDirty, inode)
}

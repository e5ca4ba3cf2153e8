//! `ContentTree`: direct / single-indirect / double-indirect translation
//! of a file's logical cluster index to a physical cluster (spec §4.7).
//!
//! Functions here take `&mut Inode` rather than an inode number: the
//! caller (InodeOps, Directory) is responsible for having the inode's
//! record resident (via its own `MetaStore` inode-block slot) and for
//! storing it back afterwards. This keeps the tree-walking code free of
//! any opinion about where the inode record itself lives.

use log::debug;

use crate::cache::BlockCache;
use crate::calloc;
use crate::error::{Error, Result};
use crate::layout::{DataCluster, Inode, N_DIRECT, NULL_REF, RPC};
use crate::meta::MetaStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeOp {
    Get,
    Alloc,
    Free,
    FreeClean,
    Clean,
}

enum Band {
    Direct(usize),
    Single(usize),
    Double(usize, usize),
}

fn band_of(k: usize) -> Result<Band> {
    if k < N_DIRECT {
        Ok(Band::Direct(k))
    } else if k < N_DIRECT + RPC {
        Ok(Band::Single(k - N_DIRECT))
    } else if k < N_DIRECT + RPC + RPC * RPC {
        let idx2 = k - N_DIRECT - RPC;
        Ok(Band::Double(idx2 / RPC, idx2 % RPC))
    } else {
        Err(Error::InvalidArgument(format!(
            "cluster index {k} exceeds MAX_FILE_CLUSTERS"
        )))
    }
}

/// Read the logical cluster number at index `k`, or `NULL_REF` if `k` is
/// unallocated (including when an intermediate indirection cluster is
/// itself absent). Never allocates anything.
fn read_ref(meta: &mut MetaStore, cache: &mut BlockCache, inode: &Inode, k: usize) -> Result<u32> {
    let dzone_start = meta.superblock()?.dzone_start;
    match band_of(k)? {
        Band::Direct(i) => Ok(inode.direct[i]),
        Band::Single(i) => {
            if inode.i1 == NULL_REF {
                return Ok(NULL_REF);
            }
            meta.load_dir_ref(cache, dzone_start, inode.i1)?;
            Ok(meta.dir_ref()?.get_ref(i))
        }
        Band::Double(top, low) => {
            if inode.i2 == NULL_REF {
                return Ok(NULL_REF);
            }
            meta.load_sng_ind(cache, dzone_start, inode.i2)?;
            let second = meta.sng_ind()?.get_ref(top);
            if second == NULL_REF {
                return Ok(NULL_REF);
            }
            meta.load_dir_ref(cache, dzone_start, second)?;
            Ok(meta.dir_ref()?.get_ref(low))
        }
    }
}

fn alloc_indirection_cluster(
    meta: &mut MetaStore,
    cache: &mut BlockCache,
    n_inode: u32,
) -> Result<u32> {
    let n_clust = calloc::alloc(meta, cache, n_inode)?;
    let dzone_start = meta.superblock()?.dzone_start;
    let mut data = MetaStore::read_cluster(cache, dzone_start, n_clust)?;
    data.fill_refs(NULL_REF);
    MetaStore::write_cluster(cache, dzone_start, n_clust, &data)?;
    Ok(n_clust)
}

/// Write `value` at index `k`, allocating any missing indirection cluster
/// along the way and charging `inode.clu_count` for each one created.
fn write_ref_allocating(
    meta: &mut MetaStore,
    cache: &mut BlockCache,
    inode: &mut Inode,
    n_inode: u32,
    k: usize,
    value: u32,
) -> Result<()> {
    let dzone_start = meta.superblock()?.dzone_start;
    match band_of(k)? {
        Band::Direct(i) => {
            inode.direct[i] = value;
        }
        Band::Single(i) => {
            if inode.i1 == NULL_REF {
                inode.i1 = alloc_indirection_cluster(meta, cache, n_inode)?;
                inode.clu_count += 1;
            }
            meta.load_dir_ref(cache, dzone_start, inode.i1)?;
            meta.dir_ref_mut()?.set_ref(i, value);
            meta.store_dir_ref(cache, dzone_start)?;
        }
        Band::Double(top, low) => {
            if inode.i2 == NULL_REF {
                inode.i2 = alloc_indirection_cluster(meta, cache, n_inode)?;
                inode.clu_count += 1;
            }
            meta.load_sng_ind(cache, dzone_start, inode.i2)?;
            let mut second = meta.sng_ind()?.get_ref(top);
            if second == NULL_REF {
                second = alloc_indirection_cluster(meta, cache, n_inode)?;
                meta.load_sng_ind(cache, dzone_start, inode.i2)?;
                meta.sng_ind_mut()?.set_ref(top, second);
                meta.store_sng_ind(cache, dzone_start)?;
                inode.clu_count += 1;
            }
            meta.load_dir_ref(cache, dzone_start, second)?;
            meta.dir_ref_mut()?.set_ref(low, value);
            meta.store_dir_ref(cache, dzone_start)?;
        }
    }
    Ok(())
}

/// Clear the reference at index `k` to `NULL_REF`; requires the
/// intermediate indirection clusters referenced still exist.
fn dissociate(meta: &mut MetaStore, cache: &mut BlockCache, inode: &mut Inode, k: usize) -> Result<()> {
    let dzone_start = meta.superblock()?.dzone_start;
    match band_of(k)? {
        Band::Direct(i) => {
            inode.direct[i] = NULL_REF;
        }
        Band::Single(i) => {
            if inode.i1 == NULL_REF {
                return Ok(());
            }
            meta.load_dir_ref(cache, dzone_start, inode.i1)?;
            meta.dir_ref_mut()?.set_ref(i, NULL_REF);
            meta.store_dir_ref(cache, dzone_start)?;
            if meta.dir_ref()?.all_refs_null() {
                calloc::free(meta, cache, inode.i1)?;
                inode.i1 = NULL_REF;
                inode.clu_count -= 1;
            }
        }
        Band::Double(top, low) => {
            if inode.i2 == NULL_REF {
                return Ok(());
            }
            meta.load_sng_ind(cache, dzone_start, inode.i2)?;
            let second = meta.sng_ind()?.get_ref(top);
            if second == NULL_REF {
                return Ok(());
            }
            meta.load_dir_ref(cache, dzone_start, second)?;
            meta.dir_ref_mut()?.set_ref(low, NULL_REF);
            meta.store_dir_ref(cache, dzone_start)?;
            if meta.dir_ref()?.all_refs_null() {
                calloc::free(meta, cache, second)?;
                inode.clu_count -= 1;
                meta.load_sng_ind(cache, dzone_start, inode.i2)?;
                meta.sng_ind_mut()?.set_ref(top, NULL_REF);
                meta.store_sng_ind(cache, dzone_start)?;
                if meta.sng_ind()?.all_refs_null() {
                    calloc::free(meta, cache, inode.i2)?;
                    inode.i2 = NULL_REF;
                    inode.clu_count -= 1;
                }
            }
        }
    }
    Ok(())
}

/// Splice `n_clust` into the intra-file doubly linked list at position `k`
/// (spec §4.7 AttachLogicalCluster).
fn attach_logical_cluster(
    meta: &mut MetaStore,
    cache: &mut BlockCache,
    inode: &Inode,
    k: usize,
    n_clust: u32,
) -> Result<()> {
    let dzone_start = meta.superblock()?.dzone_start;
    let left = if k == 0 { NULL_REF } else { read_ref(meta, cache, inode, k - 1)? };
    let right = read_ref(meta, cache, inode, k + 1)?;

    let mut data = MetaStore::read_cluster(cache, dzone_start, n_clust)?;
    data.header.prev = left;
    data.header.next = right;
    MetaStore::write_cluster(cache, dzone_start, n_clust, &data)?;

    if left != NULL_REF {
        let mut l = MetaStore::read_cluster(cache, dzone_start, left)?;
        l.header.next = n_clust;
        MetaStore::write_cluster(cache, dzone_start, left, &l)?;
    }
    if right != NULL_REF {
        let mut r = MetaStore::read_cluster(cache, dzone_start, right)?;
        r.header.prev = n_clust;
        MetaStore::write_cluster(cache, dzone_start, right, &r)?;
    }
    Ok(())
}

/// Verify `stat == n_inode`, mark the cluster clean-free, zero its body
/// (spec §4.7 CleanLogicalCluster).
fn clean_logical_cluster(
    meta: &mut MetaStore,
    cache: &mut BlockCache,
    n_inode: u32,
    n_clust: u32,
) -> Result<()> {
    let dzone_start = meta.superblock()?.dzone_start;
    let mut data = MetaStore::read_cluster(cache, dzone_start, n_clust)?;
    if data.header.stat != n_inode {
        return Err(Error::WrongOwnerInode {
            cluster: n_clust,
            expected: n_inode,
            found: data.header.stat,
        });
    }
    data.header.stat = crate::layout::NULL_INODE;
    data.body = [0u8; crate::layout::BSLPC];
    MetaStore::write_cluster(cache, dzone_start, n_clust, &data)?;
    Ok(())
}

/// Core per-index content-tree operation (spec §4.7).
pub fn handle_file_cluster(
    meta: &mut MetaStore,
    cache: &mut BlockCache,
    inode: &mut Inode,
    n_inode: u32,
    k: usize,
    op: TreeOp,
) -> Result<u32> {
    match op {
        TreeOp::Get => read_ref(meta, cache, inode, k),
        TreeOp::Alloc => {
            let existing = read_ref(meta, cache, inode, k)?;
            if existing != NULL_REF {
                return Err(Error::AlreadyInList);
            }
            let n_clust = calloc::alloc(meta, cache, n_inode)?;
            attach_logical_cluster(meta, cache, inode, k, n_clust)?;
            write_ref_allocating(meta, cache, inode, n_inode, k, n_clust)?;
            inode.clu_count += 1;
            debug!("inode {n_inode}: attached cluster {n_clust} at index {k}");
            Ok(n_clust)
        }
        TreeOp::Free => {
            let n_clust = read_ref(meta, cache, inode, k)?;
            if n_clust == NULL_REF {
                return Err(Error::InconsistentNotAllocated(k as u32));
            }
            calloc::free(meta, cache, n_clust)?;
            inode.clu_count -= 1;
            Ok(n_clust)
        }
        TreeOp::FreeClean => {
            let n_clust = read_ref(meta, cache, inode, k)?;
            if n_clust == NULL_REF {
                return Ok(NULL_REF);
            }
            calloc::free(meta, cache, n_clust)?;
            inode.clu_count -= 1;
            dissociate(meta, cache, inode, k)?;
            Ok(n_clust)
        }
        TreeOp::Clean => {
            let n_clust = read_ref(meta, cache, inode, k)?;
            if n_clust == NULL_REF {
                return Ok(NULL_REF);
            }
            clean_logical_cluster(meta, cache, n_inode, n_clust)?;
            dissociate(meta, cache, inode, k)?;
            Ok(n_clust)
        }
    }
}

/// Walk indices `[start_k, MAX_FILE_CLUSTERS)` from the top down, applying
/// `op` to every reachable slot. The reverse order matters: the
/// double-indirect region collapses before the lower bands are touched,
/// so indirection clusters empty out (and free) during the same walk
/// instead of needing a second pass.
pub fn handle_file_clusters(
    meta: &mut MetaStore,
    cache: &mut BlockCache,
    inode: &mut Inode,
    n_inode: u32,
    start_k: usize,
    op: TreeOp,
) -> Result<()> {
    debug_assert!(matches!(op, TreeOp::Free | TreeOp::FreeClean | TreeOp::Clean));
    let max_k = N_DIRECT + RPC + RPC * RPC;
    for k in (start_k..max_k).rev() {
        match handle_file_cluster(meta, cache, inode, n_inode, k, op) {
            Ok(_) => {}
            Err(Error::InconsistentNotAllocated(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// True if cluster index `k` currently resolves to an allocated cluster.
pub fn is_allocated(meta: &mut MetaStore, cache: &mut BlockCache, inode: &Inode, k: usize) -> Result<bool> {
    Ok(read_ref(meta, cache, inode, k)? != NULL_REF)
}

/// Read-only lookup of the cluster reference at index `k`, for callers
/// (Directory) that only ever issue GET and never need a mutable inode.
pub fn get_cluster_ref(meta: &mut MetaStore, cache: &mut BlockCache, inode: &Inode, k: usize) -> Result<u32> {
    read_ref(meta, cache, inode, k)
}

pub fn read_cluster_body(
    meta: &mut MetaStore,
    cache: &mut BlockCache,
    dzone_start: u32,
    n_clust: u32,
) -> Result<DataCluster> {
    MetaStore::read_cluster(cache, dzone_start, n_clust)
}

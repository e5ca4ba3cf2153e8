//! `ClusterAllocator`: the three-tier free-cluster pool of spec §4.5.
//!
//! Operates on a `MetaStore` + `BlockCache` pair rather than owning them,
//! so `ContentTree` and `Directory` above can interleave cluster
//! allocation with their own cluster touches without fighting the borrow
//! checker over a monolithic engine struct.

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::layout::{DataCluster, NULL_REF};
use crate::cache::BlockCache;
use crate::meta::MetaStore;

fn clean_data_cluster_body(data: &mut DataCluster) {
    data.body = [0u8; crate::layout::BSLPC];
}

/// Allocate a free data cluster and charge it to `n_inode`.
pub fn alloc(meta: &mut MetaStore, cache: &mut BlockCache, n_inode: u32) -> Result<u32> {
    let dzone_start = meta.superblock()?.dzone_start;
    if meta.superblock()?.dzone_free == 0 {
        return Err(Error::NoSpace);
    }
    if meta.superblock()?.dzone_retriev.idx as usize >= crate::layout::DZONE_CACHE_SIZE {
        replenish(meta, cache)?;
    }

    let sb = meta.superblock_mut()?;
    let idx = sb.dzone_retriev.idx as usize;
    let n_clust = sb.dzone_retriev.cache[idx];
    sb.dzone_retriev.cache[idx] = NULL_REF;
    sb.dzone_retriev.idx += 1;
    sb.dzone_free -= 1;

    let mut data = MetaStore::read_cluster(cache, dzone_start, n_clust)?;
    if data.header.stat != crate::layout::NULL_INODE {
        warn!("cluster {n_clust} reclaimed dirty (previous owner {})", data.header.stat);
        clean_data_cluster_body(&mut data);
    }
    data.header.prev = NULL_REF;
    data.header.next = NULL_REF;
    data.header.stat = n_inode;
    MetaStore::write_cluster(cache, dzone_start, n_clust, &data)?;
    debug!("cluster {n_clust} allocated to inode {n_inode}");
    Ok(n_clust)
}

/// Return a previously allocated cluster to the free pool.
pub fn free(meta: &mut MetaStore, cache: &mut BlockCache, n_clust: u32) -> Result<()> {
    if n_clust == crate::layout::ROOT_CLUSTER {
        return Err(Error::InvalidCluster(n_clust));
    }
    let dzone_start = meta.superblock()?.dzone_start;
    let dzone_total = meta.superblock()?.dzone_total;
    if n_clust >= dzone_total {
        return Err(Error::InvalidCluster(n_clust));
    }

    let mut data = MetaStore::read_cluster(cache, dzone_start, n_clust)?;
    if data.header.stat == crate::layout::NULL_INODE {
        return Err(Error::InconsistentDataCluster(
            n_clust,
            "freeing an already-free cluster".into(),
        ));
    }
    data.header.prev = NULL_REF;
    data.header.next = NULL_REF;
    MetaStore::write_cluster(cache, dzone_start, n_clust, &data)?;

    let full = meta.superblock()?.dzone_insert.idx as usize >= crate::layout::DZONE_CACHE_SIZE;
    if full {
        deplete(meta, cache)?;
    }
    let sb = meta.superblock_mut()?;
    let idx = sb.dzone_insert.idx as usize;
    sb.dzone_insert.cache[idx] = n_clust;
    sb.dzone_insert.idx += 1;
    sb.dzone_free += 1;
    debug!("cluster {n_clust} freed");
    Ok(())
}

/// Refill the retrieval cache from the spill list (and, if necessary, the
/// insertion cache) per spec §4.5.
fn replenish(meta: &mut MetaStore, cache: &mut BlockCache) -> Result<()> {
    const K: usize = crate::layout::DZONE_CACHE_SIZE;
    let dzone_start = meta.superblock()?.dzone_start;
    let dzone_free = meta.superblock()?.dzone_free;
    let mut nctt = (dzone_free as usize).min(K);
    if nctt == 0 {
        return Err(Error::NoSpace);
    }

    let mut new_cache = [NULL_REF; K];
    let mut write_at = K; // fill from the tail backward as we walk forward
    let mut current = meta.superblock()?.d_head;

    while nctt > 0 {
        if current == NULL_REF {
            // spill exhausted before we got nctt entries: dump the
            // insertion cache into the spill list and keep walking.
            meta.superblock_mut()?.d_head = NULL_REF;
            meta.superblock_mut()?.d_tail = NULL_REF;
            deplete(meta, cache)?;
            current = meta.superblock()?.d_head;
            if current == NULL_REF {
                return Err(Error::InconsistentFreeCluster(
                    "spill and insertion cache both exhausted short of dZoneFree".into(),
                ));
            }
        }

        let mut data = MetaStore::read_cluster(cache, dzone_start, current)?;
        let next = data.header.next;
        data.header.prev = NULL_REF;
        data.header.next = NULL_REF;
        MetaStore::write_cluster(cache, dzone_start, current, &data)?;

        write_at -= 1;
        new_cache[write_at] = current;
        nctt -= 1;
        current = next;
    }

    if current != NULL_REF {
        // patch the new head's prev pointer
        let mut data = MetaStore::read_cluster(cache, dzone_start, current)?;
        data.header.prev = NULL_REF;
        MetaStore::write_cluster(cache, dzone_start, current, &data)?;
    }

    let sb = meta.superblock_mut()?;
    sb.dzone_retriev.cache = new_cache;
    sb.dzone_retriev.idx = write_at as u32;
    sb.d_head = current;
    if current == NULL_REF {
        sb.d_tail = NULL_REF;
    }
    Ok(())
}

/// Move every entry of the insertion cache to the tail of the spill list
/// per spec §4.5.
fn deplete(meta: &mut MetaStore, cache: &mut BlockCache) -> Result<()> {
    const K: usize = crate::layout::DZONE_CACHE_SIZE;
    let dzone_start = meta.superblock()?.dzone_start;
    let insert = meta.superblock()?.dzone_insert;
    let n = insert.idx as usize;
    if n == 0 {
        return Ok(());
    }

    let old_tail = meta.superblock()?.d_tail;
    for i in 0..n {
        let this = insert.cache[i];
        let prev = if i == 0 { old_tail } else { insert.cache[i - 1] };
        let next = if i + 1 < n { insert.cache[i + 1] } else { NULL_REF };
        let mut data = MetaStore::read_cluster(cache, dzone_start, this)?;
        data.header.prev = prev;
        data.header.next = next;
        MetaStore::write_cluster(cache, dzone_start, this, &data)?;
    }

    if old_tail != NULL_REF {
        let mut data = MetaStore::read_cluster(cache, dzone_start, old_tail)?;
        data.header.next = insert.cache[0];
        MetaStore::write_cluster(cache, dzone_start, old_tail, &data)?;
    }

    let sb = meta.superblock_mut()?;
    sb.d_tail = insert.cache[n - 1];
    if sb.d_head == NULL_REF {
        sb.d_head = insert.cache[0];
    }
    sb.dzone_insert.cache = [NULL_REF; K];
    sb.dzone_insert.idx = 0;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RawDevice;
    use crate::format::{format, FormatOptions};
    use tempfile::NamedTempFile;

    fn fresh(n_blocks: u64, n_inodes: u32) -> (BlockCache, MetaStore) {
        let tmp = NamedTempFile::new().unwrap();
        let mut device = RawDevice::create(tmp.path(), n_blocks).unwrap();
        std::mem::forget(tmp);
        format(
            &mut device,
            FormatOptions {
                volume_name: "test".into(),
                inode_count: n_inodes,
            },
        )
        .unwrap();
        let mut cache = BlockCache::new(device);
        let mut meta = MetaStore::new();
        meta.load_superblock(&mut cache).unwrap();
        (cache, meta)
    }

    #[test]
    fn alloc_free_conserves_count() {
        let (mut cache, mut meta) = fresh(1024, 128);
        let total_free_before = meta.superblock().unwrap().dzone_free;
        let mut allocated = Vec::new();
        for _ in 0..75 {
            allocated.push(alloc(&mut meta, &mut cache, 1).unwrap());
        }
        assert_eq!(
            meta.superblock().unwrap().dzone_free,
            total_free_before - 75
        );
        let unique: std::collections::HashSet<_> = allocated.iter().collect();
        assert_eq!(unique.len(), allocated.len());

        for c in allocated {
            free(&mut meta, &mut cache, c).unwrap();
        }
        assert_eq!(meta.superblock().unwrap().dzone_free, total_free_before);
    }
}

//! `MetaStore`: the four typed resident slots of spec §4.3.
//!
//! A sticky error flag guards each slot independently: once a load fails
//! validation, that slot refuses further use (returning the same
//! structural error) until it is reloaded, mirroring the source's
//! `sbError`/`intError`/`sircError`/`drcError` booleans.

use crate::cache::BlockCache;
use crate::error::{Error, Result};
use crate::layout::{
    ClusterHeader, DataCluster, Inode, Superblock, BLOCKS_PER_CLUSTER, BLOCK_SIZE, BSLPC, CLUSTER_SIZE,
    INODE_SIZE, IPB,
};

struct InodeBlockSlot {
    block_index: u32,
    inodes: [Inode; IPB],
}

struct ClusterSlot {
    n_clust: u32,
    data: DataCluster,
}

#[derive(Default)]
pub struct MetaStore {
    superblock: Option<Superblock>,
    sb_error: bool,

    inode_block: Option<InodeBlockSlot>,
    inode_block_error: bool,

    sng_ind: Option<ClusterSlot>,
    sng_ind_error: bool,

    dir_ref: Option<ClusterSlot>,
    dir_ref_error: bool,
}

fn read_block_array(buf: &[u8; BLOCK_SIZE]) -> [Inode; IPB] {
    let mut out: [Inode; IPB] = [Inode::free(); IPB];
    for (i, slot) in out.iter_mut().enumerate() {
        let off = i * INODE_SIZE;
        let mut raw = [0u8; INODE_SIZE];
        raw.copy_from_slice(&buf[off..off + INODE_SIZE]);
        *slot = Inode::from_bytes(&raw);
    }
    out
}

fn write_block_array(inodes: &[Inode; IPB]) -> [u8; BLOCK_SIZE] {
    let mut buf = [0u8; BLOCK_SIZE];
    for (i, inode) in inodes.iter().enumerate() {
        let off = i * INODE_SIZE;
        buf[off..off + INODE_SIZE].copy_from_slice(&inode.to_bytes());
    }
    buf
}

impl MetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- Superblock --------------------------------------------------

    pub fn load_superblock(&mut self, cache: &mut BlockCache) -> Result<()> {
        if self.sb_error {
            return Err(Error::InconsistentSuperBlock("sticky error flag set".into()));
        }
        let mut buf = [0u8; BLOCK_SIZE];
        cache.read_block(0, &mut buf)?;
        match Superblock::from_bytes(&buf) {
            Ok(sb) => {
                self.superblock = Some(sb);
                Ok(())
            }
            Err(e) => {
                self.sb_error = true;
                Err(e)
            }
        }
    }

    pub fn set_superblock(&mut self, sb: Superblock) {
        self.superblock = Some(sb);
        self.sb_error = false;
    }

    pub fn superblock(&self) -> Result<&Superblock> {
        if self.sb_error {
            return Err(Error::InconsistentSuperBlock("sticky error flag set".into()));
        }
        self.superblock
            .as_ref()
            .ok_or_else(|| Error::Inconsistent("superblock not loaded".into()))
    }

    pub fn superblock_mut(&mut self) -> Result<&mut Superblock> {
        if self.sb_error {
            return Err(Error::InconsistentSuperBlock("sticky error flag set".into()));
        }
        self.superblock
            .as_mut()
            .ok_or_else(|| Error::Inconsistent("superblock not loaded".into()))
    }

    pub fn store_superblock(&mut self, cache: &mut BlockCache) -> Result<()> {
        let sb = self.superblock()?;
        let buf = sb.to_bytes();
        cache.write_block(0, &buf)
    }

    // ---- Coordinate conversions ---------------------------------------

    /// `(block index within the inode table, offset within that block)`.
    pub fn convert_inode_ref(n_inode: u32, i_total: u32) -> Result<(u32, u32)> {
        if n_inode >= i_total {
            return Err(Error::InvalidInode(n_inode));
        }
        Ok((n_inode / IPB as u32, n_inode % IPB as u32))
    }

    /// `(logical cluster index, offset within that cluster's body)`.
    pub fn convert_byte_pos(p: u64) -> (u32, u32) {
        ((p / BSLPC as u64) as u32, (p % BSLPC as u64) as u32)
    }

    // ---- InodeBlock ----------------------------------------------------

    pub fn load_inode_block(
        &mut self,
        cache: &mut BlockCache,
        itable_start: u32,
        block_index: u32,
    ) -> Result<()> {
        if self.inode_block_error {
            return Err(Error::InconsistentInodeTable("sticky error flag set".into()));
        }
        if let Some(slot) = &self.inode_block {
            if slot.block_index == block_index {
                return Ok(());
            }
        }
        let block_no = itable_start as u64 + block_index as u64;
        let mut buf = [0u8; BLOCK_SIZE];
        cache.read_block(block_no, &mut buf)?;
        self.inode_block = Some(InodeBlockSlot {
            block_index,
            inodes: read_block_array(&buf),
        });
        Ok(())
    }

    pub fn inode_at(&self, offset: u32) -> Result<Inode> {
        if self.inode_block_error {
            return Err(Error::InconsistentInodeTable("sticky error flag set".into()));
        }
        let slot = self
            .inode_block
            .as_ref()
            .ok_or_else(|| Error::Inconsistent("inode block not loaded".into()))?;
        Ok(slot.inodes[offset as usize])
    }

    pub fn set_inode_at(&mut self, offset: u32, inode: Inode) -> Result<()> {
        if self.inode_block_error {
            return Err(Error::InconsistentInodeTable("sticky error flag set".into()));
        }
        let slot = self
            .inode_block
            .as_mut()
            .ok_or_else(|| Error::Inconsistent("inode block not loaded".into()))?;
        slot.inodes[offset as usize] = inode;
        Ok(())
    }

    pub fn store_inode_block(&mut self, cache: &mut BlockCache, itable_start: u32) -> Result<()> {
        let slot = self
            .inode_block
            .as_ref()
            .ok_or_else(|| Error::Inconsistent("inode block not loaded".into()))?;
        let buf = write_block_array(&slot.inodes);
        let block_no = itable_start as u64 + slot.block_index as u64;
        cache.write_block(block_no, &buf)
    }

    // ---- data-zone cluster slots ---------------------------------------

    fn cluster_block_no(dzone_start: u32, n_clust: u32) -> u64 {
        dzone_start as u64 + n_clust as u64 * BLOCKS_PER_CLUSTER as u64
    }

    fn load_cluster_slot(
        cache: &mut BlockCache,
        dzone_start: u32,
        n_clust: u32,
    ) -> Result<DataCluster> {
        let block_no = Self::cluster_block_no(dzone_start, n_clust);
        let mut buf = [0u8; CLUSTER_SIZE];
        for i in 0..BLOCKS_PER_CLUSTER {
            let mut block_buf = [0u8; BLOCK_SIZE];
            cache.read_block(block_no + i as u64, &mut block_buf)?;
            buf[i * BLOCK_SIZE..(i + 1) * BLOCK_SIZE].copy_from_slice(&block_buf);
        }
        Ok(DataCluster::from_bytes(&buf))
    }

    fn store_cluster_slot(
        cache: &mut BlockCache,
        dzone_start: u32,
        n_clust: u32,
        data: &DataCluster,
    ) -> Result<()> {
        let block_no = Self::cluster_block_no(dzone_start, n_clust);
        let buf = data.to_bytes();
        for i in 0..BLOCKS_PER_CLUSTER {
            let mut block_buf = [0u8; BLOCK_SIZE];
            block_buf.copy_from_slice(&buf[i * BLOCK_SIZE..(i + 1) * BLOCK_SIZE]);
            cache.write_block(block_no + i as u64, &block_buf)?;
        }
        Ok(())
    }

    pub fn load_sng_ind(
        &mut self,
        cache: &mut BlockCache,
        dzone_start: u32,
        n_clust: u32,
    ) -> Result<()> {
        if self.sng_ind_error {
            return Err(Error::InconsistentDataZone("sticky error flag set".into()));
        }
        if let Some(slot) = &self.sng_ind {
            if slot.n_clust == n_clust {
                return Ok(());
            }
        }
        let data = Self::load_cluster_slot(cache, dzone_start, n_clust)?;
        self.sng_ind = Some(ClusterSlot { n_clust, data });
        Ok(())
    }

    pub fn sng_ind(&self) -> Result<&DataCluster> {
        if self.sng_ind_error {
            return Err(Error::InconsistentDataZone("sticky error flag set".into()));
        }
        Ok(&self
            .sng_ind
            .as_ref()
            .ok_or_else(|| Error::Inconsistent("sng-ind cluster not loaded".into()))?
            .data)
    }

    pub fn sng_ind_mut(&mut self) -> Result<&mut DataCluster> {
        if self.sng_ind_error {
            return Err(Error::InconsistentDataZone("sticky error flag set".into()));
        }
        Ok(&mut self
            .sng_ind
            .as_mut()
            .ok_or_else(|| Error::Inconsistent("sng-ind cluster not loaded".into()))?
            .data)
    }

    pub fn store_sng_ind(&mut self, cache: &mut BlockCache, dzone_start: u32) -> Result<()> {
        let slot = self
            .sng_ind
            .as_ref()
            .ok_or_else(|| Error::Inconsistent("sng-ind cluster not loaded".into()))?;
        Self::store_cluster_slot(cache, dzone_start, slot.n_clust, &slot.data)
    }

    pub fn load_dir_ref(
        &mut self,
        cache: &mut BlockCache,
        dzone_start: u32,
        n_clust: u32,
    ) -> Result<()> {
        if self.dir_ref_error {
            return Err(Error::InconsistentDataZone("sticky error flag set".into()));
        }
        if let Some(slot) = &self.dir_ref {
            if slot.n_clust == n_clust {
                return Ok(());
            }
        }
        let data = Self::load_cluster_slot(cache, dzone_start, n_clust)?;
        self.dir_ref = Some(ClusterSlot { n_clust, data });
        Ok(())
    }

    pub fn dir_ref(&self) -> Result<&DataCluster> {
        if self.dir_ref_error {
            return Err(Error::InconsistentDataZone("sticky error flag set".into()));
        }
        Ok(&self
            .dir_ref
            .as_ref()
            .ok_or_else(|| Error::Inconsistent("dir-ref cluster not loaded".into()))?
            .data)
    }

    pub fn dir_ref_mut(&mut self) -> Result<&mut DataCluster> {
        if self.dir_ref_error {
            return Err(Error::InconsistentDataZone("sticky error flag set".into()));
        }
        Ok(&mut self
            .dir_ref
            .as_mut()
            .ok_or_else(|| Error::Inconsistent("dir-ref cluster not loaded".into()))?
            .data)
    }

    pub fn store_dir_ref(&mut self, cache: &mut BlockCache, dzone_start: u32) -> Result<()> {
        let slot = self
            .dir_ref
            .as_ref()
            .ok_or_else(|| Error::Inconsistent("dir-ref cluster not loaded".into()))?;
        Self::store_cluster_slot(cache, dzone_start, slot.n_clust, &slot.data)
    }

    /// Read an arbitrary data cluster straight through the cache, bypassing
    /// slot residency. Used by content-tree/directory code that needs to
    /// touch many clusters in one call without thrashing the typed slots.
    pub fn read_cluster(cache: &mut BlockCache, dzone_start: u32, n_clust: u32) -> Result<DataCluster> {
        Self::load_cluster_slot(cache, dzone_start, n_clust)
    }

    pub fn write_cluster(
        cache: &mut BlockCache,
        dzone_start: u32,
        n_clust: u32,
        data: &DataCluster,
    ) -> Result<()> {
        Self::store_cluster_slot(cache, dzone_start, n_clust, data)
    }

    pub fn write_cluster_header_only(
        cache: &mut BlockCache,
        dzone_start: u32,
        n_clust: u32,
        header: ClusterHeader,
    ) -> Result<()> {
        let mut data = Self::load_cluster_slot(cache, dzone_start, n_clust)?;
        data.header = header;
        Self::store_cluster_slot(cache, dzone_start, n_clust, &data)
    }
}

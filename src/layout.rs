//! On-disk layout: fixed constants and the byte-exact record types of
//! spec §3/§6.
//!
//! The teacher crate (`songzhi-ext2-rs`) represents on-disk records as
//! `#[repr(C, packed)]` structs read out of a byte slice with an unsafe
//! `dynamic_cast`. That pattern relies on the host and on-disk byte orders
//! matching and on taking references into packed fields, which is exactly
//! the "aliased pointer / type punning" trap spec §9 calls out for
//! redesign. Records here are instead always read and written through
//! explicit little-endian `to_bytes`/`from_bytes` pairs operating on the
//! fixed-size buffers `BlockCache` already hands back — no unsafe, no
//! dependence on host endianness.

use crate::error::{Error, Result};

pub const BLOCK_SIZE: usize = 512;
pub const BLOCKS_PER_CLUSTER: usize = 4;
pub const CLUSTER_SIZE: usize = BLOCK_SIZE * BLOCKS_PER_CLUSTER;

pub const MAX_NAME: usize = 59;
pub const NAME_FIELD_SIZE: usize = MAX_NAME + 1;
pub const MAX_PATH: usize = 254;

pub const N_DIRECT: usize = 7;
pub const RPC: usize = CLUSTER_SIZE / 4 - 3;
pub const BSLPC: usize = CLUSTER_SIZE - 12;
pub const DIR_ENTRY_SIZE: usize = 64;
pub const DPC: usize = BSLPC / DIR_ENTRY_SIZE;
pub const INODE_SIZE: usize = 64;
pub const IPB: usize = BLOCK_SIZE / INODE_SIZE;
pub const DZONE_CACHE_SIZE: usize = 50;

pub const MAX_FILE_CLUSTERS: usize = N_DIRECT + RPC + RPC * RPC;
pub const MAX_FILE_SIZE: u64 = BSLPC as u64 * MAX_FILE_CLUSTERS as u64;
pub const MAX_CLUSTER_COUNT: usize = MAX_FILE_CLUSTERS + 2 + RPC;

pub const MAGIC: u32 = 0x65FE;
pub const VERSION: u32 = 0x2014;
pub const NULL_REF: u32 = 0xFFFF_FFFF;
pub const NULL_INODE: u32 = NULL_REF;
pub const NULL_CLUSTER: u32 = NULL_REF;

pub const ROOT_INODE: u32 = 0;
pub const ROOT_CLUSTER: u32 = 0;

pub const PRU: u32 = 0;
pub const NPRU: u32 = 1;

pub const VOLUME_NAME_SIZE: usize = 23;

const SUPERBLOCK_HEADER_SIZE: usize = 4 + 4 + (VOLUME_NAME_SIZE + 1) + 4 + 4;
const SUPERBLOCK_ITABLE_META_SIZE: usize = 4 * 6;
const SUPERBLOCK_DZONE_META_SIZE: usize = 4 * 3 + 2 * (4 + DZONE_CACHE_SIZE * 4) + 4 * 2;
const SUPERBLOCK_BODY_SIZE: usize =
    SUPERBLOCK_HEADER_SIZE + SUPERBLOCK_ITABLE_META_SIZE + SUPERBLOCK_DZONE_META_SIZE;
pub const SUPERBLOCK_PAD: usize = BLOCK_SIZE - SUPERBLOCK_BODY_SIZE;

mod mode_bits {
    use bitflags::bitflags;

    bitflags! {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct Mode: u16 {
            const O_EXEC = 0o001;
            const O_WRITE = 0o002;
            const O_READ = 0o004;
            const G_EXEC = 0o010;
            const G_WRITE = 0o020;
            const G_READ = 0o040;
            const U_EXEC = 0o100;
            const U_WRITE = 0o200;
            const U_READ = 0o400;
            const SYMLINK = 1 << 9;
            const FILE = 1 << 10;
            const DIR = 1 << 11;
            const FREE = 1 << 12;
        }
    }
}
pub use mode_bits::Mode;

pub const TYPE_MASK: Mode = Mode::from_bits_truncate(
    Mode::SYMLINK.bits() | Mode::FILE.bits() | Mode::DIR.bits(),
);
pub const PERM_MASK: Mode = Mode::from_bits_truncate(0o777);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Symlink,
    File,
    Dir,
}

impl FileType {
    pub fn mode_bit(self) -> Mode {
        match self {
            FileType::Symlink => Mode::SYMLINK,
            FileType::File => Mode::FILE,
            FileType::Dir => Mode::DIR,
        }
    }
}

/// A fixed-size array of `DZONE_CACHE_SIZE` free-cluster references plus a
/// fill index, used for both the retrieval and insertion caches (spec §3).
#[derive(Debug, Clone, Copy)]
pub struct FreeClusterCache {
    pub idx: u32,
    pub cache: [u32; DZONE_CACHE_SIZE],
}

impl FreeClusterCache {
    pub const fn empty_retrieval() -> Self {
        Self {
            idx: DZONE_CACHE_SIZE as u32,
            cache: [NULL_REF; DZONE_CACHE_SIZE],
        }
    }

    pub const fn empty_insertion() -> Self {
        Self {
            idx: 0,
            cache: [NULL_REF; DZONE_CACHE_SIZE],
        }
    }

    fn write_to(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.idx.to_le_bytes());
        for (i, v) in self.cache.iter().enumerate() {
            let off = 4 + i * 4;
            buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
        }
    }

    fn read_from(buf: &[u8]) -> Self {
        let idx = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let mut cache = [0u32; DZONE_CACHE_SIZE];
        for (i, slot) in cache.iter_mut().enumerate() {
            let off = 4 + i * 4;
            *slot = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        }
        Self { idx, cache }
    }

    const SIZE: usize = 4 + DZONE_CACHE_SIZE * 4;
}

/// The superblock (spec §3, block 0).
#[derive(Debug, Clone)]
pub struct Superblock {
    pub magic: u32,
    pub version: u32,
    pub name: String,
    pub n_total: u32,
    pub mount_status: u32,

    pub itable_start: u32,
    pub itable_size: u32,
    pub i_total: u32,
    pub i_free: u32,
    pub i_head: u32,
    pub i_tail: u32,

    pub dzone_start: u32,
    pub dzone_total: u32,
    pub dzone_free: u32,
    pub dzone_retriev: FreeClusterCache,
    pub dzone_insert: FreeClusterCache,
    pub d_head: u32,
    pub d_tail: u32,
}

impl Superblock {
    pub fn to_bytes(&self) -> [u8; BLOCK_SIZE] {
        let mut buf = [0u8; BLOCK_SIZE];
        let mut off = 0;
        buf[off..off + 4].copy_from_slice(&self.magic.to_le_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&self.version.to_le_bytes());
        off += 4;
        let name_bytes = self.name.as_bytes();
        let n = name_bytes.len().min(VOLUME_NAME_SIZE);
        buf[off..off + n].copy_from_slice(&name_bytes[..n]);
        off += VOLUME_NAME_SIZE + 1;
        buf[off..off + 4].copy_from_slice(&self.n_total.to_le_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&self.mount_status.to_le_bytes());
        off += 4;

        for v in [
            self.itable_start,
            self.itable_size,
            self.i_total,
            self.i_free,
            self.i_head,
            self.i_tail,
            self.dzone_start,
            self.dzone_total,
            self.dzone_free,
        ] {
            buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
            off += 4;
        }

        self.dzone_retriev
            .write_to(&mut buf[off..off + FreeClusterCache::SIZE]);
        off += FreeClusterCache::SIZE;
        self.dzone_insert
            .write_to(&mut buf[off..off + FreeClusterCache::SIZE]);
        off += FreeClusterCache::SIZE;

        buf[off..off + 4].copy_from_slice(&self.d_head.to_le_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&self.d_tail.to_le_bytes());
        off += 4;

        debug_assert_eq!(off, SUPERBLOCK_BODY_SIZE);
        buf
    }

    pub fn from_bytes(buf: &[u8; BLOCK_SIZE]) -> Result<Self> {
        let mut off = 0;
        let magic = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let version = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let name_raw = &buf[off..off + VOLUME_NAME_SIZE];
        let nul = name_raw.iter().position(|&b| b == 0).unwrap_or(name_raw.len());
        let name = String::from_utf8_lossy(&name_raw[..nul]).into_owned();
        off += VOLUME_NAME_SIZE + 1;
        let n_total = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let mount_status = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;

        let mut ints = [0u32; 9];
        for slot in ints.iter_mut() {
            *slot = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
            off += 4;
        }
        let [itable_start, itable_size, i_total, i_free, i_head, i_tail, dzone_start, dzone_total, dzone_free] =
            ints;

        let dzone_retriev = FreeClusterCache::read_from(&buf[off..off + FreeClusterCache::SIZE]);
        off += FreeClusterCache::SIZE;
        let dzone_insert = FreeClusterCache::read_from(&buf[off..off + FreeClusterCache::SIZE]);
        off += FreeClusterCache::SIZE;

        let d_head = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let d_tail = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        debug_assert_eq!(off, SUPERBLOCK_BODY_SIZE);

        if magic != MAGIC {
            return Err(Error::InconsistentSuperBlock(format!(
                "bad magic number {magic:#x}"
            )));
        }

        Ok(Self {
            magic,
            version,
            name,
            n_total,
            mount_status,
            itable_start,
            itable_size,
            i_total,
            i_free,
            i_head,
            i_tail,
            dzone_start,
            dzone_total,
            dzone_free,
            dzone_retriev,
            dzone_insert,
            d_head,
            d_tail,
        })
    }
}

/// Variable-context interpretation of an inode's `(v_d1, v_d2)` pair (spec
/// §3): timestamps when in use, free-list links when free.
#[derive(Debug, Clone, Copy)]
pub enum VarContext {
    InUse { atime: u32, mtime: u32 },
    Free { next: u32, prev: u32 },
}

/// The 64-byte on-disk inode record (spec §3).
#[derive(Debug, Clone, Copy)]
pub struct Inode {
    pub mode: Mode,
    pub ref_count: u16,
    pub owner: u32,
    pub group: u32,
    pub size: u32,
    pub clu_count: u32,
    pub v_d1: u32,
    pub v_d2: u32,
    pub direct: [u32; N_DIRECT],
    pub i1: u32,
    pub i2: u32,
}

impl Inode {
    pub const fn free() -> Self {
        Self {
            mode: Mode::FREE,
            ref_count: 0,
            owner: 0,
            group: 0,
            size: 0,
            clu_count: 0,
            v_d1: NULL_REF,
            v_d2: NULL_REF,
            direct: [NULL_REF; N_DIRECT],
            i1: NULL_REF,
            i2: NULL_REF,
        }
    }

    pub fn is_free(&self) -> bool {
        self.mode.contains(Mode::FREE)
    }

    pub fn file_type(&self) -> Option<FileType> {
        if self.mode.contains(Mode::FREE) {
            return None;
        }
        if self.mode.contains(Mode::DIR) {
            Some(FileType::Dir)
        } else if self.mode.contains(Mode::FILE) {
            Some(FileType::File)
        } else if self.mode.contains(Mode::SYMLINK) {
            Some(FileType::Symlink)
        } else {
            None
        }
    }

    pub fn var_context(&self) -> VarContext {
        if self.is_free() {
            VarContext::Free {
                next: self.v_d1,
                prev: self.v_d2,
            }
        } else {
            VarContext::InUse {
                atime: self.v_d1,
                mtime: self.v_d2,
            }
        }
    }

    pub fn set_free_links(&mut self, next: u32, prev: u32) {
        self.v_d1 = next;
        self.v_d2 = prev;
    }

    pub fn set_times(&mut self, atime: u32, mtime: u32) {
        self.v_d1 = atime;
        self.v_d2 = mtime;
    }

    pub fn to_bytes(&self) -> [u8; INODE_SIZE] {
        let mut buf = [0u8; INODE_SIZE];
        buf[0..2].copy_from_slice(&self.mode.bits().to_le_bytes());
        buf[2..4].copy_from_slice(&self.ref_count.to_le_bytes());
        buf[4..8].copy_from_slice(&self.owner.to_le_bytes());
        buf[8..12].copy_from_slice(&self.group.to_le_bytes());
        buf[12..16].copy_from_slice(&self.size.to_le_bytes());
        buf[16..20].copy_from_slice(&self.clu_count.to_le_bytes());
        buf[20..24].copy_from_slice(&self.v_d1.to_le_bytes());
        buf[24..28].copy_from_slice(&self.v_d2.to_le_bytes());
        for (i, d) in self.direct.iter().enumerate() {
            let off = 28 + i * 4;
            buf[off..off + 4].copy_from_slice(&d.to_le_bytes());
        }
        buf[56..60].copy_from_slice(&self.i1.to_le_bytes());
        buf[60..64].copy_from_slice(&self.i2.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; INODE_SIZE]) -> Self {
        let mode = Mode::from_bits_truncate(u16::from_le_bytes(buf[0..2].try_into().unwrap()));
        let ref_count = u16::from_le_bytes(buf[2..4].try_into().unwrap());
        let owner = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let group = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let size = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        let clu_count = u32::from_le_bytes(buf[16..20].try_into().unwrap());
        let v_d1 = u32::from_le_bytes(buf[20..24].try_into().unwrap());
        let v_d2 = u32::from_le_bytes(buf[24..28].try_into().unwrap());
        let mut direct = [0u32; N_DIRECT];
        for (i, d) in direct.iter_mut().enumerate() {
            let off = 28 + i * 4;
            *d = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        }
        let i1 = u32::from_le_bytes(buf[56..60].try_into().unwrap());
        let i2 = u32::from_le_bytes(buf[60..64].try_into().unwrap());
        Self {
            mode,
            ref_count,
            owner,
            group,
            size,
            clu_count,
            v_d1,
            v_d2,
            direct,
            i1,
            i2,
        }
    }
}

/// Header of a data cluster (spec §3); the body is interpreted separately
/// by `DataCluster` depending on what the caller is using the cluster for.
#[derive(Debug, Clone, Copy)]
pub struct ClusterHeader {
    pub prev: u32,
    pub next: u32,
    pub stat: u32,
}

impl ClusterHeader {
    pub const SIZE: usize = 12;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.prev.to_le_bytes());
        buf[4..8].copy_from_slice(&self.next.to_le_bytes());
        buf[8..12].copy_from_slice(&self.stat.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            prev: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            next: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            stat: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
        }
    }
}

/// A whole `CLUSTER_SIZE`-byte data cluster: header plus an opaque body.
/// The body is never given a static type; `as_bytes`/`as_refs`/
/// `as_dir_entries` are the only sanctioned views, matching the C union's
/// role without its aliasing hazards (spec §9).
#[derive(Debug, Clone)]
pub struct DataCluster {
    pub header: ClusterHeader,
    pub body: [u8; BSLPC],
}

impl DataCluster {
    pub fn zeroed() -> Self {
        Self {
            header: ClusterHeader {
                prev: NULL_REF,
                next: NULL_REF,
                stat: NULL_INODE,
            },
            body: [0u8; BSLPC],
        }
    }

    pub fn to_bytes(&self) -> [u8; CLUSTER_SIZE] {
        let mut buf = [0u8; CLUSTER_SIZE];
        buf[0..ClusterHeader::SIZE].copy_from_slice(&self.header.to_bytes());
        buf[ClusterHeader::SIZE..].copy_from_slice(&self.body);
        buf
    }

    pub fn from_bytes(buf: &[u8; CLUSTER_SIZE]) -> Self {
        let header = ClusterHeader::from_bytes(&buf[0..ClusterHeader::SIZE]);
        let mut body = [0u8; BSLPC];
        body.copy_from_slice(&buf[ClusterHeader::SIZE..]);
        Self { header, body }
    }

    /// View the body as `RPC` little-endian cluster references.
    pub fn refs(&self) -> [u32; RPC] {
        let mut out = [0u32; RPC];
        for (i, slot) in out.iter_mut().enumerate() {
            let off = i * 4;
            *slot = u32::from_le_bytes(self.body[off..off + 4].try_into().unwrap());
        }
        out
    }

    pub fn set_ref(&mut self, idx: usize, value: u32) {
        let off = idx * 4;
        self.body[off..off + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn get_ref(&self, idx: usize) -> u32 {
        let off = idx * 4;
        u32::from_le_bytes(self.body[off..off + 4].try_into().unwrap())
    }

    pub fn fill_refs(&mut self, value: u32) {
        for i in 0..RPC {
            self.set_ref(i, value);
        }
    }

    pub fn all_refs_null(&self) -> bool {
        (0..RPC).all(|i| self.get_ref(i) == NULL_REF)
    }

    /// Directory entry at `idx` (0-based, within this cluster).
    pub fn dir_entry(&self, idx: usize) -> DirEntry {
        let off = idx * DIR_ENTRY_SIZE;
        DirEntry::from_bytes(&self.body[off..off + DIR_ENTRY_SIZE])
    }

    pub fn set_dir_entry(&mut self, idx: usize, entry: &DirEntry) {
        let off = idx * DIR_ENTRY_SIZE;
        self.body[off..off + DIR_ENTRY_SIZE].copy_from_slice(&entry.to_bytes());
    }
}

/// A 64-byte directory entry (spec §3).
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: [u8; NAME_FIELD_SIZE],
    pub n_inode: u32,
}

impl DirEntry {
    pub fn clean_free() -> Self {
        Self {
            name: [0u8; NAME_FIELD_SIZE],
            n_inode: NULL_INODE,
        }
    }

    pub fn is_in_use(&self) -> bool {
        self.n_inode != NULL_INODE
    }

    pub fn is_clean_free(&self) -> bool {
        self.n_inode == NULL_INODE && self.name[0] == 0 && self.name[MAX_NAME] == 0
    }

    pub fn is_dirty_free(&self) -> bool {
        self.n_inode == NULL_INODE && !self.is_clean_free()
    }

    pub fn named(name: &str, n_inode: u32) -> Result<Self> {
        if name.len() > MAX_NAME {
            return Err(Error::NameTooLong);
        }
        let mut buf = [0u8; NAME_FIELD_SIZE];
        buf[..name.len()].copy_from_slice(name.as_bytes());
        Ok(Self {
            name: buf,
            n_inode,
        })
    }

    pub fn name_str(&self) -> String {
        let nul = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..nul]).into_owned()
    }

    /// Mark a formerly in-use slot dirty-free by swapping the first and
    /// last bytes of its name, preserving forensic traces (spec §3).
    pub fn mark_dirty_free(&mut self) {
        self.name.swap(0, MAX_NAME);
        self.n_inode = NULL_INODE;
    }

    pub fn to_bytes(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut buf = [0u8; DIR_ENTRY_SIZE];
        buf[0..NAME_FIELD_SIZE].copy_from_slice(&self.name);
        buf[60..64].copy_from_slice(&self.n_inode.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        let mut name = [0u8; NAME_FIELD_SIZE];
        name.copy_from_slice(&buf[0..NAME_FIELD_SIZE]);
        let n_inode = u32::from_le_bytes(buf[60..64].try_into().unwrap());
        Self { name, n_inode }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(INODE_SIZE, 64);
        assert_eq!(DIR_ENTRY_SIZE, 64);
        assert_eq!(RPC, 509);
        assert_eq!(DPC, 31);
        assert_eq!(IPB, 8);
        assert_eq!(SUPERBLOCK_BODY_SIZE + SUPERBLOCK_PAD, BLOCK_SIZE);
    }

    #[test]
    fn superblock_roundtrip() {
        let sb = Superblock {
            magic: MAGIC,
            version: VERSION,
            name: "vol".to_string(),
            n_total: 1024,
            mount_status: NPRU,
            itable_start: 1,
            itable_size: 16,
            i_total: 128,
            i_free: 127,
            i_head: 1,
            i_tail: 127,
            dzone_start: 17,
            dzone_total: 200,
            dzone_free: 199,
            dzone_retriev: FreeClusterCache::empty_retrieval(),
            dzone_insert: FreeClusterCache::empty_insertion(),
            d_head: NULL_REF,
            d_tail: NULL_REF,
        };
        let bytes = sb.to_bytes();
        let back = Superblock::from_bytes(&bytes).unwrap();
        assert_eq!(back.name, "vol");
        assert_eq!(back.n_total, 1024);
        assert_eq!(back.i_free, 127);
        assert_eq!(back.dzone_total, 200);
    }

    #[test]
    fn inode_roundtrip() {
        let mut inode = Inode::free();
        inode.mode = Mode::FILE;
        inode.owner = 7;
        inode.direct[2] = 42;
        let bytes = inode.to_bytes();
        let back = Inode::from_bytes(&bytes);
        assert_eq!(back.owner, 7);
        assert_eq!(back.direct[2], 42);
        assert_eq!(back.file_type(), Some(FileType::File));
    }

    #[test]
    fn dir_entry_dirty_roundtrip() {
        let mut e = DirEntry::named("foo", 5).unwrap();
        e.mark_dirty_free();
        assert!(e.is_dirty_free());
        assert!(!e.is_clean_free());
    }
}

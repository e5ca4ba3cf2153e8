//! `Engine`: the public, POSIX-shaped operation surface that wires every
//! lower layer together (spec §5).
//!
//! All state lives in two fields, `cache` and `meta`; every call below
//! borrows them explicitly into the free functions of the layers beneath
//! rather than modeling those layers as methods, so two different
//! operations never fight the borrow checker over `&mut self`.

use std::path::Path;

use log::info;

use crate::access::{access_granted, Access, Caller};
use crate::cache::BlockCache;
use crate::consistency;
use crate::content_tree::{self, TreeOp};
use crate::device::RawDevice;
use crate::directory::{self, AddOp, RemOp};
use crate::error::{Error, Result};
use crate::format::{self, FormatOptions};
use crate::ialloc;
use crate::inode_ops::{self, InodeStatus};
use crate::layout::{
    FileType, Inode, Mode, BSLPC, MAX_FILE_SIZE, NULL_REF, PERM_MASK, PRU, ROOT_INODE,
};
use crate::meta::MetaStore;
use crate::path::{self, Resolved};

/// Options controlling how a volume is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct MountOptions {
    pub read_only: bool,
}

/// A snapshot of an inode's metadata, independent of the on-disk record's
/// lifetime (spec §5 `stat`/`lstat`).
#[derive(Debug, Clone)]
pub struct FileStat {
    pub n_inode: u32,
    pub file_type: FileType,
    pub perm: Mode,
    pub owner: u32,
    pub group: u32,
    pub size: u32,
    pub clu_count: u32,
    pub ref_count: u16,
    pub atime: u32,
    pub mtime: u32,
}

impl FileStat {
    fn from_inode(n_inode: u32, inode: &Inode) -> Result<Self> {
        let file_type = inode
            .file_type()
            .ok_or_else(|| Error::InconsistentInUseInode(n_inode, "no legal type bit set".into()))?;
        let (atime, mtime) = match inode.var_context() {
            crate::layout::VarContext::InUse { atime, mtime } => (atime, mtime),
            crate::layout::VarContext::Free { .. } => {
                return Err(Error::InconsistentInUseInode(n_inode, "inode is free".into()))
            }
        };
        Ok(Self {
            n_inode,
            file_type,
            perm: inode.mode & PERM_MASK,
            owner: inode.owner,
            group: inode.group,
            size: inode.size,
            clu_count: inode.clu_count,
            ref_count: inode.ref_count,
            atime,
            mtime,
        })
    }
}

/// Volume-wide occupancy, as reported by `statvfs`-shaped callers.
#[derive(Debug, Clone, Copy)]
pub struct StatFs {
    pub block_size: u32,
    pub cluster_size: u32,
    pub inodes_total: u32,
    pub inodes_free: u32,
    pub clusters_total: u32,
    pub clusters_free: u32,
}

pub struct Engine {
    cache: BlockCache,
    meta: MetaStore,
    options: MountOptions,
}

impl Engine {
    /// Initialize a brand-new volume on `path`. Does not mount it.
    pub fn format<P: AsRef<Path>>(path: P, n_blocks: u64, opts: FormatOptions) -> Result<()> {
        let mut device = RawDevice::create(path, n_blocks)?;
        format::format(&mut device, opts)
    }

    /// Attach to an existing volume image.
    pub fn mount<P: AsRef<Path>>(path: P, options: MountOptions) -> Result<Self> {
        let device = RawDevice::open(path, options.read_only)?;
        let mut cache = BlockCache::new(device);
        let mut meta = MetaStore::new();
        meta.load_superblock(&mut cache)?;
        consistency::check_superblock(meta.superblock()?)?;

        if !options.read_only {
            meta.superblock_mut()?.mount_status = PRU;
            meta.store_superblock(&mut cache)?;
            cache.sync()?;
        }
        info!("mounted volume '{}'", meta.superblock()?.name);
        Ok(Self { cache, meta, options })
    }

    /// Detach cleanly, flushing every dirty block and marking the volume
    /// not-presently-in-use.
    pub fn unmount(mut self) -> Result<()> {
        if !self.options.read_only {
            self.meta.superblock_mut()?.mount_status = crate::layout::NPRU;
            self.meta.store_superblock(&mut self.cache)?;
        }
        self.cache.close()
    }

    pub fn statfs(&self) -> Result<StatFs> {
        let sb = self.meta.superblock()?;
        Ok(StatFs {
            block_size: crate::layout::BLOCK_SIZE as u32,
            cluster_size: crate::layout::CLUSTER_SIZE as u32,
            inodes_total: sb.i_total,
            inodes_free: sb.i_free,
            clusters_total: sb.dzone_total,
            clusters_free: sb.dzone_free,
        })
    }

    fn resolve_existing(&mut self, path: &str, caller: Caller, follow: bool) -> Result<(Resolved, u32)> {
        let resolved = if follow {
            path::resolve_follow(&mut self.meta, &mut self.cache, path, caller)?
        } else {
            path::resolve(&mut self.meta, &mut self.cache, path, caller)?
        };
        let n_inode = resolved.inode.ok_or(Error::NotFound)?;
        Ok((resolved, n_inode))
    }

    pub fn stat(&mut self, path: &str, caller: Caller) -> Result<FileStat> {
        let (_, n_inode) = self.resolve_existing(path, caller, true)?;
        let inode = inode_ops::read_inode(&mut self.meta, &mut self.cache, n_inode, InodeStatus::InUse)?;
        FileStat::from_inode(n_inode, &inode)
    }

    pub fn lstat(&mut self, path: &str, caller: Caller) -> Result<FileStat> {
        let (_, n_inode) = self.resolve_existing(path, caller, false)?;
        let inode = inode_ops::read_inode(&mut self.meta, &mut self.cache, n_inode, InodeStatus::InUse)?;
        FileStat::from_inode(n_inode, &inode)
    }

    pub fn access(&mut self, path: &str, caller: Caller, requested: Access) -> Result<()> {
        let (_, n_inode) = self.resolve_existing(path, caller, true)?;
        let inode = inode_ops::read_inode(&mut self.meta, &mut self.cache, n_inode, InodeStatus::InUse)?;
        if access_granted(caller, &inode, requested) {
            Ok(())
        } else {
            Err(Error::AccessDenied)
        }
    }

    pub fn chmod(&mut self, path: &str, caller: Caller, perm: Mode) -> Result<()> {
        let (_, n_inode) = self.resolve_existing(path, caller, true)?;
        let mut inode = inode_ops::read_inode(&mut self.meta, &mut self.cache, n_inode, InodeStatus::InUse)?;
        if !caller.is_root() && caller.uid != inode.owner {
            return Err(Error::NotPermitted);
        }
        let ty = inode.mode & crate::layout::TYPE_MASK;
        inode.mode = ty | (perm & PERM_MASK);
        inode_ops::write_inode(&mut self.meta, &mut self.cache, n_inode, InodeStatus::InUse, inode)
    }

    pub fn chown(&mut self, path: &str, caller: Caller, owner: u32, group: u32) -> Result<()> {
        if !caller.is_root() {
            return Err(Error::NotPermitted);
        }
        let (_, n_inode) = self.resolve_existing(path, caller, true)?;
        let mut inode = inode_ops::read_inode(&mut self.meta, &mut self.cache, n_inode, InodeStatus::InUse)?;
        inode.owner = owner;
        inode.group = group;
        inode_ops::write_inode(&mut self.meta, &mut self.cache, n_inode, InodeStatus::InUse, inode)
    }

    pub fn utimens(&mut self, path: &str, caller: Caller, atime: u32, mtime: u32) -> Result<()> {
        let (_, n_inode) = self.resolve_existing(path, caller, true)?;
        let mut inode = inode_ops::read_inode(&mut self.meta, &mut self.cache, n_inode, InodeStatus::InUse)?;
        if !caller.is_root() && caller.uid != inode.owner {
            return Err(Error::NotPermitted);
        }
        inode.set_times(atime, mtime);
        inode_ops::write_inode(&mut self.meta, &mut self.cache, n_inode, InodeStatus::InUse, inode)
    }

    fn resolve_for_create(&mut self, path: &str, caller: Caller) -> Result<Resolved> {
        let resolved = path::resolve(&mut self.meta, &mut self.cache, path, caller)?;
        if resolved.inode.is_some() {
            return Err(Error::Exists);
        }
        if resolved.name.is_empty() {
            return Err(Error::InvalidPath);
        }
        Ok(resolved)
    }

    pub fn mknod(&mut self, path: &str, caller: Caller, perm: Mode) -> Result<u32> {
        let resolved = self.resolve_for_create(path, caller)?;
        let n_inode = ialloc::alloc(&mut self.meta, &mut self.cache, FileType::File, caller.uid, caller.gid)?;
        self.finish_mode(n_inode, FileType::File, perm)?;
        directory::add_att_dir_entry(
            &mut self.meta,
            &mut self.cache,
            resolved.parent,
            &resolved.name,
            n_inode,
            AddOp::Add,
            caller,
        )?;
        Ok(n_inode)
    }

    pub fn mkdir(&mut self, path: &str, caller: Caller, perm: Mode) -> Result<u32> {
        let resolved = self.resolve_for_create(path, caller)?;
        let n_inode = ialloc::alloc(&mut self.meta, &mut self.cache, FileType::Dir, caller.uid, caller.gid)?;
        self.finish_mode(n_inode, FileType::Dir, perm)?;
        directory::add_att_dir_entry(
            &mut self.meta,
            &mut self.cache,
            resolved.parent,
            &resolved.name,
            n_inode,
            AddOp::Add,
            caller,
        )?;
        Ok(n_inode)
    }

    fn finish_mode(&mut self, n_inode: u32, ty: FileType, perm: Mode) -> Result<()> {
        let mut inode = inode_ops::read_inode(&mut self.meta, &mut self.cache, n_inode, InodeStatus::InUse)?;
        inode.mode = ty.mode_bit() | (perm & PERM_MASK);
        inode_ops::write_inode(&mut self.meta, &mut self.cache, n_inode, InodeStatus::InUse, inode)
    }

    pub fn symlink(&mut self, target: &str, link_path: &str, caller: Caller) -> Result<u32> {
        let resolved = self.resolve_for_create(link_path, caller)?;
        if target.len() > BSLPC {
            return Err(Error::InvalidArgument("symlink target too long".into()));
        }
        let n_inode = ialloc::alloc(&mut self.meta, &mut self.cache, FileType::Symlink, caller.uid, caller.gid)?;
        self.finish_mode(n_inode, FileType::Symlink, Mode::from_bits_truncate(0o777))?;

        let mut inode = inode_ops::read_inode(&mut self.meta, &mut self.cache, n_inode, InodeStatus::InUse)?;
        let n_clust = content_tree::handle_file_cluster(
            &mut self.meta,
            &mut self.cache,
            &mut inode,
            n_inode,
            0,
            TreeOp::Alloc,
        )?;
        let dzone_start = self.meta.superblock()?.dzone_start;
        let mut cluster = MetaStore::read_cluster(&mut self.cache, dzone_start, n_clust)?;
        cluster.body[..target.len()].copy_from_slice(target.as_bytes());
        MetaStore::write_cluster(&mut self.cache, dzone_start, n_clust, &cluster)?;
        inode.size = target.len() as u32;
        inode_ops::write_inode(&mut self.meta, &mut self.cache, n_inode, InodeStatus::InUse, inode)?;

        directory::add_att_dir_entry(
            &mut self.meta,
            &mut self.cache,
            resolved.parent,
            &resolved.name,
            n_inode,
            AddOp::Add,
            caller,
        )?;
        Ok(n_inode)
    }

    pub fn readlink(&mut self, path: &str, caller: Caller) -> Result<String> {
        let (_, n_inode) = self.resolve_existing(path, caller, false)?;
        path::read_symlink_target(&mut self.meta, &mut self.cache, n_inode)
    }

    pub fn link(&mut self, existing_path: &str, new_path: &str, caller: Caller) -> Result<()> {
        let (_, n_inode) = self.resolve_existing(existing_path, caller, false)?;
        let inode = inode_ops::read_inode(&mut self.meta, &mut self.cache, n_inode, InodeStatus::InUse)?;
        if inode.file_type() == Some(FileType::Dir) {
            return Err(Error::NotPermitted);
        }
        let resolved = self.resolve_for_create(new_path, caller)?;
        directory::add_att_dir_entry(
            &mut self.meta,
            &mut self.cache,
            resolved.parent,
            &resolved.name,
            n_inode,
            AddOp::Attach,
            caller,
        )
    }

    pub fn unlink(&mut self, path: &str, caller: Caller) -> Result<()> {
        let resolved = path::resolve(&mut self.meta, &mut self.cache, path, caller)?;
        let n_inode = resolved.inode.ok_or(Error::NotFound)?;
        let inode = inode_ops::read_inode(&mut self.meta, &mut self.cache, n_inode, InodeStatus::InUse)?;
        if inode.file_type() == Some(FileType::Dir) {
            return Err(Error::IsDir);
        }
        directory::rem_detach_dir_entry(
            &mut self.meta,
            &mut self.cache,
            resolved.parent,
            &resolved.name,
            RemOp::Rem,
            caller,
        )
    }

    pub fn rmdir(&mut self, path: &str, caller: Caller) -> Result<()> {
        let resolved = path::resolve(&mut self.meta, &mut self.cache, path, caller)?;
        let n_inode = resolved.inode.ok_or(Error::NotFound)?;
        if n_inode == ROOT_INODE {
            return Err(Error::NotPermitted);
        }
        let inode = inode_ops::read_inode(&mut self.meta, &mut self.cache, n_inode, InodeStatus::InUse)?;
        if inode.file_type() != Some(FileType::Dir) {
            return Err(Error::NotDir);
        }
        directory::rem_detach_dir_entry(
            &mut self.meta,
            &mut self.cache,
            resolved.parent,
            &resolved.name,
            RemOp::Rem,
            caller,
        )
    }

    pub fn rename(&mut self, old_path: &str, new_path: &str, caller: Caller) -> Result<()> {
        let old = path::resolve(&mut self.meta, &mut self.cache, old_path, caller)?;
        let n_inode = old.inode.ok_or(Error::NotFound)?;
        let new = path::resolve(&mut self.meta, &mut self.cache, new_path, caller)?;
        if let Some(existing) = new.inode {
            if existing == n_inode {
                return Ok(());
            }
            return Err(Error::Exists);
        }

        if old.parent == new.parent {
            return directory::rename_dir_entry(
                &mut self.meta,
                &mut self.cache,
                old.parent,
                &old.name,
                &new.name,
                caller,
            );
        }

        directory::add_att_dir_entry(
            &mut self.meta,
            &mut self.cache,
            new.parent,
            &new.name,
            n_inode,
            AddOp::Attach,
            caller,
        )?;
        directory::rem_detach_dir_entry(
            &mut self.meta,
            &mut self.cache,
            old.parent,
            &old.name,
            RemOp::Detach,
            caller,
        )
    }

    fn get_or_alloc_cluster(&mut self, inode: &mut Inode, n_inode: u32, k: usize) -> Result<u32> {
        let existing = content_tree::get_cluster_ref(&mut self.meta, &mut self.cache, inode, k)?;
        if existing != NULL_REF {
            return Ok(existing);
        }
        content_tree::handle_file_cluster(&mut self.meta, &mut self.cache, inode, n_inode, k, TreeOp::Alloc)
    }

    pub fn read(&mut self, path: &str, caller: Caller, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let (_, n_inode) = self.resolve_existing(path, caller, true)?;
        let inode = inode_ops::read_inode(&mut self.meta, &mut self.cache, n_inode, InodeStatus::InUse)?;
        if inode.file_type() == Some(FileType::Dir) {
            return Err(Error::IsDir);
        }
        if !access_granted(caller, &inode, Access::R) {
            return Err(Error::AccessDenied);
        }

        let dzone_start = self.meta.superblock()?.dzone_start;
        let file_size = inode.size as u64;
        if offset >= file_size {
            return Ok(0);
        }
        let to_read = (file_size - offset).min(buf.len() as u64) as usize;
        let mut done = 0usize;
        while done < to_read {
            let pos = offset + done as u64;
            let (k, body_off) = MetaStore::convert_byte_pos(pos);
            let n_clust = content_tree::get_cluster_ref(&mut self.meta, &mut self.cache, &inode, k as usize)?;
            let chunk = (BSLPC - body_off as usize).min(to_read - done);
            if n_clust == NULL_REF {
                buf[done..done + chunk].fill(0);
            } else {
                let cluster = MetaStore::read_cluster(&mut self.cache, dzone_start, n_clust)?;
                buf[done..done + chunk]
                    .copy_from_slice(&cluster.body[body_off as usize..body_off as usize + chunk]);
            }
            done += chunk;
        }
        Ok(done)
    }

    pub fn write(&mut self, path: &str, caller: Caller, offset: u64, data: &[u8]) -> Result<usize> {
        let (_, n_inode) = self.resolve_existing(path, caller, true)?;
        let mut inode = inode_ops::read_inode(&mut self.meta, &mut self.cache, n_inode, InodeStatus::InUse)?;
        if inode.file_type() == Some(FileType::Dir) {
            return Err(Error::IsDir);
        }
        if !access_granted(caller, &inode, Access::W) {
            return Err(Error::AccessDenied);
        }
        if offset + data.len() as u64 > MAX_FILE_SIZE {
            return Err(Error::FileTooBig);
        }

        let dzone_start = self.meta.superblock()?.dzone_start;
        let mut done = 0usize;
        while done < data.len() {
            let pos = offset + done as u64;
            let (k, body_off) = MetaStore::convert_byte_pos(pos);
            let n_clust = self.get_or_alloc_cluster(&mut inode, n_inode, k as usize)?;
            let chunk = (BSLPC - body_off as usize).min(data.len() - done);
            let mut cluster = MetaStore::read_cluster(&mut self.cache, dzone_start, n_clust)?;
            cluster.body[body_off as usize..body_off as usize + chunk]
                .copy_from_slice(&data[done..done + chunk]);
            MetaStore::write_cluster(&mut self.cache, dzone_start, n_clust, &cluster)?;
            done += chunk;
        }

        let new_size = offset + done as u64;
        if new_size > inode.size as u64 {
            inode.size = new_size as u32;
        }
        inode_ops::write_inode(&mut self.meta, &mut self.cache, n_inode, InodeStatus::InUse, inode)?;
        Ok(done)
    }

    pub fn truncate(&mut self, path: &str, caller: Caller, new_size: u64) -> Result<()> {
        let (_, n_inode) = self.resolve_existing(path, caller, true)?;
        let mut inode = inode_ops::read_inode(&mut self.meta, &mut self.cache, n_inode, InodeStatus::InUse)?;
        if inode.file_type() == Some(FileType::Dir) {
            return Err(Error::IsDir);
        }
        if !access_granted(caller, &inode, Access::W) {
            return Err(Error::AccessDenied);
        }
        if new_size > MAX_FILE_SIZE {
            return Err(Error::FileTooBig);
        }

        if new_size < inode.size as u64 {
            let (first_dead_k, rem) = MetaStore::convert_byte_pos(new_size);
            let start_k = if rem == 0 { first_dead_k } else { first_dead_k + 1 };
            content_tree::handle_file_clusters(
                &mut self.meta,
                &mut self.cache,
                &mut inode,
                n_inode,
                start_k as usize,
                TreeOp::FreeClean,
            )?;
        }
        inode.size = new_size as u32;
        inode_ops::write_inode(&mut self.meta, &mut self.cache, n_inode, InodeStatus::InUse, inode)
    }

    /// Return the entry at or after `cookie`, skipping free slots, along
    /// with the cookie to pass on the following call. `None` once the
    /// directory is exhausted.
    pub fn readdir(
        &mut self,
        path: &str,
        caller: Caller,
        cookie: u32,
    ) -> Result<Option<(String, u32, u32)>> {
        let (_, n_inode) = self.resolve_existing(path, caller, true)?;
        directory::next_entry(&mut self.meta, &mut self.cache, n_inode, caller, cookie)
    }

    fn readdir_all(&mut self, path: &str, caller: Caller) -> Result<Vec<(String, u32)>> {
        let (_, n_inode) = self.resolve_existing(path, caller, true)?;
        directory::list_entries(&mut self.meta, &mut self.cache, n_inode, caller)
    }

    /// No-op: content is always immediately visible through `read`/`write`,
    /// there is no separate open file-descriptor table to populate.
    pub fn open(&self, _path: &str, _caller: Caller) -> Result<()> {
        Ok(())
    }

    pub fn close(&self, _n_inode: u32) -> Result<()> {
        Ok(())
    }

    pub fn opendir(&self, _path: &str, _caller: Caller) -> Result<()> {
        Ok(())
    }

    pub fn closedir(&self, _n_inode: u32) -> Result<()> {
        Ok(())
    }

    pub fn fsync(&mut self) -> Result<()> {
        self.cache.sync()
    }

    pub fn debug_dump_superblock(&self) -> Result<String> {
        let sb = self.meta.superblock()?;
        Ok(format!(
            "name={} i_total={} i_free={} dzone_total={} dzone_free={} mount_status={}",
            sb.name, sb.i_total, sb.i_free, sb.dzone_total, sb.dzone_free, sb.mount_status
        ))
    }

    pub fn debug_dump_inode(&mut self, n_inode: u32) -> Result<String> {
        let offset = {
            let sb = self.meta.superblock()?;
            let (block_idx, offset) = MetaStore::convert_inode_ref(n_inode, sb.i_total)?;
            let itable_start = sb.itable_start;
            self.meta.load_inode_block(&mut self.cache, itable_start, block_idx)?;
            offset
        };
        let inode = self.meta.inode_at(offset)?;
        Ok(format!(
            "#{n_inode}: mode={:?} ref_count={} owner={} group={} size={} clu_count={}",
            inode.mode, inode.ref_count, inode.owner, inode.group, inode.size, inode.clu_count
        ))
    }

    pub fn debug_dump_directory(&mut self, path: &str, caller: Caller) -> Result<String> {
        let entries = self.readdir_all(path, caller)?;
        let mut out = String::new();
        for (name, n_inode) in entries {
            out.push_str(&format!("{name} -> #{n_inode}\n"));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn fresh_engine(n_blocks: u64, inode_count: u32) -> (Engine, NamedTempFile) {
        let tmp = NamedTempFile::new().unwrap();
        Engine::format(
            tmp.path(),
            n_blocks,
            FormatOptions {
                volume_name: "test".into(),
                inode_count,
            },
        )
        .unwrap();
        let engine = Engine::mount(tmp.path(), MountOptions::default()).unwrap();
        (engine, tmp)
    }

    #[test]
    fn mkdir_and_readdir_roundtrip() {
        let (mut e, _tmp) = fresh_engine(2048, 64);
        let root = Caller::ROOT;
        e.mkdir("/sub", root, Mode::from_bits_truncate(0o755)).unwrap();
        let mut found = false;
        let mut cookie = 0;
        while let Some((name, _, next)) = e.readdir("/", root, cookie).unwrap() {
            if name == "sub" {
                found = true;
            }
            cookie = next;
        }
        assert!(found);
        let st = e.stat("/sub", root).unwrap();
        assert_eq!(st.file_type, FileType::Dir);
    }

    #[test]
    fn write_then_read_back() {
        let (mut e, _tmp) = fresh_engine(2048, 64);
        let root = Caller::ROOT;
        e.mknod("/a.txt", root, Mode::from_bits_truncate(0o644)).unwrap();
        let n = e.write("/a.txt", root, 0, b"hello world").unwrap();
        assert_eq!(n, 11);
        let mut buf = [0u8; 11];
        let r = e.read("/a.txt", root, 0, &mut buf).unwrap();
        assert_eq!(r, 11);
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn unlink_removes_entry() {
        let (mut e, _tmp) = fresh_engine(2048, 64);
        let root = Caller::ROOT;
        e.mknod("/a.txt", root, Mode::from_bits_truncate(0o644)).unwrap();
        e.unlink("/a.txt", root).unwrap();
        assert!(matches!(e.stat("/a.txt", root), Err(Error::NotFound)));
    }

    #[test]
    fn symlink_resolves_through_readlink_and_stat() {
        let (mut e, _tmp) = fresh_engine(2048, 64);
        let root = Caller::ROOT;
        e.mknod("/target", root, Mode::from_bits_truncate(0o644)).unwrap();
        e.symlink("/target", "/link", root).unwrap();
        assert_eq!(e.readlink("/link", root).unwrap(), "/target");
        let st = e.stat("/link", root).unwrap();
        assert_eq!(st.file_type, FileType::File);
        let lst = e.lstat("/link", root).unwrap();
        assert_eq!(lst.file_type, FileType::Symlink);
    }

    #[test]
    fn rmdir_rejects_nonempty_directory() {
        let (mut e, _tmp) = fresh_engine(2048, 64);
        let root = Caller::ROOT;
        e.mkdir("/d", root, Mode::from_bits_truncate(0o755)).unwrap();
        e.mknod("/d/f", root, Mode::from_bits_truncate(0o644)).unwrap();
        assert!(matches!(e.rmdir("/d", root), Err(Error::NotEmpty)));
    }
}

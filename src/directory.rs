//! `Directory`: directories as dense arrays of (name, inode) entries
//! packed across data clusters (spec §4.8).

use log::debug;

use crate::access::{access_granted, Access, Caller};
use crate::content_tree::{handle_file_clusters, TreeOp};
use crate::error::{Error, Result};
use crate::ialloc;
use crate::inode_ops::{self, InodeStatus};
use crate::layout::{DirEntry, FileType, Inode, DIR_ENTRY_SIZE, DPC};
use crate::meta::MetaStore;
use crate::cache::BlockCache;

pub const DOT: u32 = 0;
pub const DOTDOT: u32 = 1;

fn dir_entry_span() -> u32 {
    DPC as u32 * DIR_ENTRY_SIZE as u32
}

fn num_clusters(dir_size: u32) -> u32 {
    dir_size / dir_entry_span()
}

#[derive(Debug, Clone, Copy)]
pub enum AddOp {
    Add,
    Attach,
}

#[derive(Debug, Clone, Copy)]
pub enum RemOp {
    Rem,
    Detach,
}

pub enum Lookup {
    Found { n_inode: u32, idx: u32 },
    NotFound { free_slot: u32 },
}

fn require_dir(inode: &Inode) -> Result<()> {
    if inode.file_type() != Some(FileType::Dir) {
        return Err(Error::NotDir);
    }
    Ok(())
}

fn read_entry(meta: &mut MetaStore, cache: &mut BlockCache, dir: &Inode, idx: u32) -> Result<DirEntry> {
    let dzone_start = meta.superblock()?.dzone_start;
    let cluster_idx = (idx / DPC as u32) as usize;
    let slot = (idx % DPC as u32) as usize;
    let n_clust = crate::content_tree::get_cluster_ref(meta, cache, dir, cluster_idx)?;
    if n_clust == crate::layout::NULL_REF {
        return Err(Error::InconsistentDirectoryContents(format!(
            "entry {idx} falls inside size but cluster {cluster_idx} is unallocated"
        )));
    }
    let cluster = MetaStore::read_cluster(cache, dzone_start, n_clust)?;
    Ok(cluster.dir_entry(slot))
}

fn write_entry(
    meta: &mut MetaStore,
    cache: &mut BlockCache,
    dir: &Inode,
    idx: u32,
    entry: &DirEntry,
) -> Result<()> {
    let dzone_start = meta.superblock()?.dzone_start;
    let cluster_idx = (idx / DPC as u32) as usize;
    let slot = (idx % DPC as u32) as usize;
    let n_clust = crate::content_tree::get_cluster_ref(meta, cache, dir, cluster_idx)?;
    if n_clust == crate::layout::NULL_REF {
        return Err(Error::InconsistentDirectoryContents(format!(
            "entry {idx} falls inside size but cluster {cluster_idx} is unallocated"
        )));
    }
    let mut cluster = MetaStore::read_cluster(cache, dzone_start, n_clust)?;
    cluster.set_dir_entry(slot, entry);
    MetaStore::write_cluster(cache, dzone_start, n_clust, &cluster)
}

/// Append a fresh, all-clean-free directory content cluster.
fn grow(meta: &mut MetaStore, cache: &mut BlockCache, dir: &mut Inode, n_dir: u32) -> Result<()> {
    if dir.size as u64 + dir_entry_span() as u64 > crate::layout::MAX_FILE_SIZE {
        return Err(Error::FileTooBig);
    }
    let cluster_idx = num_clusters(dir.size) as usize;
    let n_clust = crate::content_tree::handle_file_cluster(meta, cache, dir, n_dir, cluster_idx, TreeOp::Alloc)?;
    let dzone_start = meta.superblock()?.dzone_start;
    let mut cluster = MetaStore::read_cluster(cache, dzone_start, n_clust)?;
    for slot in 0..DPC {
        cluster.set_dir_entry(slot, &DirEntry::clean_free());
    }
    MetaStore::write_cluster(cache, dzone_start, n_clust, &cluster)?;
    dir.size += dir_entry_span();
    Ok(())
}

/// Walk `n_dir`'s entries looking for `name`. Requires X on the directory.
pub fn get_dir_entry_by_name(
    meta: &mut MetaStore,
    cache: &mut BlockCache,
    n_dir: u32,
    name: &str,
    caller: Caller,
) -> Result<Lookup> {
    let dir = inode_ops::read_inode(meta, cache, n_dir, InodeStatus::InUse)?;
    require_dir(&dir)?;
    if !access_granted(caller, &dir, Access::X) {
        return Err(Error::AccessDenied);
    }

    let total = num_clusters(dir.size) * DPC as u32;
    let mut free_slot: Option<u32> = None;
    for idx in 0..total {
        let entry = read_entry(meta, cache, &dir, idx)?;
        if entry.is_in_use() {
            if entry.name_str() == name {
                return Ok(Lookup::Found {
                    n_inode: entry.n_inode,
                    idx,
                });
            }
        } else if entry.is_clean_free() && free_slot.is_none() {
            free_slot = Some(idx);
        }
    }
    Ok(Lookup::NotFound {
        free_slot: free_slot.unwrap_or(total),
    })
}

/// List every in-use entry of `n_dir`. Requires R and X on the directory.
pub fn list_entries(
    meta: &mut MetaStore,
    cache: &mut BlockCache,
    n_dir: u32,
    caller: Caller,
) -> Result<Vec<(String, u32)>> {
    let dir = inode_ops::read_inode(meta, cache, n_dir, InodeStatus::InUse)?;
    require_dir(&dir)?;
    if !access_granted(caller, &dir, Access::R | Access::X) {
        return Err(Error::AccessDenied);
    }

    let total = num_clusters(dir.size) * DPC as u32;
    let mut out = Vec::with_capacity(total as usize);
    for idx in 0..total {
        let entry = read_entry(meta, cache, &dir, idx)?;
        if entry.is_in_use() {
            out.push((entry.name_str(), entry.n_inode));
        }
    }
    Ok(out)
}

/// Return the next in-use entry at or after `start_idx`, skipping free
/// slots, along with the cookie to resume from on the following call.
/// `None` once `start_idx` reaches the end of the directory.
pub fn next_entry(
    meta: &mut MetaStore,
    cache: &mut BlockCache,
    n_dir: u32,
    caller: Caller,
    start_idx: u32,
) -> Result<Option<(String, u32, u32)>> {
    let dir = inode_ops::read_inode(meta, cache, n_dir, InodeStatus::InUse)?;
    require_dir(&dir)?;
    if !access_granted(caller, &dir, Access::R | Access::X) {
        return Err(Error::AccessDenied);
    }

    let total = num_clusters(dir.size) * DPC as u32;
    let mut idx = start_idx;
    while idx < total {
        let entry = read_entry(meta, cache, &dir, idx)?;
        if entry.is_in_use() {
            return Ok(Some((entry.name_str(), entry.n_inode, idx + 1)));
        }
        idx += 1;
    }
    Ok(None)
}

fn get_dir_entry_by_name_strict(
    meta: &mut MetaStore,
    cache: &mut BlockCache,
    n_dir: u32,
    name: &str,
    caller: Caller,
) -> Result<(u32, u32)> {
    match get_dir_entry_by_name(meta, cache, n_dir, name, caller)? {
        Lookup::Found { n_inode, idx } => Ok((n_inode, idx)),
        Lookup::NotFound { .. } => Err(Error::NotFound),
    }
}

fn bump_ref_count(inode: &mut Inode) -> Result<()> {
    if inode.ref_count == u16::MAX {
        return Err(Error::MaxLinks);
    }
    inode.ref_count += 1;
    Ok(())
}

/// Add a new entry (or attach an already-populated directory) to `n_dir`.
pub fn add_att_dir_entry(
    meta: &mut MetaStore,
    cache: &mut BlockCache,
    n_dir: u32,
    name: &str,
    n_ent: u32,
    op: AddOp,
    caller: Caller,
) -> Result<()> {
    let mut dir = inode_ops::read_inode(meta, cache, n_dir, InodeStatus::InUse)?;
    require_dir(&dir)?;
    if !access_granted(caller, &dir, Access::W | Access::X) {
        return Err(Error::AccessDenied);
    }

    let free_slot = match get_dir_entry_by_name(meta, cache, n_dir, name, caller)? {
        Lookup::Found { .. } => return Err(Error::Exists),
        Lookup::NotFound { free_slot } => free_slot,
    };

    let total = num_clusters(dir.size) * DPC as u32;
    if free_slot >= total {
        grow(meta, cache, &mut dir, n_dir)?;
    }

    let entry = DirEntry::named(name, n_ent)?;
    write_entry(meta, cache, &dir, free_slot, &entry)?;

    let mut ent_inode = inode_ops::read_inode(meta, cache, n_ent, InodeStatus::InUse)?;

    match op {
        AddOp::Add => {
            if ent_inode.file_type() == Some(FileType::Dir) && ent_inode.clu_count == 0 {
                let n_clust = crate::content_tree::handle_file_cluster(
                    meta,
                    cache,
                    &mut ent_inode,
                    n_ent,
                    0,
                    TreeOp::Alloc,
                )?;
                let dzone_start = meta.superblock()?.dzone_start;
                let mut cluster = MetaStore::read_cluster(cache, dzone_start, n_clust)?;
                for slot in 0..DPC {
                    cluster.set_dir_entry(slot, &DirEntry::clean_free());
                }
                cluster.set_dir_entry(DOT as usize, &DirEntry::named(".", n_ent)?);
                cluster.set_dir_entry(DOTDOT as usize, &DirEntry::named("..", n_dir)?);
                MetaStore::write_cluster(cache, dzone_start, n_clust, &cluster)?;
                ent_inode.size = dir_entry_span();
                ent_inode.ref_count = 2;
                bump_ref_count(&mut dir)?;
            } else {
                bump_ref_count(&mut ent_inode)?;
            }
        }
        AddOp::Attach => {
            if ent_inode.file_type() == Some(FileType::Dir) {
                bump_ref_count(&mut ent_inode)?;
                bump_ref_count(&mut dir)?;
                let mut dotdot = DirEntry::named("..", n_dir)?;
                dotdot.n_inode = n_dir;
                write_entry(meta, cache, &ent_inode, DOTDOT, &dotdot)?;
            } else {
                bump_ref_count(&mut ent_inode)?;
            }
        }
    }

    inode_ops::write_inode(meta, cache, n_ent, InodeStatus::InUse, ent_inode)?;
    inode_ops::write_inode(meta, cache, n_dir, InodeStatus::InUse, dir)?;
    debug!("directory {n_dir}: added '{name}' -> inode {n_ent}");
    Ok(())
}

/// Walk a directory's entries past "."/".." looking for anything in use.
pub fn check_directory_emptiness(meta: &mut MetaStore, cache: &mut BlockCache, n_dir: u32) -> Result<()> {
    let dir = inode_ops::read_inode(meta, cache, n_dir, InodeStatus::InUse)?;
    require_dir(&dir)?;
    let total = num_clusters(dir.size) * DPC as u32;
    for idx in 2..total {
        let entry = read_entry(meta, cache, &dir, idx)?;
        if entry.is_in_use() {
            return Err(Error::NotEmpty);
        }
    }
    Ok(())
}

/// Remove (`REM`) or detach (`DETACH`) `name` from `n_dir`.
pub fn rem_detach_dir_entry(
    meta: &mut MetaStore,
    cache: &mut BlockCache,
    n_dir: u32,
    name: &str,
    op: RemOp,
    caller: Caller,
) -> Result<()> {
    let mut dir = inode_ops::read_inode(meta, cache, n_dir, InodeStatus::InUse)?;
    require_dir(&dir)?;
    if !access_granted(caller, &dir, Access::W | Access::X) {
        return Err(Error::AccessDenied);
    }

    let (n_ent, idx) = get_dir_entry_by_name_strict(meta, cache, n_dir, name, caller)?;
    let mut ent_inode = inode_ops::read_inode(meta, cache, n_ent, InodeStatus::InUse)?;
    let ent_is_dir = ent_inode.file_type() == Some(FileType::Dir);

    if ent_is_dir {
        check_directory_emptiness(meta, cache, n_ent)?;
    }

    let mut entry = read_entry(meta, cache, &dir, idx)?;
    match op {
        RemOp::Rem => entry.mark_dirty_free(),
        RemOp::Detach => entry = DirEntry::clean_free(),
    }
    write_entry(meta, cache, &dir, idx, &entry)?;

    if ent_is_dir {
        dir.ref_count = dir.ref_count.saturating_sub(1);
        match op {
            // The parent's name entry and the directory's own "." entry
            // both vanish together on an actual removal, so both
            // references drop at once (add_att_dir_entry seeds ref_count
            // at 2 for the same reason).
            RemOp::Rem => ent_inode.ref_count = ent_inode.ref_count.saturating_sub(2),
            // A detach only retargets the entry elsewhere (rename); the
            // directory's own "." reference is untouched.
            RemOp::Detach => ent_inode.ref_count = ent_inode.ref_count.saturating_sub(1),
        }
    } else {
        ent_inode.ref_count = ent_inode.ref_count.saturating_sub(1);
    }

    if matches!(op, RemOp::Rem) && ent_inode.ref_count == 0 {
        handle_file_clusters(meta, cache, &mut ent_inode, n_ent, 0, TreeOp::Free)?;
        inode_ops::write_inode(meta, cache, n_ent, InodeStatus::InUse, ent_inode)?;
        ialloc::free(meta, cache, n_ent)?;
    } else {
        inode_ops::write_inode(meta, cache, n_ent, InodeStatus::InUse, ent_inode)?;
    }

    inode_ops::write_inode(meta, cache, n_dir, InodeStatus::InUse, dir)?;
    debug!("directory {n_dir}: removed '{name}' ({op:?})");
    Ok(())
}

/// Rename an existing entry within the same directory.
pub fn rename_dir_entry(
    meta: &mut MetaStore,
    cache: &mut BlockCache,
    n_dir: u32,
    old_name: &str,
    new_name: &str,
    caller: Caller,
) -> Result<()> {
    let dir = inode_ops::read_inode(meta, cache, n_dir, InodeStatus::InUse)?;
    require_dir(&dir)?;
    if !access_granted(caller, &dir, Access::W | Access::X) {
        return Err(Error::AccessDenied);
    }

    let (n_ent, idx) = get_dir_entry_by_name_strict(meta, cache, n_dir, old_name, caller)?;
    if let Lookup::Found { .. } = get_dir_entry_by_name(meta, cache, n_dir, new_name, caller)? {
        return Err(Error::Exists);
    }

    let entry = DirEntry::named(new_name, n_ent)?;
    write_entry(meta, cache, &dir, idx, &entry)
}

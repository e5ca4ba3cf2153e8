//! Structural consistency predicates (spec §4 cross-cutting checks).
//!
//! These are cheap, local sanity checks on records already resident in
//! memory: they do not walk content trees or directory contents (that
//! cost belongs to a dedicated fsck, out of scope here). `Engine` calls
//! the relevant predicate at the start of every public operation so that
//! corruption is reported as a structural error at the point it's first
//! observed, rather than surfacing later as a panic or silent misbehavior.

use crate::error::{Error, Result};
use crate::layout::{
    DataCluster, FileType, Inode, Superblock, VarContext, DZONE_CACHE_SIZE, NULL_REF,
};

/// The superblock's own bookkeeping fields are internally consistent.
pub fn check_superblock(sb: &Superblock) -> Result<()> {
    if sb.magic != crate::layout::MAGIC || sb.version != crate::layout::VERSION {
        return Err(Error::InconsistentSuperBlock("bad magic or version".into()));
    }
    if sb.i_free > sb.i_total {
        return Err(Error::InconsistentSuperBlock(format!(
            "i_free {} exceeds i_total {}",
            sb.i_free, sb.i_total
        )));
    }
    if sb.dzone_free > sb.dzone_total {
        return Err(Error::InconsistentSuperBlock(format!(
            "dzone_free {} exceeds dzone_total {}",
            sb.dzone_free, sb.dzone_total
        )));
    }
    if sb.i_total == 0 {
        return Err(Error::InconsistentSuperBlock("i_total is zero".into()));
    }
    if sb.i_free == 0 && sb.i_head != NULL_REF {
        return Err(Error::InconsistentSuperBlock(
            "i_free is zero but i_head is not NULL".into(),
        ));
    }
    if sb.i_free > 0 && sb.i_head == NULL_REF {
        return Err(Error::InconsistentSuperBlock(
            "i_free is nonzero but i_head is NULL".into(),
        ));
    }
    if (sb.i_head == NULL_REF) != (sb.i_tail == NULL_REF) {
        return Err(Error::InconsistentSuperBlock(
            "i_head and i_tail disagree on list emptiness".into(),
        ));
    }
    check_data_zone(sb)?;
    Ok(())
}

/// The data-zone free-cluster bookkeeping is internally consistent.
pub fn check_data_zone(sb: &Superblock) -> Result<()> {
    if sb.dzone_retriev.idx as usize > DZONE_CACHE_SIZE {
        return Err(Error::InconsistentFreeCluster(
            "retrieval cache index out of range".into(),
        ));
    }
    if sb.dzone_insert.idx as usize > DZONE_CACHE_SIZE {
        return Err(Error::InconsistentFreeCluster(
            "insertion cache index out of range".into(),
        ));
    }
    if (sb.d_head == NULL_REF) != (sb.d_tail == NULL_REF) {
        return Err(Error::InconsistentFreeCluster(
            "spill list head/tail disagree on emptiness".into(),
        ));
    }
    Ok(())
}

/// `n_inode`'s record is a well-formed free-dirty inode: it must carry
/// `FREE` in its mode and its free-list links must be in range.
pub fn check_free_inode(inode: &Inode, n_inode: u32, i_total: u32) -> Result<()> {
    if !inode.is_free() {
        return Err(Error::InconsistentDirtyInode(n_inode));
    }
    if let VarContext::Free { next, prev } = inode.var_context() {
        if next != NULL_REF && next >= i_total {
            return Err(Error::InconsistentFreeInode(format!(
                "inode {n_inode}: next {next} out of range"
            )));
        }
        if prev != NULL_REF && prev >= i_total {
            return Err(Error::InconsistentFreeInode(format!(
                "inode {n_inode}: prev {prev} out of range"
            )));
        }
    }
    Ok(())
}

/// `n_inode`'s record is a well-formed in-use inode: a legal file type,
/// at least one link, and content-tree roots within the data zone.
pub fn check_in_use_inode(inode: &Inode, n_inode: u32, dzone_total: u32) -> Result<()> {
    if inode.is_free() || inode.file_type().is_none() {
        return Err(Error::InconsistentInUseInode(
            n_inode,
            "mode carries FREE or an unrecognized type".into(),
        ));
    }
    if inode.ref_count == 0 {
        return Err(Error::InconsistentInUseInode(
            n_inode,
            "ref_count is zero".into(),
        ));
    }
    if inode.size > crate::layout::MAX_FILE_SIZE {
        return Err(Error::InconsistentInUseInode(
            n_inode,
            "size exceeds MAX_FILE_SIZE".into(),
        ));
    }
    for &r in inode.direct.iter() {
        check_cluster_in_range(r, dzone_total, n_inode)?;
    }
    check_cluster_in_range(inode.i1, dzone_total, n_inode)?;
    check_cluster_in_range(inode.i2, dzone_total, n_inode)?;
    if inode.file_type() == Some(FileType::Dir) {
        let span = crate::layout::DPC as u32 * crate::layout::DIR_ENTRY_SIZE as u32;
        if inode.size % span != 0 {
            return Err(Error::InconsistentDirectoryContents(format!(
                "inode {n_inode}: size {} is not a whole number of directory clusters",
                inode.size
            )));
        }
    }
    Ok(())
}

fn check_cluster_in_range(n_clust: u32, dzone_total: u32, n_inode: u32) -> Result<()> {
    if n_clust != NULL_REF && n_clust >= dzone_total {
        return Err(Error::InconsistentInUseInode(
            n_inode,
            format!("cluster reference {n_clust} out of range"),
        ));
    }
    Ok(())
}

/// An allocated data cluster must carry the owning inode's number in its
/// header `stat` field.
pub fn check_allocated_data_cluster(data: &DataCluster, n_clust: u32, expected_owner: u32) -> Result<()> {
    if data.header.stat != expected_owner {
        return Err(Error::WrongOwnerInode {
            cluster: n_clust,
            expected: expected_owner,
            found: data.header.stat,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Mode;

    fn fresh_superblock() -> Superblock {
        crate::format::build_superblock(
            &crate::format::FormatOptions {
                volume_name: "test".into(),
                inode_count: 64,
            },
            1024,
        )
        .unwrap()
    }

    #[test]
    fn fresh_superblock_is_consistent() {
        assert!(check_superblock(&fresh_superblock()).is_ok());
    }

    #[test]
    fn free_inode_mismatched_mode_is_rejected() {
        let mut inode = Inode::free();
        inode.mode = Mode::FILE;
        assert!(check_free_inode(&inode, 3, 64).is_err());
    }

    #[test]
    fn in_use_inode_with_zero_refcount_is_rejected() {
        let mut inode = Inode::free();
        inode.mode = FileType::File.mode_bit();
        inode.ref_count = 0;
        assert!(check_in_use_inode(&inode, 3, 128).is_err());
    }
}

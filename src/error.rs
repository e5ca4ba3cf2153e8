//! Error taxonomy for the SOFS14 storage engine (spec §7).
//!
//! Errors are split into system-like ones, which map naturally onto POSIX
//! errno values at the FUSE boundary (out of scope here), and structural
//! ones, which signal on-disk corruption and are always fatal for the
//! current operation. Inner routines never attempt silent recovery; every
//! `?` propagates unchanged up to the caller.

use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("path component exceeds MAX_NAME")]
    NameTooLong,

    #[error("malformed or empty path")]
    InvalidPath,

    #[error("path is not absolute")]
    RelativePath,

    #[error("symlink hop limit exceeded")]
    Loop,

    #[error("no such file or directory")]
    NotFound,

    #[error("file already exists")]
    Exists,

    #[error("not a directory")]
    NotDir,

    #[error("is a directory")]
    IsDir,

    #[error("directory not empty")]
    NotEmpty,

    #[error("access denied")]
    AccessDenied,

    #[error("operation not permitted")]
    NotPermitted,

    #[error("no space left on device")]
    NoSpace,

    #[error("file would exceed MAX_FILE_SIZE")]
    FileTooBig,

    #[error("link count would overflow")]
    MaxLinks,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("device not open")]
    DeviceNotOpen,

    #[error("device busy")]
    DeviceBusy,

    #[error("device size is not a whole multiple of the block size")]
    BadSize,

    #[error("address out of range: block {block}, size {size}")]
    InvalidRange { block: u64, size: u64 },

    #[error("inode #{0} is out of range or reserved")]
    InvalidInode(u32),

    #[error("data cluster #{0} is out of range or reserved")]
    InvalidCluster(u32),

    #[error("operation already performed: content reference already allocated")]
    AlreadyInList,

    #[error("data cluster #{cluster} carries owner #{found}, expected #{expected}")]
    WrongOwnerInode {
        cluster: u32,
        expected: u32,
        found: u32,
    },

    #[error("internal cache/list integrity violation: {0}")]
    Inconsistent(String),

    #[error("inconsistent superblock: {0}")]
    InconsistentSuperBlock(String),

    #[error("inconsistent inode table: {0}")]
    InconsistentInodeTable(String),

    #[error("inconsistent free-inode list: {0}")]
    InconsistentFreeInode(String),

    #[error("inode #{0} should be free-dirty but is not")]
    InconsistentDirtyInode(u32),

    #[error("inode #{0} is not a legal in-use inode: {1}")]
    InconsistentInUseInode(u32, String),

    #[error("inode #{0} is in use, illegal for this operation")]
    InconsistentInodeInUse(u32),

    #[error("inconsistent data zone: {0}")]
    InconsistentDataZone(String),

    #[error("inconsistent free-cluster bookkeeping: {0}")]
    InconsistentFreeCluster(String),

    #[error("data cluster #{0} is not a legal allocated cluster: {1}")]
    InconsistentDataCluster(u32, String),

    #[error("cluster #{0} reachable more than once or forms a cycle in an inode's content tree")]
    InconsistentClusterInInodeTree(u32),

    #[error("inconsistent directory contents: {0}")]
    InconsistentDirectoryContents(String),

    #[error("inconsistent directory entry: {0}")]
    InconsistentDirectoryEntry(String),

    #[error("data cluster #{0} is not currently allocated")]
    InconsistentNotAllocated(u32),
}

impl Error {
    /// True for every variant that spec §7 calls fatal/"recommend fsck".
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::Inconsistent(_)
                | Error::InconsistentSuperBlock(_)
                | Error::InconsistentInodeTable(_)
                | Error::InconsistentFreeInode(_)
                | Error::InconsistentDirtyInode(_)
                | Error::InconsistentInUseInode(_, _)
                | Error::InconsistentInodeInUse(_)
                | Error::InconsistentDataZone(_)
                | Error::InconsistentFreeCluster(_)
                | Error::InconsistentDataCluster(_, _)
                | Error::InconsistentClusterInInodeTree(_)
                | Error::InconsistentDirectoryContents(_)
                | Error::InconsistentDirectoryEntry(_)
                | Error::InconsistentNotAllocated(_)
                | Error::WrongOwnerInode { .. }
        )
    }
}

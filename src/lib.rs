//! SOFS14: a from-scratch, `std`-based on-disk storage engine.
//!
//! Layers are free functions grouped by module rather than methods on one
//! monolithic type — `access`, `calloc`, `content_tree`, `directory`, and
//! `inode_ops` each take the `MetaStore`/`BlockCache` pair they need as
//! explicit arguments. `Engine` is the only type that owns that pair and
//! exposes a POSIX-shaped surface over all of it.

pub mod access;
pub mod cache;
pub mod calloc;
pub mod consistency;
pub mod content_tree;
pub mod device;
pub mod engine;
pub mod error;
pub mod format;
pub mod ialloc;
pub mod inode_ops;
pub mod layout;
pub mod meta;
pub mod path;
pub mod time;

pub mod directory;

pub use engine::{Engine, FileStat, MountOptions, StatFs};
pub use error::{Error, Result};

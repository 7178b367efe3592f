use evtree::{EvtError, EvtPtr, PmemConfig};
use evtree_int_test::test_util::{
    all_entries, cleanup, create_test_context, create_tree, extent, open_tree, run_test, sorted,
};
use std::fs;

#[test]
fn test_pool_exhaustion_leaves_tree_unchanged() {
    run_test(
        create_test_context,
        |ctx| {
            let config = PmemConfig::builder().max_pages(24).build()?;
            let umem = ctx.create_pool(&config)?;
            let tree = create_tree(&umem, 4)?;

            let mut inserted = 0u64;
            let err = loop {
                let before = sorted(all_entries(&tree)?);
                let records = umem.stats().records;
                match tree.insert(&extent(inserted * 64, 64, 1), EvtPtr::new(inserted, 1, 0)) {
                    Ok(_) => inserted += 1,
                    Err(err) => {
                        assert_eq!(sorted(all_entries(&tree)?), before);
                        assert_eq!(umem.stats().records, records);
                        break err;
                    }
                }
                assert!(inserted < 1000, "pool never filled up");
            };
            assert!(matches!(err, EvtError::OutOfMemory(_)));
            assert!(inserted > 10);
            assert!(umem.stats().tx_aborted > 0);

            let report = tree.check_integrity()?;
            assert!(report.valid, "{:?}", report.errors);
            assert_eq!(report.entry_count, inserted);

            // updates that need no new node still go through
            tree.insert(&extent(0, 64, 1), EvtPtr::new(0xabc, 1, 0))?;
            assert_eq!(all_entries(&tree)?.len() as u64, inserted);

            // and freeing space makes room again
            tree.delete(&extent(0, 64, 1))?;
            tree.delete(&extent(64, 64, 1))?;
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_torn_journal_is_discarded() {
    run_test(
        create_test_context,
        |ctx| {
            let config = PmemConfig::default();
            let expected = {
                let umem = ctx.create_pool(&config)?;
                let tree = create_tree(&umem, 8)?;
                for i in 0..40u64 {
                    tree.insert(&extent(i * 4096, 4096, 2), EvtPtr::new(i, 1, 0))?;
                }
                sorted(all_entries(&tree)?)
            };

            // a length prefix promising more bytes than were written
            let mut torn = 4096u64.to_le_bytes().to_vec();
            torn.extend_from_slice(&[0x5a; 100]);
            fs::write(ctx.journal_path(), torn)?;

            let umem = ctx.open_pool(&config)?;
            let tree = open_tree(&umem)?;
            assert_eq!(sorted(all_entries(&tree)?), expected);
            assert!(tree.check_integrity()?.valid);
            assert_eq!(fs::metadata(ctx.journal_path())?.len(), 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_clean_close_leaves_empty_journal() {
    run_test(
        create_test_context,
        |ctx| {
            let config = PmemConfig::default();
            {
                let umem = ctx.create_pool(&config)?;
                let tree = create_tree(&umem, 8)?;
                tree.insert(&extent(0, 4096, 1), EvtPtr::new(1, 1, 0))?;
            }
            assert_eq!(fs::metadata(ctx.journal_path())?.len(), 0);

            let umem = ctx.open_pool(&config)?;
            assert_eq!(open_tree(&umem)?.depth()?, 1);
            Ok(())
        },
        cleanup,
    )
}

use evtree::{EvtConfig, EvtError, EvtFindOpc, EvtPtr, EvtTree, PmemConfig, EVT_FEAT_SPLIT_AXIS};
use evtree_int_test::test_util::{
    all_entries, cleanup, create_test_context, create_tree, extent, open_tree, run_test, sorted,
};

#[test]
fn test_tree_survives_reopen() {
    run_test(
        create_test_context,
        |ctx| {
            let config = PmemConfig::default();
            let expected = {
                let umem = ctx.create_pool(&config)?;
                let tree = create_tree(&umem, 6)?;
                for i in 0..300u64 {
                    tree.insert(&extent((i % 100) * 4096, 4096, 1 + i / 100), EvtPtr::new(i, 1, 0))?;
                }
                sorted(all_entries(&tree)?)
            };
            assert_eq!(expected.len(), 100);

            let umem = ctx.open_pool(&config)?;
            let tree = open_tree(&umem)?;
            assert_eq!(tree.order()?, 6);
            assert_eq!(sorted(all_entries(&tree)?), expected);
            assert!(tree.check_integrity()?.valid);

            // keeps accepting writes after the reopen
            let outcome = tree.insert(&extent(0, 8192, 9), EvtPtr::new(1000, 1, 0))?;
            assert_eq!(outcome.removed().len(), 2);
            let found = tree.find(&extent(0, 4096, 9), EvtFindOpc::All)?;
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].ptr.addr, 1000);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_features_survive_reopen() {
    run_test(
        create_test_context,
        |ctx| {
            let config = PmemConfig::default();
            {
                let umem = ctx.create_pool(&config)?;
                let tree_config = EvtConfig::builder()
                    .order(8)
                    .feats(EVT_FEAT_SPLIT_AXIS)
                    .build()?;
                let tree = EvtTree::create(umem.clone(), &tree_config)?;
                umem.set_root_object(tree.root_mmid().id())?;
                for i in 0..50u64 {
                    tree.insert(&extent(i * 10, 10, 1), EvtPtr::new(i, 1, 0))?;
                }
            }

            let umem = ctx.open_pool(&config)?;
            let tree = open_tree(&umem)?;
            assert_eq!(tree.feats()?, EVT_FEAT_SPLIT_AXIS);
            assert_eq!(tree.stats()?.policy, "axis-split");
            assert_eq!(tree.stats()?.entry_count, 50);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_destroy_empties_pool() {
    run_test(
        create_test_context,
        |ctx| {
            let config = PmemConfig::default();
            {
                let umem = ctx.create_pool(&config)?;
                let tree = create_tree(&umem, 4)?;
                for i in 0..80u64 {
                    tree.insert(&extent(i * 10, 10, 1), EvtPtr::new(i, 1, 0))?;
                }
                assert!(umem.stats().records > 20);
                tree.destroy()?;
                assert_eq!(umem.stats().records, 0);
            }

            let umem = ctx.open_pool(&config)?;
            assert_eq!(umem.stats().records, 0);
            assert!(matches!(open_tree(&umem), Err(EvtError::NotFound)));
            Ok(())
        },
        cleanup,
    )
}

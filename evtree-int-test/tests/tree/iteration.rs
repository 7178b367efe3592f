use evtree::{EvtPtr, IterProbe, IterState, PmemConfig};
use evtree_int_test::test_util::{all_entries, cleanup, create_test_context, create_tree, extent, run_test, sorted};

#[test]
fn test_iterator_visits_every_entry_both_ways() {
    run_test(
        create_test_context,
        |ctx| {
            let umem = ctx.create_pool(&PmemConfig::default())?;
            let tree = create_tree(&umem, 4)?;
            // interleave offsets so that inserts land all over the tree
            for i in 0..250u64 {
                let slot = (i * 97) % 250;
                tree.insert(&extent(slot * 512, 512, 1 + i % 7), EvtPtr::new(slot, 1, 0))?;
            }

            let mut iter = tree.iter()?;
            assert!(iter.probe(IterProbe::First)?);
            let forward = iter.collect_forward()?;
            assert_eq!(iter.state()?, IterState::Fini);

            let mut backward = Vec::new();
            assert!(iter.probe(IterProbe::Last)?);
            loop {
                backward.push(iter.fetch()?);
                if !iter.prev()? {
                    break;
                }
            }
            backward.reverse();

            assert_eq!(forward.len(), 250);
            assert_eq!(forward, backward);
            assert_eq!(sorted(forward), sorted(all_entries(&tree)?));
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_nested_iterators_are_independent() {
    run_test(
        create_test_context,
        |ctx| {
            let umem = ctx.create_pool(&PmemConfig::default())?;
            let tree = create_tree(&umem, 4)?;
            for i in 0..20u64 {
                tree.insert(&extent(i * 100, 100, 1), EvtPtr::new(i, 1, 0))?;
            }

            let mut outer = tree.iter()?;
            assert!(outer.is_private());
            let mut pairs = 0;
            outer.probe(IterProbe::First)?;
            loop {
                let mut inner = tree.iter()?;
                assert!(!inner.is_private());
                inner.probe(IterProbe::First)?;
                pairs += inner.collect_forward()?.len();
                inner.finish();
                if !outer.next()? {
                    break;
                }
            }
            assert_eq!(pairs, 400);
            Ok(())
        },
        cleanup,
    )
}

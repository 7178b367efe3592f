use evtree::{EvtFindOpc, EvtPtr, EvtResult, IterProbe, PmemConfig};
use evtree_int_test::test_util::{cleanup, create_test_context, create_tree, extent, open_tree};

fn main() -> EvtResult<()> {
    println!("Starting stress test...");
    let ctx = create_test_context()?;
    let config = PmemConfig::builder().sync_on_commit(false).build()?;

    let slots = 10_000u64;
    let epochs = 5u64;
    {
        let umem = ctx.create_pool(&config)?;
        let tree = create_tree(&umem, 32)?;

        let start = std::time::Instant::now();
        let mut capped = 0;
        for epoch in 1..=epochs {
            for slot in 0..slots {
                let outcome = tree.insert(
                    &extent(slot * 4096, 4096, epoch),
                    EvtPtr::new(slot * 4096 + epoch, 1, 0),
                )?;
                capped += outcome.removed().len();
            }
        }
        println!(
            "Inserted {} extents ({} capped older versions) in {:?}",
            slots * epochs,
            capped,
            start.elapsed()
        );

        let start = std::time::Instant::now();
        let mut found = 0;
        for slot in (0..slots).step_by(10) {
            found += tree
                .find(&extent(slot * 4096, 40960, epochs + 1), EvtFindOpc::Cap)?
                .len();
        }
        println!("Capture queries found {} extents in {:?}", found, start.elapsed());
    }

    let start = std::time::Instant::now();
    let umem = ctx.open_pool(&config)?;
    let tree = open_tree(&umem)?;
    println!("Reopened pool in {:?}", start.elapsed());

    let start = std::time::Instant::now();
    let mut iter = tree.iter()?;
    iter.probe(IterProbe::First)?;
    let visited = iter.collect_forward()?.len();
    iter.finish();
    println!("Iterated {} extents in {:?}", visited, start.elapsed());

    let report = tree.check_integrity()?;
    println!(
        "Integrity: valid={}, depth={}, nodes={}, entries={}",
        report.valid, report.depth, report.node_count, report.entry_count
    );

    drop(tree);
    drop(umem);
    cleanup(ctx)
}

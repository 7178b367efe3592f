use evtree::{EvtError, EvtFindOpc, EvtPtr, IterProbe, PmemConfig};
use evtree_int_test::test_util::{all_entries, cleanup, create_test_context, create_tree, extent, run_test};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_readers_on_cloned_contexts() {
    run_test(
        create_test_context,
        |ctx| {
            let umem = ctx.create_pool(&PmemConfig::default())?;
            let tree = create_tree(&umem, 8)?;
            for i in 0..400u64 {
                tree.insert(&extent(i * 4096, 4096, 1 + i % 4), EvtPtr::new(i, 1, 0))?;
            }

            let num_threads = 4;
            let barrier = Arc::new(Barrier::new(num_threads));
            let mut handles = vec![];

            for thread_id in 0..num_threads {
                let reader = tree.try_clone()?;
                let barrier_clone = Arc::clone(&barrier);

                let handle = thread::spawn(move || {
                    // Wait for all readers to be ready
                    barrier_clone.wait();

                    let mut matched = 0;
                    for i in (thread_id as u64..400).step_by(num_threads) {
                        let found = reader.find(&extent(i * 4096, 4096, 1 + i % 4), EvtFindOpc::Same)?;
                        assert_eq!(found.len(), 1);
                        assert_eq!(found[0].ptr.addr, i);
                        matched += 1;
                    }

                    let mut iter = reader.iter()?;
                    iter.probe(IterProbe::Last)?;
                    let mut visited = 1;
                    while iter.prev()? {
                        visited += 1;
                    }
                    Ok::<_, EvtError>((matched, visited))
                });

                handles.push(handle);
            }

            let mut matched = 0;
            for handle in handles {
                let (found, visited) = handle.join().expect("reader panicked")?;
                assert_eq!(visited, 400);
                matched += found;
            }
            assert_eq!(matched, 400);
            assert_eq!(tree.context().ref_count(), 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_reader_does_not_see_open_transaction() {
    run_test(
        create_test_context,
        |ctx| {
            let umem = ctx.create_pool(&PmemConfig::default())?;
            let tree = create_tree(&umem, 8)?;
            tree.insert(&extent(0, 4096, 1), EvtPtr::new(1, 1, 0))?;
            let reader = tree.try_clone()?;

            umem.tx_begin()?;
            tree.insert(&extent(4096, 4096, 1), EvtPtr::new(2, 1, 0))?;
            tree.insert(&extent(0, 4096, 2), EvtPtr::new(3, 1, 0))?;
            // the writer sees its own staging
            assert_eq!(all_entries(&tree)?.len(), 2);
            assert!(all_entries(&tree)?.iter().all(|e| e.ptr.addr != 1));

            let (reader, before) = thread::spawn(move || {
                let before = all_entries(&reader)?;
                Ok::<_, EvtError>((reader, before))
            })
            .join()
            .expect("reader panicked")?;
            assert_eq!(before.len(), 1);
            assert_eq!(before[0].ptr.addr, 1);

            umem.tx_commit()?;
            let after = thread::spawn(move || all_entries(&reader))
                .join()
                .expect("reader panicked")?;
            assert_eq!(after.len(), 2);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_second_writer_thread_is_refused() {
    run_test(
        create_test_context,
        |ctx| {
            let umem = ctx.create_pool(&PmemConfig::default())?;
            let tree = create_tree(&umem, 8)?;
            let writer = tree.try_clone()?;

            umem.tx_begin()?;
            tree.insert(&extent(0, 4096, 1), EvtPtr::new(1, 1, 0))?;

            let err = thread::spawn(move || writer.insert(&extent(8192, 4096, 1), EvtPtr::new(2, 1, 0)))
                .join()
                .expect("writer panicked")
                .unwrap_err();
            assert!(matches!(err, EvtError::Transaction(_)));

            umem.tx_commit()?;
            assert_eq!(all_entries(&tree)?.len(), 1);
            Ok(())
        },
        cleanup,
    )
}

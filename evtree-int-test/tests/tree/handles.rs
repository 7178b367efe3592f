use evtree::{ContextRef, EvtConfig, EvtError, EvtFindOpc, EvtPtr, EvtTree, HandleTable, UmemInstance};
use evtree_int_test::test_util::extent;

fn tree() -> EvtTree {
    EvtTree::create(UmemInstance::vmem(), &EvtConfig::default()).unwrap()
}

#[test]
fn test_extra_decref_releases_once() {
    let tree = tree();
    let tcx = ContextRef::clone(tree.context());
    assert_eq!(tcx.ref_count(), 1);

    let n = 5;
    for _ in 0..n {
        tcx.addref().unwrap();
    }
    assert_eq!(tcx.ref_count(), n + 1);

    let released = (0..n + 1).filter(|_| tcx.decref()).count();
    assert_eq!(released, 1);
    assert!(!tcx.is_alive());
    assert!(matches!(tcx.addref(), Err(EvtError::InvalidHandle)));
    assert!(matches!(
        tree.find(&extent(0, 10, 1), EvtFindOpc::All),
        Err(EvtError::InvalidHandle)
    ));

    // dropping the tree after the context died is a no-op
    drop(tree);
    assert!(!tcx.decref());
}

#[test]
fn test_handles_resolve_to_live_contexts() {
    let table = HandleTable::new();
    let tree = tree();
    tree.insert(&extent(0, 4096, 1), EvtPtr::new(0x40, 1, 0)).unwrap();

    let handle = table.tcx2hdl(tree.context()).unwrap();
    assert_eq!(tree.context().ref_count(), 2);
    drop(tree);

    // the handle keeps the tree reachable
    let tcx = table.hdl2tcx(handle).unwrap();
    let reopened = EvtTree::from_context(&tcx).unwrap();
    tcx.decref();
    let found = reopened.find(&extent(0, 4096, 1), EvtFindOpc::Same).unwrap();
    assert_eq!(found[0].ptr.addr, 0x40);
    drop(reopened);

    table.release(handle).unwrap();
    assert!(!tcx.is_alive());
    assert!(matches!(table.hdl2tcx(handle), Err(EvtError::InvalidHandle)));
    assert!(matches!(table.release(handle), Err(EvtError::InvalidHandle)));
}

#[test]
fn test_teardown_releases_every_handle() {
    let table = HandleTable::new();
    let trees: Vec<EvtTree> = (0..3).map(|_| tree()).collect();
    let contexts: Vec<ContextRef> = trees.iter().map(|t| ContextRef::clone(t.context())).collect();
    for tree in &trees {
        table.tcx2hdl(tree.context()).unwrap();
        table.tcx2hdl(tree.context()).unwrap();
    }
    assert_eq!(table.len(), 6);
    drop(trees);
    assert!(contexts.iter().all(|tcx| tcx.is_alive()));

    assert_eq!(table.teardown(), 6);
    assert!(table.is_empty());
    assert!(contexts.iter().all(|tcx| !tcx.is_alive()));
}

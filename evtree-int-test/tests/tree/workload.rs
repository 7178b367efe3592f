use evtree::{
    classify, EvtPtr, EvtRect, EvtResult, EvtTree, InsertOutcome, IterProbe, OverlapKind,
    PmemConfig,
};
use evtree_int_test::test_util::{all_entries, cleanup, create_test_context, create_tree, extent, run_test};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SLOTS: u64 = 150;
const SLOT_LEN: u64 = 100;

fn key(rect: &EvtRect) -> (u64, u64, u64, u64) {
    (rect.off_lo, rect.epc_lo, rect.off_hi, rect.epc_hi)
}

#[derive(Debug, PartialEq)]
enum Expected {
    Capped,
    Inserted(Vec<EvtRect>),
    Replaced(Vec<EvtRect>),
}

impl Expected {
    fn of(outcome: &InsertOutcome) -> Expected {
        let mut removed: Vec<EvtRect> = outcome.removed().iter().map(|e| e.rect).collect();
        removed.sort_by_key(key);
        match outcome {
            InsertOutcome::Capped => Expected::Capped,
            InsertOutcome::Replaced { .. } => Expected::Replaced(removed),
            _ => Expected::Inserted(removed),
        }
    }
}

/// Every live extent with the payload address it was last written with.
#[derive(Default)]
struct Model {
    live: Vec<(EvtRect, u64)>,
}

impl Model {
    fn insert(&mut self, rect: EvtRect, addr: u64) -> Expected {
        let kinds: Vec<OverlapKind> = self
            .live
            .iter()
            .map(|(existing, _)| classify(existing, &rect))
            .collect();
        if kinds.contains(&OverlapKind::Capped) {
            return Expected::Capped;
        }

        let mut removed = Vec::new();
        let mut replaced = false;
        let mut kept = Vec::with_capacity(self.live.len() + 1);
        for ((existing, old), kind) in self.live.drain(..).zip(kinds) {
            match kind {
                OverlapKind::Capping => removed.push(existing),
                OverlapKind::Same => {
                    replaced = true;
                    kept.push((existing, addr));
                }
                _ => kept.push((existing, old)),
            }
        }
        if !replaced {
            kept.push((rect, addr));
        }
        self.live = kept;

        removed.sort_by_key(key);
        if replaced {
            Expected::Replaced(removed)
        } else {
            Expected::Inserted(removed)
        }
    }

    fn sorted(&self) -> Vec<(EvtRect, u64)> {
        let mut live = self.live.clone();
        live.sort_by_key(|(rect, _)| key(rect));
        live
    }
}

fn check(tree: &EvtTree, model: &Model) -> EvtResult<()> {
    let report = tree.check_integrity()?;
    assert!(report.valid, "{:?}", report.errors);
    assert_eq!(report.entry_count as usize, model.live.len());

    let mut found: Vec<(EvtRect, u64)> = all_entries(tree)?
        .into_iter()
        .map(|entry| (entry.rect, entry.ptr.addr))
        .collect();
    found.sort_by_key(|(rect, _)| key(rect));
    assert_eq!(found, model.sorted());
    Ok(())
}

fn run_workload(order: u16, seed: u64) {
    run_test(
        create_test_context,
        move |ctx| {
            let mut rng = StdRng::seed_from_u64(seed);
            let config = PmemConfig::builder().sync_on_commit(false).build()?;
            let umem = ctx.create_pool(&config)?;
            let tree = create_tree(&umem, order)?;
            let mut model = Model::default();
            let mut newest = 20u64;
            let mut shadowing_writes = 0;

            for step in 0..1500u64 {
                let roll = rng.random_range(0..100);
                if roll < 25 && !model.live.is_empty() {
                    let at = rng.random_range(0..model.live.len());
                    let (rect, addr) = model.live.swap_remove(at);
                    let removed = tree.delete(&rect)?;
                    assert_eq!(removed.map(|e| e.ptr.addr), Some(addr));
                } else {
                    let rect = if roll < 40 {
                        // a newer write over a run of slots shadows whole subtrees
                        newest += 1;
                        let start = rng.random_range(0..SLOTS - 4);
                        let len = rng.random_range(4..=24u64).min(SLOTS - start);
                        extent(start * SLOT_LEN, len * SLOT_LEN, newest)
                    } else {
                        let start = rng.random_range(0..SLOTS);
                        let len = rng.random_range(1..=3u64).min(SLOTS - start);
                        extent(start * SLOT_LEN, len * SLOT_LEN, rng.random_range(1..=newest))
                    };
                    let expected = model.insert(rect, step);
                    let outcome = tree.insert(&rect, EvtPtr::new(step, 1, 0))?;
                    if roll < 40 && !outcome.removed().is_empty() {
                        shadowing_writes += 1;
                    }
                    assert_eq!(Expected::of(&outcome), expected, "step {}", step);
                }
                check(&tree, &model)?;
            }
            assert!(shadowing_writes > 0);

            // the iterator agrees with the model as well
            let mut iter = tree.iter()?;
            let mut visited = 0;
            if iter.probe(IterProbe::First)? {
                visited = iter.collect_forward()?.len();
            }
            assert_eq!(visited, model.live.len());
            iter.finish();

            // one write over everything shadows every entry
            newest += 1;
            let everything = extent(0, SLOTS * SLOT_LEN, newest);
            let expected = model.insert(everything, 9999);
            let outcome = tree.insert(&everything, EvtPtr::new(9999, 1, 0))?;
            assert_eq!(Expected::of(&outcome), expected);
            assert_eq!(model.live.len(), 1);
            assert_eq!(tree.depth()?, 1);
            check(&tree, &model)?;

            assert!(tree.delete(&everything)?.is_some());
            assert_eq!(tree.depth()?, 0);
            assert_eq!(umem.stats().records, 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_random_workload_narrow_nodes() {
    run_workload(4, 0x5eed);
}

#[test]
fn test_random_workload_wide_nodes() {
    run_workload(16, 0xfeed);
}

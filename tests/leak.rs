#![allow(clippy::unwrap_used)]

use std::thread;

use hazlist::{LockFreeList, reclaim, stats};

// This test lives alone in its own binary: the node counters are
// process-wide, so concurrent tests would distort the deltas.
#[test]
fn allocations_balance_after_quiescence() {
    let before = stats::node_stats();

    {
        let list = LockFreeList::new();
        thread::scope(|s| {
            for t in 0..8usize {
                let list = &list;
                s.spawn(move || {
                    for v in t * 1000..(t + 1) * 1000 {
                        assert!(list.insert(v).unwrap());
                    }
                });
            }
        });
        assert_eq!(list.len(), 8000);

        thread::scope(|s| {
            for t in 0..8usize {
                let list = &list;
                s.spawn(move || {
                    for v in t * 1000..(t + 1) * 1000 {
                        assert!(list.remove(&v));
                    }
                });
            }
        });
        assert_eq!(list.len(), 0);
    }

    // Workers have exited (their leftovers were orphaned on exit) and the
    // list destructor flushed; one more flush picks up any orphan handed
    // over after the destructor's scan.
    reclaim::flush();
    let after = stats::node_stats();
    assert_eq!(after.allocated - before.allocated, 8000);
    assert_eq!(after.reclaimed - before.reclaimed, 8000);
    assert_eq!(after.live(), before.live());
}

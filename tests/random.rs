#![allow(clippy::unwrap_used)]

use std::thread;

use hazlist::LockFreeList;
use rand::Rng;

#[test]
fn randomized_workload_keeps_set_semantics() {
    const THREADS: usize = 8;
    const OPS: usize = 20_000;
    const KEYSPACE: u32 = 512;

    let mut list = LockFreeList::new();
    thread::scope(|s| {
        for _ in 0..THREADS {
            let list = &list;
            s.spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..OPS {
                    let value = rng.gen_range(0..KEYSPACE);
                    match rng.gen_range(0..3) {
                        0 => {
                            let _ = list.insert(value);
                        }
                        1 => {
                            let _ = list.remove(&value);
                        }
                        _ => {
                            let _ = list.contains(&value);
                        }
                    }
                }
            });
        }
    });

    // After quiescing, a single-threaded sweep must see a strictly
    // increasing, duplicate-free chain drawn from the keyspace.
    let values = list.snapshot();
    assert!(
        values.windows(2).all(|pair| pair[0] < pair[1]),
        "sweep is not strictly increasing: ordering or uniqueness broken"
    );
    assert!(values.iter().all(|v| *v < KEYSPACE));
    assert_eq!(values.len(), list.len());
}

use kernel_sync::PushList;
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn take_all_returns_push_order() {
    let list = PushList::new();
    assert!(list.is_empty());

    assert!(list.push(1));
    assert!(!list.push(2));
    assert!(!list.push(3));
    assert!(!list.is_empty());

    let drained: Vec<_> = list.take_all().collect();
    assert_eq!(drained, vec![1, 2, 3]);
    assert!(list.is_empty());
    assert_eq!(list.take_all().count(), 0);
}

#[test]
fn push_reports_empty_after_drain() {
    let list = PushList::new();
    list.push("a");
    drop(list.take_all());
    assert!(list.push("b"), "list was drained, so this push starts a new batch");
}

#[test]
fn partially_consumed_drain_frees_the_rest() {
    let list = PushList::new();
    for i in 0..10 {
        list.push(vec![i; 16]);
    }
    let mut drain = list.take_all();
    assert_eq!(drain.next().map(|v| v[0]), Some(0));
    drop(drain);
    assert!(list.is_empty());
}

#[test]
fn concurrent_producers_lose_nothing() {
    let producers = 8;
    let per_producer = 2_000;

    let list = Arc::new(PushList::new());
    let start = Arc::new(Barrier::new(producers + 1));

    let mut handles = Vec::new();
    for p in 0..producers {
        let list = Arc::clone(&list);
        let start = Arc::clone(&start);
        handles.push(thread::spawn(move || {
            start.wait();
            for i in 0..per_producer {
                list.push((p, i));
            }
        }));
    }

    start.wait();
    let mut seen = Vec::new();
    while seen.len() < producers * per_producer {
        seen.extend(list.take_all());
        thread::yield_now();
    }
    for h in handles {
        h.join().unwrap();
    }
    seen.extend(list.take_all());

    assert_eq!(seen.len(), producers * per_producer);
    let unique: HashSet<_> = seen.iter().copied().collect();
    assert_eq!(unique.len(), seen.len());

    // Per producer, values come out in the order they were pushed.
    for p in 0..producers {
        let order: Vec<_> = seen.iter().filter(|(q, _)| *q == p).map(|(_, i)| *i).collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]));
    }
}

use kernel_sync::{HandoffError, HandoffSlot};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn post_then_take() {
    let slot = HandoffSlot::new();
    assert!(!slot.is_full());
    assert!(slot.take().is_none());

    slot.try_post(42u64).unwrap();
    assert!(slot.is_full());
    assert_eq!(slot.take(), Some(42));
    assert!(slot.take().is_none());
}

#[test]
fn second_post_is_rejected_with_value() {
    let slot = HandoffSlot::new();
    slot.try_post(String::from("first")).unwrap();

    let err = slot.try_post(String::from("second")).unwrap_err();
    assert_eq!(err, HandoffError::Occupied(String::from("second")));
    assert_eq!(err.into_inner(), "second");

    // The original value is untouched.
    assert_eq!(slot.take().as_deref(), Some("first"));

    // Once consumed, posting works again.
    slot.try_post(String::from("third")).unwrap();
    assert_eq!(slot.take().as_deref(), Some("third"));
}

#[test]
fn dropping_full_slot_drops_value() {
    struct Counted(Arc<AtomicUsize>);
    impl Drop for Counted {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let drops = Arc::new(AtomicUsize::new(0));
    {
        let slot = HandoffSlot::new();
        assert!(slot.try_post(Counted(Arc::clone(&drops))).is_ok());
    }
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn racing_senders_one_wins_per_round() {
    let senders = 4;
    let rounds = 500;

    let slot = Arc::new(HandoffSlot::<usize>::new());
    let start = Arc::new(Barrier::new(senders + 1));
    let delivered = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for id in 0..senders {
        let slot = Arc::clone(&slot);
        let start = Arc::clone(&start);
        handles.push(thread::spawn(move || {
            start.wait();
            let mut posted = 0;
            for _ in 0..rounds {
                // Spin until our message lands; at most one is ever outstanding.
                while slot.try_post(id).is_err() {
                    thread::yield_now();
                }
                posted += 1;
            }
            posted
        }));
    }

    let reader = {
        let slot = Arc::clone(&slot);
        let start = Arc::clone(&start);
        let delivered = Arc::clone(&delivered);
        thread::spawn(move || {
            start.wait();
            let mut per_sender = vec![0usize; senders];
            while delivered.load(Ordering::SeqCst) < senders * rounds {
                if let Some(id) = slot.take() {
                    per_sender[id] += 1;
                    delivered.fetch_add(1, Ordering::SeqCst);
                } else {
                    thread::yield_now();
                }
            }
            per_sender
        })
    };

    let posted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    let per_sender = reader.join().unwrap();

    assert_eq!(posted, senders * rounds);
    assert!(per_sender.iter().all(|&n| n == rounds));
    assert!(slot.take().is_none());
}

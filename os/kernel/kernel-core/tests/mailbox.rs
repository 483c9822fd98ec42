mod common;

use common::Machine;
use kernel_core::sync::{Mailbox, MailboxOwner, Mailslot};
use kernel_core::syscall::WaitTokens;
use kernel_core::{Holder, Syscall, SyscallError, ThreadState, WaitMode};
use std::thread;

const TEST: Holder = Holder::Kernel("test");

#[test]
fn gate_follows_the_contents() {
    let m = Machine::new(1);
    let (owner, slot) = m.kernel.create_mailbox(4).unwrap();
    let mailbox = owner.mailbox();
    assert!(!mailbox.gate().is_open());

    for message in [10, 20, 30] {
        assert_eq!(slot.mailbox().send(message), Ok(false));
        assert!(mailbox.gate().is_open());
    }
    assert_eq!(mailbox.len(), 3);

    assert_eq!(mailbox.receive(), Ok((10, false)));
    assert!(mailbox.gate().is_open());
    assert_eq!(mailbox.receive(), Ok((20, false)));
    assert_eq!(mailbox.receive(), Ok((30, false)));
    assert!(!mailbox.gate().is_open());
    assert!(mailbox.is_empty());
    assert_eq!(mailbox.receive(), Err(SyscallError::WouldBlock));

    let stats = mailbox.stats();
    assert_eq!((stats.sends, stats.receives, stats.false_closes), (3, 3, 0));
}

#[test]
fn send_during_a_speculative_close_reopens_the_gate() {
    let m = Machine::new(1);
    let (owner, slot) = m.kernel.create_mailbox(4).unwrap();
    let mailbox = owner.mailbox();
    slot.mailbox().send(1).unwrap();

    let taken = mailbox.take().unwrap();
    assert_eq!(taken.message, 1);
    assert!(mailbox.close_if_drained(taken.head));
    assert!(!mailbox.gate().is_open());

    // A producer slips in between the close and the re-check.
    slot.mailbox().send(2).unwrap();
    assert_eq!(mailbox.revalidate(taken.head), Some(false));
    assert!(mailbox.gate().is_open());
    assert_eq!(mailbox.stats().false_closes, 1);

    // Nothing raced this time.
    let taken = mailbox.take().unwrap();
    assert!(mailbox.close_if_drained(taken.head));
    assert_eq!(mailbox.revalidate(taken.head), None);
    assert!(!mailbox.gate().is_open());
    assert_eq!(mailbox.stats().false_closes, 1);
}

#[test]
fn full_and_orphaned_mailboxes_refuse_sends() {
    let m = Machine::new(1);
    let (owner, slot) = m.kernel.create_mailbox(2).unwrap();
    slot.mailbox().send(1).unwrap();
    slot.mailbox().send(2).unwrap();
    assert_eq!(slot.mailbox().send(3), Err(SyscallError::MailboxFull));
    assert_eq!(slot.mailbox().capacity(), 2);

    drop(owner);
    m.settle();
    let mailbox = slot.mailbox();
    assert!(mailbox.is_orphaned());
    assert_eq!(mailbox.send(4), Err(SyscallError::Orphaned));

    // What was queued is still delivered.
    assert_eq!(mailbox.receive().map(|(v, _)| v), Ok(1));
    assert_eq!(mailbox.receive().map(|(v, _)| v), Ok(2));
    assert_eq!(mailbox.receive(), Err(SyscallError::Orphaned));
}

#[test]
fn more_slots_share_one_mailbox() {
    let m = Machine::new(1);
    let (owner, slot) = m.kernel.create_mailbox(4).unwrap();
    let second = m.kernel.create_mailslot(&owner);
    slot.mailbox().send(1).unwrap();
    second.mailbox().send(2).unwrap();
    assert_eq!(owner.mailbox().len(), 2);

    assert!(m.kernel.create_mailbox(0).is_err());
    assert!(m.kernel.create_mailbox(65).is_err());
}

#[test]
fn concurrent_producers_lose_nothing() {
    const PRODUCERS: u64 = 4;
    const PER_PRODUCER: u64 = 2_000;

    let m = Machine::new(1);
    let (owner, slot) = m.kernel.create_mailbox(8).unwrap();
    let mailbox: &Mailbox = owner.mailbox();
    let sender: &Mailbox = slot.mailbox();

    let received = thread::scope(|s| {
        for p in 0..PRODUCERS {
            s.spawn(move || {
                for i in 0..PER_PRODUCER {
                    let message = p << 32 | i;
                    while sender.send(message) == Err(SyscallError::MailboxFull) {
                        thread::yield_now();
                    }
                }
            });
        }
        let consumer = s.spawn(move || {
            let mut next = vec![0_u64; PRODUCERS as usize];
            let mut total = 0;
            while total < PRODUCERS * PER_PRODUCER {
                match mailbox.receive() {
                    Ok((message, _)) => {
                        let (p, i) = ((message >> 32) as usize, message & 0xffff_ffff);
                        // Each producer's messages arrive in its send order.
                        assert_eq!(i, next[p]);
                        next[p] += 1;
                        total += 1;
                    }
                    Err(SyscallError::WouldBlock) => thread::yield_now(),
                    Err(e) => panic!("receive failed: {e}"),
                }
            }
            total
        });
        consumer.join().unwrap()
    });

    assert_eq!(received, PRODUCERS * PER_PRODUCER);
    assert!(mailbox.is_empty());
    let stats = mailbox.stats();
    assert_eq!(stats.sends, stats.receives);
    // At most one speculative close per receive.
    assert!(stats.false_closes <= stats.receives);
}

#[test]
fn syscalls_reach_the_mailbox_on_the_fast_path() {
    let m = Machine::new(2);
    let (process, receiver) = m.process_with_thread("mail");
    let sender = m.kernel.spawn_thread(&process, 0x40_0000, 1).unwrap();
    m.settle();

    let packed = m.call(&receiver, Syscall::CreateMailbox { capacity: 4 }).unwrap();
    let (slot, owner) = ((packed >> 32) as u32, packed as u32);
    assert!(process.lookup::<Mailslot>(slot, TEST).is_ok());
    let mailbox = process.lookup::<MailboxOwner>(owner, TEST).unwrap();

    assert_eq!(
        m.call(&receiver, Syscall::MailboxReceive { token: owner }),
        Err(SyscallError::WouldBlock)
    );
    let dispatched = m.kernel.scheduler_dispatched();
    assert_eq!(m.call(&sender, Syscall::MailboxSend { token: slot, message: 77 }), Ok(0));
    assert_eq!(m.kernel.scheduler_dispatched(), dispatched);
    assert_eq!(m.call(&receiver, Syscall::MailboxReceive { token: owner }), Ok(77));

    // Tokens of the wrong kind are refused.
    assert_eq!(
        m.call(&receiver, Syscall::MailboxReceive { token: slot }),
        Err(SyscallError::WrongObjectType)
    );

    // A blocked receiver is woken by the next send.
    let wait = Syscall::Wait {
        tokens: WaitTokens::new(&[owner]).unwrap(),
        mode: WaitMode::Any,
        timeout: None,
    };
    assert_eq!(m.trap(&receiver, wait), None);
    assert_eq!(receiver.state(), ThreadState::Waiting);
    assert_eq!(m.call(&sender, Syscall::MailboxSend { token: slot, message: 78 }), Ok(0));
    assert_eq!(receiver.take_result(), Some(Ok(0)));
    assert_eq!(m.call(&receiver, Syscall::MailboxReceive { token: owner }), Ok(78));
    assert!(!mailbox.mailbox().gate().is_open());

    assert_eq!(m.call(&receiver, Syscall::CloseToken { token: owner }), Ok(0));
    drop(mailbox);
    m.settle();
    assert_eq!(
        m.call(&sender, Syscall::MailboxSend { token: slot, message: 79 }),
        Err(SyscallError::Orphaned)
    );
}

mod common;

use common::Machine;
use kernel_core::syscall::WaitTokens;
use kernel_core::{ProcessLifecycle, Syscall, ThreadState, WaitMode};
use kernel_hal::CoreId;

const TICK: u64 = 1_000;

/// Several processes sleeping, waiting, yielding and dying across cores,
/// audited after every phase.
#[test]
fn busy_machine_stays_consistent() {
    let m = Machine::new(3);
    let stack_pages = m.platform.pages_in_use();

    let (server, main) = m.process_with_thread("server");
    let workers: Vec<_> = (1..6)
        .map(|i| m.kernel.spawn_thread(&server, 0x40_0000, i).unwrap())
        .collect();
    let (client, caller) = m.process_with_thread("client");
    m.settle();
    m.assert_consistent();
    let loads: usize = m.cores().map(|c| m.kernel.core_load(c)).sum();
    assert_eq!(loads, 7);

    let gate = m.call(&main, Syscall::CreateGate { latch: true, open: false }).unwrap() as u32;
    let wait = Syscall::Wait {
        tokens: WaitTokens::new(&[gate]).unwrap(),
        mode: WaitMode::Any,
        timeout: Some(50 * TICK),
    };
    for worker in &workers[..3] {
        assert_eq!(m.trap(worker, wait), None);
    }
    assert_eq!(m.trap(&workers[3], Syscall::Sleep { ticks: 5 * TICK }), None);
    m.assert_consistent();

    for _ in 0..4 {
        m.advance(TICK);
        m.assert_consistent();
    }
    m.advance(TICK);
    assert_eq!(workers[3].take_result(), Some(Ok(0)));

    assert_eq!(m.call(&main, Syscall::GateSet { token: gate }), Ok(0));
    for worker in &workers[..3] {
        assert_eq!(worker.take_result(), Some(Ok(0)));
    }
    m.assert_consistent();

    assert_eq!(m.call(&caller, Syscall::Yield), Ok(0));
    m.kernel.kill_process(&client, -1);
    m.settle();
    assert_eq!(client.lifecycle(), ProcessLifecycle::Stopped);
    assert_eq!(caller.state(), ThreadState::Exited);
    m.assert_consistent();

    assert_eq!(m.trap(&main, Syscall::ExitProcess { code: 0 }), None);
    assert_eq!(server.lifecycle(), ProcessLifecycle::Stopped);
    m.settle();
    for core in m.cores() {
        assert_eq!(m.kernel.active_thread(core), None);
        assert_eq!(m.kernel.core_load(core), 0);
    }
    assert_eq!(m.platform.pages_in_use(), stack_pages);
    assert!(m.kernel.is_quiescent());
    m.assert_consistent();

    drop((workers, main, caller, server, client));
    m.settle();
    assert_eq!(m.kernel.thread_count(), 0);
    assert!(m.kernel.reclaimed_objects() > 0);
    m.assert_consistent();
}

#[test]
fn idle_machine_has_nothing_to_report() {
    let m = Machine::new(4);
    m.settle();
    m.assert_consistent();
    for core in m.cores() {
        assert_eq!(m.kernel.active_thread(core), None);
    }
    assert_eq!(m.kernel.next_timer_deadline(), None);
    assert!(m.kernel.is_quiescent());
    assert_eq!(m.kernel.stats(CoreId(0)).resumes, 0);
}

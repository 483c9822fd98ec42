mod common;

use common::{Machine, PAGE_BUDGET};
use kernel_core::{KernelConfig, Syscall, ThreadState};
use kernel_hal::{CoreId, CoreMask};

const TICK: u64 = 1_000;

#[test]
fn new_threads_spread_over_the_least_loaded_cores() {
    let m = Machine::new(2);
    let process = m.kernel.create_process("spread");
    let threads: Vec<_> = (0..4)
        .map(|i| m.kernel.spawn_thread(&process, 0x40_0000, i).unwrap())
        .collect();
    m.settle();

    assert_eq!(m.kernel.core_load(CoreId(0)), 2);
    assert_eq!(m.kernel.core_load(CoreId(1)), 2);
    let cores: Vec<_> = threads.iter().map(|t| t.last_core().unwrap().0).collect();
    assert_eq!(cores, [0, 1, 0, 1]);
    assert!(m.kernel.active_thread(CoreId(0)).is_some());
    assert!(m.kernel.active_thread(CoreId(1)).is_some());
    m.assert_consistent();
}

#[test]
fn quantum_follows_the_run_list_length() {
    let m = Machine::new(1);
    let process = m.kernel.create_process("quantum");
    let first = m.kernel.spawn_thread(&process, 0x40_0000, 0).unwrap();
    m.settle();
    assert_eq!(first.quantum(), 50);

    // The next epoch starts with three runnable threads.
    let _more: Vec<_> = (1..3)
        .map(|i| m.kernel.spawn_thread(&process, 0x40_0000, i).unwrap())
        .collect();
    m.settle();
    m.kernel.syscall(CoreId(0), first.id(), Syscall::Yield.encode());
    m.settle();
    let active = m.kernel.active_thread(CoreId(0)).unwrap();
    assert_eq!(m.kernel.thread(active).unwrap().quantum(), 33);

    let config = KernelConfig::with_cores(1);
    assert_eq!(config.quantum_for(1), 50);
    assert_eq!(config.quantum_for(3), 33);
    assert_eq!(config.quantum_for(20), 10);
}

#[test]
fn expired_quantum_rotates_the_core() {
    let m = Machine::new(1);
    let process = m.kernel.create_process("rotate");
    let a = m.kernel.spawn_thread(&process, 0x40_0000, 0).unwrap();
    let b = m.kernel.spawn_thread(&process, 0x40_0000, 1).unwrap();
    m.settle();
    assert_eq!(m.running_on(&a), Some(CoreId(0)));
    assert_eq!(b.state(), ThreadState::OnCpuLists);

    m.advance(49 * TICK);
    assert_eq!(m.running_on(&a), Some(CoreId(0)));
    assert_eq!(a.quantum(), 1);

    m.advance(TICK);
    assert_eq!(m.running_on(&b), Some(CoreId(0)));
    assert_eq!(a.state(), ThreadState::OnCpuLists);
    assert!(m.kernel.stats(CoreId(0)).resumes >= 2);
    m.assert_consistent();
}

#[test]
fn late_timer_interrupt_charges_every_missed_tick() {
    let m = Machine::new(1);
    let process = m.kernel.create_process("late");
    let a = m.kernel.spawn_thread(&process, 0x40_0000, 0).unwrap();
    m.settle();
    assert_eq!(a.quantum(), 50);

    // One interrupt arriving ten ticks late.
    m.advance(10 * TICK + TICK / 2);
    assert_eq!(a.quantum(), 40);
}

#[test]
fn yield_hands_the_core_to_the_next_thread() {
    let m = Machine::new(1);
    let process = m.kernel.create_process("yield");
    let a = m.kernel.spawn_thread(&process, 0x40_0000, 0).unwrap();
    let b = m.kernel.spawn_thread(&process, 0x40_0000, 1).unwrap();
    m.settle();
    assert_eq!(m.running_on(&a), Some(CoreId(0)));

    assert_eq!(m.call(&a, Syscall::Yield), Ok(0));
    assert_eq!(m.running_on(&b), Some(CoreId(0)));
    assert_eq!(m.make_active(&a), CoreId(0));
}

#[test]
fn sleep_parks_until_its_deadline() {
    let m = Machine::new(2);
    let (_process, thread) = m.process_with_thread("sleeper");
    assert_eq!(m.trap(&thread, Syscall::Sleep { ticks: 5 * TICK }), None);
    assert_eq!(thread.state(), ThreadState::InSchedulerResumeDeferred);
    assert!(m.kernel.next_timer_deadline().is_some());
    m.assert_consistent();

    m.advance(5 * TICK - 1);
    assert_eq!(thread.state(), ThreadState::InSchedulerResumeDeferred);

    m.advance(1);
    assert!(matches!(thread.state(), ThreadState::Running | ThreadState::OnCpuLists));
    assert_eq!(thread.take_result(), Some(Ok(0)));
    assert_eq!(m.kernel.next_timer_deadline(), None);
}

#[test]
fn sleepers_with_one_deadline_wake_in_the_order_they_slept() {
    let m = Machine::new(1);
    let process = m.kernel.create_process("sleepers");
    let a = m.kernel.spawn_thread(&process, 0x40_0000, 0).unwrap();
    let b = m.kernel.spawn_thread(&process, 0x40_0000, 1).unwrap();
    m.settle();

    // The clock stands still, so both deadlines are equal.
    assert_eq!(m.trap(&b, Syscall::Sleep { ticks: 3 * TICK }), None);
    assert_eq!(m.trap(&a, Syscall::Sleep { ticks: 3 * TICK }), None);
    let slept_at = m.kernel.now();
    assert_eq!(m.kernel.next_timer_deadline(), Some(slept_at + 3 * TICK));
    assert_eq!(m.kernel.active_thread(CoreId(0)), None);

    m.advance(3 * TICK + 7);
    assert!(m.kernel.now() >= slept_at + 3 * TICK);
    assert_eq!(m.running_on(&b), Some(CoreId(0)));
    assert_eq!(a.state(), ThreadState::OnCpuLists);
    assert_eq!(a.take_result(), Some(Ok(0)));
    assert_eq!(b.take_result(), Some(Ok(0)));

    // An idle round with no timers leaves the clock where it was.
    let now = m.kernel.now();
    m.settle();
    assert_eq!(m.kernel.now(), now);
}

#[test]
fn zero_sleep_returns_at_once() {
    let m = Machine::new(1);
    let (_process, thread) = m.process_with_thread("nap");
    assert_eq!(m.call(&thread, Syscall::Sleep { ticks: 0 }), Ok(0));
}

#[test]
fn affinity_moves_the_thread() {
    let m = Machine::new(2);
    let (_process, thread) = m.process_with_thread("pinned");
    assert_eq!(m.running_on(&thread), Some(CoreId(0)));

    let only_one = CoreMask::single(CoreId(1));
    assert_eq!(m.call(&thread, Syscall::SetAffinity { mask: only_one }), Ok(0));
    assert_eq!(thread.affinity(), only_one);
    assert_eq!(m.running_on(&thread), Some(CoreId(1)));
    assert_eq!(m.call(&thread, Syscall::CurrentCore), Ok(1));

    // Masks naming no existing core are refused.
    let outside = CoreMask::single(CoreId(5));
    assert_eq!(
        m.call(&thread, Syscall::SetAffinity { mask: outside }),
        Err(kernel_core::SyscallError::InvalidArgument)
    );
    m.assert_consistent();
}

#[test]
fn only_the_scheduling_core_runs_the_scheduler() {
    let mut config = KernelConfig::with_cores(2);
    config.scheduling_core = CoreId(1);
    let m = Machine::with_config(config, PAGE_BUDGET);
    let process = m.kernel.create_process("remote");
    let thread = m.kernel.spawn_thread(&process, 0x40_0000, 0).unwrap();

    let before = m.kernel.scheduler_dispatched();
    m.step(CoreId(0));
    assert_eq!(m.kernel.scheduler_dispatched(), before);
    assert_eq!(thread.state(), ThreadState::Created);

    m.settle();
    assert!(m.kernel.scheduler_dispatched() > before);
    assert!(m.running_on(&thread).is_some());
}

mod common;

use common::{Machine, PAGE_BUDGET};
use kernel_core::sync::{Gate, Semaphore};
use kernel_core::syscall::WaitTokens;
use kernel_core::{
    Holder, KernelConfig, KernelError, ObjectRef, Process, Syscall, SyscallError, ThreadState,
    WaitMode,
};

const TEST: Holder = Holder::Kernel("test");

fn wait(tokens: &[u32], mode: WaitMode, timeout: Option<u64>) -> Syscall {
    Syscall::Wait {
        tokens: WaitTokens::new(tokens).unwrap(),
        mode,
        timeout,
    }
}

fn object(process: &Process, token: u32) -> ObjectRef {
    process.token(token, TEST).unwrap()
}

fn token(result: Result<u64, SyscallError>) -> u32 {
    u32::try_from(result.unwrap()).unwrap()
}

#[test]
fn any_reports_the_satisfied_entry() {
    let m = Machine::new(2);
    let (process, thread) = m.process_with_thread("any");
    let a = token(m.call(&thread, Syscall::CreateGate { latch: true, open: false }));
    let b = token(m.call(&thread, Syscall::CreateGate { latch: true, open: false }));

    assert_eq!(m.trap(&thread, wait(&[a, b], WaitMode::Any, None)), None);
    assert_eq!(thread.state(), ThreadState::Waiting);
    m.assert_consistent();

    m.kernel.signal(&object(&process, b));
    m.settle();
    assert_eq!(thread.take_result(), Some(Ok(1)));

    // Both gates are latches; b stays open and wins right away.
    assert_eq!(m.call(&thread, wait(&[a, b], WaitMode::Any, None)), Ok(1));
    let gate_a = process.lookup::<Gate>(a, TEST).unwrap();
    assert!(!gate_a.has_waiters());
}

#[test]
fn all_needs_every_entry() {
    let m = Machine::new(1);
    let (process, thread) = m.process_with_thread("all");
    let a = token(m.call(&thread, Syscall::CreateNotify));
    let b = token(m.call(&thread, Syscall::CreateNotify));

    assert_eq!(m.trap(&thread, wait(&[a, b], WaitMode::All, None)), None);
    m.kernel.signal(&object(&process, a));
    m.settle();
    assert_eq!(thread.state(), ThreadState::Waiting);
    assert_eq!(thread.take_result(), None);

    m.kernel.signal(&object(&process, b));
    m.settle();
    assert_eq!(thread.take_result(), Some(Ok(0)));
}

#[test]
fn timeout_wakes_with_timed_out() {
    let m = Machine::new(2);
    let (_process, thread) = m.process_with_thread("timeout");
    let gate = token(m.call(&thread, Syscall::CreateGate { latch: true, open: false }));

    assert_eq!(m.trap(&thread, wait(&[gate], WaitMode::Any, Some(3_000))), None);
    m.advance(2_999);
    assert_eq!(thread.state(), ThreadState::Waiting);
    m.advance(1);
    assert_eq!(thread.take_result(), Some(Err(SyscallError::TimedOut)));
    assert_eq!(m.kernel.next_timer_deadline(), None);
    m.assert_consistent();
}

#[test]
fn zero_timeout_polls() {
    let m = Machine::new(1);
    let (_process, thread) = m.process_with_thread("poll");
    let closed = token(m.call(&thread, Syscall::CreateGate { latch: true, open: false }));
    let open = token(m.call(&thread, Syscall::CreateGate { latch: true, open: true }));

    assert_eq!(
        m.call(&thread, wait(&[closed], WaitMode::Any, Some(0))),
        Err(SyscallError::TimedOut)
    );
    assert_eq!(m.call(&thread, wait(&[closed, open], WaitMode::Any, Some(0))), Ok(1));
}

#[test]
fn abandoned_all_wait_gives_back_what_it_latched() {
    let m = Machine::new(1);
    let (process, thread) = m.process_with_thread("latched");
    let packed = m
        .call(&thread, Syscall::CreateSemaphore { initial: 1, max: 1 })
        .unwrap();
    let sem = packed as u32;
    let gate = token(m.call(&thread, Syscall::CreateGate { latch: true, open: false }));
    let semaphore = process.lookup::<Semaphore>(sem, TEST).unwrap();

    assert_eq!(m.trap(&thread, wait(&[sem, gate], WaitMode::All, Some(500))), None);
    assert_eq!(semaphore.count(), 0);
    m.advance(500);
    assert_eq!(thread.take_result(), Some(Err(SyscallError::TimedOut)));
    assert_eq!(semaphore.count(), 1);
}

#[test]
fn auto_reset_gate_lets_one_waiter_through() {
    let m = Machine::new(1);
    let (process, thread) = m.process_with_thread("auto");
    let other = m.kernel.spawn_thread(&process, 0x40_0000, 1).unwrap();
    m.settle();
    let gate = token(m.call(&thread, Syscall::CreateGate { latch: false, open: false }));

    assert_eq!(m.trap(&thread, wait(&[gate], WaitMode::Any, None)), None);
    assert_eq!(m.trap(&other, wait(&[gate], WaitMode::Any, None)), None);

    m.kernel.signal(&object(&process, gate));
    m.settle();
    assert_eq!(thread.take_result(), Some(Ok(0)));
    assert_eq!(other.state(), ThreadState::Waiting);
    assert!(!process.lookup::<Gate>(gate, TEST).unwrap().is_open());

    m.kernel.signal(&object(&process, gate));
    m.settle();
    assert_eq!(other.take_result(), Some(Ok(0)));
}

#[test]
fn semaphore_hands_counts_out_in_arrival_order() {
    let m = Machine::new(1);
    let (process, first) = m.process_with_thread("fifo");
    let second = m.kernel.spawn_thread(&process, 0x40_0000, 1).unwrap();
    m.settle();
    let sem = m
        .call(&first, Syscall::CreateSemaphore { initial: 0, max: 4 })
        .unwrap() as u32;

    assert_eq!(m.trap(&first, wait(&[sem], WaitMode::Any, None)), None);
    assert_eq!(m.trap(&second, wait(&[sem], WaitMode::Any, None)), None);

    m.kernel.signal(&object(&process, sem));
    m.settle();
    assert_eq!(first.take_result(), Some(Ok(0)));
    assert_eq!(second.state(), ThreadState::Waiting);
}

#[test]
fn killing_the_process_aborts_the_wait() {
    let m = Machine::new(2);
    let (process, thread) = m.process_with_thread("killed");
    let gate = token(m.call(&thread, Syscall::CreateGate { latch: true, open: false }));
    assert_eq!(m.trap(&thread, wait(&[gate], WaitMode::Any, Some(10_000))), None);

    m.kernel.kill_process(&process, -99);
    m.settle();
    assert_eq!(thread.state(), ThreadState::Exited);
    assert_eq!(thread.exit_code(), Some(-99));
    assert!(thread.exit_gate().is_open());
    assert_eq!(m.kernel.next_timer_deadline(), None);
    m.assert_consistent();
}

#[test]
fn wait_arguments_are_checked() {
    let mut config = KernelConfig::with_cores(1);
    config.max_wait_entries = 2;
    let m = Machine::with_config(config, PAGE_BUDGET);
    let (_process, thread) = m.process_with_thread("args");
    let gates: Vec<u32> = (0..3)
        .map(|_| token(m.call(&thread, Syscall::CreateGate { latch: true, open: false })))
        .collect();

    assert_eq!(
        m.call(&thread, wait(&gates, WaitMode::Any, None)),
        Err(SyscallError::Exhausted(KernelError::TooManyWaitEntries))
    );
    assert_eq!(
        m.call(&thread, wait(&[gates[0], 999], WaitMode::Any, None)),
        Err(SyscallError::InvalidToken)
    );
    assert_eq!(WaitTokens::new(&[]), Err(SyscallError::InvalidArgument));
    assert_eq!(WaitTokens::new(&[1, 2, 3, 4, 5]), Err(SyscallError::InvalidArgument));
}

#[test]
fn threads_and_processes_are_waitable() {
    let m = Machine::new(2);
    let (process, parent) = m.process_with_thread("parent");
    let child = token(m.call(&parent, Syscall::CreateThread { entry: 0x40_1000, arg: 7 }));
    let child_thread = process.lookup::<kernel_core::Thread>(child, TEST).unwrap();
    assert_eq!(child_thread.entry(), (0x40_1000, 7));

    assert_eq!(m.trap(&parent, wait(&[child], WaitMode::Any, None)), None);
    assert_eq!(m.trap(&child_thread, Syscall::ExitThread { code: 3 }), None);
    assert_eq!(child_thread.exit_code(), Some(3));
    assert_eq!(parent.take_result(), Some(Ok(0)));
    assert_eq!(process.live_threads(), 1);
}

#[test]
fn closed_gate_with_no_timeout_waits_for_ever() {
    let m = Machine::new(1);
    let (_process, thread) = m.process_with_thread("forever");
    let gate = token(m.call(&thread, Syscall::CreateGate { latch: true, open: false }));
    assert_eq!(m.trap(&thread, wait(&[gate], WaitMode::Any, None)), None);
    m.advance(1_000_000);
    assert_eq!(thread.state(), ThreadState::Waiting);
    assert_eq!(thread.take_result(), None);
}

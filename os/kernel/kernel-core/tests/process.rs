mod common;

use common::{Machine, PAGE_BUDGET};
use kernel_core::{Fault, KernelConfig, KernelError, ProcessLifecycle, Syscall, ThreadState};
use kernel_core::xci::Xci;
use kernel_hal::{CoreId, CoreMask, VirtualAddress};

const PAGE_FAULT: Fault = Fault::PageFault {
    address: VirtualAddress::new(0xdead_0000),
};

#[test]
fn exit_process_takes_every_thread_down() {
    let m = Machine::new(2);
    let (process, first) = m.process_with_thread("exit");
    let second = m.kernel.spawn_thread(&process, 0x40_0000, 1).unwrap();
    m.settle();
    assert_eq!(m.running_on(&second), Some(CoreId(1)));
    let used = m.platform.pages_in_use();

    assert_eq!(m.trap(&first, Syscall::ExitProcess { code: 5 }), None);
    assert_eq!(process.lifecycle(), ProcessLifecycle::Stopped);
    assert_eq!(process.exit_code(), Some(5));
    assert_eq!(first.exit_code(), Some(5));
    assert_eq!(second.state(), ThreadState::Exited);
    assert_eq!(second.exit_code(), Some(5));
    assert_eq!(process.live_threads(), 0);
    assert!(process.exit_gate().is_open());
    assert_eq!(m.platform.pages_in_use(), used - 10);
    m.assert_consistent();
}

#[test]
fn last_thread_exit_stops_the_process_with_its_code() {
    let m = Machine::new(1);
    let (process, thread) = m.process_with_thread("last");
    assert_eq!(m.trap(&thread, Syscall::ExitThread { code: 12 }), None);
    assert_eq!(process.lifecycle(), ProcessLifecycle::Stopped);
    assert_eq!(process.exit_code(), Some(12));
}

#[test]
fn crash_stops_the_process_with_the_fault_code() {
    let m = Machine::new(2);
    let (process, thread) = m.process_with_thread("crash");
    let gate = m.call(&thread, Syscall::CreateGate { latch: true, open: false }).unwrap();
    assert_eq!(process.token_count(), 1);

    m.fault(&thread, PAGE_FAULT);
    assert_eq!(thread.state(), ThreadState::Exited);
    assert_eq!(thread.fault(), Some(PAGE_FAULT));
    assert_eq!(thread.exit_code(), Some(-14));
    assert_eq!(process.exit_code(), Some(-14));
    assert_eq!(process.lifecycle(), ProcessLifecycle::Stopped);
    // The stop released the token table.
    assert_eq!(process.token_count(), 0);
    assert!(process.close_token(gate as u32).is_none());

    assert_eq!(Fault::InvalidOpcode.exit_code(), -6);
    assert_eq!(Fault::GeneralProtection.exit_code(), -13);
    assert_eq!(Fault::DivideByZero.exit_code(), -8);
}

#[test]
fn debugger_holds_the_crashed_thread() {
    let m = Machine::new(1);
    let (process, thread) = m.process_with_thread("debugged");
    m.kernel.attach_debugger(&process, true);
    assert!(process.debugger_attached());

    m.fault(&thread, Fault::DivideByZero);
    assert_eq!(thread.state(), ThreadState::DebugCrashed);
    assert_eq!(thread.fault(), Some(Fault::DivideByZero));
    assert_eq!(process.lifecycle(), ProcessLifecycle::Running);
    m.assert_consistent();

    m.kernel.release_debug_hold(&process);
    m.settle();
    assert_eq!(thread.state(), ThreadState::Exited);
    assert_eq!(thread.exit_code(), Some(-8));
    assert_eq!(process.lifecycle(), ProcessLifecycle::Stopped);
}

#[test]
fn kill_reaches_threads_on_other_cores() {
    let m = Machine::new(3);
    let process = m.kernel.create_process("victim");
    let threads: Vec<_> = (0..5)
        .map(|i| m.kernel.spawn_thread(&process, 0x40_0000, i).unwrap())
        .collect();
    m.settle();
    for core in m.cores() {
        assert!(m.kernel.core_load(core) > 0);
    }
    let used = m.platform.pages_in_use();

    m.kernel.kill_process(&process, -9);
    m.settle();
    for thread in &threads {
        assert_eq!(thread.state(), ThreadState::Exited);
        assert_eq!(thread.exit_code(), Some(-9));
    }
    for core in m.cores() {
        assert_eq!(m.kernel.core_load(core), 0);
        assert_eq!(m.kernel.active_thread(core), None);
    }
    assert_eq!(process.lifecycle(), ProcessLifecycle::Stopped);
    assert_eq!(m.platform.pages_in_use(), used - 25);

    drop(threads);
    m.settle();
    assert_eq!(m.kernel.thread_count(), 0);
    m.assert_consistent();
}

#[test]
fn stopping_process_refuses_new_threads() {
    let m = Machine::new(1);
    let (process, _thread) = m.process_with_thread("stopping");
    m.kernel.kill_process(&process, 1);
    m.settle();
    assert_eq!(
        m.kernel.spawn_thread(&process, 0x40_0000, 0).unwrap_err(),
        KernelError::ProcessStopping
    );
}

#[test]
fn thread_slots_are_bounded_and_recycled() {
    let mut config = KernelConfig::with_cores(1);
    config.max_threads = 2;
    let m = Machine::with_config(config, PAGE_BUDGET);
    let process = m.kernel.create_process("slots");
    let a = m.kernel.spawn_thread(&process, 0x40_0000, 0).unwrap();
    let _b = m.kernel.spawn_thread(&process, 0x40_0000, 1).unwrap();
    m.settle();
    assert_eq!(
        m.kernel.spawn_thread(&process, 0x40_0000, 2).unwrap_err(),
        KernelError::OutOfThreadSlots
    );

    assert_eq!(m.trap(&a, Syscall::ExitThread { code: 0 }), None);
    assert_eq!(m.kernel.thread_count(), 2);
    drop(a);
    m.settle();
    assert_eq!(m.kernel.thread_count(), 1);
    assert!(m.kernel.spawn_thread(&process, 0x40_0000, 3).is_ok());
}

#[test]
fn memory_exhaustion_leaves_nothing_behind() {
    let m = Machine::with_config(KernelConfig::with_cores(1), 4);
    let process = m.kernel.create_process("hungry");
    assert_eq!(
        m.kernel.spawn_thread(&process, 0x40_0000, 0).unwrap_err(),
        KernelError::OutOfPages
    );
    m.settle();
    assert_eq!(m.platform.pages_in_use(), 0);
    assert_eq!(m.kernel.thread_count(), 0);
    assert_eq!(process.live_threads(), 0);
}

#[test]
fn refused_stop_is_resent_while_the_core_stays_busy() {
    let m = Machine::new(2);
    let keeper = m
        .kernel
        .spawn_kernel_thread(0xffff_8000_0000_0000, 0, CoreMask::single(CoreId(0)))
        .unwrap();
    let (process, victim) = m.process_with_thread("victim");
    assert_eq!(m.running_on(&keeper), Some(CoreId(0)));
    assert_eq!(m.running_on(&victim), Some(CoreId(1)));

    m.kernel.send_xci(CoreId(0), CoreId(1), Xci::Wake).unwrap();
    m.kernel.kill_process(&process, -9);
    m.step(CoreId(0));
    assert_eq!(m.kernel.stats(CoreId(0)).xci_retries, 0);

    m.step(CoreId(1));
    m.step(CoreId(0));
    // Resent ahead of the runnable keeper instead of waiting for idle.
    assert_eq!(m.kernel.stats(CoreId(0)).xci_retries, 1);
    assert_eq!(m.kernel.active_thread(CoreId(0)), Some(keeper.id()));

    m.settle();
    assert_eq!(victim.exit_code(), Some(-9));
    assert_eq!(process.lifecycle(), ProcessLifecycle::Stopped);
}

#[test]
fn kernel_threads_need_no_user_stack_state() {
    let m = Machine::new(2);
    let used = m.platform.pages_in_use();
    let thread = m
        .kernel
        .spawn_kernel_thread(0xffff_8000_0000_0000, 0, CoreMask::single(CoreId(1)))
        .unwrap();
    m.settle();
    assert!(thread.is_kernel());
    assert_eq!(m.running_on(&thread), Some(CoreId(1)));
    assert_eq!(m.platform.pages_in_use(), used + 4);
    assert!(m.kernel.kernel_process().header().is_permanent());
}

#[test]
#[should_panic(expected = "kernel thread")]
fn kernel_thread_fault_is_fatal() {
    let m = Machine::new(1);
    let thread = m
        .kernel
        .spawn_kernel_thread(0xffff_8000_0000_0000, 0, CoreMask::first(1))
        .unwrap();
    m.settle();
    m.fault(&thread, Fault::GeneralProtection);
}

mod common;

use common::Machine;
use kernel_core::object::External;
use kernel_core::sync::GateMode;
use kernel_core::{Holder, ObjectId, ObjectKind, ProcessId, ThreadId};
use kernel_hal::CoreId;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[test]
fn last_release_reclaims_on_the_releasing_core() {
    let m = Machine::new(2);
    m.settle();
    let live = m.kernel.live_objects();
    let reclaimed = m.kernel.reclaimed_objects();

    let gate = m.kernel.create_gate(GateMode::Latch, false);
    let weak = gate.downgrade();
    assert_eq!(m.kernel.live_objects(), live + 1);
    {
        let _on = m.platform.enter_core(CoreId(1));
        drop(gate);
    }
    assert!(weak.upgrade(Holder::Kernel("test")).is_none());

    // Queued on core 1; core 0 must not pick it up.
    m.step(CoreId(0));
    assert_eq!(m.kernel.reclaimed_objects(), reclaimed);
    m.step(CoreId(1));
    assert_eq!(m.kernel.reclaimed_objects(), reclaimed + 1);
    assert_eq!(m.kernel.live_objects(), live);
}

#[test]
fn every_clone_is_an_audited_record() {
    let m = Machine::new(1);
    let notify = m.kernel.create_notify();
    let a = notify.clone_as(Holder::Kernel("a"));
    let b = notify.clone_as(Holder::Process(kernel_core::ProcessId(9)));
    assert_eq!(notify.header().ref_count(), 3);
    assert!(notify.header().holders().contains(&Holder::Process(kernel_core::ProcessId(9))));
    assert_eq!(notify.header().audit(), Ok(()));

    drop(a);
    drop(b);
    assert_eq!(notify.header().ref_count(), 1);
    assert!(!notify.header().is_zeroed());
}

#[test]
fn kernel_process_is_permanent() {
    let m = Machine::new(1);
    let process = m.kernel.kernel_process();
    assert!(process.header().is_permanent());
    assert_eq!(process.header().kind(), ObjectKind::Process);
    let extra = process.clone_as(Holder::Kernel("extra"));
    drop(extra);
    m.settle();
    assert!(!process.header().is_zeroed());
}

#[test]
fn closing_a_token_releases_the_object() {
    let m = Machine::new(1);
    let process = m.kernel.create_process("tokens");
    let semaphore = m.kernel.create_semaphore(1, 1).unwrap();
    let weak = semaphore.downgrade();
    let token = process.insert_token(&semaphore.into_object()).unwrap();
    assert_eq!(process.token_count(), 1);

    let held = process.token(token, Holder::Kernel("test")).unwrap();
    assert_eq!(held.header().token_count(), 1);
    drop(held);

    drop(process.close_token(token));
    m.settle();
    assert!(weak.upgrade(Holder::Kernel("test")).is_none());
    assert!(process.close_token(token).is_none());
}

#[test]
fn weak_handles_do_not_keep_objects_alive() {
    let m = Machine::new(1);
    let notify = m.kernel.create_notify();
    let proxy = m.kernel.create_notify_proxy(&notify);
    assert!(proxy.target(Holder::Kernel("test")).is_some());
    drop(notify);
    assert!(proxy.target(Holder::Kernel("test")).is_none());
}

#[test]
fn external_destructor_runs_once_from_cleanup() {
    let m = Machine::new(2);
    let seen = Arc::new(AtomicU64::new(0));
    let hook = Arc::clone(&seen);
    let external = m.kernel.create_external(External::new(
        7,
        Some(Box::new(move |id: kernel_core::ObjectId| {
            hook.fetch_add(id.0, Ordering::SeqCst);
        })),
        None,
    ));
    let id = external.object_id();
    assert_eq!(external.tag(), 7);

    let second = external.clone_as(Holder::Kernel("second"));
    drop(external);
    m.settle();
    assert_eq!(seen.load(Ordering::SeqCst), 0);

    drop(second);
    m.settle();
    assert_eq!(seen.load(Ordering::SeqCst), id.0);
}

#[test]
fn dropped_semaphore_user_returns_its_counts() {
    let m = Machine::new(1);
    let (process, thread) = m.process_with_thread("sem");
    let packed = m
        .call(&thread, kernel_core::Syscall::CreateSemaphore { initial: 2, max: 2 })
        .unwrap();
    let user = (packed >> 32) as u32;
    let sem = packed as u32;

    let tokens = kernel_core::syscall::WaitTokens::new(&[user]).unwrap();
    for _ in 0..2 {
        let r = m.call(
            &thread,
            kernel_core::Syscall::Wait {
                tokens,
                mode: kernel_core::WaitMode::Any,
                timeout: None,
            },
        );
        assert_eq!(r, Ok(0));
    }
    let semaphore = process
        .lookup::<kernel_core::sync::Semaphore>(sem, Holder::Kernel("test"))
        .unwrap();
    assert_eq!(semaphore.count(), 0);

    assert_eq!(m.call(&thread, kernel_core::Syscall::CloseToken { token: user }), Ok(0));
    m.settle();
    assert_eq!(semaphore.count(), 2);
}

#[test]
fn handles_keep_thread_and_process_ids_reachable() {
    let m = Machine::new(1);
    let (process, thread) = m.process_with_thread("ids");
    let tid: ThreadId = thread.id();
    let pid: ProcessId = process.id();
    let oid: ObjectId = thread.object_id();

    assert_eq!(m.kernel.active_thread(CoreId(0)), Some(tid));
    assert_eq!(m.kernel.thread(tid).map(|t| t.object_id()), Some(oid));
    assert_eq!(thread.process().id(), pid);
    assert_ne!(process.object_id(), oid);
}

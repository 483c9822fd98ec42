use kernel_core::{ThreadEvent as E, ThreadState as S};
use std::collections::{BTreeSet, VecDeque};

const EXPECTED: &[(S, E, S)] = &[
    (S::Init, E::Prepared, S::Created),
    (S::Init, E::SkipPrep, S::InitNoPrep),
    (S::InitNoPrep, E::Prepared, S::Created),
    (S::Created, E::Start, S::InScheduler),
    (S::Created, E::Exit, S::Exited),
    (S::InScheduler, E::Place, S::Migrating),
    (S::InScheduler, E::Block, S::Waiting),
    (S::InScheduler, E::BeginIo, S::InIo),
    (S::InScheduler, E::DeferResume, S::InSchedulerResumeDeferred),
    (S::InScheduler, E::Crash, S::DebugCrashed),
    (S::InScheduler, E::Exit, S::Exited),
    (S::InSchedulerResumeDeferred, E::DeferElapsed, S::InScheduler),
    (S::InSchedulerResumeDeferred, E::Exit, S::Exited),
    (S::Migrating, E::Arrive, S::OnCpuLists),
    (S::OnCpuLists, E::Resume, S::Running),
    (S::OnCpuLists, E::Abort, S::InScheduler),
    (S::OnCpuLists, E::Requeue, S::InScheduler),
    (S::Running, E::Trap, S::InScheduler),
    (S::Running, E::Preempt, S::OnCpuLists),
    (S::Running, E::Abort, S::InScheduler),
    (S::Waiting, E::Wake, S::InScheduler),
    (S::Waiting, E::Exit, S::Exited),
    (S::InIo, E::Complete, S::InScheduler),
    (S::InIo, E::Exit, S::Exited),
    (S::DebugCrashed, E::Release, S::InScheduler),
    (S::DebugCrashed, E::Exit, S::Exited),
];

fn order(s: S) -> usize {
    S::ALL.iter().position(|&x| x == s).unwrap()
}

#[test]
fn transition_table_is_exactly_the_listed_edges() {
    for state in S::ALL {
        for event in E::ALL {
            let expected = EXPECTED
                .iter()
                .find(|(s, e, _)| *s == state && *e == event)
                .map(|&(_, _, next)| next);
            match (state.on(event), expected) {
                (Ok(next), Some(want)) => assert_eq!(next, want, "{state:?} --{event:?}-->"),
                (Err(e), None) => {
                    assert_eq!((e.state, e.event), (state, event));
                }
                (got, want) => panic!("{state:?} --{event:?}--> got {got:?}, want {want:?}"),
            }
        }
    }
}

#[test]
fn exited_is_terminal() {
    for event in E::ALL {
        assert!(S::Exited.on(event).is_err(), "Exited accepts {event:?}");
    }
}

#[test]
fn every_state_is_reachable_and_can_exit() {
    let mut seen = BTreeSet::from([order(S::Init)]);
    let mut queue = VecDeque::from([S::Init]);
    while let Some(state) = queue.pop_front() {
        for event in E::ALL {
            if let Ok(next) = state.on(event) {
                if seen.insert(order(next)) {
                    queue.push_back(next);
                }
            }
        }
    }
    assert_eq!(seen.len(), S::ALL.len());

    // Running and listed threads leave through the scheduler.
    for state in [S::Running, S::OnCpuLists] {
        let back = state.on(E::Abort).unwrap();
        assert_eq!(back.on(E::Exit), Ok(S::Exited));
    }
}

#[test]
fn parked_states_wait_for_the_scheduler() {
    let parked: Vec<_> = S::ALL.into_iter().filter(|s| s.is_parked()).collect();
    assert_eq!(
        parked,
        [S::InSchedulerResumeDeferred, S::Waiting, S::InIo, S::DebugCrashed]
    );
    for state in parked {
        assert!(state.on(E::Resume).is_err());
        assert!(state.on(E::Place).is_err());
    }
}

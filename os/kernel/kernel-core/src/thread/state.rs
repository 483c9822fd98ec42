use crate::error::TransitionError;

/// Lifecycle of a thread.
///
/// Only the Locked Scheduler and the monitor of the core owning the thread
/// apply events; every other combination is an invariant violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadState {
    /// Allocated, stack not yet prepared.
    Init,
    /// Allocated for a context that needs no preparation.
    InitNoPrep,
    /// Ready to be handed to the scheduler.
    Created,
    /// Owned by the Locked Scheduler (request queue or dispatch).
    InScheduler,
    /// Resume delayed by a scheduler timer.
    InSchedulerResumeDeferred,
    /// On some core's migrating list.
    Migrating,
    /// On a run, ran or migrated list of its core.
    OnCpuLists,
    Running,
    /// Parked on a macro-wait.
    Waiting,
    /// Parked on an external I/O request.
    InIo,
    /// Crashed under a debugger; held for inspection.
    DebugCrashed,
    Exited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadEvent {
    Prepared,
    SkipPrep,
    Start,
    /// Placement chose a core.
    Place,
    /// The target core drained its migrating list.
    Arrive,
    Resume,
    /// Syscall or exception leaves the core for the scheduler.
    Trap,
    /// Quantum ran out or the thread yielded.
    Preempt,
    /// The core found the abort flag set.
    Abort,
    /// The core cannot run the thread anymore (affinity changed).
    Requeue,
    Block,
    Wake,
    BeginIo,
    Complete,
    DeferResume,
    DeferElapsed,
    Crash,
    Release,
    Exit,
}

impl ThreadState {
    pub const ALL: [Self; 12] = [
        Self::Init,
        Self::InitNoPrep,
        Self::Created,
        Self::InScheduler,
        Self::InSchedulerResumeDeferred,
        Self::Migrating,
        Self::OnCpuLists,
        Self::Running,
        Self::Waiting,
        Self::InIo,
        Self::DebugCrashed,
        Self::Exited,
    ];

    /// Applies `event`.
    ///
    /// # Errors
    /// The pair has no transition.
    pub const fn on(self, event: ThreadEvent) -> Result<Self, TransitionError> {
        use ThreadEvent as E;
        use ThreadState as S;

        let next = match (self, event) {
            (S::Init | S::InitNoPrep, E::Prepared) => S::Created,
            (S::Init, E::SkipPrep) => S::InitNoPrep,
            (S::Created, E::Start)
            | (S::Running | S::OnCpuLists, E::Abort)
            | (S::Running, E::Trap)
            | (S::OnCpuLists, E::Requeue)
            | (S::Waiting, E::Wake)
            | (S::InIo, E::Complete)
            | (S::InSchedulerResumeDeferred, E::DeferElapsed)
            | (S::DebugCrashed, E::Release) => S::InScheduler,
            (S::InScheduler, E::Place) => S::Migrating,
            (S::Migrating, E::Arrive) | (S::Running, E::Preempt) => S::OnCpuLists,
            (S::OnCpuLists, E::Resume) => S::Running,
            (S::InScheduler, E::Block) => S::Waiting,
            (S::InScheduler, E::BeginIo) => S::InIo,
            (S::InScheduler, E::DeferResume) => S::InSchedulerResumeDeferred,
            (S::InScheduler, E::Crash) => S::DebugCrashed,
            (
                S::Created
                | S::InScheduler
                | S::InSchedulerResumeDeferred
                | S::Waiting
                | S::InIo
                | S::DebugCrashed,
                E::Exit,
            ) => S::Exited,
            (state, event) => return Err(TransitionError { state, event }),
        };
        Ok(next)
    }

    /// Parked states, owned by the scheduler's parked map.
    #[must_use]
    pub const fn is_parked(self) -> bool {
        matches!(
            self,
            Self::Waiting | Self::InIo | Self::InSchedulerResumeDeferred | Self::DebugCrashed
        )
    }
}

impl ThreadEvent {
    pub const ALL: [Self; 19] = [
        Self::Prepared,
        Self::SkipPrep,
        Self::Start,
        Self::Place,
        Self::Arrive,
        Self::Resume,
        Self::Trap,
        Self::Preempt,
        Self::Abort,
        Self::Requeue,
        Self::Block,
        Self::Wake,
        Self::BeginIo,
        Self::Complete,
        Self::DeferResume,
        Self::DeferElapsed,
        Self::Crash,
        Self::Release,
        Self::Exit,
    ];
}

use crate::object::ObjectId;
use crate::thread::ThreadId;
use alloc::boxed::Box;
use core::fmt;
use kernel_sync::SpinLock;

/// Cleanup hook of an object owned by a subsystem outside the kernel core.
pub trait ExternalDestructor: Send {
    fn destroy(self: Box<Self>, id: ObjectId);
}

impl<F: FnOnce(ObjectId) + Send> ExternalDestructor for F {
    fn destroy(self: Box<Self>, id: ObjectId) {
        (*self)(id);
    }
}

/// Outcome of handing an I/O request to an external subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoSubmit {
    /// Finished synchronously with this value.
    Complete(u64),
    /// The thread parks in `InIo` until `Kernel::complete_io`.
    Pending,
}

pub trait IoHandler: Send + Sync {
    fn submit(&self, thread: ThreadId, request: u64) -> IoSubmit;
}

/// Object whose cleanup belongs to another subsystem (file I/O, drivers).
pub struct External {
    tag: u32,
    destructor: SpinLock<Option<Box<dyn ExternalDestructor>>>,
    handler: Option<Box<dyn IoHandler>>,
}

impl External {
    #[must_use]
    pub fn new(
        tag: u32,
        destructor: Option<Box<dyn ExternalDestructor>>,
        handler: Option<Box<dyn IoHandler>>,
    ) -> Self {
        Self {
            tag,
            destructor: SpinLock::new(destructor),
            handler,
        }
    }

    /// Subsystem-defined type tag.
    #[must_use]
    pub const fn tag(&self) -> u32 {
        self.tag
    }

    #[must_use]
    pub fn handler(&self) -> Option<&dyn IoHandler> {
        self.handler.as_deref()
    }

    pub(crate) fn destroy(&self, id: ObjectId) {
        let destructor = self.destructor.lock().take();
        if let Some(d) = destructor {
            d.destroy(id);
        }
    }
}

impl fmt::Debug for External {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("External")
            .field("tag", &self.tag)
            .field("has_handler", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}

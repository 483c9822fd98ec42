use alloc::boxed::Box;
use core::{
    fmt,
    ptr,
    sync::atomic::{AtomicPtr, Ordering},
};

struct Node<T> {
    value: T,
    next: *mut Node<T>,
}

/// Lock-free multi-producer list with a single draining owner.
///
/// Any core may [`push`](Self::push); only the owner calls
/// [`take_all`](Self::take_all), which detaches the whole list with a single
/// swap and hands it back in push (FIFO) order. Because nodes are never
/// popped one at a time the classic ABA hazard of a Treiber stack does not
/// arise.
pub struct PushList<T> {
    head: AtomicPtr<Node<T>>,
}

impl<T> Default for PushList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PushList<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Appends `value`. Returns `true` if the list was empty before.
    pub fn push(&self, value: T) -> bool {
        let node = Box::into_raw(Box::new(Node {
            value,
            next: ptr::null_mut(),
        }));

        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            // SAFETY: node is unpublished until the CAS succeeds.
            unsafe { (*node).next = head };
            match self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return head.is_null(),
                Err(actual) => head = actual,
            }
        }
    }

    /// Detaches every pushed value, oldest first.
    pub fn take_all(&self) -> PushListDrain<T> {
        let mut cur = self.head.swap(ptr::null_mut(), Ordering::Acquire);

        // Reverse the LIFO chain into push order.
        let mut fifo: *mut Node<T> = ptr::null_mut();
        while !cur.is_null() {
            // SAFETY: the swap made us the sole owner of the chain.
            let next = unsafe { (*cur).next };
            unsafe { (*cur).next = fifo };
            fifo = cur;
            cur = next;
        }

        PushListDrain { next: fifo }
    }

    /// Whether nothing is pending. Racy by nature; a hint for idle decisions.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }
}

impl<T> Drop for PushList<T> {
    fn drop(&mut self) {
        drop(self.take_all());
    }
}

impl<T> fmt::Debug for PushList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushList")
            .field("empty", &self.is_empty())
            .finish()
    }
}

// Safety: values are moved in by producers and out by the owner.
unsafe impl<T: Send> Sync for PushList<T> {}
unsafe impl<T: Send> Send for PushList<T> {}

/// Owning iterator over a detached [`PushList`] chain.
pub struct PushListDrain<T> {
    next: *mut Node<T>,
}

impl<T> Iterator for PushListDrain<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.next.is_null() {
            return None;
        }
        // SAFETY: every node in the chain came from Box::into_raw and is owned here.
        let node = unsafe { Box::from_raw(self.next) };
        self.next = node.next;
        Some(node.value)
    }
}

impl<T> Drop for PushListDrain<T> {
    fn drop(&mut self) {
        for _ in self.by_ref() {}
    }
}

// Safety: the drain exclusively owns its nodes.
unsafe impl<T: Send> Send for PushListDrain<T> {}

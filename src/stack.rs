//! Intrusive, wait-free-under-contention LIFO stack of ready tasks.
//!
//! A classic Treiber stack. Nodes are embedded in [`crate::task::Task`]
//! and owned by the task graph, not by the stack; the stack only ever
//! holds a non-owning pointer. Pushing the same node twice while it is
//! already linked is undefined — the graph's scheduling discipline
//! guarantees a task is only re-pushed after its previous `execute` call
//! has returned and removed it from every list.

use std::sync::atomic::{AtomicPtr, Ordering};

use crate::task::Task;

/// Intrusive link embedded in every task.
pub(crate) struct Link {
    next: AtomicPtr<Task>,
}

impl Link {
    pub(crate) fn new() -> Self {
        Self {
            next: AtomicPtr::new(std::ptr::null_mut()),
        }
    }
}

/// Multi-producer, multi-consumer LIFO stack of task pointers. Never
/// allocates; `push`/`pop` are CAS-loops over a single atomic head.
pub(crate) struct ReadyStack {
    head: AtomicPtr<Task>,
}

impl ReadyStack {
    pub(crate) fn new() -> Self {
        Self {
            head: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    /// Push `task` onto the stack. Returns `true` if the stack was empty
    /// immediately before this push landed — callers use that to decide
    /// whether parked workers need waking.
    pub(crate) fn push(&self, task: *const Task) -> bool {
        let task = task as *mut Task;
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            // SAFETY: `task` is kept alive by the task graph for at least
            // as long as the runner that owns this stack; it is not
            // concurrently linked into any other list (see module docs).
            unsafe { (*task).link().next.store(head, Ordering::Relaxed) };
            match self
                .head
                .compare_exchange_weak(head, task, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return head.is_null(),
                Err(actual) => head = actual,
            }
        }
    }

    /// Pop the most recently pushed task, or `None` if the stack is empty.
    pub(crate) fn pop(&self) -> Option<*const Task> {
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            if head.is_null() {
                return None;
            }
            // SAFETY: `head` was published by a `push` with `Release`
            // ordering; this `Acquire` load synchronizes with it.
            let next = unsafe { (*head).link().next.load(Ordering::Relaxed) };
            match self
                .head
                .compare_exchange_weak(head, next, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => return Some(head as *const Task),
                Err(actual) => head = actual,
            }
        }
    }
}

// SAFETY: the stack only ever stores raw pointers to tasks that are kept
// alive elsewhere (the task graph); it performs no aliasing beyond the
// atomic pointer itself.
unsafe impl Send for ReadyStack {}
unsafe impl Sync for ReadyStack {}

pub(crate) use link_accessor::LinkAccessor;

mod link_accessor {
    use super::Link;

    /// Lets [`super::ReadyStack`] reach a task's embedded [`Link`] without
    /// exposing it as part of `Task`'s public surface.
    pub(crate) trait LinkAccessor {
        fn link(&self) -> &Link;
    }
}

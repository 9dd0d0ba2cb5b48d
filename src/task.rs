//! A single executable node in the per-period dependency graph.
//!
//! Tasks are immutable after the graph is assembled except for two things
//! that change every period: the `remaining`-predecessors counter, and
//! whatever the callback writes into the task's own artifact. Both are
//! reset or overwritten in place so the same graph instance can be
//! replayed forever.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use num_complex::Complex32;

use crate::stack::{Link, LinkAccessor};

/// The typed result a task produces. The variant is fixed at task
/// construction; a task's callback and its dependents agree on it by
/// construction, not by a runtime tag check.
pub enum Artifact {
    /// A non-owning view over `len` complex samples living inside an FFT
    /// wrapper's own output buffer.
    SpectrumSpan { ptr: *mut Complex32, len: usize },
    /// An owned accumulator, used by fan and tree-reduction tasks.
    SpectrumVec(Vec<Complex32>),
    /// A non-owning view over the second half of an inverse FFT's
    /// time-domain output (the overlap-save result).
    RealSpan { ptr: *const f32, len: usize },
    /// No payload. Used by synthetic root and sink tasks.
    Unit,
    /// Test-only tag used to verify the lock-free stack and task runner
    /// preserve identity under concurrent scheduling (see `stack.rs` and
    /// `runner.rs` tests, and end-to-end scenario S5/S6).
    #[cfg(test)]
    Tag(usize),
}

impl Artifact {
    #[cfg(test)]
    pub(crate) fn tag(value: usize) -> Self {
        Artifact::Tag(value)
    }

    #[cfg(test)]
    pub(crate) fn as_tag(&self) -> usize {
        match self {
            Artifact::Tag(v) => *v,
            _ => panic!("artifact is not a Tag"),
        }
    }

    /// View this artifact as a complex spectrum.
    ///
    /// # Panics
    /// Panics if this artifact is not `SpectrumSpan` or `SpectrumVec`.
    /// Such a mismatch is a programming error: artifact shape is fixed
    /// when the task graph is built.
    pub fn as_spectrum(&self) -> &[Complex32] {
        match self {
            // SAFETY: `ptr` points at `len` live complex samples inside
            // the owning FFT wrapper for as long as the task graph
            // exists; readers only reach this after the writer's task
            // has completed, per the graph's happens-before ordering.
            Artifact::SpectrumSpan { ptr, len } => unsafe { std::slice::from_raw_parts(*ptr, *len) },
            Artifact::SpectrumVec(v) => v.as_slice(),
            _ => panic!("artifact is not a spectrum"),
        }
    }

    /// Mutable view, for fan/tree-reduction tasks writing their own
    /// accumulator.
    ///
    /// # Panics
    /// Panics if this artifact is not `SpectrumVec`.
    pub fn as_spectrum_mut(&mut self) -> &mut [Complex32] {
        match self {
            Artifact::SpectrumVec(v) => v.as_mut_slice(),
            _ => panic!("artifact is not an owned spectrum"),
        }
    }

    /// View this artifact as real time-domain samples.
    ///
    /// # Panics
    /// Panics if this artifact is not `RealSpan`.
    pub fn as_real(&self) -> &[f32] {
        match self {
            // SAFETY: see `as_spectrum`; same happens-before argument
            // applies to the inverse-FFT output buffer.
            Artifact::RealSpan { ptr, len } => unsafe { std::slice::from_raw_parts(*ptr, *len) },
            _ => panic!("artifact is not a real span"),
        }
    }
}

/// One node of the per-period task graph.
///
/// Predecessors are held with shared ownership (a task keeps its upstream
/// dependencies alive so it can read their artifacts); successors are
/// non-owning raw pointers used only for scheduling, since the graph's
/// owner (the crossover) keeps every task in the graph alive regardless.
pub struct Task {
    link: Link,
    callback: Box<dyn Fn(&Task) + Send + Sync>,
    predecessors: Vec<Arc<Task>>,
    /// Frozen after graph assembly; mutated only while single-threaded
    /// construction is still in progress (see `create`).
    successors: UnsafeCell<Vec<*const Task>>,
    initial_remaining: u32,
    remaining: AtomicU32,
    artifact: UnsafeCell<Artifact>,
}

// SAFETY: `successors` and `artifact` are only mutated either (a) during
// single-threaded graph construction, before any task has executed, or
// (b) by the task's own `execute` call on whichever worker thread runs
// it, which the dependency graph guarantees happens at most once at a
// time and is ordered with respect to readers via the `remaining`
// decrement / ready-stack push-pop acquire-release chain.
unsafe impl Send for Task {}
unsafe impl Sync for Task {}

impl LinkAccessor for Task {
    fn link(&self) -> &Link {
        &self.link
    }
}

impl Task {
    /// Create a new task, wiring it as a successor of each predecessor.
    pub fn create(
        callback: impl Fn(&Task) + Send + Sync + 'static,
        predecessors: Vec<Arc<Task>>,
        artifact: Artifact,
    ) -> Arc<Task> {
        let initial_remaining = predecessors.len() as u32;
        let task = Arc::new(Task {
            link: Link::new(),
            callback: Box::new(callback),
            predecessors,
            successors: UnsafeCell::new(Vec::new()),
            initial_remaining,
            remaining: AtomicU32::new(initial_remaining),
            artifact: UnsafeCell::new(artifact),
        });
        for pred in &task.predecessors {
            // SAFETY: graph assembly is single-threaded and no task has
            // started executing yet, so no concurrent reader of
            // `successors` can exist at this point.
            unsafe { (*pred.successors.get()).push(Arc::as_ptr(&task)) };
        }
        task
    }

    /// Run this task's callback, then notify successors whose last
    /// outstanding predecessor was this one. `on_ready` is called with
    /// each such successor as soon as it becomes schedulable.
    ///
    /// Not reentrant: a given task instance must not have two `execute`
    /// calls in flight at once. The dependency graph guarantees this.
    pub(crate) fn execute(&self, mut on_ready: impl FnMut(*const Task)) {
        (self.callback)(self);

        // SAFETY: frozen after graph assembly (see field docs).
        let successors = unsafe { &*self.successors.get() };
        for &succ in successors {
            // SAFETY: `succ` is kept alive by the task graph for at least
            // as long as this task.
            let succ_ref = unsafe { &*succ };
            if succ_ref.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                on_ready(succ);
            }
        }

        // Replayable: restore the counter so the next period's run can
        // decrement it down to zero again.
        self.remaining.store(self.initial_remaining, Ordering::Release);
    }

    /// This task's predecessors, for callbacks that read upstream
    /// artifacts.
    pub fn dependencies(&self) -> &[Arc<Task>] {
        &self.predecessors
    }

    /// True iff this task has no successors — the unique "final" task a
    /// graph is allowed to have.
    pub fn is_final(&self) -> bool {
        // SAFETY: read-only access to a list frozen after construction;
        // by the time anyone calls `is_final` (graph validation, or a
        // worker deciding how to dispatch a just-readied successor) graph
        // assembly has completed.
        unsafe { (*self.successors.get()).is_empty() }
    }

    /// This task's artifact, read-only.
    pub fn artifact(&self) -> &Artifact {
        // SAFETY: see struct docs; called only after the writer's
        // `execute` has completed and the happens-before chain to this
        // reader has been established.
        unsafe { &*self.artifact.get() }
    }

    /// This task's artifact, mutable. Intended for a task's own callback
    /// to write its result; see struct docs for why this is sound despite
    /// taking only `&self`.
    pub fn artifact_mut(&self) -> &mut Artifact {
        // SAFETY: see struct docs.
        unsafe { &mut *self.artifact.get() }
    }

    /// Predecessor count at construction; used to validate the counter is
    /// restored correctly between periods (see runner tests).
    #[cfg(test)]
    pub(crate) fn initial_remaining(&self) -> u32 {
        self.initial_remaining
    }

    #[cfg(test)]
    pub(crate) fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::Acquire)
    }
}

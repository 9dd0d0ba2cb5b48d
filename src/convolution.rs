//! Partitioned overlap-save FIR convolution: one filter partition's worth
//! of work per task, wired into a dependency graph that a [`crate::runner`]
//! replays once per audio period.
//!
//! Mirrors the reference design's `Convolution`/`getInputTask`/
//! `getOutputTasks` split: an input stage turns a period's new samples
//! into a frequency-domain block (with the overlap-save history baked
//! in), and an output stage multiplies that block and every delayed
//! partition against the matching filter block, reduces the partial
//! products, and inverse-transforms the result.

use std::cell::{Cell, UnsafeCell};
use std::collections::VecDeque;
use std::sync::Arc;

use num_complex::Complex32;
use realfft::RealFftPlanner;

use crate::align::AlignedBuffer;
use crate::error::CrossoverError;
use crate::fft::{ForwardFft, InverseFft};
use crate::simd;
use crate::task::{Artifact, Task};

/// Default fan-out width used when combining filter partitions, unless a
/// caller overrides it. Matches the reference design's `combineBlocks`
/// default of 4.
pub const DEFAULT_FAN_WIDTH: usize = 4;

/// Forward-FFT stage for one input channel: folds the overlap-save
/// history into the FFT input block, then transforms it.
///
/// `forward` holds a `2 * input_block_size` time-domain buffer; the host
/// writes new samples into its second half (see [`Self::write_span`])
/// before each period's [`Self::run`].
pub struct InputStage {
    forward: UnsafeCell<ForwardFft>,
    overlap: UnsafeCell<AlignedBuffer<f32>>,
}

// SAFETY: `forward` and `overlap` are mutated only by this stage's own
// task callback, which the task graph guarantees runs on one thread at a
// time, with a happens-before edge to anything reading the resulting
// spectrum artifact afterward.
unsafe impl Send for InputStage {}
unsafe impl Sync for InputStage {}

impl InputStage {
    pub fn new(planner: &mut RealFftPlanner<f32>, input_block_size: usize) -> Self {
        let fft_size = input_block_size * 2;
        Self {
            forward: UnsafeCell::new(ForwardFft::new(planner, fft_size)),
            overlap: UnsafeCell::new(AlignedBuffer::zeroed(input_block_size)),
        }
    }

    /// Pointer/length of the span the host writes new audio samples into
    /// before each period. Valid for the lifetime of this stage.
    pub fn write_span(&self) -> (*mut f32, usize) {
        // SAFETY: exclusive access limited to the duration of this call;
        // no task is running concurrently with host writes by contract
        // (see `FirMultiChannelCrossover`).
        let forward = unsafe { &mut *self.forward.get() };
        let full = forward.input_mut();
        let half = full.len() / 2;
        (full[half..].as_mut_ptr(), half)
    }

    /// Fold the overlap history into the FFT input and run the forward
    /// transform. The host must have written this period's new samples
    /// into `write_span()` before calling this.
    fn run(&self) {
        // SAFETY: see struct docs; this stage's own task callback is the
        // sole writer/reader, serialized by the task graph.
        let forward = unsafe { &mut *self.forward.get() };
        let overlap = unsafe { &mut *self.overlap.get() };
        let full = forward.input_mut();
        let half = full.len() / 2;
        let (first_half, second_half) = full.split_at_mut(half);
        first_half.copy_from_slice(overlap);
        overlap.copy_from_slice(second_half);
        forward.run();
    }

    fn output_span(&self) -> (*mut Complex32, usize) {
        // SAFETY: see struct docs.
        let forward = unsafe { &*self.forward.get() };
        forward.output_span()
    }
}

/// Build the per-channel input task: folds overlap-save history into the
/// FFT input and transforms it, publishing the spectrum as a
/// [`Artifact::SpectrumSpan`]. Returns the task plus the raw span the
/// host writes new samples into each period.
pub fn build_input_task(stage: Arc<InputStage>) -> (Arc<Task>, *mut f32, usize) {
    let (write_ptr, write_len) = stage.write_span();
    let (out_ptr, out_len) = stage.output_span();
    let task_stage = stage;
    let task = Task::create(
        move |_| task_stage.run(),
        vec![],
        Artifact::SpectrumSpan {
            ptr: out_ptr,
            len: out_len,
        },
    );
    (task, write_ptr, write_len)
}

/// One filter's partitioned, frequency-domain representation, plus its
/// circular delay line of past input blocks.
///
/// `H` (the filter partitions) never changes after construction. The
/// delay line and the scratch inverse-FFT buffer are mutated through
/// shared references; see field docs for why that is sound.
pub struct Convolution {
    sub_filter_size: usize,
    block_size: usize,
    num_blocks: usize,
    h: AlignedBuffer<Complex32>,
    /// Mutated only by `shift`, which the output task graph always runs
    /// after every task reading the slot it is about to overwrite.
    delay_line: AlignedBuffer<Complex32>,
    first_block: Cell<usize>,
    /// Mutated only by `combine` (write) and the result task (read),
    /// which the graph always runs in that order.
    inverse_fft: UnsafeCell<InverseFft>,
}

// SAFETY: see field docs; all shared mutation is ordered by the task
// graph this type is always used through.
unsafe impl Send for Convolution {}
unsafe impl Sync for Convolution {}

impl Convolution {
    /// Build the partitioned representation of impulse response `h`,
    /// partitioned into blocks of `input_block_size` taps (zero-padded to
    /// a whole number of partitions).
    pub fn new(
        planner: &mut RealFftPlanner<f32>,
        h: &[f32],
        input_block_size: usize,
    ) -> Result<Self, CrossoverError> {
        if input_block_size == 0 {
            return Err(CrossoverError::ConfigurationInvalid(
                "input block size must be nonzero".into(),
            ));
        }
        if h.is_empty() {
            return Err(CrossoverError::ConfigurationInvalid(
                "filter must have at least one tap".into(),
            ));
        }

        let sub_filter_size = input_block_size;
        let fft_size = input_block_size + sub_filter_size;
        let block_size = fft_size / 2 + 1;
        let num_blocks = (h.len() + sub_filter_size - 1) / sub_filter_size;

        let mut h_blocks = AlignedBuffer::<Complex32>::zeroed(block_size * num_blocks);
        let delay_line = AlignedBuffer::<Complex32>::zeroed(block_size * num_blocks);

        let mut fwd = ForwardFft::new(planner, fft_size);
        for block in 0..num_blocks {
            {
                let input = fwd.input_mut();
                for sample in input.iter_mut() {
                    *sample = 0.0;
                }
                for j in 0..sub_filter_size {
                    let src_index = block * sub_filter_size + j;
                    if src_index < h.len() {
                        input[j] = h[src_index] / fft_size as f32;
                    }
                }
            }
            fwd.run();
            h_blocks[block * block_size..(block + 1) * block_size].copy_from_slice(fwd.output());
        }

        let inverse_fft = InverseFft::new(planner, fft_size);

        Ok(Self {
            sub_filter_size,
            block_size,
            num_blocks,
            h: h_blocks,
            delay_line,
            first_block: Cell::new(0),
            inverse_fft: UnsafeCell::new(inverse_fft),
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    pub fn sub_filter_size(&self) -> usize {
        self.sub_filter_size
    }

    fn h_block(&self, index: usize) -> &[Complex32] {
        &self.h[index * self.block_size..(index + 1) * self.block_size]
    }

    fn physical_index(&self, logical: usize) -> usize {
        (logical + self.num_blocks - self.first_block.get()) % self.num_blocks
    }

    fn data_block(&self, logical: usize) -> &[Complex32] {
        let phys = self.physical_index(logical);
        &self.delay_line[phys * self.block_size..(phys + 1) * self.block_size]
    }

    /// Multiply-accumulate filter partitions `[start, min(num_blocks,
    /// start + combine))` against their matching delay-line blocks into
    /// `result`. One fan task's unit of work.
    pub fn multiply_add_range(&self, start: usize, combine: usize, result: &mut [Complex32]) {
        simd::mul(self.h_block(start), self.data_block(start), result);
        let end = (start + combine).min(self.num_blocks);
        for i in (start + 1)..end {
            simd::mul_add(self.h_block(i), self.data_block(i), result);
        }
    }

    /// Reduce two or more partial sums into `result`. One tree-reduction
    /// task's unit of work.
    pub fn sum_blocks(result: &mut [Complex32], operands: &[&[Complex32]]) {
        simd::add(operands[0], operands[1], result);
        for operand in &operands[2..] {
            simd::add_into(operand, result);
        }
    }

    /// Push `new_block` in as the newest (logical index 0) delay-line
    /// block, evicting the oldest.
    ///
    /// # Safety contract
    /// Callers must ensure every task that reads the physical slot this
    /// overwrites has already completed this period — the output task
    /// graph always schedules `shift` after every fan task for exactly
    /// this reason.
    pub fn shift(&self, new_block: &[Complex32]) {
        assert_eq!(new_block.len(), self.block_size);
        let first = self.first_block.get();
        let phys = (self.num_blocks - first) % self.num_blocks;
        let dst_ptr = self.delay_line.shared_mut_ptr();
        // SAFETY: see doc comment above; no concurrent reader of this
        // slot remains by the time `shift` runs.
        let dst = unsafe {
            std::slice::from_raw_parts_mut(dst_ptr.add(phys * self.block_size), self.block_size)
        };
        dst.copy_from_slice(new_block);
        self.first_block.set((first + 1) % self.num_blocks);
    }

    /// Combine the newest input spectrum's own contribution (`H[0] *
    /// input_spectrum`) with the reduced partial sum from the remaining
    /// partitions, writing the result directly into the inverse FFT's
    /// input buffer.
    pub fn combine(&self, input_spectrum: &[Complex32], partial_sum: &[Complex32]) {
        // SAFETY: `combine` and the result task's `run_inverse` are the
        // only touches of `inverse_fft` this period, and the result task
        // always depends on `combine`.
        let inverse = unsafe { &mut *self.inverse_fft.get() };
        let dst = inverse.input_mut();
        simd::mul(self.h_block(0), input_spectrum, dst);
        simd::add_into(partial_sum, dst);
    }

    /// As [`Self::combine`], for the `num_blocks == 1` edge case where
    /// there are no older partitions to add in.
    pub fn combine_single(&self, input_spectrum: &[Complex32]) {
        // SAFETY: see `combine`.
        let inverse = unsafe { &mut *self.inverse_fft.get() };
        let dst = inverse.input_mut();
        simd::mul(self.h_block(0), input_spectrum, dst);
    }

    pub fn run_inverse(&self) {
        // SAFETY: see `combine`.
        let inverse = unsafe { &mut *self.inverse_fft.get() };
        inverse.run();
    }

    pub fn inverse_tail_span(&self) -> (*const f32, usize) {
        // SAFETY: see `combine`.
        let inverse = unsafe { &*self.inverse_fft.get() };
        inverse.tail_span()
    }
}

/// Build the per-channel output task subgraph for `conv`, consuming
/// `input`'s spectrum each period. Returns `(root, result)`: `root` is a
/// synthetic no-op task fan tasks key off of (so they all become ready
/// together once their shared predecessor is satisfied), and `result` is
/// the sink whose [`Artifact::RealSpan`] is this channel's output block.
///
/// `fan_width` controls how many filter partitions each fan task (and
/// each tree-reduction task) combines; it does not change the result,
/// only how the work is split across tasks.
pub fn build_output_tasks(
    conv: Arc<Convolution>,
    input: Arc<Task>,
    fan_width: usize,
) -> (Vec<Arc<Task>>, Arc<Task>, Arc<Task>) {
    assert!(fan_width >= 1, "fan_width must be at least 1");

    let root = Task::create(|_| {}, vec![], Artifact::Unit);
    let mut created: Vec<Arc<Task>> = vec![root.clone()];

    let mut deps: Vec<Arc<Task>> = vec![input.clone()];
    let mut start = 1;
    while start < conv.num_blocks() {
        let conv_fan = conv.clone();
        let block_size = conv.block_size();
        let fan_task = Task::create(
            move |task| {
                let mut result = vec![Complex32::new(0.0, 0.0); block_size];
                conv_fan.multiply_add_range(start, fan_width, &mut result);
                *task.artifact_mut() = Artifact::SpectrumVec(result);
            },
            vec![root.clone()],
            Artifact::SpectrumVec(vec![Complex32::new(0.0, 0.0); block_size]),
        );
        created.push(fan_task.clone());
        deps.push(fan_task);
        start += fan_width;
    }

    let shift = {
        let conv_shift = conv.clone();
        let input_for_shift = input.clone();
        Task::create(
            move |_| conv_shift.shift(input_for_shift.artifact().as_spectrum()),
            deps.clone(),
            Artifact::Unit,
        )
    };
    created.push(shift.clone());

    // `num_blocks == 1` (edge case per §4.5): there are no partitions
    // beyond index 0, so `deps` holds only `input`, no fan tasks exist,
    // and the tree is empty — `combine` reduces to `H[0] * input`.
    let mut level: VecDeque<Arc<Task>> = deps[1..].iter().cloned().collect();
    while level.len() > 1 {
        let group_size = fan_width.max(2).min(level.len());
        let mut group = Vec::with_capacity(group_size);
        for _ in 0..group_size {
            group.push(level.pop_front().expect("group_size <= level.len()"));
        }
        let block_size = conv.block_size();
        let node = Task::create(
            move |task| {
                let operands: Vec<&[Complex32]> =
                    task.dependencies().iter().map(|d| d.artifact().as_spectrum()).collect();
                let mut result = vec![Complex32::new(0.0, 0.0); block_size];
                Convolution::sum_blocks(&mut result, &operands);
                *task.artifact_mut() = Artifact::SpectrumVec(result);
            },
            group,
            Artifact::SpectrumVec(vec![Complex32::new(0.0, 0.0); block_size]),
        );
        created.push(node.clone());
        level.push_back(node);
    }
    let partial_sum = level.pop_front();

    let combine = {
        let conv_combine = conv.clone();
        let combine_input = input.clone();
        match partial_sum {
            Some(partial_sum) => {
                let combine_partial = partial_sum.clone();
                Task::create(
                    move |_| {
                        conv_combine.combine(
                            combine_input.artifact().as_spectrum(),
                            combine_partial.artifact().as_spectrum(),
                        )
                    },
                    vec![input.clone(), partial_sum],
                    Artifact::Unit,
                )
            }
            None => Task::create(
                move |_| conv_combine.combine_single(combine_input.artifact().as_spectrum()),
                vec![input.clone()],
                Artifact::Unit,
            ),
        }
    };
    created.push(combine.clone());

    let result = {
        let conv_result = conv.clone();
        let (ptr, len) = conv.inverse_tail_span();
        Task::create(
            move |task| {
                conv_result.run_inverse();
                let (ptr, len) = conv_result.inverse_tail_span();
                *task.artifact_mut() = Artifact::RealSpan { ptr, len };
            },
            vec![combine, shift],
            Artifact::RealSpan { ptr, len },
        )
    };
    created.push(result.clone());

    (created, root, result)
}

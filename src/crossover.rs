//! Public entry point: a multi-channel FIR crossover driven by a pool of
//! worker threads, re-running the same task graph once per audio period.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use realfft::RealFftPlanner;

use crate::convolution::{build_input_task, build_output_tasks, Convolution, InputStage, DEFAULT_FAN_WIDTH};
use crate::error::CrossoverError;
use crate::runner::{Graph, TaskRunner};
use crate::task::Task;

/// One output band: which input channel it filters, and the FIR
/// coefficients (in natural time order) to apply.
pub struct FilterSpec {
    pub input_channel: usize,
    pub coefficients: Vec<f32>,
}

impl FilterSpec {
    pub fn new(input_channel: usize, coefficients: Vec<f32>) -> Self {
        Self {
            input_channel,
            coefficients,
        }
    }
}

/// A realtime-safe, multi-channel partitioned-convolution crossover.
///
/// Construction does all allocation and FFT planning. [`Self::update_inputs`]
/// is the only method meant to run at audio rate, and it allocates nothing:
/// every buffer used in a period was sized at construction time.
///
/// The host contract: fetch and write this period's samples into every
/// input channel's buffer (via [`Self::get_input_buffer`]), then call
/// [`Self::update_inputs`], then read each output band's buffer (via
/// [`Self::get_output_buffer`]). Calling `update_inputs` concurrently with
/// itself, or before every channel's buffer was fetched this period,
/// violates the contract; `update_inputs` reports this at the call site
/// rather than racing or reading stale data — see
/// [`CrossoverError::HostContractViolation`].
pub struct FirMultiChannelCrossover {
    runner: TaskRunner,
    graph: Graph,
    input_spans: Vec<(*mut f32, usize)>,
    output_jobs: Vec<Arc<Task>>,
    _input_stages: Vec<Arc<InputStage>>,
    _convolutions: Vec<Arc<Convolution>>,
    /// Set by `get_input_buffer`, cleared by `update_inputs`. Lets
    /// `update_inputs` catch a period where a channel was never touched,
    /// per the host contract.
    filled: Vec<AtomicBool>,
    /// Guards against two `update_inputs` calls running at once. A period
    /// that finds this already `true` is a host contract violation, not a
    /// race to paper over.
    in_flight: AtomicBool,
}

// SAFETY: `input_spans` holds raw pointers into buffers owned by
// `_input_stages`, which this struct keeps alive for its own lifetime.
// The host contract (one writer at a time, serialized with
// `update_inputs`) is what makes sharing those pointers across threads
// sound; see struct docs.
unsafe impl Send for FirMultiChannelCrossover {}
unsafe impl Sync for FirMultiChannelCrossover {}

impl FirMultiChannelCrossover {
    /// Build a crossover with `num_input_channels` input buses of
    /// `block_size` samples each, and one output band per entry in
    /// `filters`. `worker_count` worker threads are spawned and parked
    /// until the first [`Self::update_inputs`] call.
    ///
    /// Uses the default fan-out width (see [`DEFAULT_FAN_WIDTH`]); use
    /// [`Self::with_fan_width`] to override it.
    pub fn new(
        block_size: usize,
        num_input_channels: usize,
        filters: Vec<FilterSpec>,
        worker_count: usize,
    ) -> Result<Self, CrossoverError> {
        Self::with_fan_width(block_size, num_input_channels, filters, worker_count, DEFAULT_FAN_WIDTH)
    }

    /// As [`Self::new`], but with an explicit partition fan-out width.
    /// Changing `fan_width` changes only how filter partitions are
    /// grouped across tasks, never the numerical result.
    pub fn with_fan_width(
        block_size: usize,
        num_input_channels: usize,
        filters: Vec<FilterSpec>,
        worker_count: usize,
        fan_width: usize,
    ) -> Result<Self, CrossoverError> {
        if block_size == 0 {
            return Err(CrossoverError::ConfigurationInvalid(
                "block size must be nonzero".into(),
            ));
        }
        if num_input_channels == 0 {
            return Err(CrossoverError::ConfigurationInvalid(
                "at least one input channel is required".into(),
            ));
        }
        if filters.is_empty() {
            return Err(CrossoverError::ConfigurationInvalid(
                "at least one output filter is required".into(),
            ));
        }
        if fan_width == 0 {
            return Err(CrossoverError::ConfigurationInvalid(
                "fan_width must be nonzero".into(),
            ));
        }
        for filter in &filters {
            if filter.input_channel >= num_input_channels {
                return Err(CrossoverError::ConfigurationInvalid(format!(
                    "filter references input channel {} but only {num_input_channels} exist",
                    filter.input_channel
                )));
            }
        }

        log::info!(
            "building crossover: block_size={block_size} input_channels={num_input_channels} \
             output_bands={} workers={worker_count} fan_width={fan_width}",
            filters.len()
        );

        let mut planner = RealFftPlanner::<f32>::new();

        let mut input_stages = Vec::with_capacity(num_input_channels);
        let mut input_jobs = Vec::with_capacity(num_input_channels);
        let mut input_spans = Vec::with_capacity(num_input_channels);
        for _ in 0..num_input_channels {
            let stage = Arc::new(InputStage::new(&mut planner, block_size));
            let (task, ptr, len) = build_input_task(stage.clone());
            input_stages.push(stage);
            input_jobs.push(task);
            input_spans.push((ptr, len));
        }

        let mut all_tasks: Vec<Arc<Task>> = input_jobs.clone();
        let mut convolutions = Vec::with_capacity(filters.len());
        let mut output_jobs = Vec::with_capacity(filters.len());
        let mut final_deps = Vec::with_capacity(filters.len());

        for filter in filters {
            let conv = Arc::new(Convolution::new(&mut planner, &filter.coefficients, block_size)?);
            let (created, _root, result) =
                build_output_tasks(conv.clone(), input_jobs[filter.input_channel].clone(), fan_width);
            all_tasks.extend(created);
            final_deps.push(result.clone());
            output_jobs.push(result);
            convolutions.push(conv);
        }

        // Every per-channel output subgraph ends in its own sink; fold
        // them into one combined sink so the whole crossover is a single
        // graph with exactly one final task.
        let combined_sink = Task::create(|_| {}, final_deps, crate::task::Artifact::Unit);
        all_tasks.push(combined_sink);

        let graph = Graph::new(all_tasks)?;
        let runner = TaskRunner::new(worker_count)?;

        // Prime the graph once so every aligned buffer is touched before
        // the host's first real period (matches the construction-time
        // dry run the reference design performs).
        runner.run(&graph);

        let filled = (0..num_input_channels).map(|_| AtomicBool::new(false)).collect();

        Ok(Self {
            runner,
            graph,
            input_spans,
            output_jobs,
            _input_stages: input_stages,
            _convolutions: convolutions,
            filled,
            in_flight: AtomicBool::new(false),
        })
    }

    /// Raw pointer/length of the buffer the host must fill with this
    /// period's samples for `input_channel` before calling
    /// [`Self::update_inputs`]. Marks the channel filled for this period;
    /// see [`Self::update_inputs`].
    pub fn get_input_buffer(&self, input_channel: usize) -> Result<&mut [f32], CrossoverError> {
        let &(ptr, len) = self
            .input_spans
            .get(input_channel)
            .ok_or_else(|| CrossoverError::ConfigurationInvalid(format!("no input channel {input_channel}")))?;
        self.filled[input_channel].store(true, Ordering::Release);
        // SAFETY: the host contract guarantees no other access to this
        // span is in flight (no `update_inputs` call running concurrently
        // with this write, and no aliasing writers); the pointer is valid
        // for `len` elements for the lifetime of `self`.
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, len) })
    }

    /// Run one period: transform every input channel's freshly written
    /// samples, push them through every output band's partitioned
    /// convolution, and make each output band's result available via
    /// [`Self::get_output_buffer`].
    ///
    /// # Errors
    /// Returns [`CrossoverError::HostContractViolation`] if a prior call
    /// is still in flight (concurrent `update_inputs`), or if some input
    /// channel's buffer was never fetched via [`Self::get_input_buffer`]
    /// since the last period — the two ways the host contract documented
    /// on this type can be broken.
    pub fn update_inputs(&self) -> Result<(), CrossoverError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CrossoverError::HostContractViolation(
                "update_inputs called concurrently".into(),
            ));
        }

        let all_filled = self.filled.iter().all(|f| f.load(Ordering::Acquire));
        if !all_filled {
            self.in_flight.store(false, Ordering::Release);
            return Err(CrossoverError::HostContractViolation(
                "update_inputs called before every input channel's buffer was filled".into(),
            ));
        }

        self.runner.run(&self.graph);
        for f in &self.filled {
            f.store(false, Ordering::Release);
        }
        self.in_flight.store(false, Ordering::Release);
        Ok(())
    }

    /// This period's output samples for `output_band` (index into the
    /// `filters` list passed to [`Self::new`]), valid until the next
    /// [`Self::update_inputs`] call.
    pub fn get_output_buffer(&self, output_band: usize) -> Result<&[f32], CrossoverError> {
        self.output_jobs
            .get(output_band)
            .map(|task| task.artifact().as_real())
            .ok_or_else(|| CrossoverError::ConfigurationInvalid(format!("no output band {output_band}")))
    }

    pub fn block_size(&self, output_band: usize) -> Result<usize, CrossoverError> {
        self.get_output_buffer(output_band).map(|buf| buf.len())
    }
}

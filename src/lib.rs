//! Realtime, multi-channel FIR crossover built on partitioned
//! overlap-save convolution.
//!
//! The engine expresses one output channel's convolution as a dependency
//! graph of small tasks — forward FFT, per-partition complex multiplies,
//! a tree of additions, an inverse FFT — and drives that graph with a
//! fixed pool of worker threads once per audio period, replaying the same
//! graph instance forever. See [`FirMultiChannelCrossover`] for the
//! public entry point.
//!
//! Deliberately out of scope: coefficient-file parsing, interleaved PCM
//! conversion, and audio-host plugin glue. This crate consumes "a
//! periodic callback delivering `B` float samples per input bus" and
//! exposes "N float output buffers updated in lock-step"; everything
//! upstream and downstream of that is the host's job.

mod align;
mod convolution;
mod error;
mod fft;
mod runner;
mod simd;
mod stack;
mod task;

mod crossover;

pub use convolution::DEFAULT_FAN_WIDTH;
pub use crossover::{FilterSpec, FirMultiChannelCrossover};
pub use error::{CrossoverError, Result};

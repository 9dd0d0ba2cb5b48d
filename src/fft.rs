//! Thin RAII wrappers over `realfft`'s real-to-complex transforms.
//!
//! Every wrapper owns its scratch buffer and its aligned input/output
//! storage so a task's callback only ever touches its own fields, never a
//! shared planner.

use std::sync::Arc;

use num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use crate::align::AlignedBuffer;

/// Forward real-to-complex FFT of a fixed block length, with its own
/// aligned time-domain input and frequency-domain output storage.
pub struct ForwardFft {
    plan: Arc<dyn RealToComplex<f32>>,
    input: AlignedBuffer<f32>,
    output: AlignedBuffer<Complex32>,
    scratch: Vec<Complex32>,
}

impl ForwardFft {
    /// `fft_len` is the full transform length (time-domain samples in,
    /// `fft_len / 2 + 1` complex bins out).
    pub fn new(planner: &mut RealFftPlanner<f32>, fft_len: usize) -> Self {
        let plan = planner.plan_fft_forward(fft_len);
        let scratch = plan.make_scratch_vec();
        let input = AlignedBuffer::zeroed(fft_len);
        let output = AlignedBuffer::zeroed(fft_len / 2 + 1);
        Self {
            plan,
            input,
            output,
            scratch,
        }
    }

    /// Time-domain input buffer, to be filled before calling [`Self::run`].
    pub fn input_mut(&mut self) -> &mut [f32] {
        &mut self.input
    }

    /// Run the transform, overwriting the output spectrum in place.
    pub fn run(&mut self) {
        self.plan
            .process_with_scratch(&mut self.input, &mut self.output, &mut self.scratch)
            .expect("fixed-length buffers always match the plan");
    }

    /// Frequency-domain output, valid after [`Self::run`].
    pub fn output(&self) -> &[Complex32] {
        &self.output
    }

    /// Non-owning pointer/length into the output spectrum, for wiring a
    /// task's [`crate::task::Artifact::SpectrumSpan`].
    pub fn output_span(&self) -> (*mut Complex32, usize) {
        (self.output.shared_mut_ptr(), self.output.len())
    }
}

/// Inverse complex-to-real FFT. The second half of its time-domain output
/// is the overlap-save block each period contributes to the final result.
pub struct InverseFft {
    plan: Arc<dyn ComplexToReal<f32>>,
    input: AlignedBuffer<Complex32>,
    output: AlignedBuffer<f32>,
    scratch: Vec<Complex32>,
}

impl InverseFft {
    pub fn new(planner: &mut RealFftPlanner<f32>, fft_len: usize) -> Self {
        let plan = planner.plan_fft_inverse(fft_len);
        let scratch = plan.make_scratch_vec();
        let input = AlignedBuffer::zeroed(fft_len / 2 + 1);
        let output = AlignedBuffer::zeroed(fft_len);
        Self {
            plan,
            input,
            output,
            scratch,
        }
    }

    /// Frequency-domain input spectrum, to be filled before [`Self::run`].
    pub fn input_mut(&mut self) -> &mut [Complex32] {
        &mut self.input
    }

    /// Run the inverse transform. `realfft` does not normalize; callers
    /// divide by `fft_len` themselves if an exact round trip is needed.
    /// This engine only ever reads the second half of `output`
    /// (overlap-save), which does not require renormalization relative to
    /// the forward transform of the same length.
    pub fn run(&mut self) {
        self.plan
            .process_with_scratch(&mut self.input, &mut self.output, &mut self.scratch)
            .expect("fixed-length buffers always match the plan");
    }

    /// The tail half of the time-domain output: the valid (non-aliased)
    /// overlap-save block, `fft_len / 2` samples long.
    pub fn tail(&self) -> &[f32] {
        let half = self.output.len() / 2;
        &self.output[half..]
    }

    /// Non-owning pointer/length into that tail, for wiring an
    /// [`crate::task::Artifact::RealSpan`].
    pub fn tail_span(&self) -> (*const f32, usize) {
        let half = self.output.len() / 2;
        (self.output.as_ptr().wrapping_add(half), half)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_then_inverse_recovers_impulse_tail() {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft_len = 8;
        let mut fwd = ForwardFft::new(&mut planner, fft_len);
        fwd.input_mut()[0] = 1.0;
        fwd.run();

        let mut inv = InverseFft::new(&mut planner, fft_len);
        inv.input_mut().copy_from_slice(fwd.output());
        inv.run();

        // An impulse at t=0 transformed and inverted comes back scaled by
        // fft_len (realfft does not normalize); the tail half corresponds
        // to t in [fft_len/2, fft_len), which is all-zero for this input.
        for &sample in inv.tail() {
            assert!((sample).abs() < 1e-4);
        }
    }
}

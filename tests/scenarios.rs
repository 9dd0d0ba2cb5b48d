//! End-to-end scenarios: feed known input blocks through
//! `FirMultiChannelCrossover` and compare against a naive time-domain
//! convolution reference.

use fir_crossover::{FilterSpec, FirMultiChannelCrossover};

/// Naive direct-form convolution, used only as a test oracle. `history`
/// is the full input stream so far (including the current period);
/// `h` is the filter in natural time order.
fn naive_convolve(history: &[f32], h: &[f32]) -> Vec<f32> {
    let mut out = vec![0.0f32; history.len()];
    for (n, sample) in out.iter_mut().enumerate() {
        let mut acc = 0.0f32;
        for (k, &coeff) in h.iter().enumerate() {
            if k <= n {
                acc += coeff * history[n - k];
            }
        }
        *sample = acc;
    }
    out
}

struct Xorshift64(u64);

impl Xorshift64 {
    fn new(seed: u64) -> Self {
        Self(seed | 1)
    }

    fn next_u64(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn next_f32_signed(&mut self) -> f32 {
        ((self.next_u64() % 200_000) as f32 / 100_000.0) - 1.0
    }
}

fn run_periods(
    crossover: &FirMultiChannelCrossover,
    channel: usize,
    blocks: &[Vec<f32>],
) -> Vec<f32> {
    let mut out = Vec::new();
    for block in blocks {
        {
            let input = crossover.get_input_buffer(0).unwrap();
            input.copy_from_slice(block);
        }
        crossover.update_inputs().unwrap();
        out.extend_from_slice(crossover.get_output_buffer(channel).unwrap());
    }
    out
}

// S1: identity filter is a pass-through once the startup delay elapses.
#[test]
fn identity_filter_passes_through() {
    let block_size = 4;
    let h = vec![1.0f32, 0.0, 0.0, 0.0];
    let crossover = FirMultiChannelCrossover::new(block_size, 1, vec![FilterSpec::new(0, h)], 2)
        .expect("valid configuration");

    let blocks = vec![
        vec![3.0, -1.0, 0.0, 3.0],
        vec![2.0, 0.0, 1.0, 2.0],
        vec![1.0, 8.0, 8.0, 8.0],
    ];
    let got = run_periods(&crossover, 0, &blocks);

    let mut history = Vec::new();
    for block in &blocks {
        history.extend_from_slice(block);
    }
    let expected = naive_convolve(&history, &[1.0, 0.0, 0.0, 0.0]);

    // h = [1,0,0,0] has a single partition, so P == 1 and there is no
    // overlap-save startup delay: output tracks input exactly.
    for (got, expected) in got.iter().zip(expected.iter()) {
        assert!((got - expected).abs() < 1e-4, "{got} vs {expected}");
    }
}

// S2: single-partition FIR, compared against a naive oracle.
#[test]
fn single_partition_fir_matches_naive_convolution() {
    let block_size = 4;
    let h = vec![1.0f32, -1.0, 2.0, 3.0];
    let crossover =
        FirMultiChannelCrossover::new(block_size, 1, vec![FilterSpec::new(0, h.clone())], 2)
            .expect("valid configuration");

    let blocks = vec![vec![3.0, -1.0, 0.0, 3.0], vec![0.0, 0.0, 0.0, 0.0]];
    let got = run_periods(&crossover, 0, &blocks);

    let mut history = Vec::new();
    for block in &blocks {
        history.extend_from_slice(block);
    }
    let expected = naive_convolve(&history, &h);

    for (got, expected) in got.iter().zip(expected.iter()) {
        assert!((got - expected).abs() < 1e-4, "{got} vs {expected}");
    }
}

// S3: multi-partition FIR (P=3 after padding to B=4), compared at 3%
// per-sample relative tolerance.
#[test]
fn multi_partition_fir_matches_naive_convolution() {
    let block_size = 4;
    let h = vec![
        -1.14, -0.08, 1.49, -0.79, -1.38, -4.73, 1.9, -4.41, 2.63, 4.26,
    ];
    let crossover =
        FirMultiChannelCrossover::new(block_size, 1, vec![FilterSpec::new(0, h.clone())], 2)
            .expect("valid configuration");

    let mut input = vec![3.0, -1.0, 0.0, 3.0, 2.0, 0.0, 1.0, 2.0, 1.0, 8.0, 8.0, 8.0, 0.0, 0.0, 0.0, 0.0];
    input.extend(std::iter::repeat(0.0).take(36 - input.len()));
    let blocks: Vec<Vec<f32>> = input.chunks(block_size).map(|c| c.to_vec()).collect();

    let got = run_periods(&crossover, 0, &blocks);
    let expected = naive_convolve(&input, &h);

    for (i, (got, expected)) in got.iter().zip(expected.iter()).enumerate() {
        let tolerance = (expected.abs() * 0.03).max(1e-4);
        assert!(
            (got - expected).abs() <= tolerance,
            "sample {i}: {got} vs {expected}"
        );
    }
}

// S4: multi-channel crossover, six output bands across three input
// buses, random filters and inputs over many periods.
#[test]
fn multi_channel_crossover_matches_naive_convolution() {
    let block_size = 120;
    let periods = 59;
    let filter_lens = [253usize, 170, 131, 1023, 721, 445];
    let mut rng = Xorshift64::new(0x9E3779B97F4A7C15);

    let filters: Vec<Vec<f32>> = filter_lens
        .iter()
        .map(|&len| (0..len).map(|_| rng.next_f32_signed()).collect())
        .collect();

    let specs: Vec<FilterSpec> = filters
        .iter()
        .enumerate()
        .map(|(c, h)| FilterSpec::new(c % 3, h.clone()))
        .collect();

    let crossover = FirMultiChannelCrossover::new(block_size, 3, specs, 3).expect("valid configuration");

    let mut bus_history = vec![Vec::new(); 3];
    let mut output_history = vec![Vec::new(); filter_lens.len()];

    for _ in 0..periods {
        let mut period_blocks = Vec::with_capacity(3);
        for bus in 0..3 {
            let block: Vec<f32> = (0..block_size).map(|_| rng.next_f32_signed()).collect();
            bus_history[bus].extend_from_slice(&block);
            period_blocks.push(block);
        }
        for (bus, block) in period_blocks.iter().enumerate() {
            let input = crossover.get_input_buffer(bus).unwrap();
            input.copy_from_slice(block);
        }
        crossover.update_inputs().unwrap();
        for (c, history) in output_history.iter_mut().enumerate() {
            history.extend_from_slice(crossover.get_output_buffer(c).unwrap());
        }
    }

    for (c, h) in filters.iter().enumerate() {
        let bus = c % 3;
        let expected = naive_convolve(&bus_history[bus], h);
        let got = &output_history[c];
        assert_eq!(got.len(), expected.len());
        for (i, (got, expected)) in got.iter().zip(expected.iter()).enumerate() {
            let tolerance = (expected.abs() * 0.03).max(1e-3);
            assert!(
                (got - expected).abs() <= tolerance,
                "channel {c} sample {i}: {got} vs {expected}"
            );
        }
    }
}

// Testable property 4: fan_width must not change the numeric result.
#[test]
fn output_is_independent_of_fan_width() {
    let block_size = 5;
    let h: Vec<f32> = (0..253).map(|i| ((i * 37) % 17) as f32 / 8.0 - 1.0).collect();
    let mut rng = Xorshift64::new(0x1234_5678_9abc_def0);
    let blocks: Vec<Vec<f32>> = (0..10)
        .map(|_| (0..block_size).map(|_| rng.next_f32_signed()).collect())
        .collect();

    let mut reference: Option<Vec<f32>> = None;
    for &fan_width in &[1usize, 2, 4, 8] {
        let crossover = FirMultiChannelCrossover::with_fan_width(
            block_size,
            1,
            vec![FilterSpec::new(0, h.clone())],
            2,
            fan_width,
        )
        .expect("valid configuration");
        let got = run_periods(&crossover, 0, &blocks);
        match &reference {
            None => reference = Some(got),
            Some(expected) => {
                for (a, b) in got.iter().zip(expected.iter()) {
                    assert!((a - b).abs() < 1e-4, "fan_width={fan_width}: {a} vs {b}");
                }
            }
        }
    }
}

// Testable property 6: replaying the same graph many times keeps H fixed
// and D periodic with period P — observed indirectly by feeding the same
// periodic input and checking the output settles into the same period.
#[test]
fn repeated_periodic_input_yields_periodic_output_after_transient() {
    let block_size = 4;
    let h = vec![1.0f32, -1.0, 2.0, 3.0, 0.5, -0.5];
    let crossover = FirMultiChannelCrossover::new(block_size, 1, vec![FilterSpec::new(0, h)], 2)
        .expect("valid configuration");

    let period_block = vec![1.0, -1.0, 1.0, -1.0];
    // P partitions for a 6-tap filter at B=4 is ceil(6/4) = 2.
    let num_blocks = 2;

    let mut outputs = Vec::new();
    for _ in 0..(num_blocks * 4) {
        let input = crossover.get_input_buffer(0).unwrap();
        input.copy_from_slice(&period_block);
        crossover.update_inputs().unwrap();
        outputs.push(crossover.get_output_buffer(0).unwrap().to_vec());
    }

    // Once the delay line has fully cycled (after num_blocks periods),
    // repeating the same input block forever must repeat the same output
    // block forever too.
    let settled = &outputs[num_blocks..];
    for window in settled.windows(2) {
        for (a, b) in window[0].iter().zip(window[1].iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }
}

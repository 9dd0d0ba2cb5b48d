//! Complex-spectrum arithmetic kernels used by the convolution's inner
//! loop: multiply-accumulate of an input partition against an H-block,
//! and the reduction add that combines fan/tree partial sums.
//!
//! Each kernel has a portable scalar implementation and, on `x86_64`, an
//! SSE2-accelerated one chosen at runtime via `is_x86_feature_detected!`.
//! `rustfft`'s own kernels are not reused here: these operate on already
//!-transformed `Complex32` spectra, not on the transform itself.

use num_complex::Complex32;

/// `dst[i] = a[i] * b[i]` for every bin. Used to multiply an input
/// partition's spectrum by the matching H-block.
pub fn mul(a: &[Complex32], b: &[Complex32], dst: &mut [Complex32]) {
    assert_eq!(a.len(), b.len());
    assert_eq!(a.len(), dst.len());
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("sse2") {
            // SAFETY: feature checked above.
            unsafe { x86::mul_sse2(a, b, dst) };
            return;
        }
    }
    mul_scalar(a, b, dst);
}

fn mul_scalar(a: &[Complex32], b: &[Complex32], dst: &mut [Complex32]) {
    for i in 0..dst.len() {
        dst[i] = a[i] * b[i];
    }
}

/// `dst[i] += a[i] * b[i]` for every bin. The hot inner loop of the
/// partitioned convolution: accumulate one partition's contribution into
/// a fan task's running sum without a separate temporary.
pub fn mul_add(a: &[Complex32], b: &[Complex32], dst: &mut [Complex32]) {
    assert_eq!(a.len(), b.len());
    assert_eq!(a.len(), dst.len());
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("sse2") {
            // SAFETY: feature checked above.
            unsafe { x86::mul_add_sse2(a, b, dst) };
            return;
        }
    }
    mul_add_scalar(a, b, dst);
}

fn mul_add_scalar(a: &[Complex32], b: &[Complex32], dst: &mut [Complex32]) {
    for i in 0..dst.len() {
        dst[i] += a[i] * b[i];
    }
}

/// `dst[i] = a[i] + b[i]` for every bin. Used by tree-reduction tasks to
/// combine two upstream partial sums.
pub fn add(a: &[Complex32], b: &[Complex32], dst: &mut [Complex32]) {
    assert_eq!(a.len(), b.len());
    assert_eq!(a.len(), dst.len());
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("sse2") {
            // SAFETY: feature checked above.
            unsafe { x86::add_sse2(a, b, dst) };
            return;
        }
    }
    add_scalar(a, b, dst);
}

fn add_scalar(a: &[Complex32], b: &[Complex32], dst: &mut [Complex32]) {
    for i in 0..dst.len() {
        dst[i] = a[i] + b[i];
    }
}

/// Convenience wrapper: `dst[i] += b[i]`, for combining a partial sum
/// into an accumulator without allocating a second source slice.
pub fn add_into(b: &[Complex32], dst: &mut [Complex32]) {
    assert_eq!(b.len(), dst.len());
    for i in 0..dst.len() {
        dst[i] += b[i];
    }
}

#[cfg(target_arch = "x86_64")]
mod x86 {
    use super::Complex32;
    use std::arch::x86_64::*;

    /// Two `Complex32`s packed as `[re0, im0, re1, im1]` fill one __m128.
    /// SSE2 has no native complex multiply, so this computes the four
    /// scalar products and recombines them with a couple of shuffles.
    #[target_feature(enable = "sse2")]
    unsafe fn complex_mul_pair(a: __m128, b: __m128) -> __m128 {
        // a = [a0r, a0i, a1r, a1i], b = [b0r, b0i, b1r, b1i]
        let a_re = _mm_shuffle_ps(a, a, 0b10_10_00_00); // [a0r, a0r, a1r, a1r]
        let a_im = _mm_shuffle_ps(a, a, 0b11_11_01_01); // [a0i, a0i, a1i, a1i]
        let b_swapped = _mm_shuffle_ps(b, b, 0b10_11_00_01); // [b0i, b0r, b1i, b1r]

        let re_im = _mm_mul_ps(a_re, b); // [a0r*b0r, a0r*b0i, a1r*b1r, a1r*b1i]
        let im_re = _mm_mul_ps(a_im, b_swapped); // [a0i*b0i, a0i*b0r, a1i*b1i, a1i*b1r]

        // result = [re_im_even - im_re_even, re_im_odd + im_re_odd, ...]
        let sign_mask = _mm_set_ps(0.0, -0.0, 0.0, -0.0);
        let im_re_signed = _mm_xor_ps(im_re, sign_mask);
        _mm_add_ps(re_im, im_re_signed)
    }

    #[target_feature(enable = "sse2")]
    pub(super) unsafe fn mul_sse2(a: &[Complex32], b: &[Complex32], dst: &mut [Complex32]) {
        let len = dst.len();
        let pairs = len / 2;
        for i in 0..pairs {
            let av = _mm_loadu_ps(a.as_ptr().add(i * 2) as *const f32);
            let bv = _mm_loadu_ps(b.as_ptr().add(i * 2) as *const f32);
            let rv = complex_mul_pair(av, bv);
            _mm_storeu_ps(dst.as_mut_ptr().add(i * 2) as *mut f32, rv);
        }
        for i in (pairs * 2)..len {
            dst[i] = a[i] * b[i];
        }
    }

    #[target_feature(enable = "sse2")]
    pub(super) unsafe fn mul_add_sse2(a: &[Complex32], b: &[Complex32], dst: &mut [Complex32]) {
        let len = dst.len();
        let pairs = len / 2;
        for i in 0..pairs {
            let av = _mm_loadu_ps(a.as_ptr().add(i * 2) as *const f32);
            let bv = _mm_loadu_ps(b.as_ptr().add(i * 2) as *const f32);
            let dv = _mm_loadu_ps(dst.as_ptr().add(i * 2) as *const f32);
            let prod = complex_mul_pair(av, bv);
            let sum = _mm_add_ps(dv, prod);
            _mm_storeu_ps(dst.as_mut_ptr().add(i * 2) as *mut f32, sum);
        }
        for i in (pairs * 2)..len {
            dst[i] += a[i] * b[i];
        }
    }

    #[target_feature(enable = "sse2")]
    pub(super) unsafe fn add_sse2(a: &[Complex32], b: &[Complex32], dst: &mut [Complex32]) {
        let len = dst.len();
        let pairs = len / 2;
        for i in 0..pairs {
            let av = _mm_loadu_ps(a.as_ptr().add(i * 2) as *const f32);
            let bv = _mm_loadu_ps(b.as_ptr().add(i * 2) as *const f32);
            let rv = _mm_add_ps(av, bv);
            _mm_storeu_ps(dst.as_mut_ptr().add(i * 2) as *mut f32, rv);
        }
        for i in (pairs * 2)..len {
            dst[i] = a[i] + b[i];
        }
    }
}

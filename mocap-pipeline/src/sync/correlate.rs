//! FFT cross-correlation
//!
//! Full-mode cross-correlation of two real signals computed as
//! `IFFT(FFT(a) · conj(FFT(b)))` on zero-padded buffers. Lags run from
//! `-(len(b) - 1)` to `len(a) - 1`; a positive lag `L` means `a[n + L]`
//! lines up with `b[n]`, i.e. `b` started recording `L` samples after `a`.

use mocap_common::{Error, Result};
use realfft::num_complex::Complex;
use realfft::RealFftPlanner;

/// Lag (in samples) of the correlation peak between `reference` and `other`
///
/// Ties resolve to the most negative lag.
pub fn correlation_peak_lag(reference: &[f32], other: &[f32]) -> Result<i64> {
    let correlation = cross_correlate(reference, other)?;
    let lags = correlation_lags(reference.len(), other.len());

    let mut best = 0usize;
    for (i, value) in correlation.iter().enumerate() {
        if *value > correlation[best] {
            best = i;
        }
    }
    Ok(lags.start + best as i64)
}

/// Lag of the correlation peak in seconds
pub fn lag_seconds(reference: &[f32], other: &[f32], sample_rate: u32) -> Result<f64> {
    if sample_rate == 0 {
        return Err(Error::InvalidInput("sample rate must be positive".into()));
    }
    Ok(correlation_peak_lag(reference, other)? as f64 / sample_rate as f64)
}

/// Lag values matching the output of `cross_correlate`
pub fn correlation_lags(len_a: usize, len_b: usize) -> std::ops::Range<i64> {
    -(len_b as i64 - 1)..len_a as i64
}

/// Full cross-correlation, one value per lag in `correlation_lags` order
pub fn cross_correlate(a: &[f32], b: &[f32]) -> Result<Vec<f64>> {
    if a.is_empty() || b.is_empty() {
        return Err(Error::InvalidInput(
            "cannot cross-correlate an empty signal".into(),
        ));
    }

    let full_len = a.len() + b.len() - 1;
    let n = full_len.next_power_of_two();

    let mut planner = RealFftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);

    let fft_err = |e: realfft::FftError| Error::Internal(format!("FFT failed: {}", e));

    let mut buf_a = forward.make_input_vec();
    for (dst, src) in buf_a.iter_mut().zip(a) {
        *dst = *src as f64;
    }
    let mut spec_a = forward.make_output_vec();
    forward.process(&mut buf_a, &mut spec_a).map_err(fft_err)?;

    let mut buf_b = forward.make_input_vec();
    for (dst, src) in buf_b.iter_mut().zip(b) {
        *dst = *src as f64;
    }
    let mut spec_b = forward.make_output_vec();
    forward.process(&mut buf_b, &mut spec_b).map_err(fft_err)?;

    let mut product: Vec<Complex<f64>> = spec_a
        .iter()
        .zip(&spec_b)
        .map(|(x, y)| x * y.conj())
        .collect();
    // DC and Nyquist bins of a real signal's spectrum are real
    if let Some(first) = product.first_mut() {
        first.im = 0.0;
    }
    if n % 2 == 0 {
        if let Some(last) = product.last_mut() {
            last.im = 0.0;
        }
    }

    let mut circular = inverse.make_output_vec();
    inverse.process(&mut product, &mut circular).map_err(fft_err)?;

    // Unwrap circular result into lag order: negative lags live at the tail
    let scale = 1.0 / n as f64;
    let negative = b.len() - 1;
    let mut full = Vec::with_capacity(full_len);
    full.extend(circular[n - negative..].iter().map(|v| v * scale));
    full.extend(circular[..a.len()].iter().map(|v| v * scale));
    Ok(full)
}

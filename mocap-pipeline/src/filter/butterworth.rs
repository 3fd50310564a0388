//! Reference temporal filter: gap interpolation + zero-phase Butterworth
//!
//! Each point/axis trajectory is processed on its own. NaN runs of at most
//! `max_gap_to_fill` frames with finite neighbours on both sides are filled
//! linearly. Every remaining finite run is low-passed forward and backward
//! through cascaded second-order sections, with odd-extension padding at the
//! run edges. NaN frames that were not filled stay NaN.

use super::{FilterParameters, TemporalFilter};
use crate::arrays::Skeleton3D;
use anyhow::{bail, Result};
use nalgebra::Complex;
use std::f64::consts::PI;

/// One second-order section, transposed direct form II
#[derive(Debug, Clone, Copy, PartialEq)]
struct Biquad {
    b: [f64; 3],
    /// a1, a2 (a0 normalized to 1)
    a: [f64; 2],
}

impl Biquad {
    /// State that makes a constant input `x0` pass through unchanged
    fn steady_state(&self, x0: f64) -> [f64; 2] {
        let s2 = (self.b[2] - self.a[1]) * x0;
        let s1 = (self.b[1] - self.a[0]) * x0 + s2;
        [s1, s2]
    }

    fn run(&self, signal: &mut [f64]) {
        let Some(&first) = signal.first() else {
            return;
        };
        let [mut s1, mut s2] = self.steady_state(first);
        for x in signal.iter_mut() {
            let input = *x;
            let y = self.b[0] * input + s1;
            s1 = self.b[1] * input - self.a[0] * y + s2;
            s2 = self.b[2] * input - self.a[1] * y;
            *x = y;
        }
    }
}

/// Low-pass Butterworth sections with unity DC gain
fn design_lowpass(order: usize, cutoff: f64, sampling_rate: f64) -> Vec<Biquad> {
    let fs2 = 2.0 * sampling_rate;
    // Pre-warped analog cutoff
    let wc = fs2 * (PI * cutoff / sampling_rate).tan();
    let bilinear = |s: Complex<f64>| (Complex::new(fs2, 0.0) + s) / (Complex::new(fs2, 0.0) - s);

    let mut sections = Vec::with_capacity(order.div_ceil(2));
    for k in 0..order / 2 {
        let theta = PI / 2.0 + PI * (2 * k + 1) as f64 / (2 * order) as f64;
        let z = bilinear(Complex::from_polar(wc, theta));
        let a1 = -2.0 * z.re;
        let a2 = z.norm_sqr();
        let gain = (1.0 + a1 + a2) / 4.0;
        sections.push(Biquad {
            b: [gain, 2.0 * gain, gain],
            a: [a1, a2],
        });
    }
    if order % 2 == 1 {
        let z = bilinear(Complex::new(-wc, 0.0));
        let a1 = -z.re;
        let gain = (1.0 + a1) / 2.0;
        sections.push(Biquad {
            b: [gain, gain, 0.0],
            a: [a1, 0.0],
        });
    }
    sections
}

/// Linearly fill interior NaN runs no longer than `max_gap`
pub fn fill_gaps(values: &mut [f64], max_gap: usize) {
    let mut i = 0;
    while i < values.len() {
        if !values[i].is_nan() {
            i += 1;
            continue;
        }
        let start = i;
        while i < values.len() && values[i].is_nan() {
            i += 1;
        }
        let end = i;
        let gap = end - start;
        if start == 0 || end == values.len() || gap > max_gap {
            continue;
        }
        let (left, right) = (values[start - 1], values[end]);
        let span = (gap + 1) as f64;
        for (j, v) in values[start..end].iter_mut().enumerate() {
            let t = (j + 1) as f64 / span;
            *v = left + t * (right - left);
        }
    }
}

/// Butterworth low-pass with linear gap filling
#[derive(Debug, Default, Clone)]
pub struct ButterworthFilter;

impl ButterworthFilter {
    pub fn new() -> Self {
        Self
    }

    fn filtfilt(sections: &[Biquad], run: &mut [f64], pad: usize) {
        let n = run.len();
        let pad = pad.min(n.saturating_sub(1));
        let (first, last) = (run[0], run[n - 1]);

        let mut extended = Vec::with_capacity(n + 2 * pad);
        extended.extend((1..=pad).rev().map(|i| 2.0 * first - run[i]));
        extended.extend_from_slice(run);
        extended.extend((1..=pad).map(|i| 2.0 * last - run[n - 1 - i]));

        for section in sections {
            section.run(&mut extended);
        }
        extended.reverse();
        for section in sections {
            section.run(&mut extended);
        }
        extended.reverse();

        run.copy_from_slice(&extended[pad..pad + n]);
    }

    /// Fill and smooth one trajectory in place
    fn filter_channel(&self, values: &mut [f64], params: &FilterParameters, sections: &[Biquad]) {
        fill_gaps(values, params.max_gap_to_fill);
        let pad = 3 * (params.order + 1);

        let mut i = 0;
        while i < values.len() {
            if values[i].is_nan() {
                i += 1;
                continue;
            }
            let start = i;
            while i < values.len() && !values[i].is_nan() {
                i += 1;
            }
            if i - start >= 2 {
                Self::filtfilt(sections, &mut values[start..i], pad);
            }
        }
    }
}

impl TemporalFilter for ButterworthFilter {
    fn name(&self) -> &str {
        "butterworth"
    }

    fn filter(&self, skeleton: &Skeleton3D, params: &FilterParameters) -> Result<Skeleton3D> {
        if params.rotate_data {
            bail!("butterworth filter does not re-orient skeletons");
        }
        if params.order == 0 {
            bail!("filter order must be at least 1");
        }
        if !(params.cutoff_frequency > 0.0 && params.cutoff_frequency < params.sampling_rate / 2.0) {
            bail!(
                "cutoff {} Hz must lie in (0, {}) Hz",
                params.cutoff_frequency,
                params.sampling_rate / 2.0
            );
        }

        let sections = design_lowpass(params.order, params.cutoff_frequency, params.sampling_rate);
        let mut filtered = skeleton.clone();
        for point in 0..skeleton.points() {
            for axis in 0..3 {
                let mut channel = skeleton.channel(point, axis);
                self.filter_channel(&mut channel, params, &sections);
                filtered.set_channel(point, axis, &channel);
            }
        }
        Ok(filtered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> FilterParameters {
        FilterParameters {
            sampling_rate: 30.0,
            cutoff_frequency: 7.0,
            order: 4,
            max_gap_to_fill: 3,
            find_good_frame: None,
            rotate_data: false,
        }
    }

    #[test]
    fn test_sections_have_unity_dc_gain() {
        for order in 1..=6 {
            let sections = design_lowpass(order, 7.0, 30.0);
            assert_eq!(sections.len(), order.div_ceil(2));
            for s in &sections {
                let dc = s.b.iter().sum::<f64>() / (1.0 + s.a[0] + s.a[1]);
                assert!((dc - 1.0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_fill_gaps_interior_only() {
        let nan = f64::NAN;
        let mut values = vec![nan, 1.0, nan, nan, 4.0, nan, nan, nan, nan, 9.0, nan];
        fill_gaps(&mut values, 3);
        assert!(values[0].is_nan());
        assert_eq!(&values[1..5], &[1.0, 2.0, 3.0, 4.0]);
        // Four-frame gap exceeds the limit
        assert!(values[5..9].iter().all(|v| v.is_nan()));
        assert!(values[10].is_nan());
    }

    #[test]
    fn test_constant_signal_unchanged() {
        let filter = ButterworthFilter::new();
        let sections = design_lowpass(4, 7.0, 30.0);
        let mut values = vec![2.5; 60];
        filter.filter_channel(&mut values, &params(), &sections);
        assert!(values.iter().all(|v| (v - 2.5).abs() < 1e-9));
    }

    #[test]
    fn test_high_frequency_attenuated() {
        let filter = ButterworthFilter::new();
        let sections = design_lowpass(4, 3.0, 30.0);
        // 1 Hz motion plus 12 Hz jitter
        let mut values: Vec<f64> = (0..300)
            .map(|i| {
                let t = i as f64 / 30.0;
                (2.0 * PI * t).sin() + 0.3 * (2.0 * PI * 12.0 * t).sin()
            })
            .collect();
        filter.filter_channel(&mut values, &params(), &sections);
        let worst = (50..250)
            .map(|i| (values[i] - (2.0 * PI * i as f64 / 30.0).sin()).abs())
            .fold(0.0, f64::max);
        assert!(worst < 0.05, "residual jitter {}", worst);
    }

    #[test]
    fn test_shape_and_nan_runs_kept() {
        let mut skeleton = Skeleton3D::new_nan(40, 2);
        for f in 0..40 {
            if !(10..25).contains(&f) {
                skeleton.set(f, 0, [f as f64, 1.0, 2.0]);
            }
        }
        let filtered = ButterworthFilter::new().filter(&skeleton, &params()).unwrap();
        assert_eq!(filtered.frames(), 40);
        assert!(filtered.get(15, 0)[0].is_nan());
        assert!(!filtered.get(30, 0)[0].is_nan());
        assert!(filtered.get(5, 1)[0].is_nan());
    }

    #[test]
    fn test_rotation_not_supported() {
        let skeleton = Skeleton3D::new_nan(4, 1);
        let mut p = params();
        p.rotate_data = true;
        assert!(ButterworthFilter::new().filter(&skeleton, &p).is_err());
    }
}

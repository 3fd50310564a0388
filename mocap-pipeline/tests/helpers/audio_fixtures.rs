//! Audio fixture generation
//!
//! Cameras are simulated by one shared noise burst recorded with a
//! different amount of lead-in silence per camera.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

/// Deterministic white noise in [-0.8, 0.8]
pub fn noise_burst(samples: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..samples).map(|_| rng.gen_range(-0.8f32..0.8)).collect()
}

/// Write `burst` after `lead_in_seconds` of silence, padded to
/// `total_seconds`, as 16-bit mono WAV
pub fn write_mono_wav(
    path: &Path,
    sample_rate: u32,
    burst: &[f32],
    lead_in_seconds: f64,
    total_seconds: f64,
) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;

    let lead_in = (lead_in_seconds * sample_rate as f64).round() as usize;
    let total = (total_seconds * sample_rate as f64).round() as usize;
    for i in 0..total {
        let value = if i >= lead_in {
            burst.get(i - lead_in).copied().unwrap_or(0.0)
        } else {
            0.0
        };
        writer.write_sample((value * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

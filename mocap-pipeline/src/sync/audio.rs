//! Camera audio extraction
//!
//! Decodes the first audio track of a video container to mono f32 PCM with
//! symphonia (channels averaged), resamples with rubato when cameras disagree
//! on sample rate, and writes trimmed audio as WAV.

use mocap_common::{Error, Result};
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use std::path::Path;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::conv::FromSample;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;

/// Mono waveform of one camera
#[derive(Debug, Clone)]
pub struct MonoAudio {
    /// Samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl MonoAudio {
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Samples covering `[start_seconds, start_seconds + duration_seconds)`
    pub fn trimmed(&self, start_seconds: f64, duration_seconds: f64) -> MonoAudio {
        let rate = self.sample_rate as f64;
        let start = ((start_seconds * rate).round().max(0.0) as usize).min(self.samples.len());
        let len = (duration_seconds * rate).round().max(0.0) as usize;
        let end = (start + len).min(self.samples.len());
        MonoAudio {
            samples: self.samples[start..end].to_vec(),
            sample_rate: self.sample_rate,
        }
    }
}

/// Decode the audio track of `path` to mono
///
/// A container without a decodable audio track yields `NoAudioTrack`.
pub fn extract_mono_audio(path: &Path, camera: &str) -> Result<MonoAudio> {
    tracing::debug!(path = %path.display(), camera, "Extracting camera audio");

    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| {
            Error::InvalidInput(format!("Failed to probe {}: {}", path.display(), e))
        })?;
    let mut format = probed.format;

    let no_audio = || Error::NoAudioTrack {
        camera: camera.to_string(),
    };

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some())
        .ok_or_else(no_audio)?;
    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.ok_or_else(no_audio)?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| {
            Error::InvalidInput(format!(
                "No decoder for audio track of {}: {}",
                path.display(),
                e
            ))
        })?;

    let mut samples: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                return Err(Error::InvalidInput(format!(
                    "Error reading packet from {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => samples.extend(mix_to_mono(&decoded)),
            Err(symphonia::core::errors::Error::DecodeError(e)) => {
                // Corrupt packet, keep going
                tracing::warn!(path = %path.display(), error = %e, "Skipping undecodable audio packet");
            }
            Err(e) => {
                return Err(Error::InvalidInput(format!(
                    "Failed to decode audio of {}: {}",
                    path.display(),
                    e
                )));
            }
        }
    }

    if samples.is_empty() {
        return Err(no_audio());
    }

    tracing::debug!(
        path = %path.display(),
        camera,
        sample_rate,
        total_samples = samples.len(),
        "Audio extraction complete"
    );

    Ok(MonoAudio {
        samples,
        sample_rate,
    })
}

fn average_channels<S>(buf: &AudioBuffer<S>) -> Vec<f32>
where
    S: Sample,
    f32: FromSample<S>,
{
    let channels = buf.spec().channels.count().max(1);
    (0..buf.frames())
        .map(|i| {
            let sum: f32 = (0..channels).map(|ch| f32::from_sample(buf.chan(ch)[i])).sum();
            sum / channels as f32
        })
        .collect()
}

fn mix_to_mono(decoded: &AudioBufferRef) -> Vec<f32> {
    match decoded {
        AudioBufferRef::F32(buf) => average_channels(&**buf),
        AudioBufferRef::F64(buf) => average_channels(&**buf),
        AudioBufferRef::U8(buf) => average_channels(&**buf),
        AudioBufferRef::U16(buf) => average_channels(&**buf),
        AudioBufferRef::U24(buf) => average_channels(&**buf),
        AudioBufferRef::U32(buf) => average_channels(&**buf),
        AudioBufferRef::S8(buf) => average_channels(&**buf),
        AudioBufferRef::S16(buf) => average_channels(&**buf),
        AudioBufferRef::S24(buf) => average_channels(&**buf),
        AudioBufferRef::S32(buf) => average_channels(&**buf),
    }
}

/// Resample mono audio to `target_rate` with sinc interpolation
pub fn resample(audio: &MonoAudio, target_rate: u32) -> Result<MonoAudio> {
    if audio.sample_rate == target_rate || audio.samples.is_empty() {
        return Ok(MonoAudio {
            samples: audio.samples.clone(),
            sample_rate: target_rate,
        });
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = target_rate as f64 / audio.sample_rate as f64;

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, audio.samples.len(), 1)
        .map_err(|e| Error::Internal(format!("Failed to create resampler: {}", e)))?;
    let output = resampler
        .process(&[audio.samples.clone()], None)
        .map_err(|e| Error::Internal(format!("Resampling failed: {}", e)))?;

    tracing::debug!(
        from = audio.sample_rate,
        to = target_rate,
        input_samples = audio.samples.len(),
        output_samples = output[0].len(),
        "Resampled camera audio"
    );

    Ok(MonoAudio {
        samples: output.into_iter().next().unwrap_or_default(),
        sample_rate: target_rate,
    })
}

/// Write mono audio as 16-bit PCM WAV
pub fn write_wav(path: &Path, audio: &MonoAudio) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let wav_err = |e: hound::Error| Error::Internal(format!("WAV write failed for {}: {}", path.display(), e));

    let mut writer = hound::WavWriter::create(path, spec).map_err(wav_err)?;
    for sample in &audio.samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer.write_sample(value).map_err(wav_err)?;
    }
    writer.finalize().map_err(wav_err)?;
    Ok(())
}

//! Segment length estimates
//!
//! For each COM segment: median and standard deviation of the proximal →
//! distal distance over all frames where both ends are finite.

use super::ComEngine;
use crate::arrays::Skeleton3D;
use mocap_common::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentLength {
    /// `None` when no frame had both ends
    pub median: Option<f64>,
    pub stdev: Option<f64>,
    pub frames_used: usize,
}

fn median(sorted: &[f64]) -> Option<f64> {
    let n = sorted.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(sorted[n / 2]),
        _ => Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0),
    }
}

fn stdev(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Length statistics keyed by segment name
pub fn estimate_segment_lengths(engine: &ComEngine, skeleton: &Skeleton3D) -> BTreeMap<String, SegmentLength> {
    engine
        .segments()
        .iter()
        .map(|segment| {
            let mut lengths: Vec<f64> = (0..skeleton.frames())
                .filter_map(|frame| {
                    let point = |index: usize| skeleton.get(frame, index);
                    let p = segment.proximal.evaluate(point);
                    let d = segment.distal.evaluate(point);
                    let length = p
                        .iter()
                        .zip(&d)
                        .map(|(a, b)| (a - b).powi(2))
                        .sum::<f64>()
                        .sqrt();
                    length.is_finite().then_some(length)
                })
                .collect();
            lengths.sort_by(|a, b| a.total_cmp(b));
            (
                segment.name.to_string(),
                SegmentLength {
                    median: median(&lengths),
                    stdev: stdev(&lengths),
                    frames_used: lengths.len(),
                },
            )
        })
        .collect()
}

pub fn write_segment_lengths(path: &Path, lengths: &BTreeMap<String, SegmentLength>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(lengths)?)?;
    tracing::info!(path = %path.display(), "Wrote segment lengths");
    Ok(())
}

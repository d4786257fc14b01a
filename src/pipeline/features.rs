//! Feature extraction for classifier input.
//!
//! Images are reduced to a fixed-length numeric vector: five global
//! intensity statistics, an intensity histogram, and per-region local
//! variance texture for higher-dimensional targets. Tabular inputs are
//! parsed into named feature rows. Extraction never fails — a decode
//! failure yields a flagged pseudo-random vector instead (the degraded
//! path; callers must treat it as low-confidence, not as success).

use image::imageops::FilterType;
use rand::Rng;
use tracing::debug;

/// Canonical square resolution every image is resized to before analysis
pub const CANONICAL_SIZE: u32 = 64;

/// Number of global statistics at the head of every feature vector
pub const STAT_FEATURES: usize = 5;

/// Fixed histogram bin count; targets smaller than this truncate it
pub const HISTOGRAM_BINS: usize = 32;

/// Texture grid edge — 4x4 sub-regions, 16 local-variance features
pub const TEXTURE_GRID: u32 = 4;

/// Neutral pad value for feature slots beyond what the image provides
const PAD_VALUE: f32 = 0.5;

/// Fixed-length feature vector with a validity flag. `valid == false`
/// means decoding failed and `values` is pseudo-random filler.
#[derive(Debug, Clone)]
pub struct ExtractedFeatures {
    pub values: Vec<f32>,
    pub valid: bool,
}

/// Global intensity statistics over the canonical grayscale image,
/// every field scaled to [0, 1].
#[derive(Debug, Clone)]
pub struct ImageStats {
    /// Original dimensions before canonical resize
    pub width: u32,
    pub height: u32,
    pub mean: f32,
    pub std_dev: f32,
    pub min: f32,
    pub max: f32,
    /// max - min
    pub contrast: f32,
    /// Fraction of pixels per bin, `HISTOGRAM_BINS` bins over [0, 1]
    pub histogram: Vec<f32>,
    /// Local variance per sub-region, scaled to [0, 1]
    pub texture: Vec<f32>,
}

impl ImageStats {
    /// 1.0 minus the largest histogram bin fraction. A flat image
    /// concentrates in one bin (dispersion 0); varied tissue spreads out.
    pub fn histogram_dispersion(&self) -> f32 {
        let largest = self.histogram.iter().cloned().fold(0.0f32, f32::max);
        (1.0 - largest).clamp(0.0, 1.0)
    }
}

/// Decode an image and compute its canonical statistics.
/// Returns `None` when the bytes do not decode.
pub fn compute_stats(image_bytes: &[u8]) -> Option<ImageStats> {
    let decoded = image::load_from_memory(image_bytes).ok()?;
    let (width, height) = (decoded.width(), decoded.height());
    if width == 0 || height == 0 {
        return None;
    }

    let gray = decoded
        .resize_exact(CANONICAL_SIZE, CANONICAL_SIZE, FilterType::Triangle)
        .to_luma8();

    let pixels: Vec<f32> = gray.pixels().map(|p| p.0[0] as f32 / 255.0).collect();
    let n = pixels.len() as f32;

    let mean = pixels.iter().sum::<f32>() / n;
    let variance = pixels.iter().map(|p| (p - mean).powi(2)).sum::<f32>() / n;
    let std_dev = variance.sqrt();
    let min = pixels.iter().cloned().fold(1.0f32, f32::min);
    let max = pixels.iter().cloned().fold(0.0f32, f32::max);

    let mut histogram = vec![0.0f32; HISTOGRAM_BINS];
    for p in &pixels {
        let bin = ((p * HISTOGRAM_BINS as f32) as usize).min(HISTOGRAM_BINS - 1);
        histogram[bin] += 1.0;
    }
    for bin in &mut histogram {
        *bin /= n;
    }

    // Local variance over a fixed grid of sub-regions. Variance of values
    // in [0,1] is bounded by 0.25, so scale by 4 to fill the unit range.
    let cell = CANONICAL_SIZE / TEXTURE_GRID;
    let mut texture = Vec::with_capacity((TEXTURE_GRID * TEXTURE_GRID) as usize);
    for gy in 0..TEXTURE_GRID {
        for gx in 0..TEXTURE_GRID {
            let mut sum = 0.0f32;
            let mut sq_sum = 0.0f32;
            let count = (cell * cell) as f32;
            for y in (gy * cell)..((gy + 1) * cell) {
                for x in (gx * cell)..((gx + 1) * cell) {
                    let v = pixels[(y * CANONICAL_SIZE + x) as usize];
                    sum += v;
                    sq_sum += v * v;
                }
            }
            let m = sum / count;
            let var = (sq_sum / count - m * m).max(0.0);
            texture.push((var * 4.0).clamp(0.0, 1.0));
        }
    }

    Some(ImageStats {
        width,
        height,
        mean,
        std_dev,
        min,
        max,
        contrast: max - min,
        histogram,
        texture,
    })
}

/// Extract a feature vector of exactly `target_dimension` values.
///
/// Layout: 5 global statistics, then up to `target_dimension - 5`
/// histogram bins (capped at `HISTOGRAM_BINS`), then local-variance
/// texture features, then neutral padding. Never fails: undecodable
/// bytes produce a flagged pseudo-random vector in [0.3, 0.7].
pub fn extract_features(image_bytes: &[u8], target_dimension: usize) -> ExtractedFeatures {
    let Some(stats) = compute_stats(image_bytes) else {
        debug!(
            target_dimension,
            "image decode failed, substituting degraded feature vector"
        );
        return degraded_features(target_dimension);
    };

    let mut values = Vec::with_capacity(target_dimension);
    values.extend_from_slice(&[
        stats.mean,
        (stats.std_dev * 2.0).clamp(0.0, 1.0),
        stats.min,
        stats.max,
        stats.contrast,
    ]);

    if values.len() < target_dimension {
        let bins = (target_dimension - values.len()).min(HISTOGRAM_BINS);
        values.extend_from_slice(&stats.histogram[..bins]);
    }
    if values.len() < target_dimension {
        let take = (target_dimension - values.len()).min(stats.texture.len());
        values.extend_from_slice(&stats.texture[..take]);
    }
    while values.len() < target_dimension {
        values.push(PAD_VALUE);
    }
    values.truncate(target_dimension);

    ExtractedFeatures {
        values,
        valid: true,
    }
}

fn degraded_features(target_dimension: usize) -> ExtractedFeatures {
    let mut rng = rand::thread_rng();
    let values = (0..target_dimension)
        .map(|_| rng.gen_range(0.3..=0.7))
        .collect();
    ExtractedFeatures {
        values,
        valid: false,
    }
}

/// Linearly resample a numeric series to a fixed length (ECG model input).
pub fn resample_series(series: &[f32], target: usize) -> Vec<f32> {
    if series.is_empty() || target == 0 {
        return vec![0.0; target];
    }
    if series.len() == 1 {
        return vec![series[0]; target];
    }
    (0..target)
        .map(|i| {
            let pos = i as f32 * (series.len() - 1) as f32 / (target - 1).max(1) as f32;
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(series.len() - 1);
            let frac = pos - lo as f32;
            series[lo] * (1.0 - frac) + series[hi] * frac
        })
        .collect()
}

/// Parse a comma/whitespace-delimited numeric series (waveform data).
/// A non-numeric first line is treated as a header and skipped. Returns
/// `None` unless at least 8 numeric samples are present.
pub fn parse_numeric_series(bytes: &[u8]) -> Option<Vec<f32>> {
    let text = std::str::from_utf8(bytes).ok()?;
    let mut lines = text.lines().filter(|l| !l.trim().is_empty()).peekable();

    if let Some(first) = lines.peek() {
        if !line_is_numeric(first) {
            lines.next();
        }
    }

    let values: Vec<f32> = lines
        .flat_map(|l| l.split([',', ';', '\t', ' ']))
        .filter(|t| !t.trim().is_empty())
        .filter_map(|t| t.trim().parse::<f32>().ok())
        .collect();

    if values.len() >= 8 {
        Some(values)
    } else {
        None
    }
}

/// Parse a CSV feature row: an optional header line of column names
/// followed by one value row. Header names are lowercased. Categorical
/// cells ("Male", "Urban") become `NaN` so every value stays aligned
/// with its header column; callers treat non-finite values as missing.
pub fn parse_feature_row(bytes: &[u8]) -> Option<(Vec<String>, Vec<f32>)> {
    let text = std::str::from_utf8(bytes).ok()?;
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let first = lines.next()?;
    let (header, row_line) = if line_is_numeric(first) {
        (Vec::new(), first)
    } else {
        let header: Vec<String> = first
            .split(',')
            .map(|c| c.trim().to_lowercase())
            .collect();
        (header, lines.next()?)
    };

    let row: Vec<f32> = row_line
        .split(',')
        .map(|t| t.trim().parse::<f32>().unwrap_or(f32::NAN))
        .collect();

    if row.iter().any(|v| v.is_finite()) {
        Some((header, row))
    } else {
        None
    }
}

fn line_is_numeric(line: &str) -> bool {
    let tokens: Vec<&str> = line
        .split([',', ';', '\t', ' '])
        .filter(|t| !t.trim().is_empty())
        .collect();
    !tokens.is_empty() && tokens.iter().all(|t| t.trim().parse::<f32>().is_ok())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use std::io::Cursor;

    pub(crate) fn encode_gray(width: u32, height: u32, fill: impl Fn(u32, u32) -> u8) -> Vec<u8> {
        let img = GrayImage::from_fn(width, height, |x, y| Luma([fill(x, y)]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn extract_returns_requested_dimension() {
        let bytes = encode_gray(64, 64, |_, _| 128);
        for dim in [5, 16, 37, 53, 128] {
            let features = extract_features(&bytes, dim);
            assert_eq!(features.values.len(), dim);
            assert!(features.valid);
        }
    }

    #[test]
    fn extract_values_stay_in_unit_range() {
        let bytes = encode_gray(64, 64, |x, y| ((x + y) * 2) as u8);
        let features = extract_features(&bytes, 128);
        for v in &features.values {
            assert!((0.0..=1.0).contains(v), "feature out of range: {v}");
        }
    }

    #[test]
    fn uniform_image_has_zero_contrast() {
        let bytes = encode_gray(32, 32, |_, _| 100);
        let stats = compute_stats(&bytes).unwrap();
        assert!(stats.contrast < 0.01, "contrast {}", stats.contrast);
        assert!(stats.std_dev < 0.01);
        assert!(stats.histogram_dispersion() < 0.05);
    }

    #[test]
    fn high_contrast_image_detected() {
        let bytes = encode_gray(64, 64, |x, _| if x < 32 { 0 } else { 255 });
        let stats = compute_stats(&bytes).unwrap();
        assert!(stats.contrast > 0.9);
        assert!(stats.std_dev > 0.3);
    }

    #[test]
    fn corrupt_bytes_degrade_instead_of_failing() {
        let features = extract_features(b"definitely not an image", 53);
        assert!(!features.valid);
        assert_eq!(features.values.len(), 53);
        for v in &features.values {
            assert!((0.3..=0.7).contains(v));
        }
    }

    #[test]
    fn empty_bytes_degrade() {
        let features = extract_features(&[], 10);
        assert!(!features.valid);
        assert_eq!(features.values.len(), 10);
    }

    #[test]
    fn histogram_sums_to_one() {
        let bytes = encode_gray(64, 64, |x, y| ((x * y) % 255) as u8);
        let stats = compute_stats(&bytes).unwrap();
        let sum: f32 = stats.histogram.iter().sum();
        assert!((sum - 1.0).abs() < 0.001, "histogram sum {sum}");
    }

    #[test]
    fn large_target_pads_with_neutral_value() {
        let bytes = encode_gray(32, 32, |_, _| 50);
        let features = extract_features(&bytes, 200);
        // 5 stats + 32 bins + 16 texture = 53 real values, rest padded
        assert_eq!(features.values[53..], vec![0.5; 147][..]);
    }

    #[test]
    fn resample_preserves_endpoints() {
        let series = vec![0.0, 1.0, 2.0, 3.0];
        let out = resample_series(&series, 7);
        assert_eq!(out.len(), 7);
        assert!((out[0] - 0.0).abs() < 0.001);
        assert!((out[6] - 3.0).abs() < 0.001);
    }

    #[test]
    fn parse_series_skips_header() {
        let csv = b"sample,value\n0.1,0.2,0.3,0.4\n0.5,0.6,0.7,0.8\n";
        let series = parse_numeric_series(csv).unwrap();
        assert_eq!(series.len(), 8);
    }

    #[test]
    fn parse_series_rejects_short_input() {
        assert!(parse_numeric_series(b"1,2,3").is_none());
        assert!(parse_numeric_series(b"not numbers at all").is_none());
    }

    #[test]
    fn parse_feature_row_with_header() {
        let csv = b"Glucose,BMI,Age\n148,33.6,50\n";
        let (header, row) = parse_feature_row(csv).unwrap();
        assert_eq!(header, vec!["glucose", "bmi", "age"]);
        assert_eq!(row, vec![148.0, 33.6, 50.0]);
    }

    #[test]
    fn parse_feature_row_without_header() {
        let csv = b"6,148,72,35,0,33.6,0.627,50\n";
        let (header, row) = parse_feature_row(csv).unwrap();
        assert!(header.is_empty());
        assert_eq!(row.len(), 8);
    }

    #[test]
    fn parse_feature_row_keeps_categorical_columns_aligned() {
        let csv = b"gender,age,hypertension,avg_glucose_level,smoking_status\nMale,72,1,228.69,never smoked\n";
        let (header, row) = parse_feature_row(csv).unwrap();
        assert_eq!(header.len(), row.len());
        assert!(row[0].is_nan());
        assert_eq!(row[header.iter().position(|h| h == "age").unwrap()], 72.0);
        assert_eq!(
            row[header.iter().position(|h| h == "avg_glucose_level").unwrap()],
            228.69
        );
        assert!(row[4].is_nan());
    }

    #[test]
    fn parse_feature_row_rejects_all_categorical_rows() {
        let csv = b"gender,work_type\nFemale,Private\n";
        assert!(parse_feature_row(csv).is_none());
    }
}

//! Modality detection — a layered heuristic cascade.
//!
//! Priority order, short-circuiting on the first match:
//! symptom keywords → DICOM container sniffing → filename keywords →
//! tabular-signal sniffing → pixel geometry → optional learned classifier
//! → unknown. An explicit clinical hint always beats content signals, and
//! the detector never defaults silently to a clinical modality with no
//! supporting signal.

use tracing::debug;

use super::features;
use super::types::Modality;

// ═══════════════════════════════════════════════════════════
// Keyword tables
// ═══════════════════════════════════════════════════════════

const CARDIAC_TERMS: &[&str] = &[
    "palpitation",
    "ecg",
    "ekg",
    "arrhythmia",
    "irregular heartbeat",
    "racing heart",
    "skipped beat",
];

const NEURO_TERMS: &[&str] = &[
    "headache",
    "migraine",
    "seizure",
    "dizziness",
    "blurred vision",
    "numbness",
    "memory loss",
    "confusion",
];

const DERM_TERMS: &[&str] = &["rash", "mole", "itch", "skin", "dermat"];

const BREAST_TERMS: &[&str] = &["breast", "lump", "mammogram", "nipple"];

const RESPIRATORY_TERMS: &[&str] = &[
    "cough",
    "shortness of breath",
    "breathing",
    "chest pain",
    "pneumonia",
    "wheez",
];

const METABOLIC_TERMS: &[&str] = &[
    "diabet",
    "blood sugar",
    "glucose",
    "excessive thirst",
    "frequent urination",
];

const STROKE_TERMS: &[&str] = &[
    "stroke",
    "slurred speech",
    "face droop",
    "facial droop",
    "one-sided weakness",
];

/// CSV header columns that identify the structured lab/risk datasets
const DIABETES_COLUMNS: &[&str] = &[
    "pregnancies",
    "glucose",
    "bloodpressure",
    "skinthickness",
    "insulin",
    "bmi",
    "diabetespedigreefunction",
];
const STROKE_COLUMNS: &[&str] = &[
    "hypertension",
    "avg_glucose_level",
    "ever_married",
    "work_type",
    "smoking_status",
];
const HEART_COLUMNS: &[&str] = &["cp", "trestbps", "chol", "cholesterol", "thalach", "exang"];

// ═══════════════════════════════════════════════════════════
// Cascade
// ═══════════════════════════════════════════════════════════

/// Classify a file + symptom pair into a modality.
/// Deterministic given identical inputs.
pub fn detect(filename: &str, symptom_text: &str, bytes: &[u8]) -> Modality {
    if let Some(m) = detect_from_symptoms(symptom_text) {
        debug!(modality = %m, "modality from symptom keywords");
        return m;
    }
    if let Some(m) = sniff_dicom(bytes, filename) {
        debug!(modality = %m, "modality from DICOM container");
        return m;
    }
    if let Some(m) = match_filename(filename) {
        debug!(modality = %m, "modality from filename keywords");
        return m;
    }
    if let Some(m) = sniff_tabular(bytes) {
        debug!(modality = %m, "modality from tabular content");
        return m;
    }
    if let Some(m) = pixel_geometry(bytes) {
        debug!(modality = %m, "modality from pixel geometry");
        return m;
    }
    #[cfg(feature = "onnx-models")]
    if let Some(m) = learned::classify(bytes) {
        debug!(modality = %m, "modality from learned classifier");
        return m;
    }
    Modality::Unknown
}

/// Symptom-keyword override. Runs before any content-based detection so an
/// explicit clinical hint always wins.
pub fn detect_from_symptoms(symptom_text: &str) -> Option<Modality> {
    let text = symptom_text.trim().to_lowercase();
    if text.is_empty() {
        return None;
    }
    let groups: &[(&[&str], Modality)] = &[
        (CARDIAC_TERMS, Modality::Ecg),
        (NEURO_TERMS, Modality::BrainScan),
        (DERM_TERMS, Modality::Skin),
        (BREAST_TERMS, Modality::BreastCancer),
        (RESPIRATORY_TERMS, Modality::Xray),
        (METABOLIC_TERMS, Modality::Diabetes),
        (STROKE_TERMS, Modality::Stroke),
    ];
    for (terms, modality) in groups {
        if terms.iter().any(|t| text.contains(t)) {
            return Some(*modality);
        }
    }
    None
}

// ═══════════════════════════════════════════════════════════
// Binary format sniffing
// ═══════════════════════════════════════════════════════════

/// DICOM preamble is 128 bytes, followed by the "DICM" magic.
const DICOM_MAGIC_OFFSET: usize = 128;

/// Recognize a DICOM container and map its modality tag. A recognized
/// container with inconclusive tags is a generic structured image
/// (`Unknown`), never a guessed clinical modality — it short-circuits the
/// remaining filename/geometry heuristics.
fn sniff_dicom(bytes: &[u8], filename: &str) -> Option<Modality> {
    if bytes.len() < DICOM_MAGIC_OFFSET + 4
        || &bytes[DICOM_MAGIC_OFFSET..DICOM_MAGIC_OFFSET + 4] != b"DICM"
    {
        return None;
    }

    let header = &bytes[DICOM_MAGIC_OFFSET + 4..bytes.len().min(DICOM_MAGIC_OFFSET + 8192)];
    let brain_context = contains_ascii(header, b"BRAIN")
        || contains_ascii(header, b"HEAD")
        || filename_has_brain_context(filename);

    match dicom_modality_value(header).as_deref() {
        Some("MR") => Some(Modality::BrainScan),
        Some("CT") => {
            if brain_context {
                Some(Modality::BrainScan)
            } else {
                Some(Modality::Xray)
            }
        }
        Some("CR") | Some("DX") => Some(Modality::Xray),
        _ => {
            if contains_ascii(header, b"MRI") || brain_context {
                Some(Modality::BrainScan)
            } else if contains_ascii(header, b"CHEST") || contains_ascii(header, b"XRAY") {
                Some(Modality::Xray)
            } else {
                // Recognized container, inconclusive tags
                Some(Modality::Unknown)
            }
        }
    }
}

/// Locate the Modality tag (0008,0060) and read its CS value.
/// Handles both explicit-VR ("CS" + 2-byte length) and implicit-VR
/// (4-byte length) little-endian encodings.
fn dicom_modality_value(header: &[u8]) -> Option<String> {
    const TAG: [u8; 4] = [0x08, 0x00, 0x60, 0x00];
    let pos = header.windows(4).position(|w| w == TAG)?;

    let (value_start, value_len) = if header.get(pos + 4..pos + 6) == Some(b"CS".as_slice()) {
        let len = u16::from_le_bytes([*header.get(pos + 6)?, *header.get(pos + 7)?]) as usize;
        (pos + 8, len)
    } else {
        let len = u32::from_le_bytes([
            *header.get(pos + 4)?,
            *header.get(pos + 5)?,
            *header.get(pos + 6)?,
            *header.get(pos + 7)?,
        ]) as usize;
        (pos + 8, len)
    };

    let value = header.get(value_start..value_start + value_len.min(16))?;
    let text = std::str::from_utf8(value).ok()?.trim().to_uppercase();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn contains_ascii(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

// ═══════════════════════════════════════════════════════════
// Filename keywords
// ═══════════════════════════════════════════════════════════

fn filename_has_brain_context(filename: &str) -> bool {
    let name = filename.to_lowercase();
    name.contains("brain") || name.contains("head") || has_token(&name, "mri")
}

/// Ordered keyword table; first hit wins. Short ambiguous keys ("ct",
/// "t1") require a whole delimited token so "doctor.jpg" stays unmatched.
fn match_filename(filename: &str) -> Option<Modality> {
    let name = filename.to_lowercase();

    if name.contains("brain") || name.contains("mri") || has_token(&name, "t1") || name.contains("flair") {
        return Some(Modality::BrainScan);
    }
    if has_token(&name, "ct") {
        return Some(if filename_has_brain_context(&name) {
            Modality::BrainScan
        } else {
            Modality::Xray
        });
    }
    if name.contains("chest") || name.contains("xray") || name.contains("x-ray") {
        return Some(Modality::Xray);
    }
    if name.contains("ecg") || name.contains("ekg") || name.contains("waveform") {
        return Some(Modality::Ecg);
    }
    if name.contains("mamm") || name.contains("breast") {
        return Some(Modality::BreastCancer);
    }
    if name.contains("skin") || name.contains("derm") || name.contains("mole") || name.contains("lesion") {
        return Some(Modality::Skin);
    }
    if name.contains("diabet") {
        return Some(Modality::Diabetes);
    }
    if name.contains("stroke") {
        return Some(Modality::Stroke);
    }
    if name.contains("heart") || name.contains("cardiac") {
        return Some(Modality::HeartDisease);
    }
    if name.contains("report") || name.contains("transcription") {
        return Some(Modality::MedicalReport);
    }
    None
}

fn has_token(name: &str, token: &str) -> bool {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|seg| seg == token)
}

// ═══════════════════════════════════════════════════════════
// Tabular and text content
// ═══════════════════════════════════════════════════════════

/// Classify UTF-8 content: a known lab-dataset header routes to the
/// matching tabular modality, pure numeric CSV is waveform data, and
/// non-tabular prose is a free-text report.
fn sniff_tabular(bytes: &[u8]) -> Option<Modality> {
    let text = std::str::from_utf8(bytes).ok()?;
    let first_line = text.lines().find(|l| !l.trim().is_empty())?;

    if first_line.contains(',') {
        let columns: Vec<String> = first_line
            .split(',')
            .map(|c| c.trim().to_lowercase())
            .collect();
        let hits = |known: &[&str]| {
            columns
                .iter()
                .filter(|c| known.contains(&c.as_str()))
                .count()
        };
        if hits(DIABETES_COLUMNS) >= 2 {
            return Some(Modality::Diabetes);
        }
        if hits(STROKE_COLUMNS) >= 2 {
            return Some(Modality::Stroke);
        }
        if hits(HEART_COLUMNS) >= 2 {
            return Some(Modality::HeartDisease);
        }
    }

    if features::parse_numeric_series(bytes).is_some() {
        return Some(Modality::Ecg);
    }

    if looks_like_prose(text) {
        return Some(Modality::MedicalReport);
    }
    None
}

/// At least 80% printable characters, some whitespace structure, and
/// enough length to be a real document.
fn looks_like_prose(text: &str) -> bool {
    if text.len() < 40 || !text.contains(' ') {
        return false;
    }
    let printable = text
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .count();
    printable as f64 / text.chars().count().max(1) as f64 > 0.80
}

// ═══════════════════════════════════════════════════════════
// Pixel geometry
// ═══════════════════════════════════════════════════════════

/// Geometry heuristics for plain raster images: extreme aspect ratios are
/// waveform plots, near-square mid-luminance frames look like axial brain
/// slices, and moderate portrait frames look like radiographs.
fn pixel_geometry(bytes: &[u8]) -> Option<Modality> {
    let stats = features::compute_stats(bytes)?;
    let aspect = stats.width as f32 / stats.height as f32;

    if aspect > 3.0 || aspect < 1.0 / 3.0 {
        return Some(Modality::Ecg);
    }
    if (0.75..=1.33).contains(&aspect) && (0.2..=0.6).contains(&stats.mean) {
        return Some(Modality::BrainScan);
    }
    if stats.height > stats.width && aspect >= 0.5 {
        return Some(Modality::Xray);
    }
    None
}

// ═══════════════════════════════════════════════════════════
// Optional learned classifier — behind `onnx-models` feature
// ═══════════════════════════════════════════════════════════

#[cfg(feature = "onnx-models")]
mod learned {
    use image::imageops::FilterType;
    use ort::session::Session;
    use tracing::warn;

    use crate::config;
    use crate::pipeline::types::Modality;

    const INPUT_SIZE: u32 = 64;
    const CLASSES: [Modality; 5] = [
        Modality::BrainScan,
        Modality::Xray,
        Modality::Ecg,
        Modality::Skin,
        Modality::BreastCancer,
    ];

    /// Run the auxiliary modality classifier if one is present on disk.
    /// Any failure is a silent pass to the final `Unknown` fallback.
    pub fn classify(bytes: &[u8]) -> Option<Modality> {
        let path = config::modality_classifier_path();
        if !path.exists() {
            return None;
        }
        match run(bytes, &path) {
            Ok(m) => Some(m),
            Err(reason) => {
                warn!(%reason, "modality classifier failed, falling through");
                None
            }
        }
    }

    fn run(bytes: &[u8], path: &std::path::Path) -> Result<Modality, String> {
        let rgb = image::load_from_memory(bytes)
            .map_err(|e| e.to_string())?
            .resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::Triangle)
            .to_rgb8();

        // NCHW float tensor, [0,1]
        let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize));
        for (x, y, pixel) in rgb.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = pixel.0[c] as f32 / 255.0;
            }
        }

        let mut session = Session::builder()
            .map_err(|e| e.to_string())?
            .commit_from_file(path)
            .map_err(|e| e.to_string())?;

        let input = ort::value::TensorRef::from_array_view(&tensor).map_err(|e| e.to_string())?;
        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| e.to_string())?;
        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| e.to_string())?;

        let argmax = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .ok_or_else(|| "empty classifier output".to_string())?;

        Ok(CLASSES.get(argmax).copied().unwrap_or(Modality::Unknown))
    }
}

//! Rule-based fallback analysis.
//!
//! The last tier in the pipeline: deterministic heuristics over raw file
//! content and symptom text. Always produces at least one finding so the
//! caller never receives an empty result. Scores are transparent additive
//! weights over the image statistics in [`super::features`], parsed
//! waveform irregularity, or clinical cutoffs on tabular rows.

use tracing::debug;

use super::features;
use super::types::{Finding, Modality};

/// Analyze a file with deterministic heuristics. Never fails and never
/// returns an empty vector; output is sorted by descending confidence.
pub fn analyze(modality: Modality, bytes: &[u8], symptom_text: &str) -> Vec<Finding> {
    let symptoms = symptom_text.to_lowercase();
    let mut findings = match modality {
        Modality::BrainScan => brain_findings(bytes, &symptoms),
        Modality::Xray => xray_findings(bytes, &symptoms),
        Modality::Ecg => ecg_findings(bytes, &symptoms),
        Modality::Skin => skin_findings(bytes),
        Modality::BreastCancer => breast_findings(bytes),
        Modality::Diabetes => diabetes_findings(bytes),
        Modality::Stroke => stroke_findings(bytes),
        Modality::HeartDisease => heart_findings(bytes),
        Modality::MedicalReport => report_findings(bytes),
        Modality::Unknown => generic_findings(),
    };

    if findings.is_empty() {
        findings = generic_findings();
    }
    for f in &mut findings {
        f.confidence = f.confidence.clamp(0.0, 1.0);
    }
    findings.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    debug!(%modality, count = findings.len(), "rule-based findings");
    findings
}

// ═══════════════════════════════════════════════════════════════════
// Image heuristics
// ═══════════════════════════════════════════════════════════════════

fn brain_findings(bytes: &[u8], symptoms: &str) -> Vec<Finding> {
    let Some(stats) = features::compute_stats(bytes) else {
        return undecodable_image_findings();
    };

    // Tumor tissue shows as bright, high-contrast regions against the
    // parenchyma: weight contrast and intensity spread heaviest.
    let mut score = 0.30 * stats.contrast
        + 0.25 * stats.histogram_dispersion()
        + 0.20 * stats.max
        + 0.25 * (stats.std_dev * 2.0).clamp(0.0, 1.0);

    if has_any(symptoms, &["headache", "seizure", "vision", "numbness"]) {
        score += 0.25;
    }
    let score = score.min(1.0);

    if score >= 0.75 {
        vec![
            Finding::new("High-grade tumor pattern suspected", score),
            Finding::new("Requires urgent radiologist review", 0.9),
        ]
    } else if score >= 0.55 {
        vec![
            Finding::new("Low-grade tumor pattern possible", score),
            Finding::new("Follow-up imaging recommended", 0.6),
        ]
    } else if score >= 0.40 {
        vec![
            Finding::new("Indeterminate mass effect", score),
            Finding::new("Normal brain scan", 1.0 - score),
        ]
    } else {
        vec![
            Finding::new("Normal brain scan", 1.0 - score),
            Finding::new("Tumor pattern", score),
        ]
    }
}

fn xray_findings(bytes: &[u8], symptoms: &str) -> Vec<Finding> {
    let Some(stats) = features::compute_stats(bytes) else {
        return undecodable_image_findings();
    };

    // Consolidation raises mid-range opacity: bright mean with low
    // dispersion reads as infiltrate rather than aerated lung.
    let mut opacity = 0.5 * stats.mean + 0.3 * (1.0 - stats.histogram_dispersion())
        + 0.2 * (1.0 - stats.contrast);

    if has_any(symptoms, &["cough", "fever", "breath", "chest pain"]) {
        opacity += 0.2;
    }
    let opacity = opacity.min(1.0);

    if opacity >= 0.6 {
        vec![
            Finding::new("Pneumonia pattern", opacity),
            Finding::new("Clear lung fields", 1.0 - opacity),
        ]
    } else {
        vec![
            Finding::new("Clear lung fields", 1.0 - opacity),
            Finding::new("Pneumonia pattern", opacity),
        ]
    }
}

fn skin_findings(bytes: &[u8]) -> Vec<Finding> {
    let Some(stats) = features::compute_stats(bytes) else {
        return undecodable_image_findings();
    };

    // Atypia proxy: dark pigment with irregular intensity spread
    let atypia = (0.4 * (1.0 - stats.mean)
        + 0.35 * stats.histogram_dispersion()
        + 0.25 * stats.contrast)
        .min(1.0);

    if atypia >= 0.6 {
        vec![
            Finding::new("Atypical lesion features", atypia),
            Finding::new("Benign lesion", 1.0 - atypia),
        ]
    } else {
        vec![
            Finding::new("Benign lesion", 1.0 - atypia),
            Finding::new("Atypical lesion features", atypia),
        ]
    }
}

fn breast_findings(bytes: &[u8]) -> Vec<Finding> {
    let Some(stats) = features::compute_stats(bytes) else {
        return undecodable_image_findings();
    };

    // Dense or calcified tissue is bright and locally varied
    let texture_mean = if stats.texture.is_empty() {
        0.0
    } else {
        stats.texture.iter().sum::<f32>() / stats.texture.len() as f32
    };
    let density = (0.4 * stats.mean + 0.35 * texture_mean + 0.25 * stats.contrast).min(1.0);

    if density >= 0.6 {
        vec![
            Finding::new("Dense tissue, further imaging advised", density),
            Finding::new("No suspicious mass", 1.0 - density),
        ]
    } else {
        vec![
            Finding::new("No suspicious mass", 1.0 - density),
            Finding::new("Dense tissue regions", density),
        ]
    }
}

fn undecodable_image_findings() -> Vec<Finding> {
    vec![
        Finding::new("Image could not be decoded", 0.5),
        Finding::new("Requires clinical review", 0.4),
    ]
}

// ═══════════════════════════════════════════════════════════════════
// Waveform heuristics
// ═══════════════════════════════════════════════════════════════════

fn ecg_findings(bytes: &[u8], symptoms: &str) -> Vec<Finding> {
    let Some(series) = features::parse_numeric_series(bytes) else {
        // ECG strips arrive as rendered images too
        if features::compute_stats(bytes).is_some() {
            return vec![
                Finding::new("ECG strip received, waveform not machine-readable", 0.5),
                Finding::new("Requires clinical review", 0.4),
            ];
        }
        return undecodable_image_findings();
    };

    // Beat-to-beat irregularity: mean absolute successive difference,
    // scaled against the signal's own amplitude.
    let amplitude = series
        .iter()
        .cloned()
        .fold(f32::MIN, f32::max)
        - series.iter().cloned().fold(f32::MAX, f32::min);
    let diffs: f32 = series.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    let mean_diff = diffs / (series.len() - 1) as f32;
    let mut irregularity = if amplitude > f32::EPSILON {
        (mean_diff / amplitude * 4.0).min(1.0)
    } else {
        0.0
    };

    if has_any(symptoms, &["palpitation", "racing", "skipped", "irregular"]) {
        irregularity = (irregularity + 0.15).min(1.0);
    }

    if irregularity >= 0.5 {
        vec![
            Finding::new("Irregular rhythm", irregularity),
            Finding::new("Normal sinus rhythm", 1.0 - irregularity),
        ]
    } else {
        vec![
            Finding::new("Normal sinus rhythm", 1.0 - irregularity),
            Finding::new("Irregular rhythm", irregularity),
        ]
    }
}

// ═══════════════════════════════════════════════════════════════════
// Tabular clinical cutoffs
// ═══════════════════════════════════════════════════════════════════

/// Pull a column by header name, or fall back to a positional index for
/// headerless rows in the conventional column order. Non-finite values
/// are categorical placeholders and read as missing.
fn column(header: &[String], row: &[f32], name: &str, position: usize) -> Option<f32> {
    let value = if header.is_empty() {
        row.get(position).copied()
    } else {
        header
            .iter()
            .position(|h| h.contains(name))
            .and_then(|i| row.get(i))
            .copied()
    };
    value.filter(|v| v.is_finite())
}

fn diabetes_findings(bytes: &[u8]) -> Vec<Finding> {
    let Some((header, row)) = features::parse_feature_row(bytes) else {
        return unparseable_tabular_findings();
    };

    // Conventional order: pregnancies, glucose, blood pressure, skin
    // thickness, insulin, bmi, pedigree, age
    let mut risk = 0.1f32;
    if column(&header, &row, "glucose", 1).is_some_and(|g| g >= 140.0) {
        risk += 0.3;
    }
    if column(&header, &row, "bmi", 5).is_some_and(|b| b >= 30.0) {
        risk += 0.2;
    }
    if column(&header, &row, "age", 7).is_some_and(|a| a >= 45.0) {
        risk += 0.1;
    }
    if column(&header, &row, "pressure", 2).is_some_and(|p| p >= 90.0) {
        risk += 0.1;
    }
    if column(&header, &row, "pedigree", 6).is_some_and(|p| p >= 0.6) {
        risk += 0.1;
    }
    let risk = risk.min(1.0);

    if risk >= 0.5 {
        vec![
            Finding::new("Elevated diabetes risk", risk),
            Finding::new("No diabetes indicators", 1.0 - risk),
        ]
    } else {
        vec![
            Finding::new("No diabetes indicators", 1.0 - risk),
            Finding::new("Diabetes risk factors present", risk),
        ]
    }
}

fn stroke_findings(bytes: &[u8]) -> Vec<Finding> {
    let Some((header, row)) = features::parse_feature_row(bytes) else {
        return unparseable_tabular_findings();
    };

    let mut risk = 0.1f32;
    if column(&header, &row, "age", 0).is_some_and(|a| a >= 60.0) {
        risk += 0.25;
    }
    if column(&header, &row, "hypertension", 1).is_some_and(|h| h >= 1.0) {
        risk += 0.2;
    }
    if column(&header, &row, "heart_disease", 2).is_some_and(|h| h >= 1.0) {
        risk += 0.15;
    }
    if column(&header, &row, "glucose", 3).is_some_and(|g| g >= 170.0) {
        risk += 0.15;
    }
    if column(&header, &row, "bmi", 4).is_some_and(|b| b >= 30.0) {
        risk += 0.1;
    }
    let risk = risk.min(1.0);

    if risk >= 0.5 {
        vec![
            Finding::new("Elevated stroke risk", risk),
            Finding::new("Low stroke risk", 1.0 - risk),
        ]
    } else {
        vec![
            Finding::new("Low stroke risk", 1.0 - risk),
            Finding::new("Stroke risk factors present", risk),
        ]
    }
}

fn heart_findings(bytes: &[u8]) -> Vec<Finding> {
    let Some((header, row)) = features::parse_feature_row(bytes) else {
        return unparseable_tabular_findings();
    };

    let mut risk = 0.1f32;
    if column(&header, &row, "age", 0).is_some_and(|a| a >= 55.0) {
        risk += 0.2;
    }
    if column(&header, &row, "chol", 4).is_some_and(|c| c >= 240.0) {
        risk += 0.2;
    }
    if column(&header, &row, "trestbps", 3).is_some_and(|p| p >= 140.0) {
        risk += 0.15;
    }
    if column(&header, &row, "thalach", 7).is_some_and(|t| t > 0.0 && t < 120.0) {
        risk += 0.15;
    }
    if column(&header, &row, "oldpeak", 9).is_some_and(|o| o >= 2.0) {
        risk += 0.15;
    }
    let risk = risk.min(1.0);

    if risk >= 0.5 {
        vec![
            Finding::new("Elevated cardiac risk", risk),
            Finding::new("Low cardiac risk", 1.0 - risk),
        ]
    } else {
        vec![
            Finding::new("Low cardiac risk", 1.0 - risk),
            Finding::new("Cardiac risk factors present", risk),
        ]
    }
}

fn unparseable_tabular_findings() -> Vec<Finding> {
    vec![
        Finding::new("Structured data could not be parsed", 0.5),
        Finding::new("Requires clinical review", 0.4),
    ]
}

// ═══════════════════════════════════════════════════════════════════
// Text heuristics
// ═══════════════════════════════════════════════════════════════════

const CRITICAL_REPORT_TERMS: &[&str] = &[
    "malignan",
    "carcinoma",
    "tumor",
    "metasta",
    "hemorrhage",
    "fracture",
    "abnormal",
    "urgent",
    "critical",
];

const REASSURING_REPORT_TERMS: &[&str] =
    &["unremarkable", "no acute", "within normal", "benign", "stable"];

fn report_findings(bytes: &[u8]) -> Vec<Finding> {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return vec![
            Finding::new("Report text could not be decoded", 0.5),
            Finding::new("Requires clinical review", 0.4),
        ];
    };
    let text = text.to_lowercase();

    let critical = CRITICAL_REPORT_TERMS
        .iter()
        .filter(|t| text.contains(**t))
        .count();
    let reassuring = REASSURING_REPORT_TERMS
        .iter()
        .filter(|t| text.contains(**t))
        .count();

    if critical > reassuring {
        let conf = (0.5 + 0.15 * critical as f32).min(0.95);
        vec![
            Finding::new("Critical terms present in report", conf),
            Finding::new("Requires physician review", 0.8),
        ]
    } else if reassuring > 0 {
        let conf = (0.5 + 0.15 * reassuring as f32).min(0.95);
        vec![
            Finding::new("No acute findings reported", conf),
            Finding::new("Routine follow-up", 0.5),
        ]
    } else {
        vec![
            Finding::new("Report reviewed, no keyword matches", 0.4),
            Finding::new("Requires clinical review", 0.35),
        ]
    }
}

fn generic_findings() -> Vec<Finding> {
    vec![
        Finding::new("Analysis complete", 0.4),
        Finding::new("Requires clinical review", 0.3),
    ]
}

fn has_any(text: &str, terms: &[&str]) -> bool {
    terms.iter().any(|t| text.contains(t))
}

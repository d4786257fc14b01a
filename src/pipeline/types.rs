use std::fmt;

use serde::{Deserialize, Serialize};

/// An uploaded file handed to the pipeline. Immutable, caller-owned —
/// no stage mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalFile {
    pub name: String,
    #[serde(with = "serde_bytes_vec")]
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Bytes serialize as a plain u8 array; the presentation layer sends them
/// base64-decoded before they reach this crate.
mod serde_bytes_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        Vec::<u8>::deserialize(d)
    }
}

/// Closed set of clinical modalities the detector can assign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    BrainScan,
    Xray,
    Ecg,
    Skin,
    BreastCancer,
    Diabetes,
    Stroke,
    HeartDisease,
    MedicalReport,
    Unknown,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BrainScan => "brain_scan",
            Self::Xray => "xray",
            Self::Ecg => "ecg",
            Self::Skin => "skin",
            Self::BreastCancer => "breast_cancer",
            Self::Diabetes => "diabetes",
            Self::Stroke => "stroke",
            Self::HeartDisease => "heart_disease",
            Self::MedicalReport => "medical_report",
            Self::Unknown => "unknown",
        }
    }

    /// Human-readable display title for structured summaries
    pub fn display_title(&self) -> &'static str {
        match self {
            Self::BrainScan => "Brain Scan Analysis",
            Self::Xray => "Chest X-Ray Analysis",
            Self::Ecg => "ECG Analysis",
            Self::Skin => "Skin Lesion Analysis",
            Self::BreastCancer => "Breast Imaging Analysis",
            Self::Diabetes => "Diabetes Risk Assessment",
            Self::Stroke => "Stroke Risk Assessment",
            Self::HeartDisease => "Cardiac Risk Assessment",
            Self::MedicalReport => "Medical Report Analysis",
            Self::Unknown => "General Medical Analysis",
        }
    }

    /// Modalities whose primary signal is a raster image
    pub fn is_image_based(&self) -> bool {
        matches!(
            self,
            Self::BrainScan | Self::Xray | Self::Skin | Self::BreastCancer
        )
    }

    /// Modalities whose primary signal is a structured feature row
    pub fn is_tabular(&self) -> bool {
        matches!(self, Self::Diabetes | Self::Stroke | Self::HeartDisease)
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single labeled, confidence-scored candidate interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub label: String,
    pub confidence: f32,
}

impl Finding {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// Coarse severity bucket derived from the top finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Moderate,
    High,
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Moderate => write!(f, "moderate"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Which analysis tier produced the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisMethod {
    #[serde(rename = "model")]
    Model,
    #[serde(rename = "dataset")]
    Dataset,
    #[serde(rename = "rule-based")]
    RuleBased,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for AnalysisMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Model => write!(f, "model"),
            Self::Dataset => write!(f, "dataset"),
            Self::RuleBased => write!(f, "rule-based"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Canonical analysis result — created once per request, never mutated
/// after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub modality: Modality,
    pub summary: String,
    pub findings: Vec<Finding>,
    pub risk: RiskTier,
    pub analysis_method: AnalysisMethod,
    pub prediction: String,
    /// Top-finding confidence rendered as "NN.NN%"
    pub confidence: String,
    pub patient_summary: String,
    pub clinical_note: String,
}

/// Tagged union covering every raw shape a tier can produce. The formatter
/// normalizes it immediately — nothing downstream branches on shape.
#[derive(Debug, Clone)]
pub enum AnalysisOutcome {
    /// Pre-scored findings from the dataset or rule tier
    Findings {
        modality: Modality,
        method: AnalysisMethod,
        findings: Vec<Finding>,
    },
    /// Raw model output scores paired with class labels
    Logits {
        modality: Modality,
        labels: Vec<String>,
        logits: Vec<f32>,
    },
    /// Already-canonical result — formatting is a no-op
    Canonical(AnalysisResult),
}

/// Modality-specific structured summary attached at the `Formatted` state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredSummary {
    pub title: String,
    pub modality: Modality,
    pub key_findings: Vec<String>,
    pub recommendations: Vec<String>,
    pub summary_text: String,
}

/// Input contract consumed from the presentation/storage layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub file: MedicalFile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symptoms: Option<String>,
}

/// Output contract produced for the presentation/storage layer. On total
/// failure the boundary still returns `{success: false, error, ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<StructuredSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub processing_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modality_wire_names_are_snake_case() {
        assert_eq!(
            serde_json::to_string(&Modality::BrainScan).unwrap(),
            "\"brain_scan\""
        );
        assert_eq!(
            serde_json::to_string(&Modality::BreastCancer).unwrap(),
            "\"breast_cancer\""
        );
        assert_eq!(serde_json::to_string(&Modality::Xray).unwrap(), "\"xray\"");
    }

    #[test]
    fn modality_display_matches_as_str() {
        for m in [
            Modality::BrainScan,
            Modality::Ecg,
            Modality::HeartDisease,
            Modality::Unknown,
        ] {
            assert_eq!(format!("{m}"), m.as_str());
        }
    }

    #[test]
    fn analysis_method_wire_names() {
        assert_eq!(
            serde_json::to_string(&AnalysisMethod::RuleBased).unwrap(),
            "\"rule-based\""
        );
        assert_eq!(
            serde_json::to_string(&AnalysisMethod::Model).unwrap(),
            "\"model\""
        );
    }

    #[test]
    fn risk_tier_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&RiskTier::High).unwrap(), "\"high\"");
        assert_eq!(
            serde_json::to_string(&RiskTier::Moderate).unwrap(),
            "\"moderate\""
        );
    }

    #[test]
    fn result_serializes_camel_case() {
        let result = AnalysisResult {
            modality: Modality::BrainScan,
            summary: "s".into(),
            findings: vec![Finding::new("Normal brain scan", 0.9)],
            risk: RiskTier::Low,
            analysis_method: AnalysisMethod::RuleBased,
            prediction: "Normal brain scan".into(),
            confidence: "90.00%".into(),
            patient_summary: "p".into(),
            clinical_note: "c".into(),
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"analysisMethod\":\"rule-based\""));
        assert!(json.contains("\"patientSummary\""));
        assert!(json.contains("\"clinicalNote\""));
    }

    #[test]
    fn response_omits_absent_fields() {
        let resp = AnalysisResponse {
            success: false,
            analysis: None,
            summary: None,
            error: Some("boom".into()),
            processing_time_ms: 12,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("\"analysis\""));
        assert!(json.contains("\"error\":\"boom\""));
        assert!(json.contains("\"processingTimeMs\":12"));
    }

    #[test]
    fn request_round_trips() {
        let req = AnalysisRequest {
            file: MedicalFile {
                name: "scan.jpg".into(),
                bytes: vec![1, 2, 3],
                mime_type: "image/jpeg".into(),
            },
            symptoms: Some("headache".into()),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"mimeType\":\"image/jpeg\""));
        let back: AnalysisRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.file.bytes, vec![1, 2, 3]);
        assert_eq!(back.symptoms.as_deref(), Some("headache"));
    }
}

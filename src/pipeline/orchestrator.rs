//! Pipeline orchestrator.
//!
//! Ties the stages together for one request: detect the modality, then
//! walk the analysis tiers in fixed order — trained model, reference
//! dataset similarity, rule-based heuristics — taking the first outcome
//! and normalizing it. Tier failures are routing signals; the rule tier
//! is infallible, so every well-formed request yields a result. Only a
//! panic in the analysis task crosses the `{success: false}` boundary.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::datasets::DatasetCatalog;
use super::error::{AnalysisError, RegistryError, TierFailure};
use super::features;
use super::format;
use super::modality;
use super::registry::ModelRegistry;
use super::rules;
use super::types::{
    AnalysisMethod, AnalysisOutcome, AnalysisRequest, AnalysisResponse, AnalysisResult, Finding,
    Modality, RiskTier, StructuredSummary,
};

/// Dataset-tier matches below this confidence fall through to rules.
/// Base-score-only matches (no symptom term hit) land at 0.3 and are
/// rejected; a single term association clears it.
pub const DATASET_MIN_CONFIDENCE: f32 = 0.35;

/// How many dataset matches to keep per request
const DATASET_MAX_RESULTS: usize = 5;

pub struct Orchestrator {
    registry: Arc<ModelRegistry>,
    catalog: Arc<DatasetCatalog>,
}

impl Orchestrator {
    pub fn new(registry: Arc<ModelRegistry>, catalog: Arc<DatasetCatalog>) -> Self {
        Self { registry, catalog }
    }

    /// Orchestrator backed by the on-disk model and dataset directories.
    pub fn with_defaults() -> Self {
        Self::new(
            Arc::new(ModelRegistry::with_default_loader()),
            Arc::new(DatasetCatalog::with_default_dir()),
        )
    }

    /// Analyze one uploaded file. Always returns a response; failure is
    /// expressed as `{success: false, error}` with timing attached. The
    /// CPU-bound pipeline runs on the blocking pool so image decoding and
    /// inference never stall the async runtime.
    pub async fn analyze(&self, request: AnalysisRequest) -> AnalysisResponse {
        let request_id = Uuid::new_v4();
        let span = info_span!("analyze", %request_id, file = %request.file.name);
        self.analyze_inner(request).instrument(span).await
    }

    async fn analyze_inner(&self, request: AnalysisRequest) -> AnalysisResponse {
        let started = Instant::now();

        let registry = Arc::clone(&self.registry);
        let catalog = Arc::clone(&self.catalog);
        // Blocking-pool threads are outside the request span; re-enter it
        // so pipeline events stay correlated with the request id.
        let span = tracing::Span::current();
        let outcome = tokio::task::spawn_blocking(move || {
            let _guard = span.enter();
            run_pipeline(&registry, &catalog, &request)
        })
        .await
        .map_err(|e| AnalysisError::Task(e.to_string()))
        .and_then(|r| r);

        let (analysis, summary, error) = match outcome {
            Ok(result) => {
                info!(
                    modality = %result.modality,
                    method = %result.analysis_method,
                    risk = %result.risk,
                    "analysis complete"
                );
                let summary = build_summary(&result);
                (Some(result), Some(summary), None)
            }
            Err(err) => {
                warn!(error = %err, "analysis failed");
                (None, None, Some(err.to_string()))
            }
        };

        AnalysisResponse {
            success: error.is_none(),
            analysis,
            summary,
            error,
            processing_time_ms: started.elapsed().as_millis() as u64,
        }
    }
}

fn run_pipeline(
    registry: &ModelRegistry,
    catalog: &DatasetCatalog,
    request: &AnalysisRequest,
) -> Result<AnalysisResult, AnalysisError> {
    let symptoms = request.symptoms.as_deref().unwrap_or("");
    // Symptom keywords are the detector's first cascade step, so an
    // Unknown result already means symptoms carried no signal either —
    // no separate retry pass is needed.
    let detected = modality::detect(&request.file.name, symptoms, &request.file.bytes);
    info!(modality = %detected, "modality detected");

    let outcome = match model_tier(registry, detected, &request.file.bytes) {
        Ok(outcome) => outcome,
        Err(reason) => {
            info!(%reason, "model tier declined, trying dataset similarity");
            match dataset_tier(catalog, detected, symptoms) {
                Ok(outcome) => outcome,
                Err(reason) => {
                    info!(%reason, "dataset tier declined, using rule-based analysis");
                    AnalysisOutcome::Findings {
                        modality: detected,
                        method: AnalysisMethod::RuleBased,
                        findings: rules::analyze(detected, &request.file.bytes, symptoms),
                    }
                }
            }
        }
    };

    Ok(format::format(outcome))
}

/// Tier 1: trained classifier via the registry.
fn model_tier(
    registry: &ModelRegistry,
    detected: Modality,
    bytes: &[u8],
) -> Result<AnalysisOutcome, TierFailure> {
    if detected == Modality::Unknown {
        return Err(TierFailure::Unavailable(
            "no modality assigned".to_string(),
        ));
    }

    let entry = registry.get_or_load(detected).map_err(|e| match e {
        RegistryError::NotAvailable(_) => TierFailure::Unavailable(e.to_string()),
        other => TierFailure::Failed(other.to_string()),
    })?;

    let features = if detected == Modality::Ecg {
        match features::parse_numeric_series(bytes) {
            Some(series) => features::resample_series(&series, entry.input_dimension()),
            None => {
                let extracted = features::extract_features(bytes, entry.input_dimension());
                if !extracted.valid {
                    return Err(TierFailure::Degraded(
                        "waveform neither parseable nor decodable".to_string(),
                    ));
                }
                extracted.values
            }
        }
    } else if detected.is_tabular() {
        match features::parse_feature_row(bytes) {
            Some((_, mut row)) => {
                // Categorical placeholders must not reach the session
                for v in &mut row {
                    if !v.is_finite() {
                        *v = 0.0;
                    }
                }
                row.resize(entry.input_dimension(), 0.0);
                row
            }
            None => {
                return Err(TierFailure::Degraded(
                    "feature row could not be parsed".to_string(),
                ))
            }
        }
    } else {
        let extracted = features::extract_features(bytes, entry.input_dimension());
        if !extracted.valid {
            return Err(TierFailure::Degraded(
                "image could not be decoded".to_string(),
            ));
        }
        extracted.values
    };

    let logits = entry
        .infer(&features)
        .map_err(|e| TierFailure::Failed(e.to_string()))?;

    Ok(AnalysisOutcome::Logits {
        modality: detected,
        labels: entry.labels().to_vec(),
        logits,
    })
}

/// Tier 2: symptom similarity against the reference dataset catalog.
fn dataset_tier(
    catalog: &DatasetCatalog,
    detected: Modality,
    symptoms: &str,
) -> Result<AnalysisOutcome, TierFailure> {
    let findings: Vec<Finding> = catalog
        .find_matches(symptoms, DATASET_MAX_RESULTS)
        .into_iter()
        .filter(|f| f.confidence >= DATASET_MIN_CONFIDENCE)
        .collect();

    if findings.is_empty() {
        return Err(TierFailure::NoMatches);
    }

    Ok(AnalysisOutcome::Findings {
        modality: detected,
        method: AnalysisMethod::Dataset,
        findings,
    })
}

/// Render the modality-specific structured summary from a canonical result.
fn build_summary(result: &AnalysisResult) -> StructuredSummary {
    let key_findings = result
        .findings
        .iter()
        .take(3)
        .map(|f| format!("{} ({:.1}%)", f.label, f.confidence * 100.0))
        .collect();

    StructuredSummary {
        title: result.modality.display_title().to_string(),
        modality: result.modality,
        key_findings,
        recommendations: recommendations(result.modality, result.risk),
        summary_text: result.summary.clone(),
    }
}

fn recommendations(modality: Modality, risk: RiskTier) -> Vec<String> {
    let items: &[&str] = match (modality, risk) {
        (Modality::BrainScan, RiskTier::High) => &[
            "Consult a neurologist or neurosurgeon urgently",
            "Bring prior imaging for comparison",
            "Do not delay follow-up",
        ],
        (Modality::BrainScan, RiskTier::Moderate) => &[
            "Schedule a neurology consultation",
            "Repeat imaging may be recommended",
        ],
        (Modality::BrainScan, RiskTier::Low) => &[
            "No urgent action indicated",
            "Keep routine follow-up appointments",
        ],
        (Modality::Xray, RiskTier::High) => &[
            "Seek medical care promptly",
            "A physician should review the radiograph",
        ],
        (Modality::Xray, _) => &[
            "Discuss the result at your next visit",
            "Return if breathing symptoms worsen",
        ],
        (Modality::Ecg, RiskTier::High) => &[
            "Consult a cardiologist promptly",
            "Seek immediate care for chest pain or fainting",
        ],
        (Modality::Ecg, _) => &[
            "Discuss the recording with your doctor",
            "Note when symptoms occur relative to activity",
        ],
        (Modality::Skin, RiskTier::High) => &[
            "See a dermatologist for biopsy evaluation",
            "Photograph the lesion to track changes",
        ],
        (Modality::Skin, _) => &[
            "Monitor the lesion for changes in size or color",
            "Use sun protection",
        ],
        (Modality::BreastCancer, RiskTier::High) => &[
            "Arrange diagnostic follow-up imaging promptly",
            "Discuss biopsy options with your physician",
        ],
        (Modality::BreastCancer, _) => &["Continue routine screening as scheduled"],
        (Modality::Diabetes | Modality::Stroke | Modality::HeartDisease, RiskTier::High) => &[
            "Schedule a medical review of these risk factors",
            "Lifestyle changes can reduce risk substantially",
        ],
        (Modality::Diabetes | Modality::Stroke | Modality::HeartDisease, _) => &[
            "Maintain regular checkups",
            "Keep monitoring the relevant values",
        ],
        (Modality::MedicalReport, RiskTier::High) => &[
            "Review the flagged terms with your physician promptly",
        ],
        (Modality::MedicalReport, _) => &["File the report with your medical records"],
        (Modality::Unknown, _) => &[
            "Have a clinician review this file",
            "Provide symptoms for a more targeted analysis",
        ],
    };
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::error::RegistryError;
    use crate::pipeline::features::tests::encode_gray;
    use crate::pipeline::registry::{MockBackend, ModelEntry, ModelLoader};
    use crate::pipeline::types::MedicalFile;
    use std::path::PathBuf;

    struct NoModels;

    impl ModelLoader for NoModels {
        fn load(&self, modality: Modality) -> Result<ModelEntry, RegistryError> {
            Err(RegistryError::NotAvailable(modality))
        }
    }

    struct CannedModels {
        scores: Vec<f32>,
    }

    impl ModelLoader for CannedModels {
        fn load(&self, modality: Modality) -> Result<ModelEntry, RegistryError> {
            Ok(ModelEntry::new(
                modality,
                Box::new(MockBackend::new(modality, self.scores.clone())),
            ))
        }
    }

    fn orchestrator(loader: impl ModelLoader + 'static) -> Orchestrator {
        Orchestrator::new(
            Arc::new(ModelRegistry::new(Box::new(loader))),
            Arc::new(DatasetCatalog::new(PathBuf::from("/nonexistent"))),
        )
    }

    fn request(name: &str, bytes: Vec<u8>, symptoms: Option<&str>) -> AnalysisRequest {
        AnalysisRequest {
            file: MedicalFile {
                name: name.to_string(),
                bytes,
                mime_type: "application/octet-stream".to_string(),
            },
            symptoms: symptoms.map(str::to_string),
        }
    }

    // ── Tier fallthrough ─────────────────────────────────────

    #[tokio::test]
    async fn normal_scan_without_models_falls_to_rules() {
        let orch = orchestrator(NoModels);
        let bytes = encode_gray(64, 64, |_, _| 90);
        let response = orch
            .analyze(request("brain_scan_no_tumor.jpg", bytes, None))
            .await;

        assert!(response.success);
        let analysis = response.analysis.unwrap();
        assert_eq!(analysis.modality, Modality::BrainScan);
        assert_eq!(analysis.analysis_method, AnalysisMethod::RuleBased);
        assert_eq!(analysis.prediction, "Normal brain scan");
        assert_eq!(analysis.risk, RiskTier::Low);
        assert!(response.summary.is_some());
    }

    #[tokio::test]
    async fn red_flag_symptoms_route_through_dataset_tier() {
        let orch = orchestrator(NoModels);
        let bytes = encode_gray(64, 64, |_, _| 90);
        let response = orch
            .analyze(request(
                "scan.jpg",
                bytes,
                Some("severe headache and blurred vision"),
            ))
            .await;

        assert!(response.success);
        let analysis = response.analysis.unwrap();
        assert_eq!(analysis.modality, Modality::BrainScan);
        assert_eq!(analysis.analysis_method, AnalysisMethod::Dataset);
        // red-flag boost excludes reassuring matches and elevates risk
        assert!(analysis.findings.iter().all(|f| f.label != "No tumor"));
        assert_ne!(analysis.risk, RiskTier::Low);
    }

    #[tokio::test]
    async fn model_tier_wins_when_a_model_is_available() {
        let orch = orchestrator(CannedModels {
            scores: vec![4.0, 0.5, 0.3, 0.2],
        });
        let bytes = encode_gray(64, 64, |_, _| 90);
        let response = orch
            .analyze(request("brain_mri.png", bytes, Some("routine checkup")))
            .await;

        assert!(response.success);
        let analysis = response.analysis.unwrap();
        assert_eq!(analysis.analysis_method, AnalysisMethod::Model);
        assert_eq!(analysis.prediction, "No tumor");
        assert_eq!(analysis.risk, RiskTier::Low);
    }

    #[tokio::test]
    async fn corrupt_image_skips_model_tier_but_still_succeeds() {
        let orch = orchestrator(CannedModels {
            scores: vec![4.0, 0.5, 0.3, 0.2],
        });
        let response = orch
            .analyze(request(
                "brain_mri.jpg",
                b"not an image at all".to_vec(),
                None,
            ))
            .await;

        assert!(response.success);
        let analysis = response.analysis.unwrap();
        // degraded input must never reach the model
        assert_ne!(analysis.analysis_method, AnalysisMethod::Model);
        assert!(!analysis.findings.is_empty());
    }

    #[tokio::test]
    async fn vague_symptoms_fall_past_dataset_tier() {
        let orch = orchestrator(NoModels);
        let bytes = encode_gray(64, 64, |_, _| 90);
        let response = orch
            .analyze(request(
                "brain_scan.jpg",
                bytes,
                Some("feeling generally unwell"),
            ))
            .await;

        // base-score-only dataset matches sit below the cutoff
        let analysis = response.analysis.unwrap();
        assert_eq!(analysis.analysis_method, AnalysisMethod::RuleBased);
    }

    // ── ECG waveform path ────────────────────────────────────

    #[tokio::test]
    async fn ecg_csv_is_resampled_for_the_model() {
        let orch = orchestrator(CannedModels {
            scores: vec![3.0, 0.2, 0.2, 0.2, 0.2],
        });
        let csv: String = (0..400)
            .map(|i| format!("{:.3}", (i as f32 * 0.1).sin()))
            .collect::<Vec<_>>()
            .join(",");
        let response = orch
            .analyze(request("ecg_recording.csv", csv.into_bytes(), None))
            .await;

        let analysis = response.analysis.unwrap();
        assert_eq!(analysis.modality, Modality::Ecg);
        assert_eq!(analysis.analysis_method, AnalysisMethod::Model);
        assert_eq!(analysis.prediction, "Normal heartbeat");
    }

    // ── Tabular path ─────────────────────────────────────────

    #[tokio::test]
    async fn tabular_row_reaches_the_model() {
        let orch = orchestrator(CannedModels {
            scores: vec![0.2, 0.8],
        });
        let csv = b"Pregnancies,Glucose,BloodPressure,SkinThickness,Insulin,BMI,DiabetesPedigreeFunction,Age\n6,148,72,35,0,33.6,0.627,50\n".to_vec();
        let response = orch.analyze(request("diabetes_panel.csv", csv, None)).await;

        let analysis = response.analysis.unwrap();
        assert_eq!(analysis.modality, Modality::Diabetes);
        assert_eq!(analysis.analysis_method, AnalysisMethod::Model);
        assert_eq!(analysis.prediction, "Diabetes");
        assert_eq!(analysis.risk, RiskTier::High);
    }

    #[tokio::test]
    async fn categorical_columns_do_not_derail_the_model_tier() {
        let orch = orchestrator(CannedModels {
            scores: vec![0.3, 0.7],
        });
        let csv = b"gender,age,hypertension,heart_disease,ever_married,work_type,residence_type,avg_glucose_level,bmi,smoking_status\nMale,72,1,1,Yes,Private,Urban,228.69,36.6,formerly smoked\n".to_vec();
        let response = orch.analyze(request("patient_row.csv", csv, None)).await;

        let analysis = response.analysis.unwrap();
        assert_eq!(analysis.modality, Modality::Stroke);
        assert_eq!(analysis.analysis_method, AnalysisMethod::Model);
        assert_eq!(analysis.prediction, "Stroke");
    }

    // ── Unknown handling ─────────────────────────────────────

    #[tokio::test]
    async fn symptoms_classify_a_file_content_cannot() {
        let orch = orchestrator(NoModels);
        let response = orch
            .analyze(request(
                "upload.bin",
                vec![0u8; 16],
                Some("palpitations and a racing heart"),
            ))
            .await;

        let analysis = response.analysis.unwrap();
        assert_eq!(analysis.modality, Modality::Ecg);
    }

    #[tokio::test]
    async fn unknown_file_without_symptoms_still_succeeds() {
        let orch = orchestrator(NoModels);
        let response = orch.analyze(request("upload.bin", vec![0u8; 16], None)).await;

        assert!(response.success);
        let analysis = response.analysis.unwrap();
        assert_eq!(analysis.modality, Modality::Unknown);
        assert_eq!(analysis.risk, RiskTier::Low);
    }

    // ── Response envelope ────────────────────────────────────

    #[tokio::test]
    async fn response_carries_timing_and_summary() {
        let orch = orchestrator(NoModels);
        let bytes = encode_gray(64, 64, |_, _| 90);
        let response = orch.analyze(request("scan.jpg", bytes, None)).await;

        assert!(response.success);
        let summary = response.summary.unwrap();
        assert!(!summary.key_findings.is_empty());
        assert!(!summary.recommendations.is_empty());
        assert!(!summary.summary_text.is_empty());
    }

    #[test]
    fn recommendations_cover_every_modality_and_risk() {
        for m in [
            Modality::BrainScan,
            Modality::Xray,
            Modality::Ecg,
            Modality::Skin,
            Modality::BreastCancer,
            Modality::Diabetes,
            Modality::Stroke,
            Modality::HeartDisease,
            Modality::MedicalReport,
            Modality::Unknown,
        ] {
            for r in [RiskTier::Low, RiskTier::Moderate, RiskTier::High] {
                assert!(!recommendations(m, r).is_empty(), "{m} / {r}");
            }
        }
    }
}

//! Result normalization.
//!
//! Every tier's raw outcome passes through [`format`] exactly once before
//! leaving the pipeline. Logits become softmax-scored findings, findings
//! are clamped and sorted, risk is derived from the top finding, and the
//! narrative fields are rendered. Formatting an already-canonical result
//! is a no-op, so the pass is idempotent.

use super::types::{AnalysisMethod, AnalysisOutcome, AnalysisResult, Finding, Modality, RiskTier};

/// Confidence cutoffs for abnormal top findings. Benign labels bypass
/// them and always map to low risk.
pub mod risk_thresholds {
    pub const HIGH: f32 = 0.75;
    pub const MODERATE: f32 = 0.5;
}

/// Labels that describe the absence of pathology. Risk derives from what
/// the finding says, not how sure the model is: a confident "Normal" is
/// the lowest-risk answer there is.
fn is_benign_label(label: &str) -> bool {
    let label = label.to_lowercase();
    label.contains("normal")
        || label.contains("benign")
        || label.contains("no tumor")
        || label.contains("clear")
        || label.contains("no acute")
        || label.contains("no suspicious")
        || label.contains("analysis complete")
        || label.starts_with("no ")
        || label.starts_with("low ")
}

fn derive_risk(top: &Finding) -> RiskTier {
    if is_benign_label(&top.label) {
        RiskTier::Low
    } else if top.confidence > risk_thresholds::HIGH {
        RiskTier::High
    } else if top.confidence > risk_thresholds::MODERATE {
        RiskTier::Moderate
    } else {
        RiskTier::Low
    }
}

/// Normalize a raw tier outcome into the canonical result shape.
pub fn format(outcome: AnalysisOutcome) -> AnalysisResult {
    let (modality, method, findings) = match outcome {
        AnalysisOutcome::Canonical(result) => return result,
        AnalysisOutcome::Findings {
            modality,
            method,
            findings,
        } => (modality, method, findings),
        AnalysisOutcome::Logits {
            modality,
            labels,
            logits,
        } => {
            let scores = softmax(&logits);
            let findings = labels
                .into_iter()
                .zip(scores)
                .map(|(label, confidence)| Finding::new(label, confidence))
                .collect();
            (modality, AnalysisMethod::Model, findings)
        }
    };

    let mut findings: Vec<Finding> = findings
        .into_iter()
        .map(|mut f| {
            f.confidence = f.confidence.clamp(0.0, 1.0);
            f
        })
        .collect();
    findings.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    if findings.is_empty() {
        findings = vec![
            Finding::new("Analysis complete", 0.4),
            Finding::new("Requires clinical review", 0.3),
        ];
    }

    let top = findings[0].clone();
    let risk = derive_risk(&top);
    let confidence = format!("{:.2}%", top.confidence * 100.0);
    let clinical_note = format!(
        "Model indicates \"{}\" with confidence {}. Risk: {}.",
        top.label, confidence, risk
    );

    AnalysisResult {
        summary: summary_line(modality, &top, risk),
        patient_summary: patient_summary(modality, &top.label, risk),
        clinical_note,
        prediction: top.label,
        confidence,
        modality,
        findings,
        risk,
        analysis_method: method,
    }
}

/// Softmax over raw scores, numerically stabilized by max subtraction.
/// Already-normalized probability vectors pass through unchanged.
fn softmax(logits: &[f32]) -> Vec<f32> {
    if logits.is_empty() {
        return Vec::new();
    }
    let sum: f32 = logits.iter().sum();
    let all_unit = logits.iter().all(|l| (0.0..=1.0).contains(l));
    if all_unit && (sum - 1.0).abs() < 0.01 {
        return logits.to_vec();
    }

    let max = logits.iter().cloned().fold(f32::MIN, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

fn summary_line(modality: Modality, top: &Finding, risk: RiskTier) -> String {
    format!(
        "{}: {} ({:.1}% confidence, {} risk)",
        modality.display_title(),
        top.label,
        top.confidence * 100.0,
        risk
    )
}

/// Plain-language one-liner for the patient-facing view.
fn patient_summary(modality: Modality, label: &str, risk: RiskTier) -> String {
    if is_benign_label(label) {
        return match modality {
            Modality::BrainScan => "Your brain scan shows no signs of abnormality.".to_string(),
            Modality::Xray => "Your chest X-ray appears clear.".to_string(),
            Modality::Ecg => "Your heart rhythm looks regular.".to_string(),
            Modality::Skin => "The skin lesion shows benign characteristics.".to_string(),
            Modality::BreastCancer => "No suspicious findings in the breast imaging.".to_string(),
            Modality::Diabetes => "Your values do not indicate diabetes.".to_string(),
            Modality::Stroke => "Your stroke risk factors are low.".to_string(),
            Modality::HeartDisease => "Your cardiac risk factors are low.".to_string(),
            Modality::MedicalReport | Modality::Unknown => {
                "Analysis complete. No critical findings.".to_string()
            }
        };
    }

    match risk {
        RiskTier::High => format!(
            "The analysis flagged \"{label}\". Please seek medical attention promptly."
        ),
        RiskTier::Moderate => format!(
            "The analysis noted \"{label}\". Please discuss this with your doctor."
        ),
        RiskTier::Low => "Analysis complete. No critical findings.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn findings_outcome(modality: Modality, findings: Vec<Finding>) -> AnalysisOutcome {
        AnalysisOutcome::Findings {
            modality,
            method: AnalysisMethod::RuleBased,
            findings,
        }
    }

    // ── Risk derivation ──────────────────────────────────────

    #[test]
    fn benign_top_finding_is_low_risk_regardless_of_confidence() {
        let result = format(findings_outcome(
            Modality::BrainScan,
            vec![Finding::new("Normal brain scan", 0.97)],
        ));
        assert_eq!(result.risk, RiskTier::Low);
        assert_eq!(result.confidence, "97.00%");
    }

    #[test]
    fn abnormal_finding_uses_confidence_thresholds() {
        let high = format(findings_outcome(
            Modality::BrainScan,
            vec![Finding::new("Glioma tumor", 0.9)],
        ));
        assert_eq!(high.risk, RiskTier::High);

        let moderate = format(findings_outcome(
            Modality::BrainScan,
            vec![Finding::new("Glioma tumor", 0.6)],
        ));
        assert_eq!(moderate.risk, RiskTier::Moderate);

        let low = format(findings_outcome(
            Modality::BrainScan,
            vec![Finding::new("Glioma tumor", 0.3)],
        ));
        assert_eq!(low.risk, RiskTier::Low);
    }

    #[test]
    fn threshold_boundaries_are_exclusive() {
        let at_half = format(findings_outcome(
            Modality::Xray,
            vec![Finding::new("Pneumonia pattern", 0.5)],
        ));
        assert_eq!(at_half.risk, RiskTier::Low);

        let at_three_quarters = format(findings_outcome(
            Modality::Xray,
            vec![Finding::new("Pneumonia pattern", 0.75)],
        ));
        assert_eq!(at_three_quarters.risk, RiskTier::Moderate);
    }

    // ── Logits ───────────────────────────────────────────────

    #[test]
    fn logits_are_softmaxed_and_paired_with_labels() {
        let result = format(AnalysisOutcome::Logits {
            modality: Modality::Ecg,
            labels: vec!["Normal".into(), "Abnormal".into()],
            logits: vec![3.0, 1.0],
        });
        assert_eq!(result.analysis_method, AnalysisMethod::Model);
        assert_eq!(result.prediction, "Normal");
        let sum: f32 = result.findings.iter().map(|f| f.confidence).sum();
        assert!((sum - 1.0).abs() < 0.001);
        assert!(result.findings[0].confidence > 0.8);
    }

    #[test]
    fn probability_vectors_pass_through_softmax_unchanged() {
        let result = format(AnalysisOutcome::Logits {
            modality: Modality::Xray,
            labels: vec!["Normal".into(), "Pneumonia".into(), "COVID-19".into()],
            logits: vec![0.7, 0.2, 0.1],
        });
        assert!((result.findings[0].confidence - 0.7).abs() < 0.001);
    }

    // ── Normalization ────────────────────────────────────────

    #[test]
    fn findings_are_clamped_and_sorted() {
        let result = format(findings_outcome(
            Modality::Skin,
            vec![
                Finding::new("Benign lesion", 0.2),
                Finding::new("Atypical lesion features", 1.7),
            ],
        ));
        assert_eq!(result.prediction, "Atypical lesion features");
        assert_eq!(result.findings[0].confidence, 1.0);
    }

    #[test]
    fn empty_findings_get_generic_fallback() {
        let result = format(findings_outcome(Modality::Unknown, vec![]));
        assert_eq!(result.prediction, "Analysis complete");
        assert_eq!(result.risk, RiskTier::Low);
    }

    #[test]
    fn format_is_idempotent() {
        let once = format(findings_outcome(
            Modality::BrainScan,
            vec![Finding::new("Glioma tumor", 0.8)],
        ));
        let twice = format(AnalysisOutcome::Canonical(once.clone()));
        assert_eq!(serde_json::to_string(&once).unwrap(), serde_json::to_string(&twice).unwrap());
    }

    // ── Narrative fields ─────────────────────────────────────

    #[test]
    fn clinical_note_follows_template() {
        let result = format(findings_outcome(
            Modality::BrainScan,
            vec![Finding::new("Glioma tumor", 0.821)],
        ));
        assert_eq!(
            result.clinical_note,
            "Model indicates \"Glioma tumor\" with confidence 82.10%. Risk: high."
        );
    }

    #[test]
    fn patient_summary_reassures_on_benign() {
        let result = format(findings_outcome(
            Modality::Xray,
            vec![Finding::new("Clear lung fields", 0.9)],
        ));
        assert_eq!(result.patient_summary, "Your chest X-ray appears clear.");
    }

    #[test]
    fn patient_summary_escalates_on_high_risk() {
        let result = format(findings_outcome(
            Modality::Xray,
            vec![Finding::new("Pneumonia pattern", 0.9)],
        ));
        assert!(result.patient_summary.contains("seek medical attention"));
    }

    #[test]
    fn benign_label_detection() {
        for label in [
            "Normal sinus rhythm",
            "No tumor",
            "Benign lesion",
            "Clear lung fields",
            "No acute findings reported",
            "Low stroke risk",
            "No suspicious mass",
        ] {
            assert!(is_benign_label(label), "{label} should be benign");
        }
        for label in ["Glioma tumor", "Pneumonia pattern", "Irregular rhythm"] {
            assert!(!is_benign_label(label), "{label} should not be benign");
        }
    }
}

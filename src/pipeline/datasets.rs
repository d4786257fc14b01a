//! Reference dataset catalog and similarity matching.
//!
//! When no trained model is usable, symptoms are matched against a
//! catalog of labeled reference categories. Built-in descriptors carry
//! the category names, descriptions, and curated term associations; the
//! on-disk catalog (when present) refines them with example file
//! listings. Scoring is fully deterministic — the confidence jitter the
//! original demo applied for tie-breaking is intentionally absent.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::error::DatasetError;
use super::types::Finding;
use crate::config;

/// Score every category starts from
const BASE_SCORE: f32 = 0.3;
/// Bonus for the category name appearing verbatim in the symptom text
const NAME_MATCH_BONUS: f32 = 0.4;
/// Bonus per matched curated associated term
const TERM_MATCH_BONUS: f32 = 0.2;
/// Bonus applied to abnormal brain categories under red-flag symptoms
const RED_FLAG_BONUS: f32 = 0.2;

/// Terms that must never produce a false-reassurance "normal" match
const BRAIN_RED_FLAGS: &[&str] = &[
    "tumor",
    "mass",
    "lesion",
    "headache",
    "bleed",
    "stroke",
    "paralysis",
];

/// One named category inside a reference dataset.
#[derive(Debug, Clone)]
pub struct DatasetCategory {
    /// Example file listing; non-empty whenever the key exists
    pub files: Vec<String>,
    pub description: String,
}

/// A loaded reference dataset: categorized example files with
/// human-readable descriptions.
#[derive(Debug, Clone)]
pub struct ReferenceDataset {
    pub key: String,
    pub categories: BTreeMap<String, DatasetCategory>,
    pub total_files: usize,
}

/// Built-in descriptor for one clinical-domain dataset.
struct DatasetDescriptor {
    key: &'static str,
    /// Disjoint keyword group deciding whether this dataset is relevant
    relevance: &'static [&'static str],
    /// (category name, description, associated symptom terms)
    categories: &'static [(&'static str, &'static str, &'static [&'static str])],
}

fn descriptors() -> &'static [DatasetDescriptor] {
    &[
        DatasetDescriptor {
            key: "brain-scans",
            relevance: &[
                "headache", "migraine", "brain", "head", "seizure", "vision", "memory", "neuro",
            ],
            categories: &[
                (
                    "glioma_tumor",
                    "Glioma tumor reference MRI slices",
                    &["tumor", "mass", "headache", "seizure"],
                ),
                (
                    "meningioma_tumor",
                    "Meningioma tumor reference MRI slices",
                    &["tumor", "mass", "pressure"],
                ),
                (
                    "no_tumor",
                    "Normal brain MRI scans without abnormality",
                    &["normal", "clear", "routine"],
                ),
                (
                    "pituitary_tumor",
                    "Pituitary tumor reference MRI slices",
                    &["hormone", "vision", "tumor"],
                ),
            ],
        },
        DatasetDescriptor {
            key: "covid-xray",
            relevance: &[
                "cough", "chest", "breath", "fever", "lung", "respiratory", "pneumonia",
            ],
            categories: &[
                ("NORMAL", "Clear chest radiographs", &["normal", "clear"]),
                (
                    "PNEUMONIA",
                    "Chest radiographs with pneumonia consolidation",
                    &["cough", "fever", "infection", "breath"],
                ),
                (
                    "COVID",
                    "COVID-19 positive chest radiographs",
                    &["covid", "fever", "dry cough", "loss of taste"],
                ),
            ],
        },
        DatasetDescriptor {
            key: "ecg-heartbeat",
            relevance: &[
                "palpitation", "heart", "ecg", "ekg", "arrhythmia", "rhythm", "chest",
            ],
            categories: &[
                ("normal", "Normal sinus rhythm recordings", &["normal", "regular"]),
                (
                    "abnormal",
                    "Arrhythmic heartbeat recordings",
                    &["palpitation", "irregular", "skipped", "arrhythmia"],
                ),
            ],
        },
        DatasetDescriptor {
            key: "skin-lesion",
            relevance: &["skin", "mole", "rash", "itch", "lesion", "derm"],
            categories: &[
                ("benign", "Benign skin lesion photographs", &["stable", "unchanged"]),
                (
                    "malignant",
                    "Malignant skin lesion photographs",
                    &["growing", "bleeding", "irregular", "dark"],
                ),
            ],
        },
        DatasetDescriptor {
            key: "breast-cancer",
            relevance: &["breast", "lump", "mammogram", "nipple"],
            categories: &[
                ("benign", "Benign breast imaging findings", &["soft", "mobile"]),
                (
                    "malignant",
                    "Malignant breast imaging findings",
                    &["lump", "hard", "fixed", "discharge"],
                ),
            ],
        },
        DatasetDescriptor {
            key: "lab-values",
            relevance: &[
                "glucose", "sugar", "thirst", "blood pressure", "cholesterol", "diabet",
            ],
            categories: &[
                (
                    "diabetes",
                    "Diabetes risk factor records",
                    &["thirst", "urination", "glucose", "sugar"],
                ),
                (
                    "stroke",
                    "Stroke risk factor records",
                    &["weakness", "slurred", "numbness"],
                ),
                (
                    "heart-disease",
                    "Cardiac risk factor records",
                    &["chest pain", "cholesterol", "pressure"],
                ),
            ],
        },
        DatasetDescriptor {
            key: "medical-reports",
            relevance: &["report", "notes", "records", "transcription"],
            categories: &[
                (
                    "transcriptions",
                    "Clinical transcription samples across specialties",
                    &["consult", "discharge", "operative"],
                ),
                ("qa", "Clinical question-answer reference pairs", &["question"]),
            ],
        },
    ]
}

/// Lazy, mutex-guarded catalog of reference datasets. Scoring needs only
/// the built-in descriptors; `reference()` additionally loads the on-disk
/// example listings, caching per key. The loading request holds the guard,
/// so concurrent first loads for the same key block rather than duplicate.
pub struct DatasetCatalog {
    datasets_dir: PathBuf,
    cache: Mutex<HashMap<String, Arc<ReferenceDataset>>>,
}

impl DatasetCatalog {
    pub fn new(datasets_dir: PathBuf) -> Self {
        Self {
            datasets_dir,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_dir() -> Self {
        Self::new(config::datasets_dir())
    }

    /// Match symptoms against the catalog, returning up to `max_results`
    /// findings sorted by descending confidence. Empty symptom text yields
    /// no matches — every score signal here is symptom-driven.
    pub fn find_matches(&self, symptom_text: &str, max_results: usize) -> Vec<Finding> {
        let text = symptom_text.trim().to_lowercase();
        if text.is_empty() || max_results == 0 {
            return Vec::new();
        }

        let all = descriptors();
        let relevant: Vec<&DatasetDescriptor> = {
            let hits: Vec<&DatasetDescriptor> = all
                .iter()
                .filter(|d| d.relevance.iter().any(|k| text.contains(k)))
                .collect();
            if hits.is_empty() {
                all.iter().collect()
            } else {
                hits
            }
        };

        let red_flag = BRAIN_RED_FLAGS.iter().any(|t| text.contains(t));

        let mut findings = Vec::new();
        for descriptor in relevant {
            for (name, _description, terms) in descriptor.categories {
                let is_brain = descriptor.key == "brain-scans";
                let is_normal_brain = is_brain && *name == "no_tumor";

                // Red-flag symptoms must never match a reassuring
                // "normal brain" category
                if is_normal_brain && red_flag {
                    continue;
                }

                let mut score = BASE_SCORE;
                if text.contains(&display_name(name).to_lowercase()) {
                    score += NAME_MATCH_BONUS;
                }
                for term in *terms {
                    if text.contains(term) {
                        score += TERM_MATCH_BONUS;
                    }
                }
                if is_brain && !is_normal_brain && red_flag {
                    score += RED_FLAG_BONUS;
                }
                findings.push(Finding::new(display_name(name), score.min(1.0)));
            }
        }

        findings.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.label.cmp(&b.label))
        });
        findings.truncate(max_results);
        debug!(count = findings.len(), "dataset similarity matches");
        findings
    }

    /// Load a dataset's example listings from disk, lazily and cached.
    /// A missing directory is `Unavailable` for that key only.
    pub fn reference(&self, key: &str) -> Result<Arc<ReferenceDataset>, DatasetError> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(dataset) = cache.get(key) {
            return Ok(Arc::clone(dataset));
        }

        let dataset = Arc::new(self.load_from_disk(key)?);
        cache.insert(key.to_string(), Arc::clone(&dataset));
        Ok(dataset)
    }

    fn load_from_disk(&self, key: &str) -> Result<ReferenceDataset, DatasetError> {
        let descriptor = descriptors()
            .iter()
            .find(|d| d.key == key)
            .ok_or_else(|| DatasetError::Unavailable {
                key: key.to_string(),
                reason: "unknown dataset key".to_string(),
            })?;

        let root = self.datasets_dir.join(key);
        if !root.is_dir() {
            return Err(DatasetError::Unavailable {
                key: key.to_string(),
                reason: format!("not found at {}", root.display()),
            });
        }

        let mut categories = BTreeMap::new();
        let mut total_files = 0;
        for (name, description, _) in descriptor.categories {
            let dir = root.join(name);
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            let files: Vec<String> = entries
                .flatten()
                .filter(|e| e.path().is_file())
                .filter_map(|e| e.file_name().into_string().ok())
                .collect();
            // Invariant: a present category key always has files
            if files.is_empty() {
                continue;
            }
            total_files += files.len();
            categories.insert(
                name.to_string(),
                DatasetCategory {
                    files,
                    description: description.to_string(),
                },
            );
        }

        Ok(ReferenceDataset {
            key: key.to_string(),
            categories,
            total_files,
        })
    }
}

/// "glioma_tumor" -> "Glioma tumor"
fn display_name(raw: &str) -> String {
    let spaced = raw.replace(['_', '-'], " ").to_lowercase();
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => spaced,
    }
}

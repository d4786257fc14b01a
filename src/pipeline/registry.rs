//! Model registry — lazy-loading cache of per-modality classifiers.
//!
//! The registry is an explicit object injected into the orchestrator, not
//! a process-wide singleton. The first request for a modality performs a
//! blocking load while holding the cache guard, so concurrent requests
//! block on the in-flight load rather than loading twice; entries are
//! cached indefinitely (explicit `unload`/`clear` exist for maintenance).

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::info;

use super::error::RegistryError;
use super::types::Modality;
use crate::config;

/// Inference seam. Implementations must be shareable across requests.
pub trait ModelBackend: Send + Sync {
    /// Feed a feature vector, get raw output scores (not normalized —
    /// that is the formatter's job).
    fn infer(&self, features: &[f32]) -> Result<Vec<f32>, RegistryError>;

    fn input_dimension(&self) -> usize;

    fn labels(&self) -> &[String];
}

/// A cached, loaded model for one modality.
pub struct ModelEntry {
    pub modality: Modality,
    backend: Box<dyn ModelBackend>,
}

impl ModelEntry {
    pub fn new(modality: Modality, backend: Box<dyn ModelBackend>) -> Self {
        Self { modality, backend }
    }

    pub fn input_dimension(&self) -> usize {
        self.backend.input_dimension()
    }

    pub fn labels(&self) -> &[String] {
        self.backend.labels()
    }

    pub fn infer(&self, features: &[f32]) -> Result<Vec<f32>, RegistryError> {
        if features.len() != self.input_dimension() {
            return Err(RegistryError::Inference(format!(
                "expected {} features, got {}",
                self.input_dimension(),
                features.len()
            )));
        }
        self.backend.infer(features)
    }
}

// Manual impl: the boxed backend is opaque, so derive is unavailable
impl fmt::Debug for ModelEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelEntry")
            .field("modality", &self.modality)
            .field("input_dimension", &self.input_dimension())
            .finish_non_exhaustive()
    }
}

/// Supplies backends to the registry. The disk loader is the production
/// implementation; tests inject canned backends.
pub trait ModelLoader: Send + Sync {
    fn load(&self, modality: Modality) -> Result<ModelEntry, RegistryError>;
}

/// Class labels each modality's classifier emits, in output order.
pub fn default_labels(modality: Modality) -> Vec<String> {
    let labels: &[&str] = match modality {
        Modality::BrainScan => &[
            "No tumor",
            "Glioma tumor",
            "Meningioma tumor",
            "Pituitary tumor",
        ],
        Modality::Xray => &["Normal", "Pneumonia", "COVID-19"],
        Modality::Ecg => &[
            "Normal heartbeat",
            "Supraventricular premature beat",
            "Premature ventricular contraction",
            "Fusion of ventricular and normal",
            "Unclassifiable beat",
        ],
        Modality::Skin => &["Benign lesion", "Malignant lesion"],
        Modality::BreastCancer => &["Benign", "Malignant"],
        Modality::Diabetes => &["No diabetes", "Diabetes"],
        Modality::Stroke => &["No stroke", "Stroke"],
        Modality::HeartDisease => &["No heart disease", "Heart disease"],
        Modality::MedicalReport | Modality::Unknown => &["Analysis complete"],
    };
    labels.iter().map(|s| s.to_string()).collect()
}

/// Expected classifier input width per modality. Image models take the
/// stats+histogram+texture vector; tabular models take the original
/// datasets' feature rows; ECG takes a resampled waveform window.
pub fn default_input_dimension(modality: Modality) -> usize {
    match modality {
        Modality::BrainScan | Modality::Xray | Modality::Skin | Modality::BreastCancer => 53,
        Modality::Ecg => 187,
        Modality::Diabetes => 8,
        Modality::Stroke => 10,
        Modality::HeartDisease => 13,
        Modality::MedicalReport | Modality::Unknown => 53,
    }
}

/// Loads `<models_dir>/<modality>_classifier.onnx`. A missing file is
/// `NotAvailable` — the orchestrator's signal to fall to the next tier,
/// never a fatal error.
pub struct DiskModelLoader {
    models_dir: PathBuf,
}

impl DiskModelLoader {
    pub fn new(models_dir: PathBuf) -> Self {
        Self { models_dir }
    }

    fn model_path(&self, modality: Modality) -> PathBuf {
        self.models_dir
            .join(format!("{modality}_classifier.onnx"))
    }
}

impl Default for DiskModelLoader {
    fn default() -> Self {
        Self::new(config::models_dir())
    }
}

impl ModelLoader for DiskModelLoader {
    #[allow(unused_variables)]
    fn load(&self, modality: Modality) -> Result<ModelEntry, RegistryError> {
        let path = self.model_path(modality);
        if !path.exists() {
            return Err(RegistryError::NotAvailable(modality));
        }

        #[cfg(feature = "onnx-models")]
        {
            let backend = onnx::OnnxBackend::load(&path, modality)?;
            Ok(ModelEntry::new(modality, Box::new(backend)))
        }
        #[cfg(not(feature = "onnx-models"))]
        {
            tracing::warn!(
                %modality,
                path = %path.display(),
                "model file present but built without the onnx-models feature"
            );
            Err(RegistryError::NotAvailable(modality))
        }
    }
}

/// Process-shared, mutex-guarded model cache keyed by modality.
pub struct ModelRegistry {
    loader: Box<dyn ModelLoader>,
    cache: Mutex<HashMap<Modality, Arc<ModelEntry>>>,
}

impl ModelRegistry {
    pub fn new(loader: Box<dyn ModelLoader>) -> Self {
        Self {
            loader,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Registry backed by the on-disk model directory.
    pub fn with_default_loader() -> Self {
        Self::new(Box::new(DiskModelLoader::default()))
    }

    /// First access loads and caches; later accesses are O(1) hits.
    /// The guard is held across the load so a concurrent request for the
    /// same modality blocks instead of loading a duplicate.
    pub fn get_or_load(&self, modality: Modality) -> Result<Arc<ModelEntry>, RegistryError> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = cache.get(&modality) {
            return Ok(Arc::clone(entry));
        }
        let entry = Arc::new(self.loader.load(modality)?);
        info!(%modality, "model loaded and cached");
        cache.insert(modality, Arc::clone(&entry));
        Ok(entry)
    }

    /// Run inference for a modality, loading the model on first use.
    pub fn infer(&self, modality: Modality, features: &[f32]) -> Result<Vec<f32>, RegistryError> {
        self.get_or_load(modality)?.infer(features)
    }

    /// Maintenance: drop a cached model. Returns whether one was cached.
    pub fn unload(&self, modality: Modality) -> bool {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&modality)
            .is_some()
    }

    /// Maintenance: drop every cached model.
    pub fn clear(&self) {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn cached_modalities(&self) -> Vec<Modality> {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════
// ONNX backend — behind `onnx-models` feature
// ═══════════════════════════════════════════════════════════

#[cfg(feature = "onnx-models")]
mod onnx {
    use std::path::Path;
    use std::sync::Mutex;

    use ort::session::Session;

    use super::{default_input_dimension, default_labels, ModelBackend, RegistryError};
    use crate::pipeline::types::Modality;

    /// ONNX Runtime classifier. Interior mutability (Mutex) because
    /// `ort::Session::run` requires `&mut self` while `ModelBackend`
    /// exposes `&self` for shared usage.
    pub struct OnnxBackend {
        session: Mutex<Session>,
        input_dimension: usize,
        labels: Vec<String>,
    }

    impl OnnxBackend {
        pub fn load(path: &Path, modality: Modality) -> Result<Self, RegistryError> {
            let session = Session::builder()
                .map_err(|e: ort::Error| RegistryError::Init(e.to_string()))?
                .with_intra_threads(2)
                .map_err(|e: ort::Error| RegistryError::Init(e.to_string()))?
                .commit_from_file(path)
                .map_err(|e: ort::Error| {
                    RegistryError::Init(format!("ONNX load failed: {e}"))
                })?;

            Ok(Self {
                session: Mutex::new(session),
                input_dimension: default_input_dimension(modality),
                labels: default_labels(modality),
            })
        }
    }

    impl ModelBackend for OnnxBackend {
        fn infer(&self, features: &[f32]) -> Result<Vec<f32>, RegistryError> {
            let array = ndarray::Array2::from_shape_vec((1, features.len()), features.to_vec())
                .map_err(|e| RegistryError::Inference(e.to_string()))?;
            let tensor = ort::value::TensorRef::from_array_view(&array)
                .map_err(|e| RegistryError::Inference(e.to_string()))?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| RegistryError::Inference("session lock poisoned".to_string()))?;
            let outputs = session
                .run(ort::inputs![tensor])
                .map_err(|e| RegistryError::Inference(format!("ONNX inference failed: {e}")))?;

            let (_, scores) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| RegistryError::Inference(format!("output extraction: {e}")))?;
            Ok(scores.to_vec())
        }

        fn input_dimension(&self) -> usize {
            self.input_dimension
        }

        fn labels(&self) -> &[String] {
            &self.labels
        }
    }
}

/// Deterministic backend for testing — emits fixed scores.
pub struct MockBackend {
    pub scores: Vec<f32>,
    pub dimension: usize,
    pub class_labels: Vec<String>,
}

impl MockBackend {
    pub fn new(modality: Modality, scores: Vec<f32>) -> Self {
        Self {
            scores,
            dimension: default_input_dimension(modality),
            class_labels: default_labels(modality),
        }
    }
}

impl ModelBackend for MockBackend {
    fn infer(&self, _features: &[f32]) -> Result<Vec<f32>, RegistryError> {
        Ok(self.scores.clone())
    }

    fn input_dimension(&self) -> usize {
        self.dimension
    }

    fn labels(&self) -> &[String] {
        &self.class_labels
    }
}

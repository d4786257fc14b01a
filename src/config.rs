use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "Medtriage";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tracing filter when RUST_LOG is not set
pub fn default_log_filter() -> String {
    format!("{}=info", env!("CARGO_PKG_NAME"))
}

/// Get the application data directory
/// ~/Medtriage/ on all platforms (user-visible, per design requirement)
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join("Medtriage")
}

/// Get the trained models directory (per-modality ONNX classifiers)
pub fn models_dir() -> PathBuf {
    app_data_dir().join("models")
}

/// Get the reference datasets directory (categorized example files)
pub fn datasets_dir() -> PathBuf {
    app_data_dir().join("datasets")
}

/// Path of the optional auxiliary modality classifier
pub fn modality_classifier_path() -> PathBuf {
    models_dir().join("modality_classifier.onnx")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_data_dir_under_home() {
        let dir = app_data_dir();
        let home = dirs::home_dir().unwrap();
        assert!(dir.starts_with(home));
        assert!(dir.ends_with("Medtriage"));
    }

    #[test]
    fn models_dir_under_app_data() {
        let models = models_dir();
        let app = app_data_dir();
        assert!(models.starts_with(app));
        assert!(models.ends_with("models"));
    }

    #[test]
    fn datasets_dir_under_app_data() {
        let datasets = datasets_dir();
        assert!(datasets.starts_with(app_data_dir()));
        assert!(datasets.ends_with("datasets"));
    }

    #[test]
    fn log_filter_targets_this_crate() {
        assert_eq!(default_log_filter(), "medtriage=info");
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.1.0");
    }
}

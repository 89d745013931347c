use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "Facturalens";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Local Ollama endpoint used when nothing else is configured.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Model asked to fill missing fields.
pub const DEFAULT_MODEL: &str = "llama3.2";

/// Default tracing filter when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "facturalens_lib=info,facturalens=info,warn"
}

/// Get the application data directory.
/// ~/.facturalens/ on all platforms, falling back to the working directory
/// when no home directory can be determined.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".facturalens")
}

/// Default location of the persisted policy index.
pub fn policy_index_cache_path() -> PathBuf {
    app_data_dir().join("policy_index.sqlite3")
}

/// Get the models directory (for ONNX embeddings, etc.)
pub fn models_dir() -> PathBuf {
    app_data_dir().join("models")
}

/// Get the embedding model directory (all-MiniLM-L6-v2)
pub fn embedding_model_dir() -> PathBuf {
    models_dir().join("all-MiniLM-L6-v2")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_data_dir_is_hidden_facturalens_dir() {
        let dir = app_data_dir();
        assert!(dir.ends_with(".facturalens"));
    }

    #[test]
    fn cache_path_under_app_data() {
        let cache = policy_index_cache_path();
        assert!(cache.starts_with(app_data_dir()));
        assert_eq!(
            cache.extension().and_then(|e| e.to_str()),
            Some("sqlite3")
        );
    }

    #[test]
    fn embedding_dir_under_models() {
        assert!(embedding_model_dir().starts_with(models_dir()));
    }

    #[test]
    fn app_name_is_facturalens() {
        assert_eq!(APP_NAME, "Facturalens");
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.6.0");
    }

    #[test]
    fn log_filter_targets_library() {
        assert!(default_log_filter().contains("facturalens_lib=info"));
    }
}

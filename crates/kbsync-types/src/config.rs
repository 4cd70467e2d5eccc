//! Configuration loading for kbsync.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at `~/.config/kbsync/config.toml`.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::KbSyncError;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "kbsync")
}

/// Settings for the extraction cache and external worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSettings {
    /// Maximum number of concurrently running extraction workers
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Cache root holding the `in/`, `out/` and `tmp/` areas
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Lowercase extensions (with leading dot) the worker can handle
    #[serde(default = "default_supported_types")]
    pub supported_types: Vec<String>,

    /// Run OCR on every file, not just `.ocr.` tagged ones
    #[serde(default)]
    pub always_ocr: bool,

    /// Named OCR language bundles, e.g. `de = "deu+eng"`
    #[serde(default = "default_ocr_language_bundles")]
    pub ocr_language_bundles: BTreeMap<String, String>,

    #[serde(default = "default_tesseract_path")]
    pub tesseract_path: String,

    #[serde(default)]
    pub tesseract_datapath: String,

    /// Upper bound on characters the worker emits per document
    #[serde(default = "default_max_content_length")]
    pub max_content_length: u64,

    /// Worker executable
    #[serde(default = "default_worker_command")]
    pub worker_command: String,

    /// Worker arguments; `{input}` and `{config}` are substituted per job
    #[serde(default = "default_worker_args")]
    pub worker_args: Vec<String>,

    /// Optional worker configuration template file
    #[serde(default)]
    pub config_template: Option<PathBuf>,

    /// Seconds before a running worker is killed
    #[serde(default = "default_worker_timeout_secs")]
    pub worker_timeout_secs: u64,
}

fn default_max_workers() -> usize {
    4
}

fn default_work_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.cache_dir().join("extraction"))
        .unwrap_or_else(|| PathBuf::from("./kbsync-extraction"))
}

fn default_supported_types() -> Vec<String> {
    [
        ".pdf", ".doc", ".docx", ".odt", ".rtf", ".xls", ".xlsx", ".ods", ".ppt", ".pptx",
        ".odp", ".epub", ".png", ".jpg", ".jpeg", ".tif", ".tiff",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_ocr_language_bundles() -> BTreeMap<String, String> {
    BTreeMap::from([("en".to_string(), "eng".to_string())])
}

fn default_tesseract_path() -> String {
    "/usr/bin".to_string()
}

fn default_max_content_length() -> u64 {
    100_000_000
}

fn default_worker_command() -> String {
    "java".to_string()
}

fn default_worker_args() -> Vec<String> {
    [
        "-jar",
        "tika-app.jar",
        "--config={config}",
        "--text",
        "--encoding=UTF-8",
        "{input}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_worker_timeout_secs() -> u64 {
    300
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            work_dir: default_work_dir(),
            supported_types: default_supported_types(),
            always_ocr: false,
            ocr_language_bundles: default_ocr_language_bundles(),
            tesseract_path: default_tesseract_path(),
            tesseract_datapath: String::new(),
            max_content_length: default_max_content_length(),
            worker_command: default_worker_command(),
            worker_args: default_worker_args(),
            config_template: None,
            worker_timeout_secs: default_worker_timeout_secs(),
        }
    }
}

impl ExtractionSettings {
    /// Settings rooted at `work_dir`, otherwise default.
    pub fn with_work_dir(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_workers == 0 {
            return Err("max_workers must be > 0".to_string());
        }
        if self.worker_timeout_secs == 0 {
            return Err("worker_timeout_secs must be > 0".to_string());
        }
        if self.worker_command.trim().is_empty() {
            return Err("worker_command must not be empty".to_string());
        }
        if let Some(bad) = self.supported_types.iter().find(|t| !t.starts_with('.')) {
            return Err(format!("supported type '{}' must start with '.'", bad));
        }
        Ok(())
    }
}

/// Weights applied to intermediate progress steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressWeights {
    /// Percentage added by each `initial` step
    #[serde(default = "default_initial_weight")]
    pub initial_weight: f64,

    /// Percentage split across the `pregen` steps of one operation
    #[serde(default = "default_pregen_weight")]
    pub pregen_weight: f64,
}

fn default_initial_weight() -> f64 {
    10.0
}

fn default_pregen_weight() -> f64 {
    80.0
}

impl Default for ProgressWeights {
    fn default() -> Self {
        Self {
            initial_weight: default_initial_weight(),
            pregen_weight: default_pregen_weight(),
        }
    }
}

impl ProgressWeights {
    pub fn validate(&self) -> Result<(), String> {
        for (name, weight) in [
            ("initial_weight", self.initial_weight),
            ("pregen_weight", self.pregen_weight),
        ] {
            if !(0.0..=100.0).contains(&weight) {
                return Err(format!("{} must be 0-100, got {}", name, weight));
            }
        }
        Ok(())
    }
}

/// Main application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// When false the lifecycle controller does not subscribe to the bus
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Root of the content repository
    #[serde(default = "default_repository_root")]
    pub repository_root: PathBuf,

    /// Directory holding the knowledge index and ledger snapshot
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,

    /// Ordered plugin names consulted before the default ingest path
    #[serde(default)]
    pub plugins: Vec<String>,

    /// Fraction of sub-operations a plugin must complete to report success
    #[serde(default = "default_minimum_success_fraction")]
    pub minimum_success_fraction: f64,

    /// Per-topic event bus capacity. Must exceed the number of messages a
    /// subscriber can fall behind by; older messages are dropped.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    #[serde(default)]
    pub extraction: ExtractionSettings,

    #[serde(default)]
    pub progress: ProgressWeights,
}

fn default_enabled() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_repository_root() -> PathBuf {
    project_dirs()
        .map(|p| p.data_local_dir().join("repository"))
        .unwrap_or_else(|| PathBuf::from("./kbsync-repository"))
}

fn default_index_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.data_local_dir().join("index"))
        .unwrap_or_else(|| PathBuf::from("./kbsync-index"))
}

fn default_minimum_success_fraction() -> f64 {
    0.5
}

fn default_bus_capacity() -> usize {
    1024
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            log_level: default_log_level(),
            repository_root: default_repository_root(),
            index_dir: default_index_dir(),
            plugins: Vec::new(),
            minimum_success_fraction: default_minimum_success_fraction(),
            bus_capacity: default_bus_capacity(),
            extraction: ExtractionSettings::default(),
            progress: ProgressWeights::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered configuration.
    ///
    /// Precedence (highest to lowest):
    /// 1. Environment variables (KBSYNC_*, nested keys use `__`)
    /// 2. CLI-specified config file
    /// 3. Default config file (~/.config/kbsync/config.toml)
    /// 4. Built-in defaults
    ///
    /// CLI flags are applied by the caller after loading.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, KbSyncError> {
        let config_dir = project_dirs()
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("enabled", default_enabled())
            .map_err(|e| KbSyncError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| KbSyncError::Config(e.to_string()))?
            .set_default(
                "repository_root",
                default_repository_root().to_string_lossy().to_string(),
            )
            .map_err(|e| KbSyncError::Config(e.to_string()))?
            .set_default(
                "index_dir",
                default_index_dir().to_string_lossy().to_string(),
            )
            .map_err(|e| KbSyncError::Config(e.to_string()))?
            .set_default(
                "minimum_success_fraction",
                default_minimum_success_fraction(),
            )
            .map_err(|e| KbSyncError::Config(e.to_string()))?
            .set_default("bus_capacity", default_bus_capacity() as i64)
            .map_err(|e| KbSyncError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Format: KBSYNC_LOG_LEVEL, KBSYNC_EXTRACTION__MAX_WORKERS, ...
        builder = builder.add_source(
            Environment::with_prefix("KBSYNC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| KbSyncError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| KbSyncError::Config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), KbSyncError> {
        if !(0.0..=1.0).contains(&self.minimum_success_fraction) {
            return Err(KbSyncError::Config(format!(
                "minimum_success_fraction must be 0.0-1.0, got {}",
                self.minimum_success_fraction
            )));
        }
        if self.bus_capacity == 0 {
            return Err(KbSyncError::Config("bus_capacity must be > 0".to_string()));
        }
        self.extraction
            .validate()
            .map_err(|e| KbSyncError::Config(format!("extraction: {}", e)))?;
        self.progress
            .validate()
            .map_err(|e| KbSyncError::Config(format!("progress: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.enabled);
        assert_eq!(settings.log_level, "info");
        assert!((settings.minimum_success_fraction - 0.5).abs() < f64::EPSILON);
        assert_eq!(settings.extraction.max_workers, 4);
        assert_eq!(settings.extraction.worker_timeout_secs, 300);
        assert!(settings.plugins.is_empty());
    }

    #[test]
    fn test_load_with_defaults() {
        let settings = Settings::load(None).unwrap();
        assert!(settings.bus_capacity > 0);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
enabled = false
plugins = ["ignored-files"]

[extraction]
max_workers = 2
always_ocr = true
supported_types = [".pdf"]

[progress]
initial_weight = 5.0
"#
        )
        .unwrap();

        let settings = Settings::load(Some(file.path().to_str().unwrap())).unwrap();
        assert!(!settings.enabled);
        assert_eq!(settings.plugins, vec!["ignored-files".to_string()]);
        assert_eq!(settings.extraction.max_workers, 2);
        assert!(settings.extraction.always_ocr);
        assert_eq!(settings.extraction.supported_types, vec![".pdf".to_string()]);
        assert!((settings.progress.initial_weight - 5.0).abs() < f64::EPSILON);
        assert!((settings.progress.pregen_weight - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate_rejects_bad_fraction() {
        let settings = Settings {
            minimum_success_fraction: 1.5,
            ..Settings::default()
        };
        assert!(matches!(settings.validate(), Err(KbSyncError::Config(_))));
    }

    #[test]
    fn test_extraction_validation() {
        let mut extraction = ExtractionSettings::default();
        assert!(extraction.validate().is_ok());

        extraction.max_workers = 0;
        assert!(extraction.validate().is_err());

        extraction.max_workers = 1;
        extraction.supported_types = vec!["pdf".to_string()];
        assert!(extraction.validate().unwrap_err().contains("must start with '.'"));
    }

    #[test]
    fn test_progress_weights_validation() {
        let weights = ProgressWeights {
            initial_weight: 120.0,
            pregen_weight: 80.0,
        };
        assert!(weights.validate().is_err());
        assert!(ProgressWeights::default().validate().is_ok());
    }
}

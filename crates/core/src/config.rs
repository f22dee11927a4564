use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Recommended binarization threshold.
pub const DEFAULT_THRESHOLD: f64 = 128.0;

/// Tesseract-style language selector: Indonesian plus English.
pub const DEFAULT_LANG: &str = "ind+eng";

const CONFIG_FILE_NAME: &str = "docscan.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// How field names are turned into label patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelMode {
    /// Field names match literally; regex metacharacters are escaped.
    #[default]
    Literal,
    /// Field names are used as raw regex fragments.
    Pattern,
}

impl std::str::FromStr for LabelMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "literal" => Ok(LabelMode::Literal),
            "pattern" => Ok(LabelMode::Pattern),
            other => Err(format!("Unknown label mode: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub lang: String,
    /// Directory holding `*.traineddata`; `None` uses the engine default.
    pub data_path: Option<String>,
    /// Number of independent adapters used for a batch.
    pub workers: usize,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self { lang: DEFAULT_LANG.to_string(), data_path: None, workers: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub binarize: bool,
    pub threshold: f64,
    pub compress: bool,
    /// Longest side after compression, in pixels.
    pub max_dimension: u32,
    /// Encoded size cap after compression.
    pub max_bytes: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            binarize: true,
            threshold: DEFAULT_THRESHOLD,
            compress: false,
            max_dimension: 500,
            max_bytes: 2 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub fields: Vec<String>,
    pub columns: Vec<String>,
    pub label_mode: LabelMode,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub ocr: OcrConfig,
    pub preprocess: PreprocessConfig,
    pub extract: ExtractConfig,
}

impl ScanConfig {
    pub fn from_toml_str(toml_content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_content)?)
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml_str(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io { path: path.to_path_buf(), source }),
        }
    }

    /// `<config dir>/docscan.toml` for the current user, if a home directory exists.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "docscan", "DocScan")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }
}

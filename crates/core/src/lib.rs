pub mod config;
pub mod record;

pub use config::{
    ConfigError, ExtractConfig, LabelMode, OcrConfig, PreprocessConfig, ScanConfig,
    DEFAULT_LANG, DEFAULT_THRESHOLD,
};
pub use record::{FieldResult, Record, TableResult, TableRow};

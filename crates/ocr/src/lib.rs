pub mod extract;
pub mod hash;
pub mod pipeline;
pub mod pool;
pub mod preprocess;
pub mod recognizer;
pub mod types;

pub use extract::{extract_fields, extract_table, Extractor};
pub use hash::{sha256_bytes, to_hex};
pub use pipeline::{
    build_report, spawn_intake_watcher, spawn_scan_worker, wait_for_stable_size, PipelineError,
    ScanPipeline,
};
pub use pool::{PoolOutcome, ScanPool};
pub use preprocess::{
    binarize, binarize_bytes, binarize_rgba, compress, prepare_for_ocr, CompressOptions,
    PreprocessError, PreprocessOptions,
};
pub use recognizer::{
    AdapterHandle, MockRecognizer, OcrBackend, OcrError, OcrProgress, OcrProvider, OcrStatus,
    ProgressReceiver, ProgressSender, TesseractProvider,
};
pub use types::{ScanJob, ScanReport, ScanResult, ScanStatus, ERROR_SENTINEL};

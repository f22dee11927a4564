use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::extract::Extractor;
use crate::hash;
use crate::preprocess::{self, PreprocessOptions};
use crate::recognizer::{AdapterHandle, OcrError, OcrProgress, OcrProvider};
use crate::types::{ScanJob, ScanReport, ScanResult};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No OCR adapter available")]
    AdapterUnavailable,
    #[error("Scan worker stopped: {0}")]
    WorkerLost(String),
}

/// Orchestrates: content key → cache check → preprocess → OCR → store result.
///
/// Owns at most one OCR adapter and runs one file at a time through it.
pub struct ScanPipeline {
    adapter: Option<AdapterHandle>,
    options: PreprocessOptions,
    extractor: Extractor,
    archive_dir: Option<PathBuf>,
    results: Vec<ScanResult>,
    progress: watch::Sender<u8>,
}

impl ScanPipeline {
    pub fn new(adapter: Option<AdapterHandle>, options: PreprocessOptions) -> Self {
        let (progress, _) = watch::channel(0);
        Self {
            adapter,
            options,
            extractor: Extractor::default(),
            archive_dir: None,
            results: Vec::new(),
            progress,
        }
    }

    /// Acquire an adapter from `provider`. On failure the error is logged and
    /// the pipeline is returned without one; it refuses work until replaced.
    pub fn acquire(provider: &dyn OcrProvider, lang: &str, options: PreprocessOptions) -> Self {
        let adapter = match AdapterHandle::acquire(provider, lang) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!(lang, error = %e, "Failed to initialize OCR adapter");
                None
            }
        };
        Self::new(adapter, options)
    }

    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Also write every preprocessed image to a content-addressed tree under `dir`.
    pub fn with_archive_dir(mut self, dir: PathBuf) -> Self {
        self.archive_dir = Some(dir);
        self
    }

    pub fn is_ready(&self) -> bool {
        self.adapter.is_some()
    }

    /// Recognition progress of the current file, 0–100. Reset to 0 after each file.
    pub fn progress(&self) -> watch::Receiver<u8> {
        self.progress.subscribe()
    }

    pub fn results(&self) -> &[ScanResult] {
        &self.results
    }

    pub fn result(&self, key: &str) -> Option<&ScanResult> {
        self.results.iter().find(|r| r.key == key)
    }

    pub fn clear_results(&mut self) {
        self.results.clear();
    }

    /// Process a file on disk.
    pub async fn process_file(&mut self, path: &Path) -> Result<ScanResult, PipelineError> {
        let job = ScanJob::from_path(path).await?;
        self.process(job).await
    }

    /// Run one file through preprocessing and OCR.
    ///
    /// A file whose content key was already processed returns the stored
    /// result (failures included) without touching the adapter. Preprocessing
    /// and recognition errors are recorded as failed results, not returned.
    pub async fn process(&mut self, job: ScanJob) -> Result<ScanResult, PipelineError> {
        if !self.is_ready() {
            return Err(PipelineError::AdapterUnavailable);
        }

        let key = job.key();
        if let Some(existing) = self.result(&key) {
            tracing::debug!(key = %key, name = %job.name, "Already processed, skipping");
            return Ok(existing.clone());
        }

        let result = self.recognize(key, job).await;
        self.progress.send_replace(0);
        self.results.push(result.clone());
        Ok(result)
    }

    /// Process `jobs` strictly one after another. A failing file never stops
    /// the batch.
    pub async fn process_batch(&mut self, jobs: Vec<ScanJob>) -> Result<Vec<ScanResult>, PipelineError> {
        if !self.is_ready() {
            return Err(PipelineError::AdapterUnavailable);
        }

        let mut out = Vec::with_capacity(jobs.len());
        for job in jobs {
            let (key, name) = (job.key(), job.name.clone());
            match self.process(job).await {
                Ok(result) => out.push(result),
                Err(e) => out.push(ScanResult::failed(key, name, e.to_string())),
            }
        }
        Ok(out)
    }

    /// Structured extraction over a stored result. Failed results yield empty
    /// field values and no table rows.
    pub fn report<F, C>(&self, key: &str, fields: &[F], columns: &[C]) -> Option<ScanReport>
    where
        F: AsRef<str>,
        C: AsRef<str>,
    {
        self.result(key).map(|r| build_report(&self.extractor, r, fields, columns))
    }

    pub fn reports<F, C>(&self, fields: &[F], columns: &[C]) -> Vec<ScanReport>
    where
        F: AsRef<str>,
        C: AsRef<str>,
    {
        self.results
            .iter()
            .map(|r| build_report(&self.extractor, r, fields, columns))
            .collect()
    }

    /// Release the adapter. The pipeline cannot be used afterwards.
    pub fn shutdown(self) -> Result<(), OcrError> {
        match self.adapter {
            Some(adapter) => adapter.release(),
            None => Ok(()),
        }
    }

    async fn recognize(&mut self, key: String, job: ScanJob) -> ScanResult {
        let ScanJob { name, bytes } = job;
        let Some(mut adapter) = self.adapter.take() else {
            return ScanResult::failed(key, name, PipelineError::AdapterUnavailable.to_string());
        };
        let options = self.options.clone();
        let (tx, mut rx) = mpsc::unbounded_channel::<OcrProgress>();

        tracing::info!(key = %key, name = %name, "Scanning");

        // The adapter moves into the blocking task and comes back with the outcome.
        let task = tokio::task::spawn_blocking(move || {
            let outcome = match preprocess::prepare_for_ocr(&bytes, &options) {
                Ok(prepared) => adapter
                    .recognize(&prepared, &tx)
                    .map(|text| (prepared, text))
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            (adapter, outcome)
        });

        // Ends once the task drops its sender.
        while let Some(event) = rx.recv().await {
            if let Some(pct) = event.percent() {
                self.progress.send_replace(pct);
            }
        }

        match task.await {
            Ok((adapter, Ok((prepared, text)))) => {
                self.adapter = Some(adapter);
                if let Some(dir) = self.archive_dir.clone() {
                    if let Err(e) = archive_image(&dir, &key, &prepared).await {
                        tracing::warn!(key = %key, error = %e, "Failed to archive processed image");
                    }
                }
                tracing::info!(key = %key, name = %name, chars = text.len(), "Recognized");
                ScanResult::recognized(key, name, text)
            }
            Ok((adapter, Err(reason))) => {
                self.adapter = Some(adapter);
                tracing::warn!(key = %key, name = %name, %reason, "Scan failed");
                ScanResult::failed(key, name, reason)
            }
            Err(e) => {
                tracing::error!(key = %key, name = %name, error = %e, "OCR task crashed; adapter lost");
                ScanResult::failed(key, name, format!("OCR task crashed: {e}"))
            }
        }
    }
}

/// Attach extracted fields and table rows to a scan result. Failed results
/// yield empty field values and no table rows.
pub fn build_report<F, C>(extractor: &Extractor, result: &ScanResult, fields: &[F], columns: &[C]) -> ScanReport
where
    F: AsRef<str>,
    C: AsRef<str>,
{
    let text = if result.is_recognized() { result.text.as_str() } else { "" };
    ScanReport {
        result: result.clone(),
        fields: extractor.fields(text, fields),
        table: Extractor::table(text, columns),
    }
}

async fn archive_image(dir: &Path, key: &str, data: &[u8]) -> std::io::Result<PathBuf> {
    let ext = image::guess_format(data)
        .ok()
        .and_then(|f| f.extensions_str().first().copied())
        .unwrap_or("bin");
    let dest = hash::artifact_path(dir, key, ext);
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&dest, data).await?;
    Ok(dest)
}

// ── Task queue ────────────────────────────────────────────────────────────────

/// Drain `jobs` through `pipeline` one at a time, sending each result on
/// `results`. Resolves to the pipeline once the job queue closes or the result
/// receiver is dropped.
pub fn spawn_scan_worker(
    mut pipeline: ScanPipeline,
    mut jobs: mpsc::Receiver<ScanJob>,
    results: mpsc::Sender<ScanResult>,
) -> JoinHandle<ScanPipeline> {
    tokio::spawn(async move {
        while let Some(job) = jobs.recv().await {
            let (key, name) = (job.key(), job.name.clone());
            let result = match pipeline.process(job).await {
                Ok(result) => result,
                Err(e) => ScanResult::failed(key, name, e.to_string()),
            };
            if results.send(result).await.is_err() {
                break;
            }
        }
        pipeline
    })
}

// ── Watch-folder integration ──────────────────────────────────────────────────

/// Size polls before a file that never settles is handed over anyway.
const MAX_SETTLE_POLLS: u32 = 20;

/// Spawn a notify watcher on `watch_dir` that sends image file paths to `tx`
/// whenever one is created or written. A path may be sent several times while
/// it is being copied; pair with [`wait_for_stable_size`] before reading.
/// Returns the watcher, which must be kept alive for watching to continue.
pub fn spawn_intake_watcher(
    watch_dir: &Path,
    tx: mpsc::Sender<PathBuf>,
) -> notify::Result<impl notify::Watcher> {
    use notify::{RecursiveMode, Watcher};

    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        let ev = match event {
            Ok(ev) => ev,
            Err(e) => {
                tracing::warn!(error = %e, "Intake watcher error");
                return;
            }
        };
        if !is_intake_event(&ev.kind) {
            return;
        }
        for path in ev.paths.into_iter().filter(|p| is_image_path(p)) {
            if let Err(e) = tx.try_send(path) {
                let path = match &e {
                    mpsc::error::TrySendError::Full(p) | mpsc::error::TrySendError::Closed(p) => p,
                };
                tracing::warn!(path = %path.display(), error = %e, "Dropped intake event");
            }
        }
    })?;

    watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// Poll `path` every `interval` until two consecutive reads report the same
/// non-zero size. Gives up waiting after a bounded number of polls and returns
/// the last size seen.
pub async fn wait_for_stable_size(path: &Path, interval: std::time::Duration) -> std::io::Result<u64> {
    let mut last = tokio::fs::metadata(path).await?.len();
    for _ in 0..MAX_SETTLE_POLLS {
        tokio::time::sleep(interval).await;
        let len = tokio::fs::metadata(path).await?.len();
        if len == last && len > 0 {
            return Ok(len);
        }
        last = len;
    }
    tracing::warn!(path = %path.display(), size = last, "File never settled");
    Ok(last)
}

fn is_intake_event(kind: &notify::EventKind) -> bool {
    use notify::event::{AccessKind, AccessMode, ModifyKind};
    use notify::EventKind;

    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any)
            | EventKind::Access(AccessKind::Close(AccessMode::Write))
    )
}

fn is_image_path(path: &Path) -> bool {
    image::ImageFormat::from_path(path).is_ok()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

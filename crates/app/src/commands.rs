use anyhow::{bail, Context, Result};
use docscan_core::{FieldResult, ScanConfig, TableResult};
use docscan_ocr::{
    build_report, spawn_intake_watcher, spawn_scan_worker, wait_for_stable_size, Extractor,
    PoolOutcome, PreprocessOptions, ScanJob, ScanPipeline, ScanPool, ScanReport, ScanResult,
    TesseractProvider,
};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

#[derive(Debug, Serialize)]
pub struct Extraction {
    pub fields: FieldResult,
    pub table: TableResult,
}

fn build_pipelines(cfg: &ScanConfig, archive: Option<&Path>, count: usize) -> Vec<ScanPipeline> {
    let provider = TesseractProvider::new(cfg.ocr.data_path.clone());
    let options = PreprocessOptions::from(&cfg.preprocess);

    (0..count.max(1))
        .map(|_| {
            let pipeline = ScanPipeline::acquire(&provider, &cfg.ocr.lang, options.clone());
            let pipeline = match archive {
                Some(dir) => pipeline.with_archive_dir(dir.to_path_buf()),
                None => pipeline,
            };
            log_progress(&pipeline);
            pipeline
        })
        .collect()
}

/// Mirror a pipeline's recognition percentage into the log until it is dropped.
fn log_progress(pipeline: &ScanPipeline) {
    let mut rx = pipeline.progress();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let pct = *rx.borrow_and_update();
            if pct > 0 {
                tracing::debug!(percent = pct, "Recognizing text");
            }
        }
    });
}

pub async fn scan(cfg: &ScanConfig, files: Vec<PathBuf>, archive: Option<PathBuf>, json: bool) -> Result<()> {
    let pool = ScanPool::new(build_pipelines(cfg, archive.as_deref(), cfg.ocr.workers));
    if pool.ready_count() == 0 {
        bail!("No OCR engine available for language '{}'", cfg.ocr.lang);
    }

    let outcome = scan_files(pool, &files).await?;
    let extractor = Extractor::with_label_mode(cfg.extract.label_mode);
    let reports: Vec<ScanReport> = outcome
        .results
        .iter()
        .map(|r| build_report(&extractor, r, &cfg.extract.fields, &cfg.extract.columns))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            print_report(report);
        }
    }

    for pipeline in outcome.pipelines {
        if let Err(e) = pipeline.shutdown() {
            tracing::warn!(error = %e, "Failed to release OCR adapter");
        }
    }
    Ok(())
}

/// Read every file and run the readable ones through `pool`. A file that
/// cannot be read keeps its slot as a failed result with an empty key.
async fn scan_files(pool: ScanPool, files: &[PathBuf]) -> Result<PoolOutcome> {
    let mut jobs = Vec::with_capacity(files.len());
    let mut unreadable = Vec::new();
    for (idx, path) in files.iter().enumerate() {
        match ScanJob::from_path(path).await {
            Ok(job) => jobs.push(job),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read file");
                let name = path.display().to_string();
                unreadable.push((idx, ScanResult::failed(String::new(), name, e.to_string())));
            }
        }
    }

    let mut outcome = pool.run(jobs).await?;
    for (idx, result) in unreadable {
        outcome.results.insert(idx, result);
    }
    Ok(outcome)
}

fn print_report(report: &ScanReport) {
    let r = &report.result;
    println!("== {} [{}] {}", r.name, r.status, r.key.get(..12).unwrap_or("-"));
    println!("{}", r.text.trim_end());
    if !report.fields.is_empty() {
        println!("-- fields");
        for (name, value) in report.fields.iter() {
            println!("{name}: {value}");
        }
    }
    if !report.table.is_empty() {
        println!("-- table ({} rows)", report.table.len());
        for row in &report.table {
            println!("{row}");
        }
    }
    println!();
}

pub async fn binarize(input: &Path, output: &Path, threshold: f64) -> Result<()> {
    let data = tokio::fs::read(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let png = tokio::task::spawn_blocking(move || docscan_ocr::binarize_bytes(&data, threshold))
        .await?
        .with_context(|| format!("Failed to binarize {}", input.display()))?;
    tokio::fs::write(output, png)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;
    tracing::info!(input = %input.display(), output = %output.display(), threshold, "Binarized");
    Ok(())
}

pub async fn extract(cfg: &ScanConfig, file: Option<&Path>) -> Result<()> {
    let text = match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("Failed to read stdin")?;
            buf
        }
    };

    let extractor = Extractor::with_label_mode(cfg.extract.label_mode);
    let extraction = Extraction {
        fields: extractor.fields(&text, &cfg.extract.fields),
        table: Extractor::table(&text, &cfg.extract.columns),
    };
    println!("{}", serde_json::to_string_pretty(&extraction)?);
    Ok(())
}

/// Poll interval while waiting for a copied-in file to stop growing.
const SETTLE_INTERVAL: Duration = Duration::from_millis(250);

pub async fn watch(cfg: &ScanConfig, dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let mut pipelines = build_pipelines(cfg, None, 1);
    let pipeline = pipelines.remove(0);
    if !pipeline.is_ready() {
        bail!("No OCR engine available for language '{}'", cfg.ocr.lang);
    }

    // Watcher thread → paths → settled jobs → worker → results.
    let (path_tx, mut path_rx) = mpsc::channel::<PathBuf>(64);
    let (settled_tx, mut settled_rx) = mpsc::channel::<(PathBuf, std::io::Result<ScanJob>)>(64);
    let (job_tx, job_rx) = mpsc::channel::<ScanJob>(64);
    let (result_tx, mut result_rx) = mpsc::channel(64);

    let _watcher = spawn_intake_watcher(dir, path_tx)
        .with_context(|| format!("Failed to watch {}", dir.display()))?;
    let worker = spawn_scan_worker(pipeline, job_rx, result_tx);
    let extractor = Extractor::with_label_mode(cfg.extract.label_mode);
    let mut settling: HashSet<PathBuf> = HashSet::new();
    let mut printed: HashSet<String> = HashSet::new();

    tracing::info!(dir = %dir.display(), "Watching intake folder");

    loop {
        tokio::select! {
            Some(path) = path_rx.recv() => {
                // Repeated events for a file still being written fold into one read.
                if settling.insert(path.clone()) {
                    let settled_tx = settled_tx.clone();
                    tokio::spawn(async move {
                        let job = match wait_for_stable_size(&path, SETTLE_INTERVAL).await {
                            Ok(_) => ScanJob::from_path(&path).await,
                            Err(e) => Err(e),
                        };
                        let _ = settled_tx.send((path, job)).await;
                    });
                }
            }
            Some((path, job)) = settled_rx.recv() => {
                settling.remove(&path);
                match job {
                    Ok(job) => {
                        if job_tx.send(job).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to read new file"),
                }
            }
            Some(result) = result_rx.recv() => {
                print_watched(&extractor, cfg, &mut printed, &result)?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, draining queue");
                break;
            }
        }
    }

    drop(job_tx);
    while let Some(result) = result_rx.recv().await {
        print_watched(&extractor, cfg, &mut printed, &result)?;
    }
    let pipeline = worker.await.context("Scan worker crashed")?;
    pipeline.shutdown()?;
    Ok(())
}

/// Print a JSON report line unless this content was already reported.
fn print_watched(
    extractor: &Extractor,
    cfg: &ScanConfig,
    printed: &mut HashSet<String>,
    result: &ScanResult,
) -> Result<()> {
    if !printed.insert(result.key.clone()) {
        tracing::debug!(key = %result.key, name = %result.name, "Unchanged content, not reporting again");
        return Ok(());
    }
    let report = build_report(extractor, result, &cfg.extract.fields, &cfg.extract.columns);
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_serializes_ordered() {
        let text = "Name: Ann\nID Score\n1 90";
        let extraction = Extraction {
            fields: docscan_ocr::extract_fields(text, &["Name", "Email"]),
            table: docscan_ocr::extract_table(text, &["ID", "Score"]),
        };
        let json = serde_json::to_string(&extraction).unwrap();
        assert_eq!(json, r#"{"fields":{"Name":"Ann","Email":""},"table":[{"ID":"1","Score":"90"}]}"#);
    }

    #[tokio::test]
    async fn binarize_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        let output = dir.path().join("out.png");
        image::RgbaImage::from_pixel(3, 3, image::Rgba([200, 200, 200, 255]))
            .save(&input)
            .unwrap();

        binarize(&input, &output, 128.0).await.unwrap();

        let out = image::open(&output).unwrap().to_rgba8();
        assert!(out.pixels().all(|p| p.0 == [255, 255, 255, 255]));
    }

    #[tokio::test]
    async fn binarize_rejects_non_images() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        std::fs::write(&input, b"nope").unwrap();
        assert!(binarize(&input, &dir.path().join("o.png"), 128.0).await.is_err());
    }

    #[tokio::test]
    async fn unreadable_file_keeps_its_slot() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.png");
        let last = dir.path().join("c.png");
        std::fs::write(&first, b"first page").unwrap();
        std::fs::write(&last, b"last page").unwrap();
        let files = vec![first, dir.path().join("missing.png"), last];
        let pool = ScanPool::acquire(
            &docscan_ocr::MockRecognizer::new("text"),
            "eng",
            1,
            &PreprocessOptions::default(),
        );

        let outcome = scan_files(pool, &files).await.unwrap();

        let names: Vec<_> = outcome.results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names[0], "a.png");
        assert!(names[1].ends_with("missing.png"));
        assert_eq!(names[2], "c.png");
        assert!(outcome.results[0].is_recognized());
        assert!(!outcome.results[1].is_recognized());
        assert_eq!(outcome.results[1].text, "Error processing image");
        assert!(outcome.results[1].key.is_empty());
        assert!(outcome.results[2].is_recognized());
    }

    #[cfg(not(feature = "tesseract"))]
    #[tokio::test]
    async fn scan_without_engine_fails_up_front() {
        let err = scan(&ScanConfig::default(), vec![PathBuf::from("a.png")], None, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No OCR engine available"));
    }
}

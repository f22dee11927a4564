use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use docscan_core::{LabelMode, ScanConfig};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "docscan", version, about = "Binarize, OCR and extract structured data from scanned documents")]
struct Cli {
    /// Config file (defaults to the per-user docscan.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run images through preprocessing and OCR, then extract fields and tables.
    Scan {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[command(flatten)]
        pipeline: PipelineArgs,
        #[command(flatten)]
        extract: ExtractArgs,
        /// Store every preprocessed image under this directory.
        #[arg(long)]
        archive: Option<PathBuf>,
        /// Print reports as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Write a black/white PNG of an image.
    Binarize {
        input: PathBuf,
        output: PathBuf,
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Extract fields and a table from already recognized text (stdin when no file).
    Extract {
        file: Option<PathBuf>,
        #[command(flatten)]
        extract: ExtractArgs,
    },
    /// Scan images as they appear in a folder until interrupted.
    Watch {
        dir: PathBuf,
        #[command(flatten)]
        pipeline: PipelineArgs,
        #[command(flatten)]
        extract: ExtractArgs,
    },
}

#[derive(Debug, Args)]
struct PipelineArgs {
    /// Luminance threshold for binarization (0–255).
    #[arg(long)]
    threshold: Option<f64>,
    /// Send images to OCR without binarizing.
    #[arg(long)]
    no_binarize: bool,
    /// Downscale and re-encode images before OCR.
    #[arg(long)]
    compress: bool,
    /// OCR language selector, e.g. "ind+eng".
    #[arg(long)]
    lang: Option<String>,
    /// Number of OCR engine instances.
    #[arg(long)]
    workers: Option<usize>,
}

impl PipelineArgs {
    fn apply(&self, cfg: &mut ScanConfig) {
        if let Some(t) = self.threshold {
            cfg.preprocess.threshold = t;
        }
        if self.no_binarize {
            cfg.preprocess.binarize = false;
        }
        if self.compress {
            cfg.preprocess.compress = true;
        }
        if let Some(lang) = &self.lang {
            cfg.ocr.lang = lang.clone();
        }
        if let Some(workers) = self.workers {
            cfg.ocr.workers = workers;
        }
    }
}

#[derive(Debug, Args)]
struct ExtractArgs {
    /// Field label to extract; repeatable. Replaces the configured list.
    #[arg(long = "field")]
    fields: Vec<String>,
    /// Table column name; repeatable. Replaces the configured list.
    #[arg(long = "column")]
    columns: Vec<String>,
    /// "literal" or "pattern".
    #[arg(long)]
    label_mode: Option<LabelMode>,
}

impl ExtractArgs {
    fn apply(&self, cfg: &mut ScanConfig) {
        if !self.fields.is_empty() {
            cfg.extract.fields = self.fields.clone();
        }
        if !self.columns.is_empty() {
            cfg.extract.columns = self.columns.clone();
        }
        if let Some(mode) = self.label_mode {
            cfg.extract.label_mode = mode;
        }
    }
}

fn load_config(explicit: Option<&Path>) -> Result<ScanConfig> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => match ScanConfig::default_path() {
            Some(p) => p,
            None => return Ok(ScanConfig::default()),
        },
    };
    let cfg = ScanConfig::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    tracing::debug!(path = %path.display(), "Config loaded");
    Ok(cfg)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Scan { files, pipeline, extract, archive, json } => {
            pipeline.apply(&mut cfg);
            extract.apply(&mut cfg);
            commands::scan(&cfg, files, archive, json).await
        }
        Command::Binarize { input, output, threshold } => {
            let threshold = threshold.unwrap_or(cfg.preprocess.threshold);
            commands::binarize(&input, &output, threshold).await
        }
        Command::Extract { file, extract } => {
            extract.apply(&mut cfg);
            commands::extract(&cfg, file.as_deref()).await
        }
        Command::Watch { dir, pipeline, extract } => {
            pipeline.apply(&mut cfg);
            extract.apply(&mut cfg);
            commands::watch(&cfg, &dir).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn scan_flags_override_config() {
        let cli = Cli::parse_from([
            "docscan", "scan", "a.png", "--threshold", "90", "--no-binarize", "--compress",
            "--lang", "eng", "--workers", "2", "--field", "Name", "--field", "Email",
            "--column", "ID", "--label-mode", "pattern",
        ]);
        let mut cfg = ScanConfig::default();
        let Command::Scan { pipeline, extract, files, .. } = cli.command else {
            panic!("expected scan");
        };
        pipeline.apply(&mut cfg);
        extract.apply(&mut cfg);

        assert_eq!(files, vec![PathBuf::from("a.png")]);
        assert_eq!(cfg.preprocess.threshold, 90.0);
        assert!(!cfg.preprocess.binarize);
        assert!(cfg.preprocess.compress);
        assert_eq!(cfg.ocr.lang, "eng");
        assert_eq!(cfg.ocr.workers, 2);
        assert_eq!(cfg.extract.fields, vec!["Name", "Email"]);
        assert_eq!(cfg.extract.columns, vec!["ID"]);
        assert_eq!(cfg.extract.label_mode, LabelMode::Pattern);
    }

    #[test]
    fn absent_flags_keep_config() {
        let cli = Cli::parse_from(["docscan", "extract"]);
        let mut cfg = ScanConfig::default();
        cfg.extract.fields = vec!["Total".into()];
        let Command::Extract { extract, file } = cli.command else {
            panic!("expected extract");
        };
        extract.apply(&mut cfg);
        assert!(file.is_none());
        assert_eq!(cfg.extract.fields, vec!["Total"]);
        assert_eq!(cfg.extract.label_mode, LabelMode::Literal);
    }

    #[test]
    fn explicit_missing_config_is_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(Some(&dir.path().join("none.toml"))).unwrap();
        assert_eq!(cfg, ScanConfig::default());
    }
}

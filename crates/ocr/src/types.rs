use chrono::{DateTime, Utc};
use docscan_core::{FieldResult, TableResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::hash;

/// Text recorded for a file whose preprocessing or recognition failed.
pub const ERROR_SENTINEL: &str = "Error processing image";

/// One input file queued for scanning.
#[derive(Debug, Clone)]
pub struct ScanJob {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl ScanJob {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { name: name.into(), bytes }
    }

    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { name, bytes })
    }

    /// Content key: SHA-256 hex digest of the bytes.
    pub fn key(&self) -> String {
        hash::to_hex(&hash::sha256_bytes(&self.bytes))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ScanStatus {
    Recognized,
    Failed { reason: String },
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanStatus::Recognized => write!(f, "recognized"),
            ScanStatus::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Outcome for one file. Failed files keep their slot with [`ERROR_SENTINEL`] as text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub key: String,
    pub name: String,
    pub text: String,
    pub status: ScanStatus,
    pub processed_at: DateTime<Utc>,
}

impl ScanResult {
    pub fn recognized(key: String, name: String, text: String) -> Self {
        Self { key, name, text, status: ScanStatus::Recognized, processed_at: Utc::now() }
    }

    pub fn failed(key: String, name: String, reason: impl Into<String>) -> Self {
        Self {
            key,
            name,
            text: ERROR_SENTINEL.to_string(),
            status: ScanStatus::Failed { reason: reason.into() },
            processed_at: Utc::now(),
        }
    }

    pub fn is_recognized(&self) -> bool {
        self.status == ScanStatus::Recognized
    }
}

/// A scan result together with the structure pulled out of its text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    #[serde(flatten)]
    pub result: ScanResult,
    pub fields: FieldResult,
    pub table: TableResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_result_carries_sentinel_text() {
        let r = ScanResult::failed("k".into(), "a.png".into(), "decode");
        assert_eq!(r.text, "Error processing image");
        assert!(!r.is_recognized());
        assert_eq!(r.status.to_string(), "failed: decode");
    }

    #[test]
    fn job_key_is_content_hash() {
        let a = ScanJob::new("a.png", b"same".to_vec());
        let b = ScanJob::new("b.png", b"same".to_vec());
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key().len(), 64);
        assert_ne!(a.key(), ScanJob::new("a.png", b"other".to_vec()).key());
    }

    #[test]
    fn status_serializes_tagged() {
        let json = serde_json::to_string(&ScanStatus::Failed { reason: "x".into() }).unwrap();
        assert_eq!(json, r#"{"state":"failed","reason":"x"}"#);
        let json = serde_json::to_string(&ScanStatus::Recognized).unwrap();
        assert_eq!(json, r#"{"state":"recognized"}"#);
    }

    #[tokio::test]
    async fn job_from_path_uses_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        tokio::fs::write(&path, b"bytes").await.unwrap();
        let job = ScanJob::from_path(&path).await.unwrap();
        assert_eq!(job.name, "scan.png");
        assert_eq!(job.bytes, b"bytes");
    }
}

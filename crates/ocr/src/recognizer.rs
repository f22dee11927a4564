use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Image decode error: {0}")]
    ImageDecode(String),
    #[error("OCR engine error: {0}")]
    Engine(String),
    #[error("Tesseract not available; build with `tesseract` feature")]
    NotAvailable,
}

/// Engine phase attached to each progress notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrStatus {
    LoadingLanguage,
    Initializing,
    RecognizingText,
}

impl fmt::Display for OcrStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OcrStatus::LoadingLanguage => write!(f, "loading language traineddata"),
            OcrStatus::Initializing => write!(f, "initializing api"),
            OcrStatus::RecognizingText => write!(f, "recognizing text"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OcrProgress {
    pub status: OcrStatus,
    /// Fraction complete within `status`, 0.0–1.0.
    pub progress: f32,
}

impl OcrProgress {
    pub fn new(status: OcrStatus, progress: f32) -> Self {
        Self { status, progress: progress.clamp(0.0, 1.0) }
    }

    /// Whole-number percentage, only for the recognizing phase.
    pub fn percent(&self) -> Option<u8> {
        (self.status == OcrStatus::RecognizingText)
            .then(|| (self.progress * 100.0).round() as u8)
    }
}

pub type ProgressSender = mpsc::UnboundedSender<OcrProgress>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<OcrProgress>;

/// One OCR engine instance.
///
/// `recognize` takes `&mut self`, so an instance never has two recognitions in
/// flight. Progress is reported on `progress`; a closed receiver is not an error.
pub trait OcrBackend: Send {
    fn recognize(&mut self, image_bytes: &[u8], progress: &ProgressSender) -> Result<String, OcrError>;

    fn terminate(&mut self) -> Result<(), OcrError> {
        Ok(())
    }
}

/// Creates engine instances for a language selector such as `"ind+eng"`.
pub trait OcrProvider: Send + Sync {
    fn create(&self, lang: &str) -> Result<Box<dyn OcrBackend>, OcrError>;
}

/// An acquired engine instance with an explicit lifecycle.
///
/// Releasing consumes the handle; nothing can be recognized afterwards.
pub struct AdapterHandle {
    id: Uuid,
    lang: String,
    backend: Box<dyn OcrBackend>,
}

impl AdapterHandle {
    pub fn acquire(provider: &dyn OcrProvider, lang: &str) -> Result<Self, OcrError> {
        let backend = provider.create(lang)?;
        let handle = Self { id: Uuid::new_v4(), lang: lang.to_string(), backend };
        tracing::info!(adapter = %handle.id, lang, "OCR adapter acquired");
        Ok(handle)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn lang(&self) -> &str {
        &self.lang
    }

    pub fn recognize(&mut self, image_bytes: &[u8], progress: &ProgressSender) -> Result<String, OcrError> {
        self.backend.recognize(image_bytes, progress)
    }

    pub fn release(mut self) -> Result<(), OcrError> {
        tracing::info!(adapter = %self.id, "OCR adapter released");
        self.backend.terminate()
    }
}

impl fmt::Debug for AdapterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterHandle")
            .field("id", &self.id)
            .field("lang", &self.lang)
            .finish_non_exhaustive()
    }
}

// ── Mock backend (always available, used for tests) ───────────────────────────

/// Returns a pre-set string, for unit testing the extraction pipeline
/// without requiring Tesseract to be installed.
#[derive(Debug, Clone)]
pub struct MockRecognizer {
    pub text: String,
}

impl MockRecognizer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl OcrBackend for MockRecognizer {
    fn recognize(&mut self, _image_bytes: &[u8], progress: &ProgressSender) -> Result<String, OcrError> {
        let _ = progress.send(OcrProgress::new(OcrStatus::LoadingLanguage, 1.0));
        for step in [0.0, 0.5, 1.0] {
            let _ = progress.send(OcrProgress::new(OcrStatus::RecognizingText, step));
        }
        Ok(self.text.clone())
    }
}

impl OcrProvider for MockRecognizer {
    fn create(&self, _lang: &str) -> Result<Box<dyn OcrBackend>, OcrError> {
        Ok(Box::new(self.clone()))
    }
}

// ── Tesseract backend (optional, gated behind `tesseract` feature) ─────────────

/// Builds Tesseract instances. Without the `tesseract` feature every
/// `create` fails with [`OcrError::NotAvailable`].
#[derive(Debug, Clone, Default)]
pub struct TesseractProvider {
    pub data_path: Option<String>,
}

impl TesseractProvider {
    pub fn new(data_path: Option<String>) -> Self {
        Self { data_path }
    }
}

#[cfg(not(feature = "tesseract"))]
impl OcrProvider for TesseractProvider {
    fn create(&self, _lang: &str) -> Result<Box<dyn OcrBackend>, OcrError> {
        Err(OcrError::NotAvailable)
    }
}

#[cfg(feature = "tesseract")]
impl OcrProvider for TesseractProvider {
    fn create(&self, lang: &str) -> Result<Box<dyn OcrBackend>, OcrError> {
        let r = tesseract_backend::TesseractRecognizer::new(self.data_path.as_deref(), lang)?;
        Ok(Box::new(r))
    }
}

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use super::{OcrBackend, OcrError, OcrProgress, OcrStatus, ProgressSender};
    use leptess::LepTess;

    pub struct TesseractRecognizer {
        lt: LepTess,
    }

    impl TesseractRecognizer {
        pub fn new(data_path: Option<&str>, lang: &str) -> Result<Self, OcrError> {
            let lt = LepTess::new(data_path, lang).map_err(|e| OcrError::Engine(e.to_string()))?;
            Ok(Self { lt })
        }
    }

    impl OcrBackend for TesseractRecognizer {
        fn recognize(&mut self, image_bytes: &[u8], progress: &ProgressSender) -> Result<String, OcrError> {
            let _ = progress.send(OcrProgress::new(OcrStatus::Initializing, 1.0));
            self.lt
                .set_image_from_mem(image_bytes)
                .map_err(|e| OcrError::ImageDecode(e.to_string()))?;
            let _ = progress.send(OcrProgress::new(OcrStatus::RecognizingText, 0.0));
            let text = self.lt.get_utf8_text().map_err(|e| OcrError::Engine(e.to_string()))?;
            let _ = progress.send(OcrProgress::new(OcrStatus::RecognizingText, 1.0));
            Ok(text)
        }
    }
}

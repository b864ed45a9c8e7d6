//! Error taxonomy for the signing core.
//!
//! Everything below [`SignError::HardFailure`] is recoverable: the recovery
//! controller downgrades it to a degraded but successful result. Each variant
//! carries a stable snake_case code so the command boundary can report it
//! without string matching on messages.

/// Errors raised while composing or recovering a signed document.
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    /// The uploaded bytes do not parse as a PDF.
    #[error("pdf_parse_failed:{0}")]
    InvalidDocument(String),

    /// The parsed document has no pages.
    #[error("pdf_has_no_pages")]
    EmptyDocument,

    /// A signature payload was supplied but is undecodable or implausibly small.
    #[error("signature_invalid:{0}")]
    InvalidSignature(String),

    /// The image could not be embedded into the page.
    #[error("signature_embed_failed:{0}")]
    EmbedFailure(String),

    /// The modified document could not be re-encoded.
    #[error("pdf_save_failed:{0}")]
    SerializationFailure(String),

    /// Composition did not finish within the configured budget.
    #[error("sign_timeout:{0}ms")]
    Timeout(u64),

    /// The background worker died or dropped the job.
    #[error("worker_failed:{0}")]
    Worker(String),

    /// Even the copy-through fallback could not be produced.
    #[error("sign_hard_failure:{cause}")]
    HardFailure {
        cause: String,
        fallback: Option<String>,
    },
}

impl SignError {
    pub fn code(&self) -> &'static str {
        match self {
            SignError::InvalidDocument(_) => "invalid_document",
            SignError::EmptyDocument => "empty_document",
            SignError::InvalidSignature(_) => "invalid_signature",
            SignError::EmbedFailure(_) => "embed_failure",
            SignError::SerializationFailure(_) => "serialization_failure",
            SignError::Timeout(_) => "timeout",
            SignError::Worker(_) => "worker_failed",
            SignError::HardFailure { .. } => "hard_failure",
        }
    }

    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SignError::HardFailure { .. })
    }
}

/// Errors raised by the signature capture surface.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("signature_empty")]
    EmptyCapture,

    #[error("signature_encode_failed:{0}")]
    Encode(#[from] image::ImageError),
}

impl CaptureError {
    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::EmptyCapture => "empty_capture",
            CaptureError::Encode(_) => "capture_encode_failed",
        }
    }
}

/// Errors raised while accepting an upload, before any composition happens.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("No PDF file provided")]
    Missing,

    #[error("File too large. Maximum size is {limit_mb}MB.")]
    TooLarge { size: u64, limit_mb: u64 },

    #[error("Only PDF files are allowed")]
    NotPdf { detected: Option<String> },

    #[error("upload_malformed:{0}")]
    Malformed(String),

    #[error("upload_io_failed:{0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    pub fn code(&self) -> &'static str {
        match self {
            UploadError::Missing => "missing_file",
            UploadError::TooLarge { .. } => "file_too_large",
            UploadError::NotPdf { .. } => "invalid_document",
            UploadError::Malformed(_) => "malformed_upload",
            UploadError::Io(_) => "upload_io_failed",
        }
    }

    /// Io failures are on our side; everything else is the caller's input.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, UploadError::Io(_))
    }
}

pub type SignResult<T> = std::result::Result<T, SignError>;

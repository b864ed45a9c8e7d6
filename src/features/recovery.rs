//! Tiered degradation around the composer: signature image, then text
//! signature, then the original bytes returned verbatim with a warning.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{SignError, SignResult};
use crate::features::envelope::{TransferEnvelope, ValidatedImage};
use crate::features::pdf::{ComposedPdf, SignatureMode};
use crate::features::storage::StagedUpload;
use crate::i18n;

#[derive(Debug, Clone, Serialize)]
pub struct SignedDocument {
    pub id: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub signed_at: DateTime<Utc>,
    pub original_name: String,
    pub mode: SignatureMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Runs `compose` over the envelope and never lets a recoverable error
/// escape: any failure is answered with the staged original bytes, tagged
/// with a warning. Only a failure to produce even that copy is returned.
pub fn sign_with_recovery<F>(
    staged: &StagedUpload,
    envelope: TransferEnvelope,
    signed_at: DateTime<Utc>,
    locale: &str,
    compose: F,
) -> SignResult<SignedDocument>
where
    F: FnOnce(Vec<u8>, Option<ValidatedImage>) -> SignResult<ComposedPdf>,
{
    let original_name = staged.original_name().to_string();
    log::info!(
        "recovery: {} ({} bytes), signature {}, captured at {}",
        original_name,
        envelope.pdf_bytes.len(),
        if envelope.signature.is_some() { "present" } else { "absent" },
        envelope.captured_at.to_rfc3339()
    );
    let signature = envelope.validated_signature();
    let attempt = compose(envelope.pdf_bytes, signature);

    match attempt {
        Ok(composed) => {
            log::info!(
                "recovery: {} signed via {:?} path",
                original_name,
                composed.mode
            );
            Ok(SignedDocument {
                id: format!("signed_{}", Uuid::new_v4().simple()),
                bytes: composed.bytes,
                signed_at,
                original_name,
                mode: composed.mode,
                warning: None,
            })
        }
        Err(err) => copy_through(staged, err, signed_at, locale),
    }
}

fn copy_through(
    staged: &StagedUpload,
    cause: SignError,
    signed_at: DateTime<Utc>,
    locale: &str,
) -> SignResult<SignedDocument> {
    if !cause.is_recoverable() {
        return Err(cause);
    }
    log::warn!(
        "recovery: signing {} failed ({}), copying original through",
        staged.original_name(),
        cause
    );
    match staged.read_bytes() {
        Ok(bytes) => Ok(SignedDocument {
            id: format!("fallback_{}", Uuid::new_v4().simple()),
            bytes,
            signed_at,
            original_name: staged.original_name().to_string(),
            mode: SignatureMode::CopyThrough,
            warning: Some(i18n::copy_through_warning(locale)),
        }),
        Err(e) => {
            log::error!("recovery: copy-through also failed: {e}");
            Err(SignError::HardFailure {
                cause: cause.to_string(),
                fallback: Some(e.to_string()),
            })
        }
    }
}

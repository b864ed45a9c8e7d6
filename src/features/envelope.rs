use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chrono::{DateTime, Utc};

use crate::error::SignError;

/// Shortest base64 body we treat as a real drawing rather than an empty pad.
pub const MIN_SIGNATURE_CHARS: usize = 100;
/// Decoded size below which no lossless raster of a signature is plausible.
pub const MIN_SIGNATURE_BYTES: usize = 64;

/// Signature bytes that passed transport validation. Whether they decode as an
/// image is only known once the composer tries to embed them.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedImage {
    pub bytes: Vec<u8>,
    pub media_type: Option<String>,
}

/// Everything a single signing request carries across to the composer.
#[derive(Debug, Clone)]
pub struct TransferEnvelope {
    pub pdf_bytes: Vec<u8>,
    pub signature: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl TransferEnvelope {
    pub fn new(pdf_bytes: Vec<u8>, signature: Option<String>, captured_at: DateTime<Utc>) -> Self {
        Self {
            pdf_bytes,
            signature,
            captured_at,
        }
    }

    /// Parses an RFC 3339 capture time, falling back to now when absent or unreadable.
    pub fn with_timestamp(pdf_bytes: Vec<u8>, signature: Option<String>, timestamp: Option<&str>) -> Self {
        let captured_at = timestamp
            .and_then(|ts| match DateTime::parse_from_rfc3339(ts.trim()) {
                Ok(parsed) => Some(parsed.with_timezone(&Utc)),
                Err(e) => {
                    log::warn!("envelope: ignoring unreadable signature timestamp {ts:?}: {e}");
                    None
                }
            })
            .unwrap_or_else(Utc::now);
        Self::new(pdf_bytes, signature, captured_at)
    }

    /// The signature as a typed image, or `None` when it is missing or implausible.
    pub fn validated_signature(&self) -> Option<ValidatedImage> {
        let payload = self.signature.as_deref()?;
        match validate_signature(payload) {
            Ok(image) => Some(image),
            Err(e) => {
                log::info!("envelope: signature treated as absent: {e}");
                None
            }
        }
    }
}

/// Strips an optional `data:<media-type>;base64,` header and decodes the body.
pub fn validate_signature(payload: &str) -> Result<ValidatedImage, SignError> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Err(SignError::InvalidSignature("empty_payload".into()));
    }
    let (media_type, body) = split_data_url(trimmed)?;
    let body: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    log::debug!(
        "envelope: payload {} chars, body {} chars, media type {:?}",
        trimmed.len(),
        body.len(),
        media_type
    );
    if body.len() < MIN_SIGNATURE_CHARS {
        return Err(SignError::InvalidSignature(format!("too_short:{}", body.len())));
    }
    let bytes = B64
        .decode(body.as_bytes())
        .map_err(|e| SignError::InvalidSignature(format!("base64_decode_failed:{e}")))?;
    if bytes.len() < MIN_SIGNATURE_BYTES {
        return Err(SignError::InvalidSignature(format!("decoded_too_short:{}", bytes.len())));
    }
    Ok(ValidatedImage { bytes, media_type })
}

fn split_data_url(payload: &str) -> Result<(Option<String>, &str), SignError> {
    let Some(rest) = payload.strip_prefix("data:") else {
        return Ok((None, payload));
    };
    let (header, body) = rest
        .split_once(',')
        .ok_or_else(|| SignError::InvalidSignature("data_url_missing_comma".into()))?;
    let media_type = header
        .strip_suffix(";base64")
        .ok_or_else(|| SignError::InvalidSignature("data_url_not_base64".into()))?;
    let media_type = (!media_type.is_empty()).then(|| media_type.to_ascii_lowercase());
    Ok((media_type, body))
}

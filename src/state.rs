use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::features::capture::{CaptureSurface, SurfaceGeometry};
use crate::features::pdf::SignatureMode;

/// A capture that was exported and is waiting to be attached to a document.
#[derive(Debug, Clone, Serialize)]
pub struct SavedSignature {
    #[serde(skip)]
    pub data_url: String,
    pub captured_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
}

/// Outcome of the most recent `pdf_sign`, kept for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct LastSigning {
    pub id: String,
    pub signed_path: String,
    pub mode: SignatureMode,
    pub warning: Option<String>,
}

pub struct AppState {
    /// Created on `signature_configure`, or lazily with the default geometry.
    pub capture: Option<CaptureSurface>,
    pub saved_signature: Option<SavedSignature>,
    pub last_signing: Option<LastSigning>,
    pub last_error: Option<String>,
    pub locale: String,
}

impl AppState {
    // const so it can be used in static initialization
    pub const fn new() -> Self {
        Self {
            capture: None,
            saved_signature: None,
            last_signing: None,
            last_error: None,
            locale: String::new(),
        }
    }

    pub fn locale(&self) -> &str {
        if self.locale.is_empty() {
            "en"
        } else {
            &self.locale
        }
    }

    pub fn capture_mut(&mut self) -> &mut CaptureSurface {
        self.capture.get_or_insert_with(CaptureSurface::default)
    }

    /// Replaces the surface. Any ink and any saved export are discarded with it.
    pub fn configure_capture(&mut self, geometry: SurfaceGeometry) {
        self.capture = Some(CaptureSurface::new(geometry));
        self.saved_signature = None;
    }

    pub fn clear_capture(&mut self) {
        if let Some(surface) = self.capture.as_mut() {
            surface.clear();
        }
        self.saved_signature = None;
    }

    /// Drops the session but keeps the chosen locale.
    pub fn reset_runtime(&mut self) {
        self.capture = None;
        self.saved_signature = None;
        self.last_signing = None;
        self.last_error = None;
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::capture::PointerId;

    #[test]
    fn locale_defaults_to_english() {
        let mut state = AppState::new();
        assert_eq!(state.locale(), "en");
        state.locale = "is".into();
        assert_eq!(state.locale(), "is");
    }

    #[test]
    fn reconfiguring_discards_ink_and_saved_export() {
        let mut state = AppState::new();
        let surface = state.capture_mut();
        surface.begin(PointerId::MOUSE, 10.0, 10.0);
        surface.extend(PointerId::MOUSE, 40.0, 30.0);
        surface.end(PointerId::MOUSE);
        assert!(state.capture_mut().has_ink());
        state.saved_signature = Some(SavedSignature {
            data_url: "data:image/png;base64,AAAA".into(),
            captured_at: Utc::now(),
            width: 600,
            height: 192,
        });

        state.configure_capture(SurfaceGeometry::new(0.0, 0.0, 300.0, 100.0, 2.0));
        assert!(!state.capture_mut().has_ink());
        assert!(state.saved_signature.is_none());
    }

    #[test]
    fn reset_keeps_locale() {
        let mut state = AppState::new();
        state.locale = "is".into();
        state.last_error = Some("x".into());
        state.capture_mut();
        state.reset_runtime();
        assert!(state.capture.is_none());
        assert!(state.last_error.is_none());
        assert_eq!(state.locale(), "is");
    }
}

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{mpsc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::SignerConfig;
use crate::error::{CaptureError, SignError, SignResult, UploadError};
use crate::features::capture::{CaptureSurface, PointerId, SurfaceGeometry};
use crate::features::envelope::{TransferEnvelope, ValidatedImage};
use crate::features::pdf::{compose, ComposedPdf, MemoryWriter};
use crate::features::recovery::sign_with_recovery;
use crate::features::storage::{parse_file_uri_path, persist_signed, StagedUpload};
use crate::i18n;
use crate::state::{AppState, LastSigning, SavedSignature};

#[cfg(test)]
use std::sync::atomic::{AtomicU64, Ordering};

struct GlobalState {
    ui: Mutex<AppState>,
}

impl GlobalState {
    const fn new() -> Self {
        Self {
            ui: Mutex::new(AppState::new()),
        }
    }

    /// A panic inside a handler poisons the mutex; the session data is still
    /// usable, so keep going with it.
    fn ui_lock(&self) -> MutexGuard<'_, AppState> {
        match self.ui.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("router: ui mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// One composition handed to a worker thread. The reply channel is owned by
/// the request; if the request stops waiting, the send just fails.
struct ComposeJob {
    pdf_bytes: Vec<u8>,
    signature: Option<ValidatedImage>,
    signed_at: DateTime<Utc>,
    locale: String,
    reply: mpsc::Sender<SignResult<ComposedPdf>>,
}

/// Runs a composition on a thread of its own and waits at most `timeout`.
/// Each request gets a fresh thread; one that overruns keeps going in the
/// background and its late reply is dropped, without delaying later requests.
fn compose_on_worker(
    pdf_bytes: Vec<u8>,
    signature: Option<ValidatedImage>,
    signed_at: DateTime<Utc>,
    locale: &str,
    timeout: Duration,
) -> SignResult<ComposedPdf> {
    let (reply, response) = mpsc::channel();
    let job = ComposeJob {
        pdf_bytes,
        signature,
        signed_at,
        locale: locale.to_string(),
        reply,
    };
    thread::Builder::new()
        .name("signpad-worker".into())
        .spawn(move || run_compose_job(job))
        .map_err(|e| SignError::Worker(format!("worker_spawn_failed:{e}")))?;

    match response.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            log::warn!("worker: composition exceeded {}ms", timeout.as_millis());
            Err(SignError::Timeout(timeout.as_millis() as u64))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(SignError::Worker("worker_dropped_job".into()))
        }
    }
}

fn run_compose_job(job: ComposeJob) {
    test_worker_delay();
    let ComposeJob {
        pdf_bytes,
        signature,
        signed_at,
        locale,
        reply,
    } = job;
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        compose(&pdf_bytes, signature.as_ref(), &signed_at, &locale, &MemoryWriter)
    }))
    .unwrap_or_else(|_| Err(SignError::Worker("compose_panicked".into())));
    if reply.send(result).is_err() {
        log::warn!("worker: requester stopped waiting, result discarded");
    }
}

static STATE: GlobalState = GlobalState::new();

#[cfg(test)]
static TEST_WORKER_DELAY_MS: AtomicU64 = AtomicU64::new(0);

#[cfg(test)]
fn test_worker_delay() {
    let delay = TEST_WORKER_DELAY_MS.load(Ordering::SeqCst);
    if delay > 0 {
        thread::sleep(Duration::from_millis(delay));
    }
}

#[cfg(not(test))]
fn test_worker_delay() {}

/// A request from the host, as JSON.
#[derive(Debug, Default, Deserialize)]
pub struct Command {
    pub action: String,
    /// Upload already written to disk by the host (plain path or `file://`).
    /// The crate takes ownership: the file is deleted once the request
    /// finishes, whether it was signed or rejected. Pass a copy to keep the
    /// original.
    pub path: Option<String>,
    pub pdf_base64: Option<String>,
    pub original_name: Option<String>,
    pub mime_type: Option<String>,
    pub pointer_id: Option<i64>,
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub bindings: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PointerPhase {
    Down,
    Move,
    Up,
    Cancel,
}

enum UploadSource {
    Path(PathBuf),
    Inline(String),
    Missing,
}

struct SignRequest {
    source: UploadSource,
    original_name: Option<String>,
    mime_type: Option<String>,
    signature: Option<String>,
    signature_timestamp: Option<String>,
}

enum Action {
    Init { locale: Option<String> },
    Reset,
    Health,
    SignatureConfigure { geometry: SurfaceGeometry },
    SignaturePointer {
        phase: PointerPhase,
        pointer: PointerId,
        position: Option<(f32, f32)>,
    },
    SignatureClear,
    SignatureSave,
    PdfSign(SignRequest),
}

fn parse_action(command: Command) -> Result<Action, String> {
    let Command {
        action,
        path,
        pdf_base64,
        original_name,
        mime_type,
        pointer_id,
        x,
        y,
        bindings,
    } = command;

    let mut bindings = bindings.unwrap_or_default();

    match action.as_str() {
        "init" => Ok(Action::Init {
            locale: bindings.remove("locale"),
        }),
        "reset" => Ok(Action::Reset),
        "health" => Ok(Action::Health),
        "signature_configure" => {
            let display_width = binding_f32(&bindings, "display_width")?
                .ok_or_else(|| "missing_binding:display_width".to_string())?;
            let display_height = binding_f32(&bindings, "display_height")?
                .ok_or_else(|| "missing_binding:display_height".to_string())?;
            let geometry = SurfaceGeometry::new(
                binding_f32(&bindings, "offset_x")?.unwrap_or(0.0),
                binding_f32(&bindings, "offset_y")?.unwrap_or(0.0),
                display_width,
                display_height,
                binding_f32(&bindings, "device_pixel_ratio")?.unwrap_or(1.0),
            );
            Ok(Action::SignatureConfigure { geometry })
        }
        "signature_pointer_down" | "signature_pointer_move" | "signature_pointer_up"
        | "signature_pointer_cancel" => {
            let phase = match action.as_str() {
                "signature_pointer_down" => PointerPhase::Down,
                "signature_pointer_move" => PointerPhase::Move,
                "signature_pointer_up" => PointerPhase::Up,
                _ => PointerPhase::Cancel,
            };
            let position = x.zip(y);
            if matches!(phase, PointerPhase::Down | PointerPhase::Move) && position.is_none() {
                return Err("missing_coordinates".into());
            }
            Ok(Action::SignaturePointer {
                phase,
                pointer: pointer_id.map(PointerId).unwrap_or(PointerId::MOUSE),
                position,
            })
        }
        "signature_clear" => Ok(Action::SignatureClear),
        "signature_save" => Ok(Action::SignatureSave),
        "pdf_sign" => {
            let source = match (path, pdf_base64) {
                (Some(p), _) if !p.trim().is_empty() => UploadSource::Path(
                    parse_file_uri_path(p.trim()).unwrap_or_else(|| PathBuf::from(p.trim())),
                ),
                (_, Some(data)) if !data.trim().is_empty() => UploadSource::Inline(data),
                _ => UploadSource::Missing,
            };
            Ok(Action::PdfSign(SignRequest {
                source,
                original_name,
                mime_type,
                signature: bindings.remove("signature").filter(|s| !s.is_empty()),
                signature_timestamp: bindings.remove("signature_timestamp"),
            }))
        }
        other => Err(format!("unknown_action:{other}")),
    }
}

fn binding_f32(bindings: &HashMap<String, String>, key: &str) -> Result<Option<f32>, String> {
    match bindings.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<f32>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| format!("invalid_binding:{key}")),
    }
}

fn respond(status: u16, body: Value) -> Value {
    json!({ "status": status, "body": body })
}

fn bad_request(code: &str, message: impl Into<String>) -> Value {
    respond(400, json!({ "error": code, "message": message.into() }))
}

fn server_error(details: &str, locale: &str) -> Value {
    let (error, suggestion) = i18n::hard_failure_messages(locale);
    respond(
        500,
        json!({ "error": error, "details": details, "suggestion": suggestion }),
    )
}

fn capture_status(surface: &CaptureSurface) -> Value {
    json!({
        "drawing": surface.is_drawing(),
        "has_ink": surface.has_ink(),
        "strokes": surface.stroke_count(),
    })
}

/// Entry point for hosts: JSON command in, `{status, body}` JSON out.
/// Never panics across the boundary.
pub fn dispatch(input: &str) -> String {
    let response = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        match serde_json::from_str::<Command>(input) {
            Ok(command) => handle_command(command),
            Err(e) => bad_request("invalid_json", e.to_string()),
        }
    }));
    match response {
        Ok(value) => value.to_string(),
        Err(_) => {
            log::error!("router: handler panicked");
            respond(500, json!({ "error": "panic", "details": "handler panicked" })).to_string()
        }
    }
}

pub fn handle_command(command: Command) -> Value {
    let action = match parse_action(command) {
        Ok(action) => action,
        Err(err) => {
            log::warn!("router: rejected command: {err}");
            STATE.ui_lock().last_error = Some(err.clone());
            return bad_request("invalid_command", err);
        }
    };

    match action {
        Action::Init { locale } => {
            crate::init_logging();
            let mut state = STATE.ui_lock();
            let locale = locale.unwrap_or_else(|| SignerConfig::from_env().locale);
            i18n::update_locale(&mut state, &locale);
            respond(200, json!({ "locale": state.locale() }))
        }
        Action::Reset => {
            STATE.ui_lock().reset_runtime();
            respond(200, json!({ "reset": true }))
        }
        Action::Health => respond(
            200,
            json!({
                "status": "OK",
                "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                "config": SignerConfig::from_env(),
                "last_signing": STATE.ui_lock().last_signing.clone(),
            }),
        ),
        Action::SignatureConfigure { geometry } => {
            let mut state = STATE.ui_lock();
            state.configure_capture(geometry);
            respond(
                200,
                json!({
                    "backing_width": geometry.backing_width,
                    "backing_height": geometry.backing_height,
                }),
            )
        }
        Action::SignaturePointer {
            phase,
            pointer,
            position,
        } => {
            let mut state = STATE.ui_lock();
            let surface = state.capture_mut();
            let accepted = match (phase, position) {
                (PointerPhase::Down, Some((x, y))) => surface.begin(pointer, x, y),
                (PointerPhase::Move, Some((x, y))) => surface.extend(pointer, x, y),
                (PointerPhase::Up, _) => {
                    surface.end(pointer);
                    true
                }
                (PointerPhase::Cancel, _) => {
                    surface.cancel();
                    true
                }
                _ => false,
            };
            let mut body = capture_status(surface);
            body["accepted"] = json!(accepted);
            respond(200, body)
        }
        Action::SignatureClear => {
            let mut state = STATE.ui_lock();
            state.clear_capture();
            let body = capture_status(state.capture_mut());
            respond(200, body)
        }
        Action::SignatureSave => handle_signature_save(),
        Action::PdfSign(request) => handle_pdf_sign(request),
    }
}

fn handle_signature_save() -> Value {
    let mut state = STATE.ui_lock();
    let locale = state.locale().to_string();
    match state.capture_mut().export() {
        Ok(image) => {
            let saved = SavedSignature {
                data_url: image.to_data_url(),
                captured_at: Utc::now(),
                width: image.width,
                height: image.height,
            };
            let body = json!({
                "data_url": saved.data_url,
                "width": saved.width,
                "height": saved.height,
                "captured_at": saved.captured_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            });
            state.saved_signature = Some(saved);
            respond(200, body)
        }
        Err(CaptureError::EmptyCapture) => {
            bad_request("empty_capture", i18n::empty_capture_message(&locale))
        }
        Err(e) => {
            log::error!("capture: export failed: {e}");
            state.last_error = Some(e.to_string());
            server_error(&e.to_string(), &locale)
        }
    }
}

fn stage_upload(request: &SignRequest, config: &SignerConfig) -> Result<StagedUpload, UploadError> {
    match &request.source {
        UploadSource::Path(path) => {
            if !path.is_file() {
                return Err(UploadError::Missing);
            }
            let name = request
                .original_name
                .clone()
                .or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()))
                .unwrap_or_default();
            StagedUpload::adopt(path.clone(), &name)
        }
        UploadSource::Inline(encoded) => {
            let bytes = B64
                .decode(encoded.trim())
                .map_err(|e| UploadError::Malformed(format!("base64:{e}")))?;
            let name = request.original_name.clone().unwrap_or_default();
            StagedUpload::from_bytes(&config.temp_dir, &bytes, &name)
        }
        UploadSource::Missing => Err(UploadError::Missing),
    }
}

fn upload_error(err: &UploadError, locale: &str) -> Value {
    if err.is_client_error() {
        log::info!("upload: rejected ({})", err.code());
        bad_request(err.code(), err.to_string())
    } else {
        log::error!("upload: staging failed: {err}");
        server_error(&err.to_string(), locale)
    }
}

fn handle_pdf_sign(request: SignRequest) -> Value {
    let config = SignerConfig::from_env();
    let (locale, saved) = {
        let state = STATE.ui_lock();
        let locale = if state.locale.is_empty() {
            config.locale.clone()
        } else {
            state.locale.clone()
        };
        (locale, state.saved_signature.clone())
    };

    // Held until this function returns; dropping it removes the staged file.
    let staged = match stage_upload(&request, &config) {
        Ok(staged) => staged,
        Err(e) => return upload_error(&e, &locale),
    };
    if let Err(e) = staged.check(request.mime_type.as_deref(), config.max_upload_bytes) {
        return upload_error(&e, &locale);
    }
    let pdf_bytes = match staged.read_bytes() {
        Ok(bytes) => bytes,
        Err(e) => return server_error(&format!("staged_read_failed:{e}"), &locale),
    };

    let (signature, timestamp) = match (request.signature, saved) {
        (Some(sig), _) => (Some(sig), request.signature_timestamp),
        (None, Some(saved)) => (
            Some(saved.data_url),
            request
                .signature_timestamp
                .or_else(|| Some(saved.captured_at.to_rfc3339())),
        ),
        (None, None) => (None, request.signature_timestamp),
    };
    let envelope = TransferEnvelope::with_timestamp(pdf_bytes, signature, timestamp.as_deref());

    let signed_at = Utc::now();
    let timeout = config.sign_timeout;
    let signed = match sign_with_recovery(&staged, envelope, signed_at, &locale, |bytes, sig| {
        compose_on_worker(bytes, sig, signed_at, &locale, timeout)
    }) {
        Ok(signed) => signed,
        Err(e) => {
            log::error!("pdf_sign: {e}");
            STATE.ui_lock().last_error = Some(e.to_string());
            return server_error(&e.to_string(), &locale);
        }
    };

    let signed_path = match persist_signed(&config.output_dir, &signed.original_name, &signed.bytes) {
        Ok(path) => path,
        Err(e) => {
            log::error!("pdf_sign: writing output failed: {e}");
            STATE.ui_lock().last_error = Some(format!("output_write_failed:{e}"));
            return server_error(&format!("output_write_failed:{e}"), &locale);
        }
    };
    log::info!(
        "pdf_sign: {} -> {} ({:?})",
        signed.original_name,
        signed_path.display(),
        signed.mode
    );

    let mut body = json!(signed);
    body["signed_path"] = json!(signed_path.to_string_lossy());
    body["size"] = json!(signed.bytes.len());

    let mut state = STATE.ui_lock();
    state.last_error = None;
    state.last_signing = Some(LastSigning {
        id: signed.id,
        signed_path: signed_path.to_string_lossy().into_owned(),
        mode: signed.mode,
        warning: signed.warning,
    });
    respond(200, body)
}

//! Signature pad core: captures a handwritten signature and stamps it onto
//! the first page of a PDF, degrading to a text signature or to the
//! untouched original when the image path cannot be completed.
//!
//! Hosts drive everything through [`dispatch`] with JSON commands; the C
//! entry points below wrap the same call for non-Rust callers.

rust_i18n::i18n!("locales", fallback = "en");

pub mod config;
pub mod error;
pub mod features;
mod i18n;
mod router;
mod state;

use std::ffi::{c_char, CStr, CString};
use std::ptr;

pub use config::SignerConfig;
pub use error::{CaptureError, SignError, SignResult, UploadError};
pub use router::{dispatch, handle_command, Command};

/// Installs the `env_logger` backend once. Later calls are no-ops, so hosts
/// and tests can both call it freely. Level comes from `RUST_LOG`, default `info`.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}

/// C entry point for [`dispatch`]. Returns a heap string the caller must hand
/// back to [`signpad_free_string`], or null if `input` is null.
///
/// # Safety
/// `input` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn signpad_dispatch(input: *const c_char) -> *mut c_char {
    if input.is_null() {
        return ptr::null_mut();
    }
    let command = CStr::from_ptr(input).to_string_lossy();
    let response = dispatch(&command);
    match CString::new(response) {
        Ok(out) => out.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// # Safety
/// `response` must be null or a pointer previously returned by
/// [`signpad_dispatch`] that has not been freed yet.
#[no_mangle]
pub unsafe extern "C" fn signpad_free_string(response: *mut c_char) {
    if !response.is_null() {
        drop(CString::from_raw(response));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_entry_point_round_trips_json() {
        let input = CString::new(r#"{"action":"health"}"#).unwrap();
        unsafe {
            let out = signpad_dispatch(input.as_ptr());
            assert!(!out.is_null());
            let text = CStr::from_ptr(out).to_string_lossy().into_owned();
            signpad_free_string(out);
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(value["status"], 200);
            assert_eq!(value["body"]["status"], "OK");
        }
    }

    #[test]
    fn null_input_yields_null() {
        unsafe {
            assert!(signpad_dispatch(ptr::null()).is_null());
            signpad_free_string(ptr::null_mut());
        }
    }

    #[test]
    fn logging_init_is_idempotent() {
        init_logging();
        init_logging();
    }
}

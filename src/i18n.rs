use chrono::{DateTime, Local, Utc};
use rust_i18n::t;

use crate::state::AppState;

pub fn update_locale(state: &mut AppState, locale_str: &str) {
    let normalized = normalize_locale(locale_str);
    state.locale = normalized.to_string();
    rust_i18n::set_locale(normalized);
}

pub fn normalize_locale(locale_str: &str) -> &'static str {
    let trimmed = locale_str.trim();
    if trimmed.is_empty() {
        return "en";
    }

    // rust-i18n looks up compiled locales by name (e.g. "en", "is"), so normalize
    // incoming BCP-47 tags like "fr-FR" / "en_US" down to a supported language.
    let lower = trimmed.to_ascii_lowercase().replace('_', "-");
    let lang = lower.split('-').next().unwrap_or("en");

    match lang {
        "is" => "is",
        _ => "en",
    }
}

/// Date as the signer's locale writes it, in the host's local time zone.
pub fn format_date(at: &DateTime<Utc>, locale: &str) -> String {
    let local = at.with_timezone(&Local);
    match normalize_locale(locale) {
        "is" => local.format("%-d.%-m.%Y").to_string(),
        _ => local.format("%-m/%-d/%Y").to_string(),
    }
}

pub fn format_time(at: &DateTime<Utc>, locale: &str) -> String {
    let local = at.with_timezone(&Local);
    match normalize_locale(locale) {
        "is" => local.format("%H:%M:%S").to_string(),
        _ => local.format("%-I:%M:%S %p").to_string(),
    }
}

/// The two caption lines drawn under an embedded signature image.
pub fn image_captions(at: &DateTime<Utc>, locale: &str) -> [String; 2] {
    let locale = normalize_locale(locale);
    let date = format_date(at, locale);
    let time = format_time(at, locale);
    [
        t!("caption_signed_on", locale = locale, date = date).into_owned(),
        t!("caption_time", locale = locale, time = time).into_owned(),
    ]
}

/// The three lines of the synthetic text signature.
pub fn fallback_lines(at: &DateTime<Utc>, locale: &str) -> [String; 3] {
    let locale = normalize_locale(locale);
    let date = format_date(at, locale);
    let time = format_time(at, locale);
    [
        t!("fallback_marker", locale = locale).into_owned(),
        t!("fallback_signed", locale = locale, date = date).into_owned(),
        t!("caption_time", locale = locale, time = time).into_owned(),
    ]
}

pub fn copy_through_warning(locale: &str) -> String {
    t!("copy_through_warning", locale = normalize_locale(locale)).into_owned()
}

pub fn empty_capture_message(locale: &str) -> String {
    t!("capture_empty", locale = normalize_locale(locale)).into_owned()
}

pub fn hard_failure_messages(locale: &str) -> (String, String) {
    let locale = normalize_locale(locale);
    (
        t!("hard_failure_error", locale = locale).into_owned(),
        t!("hard_failure_suggestion", locale = locale).into_owned(),
    )
}

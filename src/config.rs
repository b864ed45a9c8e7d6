use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_SIGN_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Serialize)]
pub struct SignerConfig {
    pub temp_dir: PathBuf,
    pub output_dir: PathBuf,
    pub max_upload_bytes: u64,
    #[serde(serialize_with = "serialize_millis")]
    pub sign_timeout: Duration,
    pub locale: String,
}

impl Default for SignerConfig {
    fn default() -> Self {
        let temp_dir = std::env::temp_dir();
        Self {
            output_dir: temp_dir.join("signed"),
            temp_dir,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            sign_timeout: Duration::from_millis(DEFAULT_SIGN_TIMEOUT_MS),
            locale: "en".into(),
        }
    }
}

impl SignerConfig {
    /// Reads `SIGNPAD_*` variables, keeping defaults for anything missing or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.temp_dir = crate::features::storage::preferred_temp_dir();
        config.output_dir = match std::env::var("SIGNPAD_OUTPUT_DIR") {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => config.temp_dir.join("signed"),
        };
        if let Some(limit) = env_u64("SIGNPAD_MAX_UPLOAD_BYTES").filter(|v| *v > 0) {
            config.max_upload_bytes = limit;
        }
        if let Some(ms) = env_u64("SIGNPAD_SIGN_TIMEOUT_MS").filter(|v| *v > 0) {
            config.sign_timeout = Duration::from_millis(ms);
        }
        if let Ok(locale) = std::env::var("SIGNPAD_LOCALE") {
            config.locale = crate::i18n::normalize_locale(&locale).to_string();
        }
        config
    }

    pub fn max_upload_mb(&self) -> u64 {
        (self.max_upload_bytes / (1024 * 1024)).max(1)
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use infer::Infer;
use tempfile::{Builder, TempPath};

use crate::error::UploadError;

#[cfg(test)]
use std::sync::{Mutex, OnceLock};

pub const PDF_MIME: &str = "application/pdf";

#[cfg(test)]
pub fn test_env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

pub fn parse_file_uri_path(uri: &str) -> Option<PathBuf> {
    if let Some(rest) = uri.strip_prefix("file://") {
        return Some(PathBuf::from(rest));
    }
    if uri.starts_with('/') {
        return Some(PathBuf::from(uri));
    }
    None
}

pub fn preferred_temp_dir() -> PathBuf {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Ok(custom) = std::env::var("SIGNPAD_TEMP_DIR") {
        candidates.push(PathBuf::from(custom));
    }
    if let Ok(tmpdir) = std::env::var("TMPDIR") {
        candidates.push(PathBuf::from(tmpdir));
    }
    candidates.push(std::env::temp_dir());

    for dir in candidates {
        if let Ok(meta) = fs::metadata(&dir) {
            if meta.is_dir() {
                return dir;
            }
        }
    }
    std::env::temp_dir()
}

/// Uploaded bytes held for the length of one signing request.
///
/// The backing file is removed when the handle drops, on every exit path.
#[derive(Debug)]
pub struct StagedUpload {
    path: TempPath,
    original_name: String,
    size: u64,
}

impl StagedUpload {
    /// Writes `bytes` into a fresh file under `dir`.
    pub fn from_bytes(dir: &Path, bytes: &[u8], original_name: &str) -> Result<Self, UploadError> {
        fs::create_dir_all(dir)?;
        let mut tmp = Builder::new()
            .prefix("upload_")
            .suffix(".pdf")
            .tempfile_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        Ok(Self {
            path: tmp.into_temp_path(),
            original_name: sanitize_file_name(original_name),
            size: bytes.len() as u64,
        })
    }

    /// Takes ownership of a file some earlier layer already wrote. From here
    /// on it is deleted with the handle.
    pub fn adopt(path: PathBuf, original_name: &str) -> Result<Self, UploadError> {
        let size = fs::metadata(&path)?.len();
        Ok(Self {
            path: TempPath::from_path(path),
            original_name: sanitize_file_name(original_name),
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn read_bytes(&self) -> std::io::Result<Vec<u8>> {
        let mut file = fs::File::open(&self.path)?;
        let mut buffer = Vec::with_capacity(self.size as usize);
        file.read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    /// Applies the upload filter: size bound, declared type, then content sniffing.
    pub fn check(&self, declared_mime: Option<&str>, max_bytes: u64) -> Result<(), UploadError> {
        if self.size > max_bytes {
            return Err(UploadError::TooLarge {
                size: self.size,
                limit_mb: (max_bytes / (1024 * 1024)).max(1),
            });
        }
        if let Some(mime) = declared_mime.map(str::trim).filter(|m| !m.is_empty()) {
            if !mime.eq_ignore_ascii_case(PDF_MIME) {
                return Err(UploadError::NotPdf {
                    detected: Some(mime.to_string()),
                });
            }
        }
        let mut head = [0u8; 1024];
        let read = fs::File::open(&self.path)?.read(&mut head)?;
        let detected = Infer::new().get(&head[..read]).map(|t| t.mime_type());
        if detected != Some(PDF_MIME) {
            return Err(UploadError::NotPdf {
                detected: detected.map(str::to_string),
            });
        }
        Ok(())
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        log::debug!("storage: releasing staged upload {}", self.path.display());
    }
}

/// Keeps the last path component and drops characters that are unsafe in file names.
pub fn sanitize_file_name(name: &str) -> String {
    let base = Path::new(name.trim())
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() || matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "document.pdf".into()
    } else {
        cleaned
    }
}

/// Writes a finished document as `signed_<millis>_<name>` under `dir`.
pub fn persist_signed(dir: &Path, original_name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let millis = chrono::Utc::now().timestamp_millis();
    let file_name = format!("signed_{millis}_{}", sanitize_file_name(original_name));
    let mut tmp = Builder::new().prefix(".signed_").tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    let target = dir.join(file_name);
    tmp.persist(&target).map_err(|e| e.error)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::test_support::sample_pdf;
    use tempfile::tempdir;

    #[test]
    fn staged_file_is_removed_on_drop() {
        let dir = tempdir().unwrap();
        let staged = StagedUpload::from_bytes(dir.path(), b"%PDF-1.5\n", "contract.pdf").unwrap();
        let path = staged.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(staged.read_bytes().unwrap(), b"%PDF-1.5\n");
        drop(staged);
        assert!(!path.exists());
    }

    #[test]
    fn adopted_file_is_removed_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("multipart-upload");
        fs::write(&path, b"%PDF-1.4").unwrap();
        let staged = StagedUpload::adopt(path.clone(), "in.pdf").unwrap();
        assert_eq!(staged.size(), 8);
        drop(staged);
        assert!(!path.exists());
    }

    #[test]
    fn upload_filter_rejects_oversize_and_foreign_types() {
        let dir = tempdir().unwrap();
        let pdf = sample_pdf(&[(600.0, 800.0)]);
        let staged = StagedUpload::from_bytes(dir.path(), &pdf, "ok.pdf").unwrap();
        assert!(staged.check(Some("application/pdf"), 10 * 1024 * 1024).is_ok());
        assert!(staged.check(None, 10 * 1024 * 1024).is_ok());
        assert!(matches!(
            staged.check(None, 16),
            Err(UploadError::TooLarge { limit_mb: 1, .. })
        ));
        assert!(matches!(
            staged.check(Some("image/png"), 10 * 1024 * 1024),
            Err(UploadError::NotPdf { .. })
        ));

        let text = StagedUpload::from_bytes(dir.path(), b"just some notes", "notes.pdf").unwrap();
        assert!(matches!(
            text.check(Some("application/pdf"), 10 * 1024 * 1024),
            Err(UploadError::NotPdf { detected: None })
        ));
    }

    #[test]
    fn file_names_are_reduced_to_a_safe_component() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\docs\\a.pdf"), "C__docs_a.pdf");
        assert_eq!(sanitize_file_name(""), "document.pdf");
        assert_eq!(sanitize_file_name("lease 2025.pdf"), "lease 2025.pdf");
    }

    #[test]
    fn persisted_output_keeps_original_name() {
        let dir = tempdir().unwrap();
        let out = persist_signed(dir.path(), "lease.pdf", b"%PDF-1.7").unwrap();
        let name = out.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("signed_"));
        assert!(name.ends_with("_lease.pdf"));
        assert_eq!(fs::read(out).unwrap(), b"%PDF-1.7");
    }

    #[test]
    fn file_uris_resolve_to_paths() {
        assert_eq!(parse_file_uri_path("file:///tmp/a.pdf"), Some(PathBuf::from("/tmp/a.pdf")));
        assert_eq!(parse_file_uri_path("content://x"), None);
    }
}

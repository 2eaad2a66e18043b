use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::AppConfig;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Invalid file format")]
    InvalidFormat,
    #[error("File too large")]
    FileTooLarge,
    #[error("Upload I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Local folder that holds uploaded images while they are classified.
#[derive(Clone)]
pub struct UploadStore {
    folder: PathBuf,
    allowed_extensions: Vec<String>,
    max_size: usize,
}

impl UploadStore {
    pub fn new(folder: PathBuf, allowed_extensions: Vec<String>, max_size: usize) -> Self {
        Self {
            folder,
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|ext| ext.to_ascii_lowercase())
                .collect(),
            max_size,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.upload_folder.clone(),
            config.allowed_extensions.clone(),
            config.max_content_length,
        )
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed_extensions
    }

    pub fn ensure_folder(&self) -> io::Result<()> {
        fs::create_dir_all(&self.folder)
    }

    /// Lower-cased extension of `filename` when it is on the allow-list.
    pub fn extract_file_extension(&self, filename: &str) -> Result<String, UploadError> {
        let (_, ext) = filename.rsplit_once('.').ok_or(UploadError::InvalidFormat)?;
        let ext = ext.to_lowercase();
        if self.allowed_extensions.contains(&ext) {
            Ok(ext)
        } else {
            Err(UploadError::InvalidFormat)
        }
    }

    pub fn validate_size(&self, len: usize) -> Result<(), UploadError> {
        if len > self.max_size {
            return Err(UploadError::FileTooLarge);
        }
        Ok(())
    }

    /// Writes `data` to a uniquely named file. The file is removed when the
    /// returned guard is dropped.
    pub fn persist(&self, data: &[u8], extension: &str) -> Result<TempUpload, UploadError> {
        self.validate_size(data.len())?;
        let path = self
            .folder
            .join(format!("{}.{}", Uuid::new_v4(), extension));
        let upload = TempUpload { path };
        let mut file = File::create(&upload.path)?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(upload)
    }
}

/// An uploaded file on disk, deleted on drop.
#[derive(Debug)]
pub struct TempUpload {
    path: PathBuf,
}

impl TempUpload {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Removed temporary upload {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "Failed to remove temporary upload {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Reduces a client-supplied filename to a safe ASCII form for echoing back.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let cleaned: String = base
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    cleaned.trim_start_matches(['.', '_']).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> UploadStore {
        UploadStore::new(
            dir.to_path_buf(),
            vec!["png".into(), "JPG".into(), "jpeg".into(), "bmp".into(), "gif".into()],
            1024,
        )
    }

    #[test]
    fn extension_must_be_allowed() {
        let s = store(Path::new("uploads"));
        assert_eq!(s.extract_file_extension("leaf.PNG").unwrap(), "png");
        assert_eq!(s.extract_file_extension("a.b.jpg").unwrap(), "jpg");
        assert_eq!(s.extract_file_extension("叶片.jpeg").unwrap(), "jpeg");
        assert!(matches!(
            s.extract_file_extension("notes.txt"),
            Err(UploadError::InvalidFormat)
        ));
        assert!(s.extract_file_extension("png").is_err());
        assert!(s.extract_file_extension("leaf.").is_err());
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        assert!(matches!(
            s.persist(&[0u8; 2048], "png"),
            Err(UploadError::FileTooLarge)
        ));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn temp_upload_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let upload = s.persist(b"bytes", "png").unwrap();
        let path = upload.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(path.extension().unwrap(), "png");
        drop(upload);
        assert!(!path.exists());
    }

    #[test]
    fn temp_upload_is_removed_when_work_fails() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let result: Result<(), UploadError> = (|| {
            let _upload = s.persist(b"bytes", "gif")?;
            Err(UploadError::InvalidFormat)
        })();
        assert!(result.is_err());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_filename("my leaf.png"), "my_leaf.png");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\photos\\leaf.jpg"), "leaf.jpg");
        assert_eq!(sanitize_filename("叶片.jpg"), "jpg");
        assert_eq!(sanitize_filename(".hidden.png"), "hidden.png");
    }
}

use std::path::{Path, PathBuf};

use crate::error::AppError;

/// Longest filename most filesystems accept, in bytes.
const MAX_FILENAME_BYTES: usize = 255;

const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "tif", "tiff"];

/// One uploaded file, held in memory for the duration of a request.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

/// Validates a client-supplied filename.
///
/// `Ok(None)` means the client sent no usable name and the server picks one.
pub fn sanitize_filename(raw: Option<&str>) -> Result<Option<String>, AppError> {
    let name = match raw.map(str::trim) {
        None | Some("") => return Ok(None),
        Some(name) => name,
    };

    if name.len() > MAX_FILENAME_BYTES {
        return Err(AppError::InvalidFilename(format!(
            "filename is longer than {MAX_FILENAME_BYTES} bytes"
        )));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(AppError::InvalidFilename(
            "path separators are not allowed".into(),
        ));
    }
    if name.contains("..") {
        return Err(AppError::InvalidFilename("`..` is not allowed".into()));
    }
    if name.starts_with('.') {
        return Err(AppError::InvalidFilename(
            "hidden files are not allowed".into(),
        ));
    }

    let extension = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension {
        Some(ext) if ALLOWED_EXTENSIONS.contains(&ext.as_str()) => Ok(Some(name.to_string())),
        Some(ext) => Err(AppError::InvalidFilename(format!(
            "extension `{ext}` is not an accepted image type"
        ))),
        None => Err(AppError::InvalidFilename(
            "filename has no extension".into(),
        )),
    }
}

/// Name for an upload that arrived without one, derived from the payload's magic bytes.
fn server_chosen_name(bytes: &[u8]) -> Result<String, AppError> {
    let format = image::guess_format(bytes).map_err(|_| {
        AppError::InvalidFilename("no filename given and the payload is not a known image type".into())
    })?;
    let ext = format.extensions_str().first().copied().unwrap_or("img");
    Ok(format!("{}.{ext}", uuid::Uuid::new_v4()))
}

/// Persists uploads under a single directory.
///
/// Writes are keyed by filename only; a second upload with the same name replaces the first.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Creates the directory if it is missing.
    pub fn ensure_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)
    }

    pub async fn save(&self, image: &UploadedImage) -> Result<PathBuf, AppError> {
        let name = match sanitize_filename(image.filename.as_deref())? {
            Some(name) => name,
            None => server_chosen_name(&image.bytes)?,
        };
        let path = self.dir.join(name);

        tokio::fs::write(&path, &image.bytes)
            .await
            .map_err(AppError::Storage)?;

        tracing::info!("saved {} bytes to {}", image.bytes.len(), path.display());
        Ok(path)
    }
}

//! Turning uploads, drops and camera frames into a single [`ImageSource`].

use crate::config::{CAPTURE_JPEG_QUALITY, MAX_UPLOAD_BYTES};
use crate::error::PipelineError;
use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, RgbImage};
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

const FALLBACK_MEDIA_TYPE: &str = "application/octet-stream";

/// Where the active image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOrigin {
    Upload,
    Drop,
    Camera,
}

/// A file handed over by the picker or the drop zone, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePayload {
    pub name: String,
    /// Media type as declared by the sender, not sniffed from the bytes.
    pub media_type: String,
    bytes: Vec<u8>,
    size: u64,
}

impl FilePayload {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            size: bytes.len() as u64,
            bytes,
        }
    }

    /// Reads a file from disk, declaring its media type from the extension.
    ///
    /// Type and size come from the file metadata first. A file that would be
    /// rejected is never read; its payload carries the size but no bytes.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let size = fs::metadata(path)
            .with_context(|| format!("cannot inspect file {}", path.display()))?
            .len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut payload = Self {
            name,
            media_type: media_type_for_path(path).to_string(),
            bytes: Vec::new(),
            size,
        };
        if let Err(err) = validate_payload(&payload) {
            tracing::debug!("not reading {}: {err}", path.display());
            return Ok(payload);
        }

        // The file may have grown since the metadata call.
        let mut bytes = Vec::with_capacity(size as usize);
        File::open(path)
            .and_then(|file| file.take(MAX_UPLOAD_BYTES + 1).read_to_end(&mut bytes))
            .with_context(|| format!("cannot read file {}", path.display()))?;
        payload.size = bytes.len() as u64;
        payload.bytes = bytes;
        Ok(payload)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

pub fn media_type_for_path(path: &Path) -> &'static str {
    ImageFormat::from_path(path)
        .map(|f| f.to_mime_type())
        .unwrap_or(FALLBACK_MEDIA_TYPE)
}

/// The one active image: raw bytes plus a data URL for display.
#[derive(Debug, Clone)]
pub struct ImageSource {
    origin: ImageOrigin,
    name: String,
    media_type: String,
    bytes: Arc<[u8]>,
    data_url: Arc<str>,
}

impl ImageSource {
    fn new(origin: ImageOrigin, name: String, media_type: String, bytes: Vec<u8>) -> Self {
        let data_url = to_data_url(&media_type, &bytes).into();
        Self {
            origin,
            name,
            media_type,
            bytes: bytes.into(),
            data_url,
        }
    }

    pub fn origin(&self) -> ImageOrigin {
        self.origin
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn data_url(&self) -> &str {
        &self.data_url
    }

    /// Decodes the bytes. Broken payloads are only discovered here, so a bad
    /// upload still previews as "selected" and fails at analysis time.
    pub fn decode(&self) -> Result<DynamicImage> {
        image::load_from_memory(&self.bytes)
            .with_context(|| format!("cannot decode image {}", self.name))
    }
}

pub fn to_data_url(media_type: &str, bytes: &[u8]) -> String {
    format!("data:{media_type};base64,{}", STANDARD.encode(bytes))
}

/// Checks the declared type and size of a payload.
pub fn validate_payload(payload: &FilePayload) -> Result<(), PipelineError> {
    if !payload
        .media_type
        .to_ascii_lowercase()
        .starts_with("image/")
    {
        return Err(PipelineError::UnsupportedFileType {
            media_type: payload.media_type.clone(),
        });
    }
    if payload.size() > MAX_UPLOAD_BYTES {
        return Err(PipelineError::FileTooLarge {
            size: payload.size(),
        });
    }
    Ok(())
}

pub fn image_from_payload(
    payload: FilePayload,
    origin: ImageOrigin,
) -> Result<ImageSource, PipelineError> {
    validate_payload(&payload)?;
    Ok(ImageSource::new(
        origin,
        payload.name,
        payload.media_type,
        payload.bytes,
    ))
}

/// Only the first of several dropped files is considered.
pub fn first_dropped(files: impl IntoIterator<Item = FilePayload>) -> Option<FilePayload> {
    files.into_iter().next()
}

/// Snapshots a camera frame at its native resolution as a JPEG still.
pub fn image_from_frame(frame: &RgbImage) -> Result<ImageSource> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, CAPTURE_JPEG_QUALITY)
        .encode_image(frame)
        .context("cannot encode camera frame")?;
    let name = format!("capture-{}x{}.jpg", frame.width(), frame.height());
    Ok(ImageSource::new(
        ImageOrigin::Camera,
        name,
        ImageFormat::Jpeg.to_mime_type().to_string(),
        buf,
    ))
}

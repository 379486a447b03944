//! Image I/O operations service
//!
//! Keeps file handling out of the pipeline: reading uploads, guessing their
//! MIME type, decoding pixels and writing the PNG result.

use crate::{
    error::{PhotoError, Result},
    types::{CompositeCanvas, SourceImage},
};
use std::path::Path;
use tracing::{debug, instrument};

/// An uploaded file as the pipeline sees it
///
/// The MIME type is whatever the uploader declared; the validator checks it
/// before any decoding happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl InputFile {
    pub fn from_bytes<N: Into<String>, M: Into<String>>(name: N, mime_type: M, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Read a file from disk, guessing its MIME type from the extension
    ///
    /// # Errors
    /// - File cannot be read
    pub async fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| PhotoError::file_io_error("read input file", path, &e))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        Ok(Self {
            mime_type: ImageIOService::mime_from_path(path).to_string(),
            name,
            bytes,
        })
    }

    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Size in kilobytes, rounded up to the next whole kilobyte
    #[must_use]
    pub fn size_kb(&self) -> u64 {
        (self.size_bytes() + 1023) / 1024
    }
}

/// Service for image file input/output
pub struct ImageIOService;

impl ImageIOService {
    /// MIME type for a file extension, `application/octet-stream` when unknown
    #[must_use]
    pub fn mime_from_path(path: &Path) -> &'static str {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("jpg" | "jpeg") => "image/jpeg",
            Some("png") => "image/png",
            Some("gif") => "image/gif",
            Some("webp") => "image/webp",
            Some("bmp") => "image/bmp",
            Some("tif" | "tiff") => "image/tiff",
            _ => "application/octet-stream",
        }
    }

    /// Decode an upload into an RGBA source image
    ///
    /// Runs on a blocking thread; the format is detected from the content.
    ///
    /// # Errors
    /// - Corrupt, truncated or unsupported image data
    /// - Zero-sized image
    #[instrument(skip(file), fields(name = %file.name, bytes = file.bytes.len()))]
    pub async fn decode_source(file: &InputFile) -> Result<SourceImage> {
        let bytes = file.bytes.clone();
        let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
            .await
            .map_err(|e| PhotoError::internal(format!("Decode task failed: {}", e)))?
            .map_err(|e| PhotoError::decode(e.to_string()))?;
        debug!(
            width = decoded.width(),
            height = decoded.height(),
            color = ?decoded.color(),
            "Decoded upload"
        );
        SourceImage::new(decoded.to_rgba8())
    }

    /// Write a canvas as PNG, creating parent directories
    ///
    /// # Errors
    /// - Directory creation or encoder failure
    pub fn save_png<P: AsRef<Path>>(canvas: &CompositeCanvas, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| PhotoError::file_io_error("create output directory", parent, &e))?;
        }
        canvas.save_png(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackgroundColor;
    use image::{Rgba, RgbaImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([1, 2, 3, 255]));
        let mut buffer = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageFormat::Png)
            .unwrap();
        buffer
    }

    #[test]
    fn test_mime_from_extension() {
        assert_eq!(ImageIOService::mime_from_path(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(ImageIOService::mime_from_path(Path::new("a.png")), "image/png");
        assert_eq!(ImageIOService::mime_from_path(Path::new("a.gif")), "image/gif");
        assert_eq!(
            ImageIOService::mime_from_path(Path::new("noext")),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_size_kb_rounds_up() {
        let file = InputFile::from_bytes("a.png", "image/png", vec![0; 2047]);
        assert_eq!(file.size_kb(), 2);
        assert_eq!(file.size_bytes(), 2047);
        let exact = InputFile::from_bytes("a.png", "image/png", vec![0; 2048]);
        assert_eq!(exact.size_kb(), 2);
    }

    #[tokio::test]
    async fn test_decode_valid_png() {
        let file = InputFile::from_bytes("a.png", "image/png", png_bytes(7, 3));
        let source = ImageIOService::decode_source(&file).await.unwrap();
        assert_eq!(source.dimensions(), (7, 3));
    }

    #[tokio::test]
    async fn test_decode_garbage_is_decode_error() {
        let file = InputFile::from_bytes("a.jpg", "image/jpeg", vec![0xFF, 0xD8, 0x00, 0x01]);
        let err = ImageIOService::decode_source(&file).await.unwrap_err();
        assert!(matches!(err, PhotoError::Decode(_)));
    }

    #[tokio::test]
    async fn test_from_path_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("portrait.png");
        std::fs::write(&input, png_bytes(4, 4)).unwrap();

        let file = InputFile::from_path(&input).await.unwrap();
        assert_eq!(file.name, "portrait.png");
        assert_eq!(file.mime_type, "image/png");

        let canvas = CompositeCanvas::filled(5, 5, BackgroundColor::WHITE).unwrap();
        let output = dir.path().join("nested").join("out.png");
        ImageIOService::save_png(&canvas, &output).unwrap();
        assert!(output.exists());
    }

    #[tokio::test]
    async fn test_from_path_missing_file() {
        let err = InputFile::from_path("/nonexistent/photo.jpg").await.unwrap_err();
        assert!(err.to_string().contains("read input file"));
    }
}

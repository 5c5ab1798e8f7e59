//! Writing rendered images to disk

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{ImageFormat, Rgba32FImage};
use rz_render::to_rgba8;
use tracing::info;

/// Supported image file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    /// 8-bit PNG, gamma-encoded as rendered
    #[default]
    Png,

    /// 32-bit float OpenEXR
    Exr,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Exr => "exr",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(ExportFormat::Png),
            "exr" => Some(ExportFormat::Exr),
            _ => None,
        }
    }

    /// Infer format from a file path
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

/// Save `image`, picking the format from the extension
///
/// Paths without a known extension get `.png` appended. Returns the path
/// written.
pub fn save_image(image: &Rgba32FImage, path: &Path) -> Result<PathBuf> {
    let (format, path) = match ExportFormat::from_path(path) {
        Some(format) => (format, path.to_path_buf()),
        None => (ExportFormat::Png, path.with_extension(ExportFormat::Png.extension())),
    };

    match format {
        ExportFormat::Png => to_rgba8(image)
            .save_with_format(&path, ImageFormat::Png)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        ExportFormat::Exr => image
            .save_with_format(&path, ImageFormat::OpenExr)
            .with_context(|| format!("Failed to write {}", path.display()))?,
    }

    info!(
        path = %path.display(),
        width = image.width(),
        height = image.height(),
        "Image saved"
    );
    Ok(path)
}

//! Image loading and quilt screenshots.
//!
//! Decodes any format the `image` crate supports into an RGBA8
//! [`PixelBuffer`], and writes quilts back out as PNG.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::error::{RenderError, RenderResult};
use crate::quilt::PixelBuffer;
use crate::tiling::Tiling;

/// Decode an image from raw bytes.
///
/// # Errors
///
/// Returns an error if the image cannot be decoded.
pub fn load_pixel_buffer(data: &[u8]) -> RenderResult<PixelBuffer> {
    let rgba = image::load_from_memory(data)
        .map_err(|e| RenderError::Resource(format!("Failed to decode image: {e}")))?
        .to_rgba8();
    let (width, height) = rgba.dimensions();
    PixelBuffer::from_rgba(width, height, rgba.into_raw())
}

/// Decode an image file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or decoded.
pub fn load_pixel_buffer_from_path(path: impl AsRef<Path>) -> RenderResult<PixelBuffer> {
    let path = path.as_ref();
    let data = std::fs::read(path)
        .map_err(|e| RenderError::Resource(format!("Failed to read {}: {e}", path.display())))?;
    load_pixel_buffer(&data)
}

fn to_rgba_image(buffer: &PixelBuffer) -> RenderResult<image::RgbaImage> {
    image::RgbaImage::from_raw(buffer.width(), buffer.height(), buffer.pixels().to_vec())
        .ok_or_else(|| RenderError::Frame("pixel buffer does not match its dimensions".to_string()))
}

/// Encode a buffer as PNG.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode_png(buffer: &PixelBuffer) -> RenderResult<Vec<u8>> {
    let mut bytes = Vec::new();
    to_rgba_image(buffer)?
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .map_err(|e| RenderError::Resource(format!("Failed to encode PNG: {e}")))?;
    Ok(bytes)
}

/// Write a buffer to `path` as PNG.
///
/// # Errors
///
/// Returns an error if encoding or writing fails.
pub fn save_png(buffer: &PixelBuffer, path: impl AsRef<Path>) -> RenderResult<()> {
    let path = path.as_ref();
    to_rgba_image(buffer)?
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| RenderError::Resource(format!("Failed to write {}: {e}", path.display())))?;
    tracing::info!("Saved {}x{} image to {}", buffer.width(), buffer.height(), path.display());
    Ok(())
}

/// First unused `<stem>_NNN.png` in `dir`, counting from 000.
///
/// # Errors
///
/// Returns [`RenderError::Resource`] if `dir` is not a directory.
pub fn next_screenshot_path(dir: impl AsRef<Path>, stem: &str) -> RenderResult<PathBuf> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(RenderError::Resource(format!(
            "Screenshot directory {} does not exist",
            dir.display()
        )));
    }
    let mut index = 0u32;
    loop {
        let candidate = dir.join(format!("{stem}_{index:03}.png"));
        if !candidate.exists() {
            return Ok(candidate);
        }
        index += 1;
    }
}

/// First unused `<stem>_<tiling>_NNN.png` in `dir`.
///
/// The tiling tag lets [`Tiling::from_str`](std::str::FromStr) recover the
/// layout from the file name.
///
/// # Errors
///
/// Returns [`RenderError::Resource`] if `dir` is not a directory.
pub fn quilt_screenshot_path(
    dir: impl AsRef<Path>,
    stem: &str,
    tiling: &Tiling,
) -> RenderResult<PathBuf> {
    next_screenshot_path(dir, &format!("{stem}_{tiling}"))
}

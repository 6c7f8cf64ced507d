//! # Quilt Compositing
//!
//! Copies rendered views into their slots of the shared quilt image.
//!
//! ```text
//!  view buffers                      quilt buffer (top-down rows)
//!  ┌───┐┌───┐┌───┐┌───┐            ┌─────────────────────┐
//!  │ 0 ││ 1 ││ 2 ││...│   ──────▶  │ padding             │
//!  └───┘└───┘└───┘└───┘            ├────┬────┬────┬──────┤ band 0
//!                                  │ 4  │ 5  │ 6  │ 7    │
//!                                  ├────┼────┼────┼──────┤ band 1
//!                                  │ 0  │ 1  │ 2  │ 3    │
//!                                  └────┴────┴────┴──────┘
//! ```
//!
//! Every view lands in its own rectangle, so writes never overlap. With the
//! `parallel` feature, [`composite_views`] fills each band of rows on its own
//! rayon task.

use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult};
use crate::tiling::{Tiling, ViewRect};

/// An RGBA8 image, rows stored top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl PixelBuffer {
    /// Create a transparent black buffer.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        let size = width as usize * height as usize * 4;
        Self {
            width,
            height,
            pixels: vec![0; size],
        }
    }

    /// Wrap existing RGBA8 data.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Frame`] if `pixels` is not `width * height * 4` bytes.
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> RenderResult<Self> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(RenderError::Frame(format!(
                "{}x{} RGBA buffer needs {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGBA bytes.
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Mutable RGBA bytes.
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Consume the buffer, returning its bytes.
    #[must_use]
    pub fn into_raw(self) -> Vec<u8> {
        self.pixels
    }

    /// Fill a rectangular region with a color, clipped to the buffer.
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, color: [u8; 4]) {
        if x >= self.width {
            return;
        }
        let stride = self.width as usize * 4;
        let x_end = x.saturating_add(width).min(self.width) as usize;
        for row in y..y.saturating_add(height).min(self.height) {
            let start = row as usize * stride;
            for px in self.pixels[start + x as usize * 4..start + x_end * 4].chunks_exact_mut(4) {
                px.copy_from_slice(&color);
            }
        }
    }

    /// Clear the entire buffer with a color.
    pub fn clear(&mut self, color: [u8; 4]) {
        for chunk in self.pixels.chunks_exact_mut(4) {
            chunk.copy_from_slice(&color);
        }
    }

    /// Get the pixel at a specific coordinate.
    #[must_use]
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.pixels[idx..idx + 4]);
        Some(px)
    }

    /// Set the pixel at a specific coordinate; out of bounds is ignored.
    pub fn put_pixel(&mut self, x: u32, y: u32, color: [u8; 4]) {
        if x < self.width && y < self.height {
            let idx = (y as usize * self.width as usize + x as usize) * 4;
            self.pixels[idx..idx + 4].copy_from_slice(&color);
        }
    }

    /// Cover this buffer with `src`, scaling it nearest-neighbour.
    pub fn blit_scaled(&mut self, src: &Self) {
        let stride = self.width;
        let (width, height) = (self.width, self.height);
        blit(&mut self.pixels, stride, 0, width, height, src, BlitMode::Replace);
    }
}

/// Cross-fade two equally sized buffers; `t = 0` gives `a`, `t = 1` gives `b`.
///
/// # Errors
///
/// Returns [`RenderError::Frame`] if the sizes differ.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // rounded into 0..=255
pub fn blend(a: &PixelBuffer, b: &PixelBuffer, t: f32) -> RenderResult<PixelBuffer> {
    if a.width != b.width || a.height != b.height {
        return Err(RenderError::Frame(format!(
            "cannot blend {}x{} with {}x{}",
            a.width, a.height, b.width, b.height
        )));
    }
    let t = t.clamp(0.0, 1.0);
    let pixels = a
        .pixels
        .iter()
        .zip(&b.pixels)
        .map(|(&x, &y)| (f32::from(x) * (1.0 - t) + f32::from(y) * t).round() as u8)
        .collect();
    Ok(PixelBuffer {
        width: a.width,
        height: a.height,
        pixels,
    })
}

/// The shared quilt image, possibly not yet allocated.
#[derive(Debug, Clone, Default)]
pub struct QuiltBuffer {
    image: Option<PixelBuffer>,
}

impl QuiltBuffer {
    /// A buffer with no backing image yet.
    #[must_use]
    pub const fn unallocated() -> Self {
        Self { image: None }
    }

    /// A buffer sized for `tiling`.
    #[must_use]
    pub fn for_tiling(tiling: &Tiling) -> Self {
        let mut buffer = Self::unallocated();
        buffer.allocate(tiling);
        buffer
    }

    /// Size the buffer for `tiling`, keeping the existing image if it fits.
    pub fn allocate(&mut self, tiling: &Tiling) {
        if self.is_allocated_for(tiling) {
            return;
        }
        tracing::debug!(
            "Allocating {}x{} quilt buffer for {}",
            tiling.quilt_width(),
            tiling.quilt_height(),
            tiling
        );
        self.image = Some(PixelBuffer::new(tiling.quilt_width(), tiling.quilt_height()));
    }

    /// Drop the backing image.
    pub fn release(&mut self) {
        self.image = None;
    }

    /// Whether a backing image exists.
    #[must_use]
    pub const fn is_allocated(&self) -> bool {
        self.image.is_some()
    }

    /// Whether the backing image matches `tiling`'s quilt size.
    #[must_use]
    pub fn is_allocated_for(&self, tiling: &Tiling) -> bool {
        self.image.as_ref().is_some_and(|img| {
            img.width == tiling.quilt_width() && img.height == tiling.quilt_height()
        })
    }

    /// The backing image.
    #[must_use]
    pub const fn image(&self) -> Option<&PixelBuffer> {
        self.image.as_ref()
    }

    /// The backing image, mutably.
    pub fn image_mut(&mut self) -> Option<&mut PixelBuffer> {
        self.image.as_mut()
    }

    /// Clear the backing image, if any.
    pub fn clear(&mut self, color: [u8; 4]) {
        if let Some(image) = self.image.as_mut() {
            image.clear(color);
        }
    }

    /// Take the backing image out of the buffer.
    #[must_use]
    pub fn into_image(self) -> Option<PixelBuffer> {
        self.image
    }

    fn ready_image(&mut self, tiling: &Tiling) -> RenderResult<&mut PixelBuffer> {
        if !self.is_allocated_for(tiling) {
            let reason = match &self.image {
                None => "no backing image".to_string(),
                Some(img) => format!(
                    "buffer is {}x{}, tiling {} needs {}x{}",
                    img.width,
                    img.height,
                    tiling,
                    tiling.quilt_width(),
                    tiling.quilt_height()
                ),
            };
            tracing::warn!("Skipping quilt write: {}", reason);
            return Err(RenderError::QuiltBufferNotReady(reason));
        }
        self.image
            .as_mut()
            .ok_or_else(|| RenderError::QuiltBufferNotReady("no backing image".to_string()))
    }
}

/// How source pixels combine with the quilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlitMode {
    /// Overwrite the destination.
    #[default]
    Replace,
    /// Alpha-composite the source over the destination.
    Over,
}

#[allow(clippy::cast_possible_truncation)] // alpha math stays within 0..=255
fn over(dst: &mut [u8], src: &[u8]) {
    let alpha = u32::from(src[3]);
    for (d, &s) in dst[..3].iter_mut().zip(&src[..3]) {
        let mixed = u32::from(s) * alpha + u32::from(*d) * (255 - alpha);
        *d = ((mixed + 127) / 255) as u8;
    }
    let out_alpha = alpha + u32::from(dst[3]) * (255 - alpha) / 255;
    dst[3] = out_alpha.min(255) as u8;
}

/// Write `src` into a `width` x `height` rectangle at column `x` of `rows`.
///
/// `rows` starts at the rectangle's top row and has `stride` pixels per row.
/// A source of a different size is scaled nearest-neighbour.
fn blit(
    rows: &mut [u8],
    stride: u32,
    x: u32,
    width: u32,
    height: u32,
    src: &PixelBuffer,
    mode: BlitMode,
) {
    if src.width == 0 || src.height == 0 {
        return;
    }
    let stride = stride as usize * 4;
    let same_size = src.width == width && src.height == height;
    for dy in 0..height as usize {
        let start = dy * stride + x as usize * 4;
        let dst_row = &mut rows[start..start + width as usize * 4];
        let sy = if same_size {
            dy
        } else {
            dy * src.height as usize / height as usize
        };
        let src_row_start = sy * src.width as usize * 4;
        let src_row = &src.pixels[src_row_start..src_row_start + src.width as usize * 4];

        match (mode, same_size) {
            (BlitMode::Replace, true) => dst_row.copy_from_slice(src_row),
            _ => {
                for (dx, dst) in dst_row.chunks_exact_mut(4).enumerate() {
                    let sx = if same_size {
                        dx
                    } else {
                        dx * src.width as usize / width as usize
                    };
                    let px = &src_row[sx * 4..sx * 4 + 4];
                    match mode {
                        BlitMode::Replace => dst.copy_from_slice(px),
                        BlitMode::Over => over(dst, px),
                    }
                }
            }
        }
    }
}

fn write_view(
    index: u32,
    view: &PixelBuffer,
    tiling: &Tiling,
    quilt: &mut QuiltBuffer,
    mode: BlitMode,
) -> RenderResult<ViewRect> {
    let rect = tiling.view_rect(index)?;
    let image = quilt.ready_image(tiling)?;
    let stride = image.width;
    let start = rect.y as usize * stride as usize * 4;
    let end = start + rect.height as usize * stride as usize * 4;
    blit(
        &mut image.pixels[start..end],
        stride,
        rect.x,
        rect.width,
        rect.height,
        view,
        mode,
    );
    Ok(rect)
}

/// Copy view `index` into its slot of the quilt.
///
/// A view whose size differs from the tiling's view size is scaled
/// nearest-neighbour into the slot.
///
/// # Errors
///
/// Returns [`RenderError::QuiltBufferNotReady`] (and writes nothing) if the
/// quilt is not allocated for `tiling`, or [`RenderError::InvalidViewIndex`]
/// if `index` is outside the tiling.
pub fn copy_view_to_quilt(
    index: u32,
    view: &PixelBuffer,
    tiling: &Tiling,
    quilt: &mut QuiltBuffer,
) -> RenderResult<ViewRect> {
    write_view(index, view, tiling, quilt, BlitMode::Replace)
}

/// Alpha-composite view `index` over whatever its slot already holds.
///
/// # Errors
///
/// Same as [`copy_view_to_quilt`].
pub fn overlay_view_to_quilt(
    index: u32,
    view: &PixelBuffer,
    tiling: &Tiling,
    quilt: &mut QuiltBuffer,
) -> RenderResult<ViewRect> {
    write_view(index, view, tiling, quilt, BlitMode::Over)
}

/// Write every view of a pass into the quilt at once.
///
/// `views[i]` goes to slot `i`. Bands of rows are independent, so with the
/// `parallel` feature they are filled concurrently.
///
/// # Errors
///
/// Returns [`RenderError::QuiltBufferNotReady`] if the quilt is not allocated
/// for `tiling`, or [`RenderError::Frame`] if `views.len()` is not the
/// tiling's view count.
pub fn composite_views(
    views: &[PixelBuffer],
    tiling: &Tiling,
    quilt: &mut QuiltBuffer,
    mode: BlitMode,
) -> RenderResult<()> {
    if views.len() != tiling.num_views() as usize {
        return Err(RenderError::Frame(format!(
            "tiling {} expects {} views, got {}",
            tiling,
            tiling.num_views(),
            views.len()
        )));
    }
    let image = quilt.ready_image(tiling)?;
    let stride = image.width;
    let band_len = tiling.view_height() as usize * stride as usize * 4;
    let padding = tiling.padding_y() as usize * stride as usize * 4;
    let (_, used) = image.pixels.split_at_mut(padding);

    let fill_band = |(band, rows): (usize, &mut [u8])| {
        for (index, view) in (0u32..).zip(views) {
            if tiling.band_of(index) as usize != band {
                continue;
            }
            let x = (index % tiling.columns()) * tiling.view_width();
            blit(
                rows,
                stride,
                x,
                tiling.view_width(),
                tiling.view_height(),
                view,
                mode,
            );
        }
    };

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        used.par_chunks_mut(band_len).enumerate().for_each(fill_band);
    }
    #[cfg(not(feature = "parallel"))]
    used.chunks_mut(band_len).enumerate().for_each(fill_band);

    tracing::debug!("Composited {} views into {}", views.len(), tiling);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, color: [u8; 4]) -> PixelBuffer {
        let mut buffer = PixelBuffer::new(width, height);
        buffer.clear(color);
        buffer
    }

    fn tag(index: u8) -> [u8; 4] {
        [index * 10, 255 - index, 7, 255]
    }

    // ===========================================
    // PixelBuffer Tests
    // ===========================================

    #[test]
    fn test_from_rgba_checks_length() {
        assert!(PixelBuffer::from_rgba(2, 2, vec![0; 16]).is_ok());
        assert!(matches!(
            PixelBuffer::from_rgba(2, 2, vec![0; 15]),
            Err(RenderError::Frame(_))
        ));
    }

    #[test]
    fn test_fill_rect_clips() {
        let mut buffer = PixelBuffer::new(4, 4);
        buffer.fill_rect(2, 2, 10, 10, [9, 9, 9, 9]);
        assert_eq!(buffer.get_pixel(3, 3), Some([9, 9, 9, 9]));
        assert_eq!(buffer.get_pixel(1, 1), Some([0, 0, 0, 0]));
        assert_eq!(buffer.get_pixel(4, 0), None);
    }

    #[test]
    fn test_blend_midpoint() {
        let a = solid(2, 2, [0, 0, 0, 255]);
        let b = solid(2, 2, [200, 100, 50, 255]);
        let mid = blend(&a, &b, 0.5).expect("blend");
        assert_eq!(mid.get_pixel(1, 1), Some([100, 50, 25, 255]));
        assert!(blend(&a, &solid(3, 2, [0; 4]), 0.5).is_err());
    }

    #[test]
    fn test_blit_scaled() {
        let mut dst = PixelBuffer::new(4, 4);
        dst.blit_scaled(&solid(2, 2, [1, 2, 3, 4]));
        assert_eq!(dst.get_pixel(3, 3), Some([1, 2, 3, 4]));
    }

    // ===========================================
    // Compositor Tests
    // ===========================================

    #[test]
    fn test_copy_requires_allocation() {
        let tiling = Tiling::new(4, 2, 400, 100).expect("tiling");
        let mut quilt = QuiltBuffer::unallocated();
        let view = solid(100, 50, [255; 4]);
        assert!(matches!(
            copy_view_to_quilt(0, &view, &tiling, &mut quilt),
            Err(RenderError::QuiltBufferNotReady(_))
        ));
        assert!(!quilt.is_allocated());
    }

    #[test]
    fn test_copy_rejects_mismatched_allocation() {
        let tiling = Tiling::new(4, 2, 400, 100).expect("tiling");
        let other = Tiling::new(4, 2, 800, 200).expect("tiling");
        let mut quilt = QuiltBuffer::for_tiling(&other);
        let view = solid(100, 50, [255; 4]);
        assert!(matches!(
            copy_view_to_quilt(0, &view, &tiling, &mut quilt),
            Err(RenderError::QuiltBufferNotReady(_))
        ));
        let untouched = quilt.image().expect("image");
        assert!(untouched.pixels().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_copy_places_views() {
        let tiling = Tiling::new(4, 2, 400, 100).expect("tiling");
        let mut quilt = QuiltBuffer::for_tiling(&tiling);

        let rect = copy_view_to_quilt(0, &solid(100, 50, tag(0)), &tiling, &mut quilt)
            .expect("copy");
        assert_eq!((rect.x, rect.y), (0, 50));
        let rect = copy_view_to_quilt(7, &solid(100, 50, tag(7)), &tiling, &mut quilt)
            .expect("copy");
        assert_eq!((rect.x, rect.y), (300, 0));

        let image = quilt.image().expect("image");
        assert_eq!(image.get_pixel(0, 99), Some(tag(0)));
        assert_eq!(image.get_pixel(99, 50), Some(tag(0)));
        assert_eq!(image.get_pixel(399, 0), Some(tag(7)));
        assert_eq!(image.get_pixel(100, 50), Some([0; 4]));
    }

    #[test]
    fn test_copy_scales_mismatched_view() {
        let tiling = Tiling::new(2, 1, 200, 50).expect("tiling");
        let mut quilt = QuiltBuffer::for_tiling(&tiling);
        copy_view_to_quilt(1, &solid(10, 5, [5, 6, 7, 8]), &tiling, &mut quilt).expect("copy");
        let image = quilt.image().expect("image");
        assert_eq!(image.get_pixel(100, 0), Some([5, 6, 7, 8]));
        assert_eq!(image.get_pixel(199, 49), Some([5, 6, 7, 8]));
        assert_eq!(image.get_pixel(99, 0), Some([0; 4]));
    }

    #[test]
    fn test_overlay_blends_alpha() {
        let tiling = Tiling::new(1, 1, 4, 4).expect("tiling");
        let mut quilt = QuiltBuffer::for_tiling(&tiling);
        quilt.clear([0, 0, 200, 255]);
        overlay_view_to_quilt(0, &solid(4, 4, [200, 0, 0, 0]), &tiling, &mut quilt)
            .expect("overlay");
        assert_eq!(quilt.image().expect("image").get_pixel(0, 0), Some([0, 0, 200, 255]));

        overlay_view_to_quilt(0, &solid(4, 4, [200, 0, 0, 255]), &tiling, &mut quilt)
            .expect("overlay");
        assert_eq!(quilt.image().expect("image").get_pixel(0, 0), Some([200, 0, 0, 255]));
    }

    #[test]
    fn test_composite_matches_sequential_copies() {
        let tiling = Tiling::new(3, 3, 31, 32).expect("tiling");
        let views: Vec<PixelBuffer> = (0u8..9)
            .map(|i| solid(tiling.view_width(), tiling.view_height(), tag(i)))
            .collect();

        let mut batch = QuiltBuffer::for_tiling(&tiling);
        composite_views(&views, &tiling, &mut batch, BlitMode::Replace).expect("composite");

        let mut sequential = QuiltBuffer::for_tiling(&tiling);
        for (i, view) in (0u32..).zip(&views) {
            copy_view_to_quilt(i, view, &tiling, &mut sequential).expect("copy");
        }

        assert_eq!(batch.image(), sequential.image());
        // Padding rows stay untouched.
        assert_eq!(batch.image().expect("image").get_pixel(0, 0), Some([0; 4]));
    }

    #[test]
    fn test_composite_checks_view_count() {
        let tiling = Tiling::new(2, 2, 20, 20).expect("tiling");
        let mut quilt = QuiltBuffer::for_tiling(&tiling);
        let views = vec![solid(10, 10, [1; 4]); 3];
        assert!(matches!(
            composite_views(&views, &tiling, &mut quilt, BlitMode::Replace),
            Err(RenderError::Frame(_))
        ));
    }

    #[test]
    fn test_allocate_reuses_matching_image() {
        let tiling = Tiling::new(2, 2, 20, 20).expect("tiling");
        let mut quilt = QuiltBuffer::for_tiling(&tiling);
        quilt.clear([3; 4]);
        quilt.allocate(&tiling);
        assert_eq!(quilt.image().expect("image").get_pixel(5, 5), Some([3; 4]));
        quilt.release();
        assert!(!quilt.is_allocated());
    }
}

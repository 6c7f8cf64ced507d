//! # Holographic Rendering
//!
//! Drives one quilt render pass: resolve per-view cameras, ask the host to
//! draw each view, and composite the results into the quilt buffer.
//!
//! ## Usage
//!
//! ```text
//! 1. Create a HolographicRenderer with a calibration and tiling
//! 2. Call reload_calibration() / set_tiling() when either changes
//! 3. Call render_pass() with a ViewRenderer once per frame
//! 4. Read quilt() and uniforms() for the display pass
//! ```
//!
//! The renderer owns everything a pass touches. Hosts must not run two
//! passes against the same renderer at once; `&mut self` enforces this.

use std::time::Instant;

use quilt_core::{resolve_calibration, Calibration, CalibrationProvider};
use serde::{Deserialize, Serialize};

use crate::error::RenderResult;
use crate::offset::{
    compute_view_transform, ViewRenderRequest, ViewTransform, SHADOW_SAFE_FOV_DEGREES,
};
use crate::quilt::{
    blend, copy_view_to_quilt, overlay_view_to_quilt, PixelBuffer, QuiltBuffer,
};
use crate::spatial::CameraRig;
use crate::tiling::Tiling;
use crate::uniforms::{compute_uniforms, LenticularUniforms};

/// Render fewer views and cross-fade the rest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewInterpolation {
    /// Render every view.
    #[default]
    None,
    /// Render every second view.
    EveryOther,
    /// Render every fourth view.
    Every4th,
    /// Render every eighth view.
    Every8th,
    /// Render four views across the pass.
    FourViews,
    /// Render only the first and last views.
    TwoViews,
}

impl ViewInterpolation {
    /// Distance between rendered views for a pass of `num_views`.
    #[must_use]
    pub fn step(self, num_views: u32) -> u32 {
        let step = match self {
            Self::None => 1,
            Self::EveryOther => 2,
            Self::Every4th => 4,
            Self::Every8th => 8,
            Self::FourViews => num_views / 3,
            Self::TwoViews => num_views,
        };
        step.max(1)
    }

    /// Whether view `index` is rendered rather than interpolated.
    ///
    /// The last view is always rendered.
    #[must_use]
    pub fn renders(self, index: u32, num_views: u32) -> bool {
        index % self.step(num_views) == 0 || index + 1 == num_views
    }
}

/// Settings for quilt rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderSettings {
    /// Color the quilt is cleared to before each pass (RGBA).
    pub clear_color: [f32; 4],
    /// View count reduction.
    pub interpolation: ViewInterpolation,
    /// With an override quilt set, draw views on top of it instead of
    /// showing it alone.
    pub render_override_behind: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            interpolation: ViewInterpolation::None,
            render_override_behind: false,
        }
    }
}

/// What the host needs to draw one view.
#[derive(Debug, Clone, Copy)]
pub struct ViewContext<'a> {
    /// The view being drawn.
    pub request: &'a ViewRenderRequest,
    /// Its camera matrices.
    pub transform: &'a ViewTransform,
    /// Expected output width.
    pub width: u32,
    /// Expected output height.
    pub height: u32,
    /// Field of view to draw with so shadow frusta cover the skewed view.
    pub render_fov_degrees: f32,
}

/// Host-side scene renderer.
pub trait ViewRenderer {
    /// Draw one view. Outputs of another size are scaled to fit.
    ///
    /// # Errors
    ///
    /// Any error aborts the pass.
    fn render_view(&mut self, ctx: &ViewContext<'_>) -> RenderResult<PixelBuffer>;

    /// Called once after every view of a pass is in the quilt.
    fn pass_complete(&mut self, _num_views: u32) {}
}

/// Test-pattern renderer: each view is a gradient swatch.
///
/// Left views are more blue, right views are more red. A thin outline marks
/// the view bounds and a marker bar along the top edge slides from left to
/// right across the views, so a misplaced or flipped tile is easy to spot.
#[derive(Debug, Clone, Copy, Default)]
pub struct GradientViewRenderer;

const OUTLINE_COLOR: [u8; 4] = [255, 255, 255, 128];
const MARKER_COLOR: [u8; 4] = [255, 230, 0, 255];

impl GradientViewRenderer {
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn mark_view(view: &mut PixelBuffer, progress: f32) {
        let (width, height) = (view.width(), view.height());
        if width < 4 || height < 4 {
            return;
        }
        view.fill_rect(0, 0, width, 1, OUTLINE_COLOR);
        view.fill_rect(0, height - 1, width, 1, OUTLINE_COLOR);
        view.fill_rect(0, 0, 1, height, OUTLINE_COLOR);
        view.fill_rect(width - 1, 0, 1, height, OUTLINE_COLOR);

        let marker_width = (width / 16).max(2);
        let travel = width - 2 - marker_width;
        let x = 1 + (travel as f32 * progress) as u32;
        view.fill_rect(x, 1, marker_width, (height / 8).max(1), MARKER_COLOR);
    }
}

impl ViewRenderer for GradientViewRenderer {
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn render_view(&mut self, ctx: &ViewContext<'_>) -> RenderResult<PixelBuffer> {
        let progress =
            ctx.request.view_index as f32 / ctx.request.num_views.saturating_sub(1).max(1) as f32;
        let red = (progress * 255.0) as u8;
        let blue = ((1.0 - progress) * 255.0) as u8;

        let mut view = PixelBuffer::new(ctx.width, ctx.height);
        view.clear([red, 100, blue, 255]);
        Self::mark_view(&mut view, progress);
        Ok(view)
    }
}

/// Result of a render pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HolographicRenderResult {
    /// Views drawn by the host.
    pub view_count: u32,
    /// Views filled by cross-fading.
    pub interpolated_count: u32,
    /// Total pass time in milliseconds.
    pub render_time_ms: f64,
}

/// Totals over the quilt passes of one renderer.
///
/// Timings are split per view so passes over different tilings compare.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassStats {
    /// Completed passes.
    pub passes: u64,
    /// Views drawn by the host across all passes.
    pub views_rendered: u64,
    /// Views filled by cross-fading across all passes.
    pub views_interpolated: u64,
    /// Duration of the most recent pass in milliseconds.
    pub last_pass_ms: f64,
    /// Longest pass in milliseconds.
    pub slowest_pass_ms: f64,
    /// Sum of all pass durations in milliseconds.
    pub total_pass_ms: f64,
}

impl PassStats {
    /// Fold one pass into the totals.
    pub fn record(&mut self, result: &HolographicRenderResult) {
        self.passes += 1;
        self.views_rendered += u64::from(result.view_count);
        self.views_interpolated += u64::from(result.interpolated_count);
        self.last_pass_ms = result.render_time_ms;
        self.slowest_pass_ms = self.slowest_pass_ms.max(result.render_time_ms);
        self.total_pass_ms += result.render_time_ms;
    }

    /// Mean pass duration, or zero before the first pass.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_pass_ms(&self) -> f64 {
        if self.passes == 0 {
            return 0.0;
        }
        self.total_pass_ms / self.passes as f64
    }

    /// Mean time per quilt view, counting interpolated views.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_view_ms(&self) -> f64 {
        let views = self.views_rendered + self.views_interpolated;
        if views == 0 {
            return 0.0;
        }
        self.total_pass_ms / views as f64
    }

    /// Share of quilt views filled by cross-fading (0..=1).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn interpolated_share(&self) -> f64 {
        let views = self.views_rendered + self.views_interpolated;
        if views == 0 {
            return 0.0;
        }
        self.views_interpolated as f64 / views as f64
    }
}

/// Render-pass driver for one display.
#[derive(Debug)]
pub struct HolographicRenderer {
    calibration: Calibration,
    tiling: Tiling,
    rig: CameraRig,
    settings: RenderSettings,
    uniforms: LenticularUniforms,
    quilt: QuiltBuffer,
    override_quilt: Option<PixelBuffer>,
    stats: PassStats,
}

impl HolographicRenderer {
    /// Create a renderer for `calibration` laid out as `tiling`.
    #[must_use]
    pub fn new(calibration: Calibration, tiling: Tiling) -> Self {
        let uniforms = compute_uniforms(&calibration, &tiling);
        let quilt = QuiltBuffer::for_tiling(&tiling);
        Self {
            calibration,
            tiling,
            rig: CameraRig::default(),
            settings: RenderSettings::default(),
            uniforms,
            quilt,
            override_quilt: None,
            stats: PassStats::default(),
        }
    }

    /// Create a renderer with a custom rig and settings.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidRig`](crate::RenderError::InvalidRig) if
    /// the rig fails validation.
    pub fn with_settings(
        calibration: Calibration,
        tiling: Tiling,
        rig: CameraRig,
        settings: RenderSettings,
    ) -> RenderResult<Self> {
        rig.validate()?;
        Ok(Self {
            rig,
            settings,
            ..Self::new(calibration, tiling)
        })
    }

    /// Current calibration.
    #[must_use]
    pub const fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Current tiling.
    #[must_use]
    pub const fn tiling(&self) -> &Tiling {
        &self.tiling
    }

    /// Camera rig.
    #[must_use]
    pub const fn rig(&self) -> &CameraRig {
        &self.rig
    }

    /// Render settings.
    #[must_use]
    pub const fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Shader uniforms for the current calibration and tiling.
    #[must_use]
    pub const fn uniforms(&self) -> &LenticularUniforms {
        &self.uniforms
    }

    /// The quilt produced by the last pass.
    #[must_use]
    pub const fn quilt(&self) -> &QuiltBuffer {
        &self.quilt
    }

    /// Rendering statistics.
    #[must_use]
    pub const fn stats(&self) -> &PassStats {
        &self.stats
    }

    /// Replace the calibration and recompute the uniforms.
    pub fn reload_calibration(&mut self, calibration: Calibration) {
        tracing::debug!(
            "Reloading calibration {} ({}x{})",
            calibration.serial(),
            calibration.screen_width(),
            calibration.screen_height()
        );
        self.calibration = calibration;
        self.uniforms = compute_uniforms(&self.calibration, &self.tiling);
    }

    /// Query `provider` for `target_display` and reload.
    ///
    /// Provider failures fall back to the default calibration.
    pub fn reload_from_provider(
        &mut self,
        provider: &mut dyn CalibrationProvider,
        target_display: i32,
    ) {
        let calibration = resolve_calibration(provider, target_display);
        self.reload_calibration(calibration);
    }

    /// Replace the tiling, resize the quilt and recompute the uniforms.
    pub fn set_tiling(&mut self, tiling: Tiling) {
        tracing::debug!("Tiling changed to {} ({})", tiling.name(), tiling);
        self.tiling = tiling;
        self.quilt.allocate(&self.tiling);
        self.uniforms = compute_uniforms(&self.calibration, &self.tiling);
    }

    /// Update the camera rig. The previous rig is kept if `rig` is invalid.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidRig`](crate::RenderError::InvalidRig) if
    /// the rig fails validation.
    pub fn set_rig(&mut self, rig: CameraRig) -> RenderResult<()> {
        rig.validate()?;
        self.rig = rig;
        Ok(())
    }

    /// Update the settings.
    pub fn set_settings(&mut self, settings: RenderSettings) {
        self.settings = settings;
    }

    /// Show a prepared quilt instead of (or behind) rendered views.
    pub fn set_override_quilt(&mut self, quilt: Option<PixelBuffer>) {
        self.override_quilt = quilt;
    }

    /// Reset rendering statistics.
    pub fn reset_stats(&mut self) {
        self.stats = PassStats::default();
    }

    /// Render every view of the current tiling into the quilt.
    ///
    /// # Errors
    ///
    /// Returns the first error from `renderer` or from compositing; the
    /// quilt may then hold a partial pass, which the next pass overwrites.
    pub fn render_pass(
        &mut self,
        renderer: &mut dyn ViewRenderer,
    ) -> RenderResult<HolographicRenderResult> {
        let start = Instant::now();
        let num_views = self.tiling.num_views();
        self.quilt.allocate(&self.tiling);

        let overlay = match (&self.override_quilt, self.quilt.image_mut()) {
            (Some(override_quilt), Some(image)) => {
                image.blit_scaled(override_quilt);
                self.settings.render_override_behind
            }
            _ => {
                self.quilt.clear(float_color_to_bytes(&self.settings.clear_color));
                false
            }
        };

        let (view_count, interpolated_count) =
            if self.override_quilt.is_some() && !self.settings.render_override_behind {
                (0, 0)
            } else {
                self.render_views(renderer, overlay)?
            };
        renderer.pass_complete(num_views);

        let result = HolographicRenderResult {
            view_count,
            interpolated_count,
            render_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        };
        self.stats.record(&result);
        tracing::debug!(
            "Rendered {} views ({} interpolated) into {} in {:.2}ms",
            view_count,
            interpolated_count,
            self.tiling,
            result.render_time_ms
        );
        Ok(result)
    }

    fn render_views(
        &mut self,
        renderer: &mut dyn ViewRenderer,
        overlay: bool,
    ) -> RenderResult<(u32, u32)> {
        let num_views = self.tiling.num_views();
        let (width, height) = (self.tiling.view_width(), self.tiling.view_height());
        let frame = self
            .rig
            .offset_frame(self.tiling.view_aspect(&self.calibration));
        let interpolation = self.settings.interpolation;
        let keep = interpolation.step(num_views) > 1;
        let mut rendered: Vec<Option<PixelBuffer>> = vec![None; num_views as usize];
        let mut view_count = 0;

        for index in 0..num_views {
            if !interpolation.renders(index, num_views) {
                continue;
            }
            let request = ViewRenderRequest::for_view(&self.calibration, &self.rig, index, num_views);
            let transform = compute_view_transform(&request, &frame)?;
            let ctx = ViewContext {
                request: &request,
                transform: &transform,
                width,
                height,
                render_fov_degrees: SHADOW_SAFE_FOV_DEGREES,
            };
            let view = fit(renderer.render_view(&ctx)?, width, height);
            self.write(index, &view, overlay)?;
            view_count += 1;
            if keep {
                rendered[index as usize] = Some(view);
            }
        }

        let mut interpolated_count = 0;
        if keep {
            let step = interpolation.step(num_views);
            for index in 0..num_views {
                if interpolation.renders(index, num_views) {
                    continue;
                }
                let lo = index - index % step;
                let hi = (lo + step).min(num_views - 1);
                if let (Some(a), Some(b)) = (&rendered[lo as usize], &rendered[hi as usize]) {
                    #[allow(clippy::cast_precision_loss)] // view counts are tiny
                    let t = (index - lo) as f32 / (hi - lo) as f32;
                    let view = blend(a, b, t)?;
                    self.write(index, &view, overlay)?;
                    interpolated_count += 1;
                }
            }
        }
        Ok((view_count, interpolated_count))
    }

    fn write(&mut self, index: u32, view: &PixelBuffer, overlay: bool) -> RenderResult<()> {
        if overlay {
            overlay_view_to_quilt(index, view, &self.tiling, &mut self.quilt)?;
        } else {
            copy_view_to_quilt(index, view, &self.tiling, &mut self.quilt)?;
        }
        Ok(())
    }
}

/// Scale `view` to `width` x `height` if it is not already that size.
fn fit(view: PixelBuffer, width: u32, height: u32) -> PixelBuffer {
    if view.width() == width && view.height() == height {
        return view;
    }
    let mut scaled = PixelBuffer::new(width, height);
    scaled.blit_scaled(&view);
    scaled
}

/// Convert a float RGBA color (0.0-1.0) to byte RGBA (0-255).
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn float_color_to_bytes(color: &[f32; 4]) -> [u8; 4] {
    color.map(|c| (c.clamp(0.0, 1.0) * 255.0) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolation_steps() {
        assert_eq!(ViewInterpolation::None.step(45), 1);
        assert_eq!(ViewInterpolation::EveryOther.step(45), 2);
        assert_eq!(ViewInterpolation::Every8th.step(45), 8);
        assert_eq!(ViewInterpolation::FourViews.step(45), 15);
        assert_eq!(ViewInterpolation::TwoViews.step(45), 45);
        assert_eq!(ViewInterpolation::FourViews.step(2), 1);
    }

    #[test]
    fn test_interpolation_always_renders_last_view() {
        let rendered: Vec<u32> = (0..45)
            .filter(|&i| ViewInterpolation::FourViews.renders(i, 45))
            .collect();
        assert_eq!(rendered, vec![0, 15, 30, 44]);

        let two: Vec<u32> = (0..32)
            .filter(|&i| ViewInterpolation::TwoViews.renders(i, 32))
            .collect();
        assert_eq!(two, vec![0, 31]);
    }

    #[test]
    fn test_float_color_to_bytes_clamps() {
        assert_eq!(float_color_to_bytes(&[2.0, -1.0, 0.5, 1.0]), [255, 0, 127, 255]);
    }

    #[test]
    fn test_fit_scales_views() {
        let mut small = PixelBuffer::new(2, 2);
        small.clear([9, 9, 9, 9]);
        let big = fit(small, 8, 4);
        assert_eq!((big.width(), big.height()), (8, 4));
        assert_eq!(big.get_pixel(7, 3), Some([9, 9, 9, 9]));
    }

    fn pass(views: u32, interpolated: u32, render_time_ms: f64) -> HolographicRenderResult {
        HolographicRenderResult {
            view_count: views,
            interpolated_count: interpolated,
            render_time_ms,
        }
    }

    #[test]
    fn test_pass_stats_empty() {
        let stats = PassStats::default();
        assert!(stats.mean_pass_ms().abs() < f64::EPSILON);
        assert!(stats.mean_view_ms().abs() < f64::EPSILON);
        assert!(stats.interpolated_share().abs() < f64::EPSILON);
    }

    #[test]
    fn test_pass_stats_per_view_timing() {
        let mut stats = PassStats::default();
        // A 48-view pass and a 16-view pass with half the views cross-faded.
        stats.record(&pass(48, 0, 24.0));
        stats.record(&pass(8, 8, 8.0));

        assert_eq!(stats.passes, 2);
        assert_eq!(stats.views_rendered, 56);
        assert_eq!(stats.views_interpolated, 8);
        assert!((stats.last_pass_ms - 8.0).abs() < 1e-9);
        assert!((stats.slowest_pass_ms - 24.0).abs() < 1e-9);
        assert!((stats.mean_pass_ms() - 16.0).abs() < 1e-9);
        assert!((stats.mean_view_ms() - 0.5).abs() < 1e-9);
        assert!((stats.interpolated_share() - 0.125).abs() < 1e-9);
    }

    #[test]
    fn test_set_rig_rejects_invalid_rig() {
        let mut renderer = HolographicRenderer::new(Calibration::default(), Tiling::default());
        let flat = CameraRig {
            size: 0.0,
            ..CameraRig::default()
        };
        assert!(matches!(
            renderer.set_rig(flat.clone()),
            Err(crate::RenderError::InvalidRig(_))
        ));
        assert_eq!(renderer.rig(), &CameraRig::default());

        let result = HolographicRenderer::with_settings(
            Calibration::default(),
            Tiling::default(),
            flat,
            RenderSettings::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_gradient_marker_follows_view_index() {
        let tiling = Tiling::new(3, 1, 96, 32).expect("tiling");
        let mut renderer = HolographicRenderer::new(Calibration::default(), tiling);
        renderer
            .render_pass(&mut GradientViewRenderer)
            .expect("pass");
        let image = renderer.quilt().image().expect("quilt");

        // Views are 32 wide; the marker is 2 wide and travels 28 pixels.
        assert_eq!(image.get_pixel(1, 1), Some(MARKER_COLOR));
        assert_eq!(image.get_pixel(32 + 15, 1), Some(MARKER_COLOR));
        assert_eq!(image.get_pixel(64 + 29, 1), Some(MARKER_COLOR));
        assert_ne!(image.get_pixel(32 + 2, 1), Some(MARKER_COLOR));
    }

    #[test]
    fn test_set_tiling_recomputes_uniforms() {
        let mut renderer = HolographicRenderer::new(Calibration::default(), Tiling::default());
        assert!((renderer.uniforms().num_views - 32.0).abs() < f32::EPSILON);

        let tiling = Tiling::new(5, 9, 4096, 4096).expect("tiling");
        renderer.set_tiling(tiling.clone());
        assert!((renderer.uniforms().num_views - 45.0).abs() < f32::EPSILON);
        assert!(renderer.quilt().is_allocated_for(&tiling));
    }
}

//! Integration tests for quilt render passes.
//!
//! These tests drive the complete pipeline from calibration and tiling to a
//! populated quilt, ensuring the offset, compositing, uniform and image
//! modules agree with each other.

use quilt_core::{Calibration, CalibrationParams, StaticProvider};
use quilt_renderer::holographic::{
    GradientViewRenderer, HolographicRenderer, RenderSettings, ViewContext, ViewInterpolation,
    ViewRenderer,
};
use quilt_renderer::quilt::PixelBuffer;
use quilt_renderer::spatial::CameraRig;
use quilt_renderer::tiling::Tiling;
use quilt_renderer::{RenderError, RenderResult, SHADOW_SAFE_FOV_DEGREES};

/// Small layout for fast passes: 4x2 views of 25x20 pixels.
fn small_tiling() -> Tiling {
    Tiling::new(4, 2, 100, 40).expect("tiling")
}

fn color_for(index: u32) -> [u8; 4] {
    let v = u8::try_from(index * 20).expect("small index");
    [v, 0, 200 - v, 255]
}

/// Renders solid views and records every call.
#[derive(Default)]
struct RecordingRenderer {
    calls: Vec<(u32, f32, f32)>,
    completed: Vec<u32>,
    alpha: u8,
}

impl ViewRenderer for RecordingRenderer {
    fn render_view(&mut self, ctx: &ViewContext<'_>) -> RenderResult<PixelBuffer> {
        self.calls.push((
            ctx.request.view_index,
            ctx.render_fov_degrees,
            ctx.transform.offset.horizontal,
        ));
        let mut color = color_for(ctx.request.view_index);
        color[3] = if self.alpha == 0 { 255 } else { self.alpha };
        let mut view = PixelBuffer::new(ctx.width, ctx.height);
        view.clear(color);
        Ok(view)
    }

    fn pass_complete(&mut self, num_views: u32) {
        self.completed.push(num_views);
    }
}

/// Pixel at the middle of view `index`.
fn view_center(renderer: &HolographicRenderer, index: u32) -> [u8; 4] {
    let rect = renderer.tiling().view_rect(index).expect("rect");
    renderer
        .quilt()
        .image()
        .expect("quilt")
        .get_pixel(rect.x + rect.width / 2, rect.y + rect.height / 2)
        .expect("pixel")
}

// ============================================================================
// Render passes
// ============================================================================

#[test]
fn gradient_pass_fills_every_view() {
    let mut renderer = HolographicRenderer::new(Calibration::default(), small_tiling());
    let result = renderer
        .render_pass(&mut GradientViewRenderer)
        .expect("pass");

    assert_eq!(result.view_count, 8);
    assert_eq!(result.interpolated_count, 0);
    assert!(result.render_time_ms >= 0.0);

    let first = view_center(&renderer, 0);
    let last = view_center(&renderer, 7);
    assert!(first[2] > first[0], "first view should be blue");
    assert!(last[0] > last[2], "last view should be red");

    // View 0 sits at the bottom left of the quilt.
    let image = renderer.quilt().image().expect("quilt");
    assert_eq!(image.get_pixel(12, 30), Some(first));
}

#[test]
fn pass_requests_symmetric_views_with_wide_fov() {
    let mut renderer = HolographicRenderer::new(Calibration::default(), small_tiling());
    let mut recorder = RecordingRenderer::default();
    renderer.render_pass(&mut recorder).expect("pass");

    let indices: Vec<u32> = recorder.calls.iter().map(|c| c.0).collect();
    assert_eq!(indices, (0..8).collect::<Vec<_>>());
    assert!(recorder
        .calls
        .iter()
        .all(|c| (c.1 - SHADOW_SAFE_FOV_DEGREES).abs() < f32::EPSILON));

    let first = recorder.calls[0].2;
    let last = recorder.calls[7].2;
    assert!(first < 0.0);
    assert!((first + last).abs() < 1e-4);
    assert_eq!(recorder.completed, vec![8]);
}

#[test]
fn interpolation_blends_skipped_views() {
    let settings = RenderSettings {
        interpolation: ViewInterpolation::EveryOther,
        ..RenderSettings::default()
    };
    let mut renderer = HolographicRenderer::with_settings(
        Calibration::default(),
        small_tiling(),
        CameraRig::default(),
        settings,
    )
    .expect("rig");
    let mut recorder = RecordingRenderer::default();
    let result = renderer.render_pass(&mut recorder).expect("pass");

    let indices: Vec<u32> = recorder.calls.iter().map(|c| c.0).collect();
    assert_eq!(indices, vec![0, 2, 4, 6, 7]);
    assert_eq!(result.view_count, 5);
    assert_eq!(result.interpolated_count, 3);

    // View 1 is halfway between views 0 and 2.
    let expected = color_for(1);
    assert_eq!(view_center(&renderer, 1), expected);
    assert_eq!(view_center(&renderer, 5), color_for(5));
}

#[test]
fn override_quilt_replaces_rendering() {
    let mut renderer = HolographicRenderer::new(Calibration::default(), small_tiling());
    let mut override_quilt = PixelBuffer::new(50, 20);
    override_quilt.clear([1, 2, 3, 255]);
    renderer.set_override_quilt(Some(override_quilt));

    let mut recorder = RecordingRenderer::default();
    let result = renderer.render_pass(&mut recorder).expect("pass");

    assert!(recorder.calls.is_empty());
    assert_eq!(result.view_count, 0);
    assert_eq!(recorder.completed, vec![8]);
    let image = renderer.quilt().image().expect("quilt");
    assert!(image.pixels().chunks_exact(4).all(|px| px == [1, 2, 3, 255]));
}

#[test]
fn override_quilt_shows_behind_transparent_views() {
    let settings = RenderSettings {
        render_override_behind: true,
        ..RenderSettings::default()
    };
    let mut renderer = HolographicRenderer::with_settings(
        Calibration::default(),
        small_tiling(),
        CameraRig::default(),
        settings,
    )
    .expect("rig");
    let mut override_quilt = PixelBuffer::new(100, 40);
    override_quilt.clear([9, 9, 9, 255]);
    renderer.set_override_quilt(Some(override_quilt));

    let mut recorder = RecordingRenderer {
        alpha: 1,
        ..RecordingRenderer::default()
    };
    renderer.render_pass(&mut recorder).expect("pass");

    assert_eq!(recorder.calls.len(), 8);
    let px = view_center(&renderer, 3);
    assert!(px[0] <= 10 && px[2] <= 10, "override should dominate: {px:?}");
}

struct FailingRenderer;

impl ViewRenderer for FailingRenderer {
    fn render_view(&mut self, ctx: &ViewContext<'_>) -> RenderResult<PixelBuffer> {
        Err(RenderError::Frame(format!(
            "scene lost at view {}",
            ctx.request.view_index
        )))
    }
}

#[test]
fn renderer_failure_aborts_pass() {
    let mut renderer = HolographicRenderer::new(Calibration::default(), small_tiling());
    let result = renderer.render_pass(&mut FailingRenderer);

    assert!(matches!(result, Err(RenderError::Frame(_))));
    assert_eq!(renderer.stats().passes, 0);
}

#[test]
fn stats_accumulate_over_passes() {
    let mut renderer = HolographicRenderer::new(Calibration::default(), small_tiling());
    for _ in 0..3 {
        renderer
            .render_pass(&mut GradientViewRenderer)
            .expect("pass");
    }
    let stats = renderer.stats();
    assert_eq!(stats.passes, 3);
    assert_eq!(stats.views_rendered, 24);
    assert_eq!(stats.views_interpolated, 0);
    assert!(stats.slowest_pass_ms >= stats.mean_pass_ms());

    renderer.reset_stats();
    assert_eq!(renderer.stats().passes, 0);
}

// ============================================================================
// Calibration reloads
// ============================================================================

#[test]
fn reload_from_provider_updates_uniforms() {
    let mut renderer = HolographicRenderer::new(Calibration::default(), small_tiling());
    let before = *renderer.uniforms();

    let flipped = Calibration::new(CalibrationParams {
        flip_x: true,
        display_index: 1,
        ..CalibrationParams::default()
    })
    .expect("valid");
    let mut provider = StaticProvider::new(vec![Calibration::default(), flipped]);
    renderer.reload_from_provider(&mut provider, 1);

    assert!(renderer.calibration().flip_x());
    assert!((renderer.uniforms().tilt + before.tilt).abs() < 1e-6);
}

// ============================================================================
// Quilt files
// ============================================================================

#[cfg(feature = "images")]
mod quilt_files {
    use super::*;
    use quilt_renderer::image::{load_pixel_buffer_from_path, quilt_screenshot_path, save_png};
    use quilt_renderer::inference::{infer_preset_tiling, ReferenceStrategy};

    /// Same pattern in every view with a little per-view noise.
    struct PatternRenderer;

    impl ViewRenderer for PatternRenderer {
        fn render_view(&mut self, ctx: &ViewContext<'_>) -> RenderResult<PixelBuffer> {
            let noise = u8::try_from(ctx.request.view_index % 3).expect("small");
            let mut view = PixelBuffer::new(ctx.width, ctx.height);
            for y in 0..ctx.height {
                for x in 0..ctx.width {
                    let h = x.wrapping_mul(7919) ^ y.wrapping_mul(104_729) ^ (x * y);
                    let base = u8::try_from(h % 251).expect("below 251");
                    view.put_pixel(x, y, [base + noise, 255 - base, base / 3, 255]);
                }
            }
            Ok(view)
        }
    }

    #[test]
    fn saved_quilt_reloads_with_its_tiling() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tiling = Tiling::new(4, 8, 1024, 1024).expect("tiling");
        let mut renderer = HolographicRenderer::new(Calibration::default(), tiling.clone());
        renderer.render_pass(&mut PatternRenderer).expect("pass");

        let path = quilt_screenshot_path(dir.path(), "capture", &tiling).expect("path");
        save_png(renderer.quilt().image().expect("quilt"), &path).expect("save");

        let name = path.file_name().and_then(|n| n.to_str()).expect("name");
        let tagged: Tiling = name.parse().expect("tag");
        assert_eq!((tagged.columns(), tagged.rows()), (4, 8));

        let loaded = load_pixel_buffer_from_path(&path).expect("load");
        assert_eq!(Some(&loaded), renderer.quilt().image());

        let inferred = infer_preset_tiling(&loaded, ReferenceStrategy::TileMean);
        assert_eq!((inferred.tiling.columns(), inferred.tiling.rows()), (4, 8));
        assert!(!inferred.fell_back);
    }
}

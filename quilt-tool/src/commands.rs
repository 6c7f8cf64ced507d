//! Subcommand implementations.
//!
//! Each command returns the text `main` prints, so they can be tested
//! without capturing stdout.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::Context;
use quilt_core::{
    select_calibration, Calibration, CalibrationProvider, FileProvider, FlashStorage,
    LegacyConfig, MemoryFlash,
};
use quilt_renderer::image::{load_pixel_buffer_from_path, quilt_screenshot_path, save_png};
use quilt_renderer::{
    compute_uniforms, infer_preset_tiling, resolve_preset, CameraRig, GradientViewRenderer,
    HolographicRenderer, QualityHint, QuiltPreset, ReferenceStrategy, RenderSettings, Tiling,
    TilingRequest, ViewInterpolation,
};

use crate::ToolConfig;

/// Calibration for the configured file and display, or the default profile
/// when no file is configured.
///
/// # Errors
///
/// Returns an error if a configured file cannot be read or parsed; an
/// explicit file never falls back to the default profile.
pub fn load_calibration(config: &ToolConfig) -> anyhow::Result<Calibration> {
    let Some(path) = &config.calibration else {
        tracing::debug!("No calibration file given, using default calibration");
        return Ok(Calibration::default());
    };
    let calibrations = FileProvider::new(path)
        .calibrations()
        .with_context(|| format!("failed to load calibration from {}", path.display()))?;
    Ok(select_calibration(&calibrations, config.display))
}

/// Turn a preset id, tiling tag or "auto" into a layout.
///
/// # Errors
///
/// Returns an error if `preset` is neither a known preset nor a tiling tag.
pub fn resolve_tiling(
    preset: Option<&str>,
    calibration: &Calibration,
    quality: QualityHint,
) -> anyhow::Result<Tiling> {
    let request = match preset.map(str::trim) {
        None => TilingRequest::Automatic,
        Some(s) if s.eq_ignore_ascii_case("auto") => TilingRequest::Automatic,
        Some(s) => match s.parse::<QuiltPreset>() {
            Ok(preset) => TilingRequest::Preset(preset),
            Err(_) => TilingRequest::Custom(
                s.parse::<Tiling>()
                    .with_context(|| format!("unknown preset or tiling {s:?}"))?,
            ),
        },
    };
    Ok(resolve_preset(&request, calibration, quality))
}

fn configured_tiling(config: &ToolConfig, calibration: &Calibration) -> anyhow::Result<Tiling> {
    resolve_tiling(config.preset.as_deref(), calibration, config.quality)
}

/// Shader uniforms for the configured calibration and layout, as JSON.
///
/// # Errors
///
/// Returns an error if the calibration or the layout cannot be resolved.
pub fn uniforms(config: &ToolConfig) -> anyhow::Result<String> {
    let calibration = load_calibration(config)?;
    let tiling = configured_tiling(config, &calibration)?;
    let uniforms = compute_uniforms(&calibration, &tiling);
    tracing::debug!("Computed uniforms for {} on {}", tiling, calibration.serial());
    Ok(serde_json::to_string_pretty(&uniforms)?)
}

/// One line per preset: id, name, tag and view geometry.
#[must_use]
pub fn presets() -> String {
    let mut out = String::new();
    for preset in QuiltPreset::ALL {
        let tiling = preset.tiling();
        // Writing to a String cannot fail.
        let _ = writeln!(
            out,
            "{:<14} {:<14} {}  {:>2} views  {}x{}",
            preset.id(),
            preset.name(),
            tiling,
            tiling.num_views(),
            tiling.view_width(),
            tiling.view_height()
        );
    }
    out
}

/// Infer the layout of the quilt at `image`, as JSON.
///
/// # Errors
///
/// Returns an error if the image cannot be read.
pub fn infer(image: &Path, center_tile: bool) -> anyhow::Result<String> {
    let buffer = load_pixel_buffer_from_path(image)?;
    let strategy = if center_tile {
        ReferenceStrategy::CenterTile
    } else {
        ReferenceStrategy::TileMean
    };
    let inference = infer_preset_tiling(&buffer, strategy);
    if let Some(e) = inference.ambiguity() {
        tracing::warn!("{}: {}", image.display(), e);
    }
    tracing::info!("Inferred {} for {}", inference.tiling, image.display());
    Ok(serde_json::to_string_pretty(&inference)?)
}

/// Render the gradient test pattern and save it as a screenshot.
///
/// # Errors
///
/// Returns an error if the calibration or layout cannot be resolved, or the
/// file cannot be written.
pub fn render(
    config: &ToolConfig,
    output_dir: &Path,
    interpolation: ViewInterpolation,
) -> anyhow::Result<String> {
    let calibration = load_calibration(config)?;
    let tiling = configured_tiling(config, &calibration)?;
    let settings = RenderSettings {
        interpolation,
        ..RenderSettings::default()
    };
    let mut renderer =
        HolographicRenderer::with_settings(calibration, tiling, CameraRig::default(), settings)?;
    let result = renderer.render_pass(&mut GradientViewRenderer)?;

    let image = renderer
        .quilt()
        .image()
        .context("render pass left the quilt unallocated")?;
    let path = quilt_screenshot_path(output_dir, "quilt", renderer.tiling())?;
    save_png(image, &path)?;

    Ok(format!(
        "{} ({} rendered, {} interpolated, {:.2}ms)",
        path.display(),
        result.view_count,
        result.interpolated_count,
        result.render_time_ms
    ))
}

/// Store the configured calibration in a fresh flash image at `output`.
///
/// # Errors
///
/// Returns an error if the calibration cannot be loaded, does not fit, or the
/// file cannot be written.
pub fn flash_encode(config: &ToolConfig, output: &Path) -> anyhow::Result<String> {
    let calibration = load_calibration(config)?;
    let mut storage = FlashStorage::new(MemoryFlash::new());
    storage.store_config(&LegacyConfig::from_calibration(&calibration))?;
    let image = storage.into_inner().to_image();
    std::fs::write(output, &image)
        .with_context(|| format!("failed to write {}", output.display()))?;
    Ok(format!("{} ({} bytes)", output.display(), image.len()))
}

/// Calibration stored in the flash image at `image`, as native JSON.
///
/// # Errors
///
/// Returns an error if the image cannot be read or holds no calibration.
pub fn flash_decode(image: &Path) -> anyhow::Result<String> {
    let bytes =
        std::fs::read(image).with_context(|| format!("failed to read {}", image.display()))?;
    let mut storage = FlashStorage::new(MemoryFlash::from_image(&bytes)?);
    let calibration = storage.load_config()?.to_calibration()?;
    Ok(calibration.to_json_string()?)
}

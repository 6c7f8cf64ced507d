//! Lenticular shader parameters.
//!
//! Maps a display calibration and a quilt layout onto the uniform block the
//! interleaving shader reads. The block is `#[repr(C)]` and `Pod`, so hosts
//! can upload [`LenticularUniforms::as_bytes`] directly.

use bytemuck::{Pod, Zeroable};
use quilt_core::Calibration;
use serde::{Deserialize, Serialize};

use crate::tiling::Tiling;

/// Uniform block for the lenticular interleave pass (80 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LenticularUniforms {
    /// Lens pitch in lenses per screen width, corrected for slope.
    pub pitch: f32,
    /// Lens tilt per screen height.
    pub tilt: f32,
    /// Lens center offset.
    pub center: f32,
    /// Subpixel pitch.
    pub subp: f32,
    /// Subpixel fringe correction.
    pub fringe: f32,
    /// 1.0 if views are presented in reverse order.
    pub inv_view: f32,
    /// 1.0 if the output is mirrored horizontally.
    pub flip_x: f32,
    /// 1.0 if the output is mirrored vertically.
    pub flip_y: f32,
    /// Channel index sampled for red.
    pub ri: i32,
    /// Channel index sampled for blue.
    pub bi: i32,
    /// Views in the quilt.
    pub num_views: f32,
    #[serde(skip)]
    padding: f32,
    /// Columns, rows, used width fraction, used height fraction.
    pub tile: [f32; 4],
    /// Display aspect, view aspect, overscan flag, unused.
    pub aspect: [f32; 4],
}

impl LenticularUniforms {
    /// Raw bytes for upload.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

const fn flag(value: bool) -> f32 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Compute the shader uniforms for `calibration` and `tiling`.
///
/// Pure and cheap; callers recompute it whenever either input changes.
#[must_use]
#[allow(clippy::cast_precision_loss)] // screen sizes and view counts are far below 2^24
pub fn compute_uniforms(calibration: &Calibration, tiling: &Tiling) -> LenticularUniforms {
    let width = calibration.screen_width() as f32;
    let height = calibration.screen_height() as f32;
    let slope = calibration.slope();
    let flip_x = calibration.flip_x();
    let mirror = if flip_x { -1.0 } else { 1.0 };

    let screen_inches = width / calibration.dpi();
    let pitch = calibration.pitch() * screen_inches * (1.0 / slope).atan().cos();
    let tilt = height / (width * slope) * mirror;
    let center = calibration.center() + if flip_x { 0.5 } else { 0.0 };
    let subp = calibration.subpixel_size().unwrap_or(1.0 / (width * 3.0)) * mirror;
    let (ri, bi) = if calibration.flip_subpixel() { (2, 0) } else { (0, 2) };

    LenticularUniforms {
        pitch,
        tilt,
        center,
        subp,
        fringe: calibration.fringe(),
        inv_view: flag(calibration.invert_view()),
        flip_x: flag(flip_x),
        flip_y: flag(calibration.flip_y()),
        ri,
        bi,
        num_views: tiling.num_views() as f32,
        padding: 0.0,
        tile: [
            tiling.columns() as f32,
            tiling.rows() as f32,
            tiling.portion_x(),
            tiling.portion_y(),
        ],
        aspect: [
            calibration.aspect(),
            tiling.view_aspect(calibration),
            flag(tiling.overscan()),
            0.0,
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quilt_core::CalibrationParams;

    const EPSILON: f32 = 1e-6;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < EPSILON
    }

    fn calibration(flip_x: bool, flip_subpixel: bool) -> Calibration {
        Calibration::new(CalibrationParams {
            flip_x,
            flip_subpixel,
            center: 0.1,
            ..CalibrationParams::default()
        })
        .expect("valid")
    }

    #[test]
    fn test_tilt_sign_follows_flip_x() {
        let tiling = Tiling::default();
        let plain = compute_uniforms(&calibration(false, false), &tiling);
        let flipped = compute_uniforms(&calibration(true, false), &tiling);

        let expected = 1600.0 / (2560.0 * 5.8);
        assert!(approx_eq(plain.tilt, expected));
        assert!(approx_eq(flipped.tilt, -expected));
        assert!(approx_eq(flipped.subp, -plain.subp));
        assert!(approx_eq(plain.center, 0.1));
        assert!(approx_eq(flipped.center, 0.6));
        assert!(approx_eq(flipped.flip_x, 1.0));
    }

    #[test]
    fn test_pitch_accounts_for_width_and_slope() {
        let u = compute_uniforms(&Calibration::default(), &Tiling::default());
        let expected = 49.91 * (2560.0 / 338.0) * (1.0_f32 / 5.8).atan().cos();
        assert!((u.pitch - expected).abs() < 1e-3);
    }

    #[test]
    fn test_subpixel_defaults_and_override() {
        let u = compute_uniforms(&Calibration::default(), &Tiling::default());
        assert!(approx_eq(u.subp, 1.0 / (2560.0 * 3.0)));

        let cal = Calibration::new(CalibrationParams {
            subpixel_size: Some(0.0002),
            ..CalibrationParams::default()
        })
        .expect("valid");
        assert!(approx_eq(compute_uniforms(&cal, &Tiling::default()).subp, 0.0002));
    }

    #[test]
    fn test_channel_order() {
        let tiling = Tiling::default();
        let rgb = compute_uniforms(&calibration(false, false), &tiling);
        let bgr = compute_uniforms(&calibration(false, true), &tiling);
        assert_eq!((rgb.ri, rgb.bi), (0, 2));
        assert_eq!((bgr.ri, bgr.bi), (2, 0));
    }

    #[test]
    fn test_tile_and_aspect_packing() {
        let tiling = Tiling::new(5, 9, 4096, 4096)
            .expect("tiling")
            .with_aspect(Some(0.75))
            .expect("aspect")
            .with_overscan(true);
        let u = compute_uniforms(&Calibration::default(), &tiling);

        assert_eq!(u.tile[0], 5.0);
        assert_eq!(u.tile[1], 9.0);
        assert!(approx_eq(u.tile[2], tiling.portion_x()));
        assert!(approx_eq(u.num_views, 45.0));
        assert!(approx_eq(u.aspect[0], 1.6));
        assert!(approx_eq(u.aspect[1], 0.75));
        assert!(approx_eq(u.aspect[2], 1.0));

        let derived = compute_uniforms(&Calibration::default(), &Tiling::default());
        assert!(approx_eq(derived.aspect[1], 1.6));
        assert!(approx_eq(derived.aspect[2], 0.0));
    }

    #[test]
    fn test_uniform_block_layout() {
        let u = compute_uniforms(&Calibration::default(), &Tiling::default());
        assert_eq!(std::mem::size_of::<LenticularUniforms>(), 80);
        assert_eq!(u.as_bytes().len(), 80);
        assert_eq!(&u.as_bytes()[..4], &u.pitch.to_ne_bytes());
    }
}

//! Spatial math for multi-view capture.
//!
//! The capture rig looks at a focal plane of half-height `size` from a
//! distance derived from its field of view. Every view shares that focal
//! plane; views differ only by a sideways shift of the camera and a matching
//! skew of the projection, so the focal plane stays fixed on screen.
//!
//! ```text
//!                 focal plane (2 * size tall)
//!            ─────────────●─────────────   ← center
//!                        ╱│╲
//!                       ╱ │ ╲
//!                      ╱  │  ╲  fov
//!                     ╱   │   ╲
//!        ●    ●    ●    ● │  ●    ●    ●   ← view cameras
//!        0                │            n-1
//!                  dist = size / tan(fov / 2)
//! ```
//!
//! Matrices are column-major (`data[col * 4 + row]`), matching the OpenGL
//! convention used by the host renderer.

use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult};
use crate::offset::{apply_view_offset, OffsetFrame, OffsetModel, ViewOffset};

/// A 3D vector for positions and directions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    /// X component.
    pub x: f32,
    /// Y component.
    pub y: f32,
    /// Z component.
    pub z: f32,
}

impl Vec3 {
    /// Create a new vector.
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Zero vector.
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Unit vector pointing up (Y+).
    #[must_use]
    pub const fn up() -> Self {
        Self::new(0.0, 1.0, 0.0)
    }

    /// Unit vector pointing toward the viewer (Z+).
    #[must_use]
    pub const fn back() -> Self {
        Self::new(0.0, 0.0, 1.0)
    }

    /// Length of the vector.
    #[must_use]
    pub fn length(&self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Normalize to unit length; the zero vector is returned unchanged.
    #[must_use]
    pub fn normalize(&self) -> Self {
        let len = self.length();
        if len > 0.0 {
            self.scale(1.0 / len)
        } else {
            *self
        }
    }

    /// Cross product.
    #[must_use]
    pub fn cross(&self, other: &Self) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    /// Dot product.
    #[must_use]
    pub fn dot(&self, other: &Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Component-wise difference.
    #[must_use]
    pub fn sub(&self, other: &Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    /// Component-wise sum.
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        Self::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    /// Scale by a scalar.
    #[must_use]
    pub fn scale(&self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }
}

impl Default for Vec3 {
    fn default() -> Self {
        Self::zero()
    }
}

/// A 4x4 matrix for transformations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat4 {
    /// Matrix data in column-major order.
    pub data: [f32; 16],
}

impl Mat4 {
    /// Identity matrix.
    #[must_use]
    pub fn identity() -> Self {
        #[rustfmt::skip]
        let data = [
            1.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        Self { data }
    }

    /// Look-at view matrix.
    #[must_use]
    pub fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Self {
        let f = target.sub(&eye).normalize();
        let s = f.cross(&up).normalize();
        let u = s.cross(&f);

        #[rustfmt::skip]
        let data = [
            s.x,  u.x,  -f.x, 0.0,
            s.y,  u.y,  -f.y, 0.0,
            s.z,  u.z,  -f.z, 0.0,
            -s.dot(&eye), -u.dot(&eye), f.dot(&eye), 1.0,
        ];
        Self { data }
    }

    /// Perspective projection matrix.
    #[must_use]
    pub fn perspective(fov_y_radians: f32, aspect: f32, near: f32, far: f32) -> Self {
        let f = 1.0 / (fov_y_radians / 2.0).tan();
        let nf = 1.0 / (near - far);

        #[rustfmt::skip]
        let data = [
            f / aspect, 0.0, 0.0, 0.0,
            0.0, f, 0.0, 0.0,
            0.0, 0.0, (far + near) * nf, -1.0,
            0.0, 0.0, 2.0 * far * near * nf, 0.0,
        ];
        Self { data }
    }

    /// Element at `row`, `col` (`m03` is `get(0, 3)`).
    #[must_use]
    pub const fn get(&self, row: usize, col: usize) -> f32 {
        self.data[col * 4 + row]
    }

    /// Set the element at `row`, `col`.
    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.data[col * 4 + row] = value;
    }

    /// Add `delta` to the element at `row`, `col`.
    pub fn add_at(&mut self, row: usize, col: usize, delta: f32) {
        self.data[col * 4 + row] += delta;
    }

    /// Multiply two matrices.
    #[must_use]
    pub fn mul(&self, other: &Self) -> Self {
        let mut result = [0.0f32; 16];

        for row in 0..4 {
            for col in 0..4 {
                for k in 0..4 {
                    result[col * 4 + row] += self.data[k * 4 + row] * other.data[col * 4 + k];
                }
            }
        }

        Self { data: result }
    }

    /// Transform a point (w = 1), returning homogeneous coordinates.
    #[must_use]
    pub fn transform_point(&self, p: Vec3) -> [f32; 4] {
        let mut out = [0.0f32; 4];
        for (row, value) in out.iter_mut().enumerate() {
            *value = self.get(row, 0) * p.x
                + self.get(row, 1) * p.y
                + self.get(row, 2) * p.z
                + self.get(row, 3);
        }
        out
    }
}

impl Default for Mat4 {
    fn default() -> Self {
        Self::identity()
    }
}

/// Multi-view capture rig.
///
/// Holds the configured camera parameters; the per-view math reads the
/// configured field of view, never the temporary render FOV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CameraRig {
    /// Focal point in world space.
    pub center: Vec3,
    /// Half-height of the focal plane.
    pub size: f32,
    /// Configured vertical field of view in degrees.
    pub fov: f32,
    /// Near clip distance in front of the focal plane, in multiples of `size`.
    pub near_clip_factor: f32,
    /// Far clip distance behind the focal plane, in multiples of `size`.
    pub far_clip_factor: f32,
    /// Scale applied to the calibration view cone (0..=1).
    pub cone_modifier: f32,
    /// Horizontal frustum shift in degrees.
    pub horizontal_frustum_offset: f32,
    /// Vertical frustum shift in degrees.
    pub vertical_frustum_offset: f32,
    /// Camera-relative target that defines the frustum instead of `fov`.
    pub frustum_target: Option<Vec3>,
    /// Overrides the calibration view cone.
    pub custom_view_cone: Option<f32>,
    /// Overrides the calibration vertical angle.
    pub custom_vertical_angle: Option<f32>,
    /// How per-view offsets are derived.
    pub offset_model: OffsetModel,
}

impl Default for CameraRig {
    fn default() -> Self {
        Self {
            center: Vec3::zero(),
            size: 5.0,
            fov: 14.0,
            near_clip_factor: 1.5,
            far_clip_factor: 4.0,
            cone_modifier: 1.0,
            horizontal_frustum_offset: 0.0,
            vertical_frustum_offset: 0.0,
            frustum_target: None,
            custom_view_cone: None,
            custom_vertical_angle: None,
            offset_model: OffsetModel::default(),
        }
    }
}

/// Closest near clip plane the rig will use.
pub const MIN_NEAR_CLIP: f32 = 0.1;

impl CameraRig {
    /// Check that the rig yields a usable projection.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidRig`] if `size` is not positive, `fov`
    /// is outside (0, 180) degrees, or any parameter is not finite.
    pub fn validate(&self) -> RenderResult<()> {
        if !self.size.is_finite() || self.size <= 0.0 {
            return Err(RenderError::InvalidRig(format!(
                "size must be positive, got {}",
                self.size
            )));
        }
        if !self.fov.is_finite() || self.fov <= 0.0 || self.fov >= 180.0 {
            return Err(RenderError::InvalidRig(format!(
                "fov must be between 0 and 180 degrees, got {}",
                self.fov
            )));
        }
        let scalars = [
            ("nearClipFactor", Some(self.near_clip_factor)),
            ("farClipFactor", Some(self.far_clip_factor)),
            ("coneModifier", Some(self.cone_modifier)),
            ("horizontalFrustumOffset", Some(self.horizontal_frustum_offset)),
            ("verticalFrustumOffset", Some(self.vertical_frustum_offset)),
            ("customViewCone", self.custom_view_cone),
            ("customVerticalAngle", self.custom_vertical_angle),
        ];
        for (name, value) in scalars {
            if let Some(v) = value.filter(|v| !v.is_finite()) {
                return Err(RenderError::InvalidRig(format!("{name} is not finite: {v}")));
            }
        }
        let points = [("center", Some(self.center)), ("frustumTarget", self.frustum_target)];
        for (name, point) in points {
            let bad = point.filter(|p| !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()));
            if let Some(p) = bad {
                return Err(RenderError::InvalidRig(format!(
                    "{name} is not finite: ({}, {}, {})",
                    p.x, p.y, p.z
                )));
            }
        }
        Ok(())
    }

    /// Field of view actually used for the center frustum, in degrees.
    #[must_use]
    pub fn effective_fov(&self) -> f32 {
        match self.frustum_target {
            Some(target) if target.z != 0.0 => {
                2.0 * (self.size / target.z).abs().atan().to_degrees()
            }
            _ => self.fov,
        }
    }

    /// Distance from the camera to the focal plane.
    #[must_use]
    pub fn focal_distance(&self) -> f32 {
        self.size / (self.effective_fov() * 0.5).to_radians().tan()
    }

    /// Near and far clip planes around the focal plane.
    #[must_use]
    pub fn clip_planes(&self) -> (f32, f32) {
        let dist = self.focal_distance();
        let near = (dist - self.size * self.near_clip_factor).max(MIN_NEAR_CLIP);
        let far = (dist + self.size * self.far_clip_factor).max(near);
        (near, far)
    }

    /// Center frustum shift, as a displacement on the focal plane.
    fn frustum_shift(&self) -> ViewOffset {
        if let Some(target) = self.frustum_target {
            return ViewOffset {
                horizontal: target.x,
                vertical: target.y,
            };
        }
        let dist = self.focal_distance();
        ViewOffset {
            horizontal: -dist * self.horizontal_frustum_offset.to_radians().tan(),
            vertical: -dist * self.vertical_frustum_offset.to_radians().tan(),
        }
    }

    /// Center view matrix: looking at `center` from `focal_distance` along +Z.
    #[must_use]
    pub fn center_view(&self) -> Mat4 {
        let eye = self.center.add(&Vec3::back().scale(self.focal_distance()));
        let mut view = Mat4::look_at(eye, self.center, Vec3::up());
        let shift = self.frustum_shift();
        let mut scratch = Mat4::identity();
        apply_view_offset(&mut view, &mut scratch, shift, self.size, 1.0);
        view
    }

    /// Center projection matrix for views of the given aspect ratio.
    #[must_use]
    pub fn center_projection(&self, aspect: f32) -> Mat4 {
        let (near, far) = self.clip_planes();
        let mut projection =
            Mat4::perspective(self.effective_fov().to_radians(), aspect, near, far);
        let mut scratch = Mat4::identity();
        apply_view_offset(&mut scratch, &mut projection, self.frustum_shift(), self.size, aspect);
        projection
    }

    /// Everything the offset calculator needs for one render pass.
    #[must_use]
    pub fn offset_frame(&self, aspect: f32) -> OffsetFrame {
        OffsetFrame {
            base_view: self.center_view(),
            base_projection: self.center_projection(aspect),
            focal_distance: self.focal_distance(),
            size: self.size,
            aspect,
            cone_modifier: self.cone_modifier,
            model: self.offset_model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < EPSILON
    }

    // ===========================================
    // Vec3 Tests
    // ===========================================

    #[test]
    fn test_vec3_length_and_normalize() {
        let v = Vec3::new(3.0, 4.0, 0.0);
        assert!(approx_eq(v.length(), 5.0));
        assert!(approx_eq(v.normalize().length(), 1.0));
        assert!(approx_eq(Vec3::zero().normalize().length(), 0.0));
    }

    #[test]
    fn test_vec3_cross() {
        let z = Vec3::new(1.0, 0.0, 0.0).cross(&Vec3::up());
        assert!(approx_eq(z.z, 1.0));
    }

    // ===========================================
    // Mat4 Tests
    // ===========================================

    #[test]
    fn test_mat4_row_col_access() {
        let mut m = Mat4::identity();
        m.set(0, 3, 2.5);
        m.add_at(1, 2, -1.0);
        assert!(approx_eq(m.data[12], 2.5));
        assert!(approx_eq(m.data[9], -1.0));
        assert!(approx_eq(m.get(0, 3), 2.5));
        assert!(approx_eq(m.get(3, 3), 1.0));
    }

    #[test]
    fn test_mat4_mul_identity() {
        let p = Mat4::perspective(0.5, 1.5, 0.1, 10.0);
        assert_eq!(p.mul(&Mat4::identity()), p);
        assert_eq!(Mat4::identity().mul(&p), p);
    }

    #[test]
    fn test_mat4_perspective() {
        let proj = Mat4::perspective(std::f32::consts::FRAC_PI_4, 1.0, 0.1, 100.0);
        assert!(approx_eq(proj.get(3, 2), -1.0));
    }

    #[test]
    fn test_transform_point() {
        let mut m = Mat4::identity();
        m.set(2, 3, -10.0);
        let p = m.transform_point(Vec3::new(1.0, 2.0, 3.0));
        assert!(approx_eq(p[0], 1.0));
        assert!(approx_eq(p[2], -7.0));
        assert!(approx_eq(p[3], 1.0));
    }

    // ===========================================
    // CameraRig Tests
    // ===========================================

    #[test]
    fn test_focal_distance() {
        let rig = CameraRig {
            size: 1.0,
            fov: 90.0,
            ..CameraRig::default()
        };
        assert!(approx_eq(rig.focal_distance(), 1.0));
    }

    #[test]
    fn test_clip_planes_clamped() {
        let rig = CameraRig {
            size: 1.0,
            fov: 90.0,
            near_clip_factor: 5.0,
            far_clip_factor: -10.0,
            ..CameraRig::default()
        };
        let (near, far) = rig.clip_planes();
        assert!(approx_eq(near, MIN_NEAR_CLIP));
        assert!(approx_eq(far, MIN_NEAR_CLIP));
    }

    #[test]
    fn test_center_view_translates_by_distance() {
        let rig = CameraRig::default();
        let view = rig.center_view();
        let dist = rig.focal_distance();
        assert!(approx_eq(view.get(2, 3), -dist));
        assert!(approx_eq(view.get(0, 3), 0.0));
        assert!(approx_eq(view.get(0, 0), 1.0));
    }

    #[test]
    fn test_horizontal_frustum_offset_shifts_center() {
        let rig = CameraRig {
            horizontal_frustum_offset: 10.0,
            ..CameraRig::default()
        };
        let shift = rig.focal_distance() * 10.0_f32.to_radians().tan();
        assert!((rig.center_view().get(0, 3) - shift).abs() < 1e-4);
        assert!((rig.center_projection(1.6).get(0, 2) - shift / (rig.size * 1.6)).abs() < 1e-4);
    }

    #[test]
    fn test_frustum_target_sets_fov() {
        let rig = CameraRig {
            size: 2.0,
            frustum_target: Some(Vec3::new(0.0, 0.0, -2.0)),
            ..CameraRig::default()
        };
        assert!((rig.effective_fov() - 90.0).abs() < 1e-3);
        assert!((rig.focal_distance() - 2.0).abs() < 1e-4);
    }

    // ===========================================
    // Validation Tests
    // ===========================================

    #[test]
    fn test_default_rig_is_valid() {
        assert!(CameraRig::default().validate().is_ok());
    }

    #[test]
    fn test_rig_validation_rejects_degenerate_values() {
        let cases = [
            CameraRig {
                size: 0.0,
                ..CameraRig::default()
            },
            CameraRig {
                size: -1.0,
                ..CameraRig::default()
            },
            CameraRig {
                size: f32::INFINITY,
                ..CameraRig::default()
            },
            CameraRig {
                fov: f32::NAN,
                ..CameraRig::default()
            },
            CameraRig {
                fov: 0.0,
                ..CameraRig::default()
            },
            CameraRig {
                fov: 180.0,
                ..CameraRig::default()
            },
            CameraRig {
                cone_modifier: f32::NAN,
                ..CameraRig::default()
            },
            CameraRig {
                frustum_target: Some(Vec3::new(0.0, f32::NAN, -2.0)),
                ..CameraRig::default()
            },
        ];
        for rig in cases {
            assert!(
                matches!(rig.validate(), Err(RenderError::InvalidRig(_))),
                "accepted {rig:?}"
            );
        }
    }
}

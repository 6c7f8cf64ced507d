//! Per-view camera offsets.
//!
//! Each view is the center view shifted sideways by `h` on the focal plane.
//! The view matrix moves the camera and the projection is skewed back by the
//! same amount, so the focal plane lands on the same pixels in every view:
//!
//! ```text
//!   view[0][3]       -= h
//!   projection[0][2] -= h / (size * aspect)
//!   view[1][3]       -= v
//!   projection[1][2] -= v / size
//! ```
//!
//! Offsets depend only on the configured focal distance, never on the wide
//! field of view a host may substitute while drawing a view.

use quilt_core::Calibration;
use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult};
use crate::spatial::{CameraRig, Mat4};

/// Field of view (degrees) hosts may draw with to keep shadow frusta from
/// culling geometry near the edges of skewed views.
pub const SHADOW_SAFE_FOV_DEGREES: f32 = 135.0;

/// How the horizontal offset of a view is derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetModel {
    /// `h = lerp * dist * tan(cone)` with `lerp` in `-0.5..=0.5`.
    #[default]
    Sweep,
    /// `h = dist * tan(angle)` with `angle` in `-cone/2..=cone/2`.
    Angle,
}

/// One view to render.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewRenderRequest {
    /// Index of this view (0 to `num_views - 1`).
    pub view_index: u32,
    /// Views in the pass.
    pub num_views: u32,
    /// Total view cone in degrees.
    pub view_cone: f32,
    /// Vertical view angle in degrees.
    pub vertical_angle: f32,
}

impl ViewRenderRequest {
    /// Request view `view_index` of `num_views` using the calibration's
    /// cone and vertical angle, unless the rig overrides them.
    #[must_use]
    pub fn for_view(calibration: &Calibration, rig: &CameraRig, view_index: u32, num_views: u32) -> Self {
        Self {
            view_index,
            num_views,
            view_cone: rig.custom_view_cone.unwrap_or_else(|| calibration.view_cone()),
            vertical_angle: rig
                .custom_vertical_angle
                .unwrap_or_else(|| calibration.vertical_angle()),
        }
    }

    /// Position of this view in the sweep, from -0.5 (first) to 0.5 (last).
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // view counts are tiny
    pub fn lerp(&self) -> f32 {
        if self.num_views <= 1 {
            return 0.0;
        }
        self.view_index as f32 / (self.num_views - 1) as f32 - 0.5
    }

    /// Horizontal angle of this view in degrees, `-cone/2` for the first.
    #[must_use]
    pub fn horizontal_angle(&self) -> f32 {
        if self.num_views <= 1 {
            return 0.0;
        }
        -self.view_cone / 2.0 + (self.lerp() + 0.5) * self.view_cone
    }
}

/// Displacement of a view on the focal plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewOffset {
    /// Sideways shift.
    pub horizontal: f32,
    /// Vertical shift.
    pub vertical: f32,
}

/// Offset of `request` for a camera `focal_distance` from the focal plane.
///
/// `cone_modifier` scales the view cone.
#[must_use]
pub fn view_offset(
    request: &ViewRenderRequest,
    focal_distance: f32,
    cone_modifier: f32,
    model: OffsetModel,
) -> ViewOffset {
    let horizontal = match model {
        OffsetModel::Sweep => {
            let sweep = focal_distance * (request.view_cone * cone_modifier).to_radians().tan();
            request.lerp() * sweep
        }
        OffsetModel::Angle => {
            let angle = request.horizontal_angle() * cone_modifier;
            focal_distance * angle.to_radians().tan()
        }
    };
    ViewOffset {
        horizontal,
        vertical: focal_distance * request.vertical_angle.to_radians().tan(),
    }
}

/// Shift a view/projection pair by `offset` on a focal plane of half-height `size`.
pub fn apply_view_offset(
    view: &mut Mat4,
    projection: &mut Mat4,
    offset: ViewOffset,
    size: f32,
    aspect: f32,
) {
    view.add_at(0, 3, -offset.horizontal);
    projection.add_at(0, 2, -offset.horizontal / (size * aspect));
    view.add_at(1, 3, -offset.vertical);
    projection.add_at(1, 2, -offset.vertical / size);
}

/// The fixed inputs of a render pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetFrame {
    /// Center view matrix.
    pub base_view: Mat4,
    /// Center projection matrix.
    pub base_projection: Mat4,
    /// Camera to focal plane distance.
    pub focal_distance: f32,
    /// Focal plane half-height.
    pub size: f32,
    /// View aspect ratio.
    pub aspect: f32,
    /// View cone scale.
    pub cone_modifier: f32,
    /// Offset formulation.
    pub model: OffsetModel,
}

/// Matrices for one view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    /// View matrix.
    pub view: Mat4,
    /// Projection matrix.
    pub projection: Mat4,
    /// Offset applied to the center view.
    pub offset: ViewOffset,
}

/// Compute the view and projection matrices for `request`.
///
/// # Errors
///
/// Returns [`RenderError::InvalidViewIndex`] if the view index is outside
/// the pass.
pub fn compute_view_transform(
    request: &ViewRenderRequest,
    frame: &OffsetFrame,
) -> RenderResult<ViewTransform> {
    if request.view_index >= request.num_views {
        return Err(RenderError::InvalidViewIndex {
            index: request.view_index,
            num_views: request.num_views,
        });
    }
    let offset = view_offset(request, frame.focal_distance, frame.cone_modifier, frame.model);
    let mut view = frame.base_view;
    let mut projection = frame.base_projection;
    apply_view_offset(&mut view, &mut projection, offset, frame.size, frame.aspect);
    Ok(ViewTransform {
        view,
        projection,
        offset,
    })
}

//! # Saorsa Quilt Renderer
//!
//! Everything between a display calibration and a finished quilt: layout,
//! per-view cameras, compositing and the lenticular shader parameters.
//!
//! ## Pipeline
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌─────────────┐   ┌────────────┐
//! │  Tiling    │──▶│ View offsets │──▶│ Host draws  │──▶│ Compositor │
//! │ (presets,  │   │ (per view    │   │ each view   │   │ (quilt     │
//! │ inference) │   │  matrices)   │   │             │   │  buffer)   │
//! └────────────┘   └──────────────┘   └─────────────┘   └─────┬──────┘
//!        │                                                    │
//!        └──────────────▶ Lenticular uniforms ◀── Calibration │
//!                                 │                           │
//!                                 ▼                           ▼
//!                           display shader  ◀───────────  quilt image
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod holographic;
#[cfg(feature = "images")]
pub mod image;
pub mod inference;
pub mod offset;
pub mod quilt;
pub mod spatial;
pub mod tiling;
pub mod uniforms;

pub use error::{RenderError, RenderResult};
pub use holographic::{
    GradientViewRenderer, HolographicRenderResult, HolographicRenderer, PassStats,
    RenderSettings, ViewContext, ViewInterpolation, ViewRenderer,
};
pub use inference::{
    infer_preset_tiling, infer_tiling, CandidateScore, ReferenceStrategy, TilingInference,
};
pub use offset::{
    compute_view_transform, view_offset, OffsetFrame, OffsetModel, ViewOffset,
    ViewRenderRequest, ViewTransform, SHADOW_SAFE_FOV_DEGREES,
};
pub use quilt::{
    blend, composite_views, copy_view_to_quilt, overlay_view_to_quilt, BlitMode, PixelBuffer,
    QuiltBuffer,
};
pub use spatial::{CameraRig, Mat4, Vec3};
pub use tiling::{resolve_preset, QualityHint, QuiltPreset, Tiling, TilingRequest, ViewRect};
pub use uniforms::{compute_uniforms, LenticularUniforms};

/// Quilt renderer version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Renderer error types.

use quilt_core::CalibrationError;
use thiserror::Error;

/// Result type for renderer operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// Errors that can occur during layout, compositing or rendering.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The tiling would produce zero-sized views.
    #[error("Unsupported tiling: {0}")]
    UnsupportedTiling(String),

    /// The quilt buffer is not allocated for the current tiling.
    #[error("Quilt buffer not ready: {0}")]
    QuiltBufferNotReady(String),

    /// Tiling inference could not separate the best candidates.
    ///
    /// Reported alongside a chosen tiling, never returned as a failure.
    #[error("Layout inference ambiguous: {0}")]
    LayoutInferenceAmbiguous(String),

    /// Camera rig parameters would give a degenerate projection.
    #[error("Invalid camera rig: {0}")]
    InvalidRig(String),

    /// A tiling string could not be parsed.
    #[error("Invalid tiling string: {0}")]
    InvalidTilingString(String),

    /// A view index is outside the tiling.
    #[error("View index {index} out of range for {num_views} views")]
    InvalidViewIndex {
        /// Requested index.
        index: u32,
        /// Views in the tiling.
        num_views: u32,
    },

    /// Calibration error.
    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    /// Resource loading failed.
    #[error("Failed to load resource: {0}")]
    Resource(String),

    /// Rendering frame failed.
    #[error("Frame render failed: {0}")]
    Frame(String),
}

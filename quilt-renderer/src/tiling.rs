//! Quilt layout: how N views are packed into one image.
//!
//! ```text
//!   quilt_width
//!  ┌───────────────────────┐
//!  │       padding_y       │
//!  ├─────┬─────┬─────┬─────┤  ▲
//!  │  28 │  29 │  30 │  31 │  │
//!  ├─────┼─────┼─────┼─────┤  │ rows * view_height
//!  │ ... │     │     │     │  │
//!  ├─────┼─────┼─────┼─────┤  │
//!  │  0  │  1  │  2  │  3  │  │
//!  └─────┴─────┴─────┴─────┘  ▼ ← padding_x on the right
//! ```
//!
//! Views run left to right and rows fill from the bottom of the image up.
//! Per-view sizes come from integer division; whatever is left over is
//! padding. [`Tiling::setup`] recomputes every derived field and must run
//! after the grid or quilt size changes (the constructors do this).

use std::fmt;
use std::str::FromStr;

use quilt_core::Calibration;
use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult};

/// Name given to tilings that do not come from the preset table.
pub const CUSTOM_NAME: &str = "Custom";

/// A destination rectangle in the quilt, in top-down pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewRect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Layout of a quilt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "TilingParams")]
pub struct Tiling {
    name: String,
    columns: u32,
    rows: u32,
    quilt_width: u32,
    quilt_height: u32,
    num_views: u32,
    view_width: u32,
    view_height: u32,
    padding_x: u32,
    padding_y: u32,
    portion_x: f32,
    portion_y: f32,
    aspect: Option<f32>,
    overscan: bool,
}

/// Serialized inputs of a [`Tiling`]; derived fields are always recomputed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TilingParams {
    #[serde(default)]
    name: Option<String>,
    columns: u32,
    rows: u32,
    quilt_width: u32,
    quilt_height: u32,
    #[serde(default)]
    num_views: Option<u32>,
    #[serde(default)]
    aspect: Option<f32>,
    #[serde(default)]
    overscan: bool,
}

impl TryFrom<TilingParams> for Tiling {
    type Error = RenderError;

    fn try_from(params: TilingParams) -> RenderResult<Self> {
        let mut tiling = Self::new(
            params.columns,
            params.rows,
            params.quilt_width,
            params.quilt_height,
        )?
        .with_aspect(params.aspect)?
        .with_overscan(params.overscan);
        if let Some(name) = params.name {
            tiling.name = name;
        }
        match params.num_views {
            Some(n) => tiling.with_num_views(n),
            None => Ok(tiling),
        }
    }
}

impl Tiling {
    /// Build a custom tiling of `columns` x `rows` views over a
    /// `quilt_width` x `quilt_height` image.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::UnsupportedTiling`] if any view would be
    /// zero-sized.
    pub fn new(columns: u32, rows: u32, quilt_width: u32, quilt_height: u32) -> RenderResult<Self> {
        let mut tiling = Self::from_parts(CUSTOM_NAME, columns, rows, quilt_width, quilt_height);
        tiling.setup()?;
        Ok(tiling)
    }

    /// Unchecked constructor for the preset table; call `setup` afterwards.
    pub(crate) fn from_parts(
        name: &str,
        columns: u32,
        rows: u32,
        quilt_width: u32,
        quilt_height: u32,
    ) -> Self {
        Self {
            name: name.to_string(),
            columns,
            rows,
            quilt_width,
            quilt_height,
            num_views: 0,
            view_width: 0,
            view_height: 0,
            padding_x: 0,
            padding_y: 0,
            portion_x: 0.0,
            portion_y: 0.0,
            aspect: None,
            overscan: false,
        }
    }

    /// Recompute view count, view size, padding and used portions.
    ///
    /// Deterministic: running it again on an unchanged grid yields the
    /// same values.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::UnsupportedTiling`] if the grid has no
    /// columns or rows, or if a view would be narrower or shorter than a
    /// pixel.
    pub fn setup(&mut self) -> RenderResult<()> {
        if self.columns == 0 || self.rows == 0 {
            return Err(RenderError::UnsupportedTiling(format!(
                "{}x{} grid has no views",
                self.columns, self.rows
            )));
        }
        if self.quilt_width < self.columns || self.quilt_height < self.rows {
            return Err(RenderError::UnsupportedTiling(format!(
                "{}x{} views do not fit in a {}x{} quilt",
                self.columns, self.rows, self.quilt_width, self.quilt_height
            )));
        }
        self.derive_views();
        Ok(())
    }

    /// Fill the derived fields. The grid must already fit the quilt.
    #[allow(clippy::cast_precision_loss)] // quilt sizes are far below 2^24
    fn derive_views(&mut self) {
        let view_width = self.quilt_width / self.columns;
        let view_height = self.quilt_height / self.rows;
        self.num_views = self.columns * self.rows;
        self.view_width = view_width;
        self.view_height = view_height;
        self.padding_x = self.quilt_width - self.columns * view_width;
        self.padding_y = self.quilt_height - self.rows * view_height;
        self.portion_x = (self.columns * view_width) as f32 / self.quilt_width as f32;
        self.portion_y = (self.rows * view_height) as f32 / self.quilt_height as f32;
    }

    /// Render only the first `num_views` slots of the grid.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::UnsupportedTiling`] if `num_views` is zero or
    /// exceeds the grid capacity.
    pub fn with_num_views(mut self, num_views: u32) -> RenderResult<Self> {
        let capacity = self.columns * self.rows;
        if num_views == 0 || num_views > capacity {
            return Err(RenderError::UnsupportedTiling(format!(
                "{} views requested for a {}-slot grid",
                num_views, capacity
            )));
        }
        self.num_views = num_views;
        Ok(self)
    }

    /// Set the target view aspect; `None` derives it from the calibration.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::UnsupportedTiling`] if `aspect` is not a
    /// positive finite number.
    pub fn with_aspect(mut self, aspect: Option<f32>) -> RenderResult<Self> {
        if let Some(a) = aspect {
            if !a.is_finite() || a <= 0.0 {
                return Err(RenderError::UnsupportedTiling(format!(
                    "view aspect must be positive, got {a}"
                )));
            }
        }
        self.aspect = aspect;
        Ok(self)
    }

    /// Enable or disable overscan.
    #[must_use]
    pub fn with_overscan(mut self, overscan: bool) -> Self {
        self.overscan = overscan;
        self
    }

    /// Same grid over a quilt of a different size, named `Custom CxR`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::UnsupportedTiling`] if the new size leaves a
    /// zero-sized view.
    pub fn resized(&self, quilt_width: u32, quilt_height: u32) -> RenderResult<Self> {
        let name = format!("{} {}x{}", CUSTOM_NAME, self.columns, self.rows);
        let mut tiling =
            Self::from_parts(&name, self.columns, self.rows, quilt_width, quilt_height);
        tiling.setup()?;
        Ok(tiling.with_aspect(self.aspect)?.with_overscan(self.overscan))
    }

    /// Preset or custom name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// View columns.
    #[must_use]
    pub const fn columns(&self) -> u32 {
        self.columns
    }

    /// View rows.
    #[must_use]
    pub const fn rows(&self) -> u32 {
        self.rows
    }

    /// Quilt width in pixels.
    #[must_use]
    pub const fn quilt_width(&self) -> u32 {
        self.quilt_width
    }

    /// Quilt height in pixels.
    #[must_use]
    pub const fn quilt_height(&self) -> u32 {
        self.quilt_height
    }

    /// Number of views rendered into the grid.
    #[must_use]
    pub const fn num_views(&self) -> u32 {
        self.num_views
    }

    /// Width of one view.
    #[must_use]
    pub const fn view_width(&self) -> u32 {
        self.view_width
    }

    /// Height of one view.
    #[must_use]
    pub const fn view_height(&self) -> u32 {
        self.view_height
    }

    /// Unused columns on the right.
    #[must_use]
    pub const fn padding_x(&self) -> u32 {
        self.padding_x
    }

    /// Unused rows at the top.
    #[must_use]
    pub const fn padding_y(&self) -> u32 {
        self.padding_y
    }

    /// Fraction of the quilt width covered by views.
    #[must_use]
    pub const fn portion_x(&self) -> f32 {
        self.portion_x
    }

    /// Fraction of the quilt height covered by views.
    #[must_use]
    pub const fn portion_y(&self) -> f32 {
        self.portion_y
    }

    /// Explicit view aspect, if set.
    #[must_use]
    pub const fn aspect(&self) -> Option<f32> {
        self.aspect
    }

    /// Whether views are overscanned.
    #[must_use]
    pub const fn overscan(&self) -> bool {
        self.overscan
    }

    /// View aspect used for rendering: the explicit aspect, else the display's.
    #[must_use]
    pub fn view_aspect(&self, calibration: &Calibration) -> f32 {
        self.aspect.unwrap_or_else(|| calibration.aspect())
    }

    /// Destination rectangle of view `index`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidViewIndex`] if `index >= num_views`.
    pub fn view_rect(&self, index: u32) -> RenderResult<ViewRect> {
        if index >= self.num_views {
            return Err(RenderError::InvalidViewIndex {
                index,
                num_views: self.num_views,
            });
        }
        let reverse = self.num_views - index - 1;
        Ok(ViewRect {
            x: (index % self.columns) * self.view_width,
            y: (reverse / self.columns) * self.view_height + self.padding_y,
            width: self.view_width,
            height: self.view_height,
        })
    }

    /// Band (row of views, counted from the top of the used area) holding `index`.
    pub(crate) const fn band_of(&self, index: u32) -> u32 {
        (self.num_views - index - 1) / self.columns
    }

    fn with_preset_name(mut self) -> Self {
        if let Some(preset) = QuiltPreset::ALL.iter().find(|p| {
            let t = p.tiling();
            t.columns == self.columns
                && t.rows == self.rows
                && t.quilt_width == self.quilt_width
                && t.quilt_height == self.quilt_height
        }) {
            self.name = preset.name().to_string();
        }
        self
    }
}

impl Default for Tiling {
    fn default() -> Self {
        QuiltPreset::Standard.tiling()
    }
}

impl fmt::Display for Tiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tx{:02}ty{:02}qw{:04}qh{:04}",
            self.columns, self.rows, self.quilt_width, self.quilt_height
        )
    }
}

/// Read the fixed-width number that follows `marker` anywhere in `s`.
fn field_after(s: &str, marker: &str, digits: usize) -> RenderResult<u32> {
    let start = s
        .find(marker)
        .map(|at| at + marker.len())
        .ok_or_else(|| RenderError::InvalidTilingString(format!("missing '{marker}' in {s:?}")))?;
    let value = s
        .get(start..start + digits)
        .ok_or_else(|| RenderError::InvalidTilingString(format!("truncated '{marker}' in {s:?}")))?;
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RenderError::InvalidTilingString(format!(
            "'{marker}' is not followed by {digits} digits in {s:?}"
        )));
    }
    value
        .parse()
        .map_err(|e| RenderError::InvalidTilingString(format!("{marker}: {e}")))
}

impl FromStr for Tiling {
    type Err = RenderError;

    /// Parse a `tx04ty08qw2048qh2048` tag, which may be embedded in a
    /// longer string such as a file name.
    fn from_str(s: &str) -> RenderResult<Self> {
        let columns = field_after(s, "tx", 2)?;
        let rows = field_after(s, "ty", 2)?;
        let quilt_width = field_after(s, "qw", 4)?;
        let quilt_height = field_after(s, "qh", 4)?;
        Ok(Self::new(columns, rows, quilt_width, quilt_height)?.with_preset_name())
    }
}

/// Built-in quilt layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuiltPreset {
    /// 4x8 views at 2048x2048.
    Standard,
    /// 5x9 views at 4096x4096.
    HighRes,
    /// 6x10 views at 4096x4096.
    HighView,
    /// 4x6 views at 1600x1600.
    ExtraLow,
    /// 8x6 views at 3360x3360, for portrait displays.
    Portrait,
    /// 5x10 views at 4096x4096, for portrait displays.
    PortraitTall,
}

impl QuiltPreset {
    /// Every preset, in table order.
    pub const ALL: [Self; 6] = [
        Self::Standard,
        Self::HighRes,
        Self::HighView,
        Self::ExtraLow,
        Self::Portrait,
        Self::PortraitTall,
    ];

    /// Display name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Standard => "Standard",
            Self::HighRes => "High Res",
            Self::HighView => "High View",
            Self::ExtraLow => "Extra Low",
            Self::Portrait => "Portrait",
            Self::PortraitTall => "Portrait Tall",
        }
    }

    /// Command-line identifier.
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::HighRes => "high-res",
            Self::HighView => "high-view",
            Self::ExtraLow => "extra-low",
            Self::Portrait => "portrait",
            Self::PortraitTall => "portrait-tall",
        }
    }

    const fn grid(self) -> (u32, u32, u32) {
        match self {
            Self::Standard => (4, 8, 2048),
            Self::HighRes => (5, 9, 4096),
            Self::HighView => (6, 10, 4096),
            Self::ExtraLow => (4, 6, 1600),
            Self::Portrait => (8, 6, 3360),
            Self::PortraitTall => (5, 10, 4096),
        }
    }

    /// The preset's tiling.
    #[must_use]
    pub fn tiling(self) -> Tiling {
        let (columns, rows, size) = self.grid();
        let mut tiling = Tiling::from_parts(self.name(), columns, rows, size, size);
        tiling.derive_views();
        tiling
    }
}

// Preset tilings skip the runtime fit check, so every grid is checked here.
const _: () = {
    let mut i = 0;
    while i < QuiltPreset::ALL.len() {
        let (columns, rows, size) = QuiltPreset::ALL[i].grid();
        assert!(columns > 0 && rows > 0 && size >= columns && size >= rows);
        i += 1;
    }
};

impl FromStr for QuiltPreset {
    type Err = RenderError;

    fn from_str(s: &str) -> RenderResult<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace([' ', '_'], "-");
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.id() == wanted)
            .ok_or_else(|| RenderError::UnsupportedTiling(format!("unknown preset {s:?}")))
    }
}

/// Caller-supplied quality level used to pick an automatic preset.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum QualityHint {
    /// Fewest pixels.
    Low,
    /// The standard layout.
    #[default]
    Medium,
    /// Most pixels.
    High,
}

impl QualityHint {
    /// Map a host level-of-detail bias onto a quality level.
    #[must_use]
    pub fn from_lod_bias(bias: f32) -> Self {
        if bias < 0.5 {
            Self::Low
        } else if bias < 1.0 {
            Self::Medium
        } else {
            Self::High
        }
    }
}

/// How the host asks for a layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TilingRequest {
    /// A named preset.
    Preset(QuiltPreset),
    /// Let the display and quality hint decide.
    #[default]
    Automatic,
    /// An explicit layout.
    Custom(Tiling),
}

/// Resolve a layout request against the target display.
///
/// `Automatic` picks the portrait preset for portrait displays, otherwise
/// Extra Low, Standard or High Res by quality.
#[must_use]
pub fn resolve_preset(
    request: &TilingRequest,
    calibration: &Calibration,
    quality: QualityHint,
) -> Tiling {
    let tiling = match request {
        TilingRequest::Preset(preset) => preset.tiling(),
        TilingRequest::Custom(tiling) => tiling.clone(),
        TilingRequest::Automatic => {
            let preset = if calibration.is_portrait() {
                QuiltPreset::Portrait
            } else {
                match quality {
                    QualityHint::Low => QuiltPreset::ExtraLow,
                    QualityHint::Medium => QuiltPreset::Standard,
                    QualityHint::High => QuiltPreset::HighRes,
                }
            };
            preset.tiling()
        }
    };
    tracing::debug!(
        "Resolved {:?} to {} ({})",
        request,
        tiling.name(),
        tiling
    );
    tiling
}

//! Calibration model for a single lenticular display.
//!
//! A [`Calibration`] is an immutable, validated value. It is built from a
//! [`CalibrationParams`] (plain public fields, serde friendly) and can only be
//! obtained through [`Calibration::new`], so every calibration in circulation
//! satisfies the optical invariants the shader mapping relies on:
//!
//! - screen width and height are non-zero
//! - `pitch`, `aspect` and `dpi` are strictly positive
//! - `view_cone` is non-negative
//! - `slope` is non-zero
//! - every float is finite
//!
//! Replacing a calibration means building a new one; there is no in-place
//! mutation.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CalibrationError, CalibrationResult};
use crate::legacy::LegacyConfig;

/// Raw calibration values, prior to validation.
///
/// Defaults match the factory values of the 2560x1600 panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CalibrationParams {
    /// Display width in pixels.
    pub screen_width: u32,
    /// Display height in pixels.
    pub screen_height: u32,
    /// Display pixel density.
    pub dpi: f32,
    /// Lenticular pitch (lenses per inch).
    pub pitch: f32,
    /// Lens slope.
    pub slope: f32,
    /// Lens center offset.
    pub center: f32,
    /// Total view cone in degrees.
    pub view_cone: f32,
    /// Vertical view angle in degrees.
    pub vertical_angle: f32,
    /// Display aspect ratio (width / height).
    pub aspect: f32,
    /// Subpixel fringe correction.
    pub fringe: f32,
    /// Subpixel size reported by the calibration service, if any.
    pub subpixel_size: Option<f32>,
    /// Subpixels are ordered BGR instead of RGB.
    pub flip_subpixel: bool,
    /// Views are presented in reverse order.
    pub invert_view: bool,
    /// Mirror the output horizontally.
    pub flip_x: bool,
    /// Mirror the output vertically.
    pub flip_y: bool,
    /// Device serial.
    pub serial: String,
    /// Human readable device name.
    pub name: String,
    /// Host display index this calibration belongs to.
    pub display_index: i32,
    /// Display origin X in desktop coordinates.
    pub x_position: i32,
    /// Display origin Y in desktop coordinates.
    pub y_position: i32,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            screen_width: 2560,
            screen_height: 1600,
            dpi: 338.0,
            pitch: 49.91,
            slope: 5.8,
            center: 0.0,
            view_cone: 40.0,
            vertical_angle: 0.0,
            aspect: 1.6,
            fringe: 0.0,
            subpixel_size: None,
            flip_subpixel: false,
            invert_view: false,
            flip_x: false,
            flip_y: false,
            serial: "00000".to_string(),
            name: String::new(),
            display_index: 0,
            x_position: 0,
            y_position: 0,
        }
    }
}

impl CalibrationParams {
    /// Check every invariant a [`Calibration`] guarantees.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError::InvalidCalibration`] naming the first
    /// offending field.
    #[allow(clippy::float_cmp)]
    pub fn validate(&self) -> CalibrationResult<()> {
        let floats = [
            ("dpi", self.dpi),
            ("pitch", self.pitch),
            ("slope", self.slope),
            ("center", self.center),
            ("viewCone", self.view_cone),
            ("verticalAngle", self.vertical_angle),
            ("aspect", self.aspect),
            ("fringe", self.fringe),
        ];
        if let Some((name, value)) = floats.iter().find(|(_, v)| !v.is_finite()) {
            return Err(invalid(format!("{name} must be finite, got {value}")));
        }

        if self.screen_width == 0 || self.screen_height == 0 {
            return Err(invalid(format!(
                "screen size must be positive, got {}x{}",
                self.screen_width, self.screen_height
            )));
        }
        if self.pitch <= 0.0 {
            return Err(invalid(format!("pitch must be positive, got {}", self.pitch)));
        }
        if self.aspect <= 0.0 {
            return Err(invalid(format!("aspect must be positive, got {}", self.aspect)));
        }
        if self.dpi <= 0.0 {
            return Err(invalid(format!("dpi must be positive, got {}", self.dpi)));
        }
        if self.view_cone < 0.0 {
            return Err(invalid(format!(
                "viewCone must be non-negative, got {}",
                self.view_cone
            )));
        }
        if self.slope == 0.0 {
            return Err(invalid("slope must be non-zero".to_string()));
        }
        if let Some(subp) = self.subpixel_size {
            if !subp.is_finite() || subp <= 0.0 {
                return Err(invalid(format!("subpixelSize must be positive, got {subp}")));
            }
        }
        Ok(())
    }
}

fn invalid(message: String) -> CalibrationError {
    CalibrationError::InvalidCalibration(message)
}

/// Validated optical profile of one display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CalibrationParams", into = "CalibrationParams")]
pub struct Calibration {
    params: CalibrationParams,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            params: CalibrationParams::default(),
        }
    }
}

impl TryFrom<CalibrationParams> for Calibration {
    type Error = CalibrationError;

    fn try_from(params: CalibrationParams) -> CalibrationResult<Self> {
        Self::new(params)
    }
}

impl From<Calibration> for CalibrationParams {
    fn from(calibration: Calibration) -> Self {
        calibration.params
    }
}

impl Calibration {
    /// Validate `params` and wrap them.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError::InvalidCalibration`] if any invariant is violated.
    pub fn new(params: CalibrationParams) -> CalibrationResult<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    /// All values as plain fields.
    #[must_use]
    pub const fn params(&self) -> &CalibrationParams {
        &self.params
    }

    /// Unwrap into the plain values, e.g. to derive a modified calibration.
    #[must_use]
    pub fn into_params(self) -> CalibrationParams {
        self.params
    }

    /// Display width in pixels.
    #[must_use]
    pub const fn screen_width(&self) -> u32 {
        self.params.screen_width
    }

    /// Display height in pixels.
    #[must_use]
    pub const fn screen_height(&self) -> u32 {
        self.params.screen_height
    }

    /// Display pixel density.
    #[must_use]
    pub const fn dpi(&self) -> f32 {
        self.params.dpi
    }

    /// Lenticular pitch.
    #[must_use]
    pub const fn pitch(&self) -> f32 {
        self.params.pitch
    }

    /// Lens slope.
    #[must_use]
    pub const fn slope(&self) -> f32 {
        self.params.slope
    }

    /// Lens center offset.
    #[must_use]
    pub const fn center(&self) -> f32 {
        self.params.center
    }

    /// View cone in degrees.
    #[must_use]
    pub const fn view_cone(&self) -> f32 {
        self.params.view_cone
    }

    /// Vertical view angle in degrees.
    #[must_use]
    pub const fn vertical_angle(&self) -> f32 {
        self.params.vertical_angle
    }

    /// Display aspect ratio.
    #[must_use]
    pub const fn aspect(&self) -> f32 {
        self.params.aspect
    }

    /// Subpixel fringe correction.
    #[must_use]
    pub const fn fringe(&self) -> f32 {
        self.params.fringe
    }

    /// Service-supplied subpixel size, if any.
    #[must_use]
    pub const fn subpixel_size(&self) -> Option<f32> {
        self.params.subpixel_size
    }

    /// Subpixels are BGR ordered.
    #[must_use]
    pub const fn flip_subpixel(&self) -> bool {
        self.params.flip_subpixel
    }

    /// Views are presented in reverse order.
    #[must_use]
    pub const fn invert_view(&self) -> bool {
        self.params.invert_view
    }

    /// Output is mirrored horizontally.
    #[must_use]
    pub const fn flip_x(&self) -> bool {
        self.params.flip_x
    }

    /// Output is mirrored vertically.
    #[must_use]
    pub const fn flip_y(&self) -> bool {
        self.params.flip_y
    }

    /// Device serial.
    #[must_use]
    pub fn serial(&self) -> &str {
        &self.params.serial
    }

    /// Host display index.
    #[must_use]
    pub const fn display_index(&self) -> i32 {
        self.params.display_index
    }

    /// Display origin in desktop coordinates.
    #[must_use]
    pub const fn position(&self) -> (i32, i32) {
        (self.params.x_position, self.params.y_position)
    }

    /// Whether the display is taller than it is wide.
    #[must_use]
    pub fn is_portrait(&self) -> bool {
        self.params.aspect < 1.0
    }

    /// Parse calibration JSON in either the native or the legacy `visual.json` shape.
    ///
    /// Text without both `{` and `}` is treated as an empty file.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError::StorageEmpty`] for empty text,
    /// [`CalibrationError::Serialization`] for malformed JSON and
    /// [`CalibrationError::InvalidCalibration`] for out-of-range values.
    pub fn from_json_str(text: &str) -> CalibrationResult<Self> {
        if !text.contains('{') || !text.contains('}') {
            return Err(CalibrationError::StorageEmpty);
        }
        let value: serde_json::Value = serde_json::from_str(text)?;
        if LegacyConfig::is_legacy_json(&value) {
            tracing::debug!("Parsing legacy visual config");
            return LegacyConfig::from_json_value(&value)?.to_calibration();
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Serialize in the native camelCase shape.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_string(&self) -> CalibrationResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a calibration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not hold a valid calibration.
    pub fn load(path: impl AsRef<Path>) -> CalibrationResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let calibration = Self::from_json_str(&text)?;
        tracing::info!(
            "Calibration loaded from {}: {}x{} serial {}",
            path.display(),
            calibration.screen_width(),
            calibration.screen_height(),
            calibration.serial()
        );
        Ok(calibration)
    }

    /// Write the calibration as native JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> CalibrationResult<()> {
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }
}

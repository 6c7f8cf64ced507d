//! Legacy `visual.json` calibration format.
//!
//! Older displays ship their calibration as a flat set of clamped values,
//! stored either as JSON (`{"pitch": {"value": 49.91}, ...}`) or as a packed
//! little-endian record. Both encodings are driven by [`LEGACY_FIELDS`], one
//! ordered table of `(name, kind, default, min, max)`:
//!
//! ```text
//! offset  field           kind
//! ------  --------------  -----
//!  0      pitch           f32
//!  4      slope           f32
//!  8      center          f32
//! 12      viewCone        f32
//! 16      invView         i16
//! 18      verticalAngle   f32
//! 22      DPI             i16
//! 24      screenW         i16
//! 26      screenH         i16
//! 28      flipImageX      i16
//! 30      flipImageY      i16
//! 32      flipSubp        i16
//! ------
//! 34 bytes
//! ```

use serde_json::{Map, Number, Value};

use crate::calibration::{Calibration, CalibrationParams};
use crate::error::{CalibrationError, CalibrationResult};

/// Storage type of a legacy field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// 32-bit float.
    Float,
    /// 16-bit signed integer, values are rounded.
    Int16,
}

impl FieldKind {
    /// Encoded width in bytes.
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::Float => 4,
            Self::Int16 => 2,
        }
    }
}

/// One entry of the legacy field table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegacyField {
    /// JSON key.
    pub name: &'static str,
    /// Display label.
    pub label: &'static str,
    /// Storage type.
    pub kind: FieldKind,
    /// Value used when the field is missing or not a number.
    pub default: f32,
    /// Inclusive lower bound.
    pub min: f32,
    /// Inclusive upper bound.
    pub max: f32,
}

impl LegacyField {
    const fn float(name: &'static str, label: &'static str, default: f32, min: f32, max: f32) -> Self {
        Self {
            name,
            label,
            kind: FieldKind::Float,
            default,
            min,
            max,
        }
    }

    const fn int(name: &'static str, label: &'static str, default: f32, min: f32, max: f32) -> Self {
        Self {
            name,
            label,
            kind: FieldKind::Int16,
            default,
            min,
            max,
        }
    }

    /// Round (integer fields) and clamp a raw value into range.
    #[must_use]
    pub fn sanitize(&self, value: f32) -> f32 {
        if !value.is_finite() {
            return self.default;
        }
        let value = match self.kind {
            FieldKind::Float => value,
            FieldKind::Int16 => value.round_ties_even(),
        };
        value.clamp(self.min, self.max)
    }
}

/// Ordered legacy field table.
pub const LEGACY_FIELDS: [LegacyField; 12] = [
    LegacyField::float("pitch", "Pitch", 49.91, 1.0, 200.0),
    LegacyField::float("slope", "Slope", 5.8, -30.0, 30.0),
    LegacyField::float("center", "Center", 0.0, -1.0, 1.0),
    LegacyField::float("viewCone", "View Cone", 40.0, 0.0, 180.0),
    LegacyField::int("invView", "View Inversion", 0.0, 0.0, 1.0),
    LegacyField::float("verticalAngle", "Vert Angle", 0.0, -20.0, 20.0),
    LegacyField::int("DPI", "DPI", 338.0, 1.0, 1000.0),
    LegacyField::int("screenW", "Screen Width", 2560.0, 640.0, 6400.0),
    LegacyField::int("screenH", "Screen Height", 1600.0, 480.0, 4800.0),
    LegacyField::int("flipImageX", "Flip Image X", 0.0, 0.0, 1.0),
    LegacyField::int("flipImageY", "Flip Image Y", 0.0, 0.0, 1.0),
    LegacyField::int("flipSubp", "Flip Subpixels", 0.0, 0.0, 1.0),
];

const PITCH: usize = 0;
const SLOPE: usize = 1;
const CENTER: usize = 2;
const VIEW_CONE: usize = 3;
const INV_VIEW: usize = 4;
const VERTICAL_ANGLE: usize = 5;
const DPI: usize = 6;
const SCREEN_W: usize = 7;
const SCREEN_H: usize = 8;
const FLIP_X: usize = 9;
const FLIP_Y: usize = 10;
const FLIP_SUBP: usize = 11;

/// Length of the packed binary record.
pub const RECORD_LEN: usize = record_len();

const fn record_len() -> usize {
    let mut len = 0;
    let mut i = 0;
    while i < LEGACY_FIELDS.len() {
        len += LEGACY_FIELDS[i].kind.width();
        i += 1;
    }
    len
}

/// Version string written into new legacy files.
pub const LEGACY_CONFIG_VERSION: &str = "1.0";

/// A legacy visual config: version, serial and one clamped value per field.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyConfig {
    /// Format version.
    pub config_version: String,
    /// Device serial.
    pub serial: String,
    values: [f32; LEGACY_FIELDS.len()],
}

impl Default for LegacyConfig {
    fn default() -> Self {
        let mut values = [0.0; LEGACY_FIELDS.len()];
        for (value, field) in values.iter_mut().zip(LEGACY_FIELDS.iter()) {
            *value = field.default;
        }
        Self {
            config_version: LEGACY_CONFIG_VERSION.to_string(),
            serial: "00000".to_string(),
            values,
        }
    }
}

impl LegacyConfig {
    /// Look up a field value by JSON key.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f32> {
        field_index(name).map(|i| self.values[i])
    }

    /// Set a field by JSON key, returning the stored (rounded and clamped) value.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError::InvalidCalibration`] for an unknown key.
    pub fn set(&mut self, name: &str, value: f32) -> CalibrationResult<f32> {
        let index = field_index(name).ok_or_else(|| {
            CalibrationError::InvalidCalibration(format!("unknown legacy field: {name}"))
        })?;
        Ok(self.set_index(index, value))
    }

    fn set_index(&mut self, index: usize, value: f32) -> f32 {
        let stored = LEGACY_FIELDS[index].sanitize(value);
        self.values[index] = stored;
        stored
    }

    /// Iterate `(field, value)` pairs in table order.
    pub fn fields(&self) -> impl Iterator<Item = (&'static LegacyField, f32)> + '_ {
        LEGACY_FIELDS.iter().zip(self.values.iter().copied())
    }

    /// Whether a JSON document uses the legacy `{"value": ..}` layout.
    #[must_use]
    pub fn is_legacy_json(value: &Value) -> bool {
        let Some(object) = value.as_object() else {
            return false;
        };
        object.contains_key("configVersion")
            || LEGACY_FIELDS
                .iter()
                .any(|field| object.get(field.name).is_some_and(Value::is_object))
    }

    /// Parse legacy JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError::StorageEmpty`] for text without braces and a
    /// serialization error for malformed JSON.
    pub fn from_json_str(text: &str) -> CalibrationResult<Self> {
        if !text.contains('{') || !text.contains('}') {
            return Err(CalibrationError::StorageEmpty);
        }
        let value: Value = serde_json::from_str(text)?;
        Self::from_json_value(&value)
    }

    /// Build from a parsed legacy JSON document.
    ///
    /// Missing or non-numeric fields keep their defaults, every value is
    /// rounded and clamped, and the view cone is made non-negative.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError::InvalidCalibration`] if the document is not an object.
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_json_value(value: &Value) -> CalibrationResult<Self> {
        let object = value.as_object().ok_or_else(|| {
            CalibrationError::InvalidCalibration("legacy config must be a JSON object".to_string())
        })?;

        let mut config = Self::default();
        if let Some(version) = object.get("configVersion").and_then(Value::as_str) {
            config.config_version = version.to_string();
        }
        if let Some(serial) = object.get("serial").and_then(Value::as_str) {
            config.serial = serial.to_string();
        }

        for (index, field) in LEGACY_FIELDS.iter().enumerate() {
            let raw = match object.get(field.name) {
                Some(Value::Object(inner)) => inner.get("value").and_then(Value::as_f64),
                Some(other) => other.as_f64(),
                None => None,
            };
            if let Some(raw) = raw {
                let raw = raw as f32;
                let raw = if index == VIEW_CONE { raw.abs() } else { raw };
                config.set_index(index, raw);
            }
        }
        Ok(config)
    }

    /// Encode as legacy JSON, each field wrapped as `{"value": x}`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_string(&self) -> CalibrationResult<String> {
        let mut object = Map::new();
        object.insert(
            "configVersion".to_string(),
            Value::String(self.config_version.clone()),
        );
        object.insert("serial".to_string(), Value::String(self.serial.clone()));
        for (field, value) in self.fields() {
            let mut inner = Map::new();
            inner.insert("value".to_string(), json_number(field.kind, value));
            object.insert(field.name.to_string(), Value::Object(inner));
        }
        Ok(serde_json::to_string(&Value::Object(object))?)
    }

    /// Pack into the little-endian binary record.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_record(&self) -> [u8; RECORD_LEN] {
        let mut record = [0u8; RECORD_LEN];
        let mut offset = 0;
        for (field, value) in self.fields() {
            match field.kind {
                FieldKind::Float => record[offset..offset + 4].copy_from_slice(&value.to_le_bytes()),
                // Sanitized int fields are whole numbers well inside i16.
                FieldKind::Int16 => {
                    record[offset..offset + 2].copy_from_slice(&(value as i16).to_le_bytes());
                }
            }
            offset += field.kind.width();
        }
        record
    }

    /// Unpack a binary record. Values are clamped as on every other path.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError::RecordLength`] if `bytes` is not exactly [`RECORD_LEN`] long.
    pub fn from_record(bytes: &[u8]) -> CalibrationResult<Self> {
        if bytes.len() != RECORD_LEN {
            return Err(CalibrationError::RecordLength {
                expected: RECORD_LEN,
                actual: bytes.len(),
            });
        }
        let mut config = Self::default();
        let mut offset = 0;
        for (index, field) in LEGACY_FIELDS.iter().enumerate() {
            let value = match field.kind {
                FieldKind::Float => f32::from_le_bytes([
                    bytes[offset],
                    bytes[offset + 1],
                    bytes[offset + 2],
                    bytes[offset + 3],
                ]),
                FieldKind::Int16 => f32::from(i16::from_le_bytes([bytes[offset], bytes[offset + 1]])),
            };
            config.set_index(index, value);
            offset += field.kind.width();
        }
        Ok(config)
    }

    /// Convert to a validated [`Calibration`]; aspect is derived from the screen size.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError::InvalidCalibration`] if the values do not form a valid calibration.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_calibration(&self) -> CalibrationResult<Calibration> {
        let v = &self.values;
        let screen_width = v[SCREEN_W] as u32;
        let screen_height = v[SCREEN_H] as u32;
        #[allow(clippy::cast_precision_loss)] // Screen sizes are far below 2^24
        let aspect = screen_width as f32 / screen_height as f32;

        Calibration::new(CalibrationParams {
            screen_width,
            screen_height,
            dpi: v[DPI],
            pitch: v[PITCH],
            slope: v[SLOPE],
            center: v[CENTER],
            view_cone: v[VIEW_CONE],
            vertical_angle: v[VERTICAL_ANGLE],
            aspect,
            invert_view: v[INV_VIEW] >= 0.5,
            flip_x: v[FLIP_X] >= 0.5,
            flip_y: v[FLIP_Y] >= 0.5,
            flip_subpixel: v[FLIP_SUBP] >= 0.5,
            serial: self.serial.clone(),
            ..CalibrationParams::default()
        })
    }

    /// Capture a calibration in legacy form. Out-of-range values are clamped.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_calibration(calibration: &Calibration) -> Self {
        let mut config = Self {
            serial: calibration.serial().to_string(),
            ..Self::default()
        };
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        config.set_index(PITCH, calibration.pitch());
        config.set_index(SLOPE, calibration.slope());
        config.set_index(CENTER, calibration.center());
        config.set_index(VIEW_CONE, calibration.view_cone());
        config.set_index(INV_VIEW, flag(calibration.invert_view()));
        config.set_index(VERTICAL_ANGLE, calibration.vertical_angle());
        config.set_index(DPI, calibration.dpi());
        config.set_index(SCREEN_W, calibration.screen_width() as f32);
        config.set_index(SCREEN_H, calibration.screen_height() as f32);
        config.set_index(FLIP_X, flag(calibration.flip_x()));
        config.set_index(FLIP_Y, flag(calibration.flip_y()));
        config.set_index(FLIP_SUBP, flag(calibration.flip_subpixel()));
        config
    }
}

fn field_index(name: &str) -> Option<usize> {
    LEGACY_FIELDS.iter().position(|field| field.name == name)
}

/// JSON number for a field value, using the shortest decimal form of the f32.
#[allow(clippy::cast_possible_truncation)]
fn json_number(kind: FieldKind, value: f32) -> Value {
    match kind {
        FieldKind::Int16 => Value::from(value as i64),
        FieldKind::Float => value
            .to_string()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map_or(Value::Null, Value::Number),
    }
}

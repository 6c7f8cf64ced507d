//! Calibration providers and display selection.
//!
//! A provider reports the calibrations it knows about (a service may know
//! several connected displays, a file or flash device knows one). The host
//! then picks the calibration for its target display with
//! [`select_calibration`], or lets [`resolve_calibration`] do both steps and
//! fall back to the default profile on failure.

use std::path::PathBuf;

use crate::calibration::Calibration;
use crate::eeprom::{FlashStorage, FlashTransport};
use crate::error::CalibrationResult;

/// A source of display calibrations.
pub trait CalibrationProvider {
    /// Report every calibration this provider knows.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying source cannot be read.
    fn calibrations(&mut self) -> CalibrationResult<Vec<Calibration>>;
}

/// Provider over an already-resolved list.
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    calibrations: Vec<Calibration>,
}

impl StaticProvider {
    /// Wrap a list of calibrations.
    #[must_use]
    pub fn new(calibrations: Vec<Calibration>) -> Self {
        Self { calibrations }
    }
}

impl CalibrationProvider for StaticProvider {
    fn calibrations(&mut self) -> CalibrationResult<Vec<Calibration>> {
        Ok(self.calibrations.clone())
    }
}

/// Provider reading one calibration JSON file (native or legacy shape).
#[derive(Debug, Clone)]
pub struct FileProvider {
    path: PathBuf,
}

impl FileProvider {
    /// Read from `path` on every request.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CalibrationProvider for FileProvider {
    fn calibrations(&mut self) -> CalibrationResult<Vec<Calibration>> {
        Ok(vec![Calibration::load(&self.path)?])
    }
}

impl<T: FlashTransport> CalibrationProvider for FlashStorage<T> {
    fn calibrations(&mut self) -> CalibrationResult<Vec<Calibration>> {
        Ok(vec![self.load_config()?.to_calibration()?])
    }
}

/// Pick the calibration for `target_display`.
///
/// Prefers an exact `display_index` match, then the first reported
/// calibration, then the default profile.
#[must_use]
pub fn select_calibration(calibrations: &[Calibration], target_display: i32) -> Calibration {
    if let Some(found) = calibrations
        .iter()
        .find(|cal| cal.display_index() == target_display)
    {
        return found.clone();
    }
    if let Some(first) = calibrations.first() {
        tracing::warn!(
            "No calibration for display {}, using display {}",
            target_display,
            first.display_index()
        );
        return first.clone();
    }
    tracing::warn!("No calibration reported, using default calibration");
    Calibration::default()
}

/// Query `provider` and select the calibration for `target_display`.
///
/// Provider failures are logged and resolve to the default calibration.
pub fn resolve_calibration(
    provider: &mut dyn CalibrationProvider,
    target_display: i32,
) -> Calibration {
    match provider.calibrations() {
        Ok(list) => select_calibration(&list, target_display),
        Err(e) => {
            tracing::warn!("Calibration provider failed, using default: {}", e);
            Calibration::default()
        }
    }
}

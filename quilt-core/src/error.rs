//! Error types for calibration operations.

use thiserror::Error;

/// Result type for calibration operations.
pub type CalibrationResult<T> = Result<T, CalibrationError>;

/// Errors that can occur while building, loading or transporting a calibration.
#[derive(Debug, Error)]
pub enum CalibrationError {
    /// A calibration field is malformed or out of range.
    #[error("Invalid calibration: {0}")]
    InvalidCalibration(String),

    /// Calibration JSON could not be parsed or written.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Reading or writing a calibration file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The storage holds no calibration.
    #[error("Calibration storage is empty")]
    StorageEmpty,

    /// A binary calibration record has the wrong length.
    #[error("Calibration record length mismatch: expected {expected} bytes, got {actual}")]
    RecordLength {
        /// Expected record length in bytes.
        expected: usize,
        /// Actual record length in bytes.
        actual: usize,
    },

    /// The payload does not fit in flash storage.
    #[error("Payload of {len} bytes exceeds flash capacity of {max} bytes")]
    PayloadTooLarge {
        /// Payload length including the length prefix.
        len: usize,
        /// Maximum storable bytes.
        max: usize,
    },

    /// A written flash page was rejected by its checksum.
    #[error("Flash page {page} failed CRC check")]
    PageCrc {
        /// Page address.
        page: u16,
    },

    /// The flash transport reported a failure.
    #[error("Transport error: {0}")]
    Transport(String),
}

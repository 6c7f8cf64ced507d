//! # Saorsa Quilt Core
//!
//! Calibration model for lenticular multi-view displays.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                   quilt-core                     │
//! ├──────────────────────────────────────────────────┤
//! │  Calibration        │  Legacy visual config      │
//! │  - validated values │  - field table + clamping  │
//! │  - native JSON      │  - {"value": x} JSON       │
//! │                     │  - 34-byte binary record   │
//! ├──────────────────────────────────────────────────┤
//! │  Flash storage      │  Providers                 │
//! │  - 64-byte pages    │  - file / flash / static   │
//! │  - CRC-7 writes     │  - display selection       │
//! └──────────────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod calibration;
pub mod eeprom;
pub mod error;
pub mod legacy;
pub mod provider;

pub use calibration::{Calibration, CalibrationParams};
pub use eeprom::{FlashStorage, FlashTransport, MemoryFlash};
pub use error::{CalibrationError, CalibrationResult};
pub use legacy::{FieldKind, LegacyConfig, LegacyField, LEGACY_FIELDS, RECORD_LEN};
pub use provider::{
    resolve_calibration, select_calibration, CalibrationProvider, FileProvider, StaticProvider,
};

/// Quilt core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

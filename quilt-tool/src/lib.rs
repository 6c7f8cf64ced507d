//! # Saorsa Quilt Tool
//!
//! Command-line host for the quilt libraries.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p quilt-tool -- --calibration visual.json uniforms
//! cargo run -p quilt-tool -- --preset high-res render --output-dir shots
//! cargo run -p quilt-tool -- infer shots/quilt_tx05ty09qw4096qh4096_000.png
//! cargo run -p quilt-tool -- flash encode --output flash.bin
//! ```
//!
//! ## Architecture
//!
//! - `CliArgs` - Command-line arguments parsed with clap
//! - `ToolConfig` - Calibration source, display and layout choice shared by every command
//! - `commands` - One function per subcommand, each returning the text to print

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]

pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use quilt_renderer::{QualityHint, ViewInterpolation};
use serde::de::DeserializeOwned;

/// Command-line arguments for quilt-tool.
#[derive(Debug, Clone, Parser)]
#[command(name = "quilt-tool")]
#[command(about = "Saorsa Quilt calibration and quilt utilities")]
#[command(version)]
pub struct CliArgs {
    /// Calibration file (native or legacy visual.json); defaults are used without one
    #[arg(long, global = true, env = "QUILT_CALIBRATION")]
    pub calibration: Option<PathBuf>,

    /// Host display index to select the calibration for
    #[arg(long, global = true, env = "QUILT_DISPLAY", default_value = "0")]
    pub display: i32,

    /// Preset id (e.g. "high-res"), tiling tag (e.g. "tx05ty09qw4096qh4096") or "auto"
    #[arg(long, global = true, env = "QUILT_PRESET")]
    pub preset: Option<String>,

    /// Quality used when the preset is automatic: low, medium or high
    #[arg(long, global = true, default_value = "medium", value_parser = parse_kebab::<QualityHint>)]
    pub quality: QualityHint,

    /// What to do
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print the lenticular shader uniforms as JSON
    Uniforms,

    /// List the built-in quilt presets
    Presets,

    /// Infer the tiling of a quilt image
    Infer {
        /// Quilt image to inspect
        image: PathBuf,

        /// Compare tiles against the center tile instead of the tile mean
        #[arg(long)]
        center_tile: bool,
    },

    /// Render a test-pattern quilt to a PNG screenshot
    Render {
        /// Directory the screenshot is written to
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,

        /// View reduction: none, every-other, every4th, every8th, four-views, two-views
        #[arg(long, default_value = "none", value_parser = parse_kebab::<ViewInterpolation>)]
        interpolation: ViewInterpolation,
    },

    /// Encode or decode device flash images
    Flash {
        /// Flash operation
        #[command(subcommand)]
        command: FlashCommand,
    },
}

/// Flash image operations.
#[derive(Debug, Clone, Subcommand)]
pub enum FlashCommand {
    /// Write the selected calibration as a flash image
    Encode {
        /// Output file
        #[arg(long)]
        output: PathBuf,
    },

    /// Read the calibration stored in a flash image
    Decode {
        /// Flash image file
        image: PathBuf,
    },
}

/// Parse a kebab-case enum value through its serde representation.
fn parse_kebab<T: DeserializeOwned>(s: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(s.trim().to_ascii_lowercase()))
        .map_err(|e| format!("invalid value {s:?}: {e}"))
}

/// Settings shared by every command.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolConfig {
    /// Calibration file, if any.
    pub calibration: Option<PathBuf>,
    /// Display the calibration is selected for.
    pub display: i32,
    /// Layout choice; `None` means automatic.
    pub preset: Option<String>,
    /// Quality used by automatic layout selection.
    pub quality: QualityHint,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolConfig {
    /// Default calibration on display 0 with an automatic layout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            calibration: None,
            display: 0,
            preset: None,
            quality: QualityHint::Medium,
        }
    }
}

impl From<&CliArgs> for ToolConfig {
    fn from(args: &CliArgs) -> Self {
        Self {
            calibration: args.calibration.clone(),
            display: args.display,
            preset: args.preset.clone(),
            quality: args.quality,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subcommand_with_globals() {
        let args = CliArgs::try_parse_from([
            "quilt-tool",
            "render",
            "--preset",
            "high-res",
            "--interpolation",
            "every-other",
        ])
        .expect("parse");

        assert_eq!(args.preset.as_deref(), Some("high-res"));
        assert!(matches!(
            args.command,
            Command::Render {
                interpolation: ViewInterpolation::EveryOther,
                ..
            }
        ));
    }

    #[test]
    fn test_quality_parsing() {
        let args =
            CliArgs::try_parse_from(["quilt-tool", "--quality", "High", "uniforms"]).expect("parse");
        assert_eq!(args.quality, QualityHint::High);

        assert!(CliArgs::try_parse_from(["quilt-tool", "--quality", "ultra", "uniforms"]).is_err());
    }

    #[test]
    fn test_flash_subcommands() {
        let args = CliArgs::try_parse_from(["quilt-tool", "flash", "decode", "dump.bin"])
            .expect("parse");
        assert!(matches!(
            args.command,
            Command::Flash {
                command: FlashCommand::Decode { .. }
            }
        ));
    }

    #[test]
    fn test_config_from_args() {
        let args = CliArgs::try_parse_from(["quilt-tool", "--display", "2", "presets"])
            .expect("parse");
        let config = ToolConfig::from(&args);
        assert_eq!(config.display, 2);
        assert_eq!(config.quality, QualityHint::Medium);
    }
}

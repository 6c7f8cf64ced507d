//! # Saorsa Quilt Tool
//!
//! Command-line host for calibration and quilt utilities.

use clap::Parser;
use quilt_tool::{commands, CliArgs, Command, FlashCommand, ToolConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize structured tracing with optional JSON format.
///
/// Set `RUST_LOG` to control log levels (default: info,quilt_tool=debug,quilt_renderer=debug,quilt_core=debug).
/// Set `RUST_LOG_FORMAT=json` for JSON output.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,quilt_tool=debug,quilt_renderer=debug,quilt_core=debug")
    });

    // Logs go to stderr so command output stays pipeable.
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = CliArgs::parse();
    let config = ToolConfig::from(&args);
    tracing::debug!("Running {:?} with {:?}", args.command, config);

    let output = match &args.command {
        Command::Uniforms => commands::uniforms(&config)?,
        Command::Presets => commands::presets(),
        Command::Infer { image, center_tile } => commands::infer(image, *center_tile)?,
        Command::Render {
            output_dir,
            interpolation,
        } => commands::render(&config, output_dir, *interpolation)?,
        Command::Flash { command } => match command {
            FlashCommand::Encode { output } => commands::flash_encode(&config, output)?,
            FlashCommand::Decode { image } => commands::flash_decode(image)?,
        },
    };
    println!("{output}");
    Ok(())
}

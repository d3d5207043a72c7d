//! Lumen clear-color demo.
//!
//! Opens a window and clears every presented image to an animated color through
//! a render pass, exercising swapchain recreation on resize and minimize.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p lumen-demo -- [CONFIG]
//! ```
//!
//! `CONFIG` is a TOML file (default: `lumen.toml`). A missing file means defaults.
//! Press Space to pause the animation.
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;

use lumen_app::{run_app, AppConfig};

use crate::app::ClearDemo;

const DEFAULT_CONFIG_PATH: &str = "lumen.toml";

fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = AppConfig::load(&path)?;

    run_app::<ClearDemo>(config)
}

fn print_help() {
    eprintln!(
        "Lumen clear-color demo

USAGE:
    cargo run -p lumen-demo -- [CONFIG]

ARGS:
    CONFIG    TOML configuration file (default: {DEFAULT_CONFIG_PATH})

CONFIG KEYS:
    title, width, height, max_frames_in_flight, vsync, validation,
    minimized_poll_interval_ms, target_fps

CONTROLS:
    Space     Pause or resume the animation

ENVIRONMENT VARIABLES:
    RUST_LOG  Set log level (e.g., info, debug, trace)"
    );
}

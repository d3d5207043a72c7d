//! Application framework for Lumen.
//!
//! This crate provides a trait-based application framework that handles
//! common boilerplate like:
//! - Window creation and management
//! - Vulkan device and swapchain bring-up
//! - Frame synchronization and swapchain recreation
//! - Event loop handling
//!
//! # Example
//!
//! ```no_run
//! use lumen_app::{AppConfig, AppContext, FrameApp, FrameContext, run_app};
//!
//! struct MyApp;
//!
//! impl FrameApp for MyApp {
//!     fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         Ok(MyApp)
//!     }
//!
//!     fn update(&mut self, ctx: &AppContext, dt: f32) {}
//!
//!     fn record(&mut self, ctx: &AppContext, frame: &mut FrameContext) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//!
//!     fn on_swapchain_recreated(&mut self, ctx: &mut AppContext) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::default())
//! }
//! ```

mod app;
mod backend;
mod config;
mod context;
mod frame;
mod runner;
pub mod scheduler;

pub use app::FrameApp;
pub use config::AppConfig;
pub use context::{AppContext, AppWindow};
pub use frame::FrameContext;
pub use runner::run_app;
pub use scheduler::{FrameBackend, FrameOutcome, FrameScheduler, FrameState};

// Re-export commonly used types for convenience
pub use winit::event::WindowEvent;

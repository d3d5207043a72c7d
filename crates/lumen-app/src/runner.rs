//! Application runner and event loop.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::app::FrameApp;
use crate::backend::VulkanBackend;
use crate::config::AppConfig;
use crate::context::AppContext;
use crate::scheduler::{FrameOutcome, FrameScheduler};

/// Run a FrameApp with the given configuration.
///
/// This function initializes logging, creates the window and GPU context,
/// and runs the event loop until the window is closed. Setup failures and
/// fatal frame errors are returned.
pub fn run_app<A: FrameApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    config.validate()?;

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
        failure: None,
    };

    event_loop.run_app(&mut runner)?;

    match runner.failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Internal application runner that implements winit's ApplicationHandler.
struct AppRunner<A: FrameApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
    failure: Option<anyhow::Error>,
}

/// Internal application state.
///
/// `app` is declared before `ctx` so its GPU objects are released while the
/// device still exists.
struct AppState<A: FrameApp> {
    app: A,
    ctx: AppContext,
    scheduler: FrameScheduler,
    target_frame_time: Option<Duration>,
    // FPS tracking
    min_fps: f64,
    max_fps: f64,
    fps_sum: f64,
    fps_samples: u64,
}

impl<A: FrameApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => {
                error!("Failed to initialize application: {e:#}");
                self.failure = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        // Let the app handle the event first
        if let Some(state) = &mut self.state {
            if state.app.on_event(&event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(mut state) = self.state.take() {
                    state.cleanup();
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                let Some(state) = &mut self.state else {
                    return;
                };
                if state.ctx.window.is_minimized() {
                    return;
                }
                if let Err(e) = state.render_frame() {
                    error!("Render error: {e:#}");
                    if let Some(mut state) = self.state.take() {
                        state.cleanup();
                    }
                    self.failure = Some(e);
                    event_loop.exit();
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    info!("Resized to {}x{}", size.width, size.height);
                    state.scheduler.notify_resized();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            // Nothing to draw while minimized; sleep until the next event
            if state.ctx.window.is_minimized() {
                event_loop.set_control_flow(ControlFlow::Wait);
            } else {
                event_loop.set_control_flow(ControlFlow::Poll);
                state.ctx.window.window().request_redraw();
            }
        }
    }
}

impl<A: FrameApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        // Create window
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));

        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let mut ctx = AppContext::new(window, &self.config)?;

        // Initialize the application
        let app = A::init(&mut ctx)?;

        let scheduler = FrameScheduler::new(ctx.frames_in_flight(), ctx.swapchain.image_count())?;

        Ok(AppState {
            app,
            ctx,
            scheduler,
            target_frame_time: self.config.target_frame_time(),
            min_fps: f64::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
            fps_samples: 0,
        })
    }
}

impl<A: FrameApp> AppState<A> {
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let frame_start = Instant::now();

        // Calculate delta time
        let now = Instant::now();
        let dt = now.duration_since(self.ctx.last_frame_time).as_secs_f32();
        self.ctx.last_frame_time = now;

        // Update FPS tracking
        if dt > 0.0 {
            let fps = 1.0 / dt as f64;
            self.min_fps = self.min_fps.min(fps);
            self.max_fps = self.max_fps.max(fps);
            self.fps_sum += fps;
            self.fps_samples += 1;
        }

        self.app.update(&self.ctx, dt);

        let mut backend = VulkanBackend {
            ctx: &mut self.ctx,
            app: &mut self.app,
            dt,
        };
        let outcome = self.scheduler.run_frame(&mut backend)?;
        if let FrameOutcome::SkippedStale { frame } = outcome {
            tracing::debug!("Frame on slot {frame} skipped, swapchain was out of date");
        }

        // Frame pacing
        if let Some(target) = self.target_frame_time {
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                let _span = tracing::trace_span!("frame.pacing").entered();
                thread::sleep(target - elapsed);
            }
        }

        Ok(())
    }

    fn cleanup(&mut self) {
        // Print FPS statistics
        if self.fps_samples > 0 {
            let avg_fps = self.fps_sum / self.fps_samples as f64;
            info!("FPS Statistics:");
            info!("  Min: {:.1}", self.min_fps);
            info!("  Max: {:.1}", self.max_fps);
            info!("  Avg: {:.1}", avg_fps);
            info!("  Total frames: {}", self.ctx.frame_count);
            info!("  Swapchain rebuilds: {}", self.scheduler.recreations());
        }

        info!("Starting cleanup...");

        let mut backend = VulkanBackend {
            ctx: &mut self.ctx,
            app: &mut self.app,
            dt: 0.0,
        };
        if let Err(e) = self.scheduler.shutdown(&mut backend) {
            error!("Failed to wait idle: {e}");
        }

        // Let the app cleanup first; context resources go when the state drops
        self.app.cleanup(&mut self.ctx);

        info!("Cleanup complete");
    }
}

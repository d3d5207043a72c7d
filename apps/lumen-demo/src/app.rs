//! Clear-color demo application.

use ash::vk;
use lumen_app::{AppContext, FrameApp, FrameContext, WindowEvent};
use lumen_gpu::RenderPass;
use tracing::info;

/// Seconds for one full trip around the color wheel.
const CYCLE_SECONDS: f32 = 6.0;

/// Clears every presented image to a slowly cycling color.
pub struct ClearDemo {
    /// Render pass matching the current swapchain format.
    render_pass: Option<RenderPass>,
    /// Seconds since start.
    time: f32,
    paused: bool,
}

impl ClearDemo {
    /// Make sure the render pass matches the swapchain format, then build framebuffers.
    fn prepare_targets(&mut self, ctx: &mut AppContext) -> anyhow::Result<()> {
        let format = ctx.swapchain.format();
        let stale = self
            .render_pass
            .as_ref()
            .map_or(true, |render_pass| render_pass.format() != format);

        if stale {
            // Framebuffers built on the old pass went with the old swapchain
            self.render_pass = None;
            self.render_pass = Some(RenderPass::new_color_present(&ctx.device, format)?);
            info!("Render pass built for {format:?}");
        }

        if let Some(render_pass) = &self.render_pass {
            ctx.swapchain.create_framebuffers(render_pass.handle())?;
        }
        Ok(())
    }
}

/// Color on a hue wheel at `t` seconds.
pub fn clear_color(t: f32) -> [f32; 4] {
    let phase = (t / CYCLE_SECONDS).fract() * std::f32::consts::TAU;
    let channel = |offset: f32| 0.5 + 0.5 * (phase + offset).sin();
    [
        channel(0.0),
        channel(std::f32::consts::TAU / 3.0),
        channel(2.0 * std::f32::consts::TAU / 3.0),
        1.0,
    ]
}

impl FrameApp for ClearDemo {
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        let mut demo = Self {
            render_pass: None,
            time: 0.0,
            paused: false,
        };
        demo.prepare_targets(ctx)?;

        info!(
            "Clear demo ready: {}x{}, {} frames in flight",
            ctx.width(),
            ctx.height(),
            ctx.frames_in_flight()
        );
        Ok(demo)
    }

    fn update(&mut self, _ctx: &AppContext, dt: f32) {
        if !self.paused {
            self.time += dt;
        }
    }

    fn record(&mut self, ctx: &AppContext, frame: &mut FrameContext) -> anyhow::Result<()> {
        let Some(render_pass) = &self.render_pass else {
            anyhow::bail!("render pass missing");
        };
        anyhow::ensure!(
            frame.framebuffer != vk::Framebuffer::null(),
            "no framebuffer for image {}",
            frame.image_index
        );

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color(self.time),
            },
        }];
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass.handle())
            .framebuffer(frame.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: frame.extent,
            })
            .clear_values(&clear_values);

        let device = ctx.device.device();
        // SAFETY: the command buffer is recording and the framebuffer matches the pass
        unsafe {
            device.cmd_begin_render_pass(
                frame.command_buffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
            device.cmd_end_render_pass(frame.command_buffer);
        }
        Ok(())
    }

    fn on_swapchain_recreated(&mut self, ctx: &mut AppContext) -> anyhow::Result<()> {
        self.prepare_targets(ctx)
    }

    fn on_event(&mut self, event: &WindowEvent) -> bool {
        use winit::event::ElementState;
        use winit::keyboard::{Key, NamedKey};

        if let WindowEvent::KeyboardInput { event, .. } = event {
            if event.state == ElementState::Pressed
                && event.logical_key == Key::Named(NamedKey::Space)
            {
                self.paused = !self.paused;
                info!("Animation {}", if self.paused { "paused" } else { "resumed" });
                return true;
            }
        }
        false
    }

    fn cleanup(&mut self, _ctx: &mut AppContext) {
        self.render_pass = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_color_stays_in_unit_range() {
        for step in 0..100 {
            let color = clear_color(step as f32 * 0.37);
            assert!(color.iter().all(|c| (0.0..=1.0).contains(c)));
            assert_eq!(color[3], 1.0);
        }
    }

    #[test]
    fn clear_color_repeats_each_cycle() {
        let a = clear_color(1.25);
        let b = clear_color(1.25 + CYCLE_SECONDS);
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-4);
        }
    }
}

//! Frame scheduler.
//!
//! Drives one frame at a time through a fixed sequence of phases against a
//! [`FrameBackend`]:
//!
//! 1. wait for the current frame slot's fence
//! 2. acquire a swapchain image with the slot's image-available semaphore
//! 3. reset the slot's fence (only once an image was actually acquired)
//! 4. record, submit and present
//! 5. advance the frame cursor
//!
//! An out-of-date acquire abandons the frame before anything is submitted and
//! recreates the swapchain; the cursor does not move, and since the fence was
//! never reset the next wait on the same slot returns at once. A suboptimal
//! acquire or present, or a pending resize, still presents the frame and then
//! recreates.

use anyhow::{bail, ensure, Result};
use lumen_gpu::sync::ImagesInFlight;
use lumen_gpu::{AcquireOutcome, PresentOutcome};

/// Operations the scheduler sequences.
///
/// The Vulkan implementation lives in the runner. Frame indices are always in
/// `[0, frames_in_flight())`; image indices come from [`FrameBackend::acquire`].
pub trait FrameBackend {
    /// Number of frame slots.
    fn frames_in_flight(&self) -> usize;

    /// Number of images in the current swapchain.
    fn image_count(&self) -> usize;

    /// Block until the slot's last submission has retired.
    fn wait_slot(&mut self, frame: usize) -> Result<()>;

    /// Acquire the next image, signaling the slot's image-available semaphore.
    fn acquire(&mut self, frame: usize) -> Result<AcquireOutcome>;

    /// Return the slot's fence to unsignaled.
    fn reset_slot(&mut self, frame: usize) -> Result<()>;

    /// Record the slot's command buffer targeting `image`.
    fn record(&mut self, frame: usize, image: u32) -> Result<()>;

    /// Submit the slot's command buffer, signaling its fence on completion.
    fn submit(&mut self, frame: usize) -> Result<()>;

    /// Present `image` once the slot's rendering has finished.
    fn present(&mut self, frame: usize, image: u32) -> Result<PresentOutcome>;

    /// Rebuild the swapchain and everything that depends on it.
    fn recreate(&mut self) -> Result<()>;

    /// Block until the device has no work pending.
    fn wait_idle(&mut self) -> Result<()>;
}

/// Phase the scheduler is in, or was in when a frame stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    WaitSlot,
    AcquireImage,
    Record,
    Submit,
    Present,
    Advance,
    Recreate,
    Terminated,
}

/// What happened to one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The image was presented and the swapchain is still current.
    Presented { frame: usize, image: u32 },
    /// The image was presented, then the swapchain was rebuilt.
    PresentedAndRecreated { frame: usize, image: u32 },
    /// The swapchain was out of date at acquire. Nothing was submitted and the
    /// swapchain was rebuilt.
    SkippedStale { frame: usize },
}

/// Per-frame state machine over a ring of frame slots.
#[derive(Debug)]
pub struct FrameScheduler {
    state: FrameState,
    frames_in_flight: usize,
    current_frame: usize,
    images_in_flight: ImagesInFlight,
    resized: bool,
    frames_presented: u64,
    recreations: u64,
}

impl FrameScheduler {
    /// Create a scheduler for `frames_in_flight` slots and a swapchain of `image_count` images.
    pub fn new(frames_in_flight: usize, image_count: usize) -> Result<Self> {
        ensure!(frames_in_flight >= 1, "frames_in_flight must be at least 1");

        Ok(Self {
            state: FrameState::Idle,
            frames_in_flight,
            current_frame: 0,
            images_in_flight: ImagesInFlight::new(image_count),
            resized: false,
            frames_presented: 0,
            recreations: 0,
        })
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Slot the next frame will use.
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn recreations(&self) -> u64 {
        self.recreations
    }

    /// Force a recreation after the next present, even if presentation reports success.
    pub fn notify_resized(&mut self) {
        self.resized = true;
    }

    /// Run one iteration of the frame loop.
    pub fn run_frame<B: FrameBackend>(&mut self, backend: &mut B) -> Result<FrameOutcome> {
        if self.state == FrameState::Terminated {
            bail!("frame scheduler has been shut down");
        }
        ensure!(
            backend.frames_in_flight() == self.frames_in_flight,
            "backend has {} frame slots, scheduler expects {}",
            backend.frames_in_flight(),
            self.frames_in_flight
        );

        let frame = self.current_frame;

        self.state = FrameState::WaitSlot;
        {
            let _span = tracing::trace_span!("frame.wait_slot", frame).entered();
            backend.wait_slot(frame)?;
        }

        self.state = FrameState::AcquireImage;
        let acquired = {
            let _span = tracing::trace_span!("frame.acquire", frame).entered();
            backend.acquire(frame)?
        };

        let (image, acquire_suboptimal) = match acquired {
            AcquireOutcome::Acquired(image) => (image, false),
            AcquireOutcome::Suboptimal(image) => (image, true),
            AcquireOutcome::OutOfDate => {
                tracing::debug!("Swapchain out of date at acquire, skipping frame");
                self.recreate(backend)?;
                return Ok(FrameOutcome::SkippedStale { frame });
            }
        };

        let image_count = backend.image_count();
        ensure!(
            (image as usize) < image_count,
            "acquired image {image} but the swapchain has {image_count} images"
        );

        // A different slot may still be rendering into this image
        if let Some(owner) = self.images_in_flight.claim(image as usize, frame)? {
            let _span = tracing::trace_span!("frame.wait_image", frame, owner).entered();
            backend.wait_slot(owner)?;
        }

        backend.reset_slot(frame)?;

        self.state = FrameState::Record;
        {
            let _span = tracing::trace_span!("frame.record", frame, image).entered();
            backend.record(frame, image)?;
        }

        self.state = FrameState::Submit;
        {
            let _span = tracing::trace_span!("frame.submit", frame).entered();
            backend.submit(frame)?;
        }

        self.state = FrameState::Present;
        let presented = {
            let _span = tracing::trace_span!("frame.present", frame, image).entered();
            backend.present(frame, image)?
        };
        self.frames_presented += 1;

        let needs_recreate = acquire_suboptimal || presented.needs_recreate() || self.resized;
        if needs_recreate {
            tracing::debug!(
                acquire_suboptimal,
                ?presented,
                resized = self.resized,
                "Recreating swapchain after present"
            );
            self.recreate(backend)?;
        }

        self.state = FrameState::Advance;
        self.current_frame = (self.current_frame + 1) % self.frames_in_flight;

        Ok(if needs_recreate {
            FrameOutcome::PresentedAndRecreated { frame, image }
        } else {
            FrameOutcome::Presented { frame, image }
        })
    }

    fn recreate<B: FrameBackend>(&mut self, backend: &mut B) -> Result<()> {
        self.state = FrameState::Recreate;
        let _span = tracing::trace_span!("frame.recreate").entered();

        backend.recreate()?;
        self.images_in_flight.reset(backend.image_count());
        self.resized = false;
        self.recreations += 1;
        Ok(())
    }

    /// Wait for the device to go idle and stop accepting frames.
    pub fn shutdown<B: FrameBackend>(&mut self, backend: &mut B) -> Result<()> {
        if self.state == FrameState::Terminated {
            return Ok(());
        }
        self.state = FrameState::Terminated;
        backend.wait_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Reset(usize),
        Record(usize, u32),
        Submit(usize),
        Present(usize, u32),
        Recreate,
        WaitIdle,
    }

    /// Backend that follows a script and checks fence discipline as it goes.
    struct MockBackend {
        frames: usize,
        images: usize,
        calls: Vec<Call>,
        acquires: VecDeque<AcquireOutcome>,
        presents: VecDeque<PresentOutcome>,
        next_image: u32,
        /// Whether each slot's fence was waited on since its last reset.
        waited: Vec<bool>,
        /// Whether each slot's fence is signaled.
        signaled: Vec<bool>,
        violations: Vec<String>,
        images_after_recreate: Option<usize>,
    }

    impl MockBackend {
        fn new(frames: usize, images: usize) -> Self {
            Self {
                frames,
                images,
                calls: Vec::new(),
                acquires: VecDeque::new(),
                presents: VecDeque::new(),
                next_image: 0,
                waited: vec![false; frames],
                // Slots start pre-signaled
                signaled: vec![true; frames],
                violations: Vec::new(),
                images_after_recreate: None,
            }
        }

        fn script_acquire(mut self, outcomes: &[AcquireOutcome]) -> Self {
            self.acquires.extend(outcomes.iter().copied());
            self
        }

        fn script_present(mut self, outcomes: &[PresentOutcome]) -> Self {
            self.presents.extend(outcomes.iter().copied());
            self
        }

        fn count(&self, call: Call) -> usize {
            self.calls.iter().filter(|&&c| c == call).count()
        }

        fn position(&self, call: Call) -> Option<usize> {
            self.calls.iter().position(|&c| c == call)
        }
    }

    impl FrameBackend for MockBackend {
        fn frames_in_flight(&self) -> usize {
            self.frames
        }

        fn image_count(&self) -> usize {
            self.images
        }

        fn wait_slot(&mut self, frame: usize) -> Result<()> {
            self.calls.push(Call::Wait(frame));
            if !self.signaled[frame] {
                // The mock GPU retires work as soon as someone waits for it
                self.signaled[frame] = true;
            }
            self.waited[frame] = true;
            Ok(())
        }

        fn acquire(&mut self, frame: usize) -> Result<AcquireOutcome> {
            self.calls.push(Call::Acquire(frame));
            Ok(self.acquires.pop_front().unwrap_or_else(|| {
                let image = self.next_image;
                self.next_image = (self.next_image + 1) % self.images as u32;
                AcquireOutcome::Acquired(image)
            }))
        }

        fn reset_slot(&mut self, frame: usize) -> Result<()> {
            self.calls.push(Call::Reset(frame));
            if !self.waited[frame] {
                self.violations
                    .push(format!("reset of slot {frame} without a preceding wait"));
            }
            self.waited[frame] = false;
            self.signaled[frame] = false;
            Ok(())
        }

        fn record(&mut self, frame: usize, image: u32) -> Result<()> {
            self.calls.push(Call::Record(frame, image));
            if image as usize >= self.images {
                self.violations.push(format!("recorded for image {image}"));
            }
            Ok(())
        }

        fn submit(&mut self, frame: usize) -> Result<()> {
            self.calls.push(Call::Submit(frame));
            if self.signaled[frame] {
                self.violations
                    .push(format!("submitted slot {frame} with a signaled fence"));
            }
            Ok(())
        }

        fn present(&mut self, frame: usize, image: u32) -> Result<PresentOutcome> {
            self.calls.push(Call::Present(frame, image));
            Ok(self.presents.pop_front().unwrap_or(PresentOutcome::Presented))
        }

        fn recreate(&mut self) -> Result<()> {
            self.calls.push(Call::Recreate);
            if let Some(images) = self.images_after_recreate.take() {
                self.images = images;
            }
            self.next_image = 0;
            Ok(())
        }

        fn wait_idle(&mut self) -> Result<()> {
            self.calls.push(Call::WaitIdle);
            Ok(())
        }
    }

    #[test]
    fn happy_path_runs_phases_in_order() {
        let mut backend = MockBackend::new(2, 3);
        let mut scheduler = FrameScheduler::new(2, 3).unwrap();

        let outcome = scheduler.run_frame(&mut backend).unwrap();

        assert_eq!(outcome, FrameOutcome::Presented { frame: 0, image: 0 });
        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Reset(0),
                Call::Record(0, 0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
        assert_eq!(scheduler.state(), FrameState::Advance);
        assert_eq!(scheduler.current_frame(), 1);
    }

    #[test]
    fn first_wait_on_every_slot_finds_it_signaled() {
        let mut backend = MockBackend::new(3, 3);
        let mut scheduler = FrameScheduler::new(3, 3).unwrap();

        for _ in 0..3 {
            let frame = scheduler.current_frame();
            assert!(backend.signaled[frame], "slot {frame} should start signaled");
            scheduler.run_frame(&mut backend).unwrap();
        }
    }

    #[test]
    fn reset_never_precedes_wait() {
        let mut backend = MockBackend::new(2, 3)
            .script_acquire(&[
                AcquireOutcome::Acquired(0),
                AcquireOutcome::OutOfDate,
                AcquireOutcome::Suboptimal(1),
            ])
            .script_present(&[PresentOutcome::Presented, PresentOutcome::OutOfDate]);
        let mut scheduler = FrameScheduler::new(2, 3).unwrap();

        for _ in 0..10 {
            scheduler.run_frame(&mut backend).unwrap();
        }

        assert!(backend.violations.is_empty(), "{:?}", backend.violations);
    }

    #[test]
    fn frame_cursor_wraps() {
        let mut backend = MockBackend::new(2, 3);
        let mut scheduler = FrameScheduler::new(2, 3).unwrap();

        let frames: Vec<usize> = (0..5)
            .map(|_| match scheduler.run_frame(&mut backend).unwrap() {
                FrameOutcome::Presented { frame, .. } => frame,
                other => panic!("unexpected outcome {other:?}"),
            })
            .collect();

        assert_eq!(frames, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn out_of_date_acquire_skips_submit_and_present() {
        let mut backend = MockBackend::new(2, 3).script_acquire(&[AcquireOutcome::OutOfDate]);
        let mut scheduler = FrameScheduler::new(2, 3).unwrap();

        let outcome = scheduler.run_frame(&mut backend).unwrap();

        assert_eq!(outcome, FrameOutcome::SkippedStale { frame: 0 });
        assert_eq!(
            backend.calls,
            vec![Call::Wait(0), Call::Acquire(0), Call::Recreate]
        );
        assert_eq!(scheduler.current_frame(), 0);
        assert_eq!(scheduler.state(), FrameState::Recreate);
    }

    #[test]
    fn out_of_date_acquire_recreates_before_next_wait() {
        let mut backend = MockBackend::new(2, 3).script_acquire(&[AcquireOutcome::OutOfDate]);
        let mut scheduler = FrameScheduler::new(2, 3).unwrap();

        scheduler.run_frame(&mut backend).unwrap();
        let outcome = scheduler.run_frame(&mut backend).unwrap();

        // The abandoned slot is retried, and its fence was never reset
        assert_eq!(outcome, FrameOutcome::Presented { frame: 0, image: 0 });
        let recreate = backend.position(Call::Recreate).unwrap();
        let second_wait = backend
            .calls
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == Call::Wait(0))
            .nth(1)
            .map(|(i, _)| i)
            .unwrap();
        assert!(recreate < second_wait);
        assert_eq!(backend.count(Call::Reset(0)), 1);
    }

    #[test]
    fn suboptimal_acquire_presents_then_recreates() {
        let mut backend = MockBackend::new(2, 3).script_acquire(&[AcquireOutcome::Suboptimal(2)]);
        let mut scheduler = FrameScheduler::new(2, 3).unwrap();

        let outcome = scheduler.run_frame(&mut backend).unwrap();

        assert_eq!(outcome, FrameOutcome::PresentedAndRecreated { frame: 0, image: 2 });
        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Reset(0),
                Call::Record(0, 2),
                Call::Submit(0),
                Call::Present(0, 2),
                Call::Recreate,
            ]
        );
        assert_eq!(scheduler.current_frame(), 1);
    }

    #[test]
    fn stale_present_recreates() {
        let mut backend = MockBackend::new(2, 3)
            .script_present(&[PresentOutcome::OutOfDate, PresentOutcome::Suboptimal]);
        let mut scheduler = FrameScheduler::new(2, 3).unwrap();

        assert!(matches!(
            scheduler.run_frame(&mut backend).unwrap(),
            FrameOutcome::PresentedAndRecreated { .. }
        ));
        assert!(matches!(
            scheduler.run_frame(&mut backend).unwrap(),
            FrameOutcome::PresentedAndRecreated { .. }
        ));
        assert!(matches!(
            scheduler.run_frame(&mut backend).unwrap(),
            FrameOutcome::Presented { .. }
        ));
        assert_eq!(scheduler.recreations(), 2);
    }

    #[test]
    fn resize_forces_recreate_once() {
        let mut backend = MockBackend::new(2, 3);
        let mut scheduler = FrameScheduler::new(2, 3).unwrap();

        scheduler.notify_resized();
        assert!(matches!(
            scheduler.run_frame(&mut backend).unwrap(),
            FrameOutcome::PresentedAndRecreated { .. }
        ));
        assert!(matches!(
            scheduler.run_frame(&mut backend).unwrap(),
            FrameOutcome::Presented { .. }
        ));
        assert_eq!(backend.count(Call::Recreate), 1);
    }

    #[test]
    fn image_reused_by_other_slot_waits_on_its_owner() {
        // Slot 1 acquires the image slot 0 rendered into last
        let mut backend = MockBackend::new(2, 3).script_acquire(&[
            AcquireOutcome::Acquired(1),
            AcquireOutcome::Acquired(1),
        ]);
        let mut scheduler = FrameScheduler::new(2, 3).unwrap();

        scheduler.run_frame(&mut backend).unwrap();
        scheduler.run_frame(&mut backend).unwrap();

        assert_eq!(
            &backend.calls[6..],
            &[
                Call::Wait(1),
                Call::Acquire(1),
                Call::Wait(0),
                Call::Reset(1),
                Call::Record(1, 1),
                Call::Submit(1),
                Call::Present(1, 1),
            ]
        );
    }

    #[test]
    fn image_owner_table_is_cleared_on_recreate() {
        let mut backend = MockBackend::new(2, 3).script_acquire(&[
            AcquireOutcome::Acquired(1),
            AcquireOutcome::OutOfDate,
            AcquireOutcome::Acquired(1),
        ]);
        let mut scheduler = FrameScheduler::new(2, 3).unwrap();

        scheduler.run_frame(&mut backend).unwrap();
        scheduler.run_frame(&mut backend).unwrap();
        scheduler.run_frame(&mut backend).unwrap();

        // After the rebuild slot 1 owes nothing to slot 0
        assert_eq!(backend.count(Call::Wait(0)), 1);
    }

    #[test]
    fn owner_table_follows_new_image_count() {
        let mut backend = MockBackend::new(2, 3).script_acquire(&[
            AcquireOutcome::OutOfDate,
            AcquireOutcome::Acquired(3),
        ]);
        backend.images_after_recreate = Some(4);
        let mut scheduler = FrameScheduler::new(2, 3).unwrap();

        scheduler.run_frame(&mut backend).unwrap();
        let outcome = scheduler.run_frame(&mut backend).unwrap();

        assert_eq!(outcome, FrameOutcome::Presented { frame: 0, image: 3 });
    }

    #[test]
    fn out_of_range_image_is_rejected_before_recording() {
        let mut backend = MockBackend::new(2, 3).script_acquire(&[AcquireOutcome::Acquired(3)]);
        let mut scheduler = FrameScheduler::new(2, 3).unwrap();

        assert!(scheduler.run_frame(&mut backend).is_err());
        assert_eq!(backend.count(Call::Reset(0)), 0);
        assert_eq!(backend.count(Call::Submit(0)), 0);
    }

    #[test]
    fn acquired_images_stay_in_range() {
        let mut backend = MockBackend::new(2, 3);
        let mut scheduler = FrameScheduler::new(2, 3).unwrap();

        for _ in 0..12 {
            match scheduler.run_frame(&mut backend).unwrap() {
                FrameOutcome::Presented { image, .. }
                | FrameOutcome::PresentedAndRecreated { image, .. } => assert!(image < 3),
                FrameOutcome::SkippedStale { .. } => {}
            }
        }
        assert_eq!(scheduler.frames_presented(), 12);
    }

    #[test]
    fn shutdown_waits_idle_and_terminates() {
        let mut backend = MockBackend::new(2, 3);
        let mut scheduler = FrameScheduler::new(2, 3).unwrap();

        scheduler.run_frame(&mut backend).unwrap();
        scheduler.shutdown(&mut backend).unwrap();
        scheduler.shutdown(&mut backend).unwrap();

        assert_eq!(scheduler.state(), FrameState::Terminated);
        assert_eq!(backend.count(Call::WaitIdle), 1);
        assert!(scheduler.run_frame(&mut backend).is_err());
    }

    #[test]
    fn zero_frames_in_flight_is_rejected() {
        assert!(FrameScheduler::new(0, 3).is_err());
    }

    #[test]
    fn starts_idle() {
        let scheduler = FrameScheduler::new(2, 3).unwrap();
        assert_eq!(scheduler.state(), FrameState::Idle);
        assert_eq!(scheduler.current_frame(), 0);
    }
}

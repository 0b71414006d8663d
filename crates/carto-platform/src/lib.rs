// SPDX-License-Identifier: CEPL-1.0
//! Window plumbing shared by the app: winit re-export, window attributes and frame pacing.
use std::time::{Duration, Instant};
use tracing::info;

pub use winit;

use winit::dpi::PhysicalSize;
use winit::window::{Window, WindowAttributes};

pub fn window_attributes(title: &str, width: u32, height: u32) -> WindowAttributes {
    Window::default_attributes()
        .with_title(title)
        .with_inner_size(PhysicalSize::new(width.max(1), height.max(1)))
}

/// Drawable size in pixels. Either side is 0 while minimized.
pub fn drawable_size(window: &Window) -> (u32, u32) {
    let s = window.inner_size();
    (s.width, s.height)
}

/// Decides when the next redraw is due and logs a frame rate once a second.
#[derive(Debug)]
pub struct FramePacer {
    frame_dt: Option<Duration>,
    next_deadline: Option<Instant>,
    frames: u32,
    last_report: Instant,
}

impl FramePacer {
    /// `fps_cap == 0` means uncapped.
    pub fn new(fps_cap: u32) -> Self {
        Self {
            frame_dt: (fps_cap > 0).then(|| Duration::from_nanos(1_000_000_000 / fps_cap as u64)),
            next_deadline: None,
            frames: 0,
            last_report: Instant::now(),
        }
    }

    /// `Ok(())` when a redraw should be requested now, otherwise the instant to sleep until.
    pub fn poll(&mut self, now: Instant) -> Result<(), Instant> {
        let Some(dt) = self.frame_dt else {
            return Ok(());
        };
        match self.next_deadline {
            Some(t) if now < t => Err(t),
            _ => {
                self.next_deadline = Some(now + dt);
                Ok(())
            }
        }
    }

    pub fn frame_rendered(&mut self, now: Instant) {
        self.frames = self.frames.saturating_add(1);
        if now.duration_since(self.last_report) >= Duration::from_secs(1) {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_report = now;
        }
    }

    /// Forget the counter and deadline, e.g. after a pause.
    pub fn reset(&mut self, now: Instant) {
        self.frames = 0;
        self.next_deadline = None;
        self.last_report = now;
    }

    pub fn frames_this_second(&self) -> u32 {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncapped_always_redraws() {
        let mut p = FramePacer::new(0);
        let now = Instant::now();
        assert!(p.poll(now).is_ok());
        assert!(p.poll(now).is_ok());
    }

    #[test]
    fn capped_waits_for_the_deadline() {
        let mut p = FramePacer::new(10);
        let t0 = Instant::now();
        assert!(p.poll(t0).is_ok());
        let wait = p.poll(t0 + Duration::from_millis(20)).unwrap_err();
        assert_eq!(wait, t0 + Duration::from_millis(100));
        assert!(p.poll(t0 + Duration::from_millis(100)).is_ok());
    }

    #[test]
    fn counter_resets_each_second() {
        let t0 = Instant::now();
        let mut p = FramePacer::new(0);
        p.reset(t0);
        p.frame_rendered(t0);
        p.frame_rendered(t0 + Duration::from_millis(500));
        assert_eq!(p.frames_this_second(), 2);
        p.frame_rendered(t0 + Duration::from_secs(1));
        assert_eq!(p.frames_this_second(), 0);
    }
}

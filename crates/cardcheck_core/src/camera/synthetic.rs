//! Test-pattern camera used when no platform capture backend is wired in.

use super::{CameraDevice, CameraError, CaptureConstraints, MediaStream};
use anyhow::bail;
use image::{ImageBuffer, Rgb, RgbImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
enum Behaviour {
    Grant,
    Deny,
    Unavailable(String),
}

/// Produces a moving gradient at a fixed native resolution.
///
/// Clones share counters, so a test can keep one handle while the controller
/// owns another.
#[derive(Debug, Clone)]
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    behaviour: Behaviour,
    failing_frames: bool,
    opened: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
    last_constraints: Arc<Mutex<Option<CaptureConstraints>>>,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            behaviour: Behaviour::Grant,
            failing_frames: false,
            opened: Arc::new(AtomicUsize::new(0)),
            live: Arc::new(AtomicUsize::new(0)),
            last_constraints: Arc::new(Mutex::new(None)),
        }
    }

    pub fn denied() -> Self {
        Self {
            behaviour: Behaviour::Deny,
            ..Self::new(640, 480)
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            behaviour: Behaviour::Unavailable(reason.into()),
            ..Self::new(640, 480)
        }
    }

    /// Streams open fine but every frame grab fails.
    pub fn failing_frames(mut self) -> Self {
        self.failing_frames = true;
        self
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Streams opened and not yet stopped.
    pub fn live_streams(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn last_constraints(&self) -> Option<CaptureConstraints> {
        self.last_constraints.lock().ok().and_then(|c| *c)
    }
}

impl CameraDevice for SyntheticCamera {
    fn open(&self, constraints: &CaptureConstraints) -> Result<Box<dyn MediaStream>, CameraError> {
        if let Ok(mut last) = self.last_constraints.lock() {
            *last = Some(*constraints);
        }
        match &self.behaviour {
            Behaviour::Deny => return Err(CameraError::PermissionDenied),
            Behaviour::Unavailable(reason) => return Err(CameraError::Unavailable(reason.clone())),
            Behaviour::Grant => {}
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticStream {
            width: self.width,
            height: self.height,
            tick: 0,
            failing: self.failing_frames,
            stopped: false,
            live: Arc::clone(&self.live),
        }))
    }
}

struct SyntheticStream {
    width: u32,
    height: u32,
    tick: u32,
    failing: bool,
    stopped: bool,
    live: Arc<AtomicUsize>,
}

impl MediaStream for SyntheticStream {
    fn grab_frame(&mut self) -> anyhow::Result<RgbImage> {
        if self.stopped {
            bail!("stream already stopped");
        }
        if self.failing {
            bail!("synthetic frame grab failure");
        }
        self.tick = self.tick.wrapping_add(1);
        let (w, h, t) = (self.width.max(1), self.height.max(1), self.tick);
        Ok(ImageBuffer::from_fn(self.width, self.height, |x, y| {
            let r = (x.wrapping_add(t) % w * 255 / w) as u8;
            let g = (y * 255 / h) as u8;
            Rgb([r, g, 128])
        }))
    }

    fn stop_all_tracks(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

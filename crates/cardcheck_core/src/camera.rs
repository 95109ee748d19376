//! Camera session lifecycle: `Idle -> Requesting -> Streaming -> Idle`.

pub mod synthetic;

use crate::error::PipelineError;
use image::RgbImage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacingMode {
    /// Rear camera.
    Environment,
    /// Front camera.
    User,
}

/// What a session asks the platform for. Resolution is a preference only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub facing: FacingMode,
    pub audio: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CameraError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("{0}")]
    Unavailable(String),
}

impl From<CameraError> for PipelineError {
    fn from(err: CameraError) -> Self {
        match err {
            CameraError::PermissionDenied => PipelineError::CameraPermissionDenied,
            CameraError::Unavailable(msg) => PipelineError::CameraUnavailable(msg),
        }
    }
}

/// A platform camera that can be asked for a stream.
pub trait CameraDevice {
    fn open(&self, constraints: &CaptureConstraints) -> Result<Box<dyn MediaStream>, CameraError>;
}

/// Device for builds without a capture backend. Every request fails as
/// unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCamera;

impl CameraDevice for NoCamera {
    fn open(
        &self,
        _constraints: &CaptureConstraints,
    ) -> Result<Box<dyn MediaStream>, CameraError> {
        Err(CameraError::Unavailable("no camera backend in this build".to_string()))
    }
}

/// A live capture stream made of one or more tracks.
pub trait MediaStream {
    /// Current frame at the stream's native resolution.
    fn grab_frame(&mut self) -> anyhow::Result<RgbImage>;

    /// Stops every track. Must be safe to call more than once.
    fn stop_all_tracks(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    Idle,
    Requesting,
    Streaming,
}

/// Owns at most one stream and guarantees it is stopped on every exit path.
pub struct CameraSession {
    state: CameraState,
    stream: Option<Box<dyn MediaStream>>,
    /// Live frames that failed since the stream opened.
    frame_failures: u32,
}

impl Default for CameraSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraSession {
    pub fn new() -> Self {
        Self {
            state: CameraState::Idle,
            stream: None,
            frame_failures: 0,
        }
    }

    pub fn state(&self) -> CameraState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.state == CameraState::Streaming
    }

    pub fn start(
        &mut self,
        device: &dyn CameraDevice,
        constraints: &CaptureConstraints,
    ) -> Result<(), PipelineError> {
        if self.is_streaming() {
            tracing::debug!("camera already streaming");
            return Ok(());
        }
        self.state = CameraState::Requesting;
        tracing::info!(
            "requesting camera {}x{} facing {:?}",
            constraints.ideal_width,
            constraints.ideal_height,
            constraints.facing
        );
        match device.open(constraints) {
            Ok(stream) => {
                self.stream = Some(stream);
                self.frame_failures = 0;
                self.state = CameraState::Streaming;
                Ok(())
            }
            Err(err) => {
                tracing::warn!("camera start failed: {err}");
                self.state = CameraState::Idle;
                Err(err.into())
            }
        }
    }

    /// Stops the stream if one is live. Returns whether anything was stopped.
    pub fn stop(&mut self) -> bool {
        self.state = CameraState::Idle;
        match self.stream.take() {
            Some(mut stream) => {
                stream.stop_all_tracks();
                tracing::info!("camera stopped");
                true
            }
            None => false,
        }
    }

    pub fn live_frame(&mut self) -> Option<RgbImage> {
        let stream = self.stream.as_mut()?;
        match stream.grab_frame() {
            Ok(frame) => Some(frame),
            Err(err) => {
                if self.frame_failures == 0 {
                    tracing::warn!("live frame unavailable: {err:#}");
                } else {
                    tracing::debug!("live frame unavailable: {err:#}");
                }
                self.frame_failures = self.frame_failures.saturating_add(1);
                None
            }
        }
    }

    /// Takes one still and stops the session whether or not that worked.
    pub fn capture(&mut self) -> Result<RgbImage, PipelineError> {
        let frame = match self.stream.as_mut() {
            Some(stream) => stream
                .grab_frame()
                .map_err(|e| PipelineError::CameraUnavailable(format!("{e:#}"))),
            None => Err(PipelineError::CameraUnavailable(
                "no active camera stream".to_string(),
            )),
        };
        self.stop();
        frame
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.stop();
    }
}

//! Camera capability: acquiring and releasing a video-only stream.
//!
//! The controller never touches a device directly. It is handed a `Camera`
//! and owns whatever `MediaStream` that camera returns until it calls `stop()`.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::CaptureError;

/// Which way the requested camera should face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
    User,
    Environment,
}

/// What the controller asks the camera for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoConstraints {
    /// Preferred (not required) frame width.
    pub ideal_width: u32,
    /// Preferred (not required) frame height.
    pub ideal_height: u32,
    pub facing: FacingMode,
    /// Sessions never capture audio.
    pub audio: bool,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            ideal_width: 640,
            ideal_height: 480,
            facing: FacingMode::User,
            audio: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Snapshot of one track in a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub kind: TrackKind,
    pub label: String,
    pub live: bool,
}

/// An acquired media stream. `stop()` must be synchronous and idempotent.
pub trait MediaStream: Send {
    fn tracks(&self) -> Vec<TrackInfo>;

    /// Stop every track in the stream.
    fn stop(&mut self);

    fn live_tracks(&self) -> usize {
        self.tracks().iter().filter(|t| t.live).count()
    }
}

/// Something that can hand out camera streams.
#[async_trait]
pub trait Camera: Send + Sync {
    async fn acquire(
        &self,
        constraints: &VideoConstraints,
    ) -> Result<Box<dyn MediaStream>, CaptureError>;
}

// ── Device node camera ──────────────────────────────────────────────

/// Camera backed by a video device node such as `/dev/video0`.
///
/// Holding the node open is what claims the device; dropping the handle
/// releases it.
pub struct DeviceCamera {
    device: PathBuf,
}

impl DeviceCamera {
    pub fn new(device: impl Into<PathBuf>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

#[async_trait]
impl Camera for DeviceCamera {
    async fn acquire(
        &self,
        constraints: &VideoConstraints,
    ) -> Result<Box<dyn MediaStream>, CaptureError> {
        let device = self.device.display().to_string();

        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.device)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => CaptureError::NoDevice {
                    device: device.clone(),
                },
                ErrorKind::PermissionDenied => CaptureError::PermissionDenied {
                    device: device.clone(),
                },
                _ => CaptureError::Io(e),
            })?;

        info!(
            device = %device,
            width = constraints.ideal_width,
            height = constraints.ideal_height,
            facing = ?constraints.facing,
            "Camera acquired"
        );

        Ok(Box::new(DeviceStream {
            label: device,
            handle: Some(file.into_std().await),
        }))
    }
}

struct DeviceStream {
    label: String,
    handle: Option<std::fs::File>,
}

impl MediaStream for DeviceStream {
    fn tracks(&self) -> Vec<TrackInfo> {
        vec![TrackInfo {
            kind: TrackKind::Video,
            label: self.label.clone(),
            live: self.handle.is_some(),
        }]
    }

    fn stop(&mut self) {
        if self.handle.take().is_some() {
            debug!(device = %self.label, "Camera track stopped");
        }
    }
}

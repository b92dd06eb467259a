//! Boundary to the scanning hardware.
//!
//! Decoding is owned by the device. This module only enumerates devices,
//! opens a stream on the selected one, and negotiates the two camera controls
//! the scanner cares about: zoom and torch.

mod coordinator;
mod line;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use coordinator::CameraCoordinator;
pub use line::LineDeviceBackend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDescriptor {
  pub id: String,
  pub label: String,
}

/// Events produced by an open stream, delivered in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
  Decoded(String),
  Error(String),
}

/// Reported zoom bounds. Missing bounds are treated as 1.0.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ZoomRange {
  pub min: Option<f64>,
  pub max: Option<f64>,
}

impl ZoomRange {
  pub fn clamp(&self, level: f64) -> f64 {
    let min = self.min.unwrap_or(1.0);
    let max = self.max.unwrap_or(1.0);
    level.max(min).min(max)
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackCapabilities {
  pub zoom: Option<ZoomRange>,
  pub torch: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackSettings {
  pub zoom: Option<f64>,
  pub torch: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constraint {
  Zoom(f64),
  Torch(bool),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
  #[error(
    "Unable to access scanner '{device}': {reason}\n\n\
     Please ensure:\n\
     1. The device exists and this session is allowed to open it\n\
     2. Device permissions allow reading (e.g. membership in the dialout group)\n\
     3. No other application is using the scanner"
  )]
  Acquisition { device: String, reason: String },

  #[error("No cameras found")]
  NoDevice,

  #[error("{0}")]
  Unsupported(String),

  #[error("Camera error: {0}")]
  Backend(String),
}

/// Source of scanning devices.
#[async_trait]
pub trait CameraBackend: Send {
  async fn list_cameras(&self) -> Result<Vec<CameraDescriptor>, CameraError>;

  /// Open a stream on `device_id`. Decoded payloads go to `events` until the
  /// returned track is stopped.
  async fn start(
    &mut self,
    device_id: &str,
    events: mpsc::UnboundedSender<ScanEvent>,
  ) -> Result<Box<dyn VideoTrack>, CameraError>;
}

/// An open stream on a device.
#[async_trait]
pub trait VideoTrack: Send {
  fn capabilities(&self) -> TrackCapabilities;

  fn settings(&self) -> TrackSettings;

  async fn apply_constraints(&mut self, constraints: &[Constraint]) -> Result<(), CameraError>;

  async fn stop(&mut self) -> Result<(), CameraError>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_zoom_clamp() {
    let range = ZoomRange {
      min: Some(1.0),
      max: Some(8.0),
    };
    assert_eq!(range.clamp(2.0), 2.0);
    assert_eq!(range.clamp(10.0), 8.0);
    assert_eq!(range.clamp(0.5), 1.0);
  }

  #[test]
  fn test_zoom_clamp_missing_bounds() {
    assert_eq!(ZoomRange::default().clamp(2.0), 1.0);
    let only_max = ZoomRange {
      min: None,
      max: Some(1.5),
    };
    assert_eq!(only_max.clamp(2.0), 1.5);
  }

  #[test]
  fn test_acquisition_message_lists_causes() {
    let err = CameraError::Acquisition {
      device: "/dev/ttyACM0".into(),
      reason: "Permission denied".into(),
    };
    let msg = err.to_string();
    assert!(msg.contains("/dev/ttyACM0"));
    assert!(msg.contains("Permission denied"));
    assert!(msg.contains("No other application"));
  }
}

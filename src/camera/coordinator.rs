use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{CameraBackend, CameraDescriptor, CameraError, Constraint, ScanEvent, VideoTrack};

/// Owns device selection and the active stream for one scanner view.
pub struct CameraCoordinator<B: CameraBackend> {
  backend: B,
  cameras: Vec<CameraDescriptor>,
  selected: Option<String>,
  track: Option<Box<dyn VideoTrack>>,
  torch_enabled: bool,
  default_zoom: f64,
}

impl<B: CameraBackend> CameraCoordinator<B> {
  pub fn new(backend: B, default_zoom: f64) -> Self {
    Self {
      backend,
      cameras: Vec::new(),
      selected: None,
      track: None,
      torch_enabled: false,
      default_zoom,
    }
  }

  pub fn cameras(&self) -> &[CameraDescriptor] {
    &self.cameras
  }

  pub fn selected_id(&self) -> Option<&str> {
    self.selected.as_deref()
  }

  pub fn selected_label(&self) -> Option<&str> {
    let id = self.selected.as_deref()?;
    self
      .cameras
      .iter()
      .find(|c| c.id == id)
      .map(|c| c.label.as_str())
  }

  pub fn is_streaming(&self) -> bool {
    self.track.is_some()
  }

  /// Zoom reported by the open stream.
  pub fn current_zoom(&self) -> Option<f64> {
    self.track.as_ref()?.settings().zoom
  }

  pub fn torch_enabled(&self) -> bool {
    self.torch_enabled
  }

  pub fn torch_label(&self) -> &'static str {
    if self.torch_enabled {
      "Turn Off Flashlight"
    } else {
      "Turn On Flashlight"
    }
  }

  pub fn reset_torch_state(&mut self) {
    self.torch_enabled = false;
  }

  /// Enumerate devices and select the last one, which is conventionally the
  /// rear-facing camera. A listing failure leaves an empty list.
  pub async fn refresh_cameras(&mut self) -> &[CameraDescriptor] {
    self.cameras = match self.backend.list_cameras().await {
      Ok(cameras) => cameras,
      Err(e) => {
        warn!(error = %e, "Error listing cameras");
        Vec::new()
      }
    };
    self.selected = self.cameras.last().map(|c| c.id.clone());
    &self.cameras
  }

  /// Id of the device after the selected one, wrapping around.
  pub fn next_camera_id(&self) -> Option<String> {
    if self.cameras.is_empty() {
      return None;
    }
    let current = self
      .selected
      .as_deref()
      .and_then(|id| self.cameras.iter().position(|c| c.id == id));
    let next = match current {
      Some(i) => (i + 1) % self.cameras.len(),
      None => 0,
    };
    Some(self.cameras[next].id.clone())
  }

  /// Open a stream on the selected device and apply the default zoom.
  pub async fn start(&mut self) -> Result<mpsc::UnboundedReceiver<ScanEvent>, CameraError> {
    if self.track.is_some() {
      self.stop().await;
    }

    let device = self.selected.clone().ok_or(CameraError::NoDevice)?;
    let (tx, rx) = mpsc::unbounded_channel();
    let track = self.backend.start(&device, tx).await?;
    info!(device = %device, "Scanner started successfully");

    self.track = Some(track);
    self.torch_enabled = false;
    self.apply_zoom(self.default_zoom).await;

    Ok(rx)
  }

  /// Switch devices. If a stream is open it is torn down and reopened on the
  /// new device, and the new event receiver is returned.
  pub async fn select_camera(
    &mut self,
    id: &str,
  ) -> Result<Option<mpsc::UnboundedReceiver<ScanEvent>>, CameraError> {
    if !self.cameras.iter().any(|c| c.id == id) {
      return Err(CameraError::Backend(format!("Unknown camera '{}'", id)));
    }

    self.selected = Some(id.to_string());
    if self.track.is_some() {
      self.stop().await;
      return self.start().await.map(Some);
    }
    Ok(None)
  }

  /// Apply `level` clamped to the device's range. Returns the applied zoom,
  /// or `None` when the device has no zoom or the constraint failed.
  pub async fn apply_zoom(&mut self, level: f64) -> Option<f64> {
    let track = self.track.as_mut()?;
    let range = match track.capabilities().zoom {
      Some(range) => range,
      None => {
        info!("Zoom not supported on this device");
        return None;
      }
    };

    let target = range.clamp(level);
    match track.apply_constraints(&[Constraint::Zoom(target)]).await {
      Ok(()) => {
        info!(zoom = target, "Zoom applied");
        Some(target)
      }
      Err(e) => {
        warn!(error = %e, "Error applying zoom");
        None
      }
    }
  }

  /// Flip the torch. Returns the new state.
  pub async fn toggle_torch(&mut self) -> Result<bool, CameraError> {
    let track = self.track.as_mut().ok_or_else(|| {
      CameraError::Unsupported(
        "Flashlight not available. This feature requires a camera with flash support.".into(),
      )
    })?;

    if !track.capabilities().torch {
      return Err(CameraError::Unsupported(
        "Your device doesn't support flashlight control.".into(),
      ));
    }

    let wanted = !self.torch_enabled;
    track
      .apply_constraints(&[Constraint::Torch(wanted)])
      .await
      .map_err(|e| {
        warn!(error = %e, "Error toggling flashlight");
        CameraError::Unsupported(
          "Unable to control flashlight. This feature may not be supported on your device."
            .into(),
        )
      })?;

    self.torch_enabled = wanted;
    Ok(wanted)
  }

  /// Release the stream. The torch is switched off first so the hardware is
  /// never left lit; failures on either step are logged and swallowed.
  pub async fn stop(&mut self) {
    let Some(mut track) = self.track.take() else {
      return;
    };

    if self.torch_enabled {
      match track.apply_constraints(&[Constraint::Torch(false)]).await {
        Ok(()) => self.torch_enabled = false,
        Err(e) => warn!(error = %e, "Error turning off flashlight"),
      }
    }

    if let Err(e) = track.stop().await {
      warn!(error = %e, "Error stopping scanner");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::camera::{TrackCapabilities, TrackSettings, ZoomRange};
  use async_trait::async_trait;
  use std::sync::{Arc, Mutex};

  #[derive(Debug, Clone, PartialEq)]
  enum Call {
    Start(String),
    Apply(Constraint),
    Stop(String),
  }

  type Log = Arc<Mutex<Vec<Call>>>;

  struct FakeTrack {
    device: String,
    caps: TrackCapabilities,
    fail_apply: bool,
    log: Log,
  }

  #[async_trait]
  impl VideoTrack for FakeTrack {
    fn capabilities(&self) -> TrackCapabilities {
      self.caps.clone()
    }

    fn settings(&self) -> TrackSettings {
      TrackSettings::default()
    }

    async fn apply_constraints(&mut self, constraints: &[Constraint]) -> Result<(), CameraError> {
      for c in constraints {
        self.log.lock().unwrap().push(Call::Apply(*c));
      }
      if self.fail_apply {
        return Err(CameraError::Backend("constraint rejected".into()));
      }
      Ok(())
    }

    async fn stop(&mut self) -> Result<(), CameraError> {
      self.log.lock().unwrap().push(Call::Stop(self.device.clone()));
      Ok(())
    }
  }

  struct FakeBackend {
    cameras: Vec<CameraDescriptor>,
    caps: TrackCapabilities,
    fail_apply: bool,
    deny: bool,
    log: Log,
    senders: Arc<Mutex<Vec<mpsc::UnboundedSender<ScanEvent>>>>,
  }

  impl FakeBackend {
    fn new(ids: &[&str], caps: TrackCapabilities) -> Self {
      Self {
        cameras: ids
          .iter()
          .map(|id| CameraDescriptor {
            id: id.to_string(),
            label: format!("Camera {}", id),
          })
          .collect(),
        caps,
        fail_apply: false,
        deny: false,
        log: Arc::new(Mutex::new(Vec::new())),
        senders: Arc::new(Mutex::new(Vec::new())),
      }
    }
  }

  #[async_trait]
  impl CameraBackend for FakeBackend {
    async fn list_cameras(&self) -> Result<Vec<CameraDescriptor>, CameraError> {
      Ok(self.cameras.clone())
    }

    async fn start(
      &mut self,
      device_id: &str,
      events: mpsc::UnboundedSender<ScanEvent>,
    ) -> Result<Box<dyn VideoTrack>, CameraError> {
      if self.deny {
        return Err(CameraError::Acquisition {
          device: device_id.to_string(),
          reason: "Permission denied".into(),
        });
      }
      self.log.lock().unwrap().push(Call::Start(device_id.to_string()));
      self.senders.lock().unwrap().push(events);
      Ok(Box::new(FakeTrack {
        device: device_id.to_string(),
        caps: self.caps.clone(),
        fail_apply: self.fail_apply,
        log: self.log.clone(),
      }))
    }
  }

  fn zoom_caps(min: f64, max: f64) -> TrackCapabilities {
    TrackCapabilities {
      zoom: Some(ZoomRange {
        min: Some(min),
        max: Some(max),
      }),
      torch: true,
    }
  }

  #[tokio::test]
  async fn test_defaults_to_last_camera() {
    let backend = FakeBackend::new(&["front", "back"], zoom_caps(1.0, 4.0));
    let mut coord = CameraCoordinator::new(backend, 2.0);
    coord.refresh_cameras().await;
    assert_eq!(coord.selected_id(), Some("back"));
    assert_eq!(coord.selected_label(), Some("Camera back"));
    assert_eq!(coord.next_camera_id().as_deref(), Some("front"));
  }

  #[tokio::test]
  async fn test_start_applies_clamped_zoom() {
    let backend = FakeBackend::new(&["cam"], zoom_caps(1.0, 1.5));
    let log = backend.log.clone();
    let mut coord = CameraCoordinator::new(backend, 2.0);
    coord.refresh_cameras().await;
    coord.start().await.unwrap();

    assert!(coord.is_streaming());
    assert_eq!(
      *log.lock().unwrap(),
      vec![Call::Start("cam".into()), Call::Apply(Constraint::Zoom(1.5))]
    );
  }

  #[tokio::test]
  async fn test_zoom_without_capability_is_noop() {
    let backend = FakeBackend::new(&["cam"], TrackCapabilities::default());
    let log = backend.log.clone();
    let mut coord = CameraCoordinator::new(backend, 2.0);
    coord.refresh_cameras().await;
    coord.start().await.unwrap();

    assert_eq!(coord.apply_zoom(3.0).await, None);
    assert_eq!(*log.lock().unwrap(), vec![Call::Start("cam".into())]);
  }

  #[tokio::test]
  async fn test_zoom_failure_is_not_fatal() {
    let mut backend = FakeBackend::new(&["cam"], zoom_caps(1.0, 4.0));
    backend.fail_apply = true;
    let mut coord = CameraCoordinator::new(backend, 2.0);
    coord.refresh_cameras().await;
    assert!(coord.start().await.is_ok());
  }

  #[tokio::test]
  async fn test_start_without_devices() {
    let mut coord = CameraCoordinator::new(FakeBackend::new(&[], zoom_caps(1.0, 4.0)), 2.0);
    coord.refresh_cameras().await;
    assert_eq!(coord.start().await.unwrap_err(), CameraError::NoDevice);
  }

  #[tokio::test]
  async fn test_acquisition_error_leaves_no_stream() {
    let mut backend = FakeBackend::new(&["cam"], zoom_caps(1.0, 4.0));
    backend.deny = true;
    let mut coord = CameraCoordinator::new(backend, 2.0);
    coord.refresh_cameras().await;
    assert!(matches!(
      coord.start().await,
      Err(CameraError::Acquisition { .. })
    ));
    assert!(!coord.is_streaming());
  }

  #[tokio::test]
  async fn test_select_camera_restarts_stream() {
    let backend = FakeBackend::new(&["a", "b"], TrackCapabilities::default());
    let log = backend.log.clone();
    let mut coord = CameraCoordinator::new(backend, 2.0);
    coord.refresh_cameras().await;
    coord.start().await.unwrap();

    let rx = coord.select_camera("a").await.unwrap();
    assert!(rx.is_some());
    assert_eq!(coord.selected_id(), Some("a"));
    assert_eq!(
      *log.lock().unwrap(),
      vec![
        Call::Start("b".into()),
        Call::Stop("b".into()),
        Call::Start("a".into())
      ]
    );
    assert!(coord.select_camera("missing").await.is_err());
  }

  #[tokio::test]
  async fn test_select_camera_while_idle_does_not_start() {
    let backend = FakeBackend::new(&["a", "b"], TrackCapabilities::default());
    let log = backend.log.clone();
    let mut coord = CameraCoordinator::new(backend, 2.0);
    coord.refresh_cameras().await;
    assert!(coord.select_camera("a").await.unwrap().is_none());
    assert!(log.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_stop_turns_torch_off_first() {
    let backend = FakeBackend::new(&["cam"], TrackCapabilities {
      zoom: None,
      torch: true,
    });
    let log = backend.log.clone();
    let mut coord = CameraCoordinator::new(backend, 2.0);
    coord.refresh_cameras().await;
    coord.start().await.unwrap();

    assert_eq!(coord.toggle_torch().await, Ok(true));
    assert_eq!(coord.torch_label(), "Turn Off Flashlight");
    coord.stop().await;

    assert!(!coord.is_streaming());
    assert!(!coord.torch_enabled());
    assert_eq!(
      *log.lock().unwrap(),
      vec![
        Call::Start("cam".into()),
        Call::Apply(Constraint::Torch(true)),
        Call::Apply(Constraint::Torch(false)),
        Call::Stop("cam".into())
      ]
    );
  }

  #[tokio::test]
  async fn test_torch_unsupported() {
    let backend = FakeBackend::new(&["cam"], TrackCapabilities::default());
    let mut coord = CameraCoordinator::new(backend, 2.0);
    assert!(matches!(
      coord.toggle_torch().await,
      Err(CameraError::Unsupported(_))
    ));
    coord.refresh_cameras().await;
    coord.start().await.unwrap();
    assert!(matches!(
      coord.toggle_torch().await,
      Err(CameraError::Unsupported(_))
    ));
    assert!(!coord.torch_enabled());
  }

  #[tokio::test]
  async fn test_events_flow_until_stop() {
    let backend = FakeBackend::new(&["cam"], TrackCapabilities::default());
    let senders = backend.senders.clone();
    let mut coord = CameraCoordinator::new(backend, 2.0);
    coord.refresh_cameras().await;
    let mut rx = coord.start().await.unwrap();

    let tx = senders.lock().unwrap()[0].clone();
    tx.send(ScanEvent::Decoded("QR-1".into())).unwrap();
    assert_eq!(rx.recv().await, Some(ScanEvent::Decoded("QR-1".into())));
  }
}

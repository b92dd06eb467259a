//! Scanners that present themselves as a character device and write one
//! decoded payload per line (USB-CDC / serial mode).

use async_trait::async_trait;
use std::borrow::Cow;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::unix::pipe;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{
  CameraBackend, CameraDescriptor, CameraError, Constraint, ScanEvent, TrackCapabilities,
  TrackSettings, VideoTrack,
};

pub struct LineDeviceBackend {
  configured: Vec<CameraDescriptor>,
  discover_dir: Option<PathBuf>,
}

impl LineDeviceBackend {
  pub fn new(configured: Vec<CameraDescriptor>, discover_dir: Option<PathBuf>) -> Self {
    Self {
      configured,
      discover_dir,
    }
  }

  async fn discovered(&self) -> Vec<CameraDescriptor> {
    let Some(dir) = &self.discover_dir else {
      return Vec::new();
    };

    let mut found = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
      Ok(entries) => entries,
      Err(e) => {
        debug!(dir = %dir.display(), error = %e, "No serial devices to discover");
        return found;
      }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
      let path = entry.path();
      found.push(CameraDescriptor {
        id: path.to_string_lossy().to_string(),
        label: entry.file_name().to_string_lossy().to_string(),
      });
    }
    found.sort_by(|a, b| a.id.cmp(&b.id));
    found
  }
}

#[async_trait]
impl CameraBackend for LineDeviceBackend {
  async fn list_cameras(&self) -> Result<Vec<CameraDescriptor>, CameraError> {
    let mut cameras = self.configured.clone();
    for device in self.discovered().await {
      if !cameras.iter().any(|c| c.id == device.id) {
        cameras.push(device);
      }
    }
    Ok(cameras)
  }

  async fn start(
    &mut self,
    device_id: &str,
    events: mpsc::UnboundedSender<ScanEvent>,
  ) -> Result<Box<dyn VideoTrack>, CameraError> {
    let reader = match open_pollable(device_id) {
      Ok(receiver) => spawn_reader(receiver, device_id.to_string(), events),
      Err(e) => {
        // Plain files cannot be polled; they reach EOF on their own.
        debug!(device = %device_id, error = %e, "Device not pollable, reading as a file");
        let file = tokio::fs::File::open(device_id)
          .await
          .map_err(|e| CameraError::Acquisition {
            device: device_id.to_string(),
            reason: e.to_string(),
          })?;
        spawn_reader(file, device_id.to_string(), events)
      }
    };

    Ok(Box::new(LineTrack {
      reader: Some(reader),
    }))
  }
}

/// Open a tty or FIFO non-blocking and register it with the reactor, so that
/// dropping the reader closes the descriptor with no read left in flight.
fn open_pollable(device_id: &str) -> std::io::Result<pipe::Receiver> {
  let mut options = pipe::OpenOptions::new();
  options.unchecked(true);
  // Holding the write side too keeps a FIFO from reporting EOF between writers.
  #[cfg(target_os = "linux")]
  options.read_write(true);
  options.open_receiver(device_id)
}

fn spawn_reader<R>(
  source: R,
  device: String,
  events: mpsc::UnboundedSender<ScanEvent>,
) -> JoinHandle<()>
where
  R: AsyncRead + Unpin + Send + 'static,
{
  tokio::spawn(async move {
    let mut reader = BufReader::new(source);
    let mut line = Vec::new();
    loop {
      line.clear();
      match reader.read_until(b'\n', &mut line).await {
        Ok(0) => {
          debug!(device = %device, "Scanner stream ended");
          break;
        }
        Ok(_) => {
          let payload = String::from_utf8_lossy(&line);
          if matches!(payload, Cow::Owned(_)) {
            warn!(device = %device, "Scanner sent invalid UTF-8, replacing bad bytes");
          }
          let payload = payload.trim();
          if payload.is_empty() {
            continue;
          }
          if events.send(ScanEvent::Decoded(payload.to_string())).is_err() {
            break;
          }
        }
        Err(e) => {
          warn!(device = %device, error = %e, "Scanner read failed");
          let _ = events.send(ScanEvent::Error(e.to_string()));
          break;
        }
      }
    }
  })
}

/// Stream on a line device. Has no adjustable controls.
struct LineTrack {
  reader: Option<JoinHandle<()>>,
}

#[async_trait]
impl VideoTrack for LineTrack {
  fn capabilities(&self) -> TrackCapabilities {
    TrackCapabilities::default()
  }

  fn settings(&self) -> TrackSettings {
    TrackSettings::default()
  }

  async fn apply_constraints(&mut self, _constraints: &[Constraint]) -> Result<(), CameraError> {
    Err(CameraError::Unsupported(
      "Line scanners have no adjustable controls".into(),
    ))
  }

  async fn stop(&mut self) -> Result<(), CameraError> {
    if let Some(reader) = self.reader.take() {
      reader.abort();
      // Wait for the cancelled reader so the device is closed on return.
      let _ = reader.await;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;
  use std::time::Duration;

  fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("qrscan-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
  }

  #[tokio::test]
  async fn test_lists_configured_then_discovered() {
    let dir = temp_dir("discover");
    std::fs::write(dir.join("usb-Scanner_B"), "").unwrap();
    std::fs::write(dir.join("usb-Scanner_A"), "").unwrap();

    let configured = vec![CameraDescriptor {
      id: "/dev/ttyACM0".into(),
      label: "Desk scanner".into(),
    }];
    let backend = LineDeviceBackend::new(configured, Some(dir.clone()));
    let cameras = backend.list_cameras().await.unwrap();

    let labels: Vec<&str> = cameras.iter().map(|c| c.label.as_str()).collect();
    assert_eq!(labels, vec!["Desk scanner", "usb-Scanner_A", "usb-Scanner_B"]);
    let _ = std::fs::remove_dir_all(&dir);
  }

  #[tokio::test]
  async fn test_missing_discovery_dir_is_empty() {
    let backend = LineDeviceBackend::new(Vec::new(), Some(PathBuf::from("/nonexistent/qrscan")));
    assert!(backend.list_cameras().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_reads_one_payload_per_line() {
    let dir = temp_dir("lines");
    let device = dir.join("scanner");
    std::fs::write(&device, "AB12\r\n\n  \nCD 34\n").unwrap();

    let mut backend = LineDeviceBackend::new(Vec::new(), None);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut track = backend
      .start(&device.to_string_lossy(), tx)
      .await
      .unwrap();

    assert_eq!(rx.recv().await, Some(ScanEvent::Decoded("AB12".into())));
    assert_eq!(rx.recv().await, Some(ScanEvent::Decoded("CD 34".into())));
    assert_eq!(rx.recv().await, None);

    assert_eq!(track.capabilities(), TrackCapabilities::default());
    track.stop().await.unwrap();
    let _ = std::fs::remove_dir_all(&dir);
  }

  #[tokio::test]
  async fn test_open_failure_is_acquisition_error() {
    let mut backend = LineDeviceBackend::new(Vec::new(), None);
    let (tx, _rx) = mpsc::unbounded_channel();
    let err = backend
      .start("/nonexistent/qrscan/tty", tx)
      .await
      .err()
      .unwrap();
    assert!(matches!(err, CameraError::Acquisition { .. }));
  }

  #[tokio::test]
  async fn test_invalid_utf8_line_does_not_end_stream() {
    let dir = temp_dir("latin1");
    let device = dir.join("scanner");
    std::fs::write(&device, b"AB\n\xff\xfeLATIN1\nCD\n").unwrap();

    let mut backend = LineDeviceBackend::new(Vec::new(), None);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut track = backend
      .start(&device.to_string_lossy(), tx)
      .await
      .unwrap();

    assert_eq!(rx.recv().await, Some(ScanEvent::Decoded("AB".into())));
    assert_eq!(
      rx.recv().await,
      Some(ScanEvent::Decoded("\u{FFFD}\u{FFFD}LATIN1".into()))
    );
    assert_eq!(rx.recv().await, Some(ScanEvent::Decoded("CD".into())));
    assert_eq!(rx.recv().await, None);

    track.stop().await.unwrap();
    let _ = std::fs::remove_dir_all(&dir);
  }

  #[tokio::test]
  async fn test_reopened_device_receives_new_lines() {
    let dir = temp_dir("fifo");
    let device = dir.join("scanner");
    let _ = std::fs::remove_file(&device);
    let status = std::process::Command::new("mkfifo")
      .arg(&device)
      .status()
      .unwrap();
    assert!(status.success());
    let id = device.to_string_lossy().to_string();

    let mut backend = LineDeviceBackend::new(Vec::new(), None);
    let (tx, _first_rx) = mpsc::unbounded_channel();
    let mut first = backend.start(&id, tx).await.unwrap();
    first.stop().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut second = backend.start(&id, tx).await.unwrap();
    let mut writer = std::fs::OpenOptions::new()
      .write(true)
      .open(&device)
      .unwrap();
    writer.write_all(b"FIRST\nSECOND\n").unwrap();

    for expected in ["FIRST", "SECOND"] {
      let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap();
      assert_eq!(event, Some(ScanEvent::Decoded(expected.into())));
    }

    second.stop().await.unwrap();
    let _ = std::fs::remove_dir_all(&dir);
  }
}

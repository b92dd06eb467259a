use crossterm::event::{self, Event as CrosstermEvent, KeyEvent};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::camera::ScanEvent;

/// Application events
#[derive(Debug)]
pub enum Event {
  /// Terminal key press
  Key(KeyEvent),
  /// Periodic tick for UI refresh and notice expiry
  Tick,
  /// Output of the active scanning device
  Scan(ScanEvent),
}

/// Event handler that produces events from terminal input and a tick timer
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    let terminal_tx = tx.clone();
    tokio::task::spawn_blocking(move || loop {
      if event::poll(tick_rate).unwrap_or(false) {
        if let Ok(CrosstermEvent::Key(key)) = event::read() {
          if terminal_tx.send(Event::Key(key)).is_err() {
            break;
          }
        }
      } else if terminal_tx.send(Event::Tick).is_err() {
        break;
      }
    });

    Self { tx, rx }
  }

  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

/// Relay a scanning session's events into the application channel. Ends when
/// the device stream is stopped.
pub fn forward_scans(
  mut scans: mpsc::UnboundedReceiver<ScanEvent>,
  tx: mpsc::UnboundedSender<Event>,
) -> tokio::task::JoinHandle<()> {
  tokio::spawn(async move {
    while let Some(scan) = scans.recv().await {
      if tx.send(Event::Scan(scan)).is_err() {
        break;
      }
    }
  })
}

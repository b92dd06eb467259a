//! Scan list session state.
//!
//! A session collects a fixed number of unique decoded payloads under a title.
//! The controller owns the only copy of the session and moves it through
//! `Setup -> Scanning -> Complete`, and back to `Setup` on reset.

pub mod manifest;

use thiserror::Error;
use tracing::{debug, info};

pub use manifest::{export_file_name, parse_manifest, write_manifest, Manifest};

/// Errors reported synchronously to the operator. None of them change state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
  #[error("Please enter a list title")]
  EmptyTitle,

  #[error("Please enter a valid number of devices (got '{0}')")]
  InvalidTargetCount(String),

  #[error("No device {0} in this scan list")]
  UnknownEntry(u32),

  #[error("No scan list has been started")]
  NoSession,
}

/// One collected payload and its 1-based position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
  ordinal: u32,
  pub text: String,
}

impl ScanEntry {
  pub fn ordinal(&self) -> u32 {
    self.ordinal
  }

  /// Skipped slots carry an empty placeholder.
  pub fn is_placeholder(&self) -> bool {
    self.text.is_empty()
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSession {
  pub title: String,
  pub target_count: u32,
  pub entries: Vec<ScanEntry>,
}

impl ScanSession {
  pub fn is_complete(&self) -> bool {
    self.target_count > 0 && self.entries.len() as u32 >= self.target_count
  }

  fn contains_text(&self, text: &str) -> bool {
    self
      .entries
      .iter()
      .any(|e| !e.is_placeholder() && e.text == text)
  }

  fn push(&mut self, text: String) -> u32 {
    let ordinal = self.entries.len() as u32 + 1;
    self.entries.push(ScanEntry { ordinal, text });
    ordinal
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
  #[default]
  Setup,
  Scanning,
  Complete,
}

/// Result of feeding one scan (or skip) into the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
  Accepted { ordinal: u32 },
  DuplicateRejected,
  Ignored,
}

/// Parse the device-count form field. Only positive integers are accepted.
pub fn parse_target_count(input: &str) -> Result<u32, SessionError> {
  match input.trim().parse::<u32>() {
    Ok(n) if n >= 1 => Ok(n),
    _ => Err(SessionError::InvalidTargetCount(input.trim().to_string())),
  }
}

#[derive(Debug, Default)]
pub struct SessionController {
  session: ScanSession,
  phase: SessionPhase,
}

impl SessionController {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn phase(&self) -> SessionPhase {
    self.phase
  }

  pub fn session(&self) -> &ScanSession {
    &self.session
  }

  pub fn is_complete(&self) -> bool {
    self.phase == SessionPhase::Complete
  }

  /// Count of collected entries and the target.
  pub fn progress(&self) -> (u32, u32) {
    (self.session.entries.len() as u32, self.session.target_count)
  }

  /// Fraction of the scan list collected, in `0.0..=1.0`.
  pub fn progress_ratio(&self) -> f64 {
    let (count, target) = self.progress();
    if target == 0 {
      0.0
    } else {
      (count as f64 / target as f64).min(1.0)
    }
  }

  pub fn start_session(&mut self, title: &str, target_count: u32) -> Result<(), SessionError> {
    let title = title.trim();
    if title.is_empty() {
      return Err(SessionError::EmptyTitle);
    }
    if target_count < 1 {
      return Err(SessionError::InvalidTargetCount(target_count.to_string()));
    }

    self.session = ScanSession {
      title: title.to_string(),
      target_count,
      entries: Vec::with_capacity(target_count as usize),
    };
    self.phase = SessionPhase::Scanning;
    info!(title, target_count, "Scan list started");
    Ok(())
  }

  pub fn on_decoded_text(&mut self, text: &str) -> ScanOutcome {
    if self.phase != SessionPhase::Scanning {
      return ScanOutcome::Ignored;
    }

    if !text.is_empty() && self.session.contains_text(text) {
      debug!(text, "Duplicate QR code detected, ignoring");
      return ScanOutcome::DuplicateRejected;
    }

    self.append(text.to_string())
  }

  pub fn skip_current_slot(&mut self) -> ScanOutcome {
    if self.phase != SessionPhase::Scanning {
      return ScanOutcome::Ignored;
    }
    self.append(String::new())
  }

  fn append(&mut self, text: String) -> ScanOutcome {
    // Unreachable with correct sequencing, the phase flips on the last slot.
    if self.session.is_complete() {
      return ScanOutcome::Ignored;
    }

    let ordinal = self.session.push(text);
    if self.session.is_complete() {
      self.phase = SessionPhase::Complete;
      info!(
        title = %self.session.title,
        count = self.session.entries.len(),
        "Scan list complete"
      );
    }
    ScanOutcome::Accepted { ordinal }
  }

  /// Manual correction. Uniqueness is not enforced here.
  pub fn update_entry_text(&mut self, ordinal: u32, new_text: &str) -> Result<(), SessionError> {
    let entry = self
      .session
      .entries
      .iter_mut()
      .find(|e| e.ordinal == ordinal)
      .ok_or(SessionError::UnknownEntry(ordinal))?;
    entry.text = new_text.to_string();
    Ok(())
  }

  pub fn export_session(&self) -> Result<String, SessionError> {
    if self.phase == SessionPhase::Setup {
      return Err(SessionError::NoSession);
    }
    Ok(manifest::to_xml(&self.session))
  }

  /// Drop collected entries and go back to the setup form without forgetting
  /// what was typed there. Used when the camera cannot be acquired or the
  /// operator stops scanning.
  pub fn abandon_scan(&mut self) {
    self.session.entries.clear();
    self.phase = SessionPhase::Setup;
  }

  pub fn reset_session(&mut self) {
    self.session = ScanSession::default();
    self.phase = SessionPhase::Setup;
  }
}

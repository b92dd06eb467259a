use crate::camera::{CameraBackend, CameraCoordinator, CameraError, ScanEvent};
use crate::config::Config;
use crate::event::{forward_scans, Event, EventHandler};
use crate::session::{parse_target_count, write_manifest, ScanOutcome, SessionController};
use crate::ui;
use crate::ui::components::{InputResult, TextInput};
use color_eyre::{eyre::eyre, Result};
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use std::io::{stdout, Stdout};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Field of the setup form that has focus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetupField {
  #[default]
  Title,
  Count,
}

#[derive(Debug, Clone)]
pub struct SetupForm {
  pub title: TextInput,
  pub count: TextInput,
  pub focus: SetupField,
  /// Validation message shown under the form
  pub error: Option<String>,
}

impl Default for SetupForm {
  fn default() -> Self {
    Self {
      title: TextInput::new(),
      count: TextInput::numeric(),
      focus: SetupField::Title,
      error: None,
    }
  }
}

impl SetupForm {
  fn focused_mut(&mut self) -> &mut TextInput {
    match self.focus {
      SetupField::Title => &mut self.title,
      SetupField::Count => &mut self.count,
    }
  }

  fn toggle_focus(&mut self) {
    self.focus = match self.focus {
      SetupField::Title => SetupField::Count,
      SetupField::Count => SetupField::Title,
    };
  }
}

/// View state - each variant owns its data
#[derive(Debug)]
pub enum ViewState {
  Setup(SetupForm),
  /// The form is kept so stopping returns to it unchanged
  Scanning { form: SetupForm, wedge: TextInput },
  Results {
    selected: usize,
    editing: Option<TextInput>,
  },
}

impl Default for ViewState {
  fn default() -> Self {
    ViewState::Setup(SetupForm::default())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
  Info,
  Warning,
}

/// Transient message in the status bar
#[derive(Debug, Clone)]
pub struct Notice {
  pub text: String,
  pub kind: NoticeKind,
  expires_at: Instant,
}

/// Main application state
pub struct App<B: CameraBackend> {
  view: ViewState,
  session: SessionController,
  camera: CameraCoordinator<B>,
  config: Config,

  notice: Option<Notice>,

  /// Blocking error, dismissed with Enter or Esc
  error: Option<String>,

  /// Relays the active device's events into the event loop
  scan_relay: Option<JoinHandle<()>>,

  /// Event sender for async tasks
  event_tx: mpsc::UnboundedSender<Event>,

  should_quit: bool,
}

impl<B: CameraBackend> App<B> {
  pub fn new(config: Config, backend: B) -> Self {
    let (tx, _rx) = mpsc::unbounded_channel();
    let camera = CameraCoordinator::new(backend, config.scanner.zoom);

    Self {
      view: ViewState::default(),
      session: SessionController::new(),
      camera,
      config,
      notice: None,
      error: None,
      scan_relay: None,
      event_tx: tx,
      should_quit: false,
    }
  }

  pub async fn run(&mut self) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = self.event_loop(&mut terminal).await;
    self.stop_scanner().await;

    // Cleanup terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
  }

  async fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    let mut events = EventHandler::new(Duration::from_millis(250));
    self.event_tx = events.sender();

    let found = self.camera.refresh_cameras().await.len();
    info!(devices = found, "Scanner devices enumerated");

    while !self.should_quit {
      terminal.draw(|frame| ui::draw(frame, self))?;

      match events.next().await {
        Some(event) => self.handle_event(event).await?,
        None => return Err(eyre!("Event channel closed")),
      }
    }
    Ok(())
  }

  pub async fn handle_event(&mut self, event: Event) -> Result<()> {
    match event {
      Event::Key(key) => self.handle_key(key).await,
      Event::Tick => self.expire_notice(Instant::now()),
      Event::Scan(ScanEvent::Decoded(text)) => self.handle_decoded(&text).await,
      Event::Scan(ScanEvent::Error(msg)) => {
        warn!(error = %msg, "Scanner stream failed");
        self.stop_scanner().await;
        if matches!(self.view, ViewState::Scanning { .. }) {
          let duration = self.config.scanner.error_notice();
          self.show_notice(format!("Scanner stopped: {}", msg), NoticeKind::Warning, duration);
        }
      }
    }
    Ok(())
  }

  async fn handle_key(&mut self, key: KeyEvent) {
    if key.kind != KeyEventKind::Press {
      return;
    }
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
      self.should_quit = true;
      return;
    }

    if self.error.is_some() {
      if matches!(key.code, KeyCode::Enter | KeyCode::Esc) {
        self.error = None;
      }
      return;
    }

    match self.view {
      ViewState::Setup(_) => self.handle_setup_key(key).await,
      ViewState::Scanning { .. } => self.handle_scanning_key(key).await,
      ViewState::Results { .. } => self.handle_results_key(key).await,
    }
  }

  async fn handle_setup_key(&mut self, key: KeyEvent) {
    let ViewState::Setup(form) = &mut self.view else {
      return;
    };

    let submit = match key.code {
      KeyCode::Esc => {
        self.should_quit = true;
        false
      }
      KeyCode::Tab | KeyCode::BackTab | KeyCode::Up | KeyCode::Down => {
        form.toggle_focus();
        false
      }
      _ => match form.focused_mut().handle_key(key) {
        InputResult::Submitted(_) if form.focus == SetupField::Title => {
          form.focus = SetupField::Count;
          false
        }
        InputResult::Submitted(_) => true,
        _ => false,
      },
    };

    if submit {
      self.begin_scanning().await;
    }
  }

  async fn begin_scanning(&mut self) {
    let ViewState::Setup(form) = &mut self.view else {
      return;
    };

    let started = parse_target_count(form.count.value())
      .and_then(|count| self.session.start_session(form.title.value(), count));
    if let Err(e) = started {
      form.error = Some(e.to_string());
      return;
    }

    form.error = None;
    let form = std::mem::take(form);
    self.view = ViewState::Scanning {
      form,
      wedge: TextInput::new(),
    };
    self.camera.reset_torch_state();
    self.start_camera().await;
  }

  async fn start_camera(&mut self) {
    if self.camera.selected_id().is_none() {
      let duration = self.config.export.success_notice();
      self.show_notice(
        "No scanner device found, type codes or use a keyboard scanner",
        NoticeKind::Info,
        duration,
      );
      return;
    }

    match self.camera.start().await {
      Ok(scans) => self.relay(scans),
      Err(e) => self.acquisition_failed(e),
    }
  }

  fn relay(&mut self, scans: mpsc::UnboundedReceiver<ScanEvent>) {
    if let Some(old) = self.scan_relay.take() {
      old.abort();
    }
    self.scan_relay = Some(forward_scans(scans, self.event_tx.clone()));
  }

  fn acquisition_failed(&mut self, e: CameraError) {
    error!(error = %e, "Error starting scanner");
    self.error = Some(e.to_string());
    self.return_to_setup();
  }

  async fn stop_scanner(&mut self) {
    self.camera.stop().await;
    if let Some(relay) = self.scan_relay.take() {
      relay.abort();
    }
  }

  /// Stop the device and go back to the form, dropping collected entries.
  async fn stop_and_return(&mut self) {
    self.stop_scanner().await;
    self.return_to_setup();
  }

  fn return_to_setup(&mut self) {
    self.session.abandon_scan();
    self.view = match std::mem::take(&mut self.view) {
      ViewState::Scanning { form, .. } => ViewState::Setup(form),
      other => other,
    };
  }

  async fn handle_scanning_key(&mut self, key: KeyEvent) {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
      KeyCode::Esc => self.stop_and_return().await,
      KeyCode::Char('n') if ctrl => {
        let outcome = self.session.skip_current_slot();
        self.after_scan(outcome).await;
      }
      KeyCode::Char('f') if ctrl => self.toggle_torch().await,
      KeyCode::Tab => self.next_camera().await,
      _ => {
        let ViewState::Scanning { wedge, .. } = &mut self.view else {
          return;
        };
        if let InputResult::Submitted(text) = wedge.handle_key(key) {
          wedge.clear();
          self.handle_decoded(&text).await;
        }
      }
    }
  }

  /// Keyboard and device payloads go through the same normalization, so one
  /// code dedups the same way on either path.
  async fn handle_decoded(&mut self, text: &str) {
    let text = text.trim();
    if text.is_empty() {
      return;
    }
    let outcome = self.session.on_decoded_text(text);
    self.after_scan(outcome).await;
  }

  async fn after_scan(&mut self, outcome: ScanOutcome) {
    match outcome {
      ScanOutcome::Accepted { ordinal } => {
        debug!(ordinal, "Scan accepted");
        if self.session.is_complete() {
          self.finish_scanning().await;
        }
      }
      ScanOutcome::DuplicateRejected => {
        let duration = self.config.scanner.duplicate_notice();
        self.show_notice(
          "Duplicate QR code, already scanned",
          NoticeKind::Warning,
          duration,
        );
      }
      ScanOutcome::Ignored => {}
    }
  }

  async fn finish_scanning(&mut self) {
    self.stop_scanner().await;
    self.view = ViewState::Results {
      selected: 0,
      editing: None,
    };
  }

  async fn toggle_torch(&mut self) {
    if !self.config.scanner.torch_control {
      return;
    }
    match self.camera.toggle_torch().await {
      Ok(on) => debug!(on, "Flashlight toggled"),
      Err(e) => self.error = Some(e.to_string()),
    }
  }

  async fn next_camera(&mut self) {
    let Some(id) = self.camera.next_camera_id() else {
      return;
    };
    if self.camera.is_streaming() && self.camera.selected_id() == Some(id.as_str()) {
      return;
    }

    match self.camera.select_camera(&id).await {
      Ok(Some(scans)) => self.relay(scans),
      Ok(None) => self.start_camera().await,
      Err(e) => self.acquisition_failed(e),
    }
  }

  async fn handle_results_key(&mut self, key: KeyEvent) {
    let ViewState::Results { selected, editing } = &mut self.view else {
      return;
    };
    let entries = &self.session.session().entries;

    if let Some(input) = editing {
      match input.handle_key(key) {
        InputResult::Submitted(text) => {
          let ordinal = entries.get(*selected).map(|e| e.ordinal());
          if let Some(ordinal) = ordinal {
            if let Err(e) = self.session.update_entry_text(ordinal, &text) {
              warn!(error = %e, "Entry update rejected");
            }
          }
          *editing = None;
        }
        InputResult::Cancelled => *editing = None,
        _ => {}
      }
      return;
    }

    match key.code {
      KeyCode::Up | KeyCode::Char('k') => move_selection(selected, entries.len(), -1),
      KeyCode::Down | KeyCode::Char('j') => move_selection(selected, entries.len(), 1),
      KeyCode::Enter | KeyCode::Char('e') => {
        if let Some(entry) = entries.get(*selected) {
          *editing = Some(TextInput::with_value(&entry.text));
        }
      }
      KeyCode::Char('s') => self.save_export(),
      KeyCode::Char('r') => self.reset(),
      KeyCode::Char('q') => self.should_quit = true,
      _ => {}
    }
  }

  fn save_export(&mut self) {
    let session = self.session.session();
    let saved = self
      .session
      .export_session()
      .map_err(|e| eyre!("{}", e))
      .and_then(|xml| write_manifest(&self.config.export.dir(), &session.title, &xml));

    match saved {
      Ok(path) => {
        info!(path = %path.display(), "Scan list exported");
        let duration = self.config.export.success_notice();
        self.show_notice("XML file saved successfully!", NoticeKind::Info, duration);
      }
      Err(e) => {
        error!(error = %e, "Export failed");
        self.error = Some(format!("Failed to save XML: {}", e));
      }
    }
  }

  fn reset(&mut self) {
    self.session.reset_session();
    self.camera.reset_torch_state();
    self.view = ViewState::default();
  }

  fn show_notice(&mut self, text: impl Into<String>, kind: NoticeKind, duration: Duration) {
    self.notice = Some(Notice {
      text: text.into(),
      kind,
      expires_at: Instant::now() + duration,
    });
  }

  fn expire_notice(&mut self, now: Instant) {
    if self.notice.as_ref().is_some_and(|n| now >= n.expires_at) {
      self.notice = None;
    }
  }

  // Accessors for UI rendering
  pub fn view(&self) -> &ViewState {
    &self.view
  }

  pub fn session(&self) -> &SessionController {
    &self.session
  }

  pub fn notice(&self) -> Option<&Notice> {
    self.notice.as_ref()
  }

  pub fn error(&self) -> Option<&str> {
    self.error.as_deref()
  }

  pub fn device_label(&self) -> Option<&str> {
    self.camera.selected_label()
  }

  pub fn is_streaming(&self) -> bool {
    self.camera.is_streaming()
  }

  pub fn zoom(&self) -> Option<f64> {
    self.camera.current_zoom()
  }

  pub fn has_multiple_devices(&self) -> bool {
    self.camera.cameras().len() > 1
  }

  /// Flashlight button text, when flashlight control is enabled
  pub fn torch_label(&self) -> Option<&'static str> {
    self
      .config
      .scanner
      .torch_control
      .then(|| self.camera.torch_label())
  }
}

fn move_selection(selected: &mut usize, len: usize, delta: i32) {
  if len > 0 {
    *selected = (*selected as i32 + delta).rem_euclid(len as i32) as usize;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::camera::LineDeviceBackend;
  use crate::config::DeviceConfig;
  use crate::session::{parse_manifest, SessionPhase};
  use std::path::PathBuf;

  fn config() -> Config {
    let mut config = Config::default();
    config.scanner.discover_serial = false;
    config
  }

  fn app_with(config: Config) -> (App<LineDeviceBackend>, mpsc::UnboundedReceiver<Event>) {
    let backend = LineDeviceBackend::new(
      config.scanner.camera_descriptors(),
      config.scanner.discover_dir(),
    );
    let mut app = App::new(config, backend);
    let (tx, rx) = mpsc::unbounded_channel();
    app.event_tx = tx;
    (app, rx)
  }

  fn key(code: KeyCode) -> Event {
    Event::Key(KeyEvent::new(code, KeyModifiers::NONE))
  }

  fn ctrl(c: char) -> Event {
    Event::Key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL))
  }

  async fn press(app: &mut App<LineDeviceBackend>, event: Event) {
    app.handle_event(event).await.unwrap();
  }

  async fn type_line(app: &mut App<LineDeviceBackend>, text: &str) {
    for c in text.chars() {
      press(app, key(KeyCode::Char(c))).await;
    }
    press(app, key(KeyCode::Enter)).await;
  }

  /// Fill the form and start scanning with no device attached.
  async fn start(app: &mut App<LineDeviceBackend>, title: &str, count: &str) {
    type_line(app, title).await;
    type_line(app, count).await;
  }

  fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("qrscan-app-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
  }

  #[tokio::test]
  async fn test_setup_requires_title() {
    let (mut app, _rx) = app_with(config());
    start(&mut app, "   ", "3").await;

    match app.view() {
      ViewState::Setup(form) => {
        assert_eq!(form.error.as_deref(), Some("Please enter a list title"));
      }
      other => panic!("unexpected view {:?}", other),
    }
    assert_eq!(app.session().phase(), SessionPhase::Setup);
  }

  #[tokio::test]
  async fn test_setup_requires_positive_count() {
    let (mut app, _rx) = app_with(config());
    start(&mut app, "Shelf", "0").await;

    let ViewState::Setup(form) = app.view() else {
      panic!("expected setup view");
    };
    assert!(form.error.as_deref().unwrap().starts_with("Please enter a valid number"));
  }

  #[tokio::test]
  async fn test_keyboard_only_scanning() {
    let (mut app, _rx) = app_with(config());
    start(&mut app, "Shelf 4", "3").await;

    assert!(matches!(app.view(), ViewState::Scanning { .. }));
    assert_eq!(app.notice().map(|n| n.kind), Some(NoticeKind::Info));
    assert!(!app.is_streaming());

    for code in ["AA", "BB", "AA"] {
      type_line(&mut app, code).await;
    }
    assert_eq!(app.session().progress(), (2, 3));
    let notice = app.notice().unwrap();
    assert_eq!(notice.kind, NoticeKind::Warning);
    assert!(notice.text.contains("Duplicate"));

    type_line(&mut app, "CC").await;
    assert!(matches!(app.view(), ViewState::Results { .. }));
    let texts: Vec<&str> = app
      .session()
      .session()
      .entries
      .iter()
      .map(|e| e.text.as_str())
      .collect();
    assert_eq!(texts, vec!["AA", "BB", "CC"]);
  }

  #[tokio::test]
  async fn test_skip_fills_placeholders() {
    let (mut app, _rx) = app_with(config());
    start(&mut app, "Shelf", "2").await;

    press(&mut app, ctrl('n')).await;
    press(&mut app, ctrl('n')).await;

    assert!(matches!(app.view(), ViewState::Results { .. }));
    assert!(app.session().session().entries.iter().all(|e| e.is_placeholder()));
  }

  #[tokio::test]
  async fn test_escape_returns_to_filled_form() {
    let (mut app, _rx) = app_with(config());
    start(&mut app, "Shelf", "5").await;
    type_line(&mut app, "AA").await;

    press(&mut app, key(KeyCode::Esc)).await;

    let ViewState::Setup(form) = app.view() else {
      panic!("expected setup view");
    };
    assert_eq!(form.title.value(), "Shelf");
    assert_eq!(form.count.value(), "5");
    assert_eq!(app.session().phase(), SessionPhase::Setup);
    assert!(app.session().session().entries.is_empty());
  }

  #[tokio::test]
  async fn test_edit_save_and_reset() {
    let dir = temp_dir("export");
    let mut cfg = config();
    cfg.export.dir = Some(dir.clone());
    let (mut app, _rx) = app_with(cfg);

    start(&mut app, "Rack", "2").await;
    type_line(&mut app, "AA").await;
    type_line(&mut app, "BB").await;

    press(&mut app, key(KeyCode::Char('j'))).await;
    press(&mut app, key(KeyCode::Enter)).await;
    press(&mut app, key(KeyCode::Backspace)).await;
    press(&mut app, key(KeyCode::Backspace)).await;
    type_line(&mut app, "A&B").await;
    assert_eq!(app.session().session().entries[1].text, "A&B");

    press(&mut app, key(KeyCode::Char('s'))).await;
    assert_eq!(
      app.notice().map(|n| n.text.as_str()),
      Some("XML file saved successfully!")
    );

    let written: Vec<_> = std::fs::read_dir(&dir).unwrap().collect();
    assert_eq!(written.len(), 1);
    let path = written[0].as_ref().unwrap().path();
    let manifest = parse_manifest(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(manifest.title, "Rack");
    assert_eq!(manifest.entries[1].text, "A&B");

    press(&mut app, key(KeyCode::Char('r'))).await;
    assert!(matches!(app.view(), ViewState::Setup(_)));
    assert_eq!(app.session().progress(), (0, 0));
    let _ = std::fs::remove_dir_all(&dir);
  }

  #[tokio::test]
  async fn test_unopenable_device_shows_blocking_error() {
    let mut cfg = config();
    cfg.scanner.devices = vec![DeviceConfig {
      id: "/nonexistent/qrscan/tty".into(),
      label: Some("Desk".into()),
    }];
    let (mut app, _rx) = app_with(cfg);
    app.camera.refresh_cameras().await;

    start(&mut app, "Shelf", "2").await;
    assert!(app.error().unwrap().contains("Please ensure"));
    assert!(matches!(app.view(), ViewState::Setup(_)));

    // blocked until dismissed
    press(&mut app, key(KeyCode::Char('x'))).await;
    assert!(app.error().is_some());
    press(&mut app, key(KeyCode::Enter)).await;
    assert!(app.error().is_none());
  }

  #[tokio::test]
  async fn test_line_device_completes_session() {
    let dir = temp_dir("device");
    let device = dir.join("scanner");
    std::fs::write(&device, "AA\nAA\nBB\n").unwrap();

    let mut cfg = config();
    cfg.scanner.devices = vec![DeviceConfig {
      id: device.to_string_lossy().to_string(),
      label: None,
    }];
    let (mut app, mut rx) = app_with(cfg);
    app.camera.refresh_cameras().await;
    start(&mut app, "Shelf", "2").await;
    assert!(app.is_streaming());

    while !matches!(app.view(), ViewState::Results { .. }) {
      let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
      app.handle_event(event).await.unwrap();
    }

    assert!(!app.is_streaming());
    assert_eq!(app.session().progress(), (2, 2));
    let _ = std::fs::remove_dir_all(&dir);
  }

  #[tokio::test]
  async fn test_notice_expires_on_tick() {
    let mut cfg = config();
    cfg.scanner.duplicate_notice_ms = 0;
    let (mut app, _rx) = app_with(cfg);
    start(&mut app, "Shelf", "3").await;
    type_line(&mut app, "AA").await;
    type_line(&mut app, "AA").await;
    assert!(app.notice().is_some());

    press(&mut app, Event::Tick).await;
    assert!(app.notice().is_none());
  }

  #[tokio::test]
  async fn test_torch_binding_follows_config() {
    let (mut app, _rx) = app_with(config());
    start(&mut app, "Shelf", "3").await;
    press(&mut app, ctrl('f')).await;
    assert!(app.error().is_none());
    assert_eq!(app.torch_label(), None);

    let mut cfg = config();
    cfg.scanner.torch_control = true;
    let (mut app, _rx) = app_with(cfg);
    start(&mut app, "Shelf", "3").await;
    assert_eq!(app.torch_label(), Some("Turn On Flashlight"));
    press(&mut app, ctrl('f')).await;
    assert!(app.error().unwrap().starts_with("Flashlight not available"));
  }

  #[tokio::test]
  async fn test_device_and_keyboard_payloads_dedup_alike() {
    let (mut app, _rx) = app_with(config());
    start(&mut app, "Shelf", "3").await;

    press(&mut app, Event::Scan(ScanEvent::Decoded("  AA \r".into()))).await;
    type_line(&mut app, " AA").await;
    press(&mut app, Event::Scan(ScanEvent::Decoded("   ".into()))).await;

    assert_eq!(app.session().progress(), (1, 3));
    assert_eq!(app.session().session().entries[0].text, "AA");
    assert!(app.notice().unwrap().text.contains("Duplicate"));
  }

  #[tokio::test]
  async fn test_scanner_error_notice_uses_scanner_duration() {
    let mut cfg = config();
    cfg.scanner.error_notice_ms = 0;
    cfg.export.success_notice_ms = 60_000;
    let (mut app, _rx) = app_with(cfg);
    start(&mut app, "Shelf", "3").await;

    press(&mut app, Event::Scan(ScanEvent::Error("device unplugged".into()))).await;
    let notice = app.notice().unwrap();
    assert_eq!(notice.kind, NoticeKind::Warning);
    assert!(notice.text.starts_with("Scanner stopped"));

    press(&mut app, Event::Tick).await;
    assert!(app.notice().is_none());
  }
}

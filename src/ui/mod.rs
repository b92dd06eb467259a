pub mod components;
mod renderfns;
mod views;

use crate::app::{App, NoticeKind, ViewState};
use crate::camera::CameraBackend;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use renderfns::{centered_rect, draw_header, Shortcut};

const SETUP_SHORTCUTS: &[Shortcut] = &[
  Shortcut::new("tab", "next field"),
  Shortcut::new("enter", "start"),
  Shortcut::new("esc", "quit"),
];

const SCANNING_SHORTCUTS: &[Shortcut] = &[
  Shortcut::new("enter", "add"),
  Shortcut::new("ctrl-n", "skip"),
  Shortcut::new("esc", "stop"),
];

const RESULTS_SHORTCUTS: &[Shortcut] = &[
  Shortcut::new("enter", "edit"),
  Shortcut::new("s", "save XML"),
  Shortcut::new("r", "new list"),
  Shortcut::new("q", "quit"),
];

/// Main draw function
pub fn draw<B: CameraBackend>(frame: &mut Frame, app: &App<B>) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([
      Constraint::Length(1), // Header
      Constraint::Min(1),    // Main content
      Constraint::Length(1), // Status bar
    ])
    .split(frame.area());

  let session = app.session().session();
  match app.view() {
    ViewState::Setup(form) => {
      draw_header(frame, chunks[0], "New scan list", SETUP_SHORTCUTS);
      views::draw_setup(frame, chunks[1], form);
    }
    ViewState::Scanning { wedge, .. } => {
      let mut shortcuts = SCANNING_SHORTCUTS.to_vec();
      if app.has_multiple_devices() {
        shortcuts.push(Shortcut::new("tab", "next device"));
      }
      if app.torch_label().is_some() {
        shortcuts.push(Shortcut::new("ctrl-f", "flashlight"));
      }
      draw_header(frame, chunks[0], &session.title, &shortcuts);

      let info = views::ScanningInfo {
        device: app.device_label(),
        streaming: app.is_streaming(),
        zoom: app.zoom(),
        torch_label: app.torch_label(),
      };
      views::draw_scanning(
        frame,
        chunks[1],
        session,
        app.session().progress_ratio(),
        wedge,
        &info,
      );
    }
    ViewState::Results { selected, editing } => {
      draw_header(frame, chunks[0], &session.title, RESULTS_SHORTCUTS);
      views::draw_results(frame, chunks[1], session, *selected, editing.as_ref());
    }
  }

  draw_status_bar(frame, chunks[2], app);

  if let Some(message) = app.error() {
    draw_error(frame, chunks[1], message);
  }
}

fn draw_status_bar<B: CameraBackend>(frame: &mut Frame, area: Rect, app: &App<B>) {
  let (content, style) = match app.notice() {
    Some(notice) => {
      let color = match notice.kind {
        NoticeKind::Info => Color::Green,
        NoticeKind::Warning => Color::Yellow,
      };
      (format!(" {}", notice.text), Style::default().fg(color).bold())
    }
    None => {
      let (count, target) = app.session().progress();
      let hint = match app.view() {
        ViewState::Setup(_) => " Ctrl-C:quit".to_string(),
        _ => format!(" scanned: {} / {}   Ctrl-C:quit", count, target),
      };
      (hint, Style::default().fg(Color::DarkGray))
    }
  };

  let paragraph = Paragraph::new(content).style(style);
  frame.render_widget(paragraph, area);
}

/// Blocking error dialog
fn draw_error(frame: &mut Frame, area: Rect, message: &str) {
  let height = message.lines().count() as u16 + 4;
  let popup = centered_rect(area, 72, height);
  frame.render_widget(Clear, popup);

  let block = Block::default()
    .title(" Error ")
    .title_bottom(Line::from(" Enter: dismiss ").right_aligned())
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Red));

  let paragraph = Paragraph::new(message)
    .block(block)
    .wrap(Wrap { trim: false });
  frame.render_widget(paragraph, popup);
}

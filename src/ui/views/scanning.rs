use crate::session::ScanSession;
use crate::ui::components::TextInput;
use crate::ui::renderfns::truncate;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Gauge, List, ListItem, Paragraph};

use super::input_line;

/// Device details shown next to the progress
pub struct ScanningInfo<'a> {
  pub device: Option<&'a str>,
  pub streaming: bool,
  pub zoom: Option<f64>,
  pub torch_label: Option<&'static str>,
}

pub fn draw_scanning(
  frame: &mut Frame,
  area: Rect,
  session: &ScanSession,
  ratio: f64,
  wedge: &TextInput,
  info: &ScanningInfo,
) {
  let block = Block::default()
    .title(format!(" Scanning: {} ", session.title))
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));
  let inner = block.inner(area);
  frame.render_widget(block, area);

  let rows = Layout::default()
    .direction(Direction::Vertical)
    .constraints([
      Constraint::Length(1), // Progress
      Constraint::Length(1), // Device
      Constraint::Length(1), // Wedge input
      Constraint::Min(0),    // Recent scans
    ])
    .split(inner);

  let gauge = Gauge::default()
    .gauge_style(Style::default().fg(Color::Green).bg(Color::Black))
    .ratio(ratio.clamp(0.0, 1.0))
    .label(format!(
      "scanned: {} / {}",
      session.entries.len(),
      session.target_count
    ));
  frame.render_widget(gauge, rows[0]);

  let device = match (info.device, info.streaming) {
    (Some(label), true) => Span::styled(format!(" {} ", label), Style::default().fg(Color::Green)),
    (Some(label), false) => Span::styled(
      format!(" {} (stopped) ", label),
      Style::default().fg(Color::Yellow),
    ),
    (None, _) => Span::styled(" keyboard input ", Style::default().fg(Color::DarkGray)),
  };
  let mut spans = vec![
    Span::styled(" Device:", Style::default().fg(Color::DarkGray)),
    device,
  ];
  if let Some(zoom) = info.zoom {
    spans.push(Span::styled(
      format!(" zoom {:.1}x", zoom),
      Style::default().fg(Color::DarkGray),
    ));
  }
  if let Some(label) = info.torch_label {
    spans.push(Span::styled(
      format!("  [{}]", label),
      Style::default().fg(Color::Cyan),
    ));
  }
  frame.render_widget(Paragraph::new(Line::from(spans)), rows[1]);

  let (line, cursor) = input_line("Scan", wedge, true, rows[2]);
  frame.render_widget(Paragraph::new(line), rows[2]);
  if let Some(position) = cursor {
    frame.set_cursor_position(position);
  }

  // Most recent first
  let width = rows[3].width.saturating_sub(8) as usize;
  let items: Vec<ListItem> = session
    .entries
    .iter()
    .rev()
    .map(|entry| {
      let text = if entry.is_placeholder() {
        Span::styled("(skipped)", Style::default().fg(Color::DarkGray))
      } else {
        Span::raw(truncate(&entry.text, width))
      };
      ListItem::new(Line::from(vec![
        Span::styled(
          format!("{:>4}  ", entry.ordinal()),
          Style::default().fg(Color::Cyan),
        ),
        text,
      ]))
    })
    .collect();
  frame.render_widget(List::new(items), rows[3]);
}

use crate::app::{SetupField, SetupForm};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph};

use super::input_line;

pub fn draw_setup(frame: &mut Frame, area: Rect, form: &SetupForm) {
  let block = Block::default()
    .title(" New scan list ")
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));
  let inner = block.inner(area);
  frame.render_widget(block, area);

  let rows = Layout::default()
    .direction(Direction::Vertical)
    .constraints([
      Constraint::Length(1), // Spacer
      Constraint::Length(1), // Title
      Constraint::Length(1), // Spacer
      Constraint::Length(1), // Count
      Constraint::Length(1), // Spacer
      Constraint::Length(1), // Error
      Constraint::Min(0),
    ])
    .split(inner);

  let fields = [
    (rows[1], "List title", &form.title, SetupField::Title),
    (rows[3], "Number of devices", &form.count, SetupField::Count),
  ];
  for (row, label, input, field) in fields {
    let (line, cursor) = input_line(label, input, form.focus == field, row);
    frame.render_widget(Paragraph::new(line), row);
    if let Some(position) = cursor {
      frame.set_cursor_position(position);
    }
  }

  if let Some(error) = &form.error {
    let paragraph = Paragraph::new(format!(" {}", error)).style(Style::default().fg(Color::Red));
    frame.render_widget(paragraph, rows[5]);
  }
}

mod results;
mod scanning;
mod setup;

pub use results::draw_results;
pub use scanning::{draw_scanning, ScanningInfo};
pub use setup::draw_setup;

use super::components::TextInput;
use ratatui::prelude::*;

/// `label: value` line for a text input, plus the cursor column when focused.
fn input_line(
  label: &str,
  input: &TextInput,
  focused: bool,
  area: Rect,
) -> (Line<'static>, Option<Position>) {
  let label_style = if focused {
    Style::default().fg(Color::Yellow).bold()
  } else {
    Style::default().fg(Color::DarkGray)
  };
  let prefix = format!(" {}: ", label);
  let cursor = focused.then(|| {
    let x = area.x + (prefix.chars().count() + input.cursor_position()) as u16;
    Position::new(x.min(area.right().saturating_sub(1)), area.y)
  });

  let line = Line::from(vec![
    Span::styled(prefix, label_style),
    Span::styled(input.value().to_string(), Style::default().fg(Color::White)),
  ]);
  (line, cursor)
}

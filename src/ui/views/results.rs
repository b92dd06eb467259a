use crate::session::ScanSession;
use crate::ui::components::TextInput;
use crate::ui::renderfns::truncate;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};

use super::input_line;

pub fn draw_results(
  frame: &mut Frame,
  area: Rect,
  session: &ScanSession,
  selected: usize,
  editing: Option<&TextInput>,
) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([
      Constraint::Min(1),
      Constraint::Length(if editing.is_some() { 3 } else { 0 }),
    ])
    .split(area);

  let block = Block::default()
    .title(format!(
      " Results: {} ({} / {}) ",
      session.title,
      session.entries.len(),
      session.target_count
    ))
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));

  let width = chunks[0].width.saturating_sub(12) as usize;
  let items: Vec<ListItem> = session
    .entries
    .iter()
    .map(|entry| {
      let text = if entry.is_placeholder() {
        Span::styled("(empty)", Style::default().fg(Color::DarkGray))
      } else {
        Span::raw(truncate(&entry.text, width))
      };
      ListItem::new(Line::from(vec![
        Span::styled(
          format!("Device {:<4}", entry.ordinal()),
          Style::default().fg(Color::Cyan),
        ),
        text,
      ]))
    })
    .collect();

  let list = List::new(items)
    .block(block)
    .highlight_style(
      Style::default()
        .bg(Color::DarkGray)
        .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("> ");

  let mut state = ListState::default();
  state.select(Some(selected));
  frame.render_stateful_widget(list, chunks[0], &mut state);

  if let Some(input) = editing {
    let block = Block::default()
      .title(format!(" Edit device {} ", selected + 1))
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Yellow));
    let inner = block.inner(chunks[1]);
    frame.render_widget(block, chunks[1]);

    let (line, cursor) = input_line("Text", input, true, inner);
    frame.render_widget(Paragraph::new(line), inner);
    if let Some(position) = cursor {
      frame.set_cursor_position(position);
    }
  }
}

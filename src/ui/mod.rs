mod renderfns;
mod tree;

use crate::app::{App, Body};
use fieldsync::{OptimisticView, ViewSource};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph};
use renderfns::{draw_footer, draw_header, status_color, truncate};

pub use renderfns::SyncStatus;

/// Main draw function
pub fn draw(frame: &mut Frame, app: &App) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([
      Constraint::Length(1), // Header
      Constraint::Min(1),    // Resource tree
      Constraint::Length(1), // Sync status
    ])
    .split(frame.area());

  draw_header(frame, chunks[0], app.title(), app.remote_url(), app.is_reachable());
  draw_body(frame, chunks[1], app);
  draw_footer(frame, chunks[2], &app.sync_status());
}

fn draw_body(frame: &mut Frame, area: Rect, app: &App) {
  let key = app.key().to_string();
  let (title, lines) = match app.body() {
    Body::Loading => (key, vec![Line::styled("Loading…", Style::default().fg(Color::DarkGray))]),
    Body::Unavailable => (
      key,
      vec![Line::styled(
        "Not available offline: nothing cached yet",
        Style::default().fg(Color::Red),
      )],
    ),
    Body::Failed(message) => (key, vec![Line::styled(message.clone(), Style::default().fg(Color::Red))]),
    Body::Ready(view) => (view_title(&key, view), tree_view(view, area.width)),
  };

  let block = Block::default()
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::DarkGray))
    .title(Span::styled(format!(" {} ", title), Style::default().fg(Color::Cyan).bold()));
  let paragraph = Paragraph::new(lines).block(block).scroll((app.scroll(), 0));
  frame.render_widget(paragraph, area);
}

fn view_title(key: &str, view: &OptimisticView) -> String {
  let mut tags = Vec::new();
  match view.source {
    ViewSource::Network => {}
    ViewSource::Cache => tags.push("cached".to_string()),
    ViewSource::Offline => tags.push("offline copy".to_string()),
  }
  if view.stale {
    tags.push(format!("stale, {}", view.captured_at.format("%Y-%m-%d %H:%M")));
  }
  if view.incomplete {
    tags.push("partial".to_string());
  }
  if view.pending > 0 {
    tags.push(format!("{} pending", view.pending));
  }

  if tags.is_empty() {
    key.to_string()
  } else {
    format!("{} [{}]", key, tags.join(" · "))
  }
}

fn tree_view(view: &OptimisticView, width: u16) -> Vec<Line<'static>> {
  let width = usize::from(width.saturating_sub(4));
  tree::tree_lines(&view.data)
    .into_iter()
    .map(|line| {
      let indent = "  ".repeat(line.depth);
      let text_style = if line.pending {
        Style::default().fg(Color::Yellow).italic()
      } else {
        Style::default().fg(Color::White)
      };

      let mut spans = vec![
        Span::raw(indent),
        Span::styled(truncate(&line.text, width.saturating_sub(line.depth * 2)), text_style),
      ];
      if let Some(status) = &line.status {
        spans.push(Span::styled(
          format!("  {}", status),
          Style::default().fg(status_color(status)),
        ));
      }
      if line.pending {
        spans.push(Span::styled("  ⟳ pending", Style::default().fg(Color::Yellow)));
      }
      Line::from(spans)
    })
    .collect()
}

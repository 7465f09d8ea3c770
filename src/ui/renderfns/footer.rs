use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

/// Everything the footer shows about the write queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
  pub pending: usize,
  pub syncing: bool,
  pub reachable: bool,
  /// Last abandoned write, kept until the next successful drain.
  pub rejection: Option<String>,
  pub notice: Option<String>,
}

/// Queue indicator: syncing wins over the pending count.
pub fn queue_badge(status: &SyncStatus) -> (String, Color) {
  if status.syncing {
    ("⟳ Syncing…".to_string(), Color::Cyan)
  } else if status.pending > 0 && !status.reachable {
    (format!("Offline ({})", status.pending), Color::Red)
  } else if status.pending > 0 {
    (format!("Pending ({})", status.pending), Color::Yellow)
  } else {
    ("✓ Up to date".to_string(), Color::Green)
  }
}

/// Draw the footer bar with the queue indicator and the latest notices
pub fn draw_footer(frame: &mut Frame, area: Rect, status: &SyncStatus) {
  let (badge, color) = queue_badge(status);
  let mut spans = vec![
    Span::raw(" "),
    Span::styled(badge, Style::default().fg(color).bold()),
  ];

  if let Some(rejection) = &status.rejection {
    spans.push(Span::styled(" │ ", Style::default().fg(Color::DarkGray)));
    spans.push(Span::styled(rejection.clone(), Style::default().fg(Color::Red)));
  }
  if let Some(notice) = &status.notice {
    spans.push(Span::styled(" │ ", Style::default().fg(Color::DarkGray)));
    spans.push(Span::styled(notice.clone(), Style::default().fg(Color::DarkGray)));
  }

  let paragraph = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
  frame.render_widget(paragraph, area);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_badge_precedence() {
    let mut status = SyncStatus {
      pending: 2,
      reachable: false,
      ..SyncStatus::default()
    };
    assert_eq!(queue_badge(&status).0, "Offline (2)");

    status.reachable = true;
    assert_eq!(queue_badge(&status).0, "Pending (2)");

    status.syncing = true;
    assert_eq!(queue_badge(&status).1, Color::Cyan);

    let idle = SyncStatus {
      reachable: true,
      ..SyncStatus::default()
    };
    assert_eq!(queue_badge(&idle).1, Color::Green);
  }
}

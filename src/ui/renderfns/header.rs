use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

/// Draw the header bar with logo, context, connectivity and shortcuts
pub fn draw_header(frame: &mut Frame, area: Rect, title: &str, remote_url: &str, reachable: bool) {
  let domain = extract_domain(remote_url);
  let (link, link_style) = if reachable {
    ("● online", Style::default().fg(Color::Green))
  } else {
    ("○ offline", Style::default().fg(Color::Red).bold())
  };

  let header = Line::from(vec![
    Span::styled(" fieldsync ", Style::default().fg(Color::Cyan).bold()),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(format!(" {} ", domain), Style::default().fg(Color::White)),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(format!(" {} ", title), Style::default().fg(Color::Yellow).bold()),
    Span::styled("│ ", Style::default().fg(Color::DarkGray)),
    Span::styled(link, link_style),
    Span::raw("  "),
    // Shortcuts - keys highlighted, descriptions dimmed
    Span::styled("<r>", Style::default().fg(Color::Cyan)),
    Span::styled(" reload", Style::default().fg(Color::DarkGray)),
    Span::raw("   "),
    Span::styled("<s>", Style::default().fg(Color::Cyan)),
    Span::styled(" sync", Style::default().fg(Color::DarkGray)),
    Span::raw("   "),
    Span::styled("<q>", Style::default().fg(Color::Cyan)),
    Span::styled(" quit", Style::default().fg(Color::DarkGray)),
  ]);

  let paragraph = Paragraph::new(header).style(Style::default().bg(Color::Black));

  frame.render_widget(paragraph, area);
}

/// Extract domain from the remote URL
fn extract_domain(url: &str) -> &str {
  url
    .strip_prefix("https://")
    .or_else(|| url.strip_prefix("http://"))
    .unwrap_or(url)
    .split('/')
    .next()
    .unwrap_or(url)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_extract_domain() {
    assert_eq!(
      extract_domain("https://field.example.com/api"),
      "field.example.com"
    );
    assert_eq!(extract_domain("http://localhost:8000/api"), "localhost:8000");
    assert_eq!(extract_domain("field.local"), "field.local");
  }
}

use ratatui::prelude::Color;

/// Truncate a string to a maximum number of characters, adding "..." if
/// truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// Get the display color for a visit or entity status
pub fn status_color(status: &str) -> Color {
  match status {
    "completed" | "closed" | "done" => Color::Green,
    "in_progress" | "started" => Color::Yellow,
    "cancelled" => Color::Red,
    _ => Color::White,
  }
}

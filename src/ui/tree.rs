//! Flatten a resource graph into indented lines for display.

use serde_json::{Map, Value};

use fieldsync::overlay::{is_pending, is_temporary_id};
use fieldsync::registry::node_identity;

const MAX_DEPTH: usize = 12;
const LABEL_FIELDS: [&str; 5] = ["name", "label", "objective", "concern", "title"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeLine {
  pub depth: usize,
  pub text: String,
  pub pending: bool,
  pub status: Option<String>,
}

impl TreeLine {
  fn heading(depth: usize, text: String) -> Self {
    Self {
      depth,
      text,
      pending: false,
      status: None,
    }
  }
}

/// One line per entity, with a heading line above each nested collection.
pub fn tree_lines(graph: &Value) -> Vec<TreeLine> {
  let mut lines = Vec::new();
  push_node(&mut lines, graph, 0);
  lines
}

fn push_node(lines: &mut Vec<TreeLine>, node: &Value, depth: usize) {
  if depth > MAX_DEPTH {
    return;
  }
  match node {
    Value::Array(items) => {
      for item in items {
        push_node(lines, item, depth);
      }
    }
    Value::Object(obj) => {
      lines.push(TreeLine {
        depth,
        text: node_label(node, obj),
        pending: is_pending(node),
        status: obj.get("status").and_then(Value::as_str).map(String::from),
      });
      for (field, value) in obj {
        if field.starts_with('_') || field.starts_with('@') {
          continue;
        }
        match value {
          Value::Array(items) if items.iter().any(Value::is_object) => {
            lines.push(TreeLine::heading(depth + 1, format!("{} ({})", field, items.len())));
            push_node(lines, value, depth + 2);
          }
          Value::Object(_) => {
            lines.push(TreeLine::heading(depth + 1, field.clone()));
            push_node(lines, value, depth + 2);
          }
          _ => {}
        }
      }
    }
    Value::Null => {}
    scalar => lines.push(TreeLine::heading(depth, scalar.to_string())),
  }
}

fn node_label(node: &Value, obj: &Map<String, Value>) -> String {
  let name = LABEL_FIELDS
    .iter()
    .find_map(|field| obj.get(*field).and_then(Value::as_str));
  let id = match node_identity(node) {
    Some(id) if is_temporary_id(&id) => "(new)".to_string(),
    Some(_) => match obj.get("id") {
      Some(Value::String(id)) => format!("#{}", id),
      Some(Value::Number(id)) => format!("#{}", id),
      _ => String::new(),
    },
    None => String::new(),
  };

  match (name, id.is_empty()) {
    (Some(name), false) => format!("{} {}", name, id),
    (Some(name), true) => name.to_string(),
    (None, false) => id,
    (None, true) => "(unnamed)".to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_customer_with_pending_building() {
    let graph = json!({
      "id": "C1",
      "name": "EARL Dupont",
      "buildings": [
        { "@id": "/.well-known/tmp/building/1", "id": "tmp-building-1", "name": "Shed A", "_pending": true },
        { "id": 3, "name": "Shed 3", "status": "active" }
      ]
    });

    let lines = tree_lines(&graph);
    let texts: Vec<(usize, &str)> = lines.iter().map(|l| (l.depth, l.text.as_str())).collect();
    assert_eq!(
      texts,
      vec![
        (0, "EARL Dupont #C1"),
        (1, "buildings (2)"),
        (2, "Shed A (new)"),
        (2, "Shed 3 #3"),
      ]
    );
    assert!(lines[2].pending);
    assert!(!lines[3].pending);
    assert_eq!(lines[3].status.as_deref(), Some("active"));
  }

  #[test]
  fn test_empty_collections_are_hidden() {
    let lines = tree_lines(&json!({ "id": 7, "observations": [] }));
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].text, "#7");
  }
}

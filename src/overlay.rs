//! Optimistic overlay: the cached graph as it will look once the queue has
//! drained.
//!
//! `merge` is pure. It never touches the queue or the cache, and running it
//! again on its own output (or on the stripped output) yields the same graph.

use serde_json::{Map, Value};
use tracing::debug;

use crate::queue::{SyncTask, Verb};
use crate::registry::{link_matches, node_identity, EffectValue, InsertPosition, PathTarget, Registry};

/// Set to `true` on placeholders and on entities with a pending change.
pub const PENDING_MARKER: &str = "_pending";
/// Id of the task behind a pending node (the latest one, for entities touched
/// by several).
pub const PENDING_TASK_FIELD: &str = "_pendingTask";

const TEMP_ID_PREFIX: &str = "tmp-";
const TEMP_IRI_PREFIX: &str = "/.well-known/tmp/";
const MAX_DEPTH: usize = 8;

/// Overlay `tasks` (in queue order) onto `base`, a graph whose top level is
/// of `root_kind`: either one entity or a listing of them.
///
/// - creations become placeholders inside every parent their payload links to
/// - updates are merge-patched onto the targeted entity
/// - actions apply their registered effect to the targeted entity
///
/// Tasks whose target is absent from the graph are skipped.
pub fn merge(base: &Value, root_kind: &str, tasks: &[SyncTask], registry: &Registry) -> Value {
  let mut graph = base.clone();

  for task in tasks {
    let applied = match registry.resolve_path(&task.resource_path) {
      Some(PathTarget::Collection { kind }) if task.verb == Verb::Create => {
        insert_placeholder(&mut graph, root_kind, kind, task, registry)
      }
      Some(PathTarget::Item { kind, id }) if task.verb == Verb::Update => {
        touch(&mut graph, root_kind, kind, &id, registry, |node| {
          merge_patch(node, &task.payload);
          mark_pending(node, task);
        })
      }
      Some(PathTarget::Action { kind, id, action }) => {
        touch(&mut graph, root_kind, kind, &id, registry, |node| {
          apply_action(node, kind, &action, task, registry);
          mark_pending(node, task);
        })
      }
      _ => false,
    };

    if !applied {
      debug!(
        task_id = %task.id,
        path = %task.resource_path,
        "Pending write has no target in this graph"
      );
    }
  }

  graph
}

/// Drop placeholders and pending markers, leaving server-shaped data.
///
/// Effects already applied to real entities stay; merging the same tasks
/// again reapplies them identically.
pub fn strip_pending(graph: &Value) -> Value {
  match graph {
    Value::Array(items) => Value::Array(
      items
        .iter()
        .filter(|item| !is_placeholder(item))
        .map(strip_pending)
        .collect(),
    ),
    Value::Object(obj) => Value::Object(
      obj
        .iter()
        .filter(|(key, _)| key.as_str() != PENDING_MARKER && key.as_str() != PENDING_TASK_FIELD)
        .map(|(key, value)| (key.clone(), strip_pending(value)))
        .collect(),
    ),
    other => other.clone(),
  }
}

pub fn is_pending(node: &Value) -> bool {
  node
    .get(PENDING_MARKER)
    .and_then(Value::as_bool)
    .unwrap_or(false)
}

/// True for ids and IRIs minted for placeholders.
pub fn is_temporary_id(id: &str) -> bool {
  id.starts_with(TEMP_ID_PREFIX) || id.starts_with(TEMP_IRI_PREFIX)
}

/// Number of pending nodes anywhere in the graph.
pub fn count_pending(graph: &Value) -> usize {
  match graph {
    Value::Array(items) => items.iter().map(count_pending).sum(),
    Value::Object(obj) => {
      usize::from(is_pending(graph)) + obj.values().map(count_pending).sum::<usize>()
    }
    _ => 0,
  }
}

/// Temporary id of the placeholder a creation task produces. Derived from
/// the task id, so it is stable for as long as the task is queued.
pub fn temporary_id(kind: &str, task: &SyncTask) -> String {
  format!("{}{}-{}", TEMP_ID_PREFIX, kind, task.id)
}

/// Temporary IRI of the placeholder a creation task produces. Later queued
/// writes may use it as a link to that placeholder.
pub fn temporary_iri(kind: &str, task: &SyncTask) -> String {
  format!("{}{}/{}", TEMP_IRI_PREFIX, kind, task.id)
}

/// Placeholder entity for a creation: registry defaults, then the payload,
/// then identity and pending markers.
pub fn placeholder(kind: &str, task: &SyncTask, registry: &Registry) -> Value {
  let mut node: Map<String, Value> = registry
    .schema(kind)
    .map(|schema| schema.defaults_for(&task.payload))
    .unwrap_or_default();

  if let Some(payload) = task.payload.as_object() {
    for (field, value) in payload {
      node.insert(field.clone(), value.clone());
    }
  }
  node.insert("@id".to_string(), Value::String(temporary_iri(kind, task)));
  node.insert("id".to_string(), Value::String(temporary_id(kind, task)));
  node.insert(PENDING_MARKER.to_string(), Value::Bool(true));
  node.insert(
    PENDING_TASK_FIELD.to_string(),
    Value::String(task.id.to_string()),
  );
  Value::Object(node)
}

fn is_placeholder(node: &Value) -> bool {
  is_pending(node) && node_identity(node).is_some_and(|id| is_temporary_id(&id))
}

fn insert_placeholder(
  graph: &mut Value,
  root_kind: &str,
  kind: &str,
  task: &SyncTask,
  registry: &Registry,
) -> bool {
  let Some(schema) = registry.schema(kind) else {
    return false;
  };
  let node = placeholder(kind, task, registry);
  let mut hits = 0;

  for link in &schema.parent_links {
    let Some(parent_ref) = task.payload.get(&link.field) else {
      continue;
    };
    hits += walk(graph, root_kind, registry, 0, &mut |node_kind, parent| {
      if node_kind != link.parent_kind || !link_matches(parent_ref, parent) {
        return 0;
      }
      usize::from(insert_into(parent, &link.collection, node.clone(), link.position))
    });
  }

  // A listing of the created kind shows it too, newest first.
  if root_kind == kind {
    if let Some(items) = graph.as_array_mut() {
      if upsert(items, node, InsertPosition::Front) {
        hits += 1;
      }
    }
  }

  hits > 0
}

/// Apply `change` to every entity of `kind` whose identity matches `id`.
fn touch(
  graph: &mut Value,
  root_kind: &str,
  kind: &str,
  id: &str,
  registry: &Registry,
  mut change: impl FnMut(&mut Value),
) -> bool {
  let target = Value::String(id.to_string());
  let hits = walk(graph, root_kind, registry, 0, &mut |node_kind, node| {
    if node_kind != kind || !link_matches(&target, node) {
      return 0;
    }
    change(node);
    1
  });
  hits > 0
}

fn apply_action(node: &mut Value, kind: &str, action: &str, task: &SyncTask, registry: &Registry) {
  let Some(rule) = registry.action(kind, action) else {
    debug!(kind, action, "No effect registered for action");
    return;
  };
  let Some(obj) = node.as_object_mut() else {
    return;
  };
  for (field, effect) in &rule.effect {
    let value = match effect {
      EffectValue::Literal(value) => value.clone(),
      EffectValue::EnqueuedAt => Value::String(task.enqueued_at.to_rfc3339()),
    };
    obj.insert(field.clone(), value);
  }
}

fn mark_pending(node: &mut Value, task: &SyncTask) {
  if let Some(obj) = node.as_object_mut() {
    obj.insert(PENDING_MARKER.to_string(), Value::Bool(true));
    obj.insert(
      PENDING_TASK_FIELD.to_string(),
      Value::String(task.id.to_string()),
    );
  }
}

/// JSON merge-patch (RFC 7386): objects merge recursively, `null` removes.
fn merge_patch(target: &mut Value, patch: &Value) {
  let Some(patch) = patch.as_object() else {
    *target = patch.clone();
    return;
  };
  if !target.is_object() {
    *target = Value::Object(Map::new());
  }
  let Some(obj) = target.as_object_mut() else {
    return;
  };
  for (field, value) in patch {
    if value.is_null() {
      obj.remove(field);
    } else {
      merge_patch(obj.entry(field.clone()).or_insert(Value::Null), value);
    }
  }
}

fn insert_into(parent: &mut Value, collection: &str, node: Value, position: InsertPosition) -> bool {
  let Some(obj) = parent.as_object_mut() else {
    return false;
  };
  let slot = obj
    .entry(collection.to_string())
    .or_insert_with(|| Value::Array(Vec::new()));
  if slot.is_null() {
    *slot = Value::Array(Vec::new());
  }
  match slot.as_array_mut() {
    Some(items) => upsert(items, node, position),
    None => false,
  }
}

/// Insert `node`, or replace the sibling with the same identity.
fn upsert(items: &mut Vec<Value>, node: Value, position: InsertPosition) -> bool {
  let identity = node_identity(&node);
  if let Some(existing) = items
    .iter_mut()
    .find(|item| identity.is_some() && node_identity(item) == identity)
  {
    *existing = node;
    return true;
  }
  match position {
    InsertPosition::Front => items.insert(0, node),
    InsertPosition::Back => items.push(node),
  }
  true
}

/// Visit every entity reachable through registry relations, typed by kind.
/// Returns the sum of what `visit` returned.
fn walk(
  node: &mut Value,
  kind: &str,
  registry: &Registry,
  depth: usize,
  visit: &mut dyn FnMut(&str, &mut Value) -> usize,
) -> usize {
  if depth > MAX_DEPTH {
    return 0;
  }
  if let Some(items) = node.as_array_mut() {
    return items
      .iter_mut()
      .map(|item| walk(item, kind, registry, depth, visit))
      .sum();
  }
  if !node.is_object() {
    return 0;
  }

  let mut hits = visit(kind, node);
  let Some(schema) = registry.schema(kind) else {
    return hits;
  };
  for relation in &schema.relations {
    if let Some(child) = node.get_mut(&relation.field) {
      hits += walk(child, &relation.kind, registry, depth + 1, visit);
    }
  }
  hits
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::queue::NewTask;
  use serde_json::json;

  fn task(verb: Verb, path: &str, payload: Value) -> SyncTask {
    SyncTask::stamp(NewTask::new(verb, path, payload))
  }

  fn customer() -> Value {
    json!({
      "@id": "/api/customers/C1",
      "id": "C1",
      "name": "EARL Dupont",
      "buildings": [
        { "@id": "/api/buildings/3", "id": 3, "name": "Shed 3", "flocks": [
          { "@id": "/api/flocks/5", "id": 5, "name": "Batch 5", "observations": [] }
        ] }
      ]
    })
  }

  fn visit() -> Value {
    json!({
      "@id": "/api/visits/7",
      "id": 7,
      "status": "in_progress",
      "closed": false,
      "observations": [{ "@id": "/api/observations/1", "id": 1 }],
      "customer": customer()
    })
  }

  #[test]
  fn test_no_tasks_is_identity() {
    let registry = Registry::field_visits();
    let base = customer();
    assert_eq!(merge(&base, "customer", &[], &registry), base);
  }

  #[test]
  fn test_created_building_appears_first_under_customer() {
    let registry = Registry::field_visits();
    let shed = task(
      Verb::Create,
      "/buildings",
      json!({ "customer": "C1", "name": "Shed A" }),
    );

    let graph = merge(&customer(), "customer", &[shed], &registry);
    let buildings = graph["buildings"].as_array().unwrap();

    assert_eq!(buildings.len(), 2);
    assert_eq!(buildings[0]["name"], "Shed A");
    assert!(is_pending(&buildings[0]));
    assert!(is_temporary_id(buildings[0]["id"].as_str().unwrap()));
    assert_eq!(buildings[0]["flocks"], json!([]));
    assert_eq!(buildings[0]["activated"], true);
    assert_eq!(buildings[1]["id"], 3);
    assert!(!is_pending(&buildings[1]));
  }

  #[test]
  fn test_most_recent_creation_first() {
    let registry = Registry::field_visits();
    let tasks = vec![
      task(Verb::Create, "/buildings", json!({ "customer": "/api/customers/C1", "name": "A" })),
      task(Verb::Create, "/buildings", json!({ "customer": "/api/customers/C1", "name": "B" })),
    ];

    let graph = merge(&customer(), "customer", &tasks, &registry);
    let names: Vec<&str> = graph["buildings"]
      .as_array()
      .unwrap()
      .iter()
      .map(|b| b["name"].as_str().unwrap())
      .collect();
    assert_eq!(names, vec!["B", "A", "Shed 3"]);
  }

  #[test]
  fn test_nested_flock_is_appended() {
    let registry = Registry::field_visits();
    let flock = task(
      Verb::Create,
      "/flocks",
      json!({ "building": "/api/buildings/3", "name": "Batch 6" }),
    );

    let graph = merge(&customer(), "customer", &[flock], &registry);
    let flocks = graph["buildings"][0]["flocks"].as_array().unwrap();
    assert_eq!(flocks.len(), 2);
    assert_eq!(flocks[0]["id"], 5);
    assert_eq!(flocks[1]["name"], "Batch 6");
    assert_eq!(flocks[1]["observations"], json!([]));
  }

  #[test]
  fn test_child_of_pending_parent_nests_inside_placeholder() {
    let registry = Registry::field_visits();
    let shed = task(
      Verb::Create,
      "/buildings",
      json!({ "customer": "C1", "name": "Shed A" }),
    );
    let batch = task(
      Verb::Create,
      "/flocks",
      json!({ "building": temporary_iri("building", &shed), "name": "Batch 1" }),
    );

    let graph = merge(&customer(), "customer", &[shed, batch], &registry);
    let placeholder = &graph["buildings"][0];
    assert_eq!(placeholder["name"], "Shed A");
    assert_eq!(placeholder["flocks"][0]["name"], "Batch 1");
    assert!(is_pending(&placeholder["flocks"][0]));
  }

  #[test]
  fn test_observation_lands_in_visit_and_flock() {
    let registry = Registry::field_visits();
    let observation = task(
      Verb::Create,
      "/observations",
      json!({ "visit": "/api/visits/7", "flock": "/api/flocks/5", "concern": "Litter" }),
    );

    let graph = merge(&visit(), "visit", &[observation], &registry);
    assert_eq!(graph["observations"][0]["concern"], "Litter");
    assert_eq!(graph["observations"][1]["id"], 1);
    assert_eq!(
      graph["customer"]["buildings"][0]["flocks"][0]["observations"][0]["concern"],
      "Litter"
    );
    assert_eq!(count_pending(&graph), 2);
  }

  #[test]
  fn test_close_action_applies_effect() {
    let registry = Registry::field_visits();
    let close = task(Verb::Action, "/visits/7/close", json!({}));
    let enqueued_at = close.enqueued_at.to_rfc3339();

    let graph = merge(&visit(), "visit", &[close], &registry);
    assert_eq!(graph["closed"], true);
    assert_eq!(graph["status"], "completed");
    assert_eq!(graph["completedAt"], enqueued_at);
    assert!(is_pending(&graph));
    assert_eq!(graph["observations"].as_array().unwrap().len(), 1);
  }

  #[test]
  fn test_update_merges_payload() {
    let registry = Registry::field_visits();
    let rename = task(
      Verb::Update,
      "/buildings/3",
      json!({ "name": "Shed Three", "flocks": null }),
    );

    let graph = merge(&customer(), "customer", &[rename], &registry);
    let building = &graph["buildings"][0];
    assert_eq!(building["name"], "Shed Three");
    assert!(building.get("flocks").is_none());
    assert!(is_pending(building));
    assert!(!is_pending(&graph));
  }

  #[test]
  fn test_unmatched_tasks_are_skipped() {
    let registry = Registry::field_visits();
    let tasks = vec![
      task(Verb::Create, "/buildings", json!({ "customer": "C2", "name": "Elsewhere" })),
      task(Verb::Action, "/visits/99/close", json!({})),
      task(Verb::Create, "/audit_logs", json!({ "action": "SYNC_ERROR" })),
    ];
    let base = customer();
    assert_eq!(merge(&base, "customer", &tasks, &registry), base);
  }

  #[test]
  fn test_merge_is_idempotent() {
    let registry = Registry::field_visits();
    let tasks = vec![
      task(Verb::Create, "/buildings", json!({ "customer": "C1", "name": "Shed A" })),
      task(Verb::Create, "/flocks", json!({ "building": "/api/buildings/3", "name": "Batch 6" })),
      task(Verb::Update, "/flocks/5", json!({ "name": "Batch 5b" })),
    ];

    let once = merge(&customer(), "customer", &tasks, &registry);
    assert_eq!(merge(&strip_pending(&once), "customer", &tasks, &registry), once);
    assert_eq!(merge(&once, "customer", &tasks, &registry), once);
  }

  #[test]
  fn test_listing_root_shows_creation_first() {
    let registry = Registry::field_visits();
    let listing = json!([{ "id": 3, "name": "Shed 3" }]);
    let shed = task(
      Verb::Create,
      "/buildings",
      json!({ "customer": "C1", "name": "Shed A" }),
    );

    let graph = merge(&listing, "building", &[shed], &registry);
    assert_eq!(graph[0]["name"], "Shed A");
    assert_eq!(graph[1]["id"], 3);
  }

  #[test]
  fn test_pending_visit_starts_with_visit_defaults() {
    let registry = Registry::field_visits();
    let listing = json!([{ "id": 7, "status": "completed", "closed": true }]);
    let draft = task(Verb::Create, "/visits", json!({ "customer": "/api/customers/C1" }));
    let planned = task(
      Verb::Create,
      "/visits",
      json!({ "customer": "/api/customers/C1", "plannedAt": "2026-10-20T08:00:00Z", "objective": "Pesée" }),
    );

    let graph = merge(&listing, "visit", &[draft, planned], &registry);
    let newest = &graph[0];
    assert_eq!(newest["status"], "planned");
    assert_eq!(newest["objective"], "Pesée");
    assert_eq!(newest["closed"], false);
    assert_eq!(newest["activated"], true);
    assert_eq!(newest["observations"], json!([]));

    let oldest = &graph[1];
    assert_eq!(oldest["status"], "draft");
    assert_eq!(oldest["objective"], "RAS");
    assert_eq!(graph[2]["id"], 7);
  }

  #[test]
  fn test_strip_pending_restores_server_shape() {
    let registry = Registry::field_visits();
    let base = customer();
    let shed = task(
      Verb::Create,
      "/buildings",
      json!({ "customer": "C1", "name": "Shed A" }),
    );
    let graph = merge(&base, "customer", &[shed], &registry);
    assert_eq!(strip_pending(&graph), base);
    assert_eq!(count_pending(&strip_pending(&graph)), 0);
  }
}

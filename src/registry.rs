//! Resource registry: how resource kinds nest inside each other and which
//! payload field of a new resource points at its parent.
//!
//! The overlay merger and the derived-cache fallback are written once against
//! this table instead of once per entity kind.

use serde_json::{Map, Value};

/// Where a pending creation lands in its parent's collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
  /// Newest first (top-level creations).
  Front,
  /// After existing siblings (nested children keep enumeration order).
  Back,
}

/// A field of a resource that holds other resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
  pub field: String,
  pub kind: String,
  pub many: bool,
}

/// Linking key from a new resource's payload to an existing parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
  /// Payload field carrying the parent's IRI or id.
  pub field: String,
  pub parent_kind: String,
  /// Collection field on the parent receiving the placeholder.
  pub collection: String,
  pub position: InsertPosition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSchema {
  pub kind: String,
  /// Collection path on the remote service, e.g. `/buildings`.
  pub endpoint: String,
  pub relations: Vec<Relation>,
  pub parent_links: Vec<ParentLink>,
  /// Fields every placeholder of this kind starts with.
  pub placeholder_defaults: Map<String, Value>,
  /// `(trigger, field, value)`: `field` defaults to `value` when the payload
  /// carries a non-null `trigger`.
  pub conditional_defaults: Vec<(String, String, Value)>,
}

impl ResourceSchema {
  pub fn new(kind: &str, endpoint: &str) -> Self {
    Self {
      kind: kind.to_string(),
      endpoint: endpoint.to_string(),
      relations: Vec::new(),
      parent_links: Vec::new(),
      placeholder_defaults: Map::new(),
      conditional_defaults: Vec::new(),
    }
  }

  pub fn has_many(mut self, field: &str, kind: &str) -> Self {
    self.relations.push(Relation {
      field: field.to_string(),
      kind: kind.to_string(),
      many: true,
    });
    self
  }

  pub fn has_one(mut self, field: &str, kind: &str) -> Self {
    self.relations.push(Relation {
      field: field.to_string(),
      kind: kind.to_string(),
      many: false,
    });
    self
  }

  pub fn links_to(
    mut self,
    field: &str,
    parent_kind: &str,
    collection: &str,
    position: InsertPosition,
  ) -> Self {
    self.parent_links.push(ParentLink {
      field: field.to_string(),
      parent_kind: parent_kind.to_string(),
      collection: collection.to_string(),
      position,
    });
    self
  }

  pub fn default_field(mut self, field: &str, value: Value) -> Self {
    self.placeholder_defaults.insert(field.to_string(), value);
    self
  }

  pub fn default_when(mut self, trigger: &str, field: &str, value: Value) -> Self {
    self
      .conditional_defaults
      .push((trigger.to_string(), field.to_string(), value));
    self
  }

  /// Starting fields of a placeholder built from `payload`, before the
  /// payload itself is laid over them.
  pub fn defaults_for(&self, payload: &Value) -> Map<String, Value> {
    let mut fields = self.placeholder_defaults.clone();
    for (trigger, field, value) in &self.conditional_defaults {
      if payload.get(trigger).is_some_and(|v| !v.is_null()) {
        fields.insert(field.clone(), value.clone());
      }
    }
    fields
  }

  pub fn relation(&self, field: &str) -> Option<&Relation> {
    self.relations.iter().find(|r| r.field == field)
  }
}

/// Value written by an action's "as if applied" effect.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectValue {
  Literal(Value),
  /// The task's enqueue time, RFC 3339.
  EnqueuedAt,
}

/// State transition triggered by `{endpoint}/{id}/{action}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRule {
  pub kind: String,
  pub action: String,
  pub effect: Vec<(String, EffectValue)>,
}

/// What a resource path addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathTarget<'a> {
  Collection { kind: &'a str },
  Item { kind: &'a str, id: String },
  Action { kind: &'a str, id: String, action: String },
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
  schemas: Vec<ResourceSchema>,
  actions: Vec<ActionRule>,
}

impl Registry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_schema(mut self, schema: ResourceSchema) -> Self {
    self.schemas.push(schema);
    self
  }

  pub fn with_action(mut self, kind: &str, action: &str, effect: Vec<(&str, EffectValue)>) -> Self {
    self.actions.push(ActionRule {
      kind: kind.to_string(),
      action: action.to_string(),
      effect: effect
        .into_iter()
        .map(|(field, value)| (field.to_string(), value))
        .collect(),
    });
    self
  }

  /// The field-visit domain: customers own buildings, buildings own flocks,
  /// visits reference a customer and collect observations.
  pub fn field_visits() -> Self {
    use serde_json::json;

    Self::new()
      .with_schema(ResourceSchema::new("customer", "/customers").has_many("buildings", "building"))
      .with_schema(
        ResourceSchema::new("building", "/buildings")
          .has_many("flocks", "flock")
          .links_to("customer", "customer", "buildings", InsertPosition::Front)
          .default_field("flocks", json!([]))
          .default_field("activated", json!(true)),
      )
      .with_schema(
        ResourceSchema::new("flock", "/flocks")
          .has_many("observations", "observation")
          .links_to("building", "building", "flocks", InsertPosition::Back)
          .default_field("observations", json!([])),
      )
      .with_schema(
        ResourceSchema::new("visit", "/visits")
          .has_one("customer", "customer")
          .has_many("observations", "observation")
          .default_field("status", json!("draft"))
          .default_field("closed", json!(false))
          .default_field("activated", json!(true))
          .default_field("objective", json!("RAS"))
          .default_field("completedAt", Value::Null)
          .default_field("observations", json!([]))
          .default_when("plannedAt", "status", json!("planned")),
      )
      .with_schema(
        ResourceSchema::new("observation", "/observations")
          .links_to("visit", "visit", "observations", InsertPosition::Front)
          .links_to("flock", "flock", "observations", InsertPosition::Front),
      )
      .with_action(
        "visit",
        "close",
        vec![
          ("closed", EffectValue::Literal(json!(true))),
          ("completedAt", EffectValue::EnqueuedAt),
          ("status", EffectValue::Literal(json!("completed"))),
        ],
      )
      .with_action(
        "visit",
        "start",
        vec![
          ("visitedAt", EffectValue::EnqueuedAt),
          ("status", EffectValue::Literal(json!("in_progress"))),
        ],
      )
  }

  pub fn schema(&self, kind: &str) -> Option<&ResourceSchema> {
    self.schemas.iter().find(|s| s.kind == kind)
  }

  pub fn schemas(&self) -> impl Iterator<Item = &ResourceSchema> {
    self.schemas.iter()
  }

  pub fn action(&self, kind: &str, action: &str) -> Option<&ActionRule> {
    self
      .actions
      .iter()
      .find(|a| a.kind == kind && a.action == action)
  }

  /// Resolve a resource path such as `/visits/7/close`.
  ///
  /// A leading `/api` segment is accepted so IRIs resolve too.
  pub fn resolve_path(&self, path: &str) -> Option<PathTarget<'_>> {
    let path = path.split('?').next().unwrap_or(path);
    let trimmed = path.strip_prefix("/api").unwrap_or(path);
    let mut segments = trimmed.trim_matches('/').split('/').filter(|s| !s.is_empty());

    let endpoint = format!("/{}", segments.next()?);
    let schema = self.schemas.iter().find(|s| s.endpoint == endpoint)?;
    let kind = schema.kind.as_str();

    match (segments.next(), segments.next(), segments.next()) {
      (None, _, _) => Some(PathTarget::Collection { kind }),
      (Some(id), None, _) => Some(PathTarget::Item {
        kind,
        id: id.to_string(),
      }),
      (Some(id), Some(action), None) => Some(PathTarget::Action {
        kind,
        id: id.to_string(),
        action: action.to_string(),
      }),
      _ => None,
    }
  }

  /// Blank out nested collections, leaving the shape a listing response
  /// would have: `visit.observations` and `visit.customer.buildings` become
  /// empty arrays.
  pub fn strip_nested(&self, kind: &str, node: &mut Value) {
    self.strip_nested_at(kind, node, 0);
  }

  fn strip_nested_at(&self, kind: &str, node: &mut Value, depth: usize) {
    const MAX_DEPTH: usize = 8;
    if depth > MAX_DEPTH {
      return;
    }
    let (Some(schema), Some(obj)) = (self.schema(kind), node.as_object_mut()) else {
      return;
    };

    for relation in &schema.relations {
      if relation.many {
        obj.insert(relation.field.clone(), Value::Array(Vec::new()));
      } else if let Some(child) = obj.get_mut(&relation.field) {
        self.strip_nested_at(&relation.kind, child, depth + 1);
      }
    }
  }
}

/// Identity of a node: its IRI (`@id`) when present, else `id`.
pub fn node_identity(node: &Value) -> Option<String> {
  node
    .get("@id")
    .and_then(scalar_key)
    .or_else(|| node.get("id").and_then(scalar_key))
}

/// True when a link value from a payload designates `node`.
///
/// Links may carry either the IRI or the bare id, so both are compared.
pub fn link_matches(link: &Value, node: &Value) -> bool {
  let Some(link) = scalar_key(link) else {
    return false;
  };
  ["@id", "id"].iter().any(|field| {
    node
      .get(*field)
      .and_then(scalar_key)
      .is_some_and(|own| own == link)
  })
}

/// String form of a scalar id (`"7"` for both `7` and `"7"`).
pub fn scalar_key(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Object(obj) => obj.get("@id").and_then(scalar_key),
    _ => None,
  }
}

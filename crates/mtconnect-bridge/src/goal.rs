//! Static goal schemas and payload construction.

#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::error::DispatchError;
use crate::names::data_item_name;
use crate::snapshot::{first_text, SnapshotSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Float,
    Integer,
    Bool,
}

impl FieldKind {
    pub(crate) fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "text" | "string" => Some(Self::Text),
            "float" | "double" => Some(Self::Float),
            "integer" | "int" => Some(Self::Integer),
            "bool" | "boolean" => Some(Self::Bool),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Float => "float",
            Self::Integer => "integer",
            Self::Bool => "bool",
        }
    }

    /// Parses raw text into a value of this kind.
    #[must_use]
    pub fn value_from(self, text: &str) -> Option<GoalValue> {
        let trimmed = text.trim();
        match self {
            Self::Text => Some(GoalValue::Text(SmolStr::new(trimmed))),
            Self::Float => trimmed.parse::<f64>().ok().map(GoalValue::Float),
            Self::Integer => trimmed.parse::<i64>().ok().map(GoalValue::Integer),
            Self::Bool => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "1" => Some(GoalValue::Bool(true)),
                "false" | "0" => Some(GoalValue::Bool(false)),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GoalValue {
    Text(SmolStr),
    Float(f64),
    Integer(i64),
    Bool(bool),
}

impl GoalValue {
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Text(text) => serde_json::Value::String(text.to_string()),
            Self::Float(value) => serde_json::json!(value),
            Self::Integer(value) => serde_json::json!(value),
            Self::Bool(value) => serde_json::Value::Bool(*value),
        }
    }
}

impl fmt::Display for GoalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Float(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub key: SmolStr,
    pub kind: FieldKind,
    /// Fixed value used for every field after the first.
    pub default: Option<SmolStr>,
}

/// Goal layout of one action, resolved once from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalSchema {
    pub namespace: SmolStr,
    pub action: SmolStr,
    pub goal_element: SmolStr,
    pub fields: Vec<FieldSpec>,
    pub result_field: Option<SmolStr>,
}

impl GoalSchema {
    #[must_use]
    pub fn data_item(&self) -> SmolStr {
        data_item_name(&self.action)
    }
}

/// One goal, fields bound positionally to the schema of `action`.
#[derive(Debug, Clone, PartialEq)]
pub struct GoalPayload {
    action: SmolStr,
    fields: Vec<(SmolStr, GoalValue)>,
}

impl GoalPayload {
    #[must_use]
    pub fn new(action: impl Into<SmolStr>, fields: Vec<(SmolStr, GoalValue)>) -> Self {
        Self {
            action: action.into(),
            fields,
        }
    }

    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    #[must_use]
    pub fn fields(&self) -> &[(SmolStr, GoalValue)] {
        &self.fields
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .fields
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoalRegistry {
    schemas: IndexMap<SmolStr, GoalSchema>,
}

impl GoalRegistry {
    #[must_use]
    pub fn new(schemas: impl IntoIterator<Item = GoalSchema>) -> Self {
        Self {
            schemas: schemas
                .into_iter()
                .map(|schema| (schema.action.clone(), schema))
                .collect(),
        }
    }

    #[must_use]
    pub fn get(&self, action: &str) -> Option<&GoalSchema> {
        self.schemas.get(action)
    }

    /// Watched action names in configuration order.
    #[must_use]
    pub fn actions(&self) -> Vec<SmolStr> {
        self.schemas.keys().cloned().collect()
    }

    pub fn schemas(&self) -> impl Iterator<Item = &GoalSchema> {
        self.schemas.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Builds a fresh goal: `seed` fills the first field, every later field
    /// takes its configured default.
    pub fn build(&self, action: &str, seed: &str) -> Result<GoalPayload, DispatchError> {
        let schema = self
            .get(action)
            .ok_or_else(|| DispatchError::UnknownAction(SmolStr::new(action)))?;
        let values = std::iter::once(SmolStr::new(seed))
            .chain(
                schema
                    .fields
                    .iter()
                    .skip(1)
                    .filter_map(|field| field.default.clone()),
            )
            .collect::<Vec<_>>();
        if values.len() != schema.fields.len() {
            return Err(DispatchError::SchemaMismatch {
                action: schema.action.clone(),
                expected: schema.fields.len(),
                found: values.len(),
            });
        }
        let fields = schema
            .fields
            .iter()
            .zip(values)
            .map(|(field, raw)| {
                field
                    .kind
                    .value_from(&raw)
                    .map(|value| (field.key.clone(), value))
                    .ok_or_else(|| DispatchError::InvalidField {
                        action: schema.action.clone(),
                        field: field.key.clone(),
                        value: raw.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(GoalPayload::new(schema.action.clone(), fields))
    }
}

/// Produces a fresh goal for an action that was just requested.
pub trait GoalSource: Send {
    fn goal_for(&self, action: &str) -> Result<GoalPayload, DispatchError>;
}

/// Builds goals from the agent's current document at dispatch time.
pub struct CurrentGoalSource<S> {
    source: S,
    registry: Arc<GoalRegistry>,
    namespace: SmolStr,
}

impl<S: SnapshotSource> CurrentGoalSource<S> {
    pub fn new(source: S, registry: Arc<GoalRegistry>, namespace: impl Into<SmolStr>) -> Self {
        Self {
            source,
            registry,
            namespace: namespace.into(),
        }
    }
}

impl<S: SnapshotSource + Send> GoalSource for CurrentGoalSource<S> {
    fn goal_for(&self, action: &str) -> Result<GoalPayload, DispatchError> {
        let schema = self
            .registry
            .get(action)
            .ok_or_else(|| DispatchError::UnknownAction(SmolStr::new(action)))?;
        let document = self
            .source
            .current_snapshot()
            .map_err(|err| DispatchError::Snapshot(SmolStr::new(err.to_string())))?;
        let seed = first_text(&document, &self.namespace, &schema.goal_element)
            .map_err(|err| DispatchError::Snapshot(SmolStr::new(err.to_string())))?
            .ok_or_else(|| DispatchError::GoalElementMissing {
                action: schema.action.clone(),
                element: schema.goal_element.clone(),
            })?;
        self.registry.build(action, &seed)
    }
}

#[cfg(test)]
pub(crate) fn material_load_schema() -> GoalSchema {
    GoalSchema {
        namespace: SmolStr::new("mtconnect_msgs"),
        action: SmolStr::new("MaterialLoad"),
        goal_element: SmolStr::new("MaterialType"),
        fields: vec![
            FieldSpec {
                key: SmolStr::new("material"),
                kind: FieldKind::Text,
                default: None,
            },
            FieldSpec {
                key: SmolStr::new("length"),
                kind: FieldKind::Float,
                default: Some(SmolStr::new("32.2")),
            },
            FieldSpec {
                key: SmolStr::new("diameter"),
                kind: FieldKind::Float,
                default: Some(SmolStr::new("7.4")),
            },
        ],
        result_field: None,
    }
}

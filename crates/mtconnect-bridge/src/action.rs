//! Remote action capability: readiness, goal submission and results.

#![allow(missing_docs)]

mod http;
mod simulated;

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::error::DispatchError;
use crate::goal::{GoalPayload, GoalSchema};

pub use http::{HttpActionClient, HttpActionConnector};
pub use simulated::{SimulatedActionClient, SimulatedActionConnector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalStatus {
    Pending,
    Active,
    Succeeded,
    Aborted,
    Rejected,
    Preempted,
}

impl GoalStatus {
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "succeeded" => Some(Self::Succeeded),
            "aborted" => Some(Self::Aborted),
            "rejected" => Some(Self::Rejected),
            "preempted" => Some(Self::Preempted),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Succeeded => "succeeded",
            Self::Aborted => "aborted",
            Self::Rejected => "rejected",
            Self::Preempted => "preempted",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Active)
    }
}

/// Result fields of a finished goal, in the order the server reported them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionResult {
    fields: IndexMap<SmolStr, SmolStr>,
}

impl ActionResult {
    #[must_use]
    pub fn new(fields: impl IntoIterator<Item = (SmolStr, SmolStr)>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    /// Flattens a JSON object; non-string values keep their JSON rendering.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Self {
        let Some(map) = value.as_object() else {
            return match value {
                serde_json::Value::Null => Self::default(),
                other => Self::new([(SmolStr::new("result"), json_text(other))]),
            };
        };
        Self::new(
            map.iter()
                .map(|(key, value)| (SmolStr::new(key), json_text(value))),
        )
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(SmolStr::as_str)
    }

    /// The named field when given, else the first one.
    #[must_use]
    pub fn text(&self, field: Option<&str>) -> Option<&str> {
        match field {
            Some(field) => self.get(field),
            None => self.fields.values().next().map(SmolStr::as_str),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

fn json_text(value: &serde_json::Value) -> SmolStr {
    match value {
        serde_json::Value::String(text) => SmolStr::new(text),
        other => SmolStr::new(other.to_string()),
    }
}

/// Client side of one remote action, created fresh for every dispatch.
pub trait ActionClient {
    /// Blocks until the action server accepts goals.
    fn wait_for_server(&mut self) -> Result<(), DispatchError>;
    /// Submits `goal`; `on_accepted` runs once the server has taken it.
    fn send_goal(
        &mut self,
        goal: &GoalPayload,
        on_accepted: &mut dyn FnMut(),
    ) -> Result<(), DispatchError>;
    /// Blocks until the goal reaches a terminal status.
    fn wait_for_result(&mut self) -> Result<GoalStatus, DispatchError>;
    fn get_result(&mut self) -> Result<ActionResult, DispatchError>;
}

pub trait ActionConnector: Send {
    fn connect(&self, schema: &GoalSchema) -> Result<Box<dyn ActionClient>, DispatchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parsing_and_terminality() {
        assert_eq!(GoalStatus::parse("SUCCEEDED"), Some(GoalStatus::Succeeded));
        assert_eq!(GoalStatus::parse("lost"), None);
        assert!(!GoalStatus::Active.is_terminal());
        assert!(GoalStatus::Aborted.is_terminal());
    }

    #[test]
    fn result_text_prefers_named_field() {
        let result = ActionResult::from_json(&serde_json::json!({
            "outcome": "LOADED",
            "cycles": 3
        }));
        assert_eq!(result.text(None), Some("LOADED"));
        assert_eq!(result.text(Some("cycles")), Some("3"));
        assert_eq!(result.text(Some("missing")), None);
    }

    #[test]
    fn scalar_result_becomes_single_field() {
        let result = ActionResult::from_json(&serde_json::json!("DONE"));
        assert_eq!(result.text(None), Some("DONE"));
        assert!(ActionResult::from_json(&serde_json::Value::Null).is_empty());
    }
}

//! Action dispatch: one goal, start to finish, against the remote server.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Instant;

use smol_str::SmolStr;
use tracing::{info, warn};

use crate::action::{ActionConnector, GoalStatus};
use crate::adapter::{publish, EventSink};
use crate::error::DispatchError;
use crate::goal::{GoalPayload, GoalRegistry};

const STATE_ACTIVE: &str = "ACTIVE";

/// Runs a goal to completion and returns the text reported for it.
pub trait Dispatch: Send {
    fn dispatch(
        &mut self,
        goal: &GoalPayload,
        sink: &mut dyn EventSink,
    ) -> Result<SmolStr, DispatchError>;
}

pub struct ActionDispatcher {
    connector: Box<dyn ActionConnector>,
    registry: Arc<GoalRegistry>,
    announce_active: bool,
}

impl ActionDispatcher {
    pub fn new(
        connector: Box<dyn ActionConnector>,
        registry: Arc<GoalRegistry>,
        announce_active: bool,
    ) -> Self {
        Self {
            connector,
            registry,
            announce_active,
        }
    }
}

impl Dispatch for ActionDispatcher {
    fn dispatch(
        &mut self,
        goal: &GoalPayload,
        sink: &mut dyn EventSink,
    ) -> Result<SmolStr, DispatchError> {
        let schema = self
            .registry
            .get(goal.action())
            .ok_or_else(|| DispatchError::UnknownAction(SmolStr::new(goal.action())))?;
        if goal.len() != schema.fields.len() {
            return Err(DispatchError::SchemaMismatch {
                action: schema.action.clone(),
                expected: schema.fields.len(),
                found: goal.len(),
            });
        }

        let started = Instant::now();
        info!(action = %schema.action, namespace = %schema.namespace, "dispatching action");
        let mut client = self.connector.connect(schema)?;
        client.wait_for_server()?;

        let data_item = schema.data_item();
        let announce_active = self.announce_active;
        client.send_goal(goal, &mut || {
            if announce_active {
                publish(&mut *sink, &data_item, STATE_ACTIVE);
            }
        })?;

        let status = client.wait_for_result()?;
        if !matches!(status, GoalStatus::Succeeded) {
            warn!(action = %schema.action, status = status.as_str(), "action did not succeed");
            return Err(DispatchError::Rejected {
                action: schema.action.clone(),
                status: SmolStr::new(status.as_str()),
            });
        }

        let result = client.get_result()?;
        let text = result
            .text(schema.result_field.as_deref())
            .map(SmolStr::new)
            .ok_or_else(|| DispatchError::remote(&schema.action, "result carries no value"))?;
        info!(
            action = %schema.action,
            result = %text,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "action finished"
        );
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionClient, ActionResult, SimulatedActionConnector};
    use crate::adapter::RecordingSink;
    use crate::goal::{material_load_schema, GoalSchema, GoalValue};

    struct FixedConnector {
        status: GoalStatus,
        result: ActionResult,
    }

    struct FixedClient {
        status: GoalStatus,
        result: ActionResult,
    }

    impl ActionConnector for FixedConnector {
        fn connect(&self, _schema: &GoalSchema) -> Result<Box<dyn ActionClient>, DispatchError> {
            Ok(Box::new(FixedClient {
                status: self.status,
                result: self.result.clone(),
            }))
        }
    }

    impl ActionClient for FixedClient {
        fn wait_for_server(&mut self) -> Result<(), DispatchError> {
            Ok(())
        }

        fn send_goal(
            &mut self,
            _goal: &GoalPayload,
            on_accepted: &mut dyn FnMut(),
        ) -> Result<(), DispatchError> {
            on_accepted();
            Ok(())
        }

        fn wait_for_result(&mut self) -> Result<GoalStatus, DispatchError> {
            Ok(self.status)
        }

        fn get_result(&mut self) -> Result<ActionResult, DispatchError> {
            Ok(self.result.clone())
        }
    }

    fn registry() -> Arc<GoalRegistry> {
        Arc::new(GoalRegistry::new([material_load_schema()]))
    }

    fn goal(registry: &GoalRegistry) -> GoalPayload {
        registry.build("MaterialLoad", "STEEL").expect("goal")
    }

    #[test]
    fn successful_dispatch_returns_first_result_field() {
        let registry = registry();
        let mut dispatcher = ActionDispatcher::new(
            Box::new(SimulatedActionConnector::new("LOADED")),
            Arc::clone(&registry),
            false,
        );
        let mut sink = RecordingSink::default();
        let text = dispatcher
            .dispatch(&goal(&registry), &mut sink)
            .expect("dispatch");
        assert_eq!(text, "LOADED");
        assert!(sink.updates().is_empty());
    }

    #[test]
    fn announce_active_emits_intermediate_state() {
        let registry = registry();
        let mut dispatcher = ActionDispatcher::new(
            Box::new(SimulatedActionConnector::new("LOADED")),
            Arc::clone(&registry),
            true,
        );
        let mut sink = RecordingSink::default();
        dispatcher
            .dispatch(&goal(&registry), &mut sink)
            .expect("dispatch");
        assert_eq!(sink.updates(), vec![("material_load".into(), "ACTIVE".into())]);
        assert_eq!(sink.transactions(), 1);
    }

    #[test]
    fn payload_with_wrong_field_count_is_rejected_before_connecting() {
        let registry = registry();
        let mut dispatcher = ActionDispatcher::new(
            Box::new(SimulatedActionConnector::new("LOADED")),
            Arc::clone(&registry),
            true,
        );
        let short = GoalPayload::new(
            "MaterialLoad",
            vec![(SmolStr::new("material"), GoalValue::Text("STEEL".into()))],
        );
        let mut sink = RecordingSink::default();
        let err = dispatcher.dispatch(&short, &mut sink).expect_err("mismatch");
        assert_eq!(
            err,
            DispatchError::SchemaMismatch {
                action: SmolStr::new("MaterialLoad"),
                expected: 3,
                found: 1,
            }
        );
        assert!(sink.updates().is_empty());
    }

    #[test]
    fn aborted_goal_is_a_dispatch_error() {
        let registry = registry();
        let mut dispatcher = ActionDispatcher::new(
            Box::new(FixedConnector {
                status: GoalStatus::Aborted,
                result: ActionResult::default(),
            }),
            Arc::clone(&registry),
            false,
        );
        let err = dispatcher
            .dispatch(&goal(&registry), &mut RecordingSink::default())
            .expect_err("aborted");
        assert_eq!(
            err,
            DispatchError::Rejected {
                action: SmolStr::new("MaterialLoad"),
                status: SmolStr::new("aborted"),
            }
        );
    }

    #[test]
    fn empty_result_is_a_dispatch_error() {
        let registry = registry();
        let mut dispatcher = ActionDispatcher::new(
            Box::new(FixedConnector {
                status: GoalStatus::Succeeded,
                result: ActionResult::default(),
            }),
            Arc::clone(&registry),
            false,
        );
        let err = dispatcher
            .dispatch(&goal(&registry), &mut RecordingSink::default())
            .expect_err("empty");
        assert!(matches!(err, DispatchError::Remote { .. }));
    }

    #[test]
    fn configured_result_field_is_used() {
        let mut schema = material_load_schema();
        schema.result_field = Some(SmolStr::new("outcome"));
        let registry = Arc::new(GoalRegistry::new([schema]));
        let mut dispatcher = ActionDispatcher::new(
            Box::new(FixedConnector {
                status: GoalStatus::Succeeded,
                result: ActionResult::new([
                    (SmolStr::new("cycles"), SmolStr::new("2")),
                    (SmolStr::new("outcome"), SmolStr::new("LOADED")),
                ]),
            }),
            Arc::clone(&registry),
            false,
        );
        let text = dispatcher
            .dispatch(&goal(&registry), &mut RecordingSink::default())
            .expect("dispatch");
        assert_eq!(text, "LOADED");
    }
}

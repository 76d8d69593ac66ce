//! In-process action server stand-in for bench runs without a robot.

use smol_str::SmolStr;
use tracing::info;

use super::{ActionClient, ActionConnector, ActionResult, GoalStatus};
use crate::error::DispatchError;
use crate::goal::{GoalPayload, GoalSchema};

/// Accepts every goal and succeeds immediately with a fixed result.
#[derive(Debug, Clone)]
pub struct SimulatedActionConnector {
    result: SmolStr,
}

impl SimulatedActionConnector {
    #[must_use]
    pub fn new(result: impl Into<SmolStr>) -> Self {
        Self {
            result: result.into(),
        }
    }
}

impl ActionConnector for SimulatedActionConnector {
    fn connect(&self, schema: &GoalSchema) -> Result<Box<dyn ActionClient>, DispatchError> {
        Ok(Box::new(SimulatedActionClient {
            action: schema.action.clone(),
            result_field: schema
                .result_field
                .clone()
                .unwrap_or_else(|| SmolStr::new("result")),
            result: self.result.clone(),
            submitted: false,
        }))
    }
}

pub struct SimulatedActionClient {
    action: SmolStr,
    result_field: SmolStr,
    result: SmolStr,
    submitted: bool,
}

impl ActionClient for SimulatedActionClient {
    fn wait_for_server(&mut self) -> Result<(), DispatchError> {
        Ok(())
    }

    fn send_goal(
        &mut self,
        goal: &GoalPayload,
        on_accepted: &mut dyn FnMut(),
    ) -> Result<(), DispatchError> {
        let fields = goal
            .fields()
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(", ");
        info!(action = %self.action, %fields, "simulated goal accepted");
        self.submitted = true;
        on_accepted();
        Ok(())
    }

    fn wait_for_result(&mut self) -> Result<GoalStatus, DispatchError> {
        if !self.submitted {
            return Err(DispatchError::remote(&self.action, "no goal submitted"));
        }
        Ok(GoalStatus::Succeeded)
    }

    fn get_result(&mut self) -> Result<ActionResult, DispatchError> {
        Ok(ActionResult::new([(
            self.result_field.clone(),
            self.result.clone(),
        )]))
    }
}

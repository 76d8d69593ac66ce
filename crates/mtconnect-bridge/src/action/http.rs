//! JSON-over-HTTP action gateway client.
//!
//! Endpoints, relative to the configured server:
//! - `GET  /actions/<name>`            200 once the action server is up
//! - `POST /actions/<name>/goals`      `{"goal": {..}}` -> `{"id": ".."}`
//! - `GET  /actions/<name>/goals/<id>` `{"status": "..", "result": {..}}`

use std::thread;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use smol_str::SmolStr;
use tracing::{debug, info};

use super::{ActionClient, ActionConnector, ActionResult, GoalStatus};
use crate::error::DispatchError;
use crate::goal::{GoalPayload, GoalSchema};

pub struct HttpActionConnector {
    agent: ureq::Agent,
    server: String,
    poll: Duration,
}

impl HttpActionConnector {
    #[must_use]
    pub fn new(server: &str, poll: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(Duration::from_secs(5))
                .build(),
            server: server.trim_end_matches('/').to_string(),
            poll,
        }
    }
}

impl ActionConnector for HttpActionConnector {
    fn connect(&self, schema: &GoalSchema) -> Result<Box<dyn ActionClient>, DispatchError> {
        Ok(Box::new(HttpActionClient {
            agent: self.agent.clone(),
            action: schema.action.clone(),
            url: format!("{}/actions/{}", self.server, schema.action),
            poll: self.poll,
            goal_id: None,
            finished: None,
        }))
    }
}

pub struct HttpActionClient {
    agent: ureq::Agent,
    action: SmolStr,
    url: String,
    poll: Duration,
    goal_id: Option<String>,
    finished: Option<GoalDocument>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: serde_json::Value,
    status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GoalDocument {
    status: String,
    #[serde(default)]
    result: serde_json::Value,
}

impl HttpActionClient {
    fn remote(&self, message: impl std::fmt::Display) -> DispatchError {
        DispatchError::remote(&self.action, message)
    }

    fn goal_url(&self) -> Result<String, DispatchError> {
        let id = self
            .goal_id
            .as_deref()
            .ok_or_else(|| self.remote("no goal submitted"))?;
        Ok(format!("{}/goals/{id}", self.url))
    }
}

impl ActionClient for HttpActionClient {
    fn wait_for_server(&mut self) -> Result<(), DispatchError> {
        info!(action = %self.action, url = %self.url, "waiting for action server");
        loop {
            match self.agent.get(&self.url).call() {
                Ok(response) if response.status() == 200 => {
                    info!(action = %self.action, "action server available");
                    return Ok(());
                }
                Ok(response) => {
                    debug!(
                        action = %self.action,
                        status = response.status(),
                        "action server not ready"
                    );
                }
                Err(err) => {
                    debug!(action = %self.action, %err, "action server not reachable");
                }
            }
            thread::sleep(self.poll);
        }
    }

    fn send_goal(
        &mut self,
        goal: &GoalPayload,
        on_accepted: &mut dyn FnMut(),
    ) -> Result<(), DispatchError> {
        let body = json!({ "goal": goal.to_json() }).to_string();
        let response = self
            .agent
            .post(&format!("{}/goals", self.url))
            .set("Content-Type", "application/json")
            .send_string(&body)
            .map_err(|err| self.remote(format!("submit goal: {err}")))?;
        let submitted: SubmitResponse = serde_json::from_reader(response.into_reader())
            .map_err(|err| self.remote(format!("invalid submit response: {err}")))?;
        if let Some(status) = submitted.status.as_deref().and_then(GoalStatus::parse) {
            if matches!(status, GoalStatus::Rejected) {
                return Err(DispatchError::Rejected {
                    action: self.action.clone(),
                    status: SmolStr::new(status.as_str()),
                });
            }
        }
        let id = match submitted.id {
            serde_json::Value::String(id) => id,
            other => other.to_string(),
        };
        info!(action = %self.action, goal_id = %id, "goal accepted");
        self.goal_id = Some(id);
        on_accepted();
        Ok(())
    }

    fn wait_for_result(&mut self) -> Result<GoalStatus, DispatchError> {
        let url = self.goal_url()?;
        loop {
            let response = self
                .agent
                .get(&url)
                .call()
                .map_err(|err| self.remote(format!("poll goal: {err}")))?;
            let document: GoalDocument = serde_json::from_reader(response.into_reader())
                .map_err(|err| self.remote(format!("invalid goal document: {err}")))?;
            let status = GoalStatus::parse(&document.status)
                .ok_or_else(|| self.remote(format!("unknown goal status '{}'", document.status)))?;
            if status.is_terminal() {
                debug!(action = %self.action, status = status.as_str(), "goal finished");
                self.finished = Some(document);
                return Ok(status);
            }
            thread::sleep(self.poll);
        }
    }

    fn get_result(&mut self) -> Result<ActionResult, DispatchError> {
        let document = self
            .finished
            .as_ref()
            .ok_or_else(|| self.remote("result requested before goal finished"))?;
        Ok(ActionResult::from_json(&document.result))
    }
}

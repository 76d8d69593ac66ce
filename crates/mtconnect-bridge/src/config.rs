//! Bridge configuration loading.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use smol_str::SmolStr;

use crate::error::BridgeError;
use crate::goal::{FieldKind, FieldSpec, GoalRegistry, GoalSchema};
use crate::snapshot::DEFAULT_STREAMS_NAMESPACE;

pub const DEFAULT_SIMULATED_RESULT: &str = "COMPLETE";

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub agent: AgentConfig,
    pub adapter: AdapterConfig,
    pub log_level: SmolStr,
    pub dispatch: DispatchConfig,
    pub actions: GoalRegistry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub url: SmolStr,
    pub device: Option<SmolStr>,
    pub namespace: SmolStr,
    pub interval_ms: u64,
    pub count: u64,
}

impl AgentConfig {
    /// Base URL for `current` and `sample` requests, device prefix included.
    #[must_use]
    pub fn base_url(&self) -> String {
        let url = self.url.trim_end_matches('/');
        match self.device.as_deref() {
            Some(device) => format!("{url}/{}", device.trim_matches('/')),
            None => url.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub listen: SmolStr,
    pub heartbeat_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    pub announce_active: bool,
    pub server: Option<SmolStr>,
    pub poll_ms: u64,
    pub simulated_result: SmolStr,
}

impl BridgeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            BridgeError::InvalidConfig(format!("{}: {err}", path.display()).into())
        })?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("bridge.toml");
        parse_bridge_toml_from_text(&text, file_name)
    }
}

pub fn validate_bridge_toml_text(text: &str) -> Result<(), BridgeError> {
    parse_bridge_toml_from_text(text, "bridge.toml").map(|_| ())
}

pub fn parse_bridge_toml_from_text(
    text: &str,
    file_name: &str,
) -> Result<BridgeConfig, BridgeError> {
    let raw: BridgeToml = toml::from_str(text)
        .map_err(|err| BridgeError::InvalidConfig(format!("{file_name}: {err}").into()))?;
    raw.into_config()
        .map_err(|err| prefix_invalid_config(file_name, err))
}

fn prefix_invalid_config(file_name: &str, err: BridgeError) -> BridgeError {
    match err {
        BridgeError::InvalidConfig(message) => {
            BridgeError::InvalidConfig(format!("{file_name}: {message}").into())
        }
        other => other,
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BridgeToml {
    agent: AgentSection,
    adapter: Option<AdapterSection>,
    log: Option<LogSection>,
    dispatch: Option<DispatchSection>,
    actions: IndexMap<String, IndexMap<String, ActionSection>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AgentSection {
    url: String,
    device: Option<String>,
    namespace: Option<String>,
    interval_ms: Option<u64>,
    count: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AdapterSection {
    listen: Option<String>,
    heartbeat_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LogSection {
    level: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DispatchSection {
    announce_active: Option<bool>,
    server: Option<String>,
    poll_ms: Option<u64>,
    simulated_result: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ActionSection {
    goal_element: String,
    fields: Vec<FieldSection>,
    result_field: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FieldSection {
    key: String,
    kind: String,
    default: Option<toml::Value>,
}

impl BridgeToml {
    fn into_config(self) -> Result<BridgeConfig, BridgeError> {
        let agent = self.agent.into_config()?;

        let adapter_section = self.adapter.unwrap_or(AdapterSection {
            listen: Some("0.0.0.0:7878".into()),
            heartbeat_ms: Some(10_000),
        });
        let listen = adapter_section
            .listen
            .unwrap_or_else(|| "0.0.0.0:7878".into());
        if listen.trim().is_empty() {
            return Err(BridgeError::InvalidConfig(
                "adapter.listen must not be empty".into(),
            ));
        }
        let heartbeat_ms = adapter_section.heartbeat_ms.unwrap_or(10_000);
        if heartbeat_ms == 0 {
            return Err(BridgeError::InvalidConfig(
                "adapter.heartbeat_ms must be >= 1".into(),
            ));
        }

        let log_level = self
            .log
            .map_or_else(|| "info".to_string(), |log| log.level);
        if log_level.trim().is_empty() {
            return Err(BridgeError::InvalidConfig(
                "log.level must not be empty".into(),
            ));
        }

        let dispatch_section = self.dispatch.unwrap_or(DispatchSection {
            announce_active: None,
            server: None,
            poll_ms: None,
            simulated_result: None,
        });
        let poll_ms = dispatch_section.poll_ms.unwrap_or(100);
        if poll_ms == 0 {
            return Err(BridgeError::InvalidConfig(
                "dispatch.poll_ms must be >= 1".into(),
            ));
        }
        let server = dispatch_section.server.and_then(|server| {
            let trimmed = server.trim().trim_end_matches('/');
            if trimmed.is_empty() {
                None
            } else {
                Some(SmolStr::new(trimmed))
            }
        });
        if server
            .as_deref()
            .is_some_and(|server| !is_http_url(server))
        {
            return Err(BridgeError::InvalidConfig(
                "dispatch.server must be an http(s) URL".into(),
            ));
        }

        let actions = actions_into_registry(self.actions)?;

        Ok(BridgeConfig {
            agent,
            adapter: AdapterConfig {
                listen: SmolStr::new(listen),
                heartbeat_ms,
            },
            log_level: SmolStr::new(log_level),
            dispatch: DispatchConfig {
                announce_active: dispatch_section.announce_active.unwrap_or(false),
                server,
                poll_ms,
                simulated_result: SmolStr::new(
                    dispatch_section
                        .simulated_result
                        .unwrap_or_else(|| DEFAULT_SIMULATED_RESULT.into()),
                ),
            },
            actions,
        })
    }
}

impl AgentSection {
    fn into_config(self) -> Result<AgentConfig, BridgeError> {
        let url = self.url.trim().trim_end_matches('/').to_string();
        if !is_http_url(&url) {
            return Err(BridgeError::InvalidConfig(
                format!("agent.url must be an http(s) URL, got '{}'", self.url).into(),
            ));
        }
        let interval_ms = self.interval_ms.unwrap_or(1000);
        if interval_ms == 0 {
            return Err(BridgeError::InvalidConfig(
                "agent.interval_ms must be >= 1".into(),
            ));
        }
        let count = self.count.unwrap_or(1000);
        if count == 0 {
            return Err(BridgeError::InvalidConfig(
                "agent.count must be >= 1".into(),
            ));
        }
        let namespace = self
            .namespace
            .unwrap_or_else(|| DEFAULT_STREAMS_NAMESPACE.into());
        if namespace.trim().is_empty() {
            return Err(BridgeError::InvalidConfig(
                "agent.namespace must not be empty".into(),
            ));
        }
        Ok(AgentConfig {
            url: SmolStr::new(url),
            device: self.device.and_then(|device| {
                let trimmed = device.trim().trim_matches('/');
                if trimmed.is_empty() {
                    None
                } else {
                    Some(SmolStr::new(trimmed))
                }
            }),
            namespace: SmolStr::new(namespace.trim()),
            interval_ms,
            count,
        })
    }
}

fn actions_into_registry(
    actions: IndexMap<String, IndexMap<String, ActionSection>>,
) -> Result<GoalRegistry, BridgeError> {
    let mut seen = HashSet::new();
    let mut schemas = Vec::new();
    for (namespace, entries) in actions {
        if namespace.trim().is_empty() {
            return Err(BridgeError::InvalidConfig(
                "actions namespace must not be empty".into(),
            ));
        }
        for (action, section) in entries {
            if action.trim().is_empty() {
                return Err(BridgeError::InvalidConfig(
                    format!("actions.{namespace}: action name must not be empty").into(),
                ));
            }
            if !seen.insert(action.clone()) {
                return Err(BridgeError::InvalidConfig(
                    format!("action '{action}' is configured more than once").into(),
                ));
            }
            schemas.push(section.into_schema(&namespace, &action)?);
        }
    }
    if schemas.is_empty() {
        return Err(BridgeError::InvalidConfig(
            "at least one action must be configured".into(),
        ));
    }
    Ok(GoalRegistry::new(schemas))
}

impl ActionSection {
    fn into_schema(self, namespace: &str, action: &str) -> Result<GoalSchema, BridgeError> {
        let prefix = format!("actions.{namespace}.{action}");
        if self.goal_element.trim().is_empty() {
            return Err(BridgeError::InvalidConfig(
                format!("{prefix}.goal_element must not be empty").into(),
            ));
        }
        if self.fields.is_empty() {
            return Err(BridgeError::InvalidConfig(
                format!("{prefix}.fields must not be empty").into(),
            ));
        }
        let mut keys = HashSet::new();
        let fields = self
            .fields
            .into_iter()
            .enumerate()
            .map(|(index, field)| {
                if field.key.trim().is_empty() {
                    return Err(BridgeError::InvalidConfig(
                        format!("{prefix}.fields[].key must not be empty").into(),
                    ));
                }
                if !keys.insert(field.key.clone()) {
                    return Err(BridgeError::InvalidConfig(
                        format!("{prefix}: duplicate field '{}'", field.key).into(),
                    ));
                }
                let kind = FieldKind::parse(&field.kind).ok_or_else(|| {
                    BridgeError::InvalidConfig(
                        format!("{prefix}.{}: invalid kind '{}'", field.key, field.kind).into(),
                    )
                })?;
                // The first field is seeded from goal_element; later ones
                // only ever take their default.
                let key = field.key.trim();
                if index == 0 && field.default.is_some() {
                    return Err(BridgeError::InvalidConfig(
                        format!("{prefix}.{key}: seeded from goal_element, takes no default")
                            .into(),
                    ));
                }
                if index > 0 && field.default.is_none() {
                    return Err(BridgeError::InvalidConfig(
                        format!("{prefix}.{key}: default is required after the first field")
                            .into(),
                    ));
                }
                let default = field
                    .default
                    .map(|value| default_text(&prefix, &field.key, kind, &value))
                    .transpose()?;
                Ok(FieldSpec {
                    key: SmolStr::new(field.key.trim()),
                    kind,
                    default,
                })
            })
            .collect::<Result<Vec<_>, BridgeError>>()?;
        let result_field = self.result_field.and_then(|field| {
            let trimmed = field.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(SmolStr::new(trimmed))
            }
        });
        Ok(GoalSchema {
            namespace: SmolStr::new(namespace),
            action: SmolStr::new(action),
            goal_element: SmolStr::new(self.goal_element.trim()),
            fields,
            result_field,
        })
    }
}

fn default_text(
    prefix: &str,
    key: &str,
    kind: FieldKind,
    value: &toml::Value,
) -> Result<SmolStr, BridgeError> {
    let text = match value {
        toml::Value::String(text) => text.clone(),
        toml::Value::Integer(number) => number.to_string(),
        toml::Value::Float(number) => number.to_string(),
        toml::Value::Boolean(flag) => flag.to_string(),
        _ => {
            return Err(BridgeError::InvalidConfig(
                format!("{prefix}.{key}: default must be a scalar").into(),
            ))
        }
    };
    if kind.value_from(&text).is_none() {
        return Err(BridgeError::InvalidConfig(
            format!(
                "{prefix}.{key}: default '{text}' is not a valid {}",
                kind.as_str()
            )
            .into(),
        ));
    }
    Ok(SmolStr::new(text))
}

fn is_http_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"));
    rest.is_some_and(|host| !host.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge_toml() -> String {
        r#"
[agent]
url = "http://localhost:5000"
device = "cnc"
interval_ms = 1000
count = 1000

[adapter]
listen = "0.0.0.0:7878"
heartbeat_ms = 10000

[log]
level = "info"

[dispatch]
announce_active = true
poll_ms = 50

[actions.mtconnect_msgs.MaterialLoad]
goal_element = "MaterialType"
fields = [
  { key = "material", kind = "text" },
  { key = "length", kind = "float", default = 32.2 },
  { key = "diameter", kind = "float", default = 7.4 },
]

[actions.mtconnect_msgs.MaterialUnload]
goal_element = "MaterialType"
fields = [{ key = "material", kind = "text" }]
result_field = "outcome"
"#
        .to_string()
    }

    #[test]
    fn parses_canonical_config() {
        let config = parse_bridge_toml_from_text(&bridge_toml(), "bridge.toml").expect("config");
        assert_eq!(config.agent.base_url(), "http://localhost:5000/cnc");
        assert_eq!(config.agent.namespace, DEFAULT_STREAMS_NAMESPACE);
        assert_eq!(config.adapter.listen, "0.0.0.0:7878");
        assert!(config.dispatch.announce_active);
        assert_eq!(config.dispatch.server, None);
        assert_eq!(config.dispatch.simulated_result, DEFAULT_SIMULATED_RESULT);
        assert_eq!(
            config.actions.actions(),
            vec![SmolStr::new("MaterialLoad"), SmolStr::new("MaterialUnload")]
        );
        let load = config.actions.get("MaterialLoad").expect("schema");
        assert_eq!(load.namespace, "mtconnect_msgs");
        assert_eq!(load.fields[1].default.as_deref(), Some("32.2"));
        let unload = config.actions.get("MaterialUnload").expect("schema");
        assert_eq!(unload.result_field.as_deref(), Some("outcome"));
    }

    #[test]
    fn rejects_unknown_keys() {
        let text = format!("{}\n[extra]\nflag = true\n", bridge_toml());
        let err = validate_bridge_toml_text(&text).expect_err("schema should fail");
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn rejects_zero_intervals() {
        let text = bridge_toml().replace("interval_ms = 1000", "interval_ms = 0");
        let err = validate_bridge_toml_text(&text).expect_err("interval should fail");
        assert!(err
            .to_string()
            .contains("bridge.toml: agent.interval_ms must be >= 1"));
    }

    #[test]
    fn rejects_non_http_agent_url() {
        let text = bridge_toml().replace("http://localhost:5000", "localhost:5000");
        let err = validate_bridge_toml_text(&text).expect_err("url should fail");
        assert!(err.to_string().contains("agent.url must be an http(s) URL"));
    }

    #[test]
    fn rejects_duplicate_action_names_across_namespaces() {
        let text = format!(
            "{}\n[actions.other_msgs.MaterialLoad]\ngoal_element = \"X\"\nfields = [{{ key = \"a\", kind = \"text\" }}]\n",
            bridge_toml()
        );
        let err = validate_bridge_toml_text(&text).expect_err("duplicate should fail");
        assert!(err.to_string().contains("configured more than once"));
    }

    #[test]
    fn rejects_default_of_wrong_kind() {
        let text = bridge_toml().replace("default = 7.4", "default = \"wide\"");
        let err = validate_bridge_toml_text(&text).expect_err("default should fail");
        assert!(err.to_string().contains("is not a valid float"));
    }

    #[test]
    fn rejects_later_field_without_default() {
        let text = bridge_toml().replace(
            "{ key = \"diameter\", kind = \"float\", default = 7.4 }",
            "{ key = \"diameter\", kind = \"float\" }",
        );
        let err = validate_bridge_toml_text(&text).expect_err("missing default should fail");
        assert!(err
            .to_string()
            .contains("MaterialLoad.diameter: default is required after the first field"));
    }

    #[test]
    fn rejects_default_on_seeded_field() {
        let text = bridge_toml().replace(
            "{ key = \"material\", kind = \"text\" },",
            "{ key = \"material\", kind = \"text\", default = \"STEEL\" },",
        );
        let err = validate_bridge_toml_text(&text).expect_err("seed default should fail");
        assert!(err.to_string().contains("takes no default"));
    }

    #[test]
    fn rejects_empty_field_list() {
        let text = bridge_toml().replace(
            "fields = [{ key = \"material\", kind = \"text\" }]",
            "fields = []",
        );
        let err = validate_bridge_toml_text(&text).expect_err("fields should fail");
        assert!(err.to_string().contains("fields must not be empty"));
    }

    #[test]
    fn requires_at_least_one_action() {
        let text = r#"
[agent]
url = "http://localhost:5000"

[actions]
"#;
        let err = validate_bridge_toml_text(text).expect_err("actions should fail");
        assert!(err
            .to_string()
            .contains("at least one action must be configured"));
    }

    #[test]
    fn dispatch_server_is_normalised() {
        let text = bridge_toml().replace(
            "poll_ms = 50",
            "poll_ms = 50\nserver = \"http://127.0.0.1:9090/\"",
        );
        let config = parse_bridge_toml_from_text(&text, "bridge.toml").expect("config");
        assert_eq!(config.dispatch.server.as_deref(), Some("http://127.0.0.1:9090"));
    }
}

//! MTConnect streams document parsing.

#![allow(missing_docs)]

use smol_str::SmolStr;

use crate::error::BridgeError;

pub const DEFAULT_STREAMS_NAMESPACE: &str = "urn:mtconnect.org:MTConnectStreams:1.2";

const STATE_ACTIVE: &str = "ACTIVE";
const STATE_READY: &str = "READY";

/// Anything able to hand out the agent's current full document.
pub trait SnapshotSource {
    fn current_snapshot(&self) -> Result<String, BridgeError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementState {
    Active,
    Ready,
    Other(SmolStr),
}

impl ElementState {
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        match text.trim() {
            STATE_ACTIVE => Self::Active,
            STATE_READY => Self::Ready,
            other => Self::Other(SmolStr::new(other)),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Active => STATE_ACTIVE,
            Self::Ready => STATE_READY,
            Self::Other(text) => text,
        }
    }
}

/// An element whose tag is one of the configured action names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedElement {
    pub action: SmolStr,
    pub state: ElementState,
    /// The `name` attribute; identifies the handshake instance.
    pub handshake: SmolStr,
}

impl WatchedElement {
    #[must_use]
    pub fn new(action: &str, state: &str, handshake: &str) -> Self {
        Self {
            action: SmolStr::new(action),
            state: ElementState::from_text(state),
            handshake: SmolStr::new(handshake),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub next_sequence: SmolStr,
    pub elements: Vec<WatchedElement>,
}

pub fn parse_snapshot_bytes(
    bytes: &[u8],
    namespace: &str,
    watched: &[SmolStr],
) -> Result<Snapshot, BridgeError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|err| BridgeError::Parse(format!("chunk is not UTF-8: {err}").into()))?;
    parse_snapshot(text, namespace, watched)
}

/// Extracts the continuation sequence and the first element of each watched
/// action, in the order the actions are listed.
pub fn parse_snapshot(
    xml: &str,
    namespace: &str,
    watched: &[SmolStr],
) -> Result<Snapshot, BridgeError> {
    let document = roxmltree::Document::parse(xml)
        .map_err(|err| BridgeError::Parse(format!("malformed XML: {err}").into()))?;
    let header = document
        .descendants()
        .find(|node| is_streams_element(*node, namespace, "Header"))
        .ok_or_else(|| BridgeError::Parse("missing <Header> element".into()))?;
    let next_sequence = header
        .attribute("nextSequence")
        .ok_or_else(|| BridgeError::Parse("<Header> without nextSequence".into()))?;

    let mut elements = Vec::new();
    for action in watched {
        let Some(node) = document
            .descendants()
            .find(|node| is_streams_element(*node, namespace, action))
        else {
            continue;
        };
        let handshake = node.attribute("name").ok_or_else(|| {
            BridgeError::Parse(format!("<{action}> without name attribute").into())
        })?;
        elements.push(WatchedElement::new(
            action,
            node.text().unwrap_or_default(),
            handshake,
        ));
    }

    Ok(Snapshot {
        next_sequence: SmolStr::new(next_sequence),
        elements,
    })
}

/// Text of the first element named `tag`, trimmed.
pub fn first_text(xml: &str, namespace: &str, tag: &str) -> Result<Option<String>, BridgeError> {
    let document = roxmltree::Document::parse(xml)
        .map_err(|err| BridgeError::Parse(format!("malformed XML: {err}").into()))?;
    Ok(document
        .descendants()
        .find(|node| is_streams_element(*node, namespace, tag))
        .map(|node| node.text().unwrap_or_default().trim().to_string()))
}

fn is_streams_element(node: roxmltree::Node<'_, '_>, namespace: &str, name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == name
        && node.tag_name().namespace() == Some(namespace)
}

#[cfg(test)]
pub(crate) fn streams_document(next_sequence: u64, events: &[(&str, &str, &str)]) -> String {
    let mut body = String::new();
    for (tag, name, state) in events {
        body.push_str(&format!(
            "<{tag} dataItemId=\"{name}_id\" name=\"{name}\" sequence=\"{next_sequence}\" timestamp=\"2013-02-01T10:00:00Z\">{state}</{tag}>"
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<MTConnectStreams xmlns:m="{ns}" xmlns="{ns}">
  <Header creationTime="2013-02-01T10:00:00Z" sender="agent" instanceId="1" bufferSize="131072" version="1.2" nextSequence="{next_sequence}" firstSequence="1" lastSequence="{last}"/>
  <Streams>
    <DeviceStream name="cnc" uuid="cnc-1">
      <ComponentStream component="Controller" name="controller" componentId="cont">
        <Events>{body}</Events>
      </ComponentStream>
    </DeviceStream>
  </Streams>
</MTConnectStreams>"#,
        ns = DEFAULT_STREAMS_NAMESPACE,
        last = next_sequence.saturating_sub(1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watched() -> Vec<SmolStr> {
        vec![SmolStr::new("MaterialLoad"), SmolStr::new("MaterialUnload")]
    }

    #[test]
    fn parses_sequence_and_watched_elements_in_action_order() {
        let xml = streams_document(
            42,
            &[
                ("MaterialUnload", "material_unload", "READY"),
                ("Execution", "exec", "ACTIVE"),
                ("MaterialLoad", "material_load", "ACTIVE"),
            ],
        );
        let snapshot =
            parse_snapshot(&xml, DEFAULT_STREAMS_NAMESPACE, &watched()).expect("parse snapshot");
        assert_eq!(snapshot.next_sequence, "42");
        assert_eq!(
            snapshot.elements,
            vec![
                WatchedElement::new("MaterialLoad", "ACTIVE", "material_load"),
                WatchedElement::new("MaterialUnload", "READY", "material_unload"),
            ]
        );
    }

    #[test]
    fn only_first_element_per_action_is_kept() {
        let xml = streams_document(
            7,
            &[
                ("MaterialLoad", "material_load", "ACTIVE"),
                ("MaterialLoad", "material_load", "READY"),
            ],
        );
        let snapshot =
            parse_snapshot(&xml, DEFAULT_STREAMS_NAMESPACE, &watched()).expect("parse snapshot");
        assert_eq!(snapshot.elements.len(), 1);
        assert_eq!(snapshot.elements[0].state, ElementState::Active);
    }

    #[test]
    fn unknown_state_text_is_preserved() {
        let xml = streams_document(3, &[("MaterialLoad", "material_load", "UNAVAILABLE")]);
        let snapshot =
            parse_snapshot(&xml, DEFAULT_STREAMS_NAMESPACE, &watched()).expect("parse snapshot");
        assert_eq!(
            snapshot.elements[0].state,
            ElementState::Other(SmolStr::new("UNAVAILABLE"))
        );
    }

    #[test]
    fn malformed_xml_is_a_parse_error() {
        let err = parse_snapshot("<MTConnectStreams>", DEFAULT_STREAMS_NAMESPACE, &watched())
            .expect_err("malformed");
        assert!(matches!(err, BridgeError::Parse(_)));
    }

    #[test]
    fn missing_next_sequence_is_a_parse_error() {
        let xml = streams_document(9, &[]).replace("nextSequence=\"9\"", "");
        let err =
            parse_snapshot(&xml, DEFAULT_STREAMS_NAMESPACE, &watched()).expect_err("no sequence");
        assert!(err.to_string().contains("nextSequence"));
    }

    #[test]
    fn documents_in_other_namespaces_are_rejected() {
        let xml = streams_document(5, &[("MaterialLoad", "material_load", "ACTIVE")]);
        let snapshot = parse_snapshot(&xml, "urn:example:other", &watched());
        assert!(matches!(snapshot, Err(BridgeError::Parse(_))));
    }

    #[test]
    fn first_text_finds_goal_element() {
        let xml = streams_document(5, &[("MaterialType", "material", " ROUND 440C THING ")]);
        let text = first_text(&xml, DEFAULT_STREAMS_NAMESPACE, "MaterialType").expect("parse");
        assert_eq!(text.as_deref(), Some("ROUND 440C THING"));
        let missing = first_text(&xml, DEFAULT_STREAMS_NAMESPACE, "Door").expect("parse");
        assert_eq!(missing, None);
    }

    #[test]
    fn non_utf8_chunks_are_rejected() {
        let err = parse_snapshot_bytes(&[0xff, 0xfe], DEFAULT_STREAMS_NAMESPACE, &watched())
            .expect_err("invalid utf8");
        assert!(matches!(err, BridgeError::Parse(_)));
    }
}

//! Client message definitions
//!
//! Messages are JSON objects keyed by `action`. Fields the relay does not
//! interpret are carried through untouched, so a message is kept as its
//! JSON map with the action decoded alongside.

use serde_json::{json, Map, Value};

use crate::compact;
use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// Actions
// ─────────────────────────────────────────────────────────────────

/// What a client message asks the relay to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// No action: keep-alive only
    Touch,
    /// `ping` or `heartbeat`, echoed back as `pong`
    Ping,
    /// One signaling payload for a peer
    Signal,
    /// Several signaling payloads for the same peer under `data`
    Signals,
    /// Forwarded verbatim, no not-found handling
    Reject,
    /// Forwarded verbatim, no not-found handling
    Debug,
    Unknown(String),
}

impl Action {
    fn from_field(field: Option<&Value>) -> Self {
        match field {
            None | Some(Value::Null) => Action::Touch,
            Some(Value::String(s)) => match s.as_str() {
                "" => Action::Touch,
                "ping" | "heartbeat" => Action::Ping,
                "signal" => Action::Signal,
                "signals" => Action::Signals,
                "reject" => Action::Reject,
                "debug" => Action::Debug,
                other => Action::Unknown(other.to_string()),
            },
            Some(other) => Action::Unknown(other.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Client Message
// ─────────────────────────────────────────────────────────────────

/// A message received from a client
#[derive(Debug, Clone, PartialEq)]
pub struct ClientMessage {
    pub action: Action,
    body: Map<String, Value>,
}

impl ClientMessage {
    /// Wrap a JSON object; anything else is malformed
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(body) => Ok(Self {
                action: Action::from_field(body.get("action")),
                body,
            }),
            other => Err(Error::malformed(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Parse a frame or request body: an array of messages or a single one
    pub fn parse_many(text: &str) -> Result<Vec<Self>> {
        match serde_json::from_str::<Value>(text)? {
            Value::Array(items) => items.into_iter().map(Self::from_value).collect(),
            single => Ok(vec![Self::from_value(single)?]),
        }
    }

    /// Build the per-item message of a `signals` batch
    pub fn signal_item(sender: &str, data: Value) -> Self {
        let mut body = Map::new();
        body.insert("action".into(), Value::from("signal"));
        body.insert("from_peer_id".into(), Value::from(sender));
        body.insert("data".into(), data);
        Self {
            action: Action::Signal,
            body,
        }
    }

    /// Remove `to_peer_id` and `to`, returning the destination
    /// (`to_peer_id` wins when both are set)
    pub fn take_destination(&mut self) -> Option<String> {
        let to_peer_id = self.body.remove("to_peer_id");
        let to = self.body.remove("to");
        [to_peer_id, to]
            .into_iter()
            .flatten()
            .find_map(|v| match v {
                Value::String(s) if !s.is_empty() => Some(s),
                _ => None,
            })
    }

    /// Stamp the sender as `from_peer_id`
    pub fn set_sender(&mut self, sender: &str) {
        self.body.insert("from_peer_id".into(), Value::from(sender));
    }

    pub fn data(&self) -> Option<&Value> {
        self.body.get("data").filter(|d| !d.is_null())
    }

    pub fn take_data(&mut self) -> Option<Value> {
        self.body.remove("data").filter(|d| !d.is_null())
    }

    /// A candidate payload whose candidate body is missing or empty
    pub fn has_empty_candidate(&self) -> bool {
        match self.data().and_then(|d| d.get("candidate")) {
            None | Some(Value::Null) => false,
            Some(candidate) => match candidate.get("candidate") {
                Some(Value::String(s)) => s.is_empty(),
                Some(Value::Null) | None => true,
                Some(_) => false,
            },
        }
    }

    /// Replace `data` with its compacted form if it has one. The sender
    /// then travels as `from` instead of `from_peer_id`.
    pub fn compact_for(&mut self, sender: &str) -> bool {
        let Some(packed) = self.data().and_then(compact::compact) else {
            return false;
        };
        self.body.insert("data".into(), Value::from(packed));
        self.body.remove("from_peer_id");
        self.body.insert("from".into(), Value::from(sender));
        true
    }

    /// Turn a ping into its `pong` echo
    pub fn into_pong(mut self) -> Self {
        self.body.insert("action".into(), Value::from("pong"));
        self.action = Action::Unknown("pong".into());
        self
    }

    pub fn to_json(&self) -> String {
        Value::Object(self.body.clone()).to_string()
    }

    pub fn into_json(self) -> String {
        Value::Object(self.body).to_string()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ─────────────────────────────────────────────────────────────────
// Server Messages
// ─────────────────────────────────────────────────────────────────

/// Greeting sent when a socket opens and in reply to `POST ?hello`
pub fn version_message(ver: u32) -> String {
    json!({"action": "ver", "ver": ver}).to_string()
}

/// Reply telling a sender that `missing_peer` could not be reached
pub fn not_found_message(missing_peer: &str) -> ClientMessage {
    let mut body = Map::new();
    body.insert("action".into(), Value::from("signal"));
    body.insert("from_peer_id".into(), Value::from(missing_peer));
    ClientMessage {
        action: Action::Signal,
        body,
    }
}

/// Merge several queued payloads for one batchable peer into a single
/// `signals` message. Each item loses `action` when it is `signal`, and
/// `from_peer_id` becomes `from`. Fails if any payload is not a JSON object.
pub fn merge_signals(payloads: &[Vec<u8>]) -> Result<String> {
    let mut data = Vec::with_capacity(payloads.len());

    for payload in payloads {
        let mut item = match serde_json::from_slice::<Value>(payload)? {
            Value::Object(map) => map,
            other => {
                return Err(Error::malformed(format!(
                    "queued payload is {}",
                    json_kind(&other)
                )))
            }
        };

        if item.get("action").and_then(Value::as_str) == Some("signal") {
            item.remove("action");
        }
        if let Some(from) = item.remove("from_peer_id") {
            if !from.is_null() {
                item.insert("from".into(), from);
            }
        }
        data.push(Value::Object(item));
    }

    Ok(json!({"action": "signals", "data": data}).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(value: Value) -> ClientMessage {
        ClientMessage::from_value(value).unwrap()
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!(msg(json!({})).action, Action::Touch);
        assert_eq!(msg(json!({"action": ""})).action, Action::Touch);
        assert_eq!(msg(json!({"action": "ping"})).action, Action::Ping);
        assert_eq!(msg(json!({"action": "heartbeat"})).action, Action::Ping);
        assert_eq!(msg(json!({"action": "signal"})).action, Action::Signal);
        assert_eq!(msg(json!({"action": "signals"})).action, Action::Signals);
        assert_eq!(msg(json!({"action": "reject"})).action, Action::Reject);
        assert_eq!(msg(json!({"action": "debug"})).action, Action::Debug);
        assert_eq!(
            msg(json!({"action": "dance"})).action,
            Action::Unknown("dance".into())
        );
    }

    #[test]
    fn test_non_object_is_malformed() {
        assert!(ClientMessage::from_value(json!([1])).is_err());
        assert!(ClientMessage::parse_many("[1, 2]").is_err());
        assert!(ClientMessage::parse_many("{oops").is_err());
    }

    #[test]
    fn test_parse_many_accepts_array_or_object() {
        assert_eq!(ClientMessage::parse_many(r#"[{"action":"ping"},{}]"#).unwrap().len(), 2);
        assert_eq!(ClientMessage::parse_many(r#"{"action":"ping"}"#).unwrap().len(), 1);
    }

    #[test]
    fn test_take_destination_prefers_to_peer_id() {
        let mut m = msg(json!({"action": "signal", "to": "bbbbbb", "to_peer_id": "aaaaaa"}));
        assert_eq!(m.take_destination().as_deref(), Some("aaaaaa"));
        let out: Value = serde_json::from_str(&m.to_json()).unwrap();
        assert!(out.get("to").is_none());
        assert!(out.get("to_peer_id").is_none());

        let mut m = msg(json!({"action": "signal", "to": "bbbbbb", "to_peer_id": ""}));
        assert_eq!(m.take_destination().as_deref(), Some("bbbbbb"));

        let mut m = msg(json!({"action": "signal"}));
        assert_eq!(m.take_destination(), None);
    }

    #[test]
    fn test_empty_candidate_detection() {
        assert!(msg(json!({"data": {"candidate": {"candidate": ""}}})).has_empty_candidate());
        assert!(msg(json!({"data": {"candidate": {}}})).has_empty_candidate());
        assert!(!msg(json!({"data": {"candidate": {"candidate": "candidate:1 1 UDP 1 1.2.3.4 9 typ host"}}}))
            .has_empty_candidate());
        assert!(!msg(json!({"data": {"type": "offer", "sdp": "v=0"}})).has_empty_candidate());
    }

    #[test]
    fn test_compact_for_rewrites_sender() {
        let mut m = msg(json!({
            "action": "signal",
            "data": {"type": "candidate", "candidate": {"candidate": "candidate:1 1 UDP 5 10.0.0.1 9 typ host"}}
        }));
        m.set_sender("sender");
        assert!(m.compact_for("sender"));

        let out: Value = serde_json::from_str(&m.to_json()).unwrap();
        assert_eq!(out, json!({"action": "signal", "from": "sender", "data": "C1 1 U 5 10.0.0.1 9 H"}));
    }

    #[test]
    fn test_compact_for_leaves_uncompactable() {
        let mut m = msg(json!({"action": "signal", "data": {"foo": 1}}));
        m.set_sender("sender");
        assert!(!m.compact_for("sender"));
        let out: Value = serde_json::from_str(&m.to_json()).unwrap();
        assert_eq!(out["from_peer_id"], "sender");
    }

    #[test]
    fn test_pong_keeps_fields() {
        let pong = msg(json!({"action": "ping", "ts": 12})).into_pong();
        let out: Value = serde_json::from_str(&pong.into_json()).unwrap();
        assert_eq!(out, json!({"action": "pong", "ts": 12}));
    }

    #[test]
    fn test_server_messages() {
        let ver: Value = serde_json::from_str(&version_message(3)).unwrap();
        assert_eq!(ver, json!({"action": "ver", "ver": 3}));

        let nf: Value = serde_json::from_str(&not_found_message("B").into_json()).unwrap();
        assert_eq!(nf, json!({"action": "signal", "from_peer_id": "B"}));
    }

    #[test]
    fn test_merge_signals() {
        let payloads = vec![
            br#"{"action":"signal","from_peer_id":"aaaaaa","data":{"x":1}}"#.to_vec(),
            br#"{"action":"signal","from":"aaaaaa","data":"C1"}"#.to_vec(),
            br#"{"action":"reject","from_peer_id":"aaaaaa"}"#.to_vec(),
        ];
        let merged: Value = serde_json::from_str(&merge_signals(&payloads).unwrap()).unwrap();
        assert_eq!(
            merged,
            json!({
                "action": "signals",
                "data": [
                    {"from": "aaaaaa", "data": {"x": 1}},
                    {"from": "aaaaaa", "data": "C1"},
                    {"action": "reject", "from": "aaaaaa"}
                ]
            })
        );

        assert!(merge_signals(&[b"not json".to_vec()]).is_err());
    }
}

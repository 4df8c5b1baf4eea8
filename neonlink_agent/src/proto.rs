//! Command request/response envelopes exchanged on the WebSocket.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    #[serde(default)]
    pub command: String,
    #[serde(default, deserialize_with = "scalar_params")]
    pub params: BTreeMap<String, String>,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Lookup that tries each alias in order.
    pub fn param(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .find_map(|k| self.params.get(*k))
            .map(String::as_str)
    }
}

// Clients send numbers and bools as often as strings; fold them all into
// strings and skip nulls.
fn scalar_params<'de, D>(de: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, Value>> = Option::deserialize(de)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(k, v)| match v {
            Value::Null => None,
            Value::String(s) => Some((k, s)),
            other => Some((k, other.to_string())),
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    pub command: String,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub timestamp: i64,
}

impl CommandResponse {
    pub fn ok(command: impl Into<String>, result: Value) -> Self {
        Self {
            success: true,
            command: command.into(),
            result: Some(result),
            error: None,
            timestamp: unix_now(),
        }
    }

    pub fn fail(command: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            command: command.into(),
            result: None,
            error: Some(error.into()),
            timestamp: unix_now(),
        }
    }
}

/// Parse one inbound text message into a request.
pub fn parse_request(text: &str) -> Result<CommandRequest, String> {
    let req: CommandRequest =
        serde_json::from_str(text).map_err(|e| format!("Malformed message: {e}"))?;
    if req.command.trim().is_empty() {
        return Err("Missing command field".to_string());
    }
    Ok(req)
}

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_accept_scalars() {
        let req = parse_request(
            r#"{"command":"set_polling_interval","params":{"intervalMs":500,"verbose":true,"x":null,"name":"a"}}"#,
        )
        .unwrap();
        assert_eq!(req.param(&["intervalMs"]), Some("500"));
        assert_eq!(req.param(&["verbose"]), Some("true"));
        assert_eq!(req.param(&["name"]), Some("a"));
        assert!(!req.params.contains_key("x"));
    }

    #[test]
    fn params_are_optional() {
        let req = parse_request(r#"{"command":"ping"}"#).unwrap();
        assert!(req.params.is_empty());
        let req = parse_request(r#"{"command":"ping","params":null}"#).unwrap();
        assert!(req.params.is_empty());
    }

    #[test]
    fn malformed_and_missing_command() {
        assert!(parse_request("not json").unwrap_err().starts_with("Malformed"));
        assert_eq!(
            parse_request(r#"{"params":{}}"#).unwrap_err(),
            "Missing command field"
        );
        assert_eq!(
            parse_request(r#"{"command":"   "}"#).unwrap_err(),
            "Missing command field"
        );
    }

    #[test]
    fn response_shape() {
        let v = serde_json::to_value(CommandResponse::fail("foo", "nope")).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["command"], "foo");
        assert!(v["result"].is_null());
        assert_eq!(v["error"], "nope");
        assert!(v["timestamp"].as_i64().unwrap() > 0);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_TOOL_RESULT: &str = "Executed successfully";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundMessage {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl OutboundMessage {
    /// Returns `None` for blank input; stored text is trimmed.
    pub fn new(text: &str) -> Option<Self> {
        let message = text.trim();
        if message.is_empty() {
            return None;
        }
        Some(Self { message: message.to_string(), timestamp: Utc::now() })
    }

    pub fn to_wire(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolExecutionRecord {
    pub name: String,
    pub arguments: Value,
    pub result: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Response {
        text: String,
        tools_used: Vec<String>,
    },
    InteractiveResponse {
        text: Option<String>,
        tool_executions: Vec<ToolExecutionRecord>,
        tools_used: Vec<String>,
    },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("inbound frame is not a JSON object")]
    NotAnObject,

    #[error("inbound frame has no type")]
    MissingType,

    #[error("unsupported inbound type: {0}")]
    UnsupportedType(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid field: {0}")]
    InvalidField(&'static str),
}

// Wire shape of one `tool_execution` entry.
#[derive(Debug, Deserialize)]
struct WireToolExecution {
    tool_name: String,
    #[serde(default)]
    tool_args: Value,
    #[serde(default)]
    result: Value,
}

impl From<WireToolExecution> for ToolExecutionRecord {
    fn from(w: WireToolExecution) -> Self {
        let result = match w.result {
            Value::Null => DEFAULT_TOOL_RESULT.to_string(),
            Value::String(s) => s,
            // tool output may arrive as content blocks or numbers
            other => other.to_string(),
        };
        Self { name: w.tool_name, arguments: w.tool_args, result }
    }
}

impl InboundMessage {
    pub fn from_value(v: &Value) -> Result<Self, ProtocolError> {
        let obj = v.as_object().ok_or(ProtocolError::NotAnObject)?;
        let kind = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?;
        if kind != "response" {
            return Err(ProtocolError::UnsupportedType(kind.to_string()));
        }

        let text = match obj.get("message") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(ProtocolError::InvalidField("message")),
        };
        let tools_used = match obj.get("tools_used") {
            None | Some(Value::Null) => Vec::new(),
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|_| ProtocolError::InvalidField("tools_used"))?,
        };

        let interactive = obj.get("interactive").and_then(Value::as_bool).unwrap_or(false);
        if interactive {
            let raw = obj
                .get("tool_execution")
                .ok_or(ProtocolError::MissingField("tool_execution"))?;
            let wire: Vec<WireToolExecution> = serde_json::from_value(raw.clone())
                .map_err(|_| ProtocolError::InvalidField("tool_execution"))?;
            return Ok(Self::InteractiveResponse {
                text,
                tool_executions: wire.into_iter().map(Into::into).collect(),
                tools_used,
            });
        }

        let text = text.ok_or(ProtocolError::MissingField("message"))?;
        Ok(Self::Response { text, tools_used })
    }

    pub fn tools_used(&self) -> &[String] {
        match self {
            Self::Response { tools_used, .. } | Self::InteractiveResponse { tools_used, .. } => {
                tools_used
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outbound_trims_and_rejects_blank() {
        assert!(OutboundMessage::new("   \n\t").is_none());
        let m = OutboundMessage::new("  hello ").unwrap();
        assert_eq!(m.message, "hello");
        let wire: Value = serde_json::from_str(&m.to_wire().unwrap()).unwrap();
        assert_eq!(wire["message"], "hello");
        let ts = wire["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[test]
    fn flat_response() {
        let msg = InboundMessage::from_value(&json!({
            "type": "response",
            "message": "hi",
            "tools_used": [],
            "timestamp": null,
            "interactive": false
        }))
        .unwrap();
        assert_eq!(msg, InboundMessage::Response { text: "hi".into(), tools_used: vec![] });
    }

    #[test]
    fn interactive_response_with_defaults() {
        let msg = InboundMessage::from_value(&json!({
            "type": "response",
            "interactive": true,
            "tools_used": ["calc", "search_web"],
            "tool_execution": [
                {"tool_name": "calc", "tool_args": {"x": 1}, "result": "2"},
                {"tool_name": "search_web", "tool_args": {"query": "rust"}}
            ],
            "message": "done"
        }))
        .unwrap();
        let InboundMessage::InteractiveResponse { text, tool_executions, tools_used } = msg else {
            panic!("expected interactive response");
        };
        assert_eq!(text.as_deref(), Some("done"));
        assert_eq!(tools_used, vec!["calc", "search_web"]);
        assert_eq!(tool_executions.len(), 2);
        assert_eq!(tool_executions[0].result, "2");
        assert_eq!(tool_executions[1].result, DEFAULT_TOOL_RESULT);
        assert_eq!(tool_executions[1].arguments["query"], "rust");
    }

    #[test]
    fn non_string_tool_results_are_kept_as_text() {
        let msg = InboundMessage::from_value(&json!({
            "type": "response",
            "interactive": true,
            "tool_execution": [
                {"tool_name": "calculate", "tool_args": {"expression": "6*7"}, "result": 42},
                {"tool_name": "search_web", "tool_args": {}, "result": [{"type": "text", "text": "hits"}]},
                {"tool_name": "noop", "result": null}
            ],
            "message": "answer below"
        }))
        .unwrap();
        let InboundMessage::InteractiveResponse { text, tool_executions, .. } = msg else {
            panic!("expected interactive response");
        };
        assert_eq!(text.as_deref(), Some("answer below"));
        assert_eq!(tool_executions[0].result, "42");
        assert_eq!(tool_executions[1].result, r#"[{"text":"hits","type":"text"}]"#);
        assert_eq!(tool_executions[2].result, DEFAULT_TOOL_RESULT);
        assert_eq!(tool_executions[2].arguments, Value::Null);
    }

    #[test]
    fn rejects_unknown_and_malformed_shapes() {
        assert_eq!(InboundMessage::from_value(&json!([1, 2])), Err(ProtocolError::NotAnObject));
        assert_eq!(InboundMessage::from_value(&json!({"message": "x"})), Err(ProtocolError::MissingType));
        assert_eq!(
            InboundMessage::from_value(&json!({"type": "pong"})),
            Err(ProtocolError::UnsupportedType("pong".into()))
        );
        assert_eq!(
            InboundMessage::from_value(&json!({"type": "response"})),
            Err(ProtocolError::MissingField("message"))
        );
        assert_eq!(
            InboundMessage::from_value(&json!({"type": "response", "interactive": true})),
            Err(ProtocolError::MissingField("tool_execution"))
        );
        assert_eq!(
            InboundMessage::from_value(&json!({
                "type": "response", "interactive": true, "tool_execution": [{"tool_args": {}}]
            })),
            Err(ProtocolError::InvalidField("tool_execution"))
        );
    }
}

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub time: SessionTime,
    #[serde(default)]
    pub share: Option<ShareInfo>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct SessionTime {
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub updated: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShareInfo {
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageInfo {
    pub id: String,
    pub role: Role,
    #[serde(rename = "sessionID")]
    pub session_id: String,
    #[serde(default)]
    pub tokens: Option<TokenUsage>,
    #[serde(default, rename = "modelID")]
    pub model_id: Option<String>,
    #[serde(default, rename = "providerID")]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
    #[serde(default)]
    pub reasoning: u64,
    #[serde(default)]
    pub cache: CacheUsage,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct CacheUsage {
    #[serde(default)]
    pub read: u64,
    #[serde(default)]
    pub write: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input + self.output + self.reasoning + self.cache.read + self.cache.write
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageWithParts {
    pub info: MessageInfo,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Part {
    pub id: String,
    #[serde(rename = "messageID")]
    pub message_id: String,
    #[serde(rename = "sessionID")]
    pub session_id: String,
    #[serde(flatten)]
    pub body: PartBody,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PartBody {
    Text {
        #[serde(default)]
        text: String,
    },
    Reasoning {
        #[serde(default)]
        text: String,
    },
    File {
        #[serde(default)]
        filename: Option<String>,
        #[serde(default)]
        mime: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
    Tool {
        tool: String,
        #[serde(default)]
        state: ToolState,
    },
    StepStart,
    StepFinish,
    Patch,
    Snapshot {
        #[serde(default)]
        snapshot: String,
    },
    Agent {
        #[serde(default)]
        name: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Error,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolState {
    #[serde(default)]
    pub status: ToolStatus,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PermissionRequest {
    pub id: String,
    #[serde(rename = "sessionID")]
    pub session_id: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub pattern: Option<Value>,
}

impl PermissionRequest {
    /// The pattern field arrives as a string or an array of strings.
    pub fn pattern_text(&self) -> Option<String> {
        match self.pattern.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionErrorInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl SessionErrorInfo {
    pub fn message(&self) -> String {
        self.data
            .get("message")
            .and_then(|m| m.as_str())
            .map(String::from)
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| "unknown error".to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "properties")]
pub enum AgentEvent {
    #[serde(rename = "message.updated")]
    MessageUpdated { info: MessageInfo },
    #[serde(rename = "message.part.updated")]
    PartUpdated { part: Part },
    #[serde(rename = "session.error")]
    SessionError {
        #[serde(default, rename = "sessionID")]
        session_id: Option<String>,
        #[serde(default)]
        error: Option<SessionErrorInfo>,
    },
    #[serde(rename = "permission.updated")]
    PermissionUpdated(PermissionRequest),
    #[serde(rename = "permission.replied")]
    PermissionReplied {
        #[serde(rename = "sessionID")]
        session_id: String,
        #[serde(default, rename = "permissionID")]
        permission_id: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectInfo {
    pub id: String,
    #[serde(default)]
    pub worktree: String,
    #[serde(default)]
    pub time: ProjectTime,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ProjectTime {
    #[serde(default)]
    pub created: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersResponse {
    #[serde(default)]
    pub providers: Vec<Provider>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Provider {
    pub id: String,
    #[serde(default)]
    pub models: HashMap<String, ProviderModel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderModel {
    #[serde(default)]
    pub limit: ModelLimit,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ModelLimit {
    #[serde(default)]
    pub context: u64,
    #[serde(default)]
    pub output: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_deserializes_from_tagged_json() {
        let json = r#"{
            "id": "prt_1", "messageID": "msg_1", "sessionID": "ses_1",
            "type": "tool", "tool": "edit",
            "state": {"status": "running", "input": {"filePath": "/tmp/a.rs"}}
        }"#;
        let part: Part = serde_json::from_str(json).unwrap();
        match &part.body {
            PartBody::Tool { tool, state } => {
                assert_eq!(tool, "edit");
                assert_eq!(state.status, ToolStatus::Running);
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn step_boundaries_parse_as_kebab_case() {
        let json = r#"{"id":"p","messageID":"m","sessionID":"s","type":"step-finish","tokens":{}}"#;
        let part: Part = serde_json::from_str(json).unwrap();
        assert!(matches!(part.body, PartBody::StepFinish));
    }

    #[test]
    fn unknown_part_type_is_tolerated() {
        let json = r#"{"id":"p","messageID":"m","sessionID":"s","type":"holo-deck"}"#;
        let part: Part = serde_json::from_str(json).unwrap();
        assert!(matches!(part.body, PartBody::Unknown));
    }

    #[test]
    fn event_envelope_parses() {
        let json = r#"{
            "type": "permission.updated",
            "properties": {"id":"perm_1","sessionID":"ses_1","type":"bash","title":"Run command","pattern":["rm -rf *"]}
        }"#;
        let event: AgentEvent = serde_json::from_str(json).unwrap();
        match event {
            AgentEvent::PermissionUpdated(req) => {
                assert_eq!(req.id, "perm_1");
                assert_eq!(req.pattern_text().unwrap(), "rm -rf *");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_type_is_tolerated() {
        let json = r#"{"type":"storage.write","properties":{"key":"x"}}"#;
        let event: AgentEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, AgentEvent::Other));
    }

    #[test]
    fn token_total_sums_all_buckets() {
        let usage = TokenUsage {
            input: 10,
            output: 20,
            reasoning: 5,
            cache: CacheUsage { read: 100, write: 2 },
        };
        assert_eq!(usage.total(), 137);
    }
}

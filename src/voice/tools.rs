use crate::agent::{AgentClient, PromptPart, Role};
use crate::bridge::AbortReason;
use crate::render::render_part;
use crate::state::AppState;
use crate::transcribe::project_file_tree;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

const REPLY_MAX_CHARS: usize = 1500;
const LIST_LIMIT: usize = 20;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Agent request failed: {0}")]
    Agent(String),
    #[error("Unknown chat: {0}")]
    UnknownChat(String),
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),
}

/// Function declarations handed to the realtime model at setup.
pub fn declarations() -> Value {
    json!([
        {
            "name": "submitMessage",
            "description": "Send a message to the coding agent and wait for its reply. Creates a new chat when chatId is omitted.",
            "parameters": {
                "type": "object",
                "properties": {
                    "chatId": { "type": "string", "description": "Existing chat to continue" },
                    "message": { "type": "string", "description": "What the agent should do" }
                },
                "required": ["message"]
            }
        },
        {
            "name": "createNewChat",
            "description": "Create a fresh coding chat and return its id.",
            "parameters": {
                "type": "object",
                "properties": {
                    "title": { "type": "string", "description": "Short chat title" }
                }
            }
        },
        {
            "name": "listChats",
            "description": "List recent coding chats with their ids and titles.",
            "parameters": { "type": "object", "properties": {} }
        },
        {
            "name": "readSessionMessages",
            "description": "Read the recent messages of a chat.",
            "parameters": {
                "type": "object",
                "properties": {
                    "chatId": { "type": "string" }
                },
                "required": ["chatId"]
            }
        },
        {
            "name": "searchFiles",
            "description": "Search project file paths by substring.",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": { "type": "string" }
                },
                "required": ["query"]
            }
        },
        {
            "name": "abortChat",
            "description": "Abort the running request in a chat.",
            "parameters": {
                "type": "object",
                "properties": {
                    "chatId": { "type": "string" }
                },
                "required": ["chatId"]
            }
        },
        {
            "name": "getModels",
            "description": "List the models the coding agent can use.",
            "parameters": { "type": "object", "properties": {} }
        }
    ])
}

/// Execute one function call from the realtime model by delegating to the
/// Agent serving `directory`.
pub async fn execute(
    state: &Arc<AppState>,
    directory: &Path,
    name: &str,
    args: &Value,
) -> Result<Value, ToolError> {
    let client = state
        .agents
        .client_for(directory)
        .await
        .map_err(|e| ToolError::Agent(e.to_string()))?;

    match name {
        "submitMessage" => submit_message(state, &client, args).await,
        "createNewChat" => create_new_chat(&client, args).await,
        "listChats" => list_chats(&client).await,
        "readSessionMessages" => read_session_messages(&client, args).await,
        "searchFiles" => search_files(directory, args).await,
        "abortChat" => abort_chat(state, &client, args).await,
        "getModels" => get_models(&client).await,
        other => Err(ToolError::UnknownTool(other.to_string())),
    }
}

async fn submit_message(
    state: &Arc<AppState>,
    client: &AgentClient,
    args: &Value,
) -> Result<Value, ToolError> {
    let message = str_arg(args, "message")?;

    let session_id = match args.get("chatId").and_then(Value::as_str) {
        Some(id) => {
            client
                .session(id)
                .await
                .map_err(|_| ToolError::UnknownChat(id.to_string()))?;
            id.to_string()
        }
        None => {
            let title: String = message.chars().take(80).collect();
            client
                .create_session(&title)
                .await
                .map_err(|e| ToolError::Agent(e.to_string()))?
                .id
        }
    };

    let (handle, superseded) = state.cancels.begin(&session_id).await;
    if superseded {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        if handle.is_aborted() {
            return Ok(json!({ "chatId": session_id, "superseded": true }));
        }
    }

    let result = client
        .prompt(
            &session_id,
            vec![PromptPart::Text {
                text: message.to_string(),
            }],
            None,
            handle.token(),
        )
        .await;

    match &result {
        Ok(_) => handle.abort(AbortReason::Finished),
        Err(_) => handle.abort(AbortReason::Error),
    }
    state.cancels.finish(&session_id, &handle).await;
    result.map_err(|e| ToolError::Agent(e.to_string()))?;

    let reply = last_assistant_markdown(client, &session_id).await;
    Ok(json!({ "chatId": session_id, "reply": reply }))
}

async fn create_new_chat(client: &AgentClient, args: &Value) -> Result<Value, ToolError> {
    let title = args
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("Voice chat");
    let session = client
        .create_session(title)
        .await
        .map_err(|e| ToolError::Agent(e.to_string()))?;
    Ok(json!({ "chatId": session.id, "title": session.title }))
}

async fn list_chats(client: &AgentClient) -> Result<Value, ToolError> {
    let mut sessions = client
        .sessions()
        .await
        .map_err(|e| ToolError::Agent(e.to_string()))?;
    sessions.sort_by(|a, b| b.time.updated.cmp(&a.time.updated));

    let chats: Vec<Value> = sessions
        .into_iter()
        .take(LIST_LIMIT)
        .map(|s| json!({ "chatId": s.id, "title": s.title }))
        .collect();
    Ok(json!({ "chats": chats }))
}

async fn read_session_messages(client: &AgentClient, args: &Value) -> Result<Value, ToolError> {
    let chat_id = str_arg(args, "chatId")?;
    let messages = client
        .session_messages(chat_id)
        .await
        .map_err(|_| ToolError::UnknownChat(chat_id.to_string()))?;

    let mut out = String::new();
    for message in &messages {
        let role = match message.info.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        for part in &message.parts {
            let rendered = render_part(part);
            if !rendered.trim().is_empty() {
                out.push_str(&format!("{role}: {rendered}\n"));
            }
        }
    }

    Ok(json!({ "messages": truncate(&out, REPLY_MAX_CHARS * 2) }))
}

async fn search_files(directory: &Path, args: &Value) -> Result<Value, ToolError> {
    let query = str_arg(args, "query")?.to_lowercase();
    let files = project_file_tree(directory, 500).await;
    let matches: Vec<String> = files
        .into_iter()
        .filter(|f| f.to_lowercase().contains(&query))
        .take(25)
        .collect();
    Ok(json!({ "files": matches }))
}

async fn abort_chat(
    state: &Arc<AppState>,
    client: &AgentClient,
    args: &Value,
) -> Result<Value, ToolError> {
    let chat_id = str_arg(args, "chatId")?;
    state.cancels.abort(chat_id, AbortReason::UserAbort).await;
    client
        .abort_session(chat_id)
        .await
        .map_err(|e| ToolError::Agent(e.to_string()))?;
    Ok(json!({ "aborted": true }))
}

async fn get_models(client: &AgentClient) -> Result<Value, ToolError> {
    let providers = client
        .providers()
        .await
        .map_err(|e| ToolError::Agent(e.to_string()))?;

    let mut models = Vec::new();
    for provider in providers.providers {
        for model_id in provider.models.keys() {
            models.push(format!("{}/{}", provider.id, model_id));
        }
    }
    models.sort();
    Ok(json!({ "models": models }))
}

/// Short rendered markdown of the session's latest assistant message, for
/// the voice assistant to speak from.
pub async fn last_assistant_markdown(client: &AgentClient, session_id: &str) -> String {
    let Ok(messages) = client.session_messages(session_id).await else {
        return String::new();
    };
    let Some(last) = messages.iter().rev().find(|m| m.info.role == Role::Assistant) else {
        return String::new();
    };

    let mut out = String::new();
    for part in &last.parts {
        let rendered = render_part(part);
        if !rendered.trim().is_empty() {
            out.push_str(&rendered);
            out.push('\n');
        }
    }
    truncate(&out, REPLY_MAX_CHARS)
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidArgs(format!("missing `{key}`")))
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.trim_end().to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declarations_cover_the_whole_surface() {
        let decls = declarations();
        let names: Vec<&str> = decls
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                "submitMessage",
                "createNewChat",
                "listChats",
                "readSessionMessages",
                "searchFiles",
                "abortChat",
                "getModels"
            ]
        );
    }

    #[test]
    fn missing_args_are_rejected() {
        let err = str_arg(&json!({}), "message").unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs(_)));
        assert!(str_arg(&json!({"message": "hi"}), "message").is_ok());
    }
}

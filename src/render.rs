use crate::agent::{Part, PartBody, ToolState, ToolStatus};
use serde_json::Value;

const VALUE_TRUNCATE: usize = 300;

/// Render one Agent part as a Discord-friendly line (or block). An empty
/// return value means the part produces no message.
pub fn render_part(part: &Part) -> String {
    match &part.body {
        PartBody::Text { text } => text.clone(),
        PartBody::Reasoning { text } => {
            if text.trim().is_empty() {
                String::new()
            } else {
                "◼︎ thinking".to_string()
            }
        }
        PartBody::File { filename, .. } => {
            format!("📄 {}", filename.as_deref().unwrap_or("File"))
        }
        PartBody::StepStart | PartBody::StepFinish | PartBody::Patch | PartBody::Unknown => {
            String::new()
        }
        PartBody::Agent { name } => format!("◼︎ agent {name}"),
        PartBody::Snapshot { snapshot } => format!("◼︎ snapshot {snapshot}"),
        PartBody::Tool { tool, state } => render_tool(tool, state),
    }
}

fn render_tool(tool: &str, state: &ToolState) -> String {
    if state.status == ToolStatus::Pending {
        return String::new();
    }

    if tool == "todowrite" {
        return render_todo(state);
    }

    let summary = tool_summary(tool, state);

    if state.status == ToolStatus::Error {
        let msg = state.error.as_deref().unwrap_or("failed");
        return join_segments(&[&format!("⨯ {tool}"), &format!("_{msg}_"), &summary]);
    }

    let title = state.title.as_deref().unwrap_or("");
    join_segments(&[&format!("◼︎ {tool}"), title, &summary])
}

fn render_todo(state: &ToolState) -> String {
    let todos = match state.input.get("todos").and_then(Value::as_array) {
        Some(todos) => todos,
        None => return String::new(),
    };

    for (i, todo) in todos.iter().enumerate() {
        let status = todo.get("status").and_then(Value::as_str).unwrap_or("");
        if status == "in_progress" {
            let content = todo.get("content").and_then(Value::as_str).unwrap_or("");
            return format!("{}. **{}**", i + 1, content);
        }
    }

    String::new()
}

fn tool_summary(tool: &str, state: &ToolState) -> String {
    let input = &state.input;
    match tool {
        "edit" => {
            let filename = basename(str_field(input, "filePath"));
            let (added, removed) = diff_counts(&state.metadata);
            format!("*{filename}* (+{added}-{removed})")
        }
        "write" => {
            let filename = basename(str_field(input, "filePath"));
            let lines = str_field(input, "content").lines().count();
            let noun = if lines == 1 { "line" } else { "lines" };
            format!("*{filename}* ({lines} {noun})")
        }
        "webfetch" => {
            let url = str_field(input, "url");
            let url = url
                .strip_prefix("https://")
                .or_else(|| url.strip_prefix("http://"))
                .unwrap_or(url);
            format!("*{url}*")
        }
        "read" => format!("*{}*", basename(str_field(input, "filePath"))),
        "list" => format!("*{}*", str_field(input, "path")),
        "glob" | "grep" => format!("*{}*", str_field(input, "pattern")),
        "bash" | "todoread" | "todowrite" => String::new(),
        "task" | "skill" => {
            let text = input
                .get("description")
                .and_then(Value::as_str)
                .or_else(|| input.get("name").and_then(Value::as_str))
                .unwrap_or("");
            format!("_{text}_")
        }
        _ => generic_summary(input),
    }
}

fn generic_summary(input: &Value) -> String {
    let map = match input.as_object() {
        Some(map) if !map.is_empty() => map,
        _ => return String::new(),
    };

    map.iter()
        .map(|(key, value)| {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("{key}: {}", truncate(&rendered, VALUE_TRUNCATE))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn diff_counts(metadata: &Value) -> (usize, usize) {
    let diff = match metadata.get("diff").and_then(Value::as_str) {
        Some(diff) => diff,
        None => return (0, 0),
    };

    let mut added = 0;
    let mut removed = 0;
    for line in diff.lines() {
        if line.starts_with("+++") || line.starts_with("---") {
            continue;
        }
        if line.starts_with('+') {
            added += 1;
        } else if line.starts_with('-') {
            removed += 1;
        }
    }
    (added, removed)
}

fn str_field<'a>(input: &'a Value, key: &str) -> &'a str {
    input.get(key).and_then(Value::as_str).unwrap_or("")
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push('…');
    out
}

fn join_segments(segments: &[&str]) -> String {
    segments
        .iter()
        .filter(|s| !s.is_empty() && !s.trim().is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn part(body: Value) -> Part {
        let mut obj = json!({"id": "prt_1", "messageID": "msg_1", "sessionID": "ses_1"});
        obj.as_object_mut()
            .unwrap()
            .extend(body.as_object().unwrap().clone());
        serde_json::from_value(obj).unwrap()
    }

    #[test]
    fn text_passes_through() {
        let p = part(json!({"type": "text", "text": "hi!"}));
        assert_eq!(render_part(&p), "hi!");
    }

    #[test]
    fn reasoning_collapses_to_marker() {
        let p = part(json!({"type": "reasoning", "text": "long chain of thought"}));
        assert_eq!(render_part(&p), "◼︎ thinking");
        let empty = part(json!({"type": "reasoning", "text": "  "}));
        assert_eq!(render_part(&empty), "");
    }

    #[test]
    fn step_boundaries_are_silent() {
        assert_eq!(render_part(&part(json!({"type": "step-start"}))), "");
        assert_eq!(render_part(&part(json!({"type": "step-finish"}))), "");
        assert_eq!(render_part(&part(json!({"type": "patch"}))), "");
    }

    #[test]
    fn pending_tool_is_suppressed() {
        let p = part(json!({"type": "tool", "tool": "bash", "state": {"status": "pending"}}));
        assert_eq!(render_part(&p), "");
    }

    #[test]
    fn edit_tool_shows_filename_and_diff_counts() {
        let p = part(json!({
            "type": "tool", "tool": "edit",
            "state": {
                "status": "completed",
                "title": "src/lib.rs",
                "input": {"filePath": "/home/x/src/lib.rs"},
                "metadata": {"diff": "--- a\n+++ b\n+one\n+two\n-gone\n context"}
            }
        }));
        assert_eq!(render_part(&p), "◼︎ edit src/lib.rs *lib.rs* (+2-1)");
    }

    #[test]
    fn write_tool_counts_lines() {
        let p = part(json!({
            "type": "tool", "tool": "write",
            "state": {"status": "completed", "input": {"filePath": "a/b.txt", "content": "x"}}
        }));
        assert_eq!(render_part(&p), "◼︎ write *b.txt* (1 line)");
    }

    #[test]
    fn webfetch_strips_scheme() {
        let p = part(json!({
            "type": "tool", "tool": "webfetch",
            "state": {"status": "completed", "input": {"url": "https://docs.rs/serde"}}
        }));
        assert_eq!(render_part(&p), "◼︎ webfetch *docs.rs/serde*");
    }

    #[test]
    fn errored_tool_shows_message() {
        let p = part(json!({
            "type": "tool", "tool": "grep",
            "state": {"status": "error", "error": "bad pattern", "input": {"pattern": "["}}
        }));
        assert_eq!(render_part(&p), "⨯ grep _bad pattern_ *[*");
    }

    #[test]
    fn todowrite_shows_first_in_progress_item() {
        let p = part(json!({
            "type": "tool", "tool": "todowrite",
            "state": {"status": "completed", "input": {"todos": [
                {"content": "done thing", "status": "completed"},
                {"content": "current thing", "status": "in_progress"},
                {"content": "next thing", "status": "pending"}
            ]}}
        }));
        assert_eq!(render_part(&p), "2. **current thing**");
    }

    #[test]
    fn bash_has_no_summary() {
        let p = part(json!({
            "type": "tool", "tool": "bash",
            "state": {"status": "completed", "title": "ls -la", "input": {"command": "ls -la"}}
        }));
        assert_eq!(render_part(&p), "◼︎ bash ls -la");
    }

    #[test]
    fn unknown_tool_renders_truncated_inputs() {
        let p = part(json!({
            "type": "tool", "tool": "customthing",
            "state": {"status": "completed", "input": {"arg": "v".repeat(400)}}
        }));
        let out = render_part(&p);
        assert!(out.starts_with("◼︎ customthing arg: "));
        assert!(out.chars().count() < 350);
        assert!(out.ends_with('…'));
    }

    #[test]
    fn file_part_prefers_filename() {
        let p = part(json!({"type": "file", "filename": "photo.png", "mime": "image/png"}));
        assert_eq!(render_part(&p), "📄 photo.png");
        let anon = part(json!({"type": "file", "mime": "image/png"}));
        assert_eq!(render_part(&anon), "📄 File");
    }
}

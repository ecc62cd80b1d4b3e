use crate::agent::{
    AgentClient, AgentEvent, ClientError, Part, PartBody, PromptPart, Role, Session, ToolStatus,
};
use crate::bridge::cancel::AbortReason;
use crate::bridge::permission::{PendingPermission, permission_prompt};
use crate::markdown::{normalize_tables, split_for_discord};
use crate::render::render_part;
use crate::state::AppState;
use anyhow::Result;
use futures_util::StreamExt;
use reqwest_eventsource::Event as SseEvent;
use serenity::http::{Http, Typing};
use serenity::model::id::{ChannelId, MessageId};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, warn};

pub const DISCORD_MAX_LEN: usize = 2000;
pub const RESUME_PART_LIMIT: usize = 30;
const SESSION_TITLE_MAX: usize = 80;
const DEBOUNCE_DELAY: Duration = Duration::from_millis(200);
const TYPING_RESTART_DELAY: Duration = Duration::from_millis(300);

pub struct SubmitRequest {
    pub thread_id: u64,
    pub prompt: String,
    pub file_parts: Vec<PromptPart>,
    pub directory: PathBuf,
    /// Message that triggered this submission; receives ✅/❌ reactions.
    pub trigger: Option<(u64, u64)>,
}

/// Bridge one user submission into an Agent session: resolve the session,
/// supersede any running submission, stream events back into the thread,
/// and post the completion footer.
pub async fn submit(state: &Arc<AppState>, http: &Arc<Http>, req: SubmitRequest) -> Result<()> {
    let thread = ChannelId::new(req.thread_id);

    let client = match state.agents.client_for(&req.directory).await {
        Ok(client) => client,
        Err(e) => {
            say(http, thread, &format!("✗ {e}")).await;
            react(http, &req.trigger, '❌').await;
            return Ok(());
        }
    };

    // resolve or create the session; the binding is persisted before any
    // post referencing it
    let mut session_id = state.store.thread_session(req.thread_id).await?;
    if let Some(id) = &session_id {
        if client.session(id).await.is_err() {
            state.store.unbind_thread_session(req.thread_id).await?;
            session_id = None;
        }
    }
    let session_id = match session_id {
        Some(id) => id,
        None => {
            let title = truncate_chars(&req.prompt, SESSION_TITLE_MAX);
            let session = match client.create_session(&title).await {
                Ok(session) => session,
                Err(e) => {
                    say(http, thread, &format!("✗ Unexpected bot Error: [AgentError]\n{e}")).await;
                    react(http, &req.trigger, '❌').await;
                    return Ok(());
                }
            };
            state
                .store
                .bind_thread_session(req.thread_id, &session.id)
                .await?;
            session.id
        }
    };

    // supersede any running submission, then debounce
    let (handle, superseded) = state.cancels.begin(&session_id).await;
    if superseded {
        tokio::time::sleep(DEBOUNCE_DELAY).await;
        if handle.is_aborted() {
            return Ok(());
        }
    }

    let mut events = match client.events() {
        Ok(events) => events,
        Err(e) => {
            if handle.is_aborted() {
                return Ok(());
            }
            say(http, thread, &format!("✗ Unexpected bot Error: [AgentError]\n{e}")).await;
            react(http, &req.trigger, '❌').await;
            handle.abort(AbortReason::Error);
            state.cancels.finish(&session_id, &handle).await;
            return Ok(());
        }
    };

    let started = std::time::Instant::now();
    let submit_fut = async {
        match parse_slash_command(&req.prompt) {
            Some((name, args)) => client
                .command(&session_id, &name, &args, handle.token())
                .await
                .map(|_| ()),
            None => {
                let mut parts = vec![PromptPart::Text {
                    text: req.prompt.clone(),
                }];
                parts.extend(req.file_parts.iter().cloned());
                client
                    .prompt(&session_id, parts, Some(system_block(&session_id)), handle.token())
                    .await
                    .map(|_| ())
            }
        }
    };
    tokio::pin!(submit_fut);

    let mut ctx = EventCtx {
        state: state.clone(),
        http: http.clone(),
        thread,
        session_id: session_id.clone(),
        client: client.clone(),
        trigger: req.trigger,
        directory: req.directory.clone(),
        parts: Vec::new(),
        current_assistant: None,
        model: None,
        tokens_used: 0,
        context_limit: None,
        fetched_limit: false,
        last_decile: 0,
        typing: None,
        typing_restart_at: None,
    };

    let mut submit_result: Option<Result<(), ClientError>> = None;

    loop {
        let restart_at = ctx.typing_restart_at;
        tokio::select! {
            _ = handle.cancelled() => break,
            result = &mut submit_fut, if submit_result.is_none() => {
                submit_result = Some(result);
                break;
            }
            _ = async {
                match restart_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                ctx.typing_restart_at = None;
                ctx.start_typing();
            }
            event = events.next() => {
                match event {
                    Some(Ok(SseEvent::Open)) => {}
                    Some(Ok(SseEvent::Message(message))) => {
                        match serde_json::from_str::<AgentEvent>(&message.data) {
                            Ok(event) => {
                                if ctx.handle_event(event).await.is_break() {
                                    handle.abort(AbortReason::Error);
                                    break;
                                }
                            }
                            Err(e) => warn!("Unparsable agent event: {e}"),
                        }
                    }
                    // transient; the event source retries on its own
                    Some(Err(e)) => warn!("Agent event stream error: {e}"),
                    None => break,
                }
            }
        }
    }

    ctx.stop_typing();
    // cleanup must flush whatever parts were already received
    ctx.flush_parts().await;

    match submit_result {
        Some(Ok(())) => {
            handle.abort(AbortReason::Finished);
            state.cancels.finish(&session_id, &handle).await;
            react(http, &req.trigger, '✅').await;
            let footer = ctx.footer(started.elapsed());
            say(http, thread, &footer).await;
        }
        Some(Err(ClientError::Aborted)) | None => {
            state.cancels.finish(&session_id, &handle).await;
            // reason-specific output already happened (supersede is silent,
            // /abort confirms from the command, errors were posted inline)
        }
        Some(Err(e)) => {
            handle.abort(AbortReason::Error);
            state.cancels.finish(&session_id, &handle).await;
            say(http, thread, &format!("✗ Unexpected bot Error: [AgentError]\n{e}")).await;
            react(http, &req.trigger, '❌').await;
        }
    }

    Ok(())
}

/// Replay a session into a freshly created thread: all but the last
/// [`RESUME_PART_LIMIT`] assistant parts are skipped, the rest are combined
/// into a single posting cycle, and every shown part is recorded against the
/// combined message.
pub async fn resume_session(
    state: &Arc<AppState>,
    http: &Arc<Http>,
    thread_id: u64,
    client: &AgentClient,
    session: &Session,
) -> Result<()> {
    let thread = ChannelId::new(thread_id);
    let messages = client.session_messages(&session.id).await?;

    let assistant_parts: Vec<&Part> = messages
        .iter()
        .filter(|m| m.info.role == Role::Assistant)
        .flat_map(|m| m.parts.iter())
        .collect();

    let total = assistant_parts.len();
    let skipped = total.saturating_sub(RESUME_PART_LIMIT);
    if skipped > 0 {
        say(
            http,
            thread,
            &format!("Skipped {skipped} older assistant parts — showing the last {RESUME_PART_LIMIT}."),
        )
        .await;
    }

    let shown = &assistant_parts[skipped..];
    let mut combined = String::new();
    for part in shown {
        let rendered = render_part(part);
        if !rendered.trim().is_empty() {
            combined.push_str(&rendered);
            combined.push_str("\n\n");
        }
    }

    if combined.trim().is_empty() {
        return Ok(());
    }

    let combined = normalize_tables(&combined);
    let mut first_message = None;
    for chunk in split_for_discord(&combined, DISCORD_MAX_LEN) {
        if let Some(id) = say(http, thread, &chunk).await {
            first_message.get_or_insert(id);
        }
    }

    if let Some(message_id) = first_message {
        for part in shown {
            state
                .store
                .record_part_message(&part.id, message_id.get(), thread_id)
                .await?;
            state.mark_part_sent(&part.id);
        }
    }

    Ok(())
}

struct EventCtx {
    state: Arc<AppState>,
    http: Arc<Http>,
    thread: ChannelId,
    session_id: String,
    client: AgentClient,
    trigger: Option<(u64, u64)>,
    directory: PathBuf,
    parts: Vec<Part>,
    current_assistant: Option<String>,
    model: Option<String>,
    tokens_used: u64,
    context_limit: Option<u64>,
    fetched_limit: bool,
    last_decile: u64,
    typing: Option<Typing>,
    typing_restart_at: Option<Instant>,
}

impl EventCtx {
    async fn handle_event(&mut self, event: AgentEvent) -> ControlFlow<()> {
        match event {
            AgentEvent::MessageUpdated { info } if info.session_id == self.session_id => {
                if info.role == Role::Assistant {
                    self.current_assistant = Some(info.id.clone());
                    if let Some(model) = info.model_id {
                        self.model = Some(model);
                    }
                    if let Some(tokens) = info.tokens {
                        let used = tokens.total();
                        if used > 0 {
                            self.tokens_used = used;
                            self.maybe_report_context().await;
                        }
                    }
                }
            }
            AgentEvent::PartUpdated { part } if part.session_id == self.session_id => {
                self.on_part(part).await;
            }
            AgentEvent::SessionError { session_id, error }
                if session_id.as_deref() == Some(self.session_id.as_str()) =>
            {
                let message = error
                    .map(|e| e.message())
                    .unwrap_or_else(|| "unknown error".to_string());
                self.say(&format!("✗ opencode session error: {message}")).await;
                react(&self.http, &self.trigger, '❌').await;
                return ControlFlow::Break(());
            }
            AgentEvent::PermissionUpdated(request) if request.session_id == self.session_id => {
                self.on_permission(request).await;
            }
            AgentEvent::PermissionReplied { session_id, .. }
                if session_id == self.session_id =>
            {
                self.state.permissions.clear_for_session(&session_id).await;
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }

    async fn on_part(&mut self, part: Part) {
        match self.current_assistant.as_deref() {
            Some(current) if current == part.message_id => {}
            _ => return,
        }

        let emit_now = match &part.body {
            PartBody::StepStart => {
                self.start_typing();
                false
            }
            PartBody::Tool { state, .. } => state.status == ToolStatus::Running,
            PartBody::Reasoning { text } => !text.trim().is_empty(),
            _ => false,
        };
        let is_step_finish = matches!(part.body, PartBody::StepFinish);

        self.upsert_part(part.clone());

        if emit_now {
            self.emit_one(&part).await;
        }

        if is_step_finish {
            self.flush_parts().await;
            self.stop_typing();
            self.typing_restart_at = Some(Instant::now() + TYPING_RESTART_DELAY);
        }
    }

    fn upsert_part(&mut self, part: Part) {
        match self.parts.iter_mut().find(|p| p.id == part.id) {
            Some(slot) => *slot = part,
            None => self.parts.push(part),
        }
    }

    async fn flush_parts(&mut self) {
        let parts = self.parts.clone();
        for part in &parts {
            if matches!(part.body, PartBody::StepStart | PartBody::StepFinish) {
                continue;
            }
            self.emit_one(part).await;
        }
    }

    /// Post one part, exactly once across the process lifetime. The
    /// `part_messages` row is the authoritative dedupe key; the in-memory
    /// set only saves the lookup.
    async fn emit_one(&mut self, part: &Part) {
        if self.state.part_already_sent(&part.id) {
            return;
        }
        match self.state.store.part_message(&part.id).await {
            Ok(Some(_)) => {
                self.state.mark_part_sent(&part.id);
                return;
            }
            Ok(None) => {}
            Err(e) => {
                error!("part_messages lookup failed: {e}");
                return;
            }
        }

        let rendered = render_part(part);
        if rendered.trim().is_empty() {
            return;
        }

        let content = normalize_tables(&format!("{rendered}\n\n"));
        let mut first_message = None;
        for chunk in split_for_discord(&content, DISCORD_MAX_LEN) {
            if let Some(id) = say(&self.http, self.thread, &chunk).await {
                first_message.get_or_insert(id);
            }
        }

        if let Some(message_id) = first_message {
            if let Err(e) = self
                .state
                .store
                .record_part_message(&part.id, message_id.get(), self.thread.get())
                .await
            {
                error!("Failed to record part message: {e}");
            }
            self.state.mark_part_sent(&part.id);
        }
    }

    async fn maybe_report_context(&mut self) {
        if !self.fetched_limit {
            if let Some(model) = self.model.clone() {
                self.fetched_limit = true;
                self.context_limit = self.client.model_context_limit(&model).await.ok().flatten();
            }
        }

        let Some(limit) = self.context_limit.filter(|l| *l > 0) else {
            return;
        };
        let decile = (self.tokens_used * 10 / limit) * 10;
        if decile > self.last_decile {
            self.last_decile = decile;
            self.say(&format!("◼︎ context usage {decile}%")).await;
        }
    }

    async fn on_permission(&mut self, request: crate::agent::PermissionRequest) {
        let prompt = permission_prompt(&request);
        let Some(message_id) = self.say(&prompt).await else {
            return;
        };

        self.state
            .permissions
            .set(
                self.thread.get(),
                PendingPermission {
                    permission_id: request.id.clone(),
                    session_id: request.session_id.clone(),
                    kind: request.kind.clone(),
                    title: request.title.clone(),
                    pattern: request.pattern_text(),
                    message_id: message_id.get(),
                    directory: self.directory.clone(),
                },
            )
            .await;
    }

    fn footer(&self, elapsed: Duration) -> String {
        let mut footer = format!("_Completed in {}_", fmt_duration(elapsed));
        if let Some(limit) = self.context_limit.filter(|l| *l > 0) {
            if self.tokens_used > 0 {
                footer.push_str(&format!(" ⋅ {}%", self.tokens_used * 100 / limit));
            }
        }
        footer.push_str(&format!(
            " ⋅ {} ⋅ {}",
            self.session_id,
            self.model.as_deref().unwrap_or("unknown")
        ));
        footer
    }

    fn start_typing(&mut self) {
        if self.typing.is_none() {
            self.typing = Some(self.thread.start_typing(&self.http));
        }
    }

    fn stop_typing(&mut self) {
        if let Some(typing) = self.typing.take() {
            typing.stop();
        }
    }

    async fn say(&self, content: &str) -> Option<MessageId> {
        say(&self.http, self.thread, content).await
    }
}

async fn say(http: &Arc<Http>, channel: ChannelId, content: &str) -> Option<MessageId> {
    match channel.say(http, content).await {
        Ok(message) => Some(message.id),
        Err(e) => {
            error!("Failed to post to {channel}: {e}");
            None
        }
    }
}

async fn react(http: &Arc<Http>, trigger: &Option<(u64, u64)>, emoji: char) {
    let Some((channel_id, message_id)) = trigger else {
        return;
    };
    let reaction = serenity::model::channel::ReactionType::Unicode(emoji.to_string());
    if let Err(e) = http
        .create_reaction(
            ChannelId::new(*channel_id),
            MessageId::new(*message_id),
            &reaction,
        )
        .await
    {
        error!("Failed to react on message {message_id}: {e}");
    }
}

fn system_block(session_id: &str) -> String {
    format!(
        "You are replying through remote-vibe, a Discord bridge for this coding session \
         (id {session_id}). Discord renders a limited markdown subset: bold, italic, inline \
         code, fenced code blocks, lists, and links. Never use heading levels deeper than \
         ###, and never emit GFM tables — write aligned plain text instead."
    )
}

fn parse_slash_command(prompt: &str) -> Option<(String, String)> {
    let rest = prompt.trim().strip_prefix('/')?;
    if rest.is_empty() {
        return None;
    }
    let (name, args) = rest
        .split_once(char::is_whitespace)
        .unwrap_or((rest, ""));
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return None;
    }
    Some((name.to_string(), args.trim().to_string()))
}

pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn fmt_duration(elapsed: Duration) -> String {
    if elapsed.as_secs() == 0 {
        format!("{}ms", elapsed.as_millis())
    } else {
        format!("{}s", elapsed.as_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slash_commands_parse() {
        assert_eq!(
            parse_slash_command("/review src/main.rs"),
            Some(("review".to_string(), "src/main.rs".to_string()))
        );
        assert_eq!(
            parse_slash_command("/compact"),
            Some(("compact".to_string(), String::new()))
        );
        assert_eq!(parse_slash_command("hello world"), None);
        assert_eq!(parse_slash_command("/"), None);
        assert_eq!(parse_slash_command("/bad*name args"), None);
    }

    #[test]
    fn durations_format_like_the_footer_expects() {
        assert_eq!(fmt_duration(Duration::from_millis(420)), "420ms");
        assert_eq!(fmt_duration(Duration::from_secs(3)), "3s");
        assert_eq!(fmt_duration(Duration::from_secs(95)), "95s");
    }

    #[test]
    fn titles_truncate_by_chars() {
        let long = "ü".repeat(100);
        assert_eq!(truncate_chars(&long, 80).chars().count(), 80);
        assert_eq!(truncate_chars("short", 80), "short");
    }
}

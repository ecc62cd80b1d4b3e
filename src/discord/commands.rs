use super::util::{normalize_path, sanitize_project_name};
use crate::agent::{AgentClient, PermissionScope};
use crate::bridge::{self, AbortReason, DISCORD_MAX_LEN, SubmitRequest, truncate_chars};
use crate::state::AppState;
use crate::store::ChannelKind;
use crate::topic::assemble_topic;
use anyhow::{Context as _, Result, bail};
use serenity::builder::{
    CreateAutocompleteResponse, CreateChannel, CreateCommand, CreateCommandOption,
    CreateInteractionResponse, CreateInteractionResponseMessage, CreateThread,
};
use serenity::model::application::{CommandInteraction, CommandOptionType};
use serenity::model::channel::ChannelType;
use serenity::model::id::{ChannelId, GuildId};
use serenity::prelude::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

const THREAD_NAME_MAX: usize = 100;
const AUTOCOMPLETE_LIMIT: usize = 25;
const CHOICE_MAX: usize = 100;

pub fn command_definitions() -> Vec<CreateCommand> {
    vec![
        CreateCommand::new("session")
            .description("Start a new coding session in this project channel")
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "prompt", "What to work on")
                    .required(true),
            )
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "files",
                    "Comma-separated project files to mention",
                )
                .set_autocomplete(true),
            ),
        CreateCommand::new("resume")
            .description("Resume an existing session in a new thread")
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "session", "Session to resume")
                    .required(true)
                    .set_autocomplete(true),
            ),
        CreateCommand::new("add-project")
            .description("Create channels for a project the agent already knows")
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "project", "Project directory")
                    .required(true)
                    .set_autocomplete(true),
            ),
        CreateCommand::new("create-new-project")
            .description("Create a fresh project under ~/remote-vibe and bind channels")
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "name", "Project name")
                    .required(true),
            ),
        CreateCommand::new("add-existing-project")
            .description("Bind channels to an existing directory on disk")
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "path", "Directory path")
                    .required(true),
            ),
        CreateCommand::new("accept").description("Accept the pending permission request"),
        CreateCommand::new("accept-always")
            .description("Accept the pending permission request and similar future ones"),
        CreateCommand::new("reject").description("Reject the pending permission request"),
        CreateCommand::new("abort").description("Abort the running session in this thread"),
        CreateCommand::new("share").description("Share this thread's session and post the link"),
    ]
}

pub async fn dispatch(state: &Arc<AppState>, ctx: &Context, cmd: &CommandInteraction) {
    let result = match cmd.data.name.as_str() {
        "session" => session(state, ctx, cmd).await,
        "resume" => resume(state, ctx, cmd).await,
        "add-project" => add_project(state, ctx, cmd).await,
        "create-new-project" => create_new_project(state, ctx, cmd).await,
        "add-existing-project" => add_existing_project(state, ctx, cmd).await,
        "accept" => resolve_permission(state, ctx, cmd, PermissionScope::Once).await,
        "accept-always" => resolve_permission(state, ctx, cmd, PermissionScope::Always).await,
        "reject" => resolve_permission(state, ctx, cmd, PermissionScope::Reject).await,
        "abort" => abort(state, ctx, cmd).await,
        "share" => share(state, ctx, cmd).await,
        // unknown commands are ignored
        _ => Ok(()),
    };

    if let Err(e) = result {
        error!("Command /{} failed: {e}", cmd.data.name);
        let _ = respond(ctx, cmd, &format!("✗ {e}"), true).await;
    }
}

// ── command handlers ────────────────────────────────────────────────

async fn session(state: &Arc<AppState>, ctx: &Context, cmd: &CommandInteraction) -> Result<()> {
    let binding = state
        .store
        .channel_directory(cmd.channel_id.get())
        .await?
        .context("This channel is not bound to a project directory")?;

    let prompt = option_str(cmd, "prompt").context("Missing prompt")?.to_string();
    let mut full_prompt = prompt.clone();
    if let Some(files) = option_str(cmd, "files") {
        let mentions = files
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(|f| format!("@{f}"))
            .collect::<Vec<_>>()
            .join(" ");
        if !mentions.is_empty() {
            full_prompt.push(' ');
            full_prompt.push_str(&mentions);
        }
    }

    cmd.defer_ephemeral(&ctx.http).await?;

    let starter = cmd
        .channel_id
        .say(&ctx.http, truncate_chars(&full_prompt, DISCORD_MAX_LEN))
        .await?;
    let thread = cmd
        .channel_id
        .create_thread_from_message(
            &ctx.http,
            starter.id,
            CreateThread::new(truncate_chars(&prompt, THREAD_NAME_MAX)),
        )
        .await?;

    followup(ctx, cmd, &format!("Started session in <#{}>", thread.id)).await;

    let state = state.clone();
    let http = ctx.http.clone();
    let request = SubmitRequest {
        thread_id: thread.id.get(),
        prompt: full_prompt,
        file_parts: Vec::new(),
        directory: PathBuf::from(binding.directory),
        trigger: Some((cmd.channel_id.get(), starter.id.get())),
    };
    tokio::spawn(async move {
        if let Err(e) = bridge::submit(&state, &http, request).await {
            error!("Session submission failed: {e}");
        }
    });

    Ok(())
}

async fn resume(state: &Arc<AppState>, ctx: &Context, cmd: &CommandInteraction) -> Result<()> {
    let binding = state
        .store
        .channel_directory(cmd.channel_id.get())
        .await?
        .context("This channel is not bound to a project directory")?;
    let session_id = option_str(cmd, "session").context("Missing session")?.to_string();

    cmd.defer_ephemeral(&ctx.http).await?;

    let directory = PathBuf::from(&binding.directory);
    let client = state.agents.client_for(&directory).await?;
    let session = client
        .session(&session_id)
        .await
        .context("The agent no longer knows this session")?;

    let starter = cmd
        .channel_id
        .say(&ctx.http, format!("Resuming **{}**", session.title))
        .await?;
    let thread = cmd
        .channel_id
        .create_thread_from_message(
            &ctx.http,
            starter.id,
            CreateThread::new(truncate_chars(
                &format!("Resume: {}", session.title),
                THREAD_NAME_MAX,
            )),
        )
        .await?;

    // the binding must exist before any post that belongs to the session
    state
        .store
        .bind_thread_session(thread.id.get(), &session.id)
        .await?;

    bridge::resume_session(state, &ctx.http, thread.id.get(), &client, &session).await?;

    followup(ctx, cmd, &format!("Resumed in <#{}>", thread.id)).await;
    Ok(())
}

async fn add_project(state: &Arc<AppState>, ctx: &Context, cmd: &CommandInteraction) -> Result<()> {
    let guild_id = cmd.guild_id.context("This command only works in a server")?;
    let directory = option_str(cmd, "project").context("Missing project")?.to_string();

    cmd.defer_ephemeral(&ctx.http).await?;

    if project_already_bound(state, ctx, &directory).await? {
        followup(ctx, cmd, "That project already has channels here.").await;
        return Ok(());
    }

    let (text, voice) = create_project_channels(state, ctx, guild_id, &directory).await?;
    followup(
        ctx,
        cmd,
        &format!("Project bound: <#{text}> for sessions, <#{voice}> for voice."),
    )
    .await;
    Ok(())
}

async fn create_new_project(
    state: &Arc<AppState>,
    ctx: &Context,
    cmd: &CommandInteraction,
) -> Result<()> {
    let guild_id = cmd.guild_id.context("This command only works in a server")?;
    let raw_name = option_str(cmd, "name").context("Missing name")?;
    let name = sanitize_project_name(raw_name);
    if name.is_empty() {
        bail!("Project name has no usable characters");
    }

    cmd.defer_ephemeral(&ctx.http).await?;

    let directory = dirs::home_dir()
        .context("No home directory")?
        .join("remote-vibe")
        .join(&name);
    tokio::fs::create_dir_all(&directory).await?;

    let git = tokio::process::Command::new("git")
        .arg("init")
        .current_dir(&directory)
        .output()
        .await;
    if let Err(e) = git {
        error!("git init failed for {}: {e}", directory.display());
    }

    let directory_str = directory.to_string_lossy().to_string();
    let (text, voice) = create_project_channels(state, ctx, guild_id, &directory_str).await?;

    start_project_thread(
        state,
        ctx,
        text,
        &directory,
        &format!("Set up {name}"),
        "Hi! This is a brand new empty project. Introduce yourself briefly and ask what we \
         should build first.",
    )
    .await?;

    followup(
        ctx,
        cmd,
        &format!("Created `{}` — <#{text}> / <#{voice}>", directory.display()),
    )
    .await;
    Ok(())
}

async fn add_existing_project(
    state: &Arc<AppState>,
    ctx: &Context,
    cmd: &CommandInteraction,
) -> Result<()> {
    let guild_id = cmd.guild_id.context("This command only works in a server")?;
    let raw_path = option_str(cmd, "path").context("Missing path")?;
    let directory = normalize_path(raw_path);
    if !directory.is_dir() {
        bail!("Directory does not exist: {}", directory.display());
    }

    cmd.defer_ephemeral(&ctx.http).await?;

    let directory_str = directory.to_string_lossy().to_string();
    let (text, voice) = create_project_channels(state, ctx, guild_id, &directory_str).await?;

    start_project_thread(
        state,
        ctx,
        text,
        &directory,
        "Getting started",
        "Take a quick look around this project and ask me what I want to work on.",
    )
    .await?;

    followup(ctx, cmd, &format!("Project bound: <#{text}> / <#{voice}>")).await;
    Ok(())
}

async fn resolve_permission(
    state: &Arc<AppState>,
    ctx: &Context,
    cmd: &CommandInteraction,
    scope: PermissionScope,
) -> Result<()> {
    let Some(pending) = state.permissions.take(cmd.channel_id.get()).await else {
        respond(ctx, cmd, "No pending permission in this thread.", true).await;
        return Ok(());
    };

    let client = state.agents.client_for(&pending.directory).await?;
    client
        .reply_permission(&pending.session_id, &pending.permission_id, scope)
        .await?;

    let confirmation = match scope {
        PermissionScope::Once => "✅ Permission accepted",
        PermissionScope::Always => "✅ Permission accepted (auto-approve similar requests)",
        PermissionScope::Reject => "🚫 Permission rejected",
    };
    respond(ctx, cmd, confirmation, false).await;
    Ok(())
}

async fn abort(state: &Arc<AppState>, ctx: &Context, cmd: &CommandInteraction) -> Result<()> {
    let Some(session_id) = state.store.thread_session(cmd.channel_id.get()).await? else {
        respond(ctx, cmd, "No session bound to this thread.", true).await;
        return Ok(());
    };

    state.cancels.abort(&session_id, AbortReason::UserAbort).await;

    if let Some(client) = thread_client(state, ctx, cmd.channel_id).await {
        if let Err(e) = client.abort_session(&session_id).await {
            error!("Agent-side abort failed: {e}");
        }
    }

    respond(ctx, cmd, "⏹ Session aborted.", false).await;
    Ok(())
}

async fn share(state: &Arc<AppState>, ctx: &Context, cmd: &CommandInteraction) -> Result<()> {
    let Some(session_id) = state.store.thread_session(cmd.channel_id.get()).await? else {
        respond(ctx, cmd, "No session bound to this thread.", true).await;
        return Ok(());
    };

    let client = thread_client(state, ctx, cmd.channel_id)
        .await
        .context("No project directory for this thread")?;
    let url = client
        .share_session(&session_id)
        .await?
        .context("The agent did not return a share link")?;

    respond(ctx, cmd, &format!("🔗 **Session shared:** {url}"), false).await;
    Ok(())
}

// ── autocomplete ────────────────────────────────────────────────────

pub async fn autocomplete(state: &Arc<AppState>, ctx: &Context, cmd: &CommandInteraction) {
    let Some(focused) = cmd.data.autocomplete() else {
        return;
    };

    let choices = match (cmd.data.name.as_str(), focused.name) {
        ("resume", "session") => resume_choices(state, cmd, focused.value).await,
        ("session", "files") => file_choices(state, cmd, focused.value).await,
        ("add-project", "project") => project_choices(state).await,
        _ => Vec::new(),
    };

    let mut response = CreateAutocompleteResponse::new();
    for (name, value) in choices.into_iter().take(AUTOCOMPLETE_LIMIT) {
        response = response.add_string_choice(
            truncate_chars(&name, CHOICE_MAX),
            truncate_chars(&value, CHOICE_MAX),
        );
    }
    if let Err(e) = cmd
        .create_response(&ctx.http, CreateInteractionResponse::Autocomplete(response))
        .await
    {
        error!("Autocomplete response failed: {e}");
    }
}

async fn resume_choices(
    state: &Arc<AppState>,
    cmd: &CommandInteraction,
    prefix: &str,
) -> Vec<(String, String)> {
    let Ok(Some(binding)) = state.store.channel_directory(cmd.channel_id.get()).await else {
        return Vec::new();
    };
    let directory = PathBuf::from(&binding.directory);
    let Some(client) = state.agents.existing_client(&directory).await else {
        return Vec::new();
    };
    let Ok(mut sessions) = client.sessions().await else {
        return Vec::new();
    };

    let needle = prefix.to_lowercase();
    sessions.retain(|s| needle.is_empty() || s.title.to_lowercase().contains(&needle));
    sessions.sort_by(|a, b| b.time.updated.cmp(&a.time.updated));

    sessions
        .into_iter()
        .map(|s| {
            let date = chrono::DateTime::from_timestamp_millis(s.time.updated)
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default();
            (format!("{} ({date})", s.title), s.id)
        })
        .collect()
}

async fn file_choices(
    state: &Arc<AppState>,
    cmd: &CommandInteraction,
    input: &str,
) -> Vec<(String, String)> {
    let Ok(Some(binding)) = state.store.channel_directory(cmd.channel_id.get()).await else {
        return Vec::new();
    };

    // complete only the last comma-delimited token
    let (kept, last) = match input.rfind(',') {
        Some(i) => (&input[..=i], input[i + 1..].trim()),
        None => ("", input.trim()),
    };

    let files =
        crate::transcribe::project_file_tree(Path::new(&binding.directory), 500).await;

    files
        .into_iter()
        .filter(|f| last.is_empty() || f.starts_with(last) || f.contains(last))
        .map(|f| {
            let value = format!("{kept}{f}");
            let display = value
                .split(',')
                .map(|p| p.trim().rsplit('/').next().unwrap_or(p))
                .collect::<Vec<_>>()
                .join(" ");
            (display, value)
        })
        .collect()
}

async fn project_choices(state: &Arc<AppState>) -> Vec<(String, String)> {
    let client = match state.agents.any_client().await {
        Some(client) => client,
        None => return Vec::new(),
    };
    let Ok(mut projects) = client.projects().await else {
        return Vec::new();
    };

    let bound: Vec<String> = state
        .store
        .all_channel_directories()
        .await
        .map(|rows| rows.into_iter().map(|r| r.directory).collect())
        .unwrap_or_default();

    // intentionally undeduplicated, newest first
    projects.sort_by(|a, b| b.time.created.cmp(&a.time.created));
    projects
        .into_iter()
        .filter(|p| !bound.contains(&p.worktree))
        .map(|p| (p.worktree.clone(), p.worktree))
        .collect()
}

// ── shared helpers ──────────────────────────────────────────────────

async fn create_project_channels(
    state: &Arc<AppState>,
    ctx: &Context,
    guild_id: GuildId,
    directory: &str,
) -> Result<(ChannelId, ChannelId)> {
    let name = sanitize_project_name(
        Path::new(directory)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "project".to_string())
            .as_str(),
    );
    let name = if name.is_empty() { "project".to_string() } else { name };

    let text = guild_id
        .create_channel(
            &ctx.http,
            CreateChannel::new(&name)
                .kind(ChannelType::Text)
                .topic(assemble_topic(directory, &state.app_id)),
        )
        .await?;
    let voice = guild_id
        .create_channel(
            &ctx.http,
            CreateChannel::new(format!("{name}-voice")).kind(ChannelType::Voice),
        )
        .await?;

    state
        .store
        .bind_channel_directory(text.id.get(), directory, ChannelKind::Text)
        .await?;
    state
        .store
        .bind_channel_directory(voice.id.get(), directory, ChannelKind::Voice)
        .await?;

    info!("Bound {} to #{name} in guild {guild_id}", directory);
    Ok((text.id, voice.id))
}

/// Rows pointing at channels Discord no longer knows are stale; drop them
/// and keep going.
async fn project_already_bound(
    state: &Arc<AppState>,
    ctx: &Context,
    directory: &str,
) -> Result<bool> {
    let rows = state.store.all_channel_directories().await?;
    let mut bound = false;
    for row in rows.into_iter().filter(|r| r.directory == directory) {
        if ctx.http.get_channel(ChannelId::new(row.channel_id)).await.is_ok() {
            bound = true;
        } else {
            state.store.unbind_channel_directory(row.channel_id).await?;
        }
    }
    Ok(bound)
}

async fn start_project_thread(
    state: &Arc<AppState>,
    ctx: &Context,
    channel: ChannelId,
    directory: &Path,
    thread_name: &str,
    greeting: &str,
) -> Result<()> {
    let starter = channel.say(&ctx.http, greeting).await?;
    let thread = channel
        .create_thread_from_message(
            &ctx.http,
            starter.id,
            CreateThread::new(truncate_chars(thread_name, THREAD_NAME_MAX)),
        )
        .await?;

    let state = state.clone();
    let http = ctx.http.clone();
    let request = SubmitRequest {
        thread_id: thread.id.get(),
        prompt: greeting.to_string(),
        file_parts: Vec::new(),
        directory: directory.to_path_buf(),
        trigger: Some((channel.get(), starter.id.get())),
    };
    tokio::spawn(async move {
        if let Err(e) = bridge::submit(&state, &http, request).await {
            error!("Greeting submission failed: {e}");
        }
    });

    Ok(())
}

async fn thread_client(
    state: &Arc<AppState>,
    ctx: &Context,
    thread_id: ChannelId,
) -> Option<AgentClient> {
    let channel = ctx.http.get_channel(thread_id).await.ok()?;
    let parent = channel.guild()?.parent_id?;
    let binding = state.store.channel_directory(parent.get()).await.ok()??;
    state
        .agents
        .client_for(Path::new(&binding.directory))
        .await
        .ok()
}

fn option_str<'a>(cmd: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    cmd.data
        .options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.value.as_str())
}

async fn respond(ctx: &Context, cmd: &CommandInteraction, content: &str, ephemeral: bool) {
    let response = CreateInteractionResponse::Message(
        CreateInteractionResponseMessage::new()
            .content(content)
            .ephemeral(ephemeral),
    );
    if let Err(e) = cmd.create_response(&ctx.http, response).await {
        // the interaction may already be acknowledged; fall back to a followup
        error!("Interaction response failed: {e}");
        followup(ctx, cmd, content).await;
    }
}

async fn followup(ctx: &Context, cmd: &CommandInteraction, content: &str) {
    let builder = serenity::builder::CreateInteractionResponseFollowup::new().content(content);
    if let Err(e) = cmd.create_followup(&ctx.http, builder).await {
        error!("Interaction followup failed: {e}");
    }
}

use super::{attachments, authorize, commands, util};
use crate::bridge::{self, SubmitRequest, truncate_chars};
use crate::state::AppState;
use crate::store::{ChannelBinding, ChannelKind};
use crate::topic::extract_tags;
use serenity::async_trait;
use serenity::builder::{CreateThread, EditThread};
use serenity::model::application::{Command, Interaction};
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::model::id::{ChannelId, GuildId};
use serenity::model::voice::VoiceState;
use serenity::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const THREAD_TITLE_MAX: usize = 80;
const THREAD_RENAME_TIMEOUT: Duration = Duration::from_secs(2);

pub(super) struct Handler {
    pub state: Arc<AppState>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("Bridge connected as {} (app {})", ready.user.name, self.state.app_id);

        match Command::set_global_commands(&ctx.http, commands::command_definitions()).await {
            Ok(registered) => info!("Registered {} slash commands", registered.len()),
            Err(e) => error!("Failed to register slash commands: {e}"),
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot || self.state.is_shutting_down() {
            return;
        }

        let roles = msg
            .member
            .as_ref()
            .map(|m| m.roles.clone())
            .unwrap_or_default();
        if !authorize::is_authorized(&ctx, msg.guild_id, &msg.author, &roles) {
            return;
        }

        // messages inside a bound thread continue that session
        match self.state.store.thread_session(msg.channel_id.get()).await {
            Ok(Some(_)) => {
                self.thread_message(&ctx, &msg).await;
                return;
            }
            Ok(None) => {}
            Err(e) => {
                error!("thread_sessions lookup failed: {e}");
                return;
            }
        }

        // messages in a bound text channel open a new session thread;
        // anything else (including threads without a binding) is ignored
        match self.state.store.channel_directory(msg.channel_id.get()).await {
            Ok(Some(binding)) if binding.kind == ChannelKind::Text => {
                self.channel_message(&ctx, &msg, binding).await;
            }
            Ok(_) => {}
            Err(e) => error!("channel_directories lookup failed: {e}"),
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(cmd) => {
                let roles = cmd.member.as_ref().map(|m| m.roles.clone()).unwrap_or_default();
                if !authorize::is_authorized(&ctx, cmd.guild_id, &cmd.user, &roles) {
                    return;
                }
                commands::dispatch(&self.state, &ctx, &cmd).await;
            }
            Interaction::Autocomplete(cmd) => {
                let roles = cmd.member.as_ref().map(|m| m.roles.clone()).unwrap_or_default();
                if !authorize::is_authorized(&ctx, cmd.guild_id, &cmd.user, &roles) {
                    return;
                }
                commands::autocomplete(&self.state, &ctx, &cmd).await;
            }
            _ => {}
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        if self.state.is_shutting_down() {
            return;
        }
        let Some(guild_id) = new.guild_id else {
            return;
        };
        let Some(member) = &new.member else {
            return;
        };
        if member.user.bot {
            return;
        }

        if !authorize::is_authorized(&ctx, Some(guild_id), &member.user, &member.roles) {
            return;
        }

        if let Some(channel_id) = new.channel_id {
            if let Ok(Some(binding)) = self.state.store.channel_directory(channel_id.get()).await {
                if binding.kind == ChannelKind::Voice {
                    self.state
                        .voice
                        .ensure_started(
                            &self.state,
                            &ctx,
                            guild_id,
                            channel_id,
                            PathBuf::from(binding.directory),
                        )
                        .await;
                }
            }
        }

        // stop the worker when the user's previous bound channel drained
        if let Some(old_state) = old {
            if let Some(old_channel) = old_state.channel_id {
                if Some(old_channel) != new.channel_id
                    && self.bound_voice_channel_empty(&ctx, guild_id, old_channel).await
                {
                    self.state.voice.stop(guild_id).await;
                }
            }
        }
    }
}

impl Handler {
    async fn channel_message(&self, ctx: &Context, msg: &Message, binding: ChannelBinding) {
        if !self.channel_owned_by_us(ctx, msg.channel_id).await {
            return;
        }

        let directory = PathBuf::from(&binding.directory);
        let content = msg.content.trim().to_string();
        if content.is_empty() && msg.attachments.is_empty() {
            return;
        }

        let initial_title = if content.is_empty() {
            "Voice message".to_string()
        } else {
            truncate_chars(&content, THREAD_TITLE_MAX)
        };
        let thread = match msg
            .channel_id
            .create_thread_from_message(&ctx.http, msg.id, CreateThread::new(initial_title))
            .await
        {
            Ok(thread) => thread,
            Err(e) => {
                error!("Failed to open session thread: {e}");
                return;
            }
        };

        self.run_submission(ctx, msg, thread.id, directory, content, true).await;
    }

    async fn thread_message(&self, ctx: &Context, msg: &Message) {
        let Some(directory) = self.thread_directory(ctx, msg.channel_id).await else {
            return;
        };

        let content = msg.content.trim().to_string();
        if content.is_empty() && msg.attachments.is_empty() {
            return;
        }

        self.run_submission(ctx, msg, msg.channel_id, directory, content, false).await;
    }

    async fn run_submission(
        &self,
        ctx: &Context,
        msg: &Message,
        thread_id: ChannelId,
        directory: PathBuf,
        content: String,
        rename_thread: bool,
    ) {
        let classified =
            attachments::classify(&self.state, &msg.attachments, Some(&directory)).await;

        let mut prompt = match &classified.transcription {
            Some(transcript) => transcript.clone(),
            None => content,
        };

        if let Some(transcript) = &classified.transcription {
            let echo = format!(
                "📝 **Transcribed message:** {}",
                util::escape_code_chars(transcript)
            );
            if let Err(e) = thread_id.say(&ctx.http, echo).await {
                error!("Failed to echo transcript: {e}");
            }

            if rename_thread {
                let name = truncate_chars(transcript, THREAD_TITLE_MAX);
                let rename = thread_id.edit_thread(&ctx.http, EditThread::new().name(name));
                if tokio::time::timeout(THREAD_RENAME_TIMEOUT, rename).await.is_err() {
                    warn!("Thread rename timed out");
                }
            }
        }

        for envelope in &classified.inline {
            prompt.push_str("\n\n");
            prompt.push_str(envelope);
        }

        if prompt.trim().is_empty() && classified.file_parts.is_empty() {
            return;
        }

        let request = SubmitRequest {
            thread_id: thread_id.get(),
            prompt,
            file_parts: classified.file_parts,
            directory,
            trigger: Some((msg.channel_id.get(), msg.id.get())),
        };

        let state = self.state.clone();
        let http = ctx.http.clone();
        tokio::spawn(async move {
            if let Err(e) = bridge::submit(&state, &http, request).await {
                error!("Submission failed: {e}");
            }
        });
    }

    /// The descriptor in the channel topic decides ownership; a missing app
    /// tag leaves the channel open to any app.
    async fn channel_owned_by_us(&self, ctx: &Context, channel_id: ChannelId) -> bool {
        let Ok(channel) = ctx.http.get_channel(channel_id).await else {
            return false;
        };
        let Some(guild_channel) = channel.guild() else {
            return false;
        };
        match guild_channel.topic.as_deref() {
            Some(topic) => extract_tags(topic).owned_by(&self.state.app_id),
            None => true,
        }
    }

    async fn thread_directory(&self, ctx: &Context, thread_id: ChannelId) -> Option<PathBuf> {
        let channel = ctx.http.get_channel(thread_id).await.ok()?;
        let thread = channel.guild()?;
        let parent = thread.parent_id?;

        if !self.channel_owned_by_us(ctx, parent).await {
            return None;
        }

        let binding = self.state.store.channel_directory(parent.get()).await.ok()??;
        Some(PathBuf::from(binding.directory))
    }

    async fn bound_voice_channel_empty(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> bool {
        match self.state.store.channel_directory(channel_id.get()).await {
            Ok(Some(binding)) if binding.kind == ChannelKind::Voice => {}
            _ => return false,
        }

        let Some(guild) = ctx.cache.guild(guild_id) else {
            return false;
        };
        let occupants = guild
            .voice_states
            .values()
            .filter(|vs| vs.channel_id == Some(channel_id))
            .count();
        // the bridge's own connection may still be counted
        occupants <= 1
    }
}

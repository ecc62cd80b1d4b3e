use crate::state::AppState;
use crate::store::ChannelKind;
use serenity::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use serenity::prelude::Context;
use songbird::{CoreEvent, Event, EventContext, Songbird};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

mod audio;
mod pacer;
mod realtime;
mod tools;
mod transport;
mod worker;

pub use worker::WorkerMsg;

// 25 ticks of 20 ms
const SILENCE_TICKS: u32 = 25;
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

struct GuildVoice {
    tx: mpsc::UnboundedSender<WorkerMsg>,
    task: JoinHandle<()>,
    manager: Arc<Songbird>,
}

/// One realtime voice worker per guild, keyed by guild id.
#[derive(Default)]
pub struct VoiceRegistry {
    inner: Mutex<HashMap<u64, GuildVoice>>,
}

impl VoiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join `channel_id` and start the realtime worker, unless one is
    /// already running for this guild.
    pub async fn ensure_started(
        &self,
        state: &Arc<AppState>,
        ctx: &Context,
        guild_id: GuildId,
        channel_id: ChannelId,
        directory: PathBuf,
    ) {
        let mut inner = self.inner.lock().await;
        if inner.contains_key(&guild_id.get()) {
            return;
        }

        let Some(manager) = songbird::get(ctx).await else {
            error!("Songbird is not registered on this client");
            return;
        };

        let api_key = match state.store.api_keys(&state.app_id).await {
            Ok(Some((primary, _))) => primary,
            _ => {
                error!("No API key stored; cannot start realtime voice");
                return;
            }
        };

        let call = match manager.join(guild_id, channel_id).await {
            Ok(call) => call,
            Err(e) => {
                error!("Failed to join voice channel {channel_id}: {e}");
                return;
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut call_lock = call.lock().await;
            call_lock.add_global_event(
                Event::Core(CoreEvent::VoiceTick),
                RxHandler {
                    tx: tx.clone(),
                    state: Arc::new(StdMutex::new(RxState::default())),
                },
            );
        }

        let worker_state = state.clone();
        let http = ctx.http.clone();
        let worker_directory = directory.clone();
        let config = state.config.realtime.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = worker::run(
                worker_state.clone(),
                worker_directory.clone(),
                config,
                api_key,
                call,
                rx,
            )
            .await
            {
                error!("Voice worker failed: {e}");
                surface_error(&worker_state, &http, &worker_directory, &e).await;
            }
        });

        info!("Voice worker attached to {channel_id} in guild {guild_id}");
        inner.insert(guild_id.get(), GuildVoice { tx, task, manager });
    }

    /// Stop the guild's worker: close the model session, drain the sender,
    /// and destroy the voice connection.
    pub async fn stop(&self, guild_id: GuildId) {
        let Some(voice) = self.inner.lock().await.remove(&guild_id.get()) else {
            return;
        };

        let _ = voice.tx.send(WorkerMsg::Stop);
        if tokio::time::timeout(STOP_TIMEOUT, voice.task).await.is_err() {
            warn!("Voice worker for guild {guild_id} did not stop in time");
        }
        if let Err(e) = voice.manager.remove(guild_id).await {
            warn!("Failed to leave voice channel in guild {guild_id}: {e}");
        }
    }

    pub async fn shutdown_all(&self) {
        let guilds: Vec<u64> = self.inner.lock().await.keys().copied().collect();
        let stops = guilds.into_iter().map(|g| self.stop(GuildId::new(g)));
        futures_util::future::join_all(stops).await;
    }
}

async fn surface_error(
    state: &Arc<AppState>,
    http: &Arc<serenity::http::Http>,
    directory: &PathBuf,
    error: &anyhow::Error,
) {
    let directory = directory.to_string_lossy().to_string();
    let Ok(rows) = state.store.all_channel_directories().await else {
        return;
    };
    let Some(text) = rows
        .iter()
        .find(|r| r.directory == directory && r.kind == ChannelKind::Text)
    else {
        return;
    };
    let _ = ChannelId::new(text.channel_id)
        .say(http, format!("✗ Voice session error: {error}"))
        .await;
}

#[derive(Default)]
struct RxState {
    session: u64,
    speaking: bool,
    silent_ticks: u32,
}

impl RxState {
    /// Advance by one 20 ms tick. A speaking burst bumps the session
    /// counter; 500 ms of quiet after a burst emits the silence marker.
    fn advance(&mut self, pcm: Option<Vec<i16>>) -> Vec<WorkerMsg> {
        let mut out = Vec::new();
        match pcm {
            Some(pcm) => {
                if !self.speaking {
                    self.speaking = true;
                    self.session += 1;
                    out.push(WorkerMsg::SpeakingStart {
                        session: self.session,
                    });
                }
                self.silent_ticks = 0;
                out.push(WorkerMsg::Audio {
                    session: self.session,
                    pcm,
                });
            }
            None => {
                if self.speaking {
                    self.silent_ticks += 1;
                    if self.silent_ticks >= SILENCE_TICKS {
                        self.speaking = false;
                        self.silent_ticks = 0;
                        out.push(WorkerMsg::SilenceEnd {
                            session: self.session,
                        });
                    }
                }
            }
        }
        out
    }
}

/// Turns songbird's 20 ms voice ticks into worker messages.
struct RxHandler {
    tx: mpsc::UnboundedSender<WorkerMsg>,
    state: Arc<StdMutex<RxState>>,
}

#[async_trait]
impl songbird::EventHandler for RxHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::VoiceTick(tick) = ctx {
            let pcm = tick
                .speaking
                .values()
                .find_map(|data| data.decoded_voice.clone());
            let messages = self.state.lock().unwrap().advance(pcm);
            for message in messages {
                let _ = self.tx.send(message);
            }
        }
        None
    }
}

#[cfg(test)]
mod rx_tests {
    use super::*;

    #[test]
    fn silence_marker_fires_after_500ms_and_session_increments() {
        let mut state = RxState::default();
        let mut messages = Vec::new();

        // 1.5 s of speech = 75 ticks
        for _ in 0..75 {
            messages.extend(state.advance(Some(vec![0i16; 1920])));
        }
        // 600 ms of silence = 30 ticks
        for _ in 0..30 {
            messages.extend(state.advance(None));
        }
        // second burst gets a fresh session counter
        messages.extend(state.advance(Some(vec![0i16; 1920])));

        let mut starts = Vec::new();
        let mut audio_count = 0;
        let mut ends = Vec::new();
        for message in messages {
            match message {
                WorkerMsg::SpeakingStart { session } => starts.push(session),
                WorkerMsg::Audio { .. } => audio_count += 1,
                WorkerMsg::SilenceEnd { session } => ends.push(session),
                _ => {}
            }
        }

        assert_eq!(starts, vec![1, 2]);
        assert_eq!(ends, vec![1]);
        assert_eq!(audio_count, 76);
    }

    #[test]
    fn short_pauses_do_not_end_the_stream() {
        let mut state = RxState::default();
        let mut messages = Vec::new();

        messages.extend(state.advance(Some(vec![0i16; 4])));
        for _ in 0..SILENCE_TICKS - 1 {
            messages.extend(state.advance(None));
        }
        messages.extend(state.advance(Some(vec![0i16; 4])));

        assert!(
            !messages.iter().any(|m| matches!(m, WorkerMsg::SilenceEnd { .. })),
            "a sub-500ms pause must not end the stream"
        );
        // still the same speaking session
        let starts = messages
            .iter()
            .filter(|m| matches!(m, WorkerMsg::SpeakingStart { .. }))
            .count();
        assert_eq!(starts, 1);
    }
}

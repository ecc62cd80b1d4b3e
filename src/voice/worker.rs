use super::audio::{
    MODEL_FRAME_SAMPLES, OPUS_FRAME_SAMPLES, Framer, downmix_48k_stereo_to_16k_mono,
    pcm_to_bytes, upsample_24k_mono_to_48k_stereo,
};
use super::pacer::PacedSender;
use super::realtime::{RealtimeClient, RealtimeEvent};
use super::tools;
use super::transport::SongbirdTransport;
use crate::config::RealtimeConfig;
use crate::state::AppState;
use anyhow::{Context as _, Result};
use audiopus::coder::Encoder;
use audiopus::{Application, Channels, SampleRate};
use serde_json::json;
use songbird::Call;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
// one 20 ms frame of 48 kHz stereo
const ENCODE_FRAME: usize = OPUS_FRAME_SAMPLES * 2;
const ENCODE_BUF: usize = 4000;

/// Typed messages crossing the voice worker boundary. Audio payloads are
/// moved in, never shared.
#[derive(Debug)]
pub enum WorkerMsg {
    /// A user started speaking; `session` is the new monotonic counter.
    SpeakingStart { session: u64 },
    /// One decoded 20 ms tick of 48 kHz stereo PCM.
    Audio { session: u64, pcm: Vec<i16> },
    /// 500 ms of silence elapsed for `session`.
    SilenceEnd { session: u64 },
    /// Back-channel text for the model.
    Text(String),
    Stop,
}

fn system_instruction(directory: &PathBuf) -> String {
    format!(
        "You are the voice of a coding assistant working in `{}`. You control a coding agent \
         through your tools: use submitMessage to give it work, listChats and \
         readSessionMessages to look around, abortChat to stop it. Speak conversationally and \
         keep answers short; summarize what the agent did instead of reading code aloud.",
        directory.display()
    )
}

/// Run one realtime voice conversation: Discord RX frames in, paced Opus
/// packets out, tool calls bridged to the Agent. Returns when stopped or
/// when the model closes the stream.
pub async fn run(
    state: Arc<AppState>,
    directory: PathBuf,
    config: RealtimeConfig,
    api_key: String,
    call: Arc<Mutex<Call>>,
    mut rx: mpsc::UnboundedReceiver<WorkerMsg>,
) -> Result<()> {
    let transport = SongbirdTransport::new(call)?;
    let pacer = PacedSender::spawn(transport);

    let (mut client, mut events) = RealtimeClient::connect(
        &config,
        &api_key,
        &system_instruction(&directory),
        tools::declarations(),
    )
    .await?;

    let mut encoder = Encoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio)
        .context("Failed to create opus encoder")?;
    let mut encode_buf = vec![0u8; ENCODE_BUF];

    let mut framer = Framer::new(MODEL_FRAME_SAMPLES);
    let mut current_session: u64 = 0;
    let mut out_accum: Vec<i16> = Vec::new();

    let mut debug_log = if config.debug_audio {
        let path = state
            .config
            .storage
            .data_dir
            .join(format!("voice-debug-{}.pcm", chrono::Utc::now().timestamp()));
        match std::fs::File::create(&path) {
            Ok(file) => {
                info!("Voice debug audio log at {}", path.display());
                Some(file)
            }
            Err(e) => {
                warn!("Could not open voice debug log: {e}");
                None
            }
        }
    } else {
        None
    };

    info!("Voice worker started for {}", directory.display());

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(WorkerMsg::SpeakingStart { session }) => {
                    current_session = session;
                    framer.flush();
                }
                Some(WorkerMsg::Audio { session, pcm }) => {
                    // frames from a superseded speaking session are stale
                    if session != current_session {
                        continue;
                    }
                    let mono = downmix_48k_stereo_to_16k_mono(&pcm);
                    if let Some(log) = debug_log.as_mut() {
                        let _ = log.write_all(&pcm_to_bytes(&mono));
                    }
                    for frame in framer.push(&mono) {
                        if let Err(e) = client.send_audio_chunk(&frame).await {
                            warn!("Failed to stream audio frame: {e}");
                        }
                    }
                }
                Some(WorkerMsg::SilenceEnd { session }) => {
                    if session != current_session {
                        continue;
                    }
                    framer.flush();
                    if let Err(e) = client.send_audio_stream_end().await {
                        warn!("Failed to send audioStreamEnd: {e}");
                    }
                }
                Some(WorkerMsg::Text(text)) => {
                    if let Err(e) = client.send_text(&text).await {
                        warn!("Failed to send text to model: {e}");
                    }
                }
                Some(WorkerMsg::Stop) | None => break,
            },
            event = events.recv() => match event {
                Some(RealtimeEvent::SetupComplete) => debug!("Realtime session ready"),
                Some(RealtimeEvent::Audio(pcm24)) => {
                    out_accum.extend(upsample_24k_mono_to_48k_stereo(&pcm24));
                    while out_accum.len() >= ENCODE_FRAME {
                        let rest = out_accum.split_off(ENCODE_FRAME);
                        let frame = std::mem::replace(&mut out_accum, rest);
                        match encoder.encode(&frame, &mut encode_buf) {
                            Ok(len) => pacer.enqueue(encode_buf[..len].to_vec()),
                            Err(e) => warn!("Opus encode failed, dropping frame: {e}"),
                        }
                    }
                }
                Some(RealtimeEvent::Interrupted) => {
                    pacer.interrupt();
                    out_accum.clear();
                }
                Some(RealtimeEvent::TurnComplete) => {}
                Some(RealtimeEvent::ToolCall(calls)) => {
                    let mut responses = Vec::new();
                    let mut spoken_reply: Option<String> = None;

                    for call in calls {
                        info!("Voice tool call: {}", call.name);
                        let output = match tools::execute(&state, &directory, &call.name, &call.args).await {
                            Ok(value) => {
                                if call.name == "submitMessage" {
                                    if let Some(reply) = value.get("reply").and_then(|r| r.as_str()) {
                                        if !reply.trim().is_empty() {
                                            spoken_reply = Some(reply.to_string());
                                        }
                                    }
                                }
                                value
                            }
                            Err(e) => {
                                error!("Voice tool {} failed: {e}", call.name);
                                json!({ "error": e.to_string() })
                            }
                        };
                        responses.push((call.id, call.name, output));
                    }

                    if let Err(e) = client.send_tool_response(responses).await {
                        warn!("Failed to send tool responses: {e}");
                    }
                    if let Some(reply) = spoken_reply {
                        let note = format!("The coding agent replied:\n{reply}");
                        if let Err(e) = client.send_text(&note).await {
                            warn!("Failed to send tool summary: {e}");
                        }
                    }
                }
                Some(RealtimeEvent::Closed) | None => {
                    info!("Realtime stream closed");
                    break;
                }
            },
        }
    }

    client.close().await;
    pacer.stop(DRAIN_TIMEOUT).await;
    info!("Voice worker stopped for {}", directory.display());
    Ok(())
}

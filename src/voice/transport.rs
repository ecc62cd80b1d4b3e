use super::pacer::VoiceTransport;
use async_trait::async_trait;
use audiopus::coder::Decoder;
use audiopus::{Channels, SampleRate};
use songbird::Call;
use songbird::input::RawAdapter;
use songbird::tracks::TrackHandle;
use std::collections::VecDeque;
use std::io::{Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::{error, warn};

const OPUS_FRAME_MAX: usize = 1920 * 2;

/// Voice transport backed by a songbird [`Call`]. Songbird's public send
/// path is a PCM input track, so packets are decoded back to 48 kHz stereo
/// float samples and fed through a live ring buffer; `set_speaking` maps to
/// playing/pausing that track.
pub struct SongbirdTransport {
    call: Arc<Mutex<Call>>,
    decoder: Decoder,
    buffer: Arc<StdMutex<VecDeque<u8>>>,
    track: Option<TrackHandle>,
    decode_buf: Vec<i16>,
}

impl SongbirdTransport {
    pub fn new(call: Arc<Mutex<Call>>) -> anyhow::Result<Self> {
        let decoder = Decoder::new(SampleRate::Hz48000, Channels::Stereo)?;
        Ok(Self {
            call,
            decoder,
            buffer: Arc::new(StdMutex::new(VecDeque::new())),
            track: None,
            decode_buf: vec![0i16; OPUS_FRAME_MAX],
        })
    }

    async fn ensure_track(&mut self) {
        if self.track.is_some() {
            return;
        }
        let reader = RingReader {
            buffer: self.buffer.clone(),
        };
        let input = RawAdapter::new(reader, 48_000, 2);
        let mut call = self.call.lock().await;
        self.track = Some(call.play_input(input.into()));
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn send_packet(&mut self, packet: Vec<u8>) {
        let packet = match audiopus::packet::Packet::try_from(packet.as_slice()) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Dropping malformed opus packet: {e}");
                return;
            }
        };
        let signals = match audiopus::MutSignals::try_from(&mut self.decode_buf[..]) {
            Ok(signals) => signals,
            Err(e) => {
                error!("Opus decode buffer error: {e}");
                return;
            }
        };
        let samples_per_channel = match self.decoder.decode(Some(packet), signals, false) {
            Ok(n) => n,
            Err(e) => {
                warn!("Opus decode failed, dropping frame: {e}");
                return;
            }
        };

        let samples = &self.decode_buf[..samples_per_channel * 2];
        {
            let mut buffer = self.buffer.lock().unwrap();
            for &sample in samples {
                let value = sample as f32 / i16::MAX as f32;
                buffer.extend(value.to_le_bytes());
            }
        }

        self.ensure_track().await;
    }

    async fn set_speaking(&mut self, speaking: bool) {
        if speaking {
            self.ensure_track().await;
            if let Some(track) = &self.track {
                let _ = track.play();
            }
        } else if let Some(track) = &self.track {
            let _ = track.pause();
            self.buffer.lock().unwrap().clear();
        }
    }
}

/// Live PCM source for songbird: yields buffered samples and silence when
/// the queue is empty, so the track never hits end-of-stream.
struct RingReader {
    buffer: Arc<StdMutex<VecDeque<u8>>>,
}

impl Read for RingReader {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        let mut buffer = self.buffer.lock().unwrap();
        let mut written = 0;
        while written < out.len() {
            match buffer.pop_front() {
                Some(byte) => {
                    out[written] = byte;
                    written += 1;
                }
                None => break,
            }
        }
        // pad with silence, aligned to whole f32 samples
        if written < out.len() {
            let rest = &mut out[written..];
            for byte in rest.iter_mut() {
                *byte = 0;
            }
            written = out.len();
        }
        Ok(written)
    }
}

impl Seek for RingReader {
    fn seek(&mut self, _pos: SeekFrom) -> std::io::Result<u64> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "live audio is not seekable",
        ))
    }
}

impl songbird::input::core::io::MediaSource for RingReader {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

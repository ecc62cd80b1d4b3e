use crate::config::RealtimeConfig;
use crate::voice::audio::{bytes_to_pcm, pcm_to_bytes};
use anyhow::{Context as _, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

#[derive(Debug)]
pub enum RealtimeEvent {
    SetupComplete,
    /// 24 kHz signed-16 mono PCM from the model.
    Audio(Vec<i16>),
    /// The model was cut off by new user speech.
    Interrupted,
    TurnComplete,
    ToolCall(Vec<FunctionCall>),
    Closed,
}

#[derive(Debug, Clone)]
pub struct FunctionCall {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// Full-duplex session with the realtime speech model.
pub struct RealtimeClient {
    sink: WsSink,
    reader: JoinHandle<()>,
}

impl RealtimeClient {
    pub async fn connect(
        config: &RealtimeConfig,
        api_key: &str,
        system_instruction: &str,
        function_declarations: Value,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RealtimeEvent>)> {
        let url = format!("{}?key={}", config.url, api_key);
        let (stream, _) = connect_async(&url)
            .await
            .context("Failed to connect to the realtime model")?;
        let (mut sink, stream) = stream.split();

        let setup = json!({
            "setup": {
                "model": config.model,
                "generationConfig": {
                    "responseModalities": ["AUDIO"],
                    "speechConfig": {
                        "voiceConfig": {
                            "prebuiltVoiceConfig": { "voiceName": config.voice }
                        }
                    }
                },
                "systemInstruction": {
                    "parts": [{ "text": system_instruction }]
                },
                "tools": [{ "functionDeclarations": function_declarations }]
            }
        });
        sink.send(WsMessage::Text(setup.to_string()))
            .await
            .context("Failed to send realtime setup")?;

        let (tx, rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(stream, tx));

        Ok((Self { sink, reader }, rx))
    }

    /// One 100 ms frame of 16 kHz mono PCM.
    pub async fn send_audio_chunk(&mut self, samples: &[i16]) -> Result<()> {
        let payload = json!({
            "realtimeInput": {
                "audio": {
                    "data": BASE64.encode(pcm_to_bytes(samples)),
                    "mimeType": "audio/pcm;rate=16000"
                }
            }
        });
        self.sink.send(WsMessage::Text(payload.to_string())).await?;
        Ok(())
    }

    pub async fn send_audio_stream_end(&mut self) -> Result<()> {
        let payload = json!({ "realtimeInput": { "audioStreamEnd": true } });
        self.sink.send(WsMessage::Text(payload.to_string())).await?;
        Ok(())
    }

    /// Back-channel text, e.g. tool-completion summaries the assistant
    /// should speak about.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        let payload = json!({
            "clientContent": {
                "turns": [{ "role": "user", "parts": [{ "text": text }] }],
                "turnComplete": true
            }
        });
        self.sink.send(WsMessage::Text(payload.to_string())).await?;
        Ok(())
    }

    pub async fn send_tool_response(&mut self, responses: Vec<(String, String, Value)>) -> Result<()> {
        let function_responses: Vec<Value> = responses
            .into_iter()
            .map(|(id, name, output)| {
                json!({ "id": id, "name": name, "response": { "output": output } })
            })
            .collect();
        let payload = json!({ "toolResponse": { "functionResponses": function_responses } });
        self.sink.send(WsMessage::Text(payload.to_string())).await?;
        Ok(())
    }

    pub async fn close(mut self) {
        let _ = self.sink.send(WsMessage::Close(None)).await;
        self.reader.abort();
    }
}

async fn read_loop(mut stream: WsStream, tx: mpsc::UnboundedSender<RealtimeEvent>) {
    while let Some(message) = stream.next().await {
        let data = match message {
            Ok(WsMessage::Text(text)) => text.into_bytes(),
            Ok(WsMessage::Binary(bytes)) => bytes,
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let value: Value = match serde_json::from_slice(&data) {
            Ok(value) => value,
            Err(e) => {
                warn!("Unparsable realtime message: {e}");
                continue;
            }
        };

        for event in parse_events(&value) {
            if tx.send(event).is_err() {
                return;
            }
        }
    }

    debug!("Realtime stream closed");
    let _ = tx.send(RealtimeEvent::Closed);
}

fn parse_events(value: &Value) -> Vec<RealtimeEvent> {
    let mut events = Vec::new();

    if value.get("setupComplete").is_some() {
        events.push(RealtimeEvent::SetupComplete);
    }

    if let Some(calls) = value
        .get("toolCall")
        .and_then(|t| t.get("functionCalls"))
        .and_then(Value::as_array)
    {
        let calls: Vec<FunctionCall> = calls
            .iter()
            .map(|call| FunctionCall {
                id: call.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                name: call
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                args: call.get("args").cloned().unwrap_or(Value::Null),
            })
            .collect();
        if !calls.is_empty() {
            events.push(RealtimeEvent::ToolCall(calls));
        }
    }

    if let Some(content) = value.get("serverContent") {
        if content.get("interrupted").and_then(Value::as_bool) == Some(true) {
            events.push(RealtimeEvent::Interrupted);
        }

        if let Some(parts) = content
            .get("modelTurn")
            .and_then(|t| t.get("parts"))
            .and_then(Value::as_array)
        {
            for part in parts {
                if let Some(data) = part
                    .get("inlineData")
                    .and_then(|d| d.get("data"))
                    .and_then(Value::as_str)
                {
                    match BASE64.decode(data) {
                        Ok(bytes) => events.push(RealtimeEvent::Audio(bytes_to_pcm(&bytes))),
                        Err(e) => warn!("Bad audio payload from model: {e}"),
                    }
                }
            }
        }

        if content.get("turnComplete").and_then(Value::as_bool) == Some(true) {
            events.push(RealtimeEvent::TurnComplete);
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_audio_interrupt_and_turn_complete() {
        let pcm = pcm_to_bytes(&[1i16, -2, 3]);
        let value = json!({
            "serverContent": {
                "interrupted": true,
                "turnComplete": true,
                "modelTurn": { "parts": [
                    { "inlineData": { "data": BASE64.encode(&pcm) } }
                ]}
            }
        });

        let events = parse_events(&value);
        assert!(matches!(events[0], RealtimeEvent::Interrupted));
        match &events[1] {
            RealtimeEvent::Audio(samples) => assert_eq!(samples, &vec![1i16, -2, 3]),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(events[2], RealtimeEvent::TurnComplete));
    }

    #[test]
    fn parses_tool_calls() {
        let value = json!({
            "toolCall": { "functionCalls": [
                { "id": "fc_1", "name": "listChats", "args": {} },
                { "id": "fc_2", "name": "submitMessage", "args": { "message": "hi" } }
            ]}
        });

        let events = parse_events(&value);
        match &events[0] {
            RealtimeEvent::ToolCall(calls) => {
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].name, "listChats");
                assert_eq!(calls[1].args["message"], "hi");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn irrelevant_messages_produce_no_events() {
        assert!(parse_events(&json!({ "usageMetadata": { "tokens": 5 } })).is_empty());
    }
}

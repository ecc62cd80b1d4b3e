use crate::agent::PromptPart;
use crate::state::AppState;
use crate::transcribe;
use serenity::model::channel::Attachment;
use std::path::Path;
use tracing::{error, warn};

const INLINE_MIMES: &[&str] = &[
    "application/json",
    "application/xml",
    "application/javascript",
    "application/typescript",
    "application/x-yaml",
    "application/yaml",
    "application/toml",
];

#[derive(Debug, Default)]
pub struct ClassifiedAttachments {
    /// First audio attachment's transcript; replaces the prompt text.
    pub transcription: Option<String>,
    /// Image/PDF attachments forwarded to the Agent as typed file parts.
    pub file_parts: Vec<PromptPart>,
    /// Textual attachments inlined into the prompt.
    pub inline: Vec<String>,
}

/// Classify message attachments by MIME: audio is transcribed, images and
/// PDFs become Agent file parts, textual files are fetched and inlined.
pub async fn classify(
    state: &AppState,
    attachments: &[Attachment],
    directory: Option<&Path>,
) -> ClassifiedAttachments {
    let mut out = ClassifiedAttachments::default();

    for attachment in attachments {
        let mime = attachment.content_type.as_deref().unwrap_or("");

        if mime.starts_with("audio/") {
            if out.transcription.is_some() {
                continue;
            }
            match fetch_bytes(state, &attachment.url).await {
                Some(bytes) => {
                    match transcribe::transcribe(state, bytes, &attachment.filename, mime, directory)
                        .await
                    {
                        Ok(text) => out.transcription = Some(text),
                        Err(e) => error!("Transcription failed: {e}"),
                    }
                }
                None => warn!("Failed to download audio attachment {}", attachment.filename),
            }
            continue;
        }

        if mime.starts_with("image/") || mime == "application/pdf" {
            out.file_parts.push(PromptPart::File {
                mime: mime.to_string(),
                filename: attachment.filename.clone(),
                url: attachment.url.clone(),
            });
            continue;
        }

        if mime.starts_with("text/") || INLINE_MIMES.iter().any(|m| mime.starts_with(m)) {
            if let Some(content) = fetch_text(state, &attachment.url).await {
                out.inline.push(format!(
                    "<attachment filename=\"{}\" mime=\"{}\">\n{}\n</attachment>",
                    attachment.filename, mime, content
                ));
            }
        }
    }

    out
}

async fn fetch_bytes(state: &AppState, url: &str) -> Option<Vec<u8>> {
    let response = state.http.get(url).send().await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    Some(response.bytes().await.ok()?.to_vec())
}

async fn fetch_text(state: &AppState, url: &str) -> Option<String> {
    let response = state.http.get(url).send().await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    response.text().await.ok()
}

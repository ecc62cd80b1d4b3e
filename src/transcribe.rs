use crate::state::AppState;
use anyhow::{Context as _, Result, bail};
use std::path::Path;
use tracing::warn;

const FILE_TREE_CAP: usize = 200;

/// Transcribe voice-message audio, trying the primary provider first and the
/// fallback on any failure. The project file tree is appended to the prompt
/// so the model leans toward the vocabulary actually used in the repo.
pub async fn transcribe(
    state: &AppState,
    audio: Vec<u8>,
    filename: &str,
    mime: &str,
    directory: Option<&Path>,
) -> Result<String> {
    let keys = state
        .store
        .api_keys(&state.app_id)
        .await?
        .context("No API keys stored for this app")?;
    let (primary_key, fallback_key) = keys;

    let mut prompt = String::from(
        "This is a voice message addressed to a coding agent. Prefer technical and \
         programming vocabulary over literal phonetics (e.g. 'async fn', 'Cargo.toml', \
         'refactor'), and transcribe identifiers the way a developer would type them.",
    );
    if let Some(dir) = directory {
        let tree = project_file_tree(dir, FILE_TREE_CAP).await;
        if !tree.is_empty() {
            prompt.push_str("\n\nProject files:\n");
            prompt.push_str(&tree.join("\n"));
        }
    }

    let transcribe = &state.config.transcribe;

    match request(
        state,
        &transcribe.primary_url,
        &transcribe.primary_model,
        &primary_key,
        &audio,
        filename,
        mime,
        &prompt,
    )
    .await
    {
        Ok(text) => return Ok(text),
        Err(e) => warn!("Primary transcription failed, trying fallback: {e}"),
    }

    let Some(fallback_key) = fallback_key else {
        bail!("Primary transcription failed and no fallback key is stored");
    };

    request(
        state,
        &transcribe.fallback_url,
        &transcribe.fallback_model,
        &fallback_key,
        &audio,
        filename,
        mime,
        &prompt,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn request(
    state: &AppState,
    url: &str,
    model: &str,
    key: &str,
    audio: &[u8],
    filename: &str,
    mime: &str,
    prompt: &str,
) -> Result<String> {
    let file = reqwest::multipart::Part::bytes(audio.to_vec())
        .file_name(filename.to_string())
        .mime_str(mime)
        .unwrap_or_else(|_| reqwest::multipart::Part::bytes(audio.to_vec()).file_name(filename.to_string()));

    let mut form = reqwest::multipart::Form::new()
        .part("file", file)
        .text("model", model.to_string())
        .text("prompt", prompt.to_string())
        .text("response_format", "text");

    if let Some(language) = &state.config.transcribe.language {
        form = form.text("language", language.clone());
    }

    let response = state
        .http
        .post(url)
        .bearer_auth(key)
        .multipart(form)
        .send()
        .await
        .context("Transcription request failed")?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        bail!("Transcription API returned {status}: {body}");
    }

    let text = body.trim().to_string();
    if text.is_empty() {
        bail!("Transcription API returned an empty transcript");
    }
    Ok(text)
}

/// Best-effort relative file listing, capped, skipping VCS and build output.
pub async fn project_file_tree(directory: &Path, cap: usize) -> Vec<String> {
    let directory = directory.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut out = Vec::new();
        walk(&directory, &directory, cap, &mut out);
        out.sort();
        out
    })
    .await
    .unwrap_or_default()
}

fn walk(root: &Path, dir: &Path, cap: usize, out: &mut Vec<String>) {
    if out.len() >= cap {
        return;
    }
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        if out.len() >= cap {
            return;
        }
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || name == "node_modules" || name == "target" {
            continue;
        }
        if path.is_dir() {
            walk(root, &path, cap, out);
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_string_lossy().to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_tree_is_relative_capped_and_skips_noise() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/x")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();
        std::fs::write(dir.path().join("node_modules/x/index.js"), "x").unwrap();

        let tree = project_file_tree(dir.path(), 100).await;
        assert_eq!(tree, vec!["Cargo.toml".to_string(), "src/main.rs".to_string()]);
    }

    #[tokio::test]
    async fn file_tree_respects_cap() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..20 {
            std::fs::write(dir.path().join(format!("f{i:02}.txt")), "x").unwrap();
        }
        let tree = project_file_tree(dir.path(), 5).await;
        assert_eq!(tree.len(), 5);
    }
}

use super::client::AgentClient;
use anyhow::{Context as _, Result, bail};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

const HEALTH_ATTEMPTS: u32 = 30;
const HEALTH_INTERVAL: Duration = Duration::from_secs(1);
const MAX_RESTARTS: u32 = 5;

pub const INSTALL_PROMPT: &str =
    "The `opencode` binary was not found on PATH. Install it with `npm install -g opencode-ai` \
     and restart the bridge.";

#[derive(Debug, Clone)]
struct Entry {
    client: AgentClient,
    pid: Option<u32>,
    restarts: u32,
}

struct RegistryInner {
    agent_bin: String,
    provider_keys: Vec<(String, String)>,
    entries: Mutex<HashMap<PathBuf, Entry>>,
    shutting_down: AtomicBool,
}

/// One Agent server per project directory, spawned on demand and restarted
/// on crash with a bounded retry budget.
#[derive(Clone)]
pub struct AgentRegistry {
    inner: Arc<RegistryInner>,
}

impl AgentRegistry {
    pub fn new(agent_bin: String, provider_keys: Vec<(String, String)>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                agent_bin,
                provider_keys,
                entries: Mutex::new(HashMap::new()),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Return a client for the Agent serving `directory`, starting one if
    /// none is running there yet.
    pub async fn client_for(&self, directory: &Path) -> Result<AgentClient> {
        let directory = directory.to_path_buf();

        {
            let entries = self.inner.entries.lock().await;
            if let Some(entry) = entries.get(&directory) {
                if entry.client.healthy().await {
                    return Ok(entry.client.clone());
                }
            }
        }

        self.inner.clone().start(directory, 0).await
    }

    /// Any live client, used for directory-independent lookups.
    pub async fn any_client(&self) -> Option<AgentClient> {
        let entries = self.inner.entries.lock().await;
        entries.values().next().map(|e| e.client.clone())
    }

    /// A live client for `directory`, without spawning one.
    pub async fn existing_client(&self, directory: &Path) -> Option<AgentClient> {
        let entries = self.inner.entries.lock().await;
        entries.get(directory).map(|e| e.client.clone())
    }

    /// Terminate every running Agent with a polite signal.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::Release);
        let mut entries = self.inner.entries.lock().await;
        for (directory, entry) in entries.drain() {
            if let Some(pid) = entry.pid {
                info!("Stopping agent for {} (pid {pid})", directory.display());
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
            }
        }
    }
}

impl RegistryInner {
    async fn start(self: Arc<Self>, directory: PathBuf, restarts: u32) -> Result<AgentClient> {
        if !directory.is_dir() {
            bail!("Project directory does not exist: {}", directory.display());
        }

        let port = free_port()?;

        let config = json!({
            "lsp": false,
            "formatter": false,
            "permission": { "edit": "allow", "bash": "allow", "webfetch": "allow" }
        });

        let mut child = Command::new(&self.agent_bin)
            .args(["serve", "--hostname", "127.0.0.1", "--port", &port.to_string()])
            .current_dir(&directory)
            .env("OPENCODE_CONFIG_CONTENT", config.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    anyhow::anyhow!("{INSTALL_PROMPT}")
                } else {
                    anyhow::anyhow!("Failed to spawn agent: {e}")
                }
            })?;

        let pid = child.id();
        let client = AgentClient::new(port);

        self.wait_healthy(&client, &mut child, &directory).await?;

        for (provider, key) in &self.provider_keys {
            if let Err(e) = client.register_auth(provider, key).await {
                warn!("Failed to register {provider} key with agent: {e}");
            }
        }

        info!(
            "Agent ready for {} on port {port} (pid {:?})",
            directory.display(),
            pid
        );

        {
            let mut entries = self.entries.lock().await;
            entries.insert(
                directory.clone(),
                Entry {
                    client: client.clone(),
                    pid,
                    restarts,
                },
            );
        }

        self.clone().monitor(directory, child);
        Ok(client)
    }

    async fn wait_healthy(
        &self,
        client: &AgentClient,
        child: &mut tokio::process::Child,
        directory: &Path,
    ) -> Result<()> {
        for _ in 0..HEALTH_ATTEMPTS {
            if let Some(status) = child.try_wait().context("Failed to poll agent process")? {
                bail!(
                    "Agent for {} exited during startup ({status})",
                    directory.display()
                );
            }
            if client.healthy().await {
                return Ok(());
            }
            tokio::time::sleep(HEALTH_INTERVAL).await;
        }

        let _ = child.start_kill();
        bail!(
            "Agent for {} did not become healthy within {}s",
            directory.display(),
            HEALTH_ATTEMPTS
        );
    }

    fn monitor(self: Arc<Self>, directory: PathBuf, mut child: tokio::process::Child) {
        let inner = self;
        tokio::spawn(async move {
            let status = child.wait().await;

            if inner.shutting_down.load(Ordering::Acquire) {
                return;
            }

            let clean = matches!(&status, Ok(s) if s.success());
            if clean {
                info!("Agent for {} exited cleanly", directory.display());
                inner.entries.lock().await.remove(&directory);
                return;
            }

            let restarts = {
                let entries = inner.entries.lock().await;
                entries.get(&directory).map(|e| e.restarts).unwrap_or(0)
            } + 1;

            if restarts >= MAX_RESTARTS {
                error!(
                    "Agent for {} crashed {restarts} times, giving up",
                    directory.display()
                );
                inner.entries.lock().await.remove(&directory);
                return;
            }

            warn!(
                "Agent for {} exited unexpectedly ({status:?}), restarting (attempt {restarts})",
                directory.display()
            );
            inner.entries.lock().await.remove(&directory);
            if let Err(e) = inner.clone().start(directory.clone(), restarts).await {
                error!("Failed to restart agent for {}: {e}", directory.display());
            }
        });
    }
}

fn free_port() -> Result<u16> {
    let listener =
        std::net::TcpListener::bind("127.0.0.1:0").context("Failed to allocate a local port")?;
    Ok(listener.local_addr()?.port())
}

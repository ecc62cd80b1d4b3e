use anyhow::{Context as _, Result, bail};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::info;

/// Fixed loopback port doubling as the single-instance lock.
pub const LOCK_PORT: u16 = 48917;
/// Exit code the supervisor wrapper treats as "do not restart".
pub const EXIT_NO_RETRY: i32 = 64;

const LOCK_BODY: &str = "remote-vibe bridge is running\n";

pub struct SingleInstanceLock {
    task: JoinHandle<()>,
}

impl Drop for SingleInstanceLock {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Bind the lock port for the life of the process. If another instance
/// already answers there, this one must not start.
pub async fn acquire_single_instance_lock() -> Result<SingleInstanceLock> {
    if TcpStream::connect(("127.0.0.1", LOCK_PORT)).await.is_ok() {
        bail!("Another instance is already running on port {LOCK_PORT}");
    }

    let listener = TcpListener::bind(("127.0.0.1", LOCK_PORT))
        .await
        .with_context(|| format!("Failed to bind single-instance port {LOCK_PORT}"))?;

    let task = tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{LOCK_BODY}",
                    LOCK_BODY.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    });

    info!("Single-instance lock bound on 127.0.0.1:{LOCK_PORT}");
    Ok(SingleInstanceLock { task })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// SIGINT/SIGTERM: clean up and exit.
    Exit,
    /// SIGUSR2: clean up, then re-exec with the original argv.
    Restart,
}

pub async fn wait_for_shutdown() -> Result<Shutdown> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt =
        signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut restart =
        signal(SignalKind::user_defined2()).context("Failed to install SIGUSR2 handler")?;

    tokio::select! {
        _ = interrupt.recv() => Ok(Shutdown::Exit),
        _ = terminate.recv() => Ok(Shutdown::Exit),
        _ = restart.recv() => Ok(Shutdown::Restart),
    }
}

/// Replace this process with a fresh copy of itself, same argv and
/// environment. Only returns on failure.
pub fn reexec() -> Result<()> {
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe().context("Cannot resolve own executable")?;
    let args: Vec<String> = std::env::args().skip(1).collect();

    info!("Re-executing {}", exe.display());
    let err = std::process::Command::new(exe).args(args).exec();
    bail!("re-exec failed: {err}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_instance_is_refused_and_lock_answers_http() {
        let _lock = match acquire_single_instance_lock().await {
            Ok(lock) => lock,
            // another test run or a real bridge holds the port; nothing to assert
            Err(_) => return,
        };

        assert!(acquire_single_instance_lock().await.is_err());

        let mut stream = TcpStream::connect(("127.0.0.1", LOCK_PORT)).await.unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8_lossy(&response);
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("remote-vibe"));
    }
}

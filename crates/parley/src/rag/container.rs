use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::ContainerError;

const DOCKER: &str = "docker";

/// An ephemeral docker container. Call `stop` to remove it; a container
/// dropped while still running is removed in the background.
///
/// The container port is published on a random loopback port; `host_address`
/// reports where it landed.
pub struct DockerContainer {
    id: String,
    host_port: u16,
    program: String,
    stopped: bool,
}

impl DockerContainer {
    pub async fn start(
        image: &str,
        container_port: u16,
        env: &[(&str, &str)],
    ) -> Result<Self, ContainerError> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "-p".to_string(),
            format!("127.0.0.1::{}", container_port),
        ];
        for (key, value) in env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(image.to_string());

        info!(image, "starting container");
        let id = docker(DOCKER, &args).await?;
        // From here on the guard owns the container, so early returns clean up
        let mut container = Self {
            id,
            host_port: 0,
            program: DOCKER.to_string(),
            stopped: false,
        };

        let mapping = docker(&container.program, &[
            "port".to_string(),
            container.id.clone(),
            format!("{}/tcp", container_port),
        ])
        .await?;
        container.host_port = parse_host_port(&mapping).ok_or_else(|| ContainerError::Command {
            command: "port".to_string(),
            stderr: format!("Unexpected port mapping '{}'", mapping),
        })?;
        debug!(id = %container.id, port = container.host_port, "container started");
        Ok(container)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host_port(&self) -> u16 {
        self.host_port
    }

    /// `host:port` of the published port
    pub fn host_address(&self) -> String {
        format!("127.0.0.1:{}", self.host_port)
    }

    /// Poll `path` on the published port until it answers 2xx
    pub async fn wait_until_ready(&self, path: &str, timeout: Duration) -> Result<(), ContainerError> {
        let url = format!("http://{}{}", self.host_address(), path);
        let client = reqwest::Client::new();
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            match client
                .get(&url)
                .timeout(Duration::from_secs(2))
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    info!(address = %self.host_address(), "container ready");
                    return Ok(());
                }
                Ok(response) => debug!(status = %response.status(), "container not ready"),
                Err(e) => debug!("container not ready: {}", e),
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Err(ContainerError::NotReady(timeout.as_secs()))
    }

    /// Remove the container and wait for docker to confirm
    pub async fn stop(mut self) -> Result<(), ContainerError> {
        self.stopped = true;
        docker(&self.program, &self.removal_args()).await?;
        info!(id = %self.id, "container removed");
        Ok(())
    }

    fn removal_args(&self) -> [String; 3] {
        ["rm".to_string(), "-f".to_string(), self.id.clone()]
    }
}

impl Drop for DockerContainer {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        let program = self.program.clone();
        let args = self.removal_args();
        let id = self.id.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match docker(&program, &args).await {
                        Ok(_) => debug!(%id, "container removed"),
                        Err(e) => warn!("Failed to remove container {}: {}", id, e),
                    }
                });
            }
            // Outside a runtime nobody can await the child, so fire and forget
            Err(_) => {
                if let Err(e) = std::process::Command::new(&program)
                    .args(&args)
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .spawn()
                {
                    warn!("Failed to remove container {}: {}", id, e);
                }
            }
        }
    }
}

async fn docker(program: &str, args: &[String]) -> Result<String, ContainerError> {
    let output = Command::new(program).args(args).output().await?;
    if !output.status.success() {
        return Err(ContainerError::Command {
            command: args.first().cloned().unwrap_or_default(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Parse `docker port` output such as `127.0.0.1:49153`, one mapping per line
fn parse_host_port(mapping: &str) -> Option<u16> {
    mapping
        .lines()
        .find_map(|line| line.trim().rsplit(':').next()?.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port() {
        assert_eq!(parse_host_port("127.0.0.1:49153"), Some(49153));
        assert_eq!(parse_host_port("0.0.0.0:8081\n[::]:8081"), Some(8081));
        assert_eq!(parse_host_port(""), None);
        assert_eq!(parse_host_port("garbage"), None);
    }

    /// A docker stand-in that takes a second to answer and records its arguments
    #[cfg(unix)]
    fn slow_docker(dir: &std::path::Path) -> String {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("docker");
        std::fs::write(
            &script,
            "#!/bin/sh\nsleep 1\necho \"$@\" >> \"$(dirname \"$0\")/calls\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script.to_string_lossy().to_string()
    }

    #[cfg(unix)]
    fn container(program: String) -> DockerContainer {
        DockerContainer {
            id: "abc123".to_string(),
            host_port: 8080,
            program,
            stopped: false,
        }
    }

    #[cfg(unix)]
    fn calls(dir: &std::path::Path) -> Vec<String> {
        std::fs::read_to_string(dir.join("calls"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_waits_for_removal() {
        let dir = tempfile::tempdir().unwrap();
        let container = container(slow_docker(dir.path()));

        container.stop().await.unwrap();
        assert_eq!(calls(dir.path()), vec!["rm -f abc123"]);

        // Dropping after stop must not remove it a second time
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(calls(dir.path()).len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "current_thread")]
    async fn test_drop_does_not_block_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let ticks = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    ticks.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }
            })
        };

        let started = Instant::now();
        drop(container(slow_docker(dir.path())));
        assert!(started.elapsed() < Duration::from_millis(500));

        // The removal finishes in the background while other tasks keep running
        let deadline = Instant::now() + Duration::from_secs(5);
        while calls(dir.path()).is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(calls(dir.path()), vec!["rm -f abc123"]);
        assert!(ticks.load(std::sync::atomic::Ordering::SeqCst) >= 5);
        ticker.abort();
    }
}

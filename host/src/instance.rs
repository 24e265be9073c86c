//! Local instance runtime.
//!
//! Each started instance is one child process with piped stdin/stdout/stderr.
//! Output lines fan out on a broadcast channel to every attached console;
//! command lines funnel through an mpsc writer task into the child's stdin.
//! A supervise task owns the child and reports its exit on a watch channel,
//! which is how both `stop` and attached consoles learn the process is gone.

use log::{debug, error, info, warn};
use shared::{InstanceId, LifecycleState, MAX_COMMAND_LEN};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc, oneshot, watch, RwLock};

/// Per-attachment fan-out capacity; slow consoles drop the oldest lines.
pub const OUTPUT_CHANNEL_CAPACITY: usize = 256;

const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// One output line from an instance, keeping stdout and stderr apart.
#[derive(Debug, Clone)]
pub enum ConsoleLine {
    Out(String),
    Err(String),
}

/// Everything an attached console needs from a running instance.
pub struct ConsoleTap {
    pub output: broadcast::Receiver<ConsoleLine>,
    pub exited: watch::Receiver<bool>,
    pub stdin: mpsc::UnboundedSender<String>,
}

struct InstanceHandle {
    // Shared with the supervise task, which flips it to Stopped on exit.
    state: Arc<RwLock<LifecycleState>>,
    stdin_tx: mpsc::UnboundedSender<String>,
    output_tx: broadcast::Sender<ConsoleLine>,
    kill_tx: Option<oneshot::Sender<()>>,
    exited_rx: watch::Receiver<bool>,
}

/// Registry of managed instances, all running the same configured command.
pub struct InstanceManager {
    command: String,
    instances: RwLock<HashMap<InstanceId, InstanceHandle>>,
}

impl InstanceManager {
    pub fn new(command: impl Into<String>) -> Self {
        InstanceManager {
            command: command.into(),
            instances: RwLock::new(HashMap::new()),
        }
    }

    pub async fn state(&self, id: &InstanceId) -> LifecycleState {
        let instances = self.instances.read().await;
        match instances.get(id) {
            Some(handle) => *handle.state.read().await,
            None => LifecycleState::Unknown,
        }
    }

    /// Spawns the instance's process. Fails if it is already running.
    pub async fn start(&self, id: &InstanceId) -> Result<(), String> {
        let mut instances = self.instances.write().await;
        if let Some(handle) = instances.get(id) {
            if handle.state.read().await.socket_desired() {
                return Err(format!("instance {} is already running", id));
            }
        }

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("INSTANCE_ID", id.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to spawn instance {}: {}", id, e))?;

        info!("Instance {} started (pid {:?})", id, child.id());

        let stdout = child.stdout.take().ok_or("missing stdout pipe".to_string())?;
        let stderr = child.stderr.take().ok_or("missing stderr pipe".to_string())?;
        let mut stdin = child.stdin.take().ok_or("missing stdin pipe".to_string())?;

        let state = Arc::new(RwLock::new(LifecycleState::Running));
        let (output_tx, _) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);
        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
        let (exited_tx, exited_rx) = watch::channel(false);

        // Reader tasks: one line in, one broadcast message out.
        let out_tx = output_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = out_tx.send(ConsoleLine::Out(line));
            }
        });
        let err_tx = output_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = err_tx.send(ConsoleLine::Err(line));
            }
        });

        // Writer task: forwards command lines into the child's stdin.
        tokio::spawn(async move {
            while let Some(line) = stdin_rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err()
                    || stdin.write_all(b"\n").await.is_err()
                    || stdin.flush().await.is_err()
                {
                    break;
                }
            }
        });

        // Supervise task: waits for exit or a kill request.
        let supervised_state = Arc::clone(&state);
        let supervised = id.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = &mut kill_rx => {
                    debug!("Killing instance {}", supervised);
                    if let Err(e) = child.kill().await {
                        error!("Failed to kill instance {}: {}", supervised, e);
                    }
                    let _ = child.wait().await;
                }
                status = child.wait() => {
                    match status {
                        Ok(status) => info!("Instance {} exited: {}", supervised, status),
                        Err(e) => error!("Instance {} wait failed: {}", supervised, e),
                    }
                }
            }
            *supervised_state.write().await = LifecycleState::Stopped;
            let _ = exited_tx.send(true);
        });

        instances.insert(
            id.clone(),
            InstanceHandle {
                state,
                stdin_tx,
                output_tx,
                kill_tx: Some(kill_tx),
                exited_rx,
            },
        );
        Ok(())
    }

    /// Kills the instance's process and waits for it to exit.
    pub async fn stop(&self, id: &InstanceId) -> Result<(), String> {
        let mut exited_rx = {
            let mut instances = self.instances.write().await;
            let handle = instances
                .get_mut(id)
                .ok_or_else(|| format!("instance {} is not running", id))?;
            if !handle.state.read().await.socket_desired() {
                return Err(format!("instance {} is not running", id));
            }
            *handle.state.write().await = LifecycleState::Stopping;
            if let Some(kill_tx) = handle.kill_tx.take() {
                let _ = kill_tx.send(());
            }
            handle.exited_rx.clone()
        };

        let exited = tokio::time::timeout(STOP_TIMEOUT, exited_rx.wait_for(|done| *done)).await;
        if exited.is_err() {
            warn!("Instance {} did not exit within {:?}", id, STOP_TIMEOUT);
            return Err(format!("instance {} did not exit", id));
        }
        info!("Instance {} stopped", id);
        Ok(())
    }

    /// Stop (if running) followed by start.
    pub async fn restart(&self, id: &InstanceId) -> Result<(), String> {
        if self.state(id).await.socket_desired() {
            self.stop(id).await?;
        }
        self.start(id).await
    }

    /// Attaches a console to a running instance.
    pub async fn attach(&self, id: &InstanceId) -> Result<ConsoleTap, String> {
        let instances = self.instances.read().await;
        let handle = instances
            .get(id)
            .ok_or_else(|| format!("instance {} is not running", id))?;
        if !handle.state.read().await.socket_desired() {
            return Err(format!("instance {} is not running", id));
        }
        Ok(ConsoleTap {
            output: handle.output_tx.subscribe(),
            exited: handle.exited_rx.clone(),
            stdin: handle.stdin_tx.clone(),
        })
    }

    /// Forwards one command line to a running instance's stdin.
    pub async fn send_line(&self, id: &InstanceId, line: &str) -> Result<(), String> {
        if line.len() > MAX_COMMAND_LEN {
            return Err(format!("command exceeds {} bytes", MAX_COMMAND_LEN));
        }
        let instances = self.instances.read().await;
        let handle = instances
            .get(id)
            .ok_or_else(|| format!("instance {} is not running", id))?;
        if !handle.state.read().await.socket_desired() {
            return Err(format!("instance {} is not running", id));
        }
        handle
            .stdin_tx
            .send(line.to_string())
            .map_err(|_| format!("instance {} is not running", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn manager(command: &str) -> InstanceManager {
        InstanceManager::new(command)
    }

    fn id(s: &str) -> InstanceId {
        InstanceId::new(s).unwrap()
    }

    async fn next_out(tap: &mut ConsoleTap) -> String {
        loop {
            match timeout(Duration::from_secs(5), tap.output.recv())
                .await
                .expect("timed out waiting for output")
            {
                Ok(ConsoleLine::Out(line)) => return line,
                Ok(ConsoleLine::Err(_)) => continue,
                Err(e) => panic!("output channel closed: {}", e),
            }
        }
    }

    #[tokio::test]
    async fn test_start_echo_stop() {
        let manager = manager("cat");
        let id = id("echo-test");

        manager.start(&id).await.unwrap();
        assert_eq!(manager.state(&id).await, LifecycleState::Running);

        let mut tap = manager.attach(&id).await.unwrap();
        manager.send_line(&id, "hello").await.unwrap();
        assert_eq!(next_out(&mut tap).await, "hello");

        manager.stop(&id).await.unwrap();
        assert_eq!(manager.state(&id).await, LifecycleState::Stopped);
        assert!(*tap.exited.borrow());
    }

    #[tokio::test]
    async fn test_double_start_is_rejected() {
        let manager = manager("cat");
        let id = id("double-start");

        manager.start(&id).await.unwrap();
        assert!(manager.start(&id).await.is_err());
        manager.stop(&id).await.unwrap();

        // A stopped instance can be started again.
        manager.start(&id).await.unwrap();
        manager.stop(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_of_unknown_instance_fails() {
        let manager = manager("cat");
        assert!(manager.stop(&id("missing")).await.is_err());
    }

    #[tokio::test]
    async fn test_stderr_lines_are_kept_apart() {
        let manager = manager("echo oops >&2; cat");
        let id = id("stderr-test");

        manager.start(&id).await.unwrap();
        let mut tap = manager.attach(&id).await.unwrap();
        match timeout(Duration::from_secs(5), tap.output.recv())
            .await
            .expect("timed out waiting for stderr")
            .expect("output channel closed")
        {
            ConsoleLine::Err(line) => assert_eq!(line, "oops"),
            ConsoleLine::Out(line) => panic!("expected stderr, got stdout {:?}", line),
        }
        manager.stop(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_self_exit_is_observed() {
        let manager = manager("echo bye");
        let id = id("self-exit");

        manager.start(&id).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while manager.state(&id).await != LifecycleState::Stopped {
            assert!(
                tokio::time::Instant::now() < deadline,
                "instance did not exit"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

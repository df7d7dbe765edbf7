//! Launching, probing and stopping MCP server processes.
//!
//! The manager keeps at most one handle per port. Its handle table is locked
//! for the whole of `start` and `stop`, so two concurrent starts on one port
//! spawn at most one process: the second caller sees the first caller's
//! server and reports it as already running.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::registry::{HandleRecord, Registry};
use super::{ConnectorEvents, NoopEvents};
use crate::config::Settings;
use crate::error::ProcessError;
use crate::mcp::jsonrpc::SERVER_NAME;
use crate::mcp::protocol::ServerStatus;

/// Last known health of a server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Not probed yet (for example, loaded from the registry).
    #[default]
    Unknown,
    /// Launched, waiting for the first successful probe.
    Starting,
    /// Answering probes.
    Running,
    /// Confirmed stopped.
    Stopped,
    /// Launched but never answered, or stopped answering.
    Crashed,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Unknown => "unknown",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Crashed => "crashed",
        };
        f.write_str(text)
    }
}

/// Timing of startup polling, shutdown waits and probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    /// Number of `/ping` polls after launching.
    pub startup_attempts: u32,
    /// Delay between startup polls.
    pub startup_backoff: Duration,
    /// How long to wait for a graceful stop before killing.
    pub shutdown_timeout: Duration,
    /// Timeout of one probe request.
    pub probe_timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            startup_attempts: 30,
            startup_backoff: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

/// What a [`Launcher`] produced.
#[derive(Debug)]
pub struct SpawnedServer {
    /// Process id, when the launcher knows it.
    pub pid: Option<u32>,
    /// The child process, when the launcher owns one.
    pub child: Option<Child>,
}

/// Starts a server process listening on `port`.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Launches a server for `port` that talks to the Revit handler on
    /// `companion_port`. Must not wait for the server to become ready.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::ExecutableNotFound`] or
    /// [`ProcessError::Spawn`] if nothing could be launched.
    async fn launch(&self, port: u16, companion_port: u16) -> Result<SpawnedServer, ProcessError>;
}

/// Launches the `revit-mcp` executable as a detached child process.
#[derive(Debug, Clone)]
pub struct ExecutableLauncher {
    executable: PathBuf,
    log_path: Option<PathBuf>,
}

impl ExecutableLauncher {
    /// File name of the server executable on this platform.
    pub const EXECUTABLE_NAME: &'static str = if cfg!(windows) {
        "revit-mcp.exe"
    } else {
        "revit-mcp"
    };

    /// A launcher for a specific executable.
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            log_path: None,
        }
    }

    /// A launcher for the server executable installed next to the current
    /// executable, logging to `~/.revit-mcp/server.log`.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::ExecutableNotFound`] if the current executable's
    /// directory cannot be determined.
    pub fn locate() -> Result<Self, ProcessError> {
        let current = std::env::current_exe().map_err(|_| ProcessError::ExecutableNotFound {
            path: PathBuf::from(Self::EXECUTABLE_NAME),
        })?;
        let dir = current
            .parent()
            .ok_or_else(|| ProcessError::ExecutableNotFound {
                path: PathBuf::from(Self::EXECUTABLE_NAME),
            })?;

        let mut launcher = Self::new(dir.join(Self::EXECUTABLE_NAME));
        launcher.log_path = crate::config::default_log_path();
        Ok(launcher)
    }

    /// Sends the child's stderr (its log output) to `path`.
    #[must_use]
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// The executable this launcher starts.
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn log_target(&self) -> Stdio {
        let Some(path) = &self.log_path else {
            return Stdio::null();
        };

        let opened = path
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|()| {
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
            });

        match opened {
            Ok(file) => Stdio::from(file),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot open server log, discarding output");
                Stdio::null()
            }
        }
    }
}

#[async_trait]
impl Launcher for ExecutableLauncher {
    async fn launch(&self, port: u16, companion_port: u16) -> Result<SpawnedServer, ProcessError> {
        if !self.executable.is_file() {
            return Err(ProcessError::ExecutableNotFound {
                path: self.executable.clone(),
            });
        }

        let mut command = Command::new(&self.executable);
        command
            .arg(port.to_string())
            .arg(companion_port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(self.log_target())
            .kill_on_drop(false);

        // Keep the server alive when the launching terminal is interrupted.
        #[cfg(unix)]
        command.process_group(0);

        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        let child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProcessError::ExecutableNotFound {
                    path: self.executable.clone(),
                }
            } else {
                ProcessError::Spawn {
                    path: self.executable.clone(),
                    source: e,
                }
            }
        })?;

        let pid = child.id();
        tracing::info!(
            executable = %self.executable.display(),
            port,
            companion_port,
            pid,
            "Launched MCP server"
        );

        Ok(SpawnedServer {
            pid,
            child: Some(child),
        })
    }
}

/// Result of [`ProcessManager::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new process was launched and answered.
    Started,
    /// A healthy server already had a handle.
    AlreadyRunning,
    /// A server launched elsewhere was found on the port and recorded.
    Adopted,
}

/// Result of [`ProcessManager::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No handle existed for the port.
    NotRunning,
    /// The server stopped after the shutdown request.
    Graceful,
    /// The server was killed after the shutdown timeout.
    Forced,
}

struct ServerHandle {
    record: HandleRecord,
    child: Option<Child>,
}

impl ServerHandle {
    /// `false` only when we own the child and it has exited.
    fn process_alive(&mut self) -> bool {
        match self.child.as_mut().map(Child::try_wait) {
            Some(Ok(Some(status))) => {
                tracing::debug!(port = self.record.port, %status, "Server process has exited");
                false
            }
            _ => true,
        }
    }
}

/// Starts, stops and health-checks MCP server processes.
pub struct ProcessManager {
    launcher: Arc<dyn Launcher>,
    handles: Mutex<HashMap<u16, ServerHandle>>,
    http: reqwest::Client,
    probe: ProbeSettings,
    registry: Option<Registry>,
    events: Arc<dyn ConnectorEvents>,
}

impl std::fmt::Debug for ProcessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessManager")
            .field("probe", &self.probe)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl ProcessManager {
    /// A manager that launches servers with `launcher`.
    pub fn new(launcher: Arc<dyn Launcher>) -> Self {
        Self {
            launcher,
            handles: Mutex::new(HashMap::new()),
            http: reqwest::Client::new(),
            probe: ProbeSettings::default(),
            registry: None,
            events: Arc::new(NoopEvents),
        }
    }

    /// Overrides probe timing.
    #[must_use]
    pub const fn with_probe_settings(mut self, probe: ProbeSettings) -> Self {
        self.probe = probe;
        self
    }

    /// Persists handles to `registry`, starting from the records already in
    /// it. Loaded handles have no child process and are re-probed on use.
    #[must_use]
    pub fn with_registry(mut self, registry: Registry) -> Self {
        let loaded = registry.load();
        if !loaded.is_empty() {
            tracing::debug!(count = loaded.len(), "Loaded server handles from registry");
        }
        let handles = self.handles.get_mut();
        for mut record in loaded {
            record.state = HealthState::Unknown;
            handles.insert(record.port, ServerHandle {
                record,
                child: None,
            });
        }
        self.registry = Some(registry);
        self
    }

    /// Sends status changes to `events`.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn ConnectorEvents>) -> Self {
        self.events = events;
        self
    }

    /// Ensures a server is running on `port`.
    ///
    /// Idempotent: a healthy existing handle is reused without spawning.
    ///
    /// # Errors
    ///
    /// - [`ProcessError::PortInUse`] if another program holds the port
    /// - [`ProcessError::ExecutableNotFound`] / [`ProcessError::Spawn`] if
    ///   the launch failed
    /// - [`ProcessError::Unresponsive`] if the server never answered; the
    ///   handle is kept in the `crashed` state
    pub async fn start(&self, port: u16, companion_port: u16) -> Result<StartOutcome, ProcessError> {
        let mut handles = self.handles.lock().await;

        if let Some(handle) = handles.get_mut(&port) {
            if handle.process_alive() && self.ping(port).await {
                self.set_state(handle, HealthState::Running);
                tracing::info!(port, "MCP server already running");
                return Ok(StartOutcome::AlreadyRunning);
            }

            tracing::warn!(port, state = %handle.record.state, "Discarding stale server handle");
            if let Some(child) = handle.child.as_mut() {
                if let Err(e) = child.start_kill() {
                    tracing::debug!(port, error = %e, "Stale server process could not be killed");
                }
            }
            handles.remove(&port);
        }

        if port_in_use(port).await {
            return match self.fetch_status(port).await {
                Some(status) => {
                    tracing::info!(port, pid = status.pid, "Adopting running MCP server");
                    let handle = ServerHandle {
                        record: HandleRecord {
                            port,
                            companion_port: status.revit_port,
                            pid: Some(status.pid),
                            started_at: chrono::Utc::now().timestamp()
                                - i64::try_from(status.uptime_secs).unwrap_or(0),
                            state: HealthState::Running,
                        },
                        child: None,
                    };
                    handles.insert(port, handle);
                    self.persist(&handles);
                    self.events.on_status_changed(port, HealthState::Running);
                    Ok(StartOutcome::Adopted)
                }
                None => {
                    tracing::error!(port, "Port is held by another program");
                    Err(ProcessError::PortInUse { port })
                }
            };
        }

        let spawned = self.launcher.launch(port, companion_port).await?;
        let mut handle = ServerHandle {
            record: HandleRecord {
                port,
                companion_port,
                pid: spawned.pid,
                started_at: chrono::Utc::now().timestamp(),
                state: HealthState::Starting,
            },
            child: spawned.child,
        };
        self.events.on_status_changed(port, HealthState::Starting);

        let ready = self.wait_until_ready(&mut handle).await;
        let state = if ready {
            HealthState::Running
        } else {
            HealthState::Crashed
        };
        self.set_state(&mut handle, state);
        handles.insert(port, handle);
        self.persist(&handles);

        if ready {
            tracing::info!(port, companion_port, "MCP server started");
            Ok(StartOutcome::Started)
        } else {
            let waited = self.probe.startup_backoff * self.probe.startup_attempts;
            tracing::error!(port, ?waited, "MCP server did not respond");
            Err(ProcessError::Unresponsive { port, waited })
        }
    }

    /// Stops the server on `port`. The handle is cleared in every case.
    ///
    /// # Errors
    ///
    /// - [`ProcessError::Terminate`] if forced termination failed
    /// - [`ProcessError::StillRunning`] if the server ignored the shutdown
    ///   request and its process id is unknown
    pub async fn stop(&self, port: u16) -> Result<StopOutcome, ProcessError> {
        let mut handles = self.handles.lock().await;

        let Some(mut handle) = handles.remove(&port) else {
            tracing::debug!(port, "No server handle, nothing to stop");
            return Ok(StopOutcome::NotRunning);
        };
        self.persist(&handles);

        if let Err(e) = self
            .http
            .get(probe_url(port, "shutdown"))
            .timeout(self.probe.probe_timeout)
            .send()
            .await
        {
            tracing::debug!(port, error = %e, "Shutdown request failed");
        }

        let outcome = if self.wait_until_stopped(port).await {
            if let Some(child) = handle.child.as_mut() {
                // Reap the exited child.
                let _ = tokio::time::timeout(self.probe.probe_timeout, child.wait()).await;
            }
            StopOutcome::Graceful
        } else {
            tracing::warn!(port, "Server ignored shutdown request, terminating");
            match (handle.child.as_mut(), handle.record.pid) {
                (Some(child), pid) => {
                    child.kill().await.map_err(|source| ProcessError::Terminate {
                        pid: pid.unwrap_or_default(),
                        source,
                    })?;
                }
                (None, Some(pid)) => terminate_pid(pid).await?,
                (None, None) => {
                    self.events.on_status_changed(port, HealthState::Unknown);
                    return Err(ProcessError::StillRunning { port });
                }
            }
            StopOutcome::Forced
        };

        tracing::info!(port, ?outcome, "MCP server stopped");
        self.events.on_status_changed(port, HealthState::Stopped);
        Ok(outcome)
    }

    /// Probes the server on `port` and returns its health.
    ///
    /// Updates only the handle's state, never its process identity. Without
    /// a handle, reports `running` if a server answers and `stopped`
    /// otherwise.
    pub async fn status(&self, port: u16) -> HealthState {
        let mut handles = self.handles.lock().await;
        let alive = self.ping(port).await;

        let Some(handle) = handles.get_mut(&port) else {
            return if alive {
                HealthState::Running
            } else {
                HealthState::Stopped
            };
        };

        let state = match (alive, handle.record.state) {
            (true, _) => HealthState::Running,
            (false, HealthState::Starting) if handle.process_alive() => HealthState::Starting,
            (false, _) => HealthState::Crashed,
        };
        if state != handle.record.state {
            self.set_state(handle, state);
            self.persist(&handles);
        }
        state
    }

    /// A snapshot of the handle for `port`.
    pub async fn handle(&self, port: u16) -> Option<HandleRecord> {
        self.handles
            .lock()
            .await
            .get(&port)
            .map(|h| h.record.clone())
    }

    /// Snapshots of every handle, ordered by port.
    pub async fn handles(&self) -> Vec<HandleRecord> {
        let mut records: Vec<_> = self
            .handles
            .lock()
            .await
            .values()
            .map(|h| h.record.clone())
            .collect();
        records.sort_by_key(|r| r.port);
        records
    }

    /// Forgets the handle for `port` without touching the process.
    pub async fn discard(&self, port: u16) -> Option<HandleRecord> {
        let mut handles = self.handles.lock().await;
        let removed = handles.remove(&port).map(|h| h.record);
        if removed.is_some() {
            self.persist(&handles);
        }
        removed
    }

    /// Starts the server on the configured ports if `auto_start` is set.
    ///
    /// Returns `true` if a server is running on `settings.mcp_port` when
    /// this returns.
    ///
    /// # Errors
    ///
    /// See [`start`](Self::start).
    pub async fn ensure_running(&self, settings: &Settings) -> Result<bool, ProcessError> {
        if !settings.auto_start {
            let running = self.status(settings.mcp_port).await == HealthState::Running;
            if !running {
                tracing::info!(port = settings.mcp_port, "MCP server not running and auto-start is off");
            }
            return Ok(running);
        }
        self.start(settings.mcp_port, settings.revit_port).await?;
        Ok(true)
    }

    async fn ping(&self, port: u16) -> bool {
        self.http
            .get(probe_url(port, "ping"))
            .timeout(self.probe.probe_timeout)
            .send()
            .await
            .is_ok_and(|response| response.status().is_success())
    }

    async fn fetch_status(&self, port: u16) -> Option<ServerStatus> {
        let response = self
            .http
            .get(probe_url(port, "status"))
            .timeout(self.probe.probe_timeout)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        response
            .json::<ServerStatus>()
            .await
            .ok()
            .filter(|status| status.service == SERVER_NAME)
    }

    async fn wait_until_ready(&self, handle: &mut ServerHandle) -> bool {
        let port = handle.record.port;
        for attempt in 1..=self.probe.startup_attempts {
            if self.ping(port).await {
                return true;
            }
            if !handle.process_alive() {
                tracing::error!(port, "MCP server exited during startup");
                return false;
            }
            tracing::debug!(port, attempt, "Waiting for MCP server");
            tokio::time::sleep(self.probe.startup_backoff).await;
        }
        self.ping(port).await
    }

    async fn wait_until_stopped(&self, port: u16) -> bool {
        let deadline = tokio::time::Instant::now() + self.probe.shutdown_timeout;
        let step = Duration::from_millis(250).min(self.probe.shutdown_timeout);
        loop {
            if !self.ping(port).await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(step).await;
        }
    }

    fn set_state(&self, handle: &mut ServerHandle, state: HealthState) {
        if handle.record.state != state {
            handle.record.state = state;
            self.events.on_status_changed(handle.record.port, state);
        }
    }

    fn persist(&self, handles: &HashMap<u16, ServerHandle>) {
        let Some(registry) = &self.registry else {
            return;
        };
        if let Err(e) = registry.save(handles.values().map(|h| &h.record)) {
            tracing::warn!(error = %e, "Could not update server registry");
        }
    }
}

fn probe_url(port: u16, path: &str) -> String {
    format!("http://127.0.0.1:{port}/{path}")
}

/// `true` if something is listening on `127.0.0.1:port`.
async fn port_in_use(port: u16) -> bool {
    tokio::net::TcpListener::bind(("127.0.0.1", port)).await.is_err()
}

#[cfg(unix)]
async fn terminate_pid(pid: u32) -> Result<(), ProcessError> {
    run_terminate(pid, Command::new("kill").arg("-9").arg(pid.to_string())).await
}

#[cfg(windows)]
async fn terminate_pid(pid: u32) -> Result<(), ProcessError> {
    run_terminate(
        pid,
        Command::new("taskkill")
            .arg("/PID")
            .arg(pid.to_string())
            .arg("/T")
            .arg("/F"),
    )
    .await
}

#[cfg(not(any(unix, windows)))]
async fn terminate_pid(pid: u32) -> Result<(), ProcessError> {
    Err(ProcessError::Terminate {
        pid,
        source: std::io::Error::from(std::io::ErrorKind::Unsupported),
    })
}

#[cfg(any(unix, windows))]
async fn run_terminate(pid: u32, command: &mut Command) -> Result<(), ProcessError> {
    let status = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|source| ProcessError::Terminate { pid, source })?;

    if status.success() {
        Ok(())
    } else {
        Err(ProcessError::Terminate {
            pid,
            source: std::io::Error::other(format!("terminate command exited with {status}")),
        })
    }
}

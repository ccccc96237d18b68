//! Database controller driven by shell command hooks.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tether_state::LocalState;
use tether_types::DynamicRole;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::{MissedTickBehavior, interval, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ControllerError, ControllerResult};
use crate::performer::Performer;

/// Shell commands that drive the database.
///
/// Every command runs through `sh -c`. `start` must keep running for as long
/// as the database does (use `exec` so the database replaces the shell).
#[derive(Debug, Clone, Default)]
pub struct DatabaseCommands {
    /// Run once before the first start, e.g. to create a data directory.
    pub init: Option<String>,
    /// Long-running database process.
    pub start: String,
    /// Asks the database to shut down. Without it the process is killed.
    pub stop: Option<String>,
    /// Run when entering `active`.
    pub promote: Option<String>,
    /// Run when entering `backup`.
    pub demote: Option<String>,
    /// Run when entering `single`.
    pub standalone: Option<String>,
    /// Exits 0 once the replica has caught up with the active.
    pub sync_check: Option<String>,
}

/// Timing knobs for [`CommandController`].
#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    /// How long a freshly started database must stay up to count as started.
    pub start_grace: Duration,
    /// Bound on waiting for the database to exit after being asked to stop.
    pub stop_timeout: Duration,
    /// Period of the monitoring loop.
    pub sync_poll: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            start_grace: Duration::from_millis(200),
            stop_timeout: Duration::from_secs(10),
            sync_poll: Duration::from_secs(1),
        }
    }
}

struct Inner {
    child: Option<Child>,
}

/// A [`Performer`] supervising the database as a child process.
pub struct CommandController {
    local: LocalState,
    commands: DatabaseCommands,
    settings: ControllerSettings,
    inner: Mutex<Inner>,
    shutdown: CancellationToken,
}

impl CommandController {
    pub fn new(local: LocalState, commands: DatabaseCommands, settings: ControllerSettings) -> Self {
        Self {
            local,
            commands,
            settings,
            inner: Mutex::new(Inner { child: None }),
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns true if the database process is running.
    pub async fn is_running(&self) -> bool {
        let mut inner = self.inner.lock().await;
        alive(&mut inner)
    }

    async fn start_locked(&self, inner: &mut Inner) -> ControllerResult<()> {
        if alive(inner) {
            debug!("database already running");
            return Ok(());
        }

        info!(command = %self.commands.start, "starting database");
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.commands.start)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ControllerError::Io {
                command: self.commands.start.clone(),
                source,
            })?;

        sleep(self.settings.start_grace).await;

        match child.try_wait() {
            Ok(None) => {
                info!(pid = ?child.id(), "database started");
                inner.child = Some(child);
                Ok(())
            }
            Ok(Some(status)) => Err(ControllerError::StartFailed(format!(
                "process exited during startup with {status}"
            ))),
            Err(source) => Err(ControllerError::Io {
                command: self.commands.start.clone(),
                source,
            }),
        }
    }

    async fn stop_locked(&self, inner: &mut Inner) -> ControllerResult<()> {
        if let Some(mut child) = inner.child.take() {
            info!("stopping database");
            let mut asked = false;
            if let Some(stop) = &self.commands.stop {
                match run_hook(stop).await {
                    Ok(()) => asked = true,
                    Err(e) => warn!(error = %e, "stop command failed, killing database"),
                }
            }

            let exited = if asked {
                timeout(self.settings.stop_timeout, child.wait()).await.ok()
            } else {
                None
            };

            if exited.is_none() {
                if asked {
                    warn!(timeout = ?self.settings.stop_timeout, "database did not stop in time, killing it");
                }
                child.kill().await.map_err(|source| ControllerError::Io {
                    command: self.commands.start.clone(),
                    source,
                })?;
            }
            info!("database stopped");
        }

        let record = self.local.record()?;
        if record.role == DynamicRole::Backup && !record.synced {
            // Keeps the sync guard in force until the active is back
            debug!("unsynced backup keeps its role of record while stopped");
        } else if record.role != DynamicRole::Dead {
            self.local.record_role(DynamicRole::Dead)?;
        }
        Ok(())
    }

    async fn transition(&self, target: DynamicRole, hook: Option<&str>) -> ControllerResult<()> {
        let mut inner = self.inner.lock().await;
        let previous = self.local.record()?.role;

        if previous == target && alive(&mut inner) {
            debug!(role = %target, "database already in requested role");
            return Ok(());
        }

        info!(from = %previous, to = %target, "transitioning database");
        self.start_locked(&mut inner).await?;
        if let Some(hook) = hook {
            run_hook(hook).await?;
        }

        self.local.record_role(target)?;
        if target.is_writable() {
            // A writer holds the newest data by definition
            self.local.record_synced(true)?;
        } else if target == DynamicRole::Backup && previous != DynamicRole::Backup {
            self.local.record_synced(false)?;
        }
        info!(role = %target, "database transitioned");
        Ok(())
    }

    async fn poll(&self) -> ControllerResult<()> {
        let mut inner = self.inner.lock().await;

        if let Some(child) = inner.child.as_mut() {
            let exited = child.try_wait().map_err(|source| ControllerError::Io {
                command: self.commands.start.clone(),
                source,
            })?;
            if let Some(status) = exited {
                inner.child = None;
                error!(%status, "database process exited");
                return Err(ControllerError::ProcessExited {
                    code: status.code(),
                });
            }
        } else {
            return Ok(());
        }

        let Some(check) = &self.commands.sync_check else {
            return Ok(());
        };
        let record = self.local.record()?;
        if record.role != DynamicRole::Backup || record.synced {
            return Ok(());
        }

        match hook_status(check).await? {
            status if status.success() => {
                info!("replica caught up with the active");
                self.local.record_synced(true)?;
            }
            status => debug!(%status, "replica not yet synced"),
        }
        Ok(())
    }
}

impl Performer for CommandController {
    async fn initialize(&self) -> ControllerResult<()> {
        match &self.commands.init {
            Some(init) => {
                info!(command = %init, "initializing database");
                run_hook(init).await
            }
            None => Ok(()),
        }
    }

    async fn start(&self) -> ControllerResult<()> {
        let mut inner = self.inner.lock().await;
        self.start_locked(&mut inner).await
    }

    async fn stop(&self) -> ControllerResult<()> {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner).await
    }

    async fn transition_to_active(&self) -> ControllerResult<()> {
        self.transition(DynamicRole::Active, self.commands.promote.as_deref())
            .await
    }

    async fn transition_to_backup(&self) -> ControllerResult<()> {
        self.transition(DynamicRole::Backup, self.commands.demote.as_deref())
            .await
    }

    async fn transition_to_single(&self) -> ControllerResult<()> {
        self.transition(DynamicRole::Single, self.commands.standalone.as_deref())
            .await
    }

    async fn run(&self) -> ControllerResult<()> {
        let mut tick = interval(self.settings.sync_poll);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    debug!("controller loop finished");
                    return Ok(());
                }
                _ = tick.tick() => self.poll().await?,
            }
        }
    }

    async fn shutdown(&self) -> ControllerResult<()> {
        let stopped = self.stop().await;
        self.shutdown.cancel();
        stopped
    }
}

fn alive(inner: &mut Inner) -> bool {
    match inner.child.as_mut().map(Child::try_wait) {
        Some(Ok(None)) => true,
        Some(Ok(Some(_)) | Err(_)) | None => false,
    }
}

async fn hook_status(command: &str) -> ControllerResult<ExitStatus> {
    debug!(command, "running hook");
    Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .status()
        .await
        .map_err(|source| ControllerError::Io {
            command: command.to_string(),
            source,
        })
}

async fn run_hook(command: &str) -> ControllerResult<()> {
    let status = hook_status(command).await?;
    if status.success() {
        Ok(())
    } else {
        Err(ControllerError::CommandFailed {
            command: command.to_string(),
            status,
        })
    }
}

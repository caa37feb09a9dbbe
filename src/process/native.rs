//! OS-backed process control: re-executes the `iz` binary per role.
//!
//! The child's stdout is its advertisement channel; its logs go to its own
//! log file. Children are placed in their own process group so an interrupt
//! aimed at the launching terminal does not reach the tree.

use async_trait::async_trait;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use super::{
    Advertisement, ProcessControl, Signal, SpawnRequest, SpawnedRole, DEPTH_ENV, MANAGER_ENV,
    ROLE_ENV, SERVICE_ENV,
};
use crate::types::{Error, Result, HOME_ENV};

#[derive(Debug, Clone)]
pub struct NativeProcessControl {
    program: PathBuf,
    home: PathBuf,
    has_parent: bool,
}

impl NativeProcessControl {
    /// `program` is re-executed for every role; `home` is forwarded to it.
    pub fn new(program: impl Into<PathBuf>, home: impl Into<PathBuf>, has_parent: bool) -> Self {
        Self {
            program: program.into(),
            home: home.into(),
            has_parent,
        }
    }

    /// Process control for the running executable.
    pub fn current(home: impl Into<PathBuf>, has_parent: bool) -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?, home, has_parent))
    }
}

#[async_trait]
impl ProcessControl for NativeProcessControl {
    async fn spawn(&self, request: SpawnRequest) -> Result<SpawnedRole> {
        let mut command = Command::new(&self.program);
        command
            .arg("--home")
            .arg(&self.home)
            .env(HOME_ENV, &self.home)
            .env(ROLE_ENV, request.role.as_str())
            .env(SERVICE_ENV, &request.name)
            .env(DEPTH_ENV, request.depth.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        match &request.manager {
            Some(manager) => command.env(MANAGER_ENV, manager),
            None => command.env_remove(MANAGER_ENV),
        };
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| Error::internal("spawned role exited before reporting a pid"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::internal("spawned role has no advertisement channel"))?;
        tracing::info!(role = %request.role, service = %request.name, pid, "role process spawned");

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match Advertisement::decode(&line) {
                        Ok(advertisement) => {
                            let _ = tx.send(advertisement);
                        }
                        Err(_) => tracing::debug!(pid, "ignoring channel output: {}", line),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(pid, "advertisement channel closed: {}", e);
                        break;
                    }
                }
            }
        });

        let role = request.role;
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::info!(%role, pid, %status, "role process exited"),
                Err(e) => tracing::warn!(%role, pid, "failed to reap role process: {}", e),
            }
        });

        Ok(SpawnedRole {
            pid,
            advertisements: rx,
        })
    }

    fn send_signal(&self, pid: u32, signal: Signal) -> Result<()> {
        use nix::sys::signal::{kill, Signal as NixSignal};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid).map_err(|_| Error::internal(format!("invalid pid {}", pid)))?;
        let signal = match signal {
            Signal::Terminate => NixSignal::SIGTERM,
        };
        kill(Pid::from_raw(raw), signal)
            .map_err(|e| Error::internal(format!("kill({}, {}) failed: {}", pid, signal, e)))
    }

    async fn on_signal(&self) -> Result<()> {
        wait_for_shutdown_signal().await?;
        Ok(())
    }

    fn send_message(&self, advertisement: &Advertisement) -> Result<()> {
        let line = advertisement.encode()?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", line)?;
        stdout.flush()?;
        Ok(())
    }

    fn has_parent_channel(&self) -> bool {
        self.has_parent
    }
}

/// Waits for SIGINT, SIGTERM or SIGQUIT (Ctrl-C elsewhere).
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::types::Role;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &std::path::Path, body: &str) -> PathBuf {
        let path = dir.join("fake-role.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn spawn_reads_advertisements_from_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(
            dir.path(),
            r#"echo "starting $IZ_ROLE $IZ_SERVICE $IZ_DEPTH"
echo '{"Controller":{"event":"startup","status":"OK","pid":7,"port":24001}}'"#,
        );
        let control = NativeProcessControl::new(program, dir.path(), false);

        let mut spawned = control
            .spawn(SpawnRequest::controller("alpha", 0, None))
            .await
            .unwrap();
        assert!(spawned.pid > 0);
        assert_eq!(
            spawned.advertisements.recv().await,
            Some(Advertisement::new(Role::Controller, 7, 24001))
        );
        assert_eq!(spawned.advertisements.recv().await, None);
    }

    #[test]
    fn signalling_invalid_pid_fails() {
        let control = NativeProcessControl::new("/bin/true", "/tmp", false);
        assert!(control.send_signal(u32::MAX, Signal::Terminate).is_err());
    }
}

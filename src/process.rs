// Process - One node OS process with captured output
// Principle: Only the owning TestNode touches its handle; exit status is collected once

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::debug;

/// File name of the captured stdout inside the node directory
pub const STDOUT_FILE: &str = "stdout.log";
/// File name of the captured stderr inside the node directory
pub const STDERR_FILE: &str = "stderr.log";

/// Owns a spawned node process
#[derive(Debug)]
pub struct ProcessHandle {
    /// Locked only for the non-blocking exit probe
    child: Mutex<Child>,
    pid: Option<u32>,
    stdout_path: PathBuf,
    stderr_path: PathBuf,
    exit: Mutex<Option<ExitStatus>>,
}

impl ProcessHandle {
    /// Spawn `binary args...` with stdout/stderr redirected into `log_dir`
    pub fn spawn(binary: &Path, args: &[String], log_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        let stdout_path = log_dir.join(STDOUT_FILE);
        let stderr_path = log_dir.join(STDERR_FILE);
        let stdout = File::create(&stdout_path)?;
        let stderr = File::create(&stderr_path)?;

        let child = Command::new(binary)
            .args(args)
            .current_dir(log_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()?;

        let pid = child.id();
        debug!("Spawned {} (pid {:?})", binary.display(), pid);

        Ok(Self {
            child: Mutex::new(child),
            pid,
            stdout_path,
            stderr_path,
            exit: Mutex::new(None),
        })
    }

    /// OS process id, if known at spawn time
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status if the process has exited, without blocking
    pub fn try_exit(&self) -> std::io::Result<Option<ExitStatus>> {
        let mut exit = self.exit.lock().unwrap_or_else(PoisonError::into_inner);
        if exit.is_some() {
            return Ok(*exit);
        }
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        let status = child.try_wait()?;
        *exit = status;
        Ok(status)
    }

    /// Whether the process is still alive
    pub fn is_running(&self) -> bool {
        matches!(self.try_exit(), Ok(None))
    }

    /// Send a kill signal; a no-op once the process has exited
    pub fn kill(&mut self) -> std::io::Result<()> {
        if self.try_exit()?.is_some() {
            return Ok(());
        }
        let child = self.child.get_mut().unwrap_or_else(PoisonError::into_inner);
        match child.start_kill() {
            Ok(()) => Ok(()),
            // Raced with a natural exit
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Wait up to `timeout` for the process to exit
    pub async fn wait_timeout(&mut self, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
        if let Some(status) = self.try_exit()? {
            return Ok(Some(status));
        }
        let child = self.child.get_mut().unwrap_or_else(PoisonError::into_inner);
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => {
                let status = status?;
                *self.exit.get_mut().unwrap_or_else(PoisonError::into_inner) = Some(status);
                Ok(Some(status))
            }
            Err(_) => Ok(None),
        }
    }

    /// Everything the process wrote to stderr so far
    pub fn read_stderr(&self) -> std::io::Result<String> {
        let bytes = std::fs::read(&self.stderr_path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn stdout_path(&self) -> &Path {
        &self.stdout_path
    }

    pub fn stderr_path(&self) -> &Path {
        &self.stderr_path
    }
}

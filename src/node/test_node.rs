// Test Node - One kratos-node process, its RPC endpoint and harness session
// Principle: State changes only through the lifecycle machine; health is re-derived, never assumed

use super::options::NodeOptions;
use super::state::{Lifecycle, NodeState};
use crate::error::{HarnessError, Result};
use crate::network::SessionHandle;
use crate::process::ProcessHandle;
use crate::retry::{poll_until, PollError, Probe};
use crate::rpc::NodeRpc;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Timing knobs of a node
#[derive(Debug, Clone)]
pub struct NodeTiming {
    /// Sleep between readiness probes
    pub poll_interval: Duration,
    /// Bound on reaching a recovery phase once RPC is up
    pub phase_timeout: Duration,
    /// Bound on process exit after a stop request
    pub stop_timeout: Duration,
}

impl Default for NodeTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            phase_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(60),
        }
    }
}

/// A node under test
pub struct TestNode {
    index: usize,
    binary: PathBuf,
    options: NodeOptions,
    rpc: NodeRpc,
    timing: NodeTiming,
    process: Option<ProcessHandle>,
    lifecycle: Lifecycle,
    /// Last recovery phase observed during startup
    phase_watermark: Option<String>,
    /// Identity reported by the node, valid for the current epoch
    node_id: Option<String>,
    /// Declared peers, by node index
    peers: BTreeSet<usize>,
    session: Option<SessionHandle>,
    /// Kill the process when the node is dropped
    cleanup_on_exit: bool,
}

impl TestNode {
    pub fn new(index: usize, binary: &Path, options: NodeOptions, rpc: NodeRpc, timing: NodeTiming) -> Self {
        Self {
            index,
            binary: binary.to_path_buf(),
            options,
            rpc,
            timing,
            process: None,
            lifecycle: Lifecycle::default(),
            phase_watermark: None,
            node_id: None,
            peers: BTreeSet::new(),
            session: None,
            cleanup_on_exit: true,
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> NodeState {
        self.lifecycle.state()
    }

    pub fn epoch(&self) -> u64 {
        self.lifecycle.epoch()
    }

    pub fn rpc(&self) -> &NodeRpc {
        &self.rpc
    }

    pub fn options(&self) -> &NodeOptions {
        &self.options
    }

    /// Options used by the next start
    pub fn options_mut(&mut self) -> &mut NodeOptions {
        &mut self.options
    }

    pub fn datadir(&self) -> &Path {
        &self.options.base_path
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    pub fn phase_watermark(&self) -> Option<&str> {
        self.phase_watermark.as_deref()
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.id())
    }

    pub fn peers(&self) -> &BTreeSet<usize> {
        &self.peers
    }

    pub fn add_peer(&mut self, peer: usize) {
        self.peers.insert(peer);
    }

    pub fn remove_peer(&mut self, peer: usize) {
        self.peers.remove(&peer);
    }

    pub fn cleanup_on_exit(&self) -> bool {
        self.cleanup_on_exit
    }

    pub fn set_cleanup_on_exit(&mut self, cleanup: bool) {
        self.cleanup_on_exit = cleanup;
    }

    pub fn attach_session(&mut self, session: SessionHandle) {
        if let Some(old) = self.session.replace(session) {
            debug!("Node {}: replacing peer session {}", self.index, old.id());
        }
    }

    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut SessionHandle> {
        self.session.as_mut()
    }

    pub fn take_session(&mut self) -> Option<SessionHandle> {
        self.session.take()
    }

    fn transition(&mut self, to: NodeState) -> Result<()> {
        let index = self.index;
        self.lifecycle
            .transition(to)
            .map_err(|(from, to)| HarnessError::InvalidTransition { node: index, from, to })
    }

    // =========================================================================
    // START
    // =========================================================================

    /// Spawn the process and wait until it is ready for test traffic
    pub async fn start(&mut self, extra_args: &[String], wait_phases: &[&str], timeout: Duration) -> Result<()> {
        self.spawn(extra_args)?;
        self.wait_ready(wait_phases, timeout).await
    }

    /// Spawn the process without waiting for it
    pub fn spawn(&mut self, extra_args: &[String]) -> Result<()> {
        self.transition(NodeState::Starting)?;
        self.node_id = None;
        self.phase_watermark = None;

        let mut args = self.options.to_args();
        args.extend(extra_args.iter().cloned());

        match ProcessHandle::spawn(&self.binary, &args, self.datadir()) {
            Ok(process) => {
                info!(
                    "🚀 Node {} spawned (pid {:?}, epoch {}), RPC at {}",
                    self.index,
                    process.id(),
                    self.epoch(),
                    self.rpc.url()
                );
                self.process = Some(process);
                Ok(())
            }
            Err(e) => {
                error!("Node {} failed to spawn {}: {}", self.index, self.binary.display(), e);
                self.transition(NodeState::Crashed)?;
                Err(HarnessError::Io(e))
            }
        }
    }

    /// Wait for RPC, then the node identity, then (if any) one of `wait_phases`.
    ///
    /// RPC and identity share `timeout`; the phase wait has its own budget.
    pub async fn wait_ready(&mut self, wait_phases: &[&str], timeout: Duration) -> Result<()> {
        let started = Instant::now();
        let index = self.index;
        let interval = self.timing.poll_interval;

        // Stage 1: RPC answers
        let outcome = {
            let rpc = self.rpc.clone();
            let process = self.process.as_ref();
            poll_until("rpc", interval, timeout, move || {
                let rpc = rpc.clone();
                async move {
                    check_process(index, process)?;
                    Ok::<_, HarnessError>(match rpc.health().await {
                        Ok(_) => Probe::Ready(()),
                        Err(e) => Probe::Pending(e.to_string()),
                    })
                }
            })
            .await
        };
        self.settle_startup(outcome, "rpc", timeout).await?;

        // Stage 2: identity
        let remaining = timeout.saturating_sub(started.elapsed());
        let outcome = {
            let rpc = self.rpc.clone();
            let process = self.process.as_ref();
            poll_until("node identity", interval, remaining, move || {
                let rpc = rpc.clone();
                async move {
                    check_process(index, process)?;
                    Ok::<_, HarnessError>(match rpc.node_id().await {
                        Ok(id) if !id.is_empty() => Probe::Ready(id),
                        Ok(_) => Probe::Pending("empty node id".to_string()),
                        Err(e) => Probe::Pending(e.to_string()),
                    })
                }
            })
            .await
        };
        let node_id = self.settle_startup(outcome, "node identity", timeout).await?;
        debug!("Node {} identity {}", self.index, node_id);
        self.node_id = Some(node_id);

        // Stage 3: recovery phase
        if !wait_phases.is_empty() {
            self.transition(NodeState::Recovering)?;
            let phase_timeout = self.timing.phase_timeout;
            let outcome = {
                let rpc = self.rpc.clone();
                let process = self.process.as_ref();
                let wanted: Vec<String> = wait_phases.iter().map(|p| p.to_string()).collect();
                poll_until("recovery phase", interval, phase_timeout, move || {
                    let rpc = rpc.clone();
                    let wanted = wanted.clone();
                    async move {
                        check_process(index, process)?;
                        Ok::<_, HarnessError>(match rpc.sync_phase().await {
                            Ok(phase) if wanted.contains(&phase) => Probe::Ready(phase),
                            Ok(phase) => Probe::Pending(format!("phase {}", phase)),
                            Err(e) => Probe::Pending(e.to_string()),
                        })
                    }
                })
                .await
            };
            let phase = self
                .settle_startup(outcome, &format!("phase {:?}", wait_phases), phase_timeout)
                .await?;
            self.phase_watermark = Some(phase);
        }

        self.transition(NodeState::Running)?;
        info!(
            "✅ Node {} running after {:?} (phase {})",
            self.index,
            started.elapsed(),
            self.phase_watermark.as_deref().unwrap_or("-")
        );
        Ok(())
    }

    /// Map a startup poll result to the node state
    async fn settle_startup<T>(
        &mut self,
        outcome: std::result::Result<T, PollError>,
        stage: &str,
        timeout: Duration,
    ) -> Result<T> {
        match outcome {
            Ok(value) => Ok(value),
            Err(PollError::Timeout { last_observed, .. }) => {
                error!(
                    "Node {} did not reach {} within {:?} (last: {})",
                    self.index, stage, timeout, last_observed
                );
                self.kill_and_reap().await;
                self.transition(NodeState::Crashed)?;
                Err(HarnessError::StartupTimeout {
                    node: self.index,
                    stage: stage.to_string(),
                    timeout,
                })
            }
            Err(PollError::Fatal(e)) => {
                error!("Node {} failed during startup ({}): {}", self.index, stage, e);
                self.kill_and_reap().await;
                self.transition(NodeState::Crashed)?;
                Err(e)
            }
        }
    }

    // =========================================================================
    // STOP
    // =========================================================================

    /// Stop the node, gracefully over RPC unless `kill`.
    ///
    /// With `wait`, blocks until exit and compares trimmed stderr against
    /// `expected_stderr` (empty means no errors). Without it the node stays
    /// `Stopping` until `wait_for_exit`.
    pub async fn stop(&mut self, expected_stderr: &str, kill: bool, wait: bool) -> Result<()> {
        match self.refresh_state() {
            NodeState::Stopped => return Ok(()),
            NodeState::Crashed => {
                // Nothing to compare against; just make sure the process is gone
                self.kill_and_reap().await;
                self.transition(NodeState::Stopped)?;
                return Ok(());
            }
            NodeState::Starting | NodeState::Recovering => {
                warn!("⚠️ Node {} stopped before it became ready", self.index);
                self.kill_and_reap().await;
                self.transition(NodeState::Crashed)?;
                self.transition(NodeState::Stopped)?;
                return Ok(());
            }
            NodeState::Stopping => {}
            NodeState::Running => {
                if kill {
                    if let Some(ref mut process) = self.process {
                        process.kill()?;
                    }
                } else if let Err(e) = self.rpc.stop().await {
                    if e.is_transport() {
                        // Node may drop the connection while shutting down
                        debug!("Node {} stop request: {}", self.index, e);
                    } else {
                        warn!("⚠️ Node {} refused stop ({}), killing", self.index, e);
                        if let Some(ref mut process) = self.process {
                            process.kill()?;
                        }
                    }
                }
                self.transition(NodeState::Stopping)?;
                info!("🛑 Node {} stopping", self.index);
            }
        }

        if wait {
            self.wait_for_exit(expected_stderr, self.timing.stop_timeout).await
        } else {
            Ok(())
        }
    }

    /// Wait (bounded) for a stopping node to exit, then check its stderr
    pub async fn wait_for_exit(&mut self, expected_stderr: &str, timeout: Duration) -> Result<()> {
        if self.state() != NodeState::Stopping {
            return Err(HarnessError::NodeNotRunning(self.index));
        }
        let index = self.index;
        let Some(process) = self.process.as_mut() else {
            self.transition(NodeState::Stopped)?;
            return Ok(());
        };

        let Some(status) = process.wait_timeout(timeout).await? else {
            warn!("⚠️ Node {} did not exit within {:?}, killing", index, timeout);
            self.kill_and_reap().await;
            self.transition(NodeState::Stopped)?;
            return Err(HarnessError::ShutdownTimeout { node: index, timeout });
        };

        let stderr = process.read_stderr().unwrap_or_default();
        self.process = None;
        self.session = None;
        self.transition(NodeState::Stopped)?;
        info!("👋 Node {} exited ({})", index, status);

        let actual = stderr.trim();
        let expected = expected_stderr.trim();
        if actual != expected {
            return Err(HarnessError::UnexpectedStderr {
                node: index,
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }

    /// Kill the process if any and wait for it briefly
    async fn kill_and_reap(&mut self) {
        if let Some(mut process) = self.process.take() {
            if let Err(e) = process.kill() {
                warn!("Node {}: kill failed: {}", self.index, e);
            }
            match process.wait_timeout(self.timing.stop_timeout).await {
                Ok(Some(_)) => {}
                Ok(None) => warn!("Node {}: process survived kill", self.index),
                Err(e) => warn!("Node {}: reaping failed: {}", self.index, e),
            }
        }
        self.session = None;
    }

    // =========================================================================
    // HEALTH
    // =========================================================================

    /// Re-derive the state from the process: an unexpected exit marks the node crashed
    pub fn refresh_state(&mut self) -> NodeState {
        if self.state().expects_process() {
            if let Err(HarnessError::ProcessCrash { code, .. }) = check_process(self.index, self.process.as_ref()) {
                error!("Node {} process exited unexpectedly (code {:?})", self.index, code);
                if self.transition(NodeState::Crashed).is_ok() {
                    self.session = None;
                }
            }
        }
        self.state()
    }

    /// Fail unless the node is running with a live process; usable from poll probes
    pub fn ensure_alive(&self) -> Result<()> {
        match self.state() {
            NodeState::Crashed => Err(HarnessError::ProcessCrash {
                node: self.index,
                code: self
                    .process
                    .as_ref()
                    .and_then(|p| p.try_exit().ok().flatten())
                    .and_then(|s| s.code()),
            }),
            NodeState::Stopped | NodeState::Stopping => Err(HarnessError::NodeNotRunning(self.index)),
            _ => check_process(self.index, self.process.as_ref()),
        }
    }

    /// Poll `system_health` for up to `timeout`; an unresponsive node is marked crashed.
    ///
    /// Returns whether the node answered.
    pub async fn check_health(&mut self, timeout: Duration) -> Result<bool> {
        if self.refresh_state() != NodeState::Running {
            return Ok(false);
        }

        let rpc = self.rpc.clone();
        let outcome = poll_until("health", self.timing.poll_interval, timeout, move || {
            let rpc = rpc.clone();
            async move {
                Ok::<_, HarnessError>(match rpc.health().await {
                    Ok(_) => Probe::Ready(()),
                    Err(e) => Probe::Pending(e.to_string()),
                })
            }
        })
        .await;

        match outcome {
            Ok(()) => Ok(true),
            Err(PollError::Timeout { last_observed, .. }) => {
                error!("Node {} unresponsive for {:?}: {}", self.index, timeout, last_observed);
                self.transition(NodeState::Crashed)?;
                self.session = None;
                Ok(false)
            }
            Err(PollError::Fatal(e)) => Err(e),
        }
    }

    // =========================================================================
    // DATA
    // =========================================================================

    /// Wipe the data directory; the process must not be running
    pub fn clean_data(&mut self) -> Result<()> {
        if self.process.is_some() {
            return Err(HarnessError::Assertion(format!(
                "node {} must be stopped before wiping its data",
                self.index
            )));
        }
        let dir = self.options.base_path.clone();
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;
        info!("🧹 Node {} data wiped: {}", self.index, dir.display());
        Ok(())
    }
}

impl std::fmt::Debug for TestNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestNode")
            .field("index", &self.index)
            .field("state", &self.state())
            .field("epoch", &self.epoch())
            .field("pid", &self.pid())
            .field("rpc", &self.rpc)
            .finish()
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        if !self.cleanup_on_exit {
            return;
        }
        if let Some(ref mut process) = self.process {
            if process.is_running() {
                debug!("Node {} dropped, killing pid {:?}", self.index, process.id());
                let _ = process.kill();
            }
        }
    }
}

/// A spawned process that has already exited is a crash
fn check_process(index: usize, process: Option<&ProcessHandle>) -> Result<()> {
    let Some(process) = process else {
        return Err(HarnessError::NodeNotRunning(index));
    };
    match process.try_exit()? {
        Some(status) => Err(HarnessError::ProcessCrash {
            node: index,
            code: status.code(),
        }),
        None => Ok(()),
    }
}

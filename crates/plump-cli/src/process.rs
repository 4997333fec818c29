//! Worker process management.
//!
//! Spawns the current executable in worker mode with the RPC endpoint on its
//! stdin and the broadcast producer on its stdout.

use std::os::fd::OwnedFd;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use anyhow::Context;
use plump_core::{Connection, SerializerKind};

/// Handle to a spawned worker process.
pub struct WorkerProcess {
    child: Child,
    /// Whether the process has been reaped.
    reaped: bool,
}

/// Parent-side endpoints of a spawned worker.
pub struct WorkerEndpoints {
    /// RPC endpoint (the worker's stdin).
    pub rpc: Connection,
    /// Broadcast consumer endpoint (the worker's stdout).
    pub events: Connection,
}

impl WorkerProcess {
    /// Spawn `plump worker` from the current executable.
    pub fn spawn(serializer: SerializerKind, verbose: bool) -> anyhow::Result<(Self, WorkerEndpoints)> {
        let exe = std::env::current_exe().context("Failed to locate current executable")?;

        let (rpc, rpc_child) = Connection::pair()?;
        let (events, events_child) = Connection::pair()?;

        let mut command = Command::new(&exe);
        command.arg("--serializer").arg(serializer.as_str());
        if verbose {
            command.arg("--verbose");
        }
        command
            .arg("worker")
            .stdin(Stdio::from(OwnedFd::from(rpc_child)))
            .stdout(Stdio::from(OwnedFd::from(events_child)))
            .stderr(Stdio::inherit()); // Let worker logs pass through

        let child = command
            .spawn()
            .with_context(|| format!("Failed to spawn worker process '{}'", exe.display()))?;
        // Drop our copies of the child-side ends so the worker's exit is seen
        // as end-of-stream on both channels.
        drop(command);

        tracing::debug!("Spawned worker process {}", child.id());

        Ok((
            Self {
                child,
                reaped: false,
            },
            WorkerEndpoints { rpc, events },
        ))
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Wait for the worker to exit, killing it after `grace`.
    pub fn finish(mut self, grace: Duration) -> anyhow::Result<ExitStatus> {
        let deadline = Instant::now() + grace;

        loop {
            if let Some(status) = self.child.try_wait()? {
                self.reaped = true;
                return Ok(status);
            }
            if Instant::now() >= deadline {
                tracing::warn!("Worker {} did not exit in time, killing it", self.pid());
                self.child.kill()?;
                let status = self.child.wait()?;
                self.reaped = true;
                return Ok(status);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }

        // Ensure the worker does not outlive its handle
        if let Err(e) = self.child.kill() {
            tracing::debug!("Failed to kill worker: {}", e);
        }
        let _ = self.child.wait();
    }
}

//! Bookkeeping of child processes: the foreground stages the shell waits on and
//! the background jobs it reaps between commands.

use std::fmt;
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::command::ExitCode;
use crate::error::ShellError;
use crate::signals::SignalFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRole {
    Stage1,
    Stage2,
    Background,
}

impl JobRole {
    fn slot(self) -> Option<usize> {
        match self {
            JobRole::Stage1 => Some(0),
            JobRole::Stage2 => Some(1),
            JobRole::Background => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub pid: Pid,
    pub role: JobRole,
    /// Set once the process has been reaped; `None` if its status was lost.
    pub exit_status: Option<ExitCode>,
}

impl fmt::Display for JobRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_status {
            Some(code) => write!(f, "[{}] done, status {}", self.pid, code),
            None => write!(f, "[{}] done, status unknown", self.pid),
        }
    }
}

/// Translate a wait result into an exit code; `None` while the process lives.
pub fn exit_code(status: WaitStatus) -> Option<ExitCode> {
    match status {
        WaitStatus::Exited(_, code) => Some(code),
        WaitStatus::Signaled(_, signal, _) => Some(128 + signal as i32),
        _ => None,
    }
}

/// Live foreground stages and background jobs of one shell session.
#[derive(Debug)]
pub struct JobTable {
    foreground: [Option<Pid>; 2],
    background: Vec<JobRecord>,
    increment: usize,
}

impl JobTable {
    /// `increment` is how many background slots are added whenever the set is full.
    pub fn new(increment: usize) -> Self {
        let increment = increment.max(1);
        Self {
            foreground: [None; 2],
            background: Vec::with_capacity(increment),
            increment,
        }
    }

    pub fn set_foreground(&mut self, role: JobRole, pid: Pid) {
        if let Some(slot) = role.slot() {
            self.foreground[slot] = Some(pid);
        }
    }

    /// Recorded foreground pids in stage order.
    pub fn foreground(&self) -> impl Iterator<Item = Pid> + '_ {
        self.foreground.iter().flatten().copied()
    }

    pub fn add_background(&mut self, pid: Pid) {
        if self.background.len() == self.background.capacity() {
            self.background.reserve_exact(self.increment);
        }
        self.background.push(JobRecord {
            pid,
            role: JobRole::Background,
            exit_status: None,
        });
        info!(%pid, "background job started");
    }

    pub fn background_pids(&self) -> Vec<Pid> {
        self.background.iter().map(|job| job.pid).collect()
    }

    pub fn background_capacity(&self) -> usize {
        self.background.capacity()
    }

    /// Collect every background job that has terminated, without blocking.
    pub fn reap_all(&mut self) -> Vec<JobRecord> {
        let mut reaped = Vec::new();
        self.background.retain_mut(|job| {
            match waitpid(job.pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(status) => match exit_code(status) {
                    Some(code) => job.exit_status = Some(code),
                    None => return true,
                },
                Err(Errno::EINTR) => return true,
                Err(e) => warn!(pid = %job.pid, error = %e, "lost background job"),
            }
            info!(pid = %job.pid, status = ?job.exit_status, "background job reaped");
            reaped.push(job.clone());
            false
        });
        reaped
    }

    /// Wait for the recorded foreground stages in stage order.
    ///
    /// An interrupt or terminate request sends SIGTERM to every foreground stage
    /// still running; the wait itself continues until they are gone.
    pub fn wait_foreground(
        &mut self,
        flags: &SignalFlags,
        interval: Duration,
    ) -> Result<Vec<JobRecord>, ShellError> {
        let mut done = Vec::new();
        for (slot, role) in [(0, JobRole::Stage1), (1, JobRole::Stage2)] {
            let Some(pid) = self.foreground[slot] else {
                continue;
            };
            let exit_status = loop {
                match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                    Ok(WaitStatus::StillAlive) => {
                        if flags.take_interrupt() || flags.terminate_requested() {
                            self.terminate_foreground();
                        }
                        thread::sleep(interval);
                    }
                    Ok(status) => {
                        if let Some(code) = exit_code(status) {
                            break Some(code);
                        }
                    }
                    Err(Errno::EINTR) => continue,
                    Err(Errno::ECHILD) => {
                        warn!(%pid, "foreground job already reaped");
                        break None;
                    }
                    Err(e) => return Err(ShellError::Spawn(e)),
                }
            };
            self.foreground[slot] = None;
            debug!(%pid, ?exit_status, "foreground job finished");
            done.push(JobRecord {
                pid,
                role,
                exit_status,
            });
        }
        Ok(done)
    }

    fn terminate_foreground(&self) {
        for pid in self.foreground() {
            // the process may have exited already
            match kill(pid, Signal::SIGTERM) {
                Ok(()) => info!(%pid, "sent SIGTERM to foreground job"),
                Err(e) => debug!(%pid, error = %e, "cannot signal foreground job"),
            }
        }
    }

    /// Terminate all background jobs and reap everything still tracked.
    pub fn kill_all(&mut self) -> Vec<JobRecord> {
        for job in &self.background {
            if let Err(e) = kill(job.pid, Signal::SIGTERM) {
                debug!(pid = %job.pid, error = %e, "cannot signal background job");
            }
        }

        let foreground = [JobRole::Stage1, JobRole::Stage2]
            .into_iter()
            .zip(self.foreground.iter_mut())
            .filter_map(|(role, slot)| slot.take().map(|pid| (pid, role)));
        let background = self.background.drain(..).map(|job| (job.pid, job.role));

        foreground
            .chain(background)
            .map(|(pid, role)| JobRecord {
                pid,
                role,
                exit_status: wait_blocking(pid),
            })
            .collect()
    }
}

fn wait_blocking(pid: Pid) -> Option<ExitCode> {
    loop {
        match waitpid(pid, None) {
            Ok(status) => {
                if let Some(code) = exit_code(status) {
                    return Some(code);
                }
            }
            Err(Errno::EINTR) => continue,
            Err(e) => {
                debug!(%pid, error = %e, "nothing to reap");
                return None;
            }
        }
    }
}

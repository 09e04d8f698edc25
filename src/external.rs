//! Starting the processes of a pipeline.
//!
//! Every stage is a forked child that resets its signal dispositions, wires its
//! standard streams and replaces itself with the requested program. The parent
//! only does bookkeeping and, for foreground pipelines, waits.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::libc;
use nix::sys::signal::Signal;
use nix::unistd::{ForkResult, Pid, execvp, fork, pipe2};
use tracing::{debug, info};

use crate::command::{ExitCode, NOT_EXECUTABLE, NOT_FOUND, Stage};
use crate::config::ShellConfig;
use crate::error::ShellError;
use crate::jobs::{JobRecord, JobRole, JobTable};
use crate::parser::Pipeline;
use crate::signals::SignalManager;

const NULL_DEVICE: &str = "/dev/null";

/// Outcome of [`execute`].
#[derive(Debug, PartialEq, Eq)]
pub enum Launch {
    /// Foreground stages, reaped, in stage order.
    Foreground(Vec<JobRecord>),
    /// Pids now tracked as background jobs.
    Background(Vec<Pid>),
}

impl Launch {
    /// Status of the last foreground stage, if there was one.
    pub fn status(&self) -> Option<ExitCode> {
        match self {
            Launch::Foreground(done) => done.last().and_then(|job| job.exit_status),
            Launch::Background(_) => None,
        }
    }
}

/// How one child's standard streams are set up before `exec`.
struct StreamPlan<'a> {
    pipe_in: Option<RawFd>,
    pipe_out: Option<RawFd>,
    input_file: Option<&'a Path>,
    output_file: Option<&'a Path>,
    /// Background stages get the null device for any stream left unset and
    /// ignore terminal interrupts.
    background: bool,
}

/// Unblocks the masked signal on every exit path.
struct Masked<'a> {
    signals: &'a SignalManager,
    signal: Signal,
}

impl<'a> Masked<'a> {
    fn new(signals: &'a SignalManager, signal: Signal) -> Result<Self, ShellError> {
        signals.block(signal)?;
        Ok(Self { signals, signal })
    }
}

impl Drop for Masked<'_> {
    fn drop(&mut self) {
        let _ = self.signals.unblock(self.signal);
    }
}

/// Run `pipeline`: one process per stage, connected by a pipe when there are two.
///
/// Foreground pipelines are waited for; background ones are registered in
/// `jobs` and left running.
pub fn execute(
    pipeline: &Pipeline,
    jobs: &mut JobTable,
    signals: &SignalManager,
    config: &ShellConfig,
) -> Result<Launch, ShellError> {
    let argv1 = c_argv(&pipeline.stage1)?;
    let argv2 = pipeline.stage2.as_ref().map(c_argv).transpose()?;

    let (read_end, write_end): (Option<OwnedFd>, Option<OwnedFd>) = if argv2.is_some() {
        let (r, w) = pipe2(OFlag::O_CLOEXEC).map_err(ShellError::Spawn)?;
        (Some(r), Some(w))
    } else {
        (None, None)
    };

    let mut pids = Vec::with_capacity(2);
    {
        let _masked = Masked::new(signals, Signal::SIGCHLD)?;

        let first = StreamPlan {
            pipe_in: None,
            pipe_out: write_end.as_ref().map(AsRawFd::as_raw_fd),
            input_file: pipeline.input_file.as_deref(),
            output_file: if argv2.is_some() {
                None
            } else {
                pipeline.output_file.as_deref()
            },
            background: pipeline.background,
        };
        let pid = spawn_stage(&argv1, &first, signals)?;
        record(jobs, pipeline.background, JobRole::Stage1, pid);
        pids.push(pid);

        if let Some(argv2) = &argv2 {
            let second = StreamPlan {
                pipe_in: read_end.as_ref().map(AsRawFd::as_raw_fd),
                pipe_out: None,
                input_file: None,
                output_file: pipeline.output_file.as_deref(),
                background: pipeline.background,
            };
            match spawn_stage(argv2, &second, signals) {
                Ok(pid) => {
                    record(jobs, pipeline.background, JobRole::Stage2, pid);
                    pids.push(pid);
                }
                Err(e) => {
                    // the first stage sees a closed pipe and finishes on its own
                    drop(read_end);
                    drop(write_end);
                    if !pipeline.background {
                        jobs.wait_foreground(signals.flags(), config.poll_interval)?;
                    }
                    return Err(e);
                }
            }
        }
    }

    // both children hold their own copies now
    drop(read_end);
    drop(write_end);

    if pipeline.background {
        return Ok(Launch::Background(pids));
    }
    jobs.wait_foreground(signals.flags(), config.poll_interval)
        .map(Launch::Foreground)
}

fn record(jobs: &mut JobTable, background: bool, role: JobRole, pid: Pid) {
    if background {
        jobs.add_background(pid);
    } else {
        jobs.set_foreground(role, pid);
        info!(%pid, ?role, "foreground job started");
    }
}

fn c_argv(stage: &Stage) -> Result<Vec<CString>, ShellError> {
    // an argument with an interior NUL byte cannot be passed to exec
    stage.to_c_argv().map_err(|_| ShellError::Spawn(Errno::EINVAL))
}

fn spawn_stage(
    argv: &[CString],
    plan: &StreamPlan<'_>,
    signals: &SignalManager,
) -> Result<Pid, ShellError> {
    match unsafe { fork() }.map_err(ShellError::Spawn)? {
        ForkResult::Parent { child } => {
            debug!(pid = %child, program = ?argv[0], "forked");
            Ok(child)
        }
        ForkResult::Child => {
            signals.reset_for_child();
            if plan.background {
                signals.ignore_interrupt();
            }
            if let Err((what, e)) = wire_streams(plan) {
                eprintln!("qshell: {what}: {e}");
                child_exit(1);
            }
            exec(argv)
        }
    }
}

fn exec(argv: &[CString]) -> ! {
    let program = argv[0].to_string_lossy();
    match execvp(&argv[0], argv) {
        Err(Errno::ENOENT) => {
            eprintln!("qshell: {program}: command not found");
            child_exit(NOT_FOUND)
        }
        Err(e) => {
            eprintln!("qshell: {program}: {e}");
            child_exit(NOT_EXECUTABLE)
        }
        Ok(never) => match never {},
    }
}

/// Leave a forked child without running the parent's exit handlers or flushing its buffers.
fn child_exit(code: ExitCode) -> ! {
    unsafe { libc::_exit(code) }
}

/// Point stdin/stdout of the current process where `plan` says.
///
/// On failure returns what could not be set up, for the error message.
fn wire_streams(plan: &StreamPlan<'_>) -> Result<(), (String, io::Error)> {
    let stdin: Option<Stream> = match (plan.input_file, plan.pipe_in) {
        (Some(path), _) => Some(open_read(path)?.into()),
        (None, Some(fd)) => Some(Stream::Pipe(fd)),
        (None, None) if plan.background => Some(open_read(Path::new(NULL_DEVICE))?.into()),
        (None, None) => None,
    };
    let stdout: Option<Stream> = match (plan.output_file, plan.pipe_out) {
        (Some(path), _) => Some(open_write(path)?.into()),
        (None, Some(fd)) => Some(Stream::Pipe(fd)),
        (None, None) if plan.background => Some(open_write(Path::new(NULL_DEVICE))?.into()),
        (None, None) => None,
    };

    for (stream, target, name) in [
        (stdin, libc::STDIN_FILENO, "stdin"),
        (stdout, libc::STDOUT_FILENO, "stdout"),
    ] {
        if let Some(stream) = stream {
            dup_onto(stream.raw(), target).map_err(|e| (name.to_string(), io::Error::from(e)))?;
        }
    }
    Ok(())
}

enum Stream {
    File(File),
    Pipe(RawFd),
}

impl Stream {
    fn raw(&self) -> RawFd {
        match self {
            Stream::File(f) => f.as_raw_fd(),
            Stream::Pipe(fd) => *fd,
        }
    }
}

impl From<File> for Stream {
    fn from(file: File) -> Self {
        Stream::File(file)
    }
}

fn open_read(path: &Path) -> Result<File, (String, io::Error)> {
    File::open(path).map_err(|e| (path.display().to_string(), e))
}

fn open_write(path: &Path) -> Result<File, (String, io::Error)> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)
        .map_err(|e| (path.display().to_string(), e))
}

fn dup_onto(fd: RawFd, target: RawFd) -> nix::Result<()> {
    Errno::result(unsafe { libc::dup2(fd, target) }).map(drop)
}

//! Signal dispositions of the shell process.
//!
//! Handlers never touch interpreter state: each handled signal only raises an
//! atomic flag in [`SignalFlags`], and the main loop acts on the flags at well
//! defined points.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{
    SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal, pthread_sigmask, sigaction,
};
use signal_hook::SigId;
use tracing::{debug, warn};

use crate::error::ShellError;

/// The signal kinds the shell installs handlers for.
pub const HANDLED: [Signal; 4] = [
    Signal::SIGINT,
    Signal::SIGCHLD,
    Signal::SIGTERM,
    Signal::SIGPIPE,
];

/// Interrupt-safe flags written by the signal handlers.
///
/// Clones share the same flags, so a clone can be handed to every component
/// that needs to observe cancellation.
#[derive(Debug, Clone, Default)]
pub struct SignalFlags {
    interrupted: Arc<AtomicBool>,
    terminate: Arc<AtomicBool>,
    child_exited: Arc<AtomicBool>,
    broken_pipe: Arc<AtomicBool>,
}

impl SignalFlags {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag_for(&self, signal: Signal) -> Arc<AtomicBool> {
        match signal {
            Signal::SIGINT => self.interrupted.clone(),
            Signal::SIGTERM => self.terminate.clone(),
            Signal::SIGPIPE => self.broken_pipe.clone(),
            _ => self.child_exited.clone(),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Returns whether an interrupt arrived since the last call, clearing it.
    pub fn take_interrupt(&self) -> bool {
        self.interrupted.swap(false, Ordering::SeqCst)
    }

    /// Same effect as an interrupt signal being delivered.
    pub fn raise_interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn terminate_requested(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }

    /// Same effect as a terminate request being delivered.
    pub fn request_terminate(&self) {
        self.terminate.store(true, Ordering::SeqCst);
    }

    /// True when a blocking step should give up: interrupt or terminate request.
    pub fn cancelled(&self) -> bool {
        self.is_interrupted() || self.terminate_requested()
    }

    pub fn take_child_exited(&self) -> bool {
        self.child_exited.swap(false, Ordering::SeqCst)
    }

    pub fn take_broken_pipe(&self) -> bool {
        self.broken_pipe.swap(false, Ordering::SeqCst)
    }
}

/// Installs the shell's handlers and remembers what was there before.
pub struct SignalManager {
    flags: SignalFlags,
    saved: Vec<(Signal, SigAction)>,
    ids: Vec<SigId>,
}

impl SignalManager {
    pub fn new(flags: SignalFlags) -> Self {
        Self {
            flags,
            saved: Vec::new(),
            ids: Vec::new(),
        }
    }

    pub fn flags(&self) -> &SignalFlags {
        &self.flags
    }

    /// Install handlers for every kind in [`HANDLED`], saving the previous dispositions.
    pub fn setup(&mut self) -> Result<(), ShellError> {
        for signal in HANDLED {
            let previous = current_disposition(signal)?;
            let id = signal_hook::flag::register(signal as i32, self.flags.flag_for(signal))
                .map_err(ShellError::Signal)?;
            self.saved.push((signal, previous));
            self.ids.push(id);
            debug!(?signal, "installed handler");
        }
        Ok(())
    }

    /// Put back the dispositions saved by [`setup`](Self::setup) and unmask the
    /// handled kinds.
    ///
    /// Runs in a freshly forked child right before `exec`, so failures are ignored:
    /// there is nobody left to report them to.
    pub fn reset_for_child(&self) {
        for (signal, action) in &self.saved {
            let _ = unsafe { sigaction(*signal, action) };
        }
        // The Rust runtime ignores SIGPIPE before main; programs we start expect the default.
        let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        let _ = unsafe { sigaction(Signal::SIGPIPE, &default) };
        let _ = pthread_sigmask(SigmaskHow::SIG_UNBLOCK, Some(&handled_set()), None);
    }

    /// Ignore SIGINT in the calling process. The ignored disposition survives `exec`,
    /// so a background job keeps running when ^C reaches the shell's process group.
    pub fn ignore_interrupt(&self) {
        let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        let _ = unsafe { sigaction(Signal::SIGINT, &ignore) };
    }

    /// Mask `signal` for the calling thread until [`unblock`](Self::unblock).
    pub fn block(&self, signal: Signal) -> Result<(), ShellError> {
        pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&single(signal)), None)?;
        Ok(())
    }

    pub fn unblock(&self, signal: Signal) -> Result<(), ShellError> {
        pthread_sigmask(SigmaskHow::SIG_UNBLOCK, Some(&single(signal)), None)?;
        Ok(())
    }

    /// Drop the shell's handlers and reinstate the saved dispositions.
    pub fn restore(&mut self) {
        for id in self.ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
        for (signal, action) in self.saved.drain(..) {
            if let Err(e) = unsafe { sigaction(signal, &action) } {
                warn!(?signal, error = %e, "cannot restore signal disposition");
            }
        }
    }
}

impl Drop for SignalManager {
    fn drop(&mut self) {
        self.restore();
    }
}

fn single(signal: Signal) -> SigSet {
    let mut set = SigSet::empty();
    set.add(signal);
    set
}

fn handled_set() -> SigSet {
    let mut set = SigSet::empty();
    for signal in HANDLED {
        set.add(signal);
    }
    set
}

/// sigaction has no query-only form here: swap in the default and put the old one back.
fn current_disposition(signal: Signal) -> Result<SigAction, ShellError> {
    let probe = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    let previous = unsafe { sigaction(signal, &probe)? };
    unsafe { sigaction(signal, &previous)? };
    Ok(previous)
}

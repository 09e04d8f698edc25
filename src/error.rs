//! Error types shared by the shell components.

use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

/// Errors that stop the interpreter or one of its operations.
///
/// Only the fatal variants escape the read-parse-execute loop; see
/// [`ShellError::is_fatal`].
#[derive(Debug, Error)]
pub enum ShellError {
    /// The command script given on the command line could not be opened.
    #[error("Unable to open commands file '{}': {source}", path.display())]
    OpenScript {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The working directory is gone or unreadable.
    #[error("cannot determine working directory: {0}")]
    CurrentDir(#[source] io::Error),

    /// Polling the input source for readability failed.
    #[error("cannot poll input: {0}")]
    Poll(#[source] Errno),

    /// Reading from the input source failed.
    #[error("cannot read input: {0}")]
    Read(#[source] io::Error),

    /// Installing or masking a signal disposition failed.
    #[error("signal setup failed: {0}")]
    Signal(#[source] io::Error),

    /// A pipe or child process could not be created.
    #[error("cannot start process: {0}")]
    Spawn(#[source] Errno),

    /// Writing to the interpreter's console failed.
    #[error("console write failed: {0}")]
    Console(#[from] io::Error),
}

impl ShellError {
    /// Whether the loop must stop instead of reporting and continuing.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ShellError::Spawn(_))
    }

    /// Process exit code used when this error terminates the shell.
    pub fn exit_code(&self) -> i32 {
        match self {
            ShellError::OpenScript { .. } => 1,
            _ => 2,
        }
    }
}

impl From<Errno> for ShellError {
    fn from(errno: Errno) -> Self {
        ShellError::Signal(io::Error::from(errno))
    }
}

/// Grammar violations found while validating a token list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    #[error("empty command line")]
    Empty,

    #[error("operator '{0}' used more than once")]
    DuplicateOperator(&'static str),

    #[error("operator '{0}' is missing its operand")]
    TrailingOperator(&'static str),

    #[error("operator '{0}' must follow a command")]
    MissingCommand(&'static str),

    #[error("input redirection is not allowed after a pipe")]
    InputAfterPipe,

    #[error("a pipe is not allowed after output redirection")]
    PipeAfterOutput,

    #[error("'&' must be the last token")]
    BackgroundNotLast,

    #[error("redirection to '{0}' takes exactly one file name")]
    ExtraRedirectArgument(String),

    #[error("operator characters must stand alone in '{0}'")]
    MalformedToken(String),
}

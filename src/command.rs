use std::ffi::{CString, NulError};

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// Processes killed by a signal report `128 + signal`, as POSIX shells do.
pub type ExitCode = i32;

/// Exit code of a child whose program could not be found.
pub const NOT_FOUND: ExitCode = 127;

/// Exit code of a child whose program was found but could not be executed.
pub const NOT_EXECUTABLE: ExitCode = 126;

/// One command of a pipeline: the program name followed by its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    argv: Vec<String>,
}

impl Stage {
    /// `argv` must not be empty; the parser never produces an empty stage.
    pub fn new(argv: Vec<String>) -> Self {
        debug_assert!(!argv.is_empty());
        Self { argv }
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// The argument vector in the form `execvp` wants it.
    pub fn to_c_argv(&self) -> Result<Vec<CString>, NulError> {
        self.argv.iter().map(|a| CString::new(a.as_str())).collect()
    }
}

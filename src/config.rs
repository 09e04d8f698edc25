use argh::FromArgs;
use std::path::PathBuf;
use std::time::Duration;

/// One-line usage text printed when too many arguments are given.
pub const USAGE: &str = "Usage: qshell [FILE]";

/// Tunables of a shell session.
///
/// The limits are enforced as explicit checks; buffers themselves grow as needed.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Characters accepted per line before the rest is discarded.
    pub max_line_len: usize,
    /// Tokens accepted per line before the rest is discarded.
    pub max_tokens: usize,
    /// Upper bound on one readiness poll or one foreground wait step.
    pub poll_interval: Duration,
    /// Growth step of the background job set.
    pub job_increment: usize,
    /// Name shown in front of the working directory in interactive prompts.
    pub prompt: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            max_line_len: 128,
            max_tokens: 20,
            poll_interval: Duration::from_millis(10),
            job_increment: 128,
            prompt: "qshell".to_string(),
        }
    }
}

#[derive(FromArgs, Debug)]
/// A small command interpreter with pipes, redirection and background jobs.
pub struct Args {
    #[argh(option, default = "String::from(\"warn\")")]
    /// diagnostic filter used when QSHELL_LOG is unset (e.g. "debug")
    pub log_level: String,

    #[argh(positional)]
    /// command script to run instead of reading the terminal
    pub script: Vec<PathBuf>,
}

/// What the command line asks the program to do.
#[derive(Debug, PartialEq, Eq)]
pub enum Startup {
    Interactive,
    Script(PathBuf),
    Usage,
}

impl Args {
    pub fn startup(&self) -> Startup {
        match self.script.as_slice() {
            [] => Startup::Interactive,
            [path] => Startup::Script(path.clone()),
            _ => Startup::Usage,
        }
    }
}

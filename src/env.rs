use std::collections::HashMap;
use std::env as stdenv;
use std::path::PathBuf;

use crate::command::ExitCode;
use crate::error::ShellError;

/// Mutable, user-level view of the process environment used by the interpreter.
///
/// The environment contains:
/// - `vars`: a snapshot of the environment variables, consulted by built-ins.
/// - `current_dir`: the working directory shown in the prompt.
/// - `should_exit`: set by `exit`; the loop checks it once per iteration.
/// - `last_status`: exit code of the most recent foreground pipeline.
#[derive(Debug, Clone)]
pub struct Environment {
    pub vars: HashMap<String, String>,
    pub current_dir: PathBuf,
    pub should_exit: bool,
    pub last_status: ExitCode,
}

impl Environment {
    /// Capture the current process state.
    ///
    /// Fails when the working directory cannot be determined.
    pub fn new() -> Result<Self, ShellError> {
        let vars = stdenv::vars().collect();
        let current_dir = stdenv::current_dir().map_err(ShellError::CurrentDir)?;
        Ok(Self {
            vars,
            current_dir,
            should_exit: false,
            last_status: 0,
        })
    }

    /// Value of `key`, preferring the session snapshot over the live process environment.
    pub fn get_var(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .cloned()
            .or_else(|| stdenv::var(key).ok())
    }

    /// Re-read the process working directory.
    pub fn refresh_current_dir(&mut self) -> Result<&PathBuf, ShellError> {
        self.current_dir = stdenv::current_dir().map_err(ShellError::CurrentDir)?;
        Ok(&self.current_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty() -> Environment {
        Environment {
            vars: HashMap::new(),
            current_dir: stdenv::current_dir().unwrap(),
            should_exit: false,
            last_status: 0,
        }
    }

    #[test]
    fn test_session_override_shadows_process_env() {
        let mut env = empty();
        assert_eq!(env.get_var("QSHELL_UNSET_VAR_12345"), None);

        env.vars.insert("HOME".into(), "/tmp/qshell-home".into());
        assert_eq!(env.get_var("HOME").as_deref(), Some("/tmp/qshell-home"));
    }

    #[test]
    fn test_new_captures_process_state() {
        let mut env = Environment::new().unwrap();
        assert!(env.get_var("PATH").is_some());
        assert!(!env.should_exit);
        assert_eq!(env.last_status, 0);
        assert!(env.refresh_current_dir().unwrap().is_absolute());
    }
}

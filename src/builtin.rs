use crate::command::ExitCode;
use crate::env::Environment;
use anyhow::{Context, Result, anyhow};
use argh::{EarlyExit, FromArgs};
use std::env;
use std::io::{self, Write};
use std::path::PathBuf;

const END_OF_OPTIONS: &str = "--";

/// Commands the shell interprets itself instead of starting a process.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "cd".
    fn name() -> &'static str;

    /// Executes the command against the shell environment.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(self, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode>;
}

/// Parse `args` for `T` and run it.
///
/// Built-ins take no options: every word after the command name is positional,
/// so `cd -dir` and `cd --help` name directories. Argument errors and execution
/// failures are written to `stderr` and turn into a non-zero status; they never
/// stop the shell.
pub(crate) fn invoke<T: BuiltinCommand>(
    args: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
    env: &mut Environment,
) -> io::Result<ExitCode> {
    let args: Vec<&str> = std::iter::once(END_OF_OPTIONS)
        .chain(args.iter().map(String::as_str))
        .collect();
    match T::from_args(&[T::name()], &args) {
        Ok(cmd) => match cmd.execute(stdout, env) {
            Ok(code) => Ok(code),
            Err(e) => {
                writeln!(stderr, "{e:#}")?;
                Ok(1)
            }
        },
        Err(EarlyExit { output, status }) => {
            if status.is_err() {
                writeln!(stderr, "{}", output.trim_end())?;
                Ok(1)
            } else {
                writeln!(stdout, "{}", output.trim_end())?;
                Ok(0)
            }
        }
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// Without a target, or with `~`, changes to the directory named by HOME.
pub struct Cd {
    #[argh(positional, greedy)]
    /// directory to switch to; only the first one is used.
    pub args: Vec<String>,
}

impl Cd {
    fn target(&self, env: &Environment) -> Result<PathBuf> {
        match self.args.first().map(String::as_str) {
            Some(t) if t != "~" => Ok(PathBuf::from(t)),
            _ => env
                .get_var("HOME")
                .map(PathBuf::from)
                .ok_or_else(|| anyhow!("cd: HOME not set")),
        }
    }
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, _stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        let target = self.target(env)?;
        env::set_current_dir(&target)
            .with_context(|| format!("cd: can't chdir to {}", target.display()))?;
        env.refresh_current_dir()?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Leave the shell after stopping all background jobs.
pub struct Exit {
    #[argh(positional, greedy)]
    /// ignored
    pub _args: Vec<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(self, _stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        env.should_exit = true;
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::env as stdenv;
    use std::fs;
    use std::sync::{Mutex, MutexGuard, OnceLock};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn lock_current_dir() -> MutexGuard<'static, ()> {
        static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
        MUTEX
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn make_unique_temp_dir() -> io::Result<PathBuf> {
        let mut p = stdenv::temp_dir();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        p.push(format!("qshell_test_cd_{}_{}", std::process::id(), nanos));
        fs::create_dir_all(&p)?;
        Ok(p)
    }

    fn test_env(vars: &[(&str, &str)]) -> Environment {
        Environment {
            vars: vars
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            current_dir: stdenv::current_dir().unwrap(),
            should_exit: false,
            last_status: 0,
        }
    }

    fn run_cd(args: &[&str], env: &mut Environment) -> (ExitCode, String) {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let mut out = Vec::new();
        let mut err = Vec::new();
        let code = invoke::<Cd>(&args, &mut out, &mut err, env).unwrap();
        (code, String::from_utf8(err).unwrap())
    }

    #[test]
    fn test_cd_to_absolute_path() {
        let _lock = lock_current_dir();
        let original = stdenv::current_dir().unwrap();
        let tmp = make_unique_temp_dir().unwrap();
        let mut env = test_env(&[]);

        let (code, err) = run_cd(&[tmp.to_str().unwrap()], &mut env);
        let now = stdenv::current_dir().unwrap();
        stdenv::set_current_dir(&original).unwrap();

        assert_eq!(code, 0, "stderr: {err}");
        assert_eq!(fs::canonicalize(&now).unwrap(), fs::canonicalize(&tmp).unwrap());
        assert_eq!(env.current_dir, now);
        let _ = fs::remove_dir_all(tmp);
    }

    #[test]
    fn test_cd_to_home_when_none_or_tilde() {
        let _lock = lock_current_dir();
        let original = stdenv::current_dir().unwrap();
        let home = make_unique_temp_dir().unwrap();
        let mut env = test_env(&[("HOME", home.to_str().unwrap())]);

        for args in [&[][..], &["~"][..]] {
            stdenv::set_current_dir(&original).unwrap();
            let (code, _) = run_cd(args, &mut env);
            let now = stdenv::current_dir().unwrap();
            assert_eq!(code, 0);
            assert_eq!(fs::canonicalize(&now).unwrap(), fs::canonicalize(&home).unwrap());
        }

        stdenv::set_current_dir(&original).unwrap();
        let _ = fs::remove_dir_all(home);
    }

    #[test]
    fn test_cd_nonexistent_path_reports_and_continues() {
        let _lock = lock_current_dir();
        let original = stdenv::current_dir().unwrap();
        let mut env = test_env(&[]);

        let (code, err) = run_cd(&["/definitely/not/here/qshell"], &mut env);

        assert_eq!(code, 1);
        assert!(err.contains("cd: can't chdir to /definitely/not/here/qshell"));
        assert_eq!(stdenv::current_dir().unwrap(), original);
    }

    #[test]
    fn test_cd_takes_dash_words_as_directories() {
        let _lock = lock_current_dir();
        let original = stdenv::current_dir().unwrap();
        let tmp = make_unique_temp_dir().unwrap();
        fs::create_dir(tmp.join("-dash")).unwrap();
        let mut env = test_env(&[]);

        stdenv::set_current_dir(&tmp).unwrap();
        let (help_code, help_err) = run_cd(&["--help"], &mut env);
        let (code, err) = run_cd(&["-dash"], &mut env);
        let now = stdenv::current_dir().unwrap();
        stdenv::set_current_dir(&original).unwrap();

        assert_eq!(help_code, 1);
        assert!(help_err.contains("cd: can't chdir to --help"), "stderr: {help_err}");
        assert_eq!(code, 0, "stderr: {err}");
        assert_eq!(
            fs::canonicalize(&now).unwrap(),
            fs::canonicalize(tmp.join("-dash")).unwrap()
        );
        let _ = fs::remove_dir_all(tmp);
    }

    #[test]
    fn test_exit_requests_shutdown() {
        let mut env = test_env(&[]);
        let mut out = Vec::new();
        let mut err = Vec::new();
        let code = invoke::<Exit>(&["now".to_string()], &mut out, &mut err, &mut env).unwrap();
        assert_eq!(code, 0);
        assert!(env.should_exit);
    }
}

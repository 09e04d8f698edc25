use crate::builtin::{self, Cd, Exit};
use crate::config::ShellConfig;
use crate::env::Environment;
use crate::error::ShellError;
use crate::external::{self, Launch};
use crate::input::{self, InputSource, RawLine};
use crate::jobs::JobTable;
use crate::lexer;
use crate::parser::{self, ParsedLine, Pipeline, USAGE_HINT};
use crate::signals::{SignalFlags, SignalManager};
use std::io::{self, Write};
use tracing::{debug, info, trace, warn};

/// What the loop does after handling one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Prompt,
    Shutdown,
}

/// The shell session: reads lines, runs them and keeps track of the jobs it started.
///
/// All state of a session lives here; signal handlers only ever raise the flags
/// in [`SignalFlags`], which the loop checks once per iteration.
///
/// Example
/// ```no_run
/// use qshell::{InputSource, Interpreter, ShellConfig};
/// let input = InputSource::open("commands.qsh".as_ref()).unwrap();
/// let mut sh = Interpreter::new(ShellConfig::default(), input).unwrap();
/// sh.install_signal_handlers().unwrap();
/// sh.run().unwrap();
/// ```
pub struct Interpreter {
    config: ShellConfig,
    env: Environment,
    input: Option<InputSource>,
    jobs: JobTable,
    signals: SignalManager,
    stdout: Box<dyn Write>,
    stderr: Box<dyn Write>,
}

impl Interpreter {
    /// Create an interpreter printing to the process's standard streams.
    pub fn new(config: ShellConfig, input: InputSource) -> Result<Self, ShellError> {
        Self::with_console(
            config,
            input,
            Box::new(io::stdout()),
            Box::new(io::stderr()),
        )
    }

    /// Create an interpreter printing its messages to the given writers.
    ///
    /// Child processes still inherit the process's standard streams.
    pub fn with_console(
        config: ShellConfig,
        input: InputSource,
        stdout: Box<dyn Write>,
        stderr: Box<dyn Write>,
    ) -> Result<Self, ShellError> {
        Ok(Self {
            jobs: JobTable::new(config.job_increment),
            env: Environment::new()?,
            input: Some(input),
            signals: SignalManager::new(SignalFlags::new()),
            config,
            stdout,
            stderr,
        })
    }

    /// Take over interrupt, child-exit, terminate and broken-pipe delivery.
    pub fn install_signal_handlers(&mut self) -> Result<(), ShellError> {
        self.signals.setup()
    }

    /// Flags the loop observes; raising them has the effect of the matching signal.
    pub fn signal_flags(&self) -> SignalFlags {
        self.signals.flags().clone()
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn jobs(&self) -> &JobTable {
        &self.jobs
    }

    fn is_interactive(&self) -> bool {
        self.input.as_ref().is_some_and(InputSource::is_interactive)
    }

    /// Run until `exit`, end of input or a terminate request.
    ///
    /// Background jobs are terminated and reaped before returning, also when a
    /// fatal error ends the loop early.
    pub fn run(&mut self) -> Result<(), ShellError> {
        let outcome = self.repl();
        let cleanup = self.shutdown();
        outcome.and(cleanup)
    }

    fn repl(&mut self) -> Result<(), ShellError> {
        loop {
            self.reap()?;
            if self.check_signals() == Flow::Shutdown {
                return Ok(());
            }
            self.prompt()?;

            let Some(source) = self.input.as_mut() else {
                return Ok(());
            };
            let line = input::read_line(source, self.signals.flags(), &self.config)?;
            if self.handle_line(line)? == Flow::Shutdown {
                return Ok(());
            }
        }
    }

    fn check_signals(&mut self) -> Flow {
        let flags = self.signals.flags();
        if flags.take_child_exited() {
            trace!("child exit observed");
        }
        if flags.take_broken_pipe() {
            warn!("broken pipe");
        }
        if flags.terminate_requested() {
            info!("terminate requested");
            return Flow::Shutdown;
        }
        if self.env.should_exit {
            return Flow::Shutdown;
        }
        Flow::Prompt
    }

    fn prompt(&mut self) -> Result<(), ShellError> {
        if !self.is_interactive() {
            return Ok(());
        }
        let cwd = self.env.refresh_current_dir()?.display().to_string();
        write!(self.stdout, "{}:{}> ", self.config.prompt, cwd)?;
        self.stdout.flush()?;
        Ok(())
    }

    fn handle_line(&mut self, line: RawLine) -> Result<Flow, ShellError> {
        if line.interrupted {
            self.signals.flags().take_interrupt();
            if self.is_interactive() {
                writeln!(self.stdout)?;
            }
            return Ok(Flow::Prompt);
        }
        if line.is_eof {
            if self.is_interactive() {
                writeln!(self.stdout)?;
            }
            debug!("end of input");
            return Ok(Flow::Shutdown);
        }
        if line.truncated {
            writeln!(
                self.stderr,
                "Warning: command line input too long (>{} characters). Ignoring extra characters",
                self.config.max_line_len
            )?;
        }
        if line.is_blank() {
            return Ok(Flow::Prompt);
        }

        let tokens = lexer::split_into_tokens(&line, self.config.max_tokens);
        if tokens.dropped > 0 {
            writeln!(
                self.stderr,
                "Warning: command line input too long (>{} args). Ignoring extra arguments",
                self.config.max_tokens
            )?;
        }
        if tokens.is_empty() {
            return Ok(Flow::Prompt);
        }
        self.dispatch(tokens.as_slice())
    }

    fn dispatch(&mut self, tokens: &[String]) -> Result<Flow, ShellError> {
        match parser::parse(tokens) {
            Ok(ParsedLine::Exit) => {
                builtin::invoke::<Exit>(
                    &tokens[1..],
                    &mut self.stdout,
                    &mut self.stderr,
                    &mut self.env,
                )?;
                Ok(Flow::Shutdown)
            }
            Ok(ParsedLine::ChangeDir(args)) => {
                self.env.last_status =
                    builtin::invoke::<Cd>(&args, &mut self.stdout, &mut self.stderr, &mut self.env)?;
                Ok(Flow::Prompt)
            }
            Ok(ParsedLine::Pipeline(pipeline)) => {
                self.launch(&pipeline)?;
                Ok(Flow::Prompt)
            }
            Err(e) => {
                debug!(error = %e, "rejected command line");
                writeln!(self.stdout, "{USAGE_HINT}")?;
                Ok(Flow::Prompt)
            }
        }
    }

    fn launch(&mut self, pipeline: &Pipeline) -> Result<(), ShellError> {
        match external::execute(pipeline, &mut self.jobs, &self.signals, &self.config) {
            Ok(Launch::Background(pids)) => {
                for pid in pids {
                    writeln!(self.stdout, "[{pid}]")?;
                }
            }
            Ok(launch) => {
                if let Some(code) = launch.status() {
                    // killed by a signal: keep the next prompt off the ^C line
                    if code > 128 && self.is_interactive() {
                        writeln!(self.stdout)?;
                    }
                    self.env.last_status = code;
                }
            }
            Err(e) if !e.is_fatal() => writeln!(self.stderr, "qshell: {e}")?,
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Report background jobs that finished since the last call.
    fn reap(&mut self) -> Result<(), ShellError> {
        for job in self.jobs.reap_all() {
            writeln!(self.stdout, "{job}")?;
        }
        Ok(())
    }

    /// Terminate background jobs, reap everything and let go of the input.
    fn shutdown(&mut self) -> Result<(), ShellError> {
        for job in self.jobs.kill_all() {
            info!(pid = %job.pid, status = ?job.exit_status, "reaped at shutdown");
        }
        self.input = None;
        self.stdout.flush()?;
        self.stderr.flush()?;
        Ok(())
    }
}

use qshell::config::{Args, Startup, USAGE};
use qshell::{InputSource, Interpreter, ShellConfig, ShellError};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_env("QSHELL_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn run(input: InputSource) -> Result<(), ShellError> {
    let mut sh = Interpreter::new(ShellConfig::default(), input)?;
    sh.install_signal_handlers()?;
    sh.run()
}

fn main() -> ExitCode {
    let args: Args = argh::from_env();
    init_logging(&args.log_level);

    let input = match args.startup() {
        Startup::Usage => {
            println!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        Startup::Interactive => InputSource::terminal(),
        Startup::Script(path) => InputSource::open(&path),
    };

    match input.and_then(run) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

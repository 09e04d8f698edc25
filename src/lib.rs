//! A small line-oriented command interpreter.
//!
//! Lines are read from a terminal or a script file, split into tokens and checked
//! against a restricted grammar: one command or a two-stage pipe, optional `<`
//! and `>` redirection, and `&` for background execution. Commands run as child
//! processes; the shell keeps track of them and stays responsive to interrupts.
//!
//! The main entry point is [`Interpreter`]. The lower-level modules are public
//! so the reading, parsing and job-control steps can be used on their own.

mod builtin;
pub mod command;
pub mod config;
pub mod env;
pub mod error;
pub mod external;
pub mod input;
mod interpreter;
mod io_adapters;
pub mod jobs;
pub mod lexer;
pub mod parser;
pub mod signals;

pub use config::ShellConfig;
pub use error::{ShellError, SyntaxError};
pub use input::InputSource;
/// Just a convenient re-export of the command runner.
///
/// See [`Interpreter`] for the high-level API.
pub use interpreter::Interpreter;
pub use io_adapters::MemWriter;

//! Validation of a token list against the pipeline grammar.
//!
//! ```text
//! line     := "exit" ... | "cd" [dir] ... | pipeline
//! pipeline := stage [< file] [| stage] [> file] [&]
//! ```
//!
//! Each operator appears at most once and must stand alone as a token.

use std::path::PathBuf;

use crate::command::Stage;
use crate::error::SyntaxError;

const PIPE: &str = "|";
const INPUT: &str = "<";
const OUTPUT: &str = ">";
const BACKGROUND: &str = "&";

/// Fixed text shown for any grammar violation.
pub const USAGE_HINT: &str =
    "Syntax error. Usage: CMD [ARGS] [< FILE] [| CMD [ARGS]] [> FILE] [&]";

/// The validated structure of one command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub stage1: Stage,
    pub stage2: Option<Stage>,
    pub input_file: Option<PathBuf>,
    pub output_file: Option<PathBuf>,
    pub background: bool,
}

impl Pipeline {
    /// Stages in creation order.
    pub fn stages(&self) -> impl Iterator<Item = &Stage> {
        std::iter::once(&self.stage1).chain(self.stage2.as_ref())
    }
}

/// What a command line turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    /// `exit`: begin shutdown.
    Exit,
    /// `cd` with its arguments (the first one, if any, is the target).
    ChangeDir(Vec<String>),
    Pipeline(Pipeline),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Pipe,
    Input,
    Output,
    Background,
}

impl Operator {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            PIPE => Some(Operator::Pipe),
            INPUT => Some(Operator::Input),
            OUTPUT => Some(Operator::Output),
            BACKGROUND => Some(Operator::Background),
            _ => None,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Operator::Pipe => PIPE,
            Operator::Input => INPUT,
            Operator::Output => OUTPUT,
            Operator::Background => BACKGROUND,
        }
    }
}

/// Operator positions and redirection targets gathered during the scan.
#[derive(Default)]
struct Scan {
    pipe: Option<usize>,
    input: Option<usize>,
    output: Option<usize>,
    background: Option<usize>,
    input_file: Option<String>,
    output_file: Option<String>,
}

impl Scan {
    fn position(&mut self, op: Operator) -> &mut Option<usize> {
        match op {
            Operator::Pipe => &mut self.pipe,
            Operator::Input => &mut self.input,
            Operator::Output => &mut self.output,
            Operator::Background => &mut self.background,
        }
    }

    /// Position of the first operator after `from`, if any.
    fn next_operator_after(&self, from: usize) -> Option<usize> {
        [self.pipe, self.input, self.output, self.background]
            .into_iter()
            .flatten()
            .filter(|&p| p > from)
            .min()
    }
}

struct Validator<'a> {
    tokens: &'a [String],
    scan: Scan,
    /// Plain tokens since the last operator.
    consecutive: usize,
    /// The redirection waiting for its file name.
    pending: Option<Operator>,
    /// The previous token was a redirection's file name.
    after_target: Option<&'a str>,
}

impl<'a> Validator<'a> {
    fn new(tokens: &'a [String]) -> Self {
        Self {
            tokens,
            scan: Scan::default(),
            consecutive: 0,
            pending: None,
            after_target: None,
        }
    }

    fn run(mut self) -> Result<Pipeline, SyntaxError> {
        let tokens = self.tokens;
        for (pos, token) in tokens.iter().enumerate() {
            match Operator::from_token(token) {
                Some(op) => self.operator(op, pos)?,
                None => self.plain(token)?,
            }
        }
        self.finish()
    }

    fn plain(&mut self, token: &'a str) -> Result<(), SyntaxError> {
        if token.contains(['|', '<', '>', '&']) {
            return Err(SyntaxError::MalformedToken(token.to_string()));
        }
        if let Some(target) = self.after_target {
            return Err(SyntaxError::ExtraRedirectArgument(target.to_string()));
        }
        match self.pending.take() {
            Some(Operator::Input) => {
                self.scan.input_file = Some(token.to_string());
                self.after_target = Some(token);
            }
            Some(_) => {
                self.scan.output_file = Some(token.to_string());
                self.after_target = Some(token);
            }
            None => {}
        }
        self.consecutive += 1;
        Ok(())
    }

    fn operator(&mut self, op: Operator, pos: usize) -> Result<(), SyntaxError> {
        let last = pos + 1 == self.tokens.len();
        if self.scan.position(op).is_some() {
            return Err(SyntaxError::DuplicateOperator(op.symbol()));
        }
        if self.consecutive == 0 {
            return Err(SyntaxError::MissingCommand(op.symbol()));
        }
        match op {
            Operator::Background if !last => return Err(SyntaxError::BackgroundNotLast),
            Operator::Background => {}
            _ if last => return Err(SyntaxError::TrailingOperator(op.symbol())),
            Operator::Input if self.scan.pipe.is_some() => {
                return Err(SyntaxError::InputAfterPipe);
            }
            Operator::Pipe if self.scan.output.is_some() => {
                return Err(SyntaxError::PipeAfterOutput);
            }
            Operator::Input | Operator::Output => self.pending = Some(op),
            Operator::Pipe => {}
        }
        *self.scan.position(op) = Some(pos);
        self.consecutive = 0;
        self.after_target = None;
        Ok(())
    }

    fn finish(self) -> Result<Pipeline, SyntaxError> {
        let Validator { tokens, scan, .. } = self;
        let stage1_end = scan.next_operator_after(0).unwrap_or(tokens.len());
        let stage1 = Stage::new(tokens[..stage1_end].to_vec());

        let stage2 = scan.pipe.map(|pipe| {
            let end = scan.next_operator_after(pipe).unwrap_or(tokens.len());
            Stage::new(tokens[pipe + 1..end].to_vec())
        });

        Ok(Pipeline {
            stage1,
            stage2,
            input_file: scan.input_file.map(PathBuf::from),
            output_file: scan.output_file.map(PathBuf::from),
            background: scan.background.is_some(),
        })
    }
}

/// Interpret a token list: a built-in, or a validated pipeline.
///
/// Pure function of its input; nothing is executed here.
pub fn parse(tokens: &[String]) -> Result<ParsedLine, SyntaxError> {
    match tokens.first().map(String::as_str) {
        None => Err(SyntaxError::Empty),
        Some("exit") => Ok(ParsedLine::Exit),
        Some("cd") => Ok(ParsedLine::ChangeDir(tokens[1..].to_vec())),
        Some(_) => Validator::new(tokens).run().map(ParsedLine::Pipeline),
    }
}

//! Operator confirmation gate.
//!
//! A blocking yes/no question. Only `y`/`yes`/`n`/`no` (any case) are
//! answers; anything else, including an empty line, asks again. There is no
//! default answer. A closed input stream is an error rather than a "no" or
//! a "yes", so a broken pipe cannot authorize or silently skip a step.

use std::io::{self, BufRead, StdinLock, Stdout, Write};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("input closed before an answer was given")]
    Closed,

    #[error("failed to talk to the operator: {0}")]
    Io(#[from] io::Error),
}

/// Something that can ask the operator whether to proceed
pub trait Confirm {
    fn confirm(&mut self, prompt: &str) -> Result<bool, GateError>;
}

/// Interpret one line of operator input
pub fn parse_answer(line: &str) -> Option<bool> {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// Line-oriented gate over any reader/writer pair
pub struct LineGate<R, W> {
    input: R,
    output: W,
}

impl LineGate<StdinLock<'static>, Stdout> {
    /// Gate on the process's stdin/stdout.
    ///
    /// Reads through std's own stdin buffer only. Lines after an answer
    /// belong to interactive child commands.
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> LineGate<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn read_line(&mut self) -> Result<String, GateError> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(GateError::Closed);
        }
        Ok(line)
    }

    /// Ask for a free-form value; an empty answer keeps `default`
    pub fn ask(&mut self, label: &str, default: &str) -> Result<String, GateError> {
        if default.is_empty() {
            write!(self.output, "{}: ", label)?;
        } else {
            write!(self.output, "{} [{}]: ", label, default)?;
        }
        self.output.flush()?;

        let line = self.read_line()?;
        let answer = line.trim();
        Ok(if answer.is_empty() {
            default.to_string()
        } else {
            answer.to_string()
        })
    }

    /// Consume the gate, returning its writer (for inspection in tests)
    pub fn into_output(self) -> W {
        self.output
    }
}

impl<R: BufRead, W: Write> Confirm for LineGate<R, W> {
    fn confirm(&mut self, prompt: &str) -> Result<bool, GateError> {
        loop {
            write!(self.output, "{} [y/n]: ", prompt)?;
            self.output.flush()?;

            let line = self.read_line()?;
            if let Some(answer) = parse_answer(&line) {
                return Ok(answer);
            }
            writeln!(self.output, "Please answer 'y' or 'n'.")?;
        }
    }
}

//! External command execution.
//!
//! Every privileged operation (package manager, service manager, certificate
//! client, SELinux tooling, psql, manage.py) goes through a [`CommandRunner`].
//! The runner executes one command as one logical unit, captures combined
//! output, and treats a non-zero exit status as an error. It never retries.

pub mod system;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

pub use system::SystemRunner;

/// Whether a command may change the system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Read-only inspection; allowed from probes
    Query,

    /// Changes system state; only allowed from step actions
    Mutate,
}

/// How the child's standard streams are wired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Io {
    /// Output captured for diagnostics
    Captured,

    /// Controlling terminal forwarded; used for operator-facing prompts
    Terminal,
}

/// A command to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,

    /// Run under this account (via runuser)
    pub run_as: Option<String>,

    pub effect: Effect,
    pub io: Io,

    /// Values masked whenever the command is displayed or logged
    pub redact: Vec<String>,
}

impl Command {
    /// A mutating, captured command
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            run_as: None,
            effect: Effect::Mutate,
            io: Io::Captured,
            redact: Vec::new(),
        }
    }

    /// A read-only, captured command
    pub fn query(program: impl Into<String>) -> Self {
        Self {
            effect: Effect::Query,
            ..Self::new(program)
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn run_as(mut self, user: impl Into<String>) -> Self {
        self.run_as = Some(user.into());
        self
    }

    /// Forward the terminal instead of capturing output
    pub fn interactive(mut self) -> Self {
        self.io = Io::Terminal;
        self
    }

    /// Mask `secret` in every rendering of this command
    pub fn redact(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.redact.push(secret);
        }
        self
    }

    pub fn is_query(&self) -> bool {
        self.effect == Effect::Query
    }

    /// Shell-like rendering for logs and reports
    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 4);
        if let Some(user) = &self.run_as {
            parts.push(format!("runuser -u {} --", user));
        }
        parts.push(quote(&self.program));
        parts.extend(self.args.iter().map(|a| quote(a)));
        let mut line = parts.join(" ");
        for secret in &self.redact {
            line = line.replace(secret.as_str(), "***");
        }
        line
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

fn quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Result of a successful command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// stdout followed by stderr; empty for terminal commands
    pub output: String,
}

impl CommandOutput {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
        }
    }
}

/// Command execution failures
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with {}", describe_exit(.code))]
    Exit {
        command: String,
        code: Option<i32>,
        output: String,
    },

    #[error("'{command}' changes system state and cannot run from a probe")]
    Refused { command: String },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

impl CommandError {
    /// Captured output, when there is any
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Exit { output, .. } if !output.is_empty() => Some(output),
            _ => None,
        }
    }
}

/// Executes commands against the host
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `cmd` to completion. Non-zero exit is an error.
    async fn run(&self, cmd: &Command) -> Result<CommandOutput, CommandError>;
}

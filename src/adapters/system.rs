//! Command runner backed by real child processes.
//!
//! No timeout is imposed: package upgrades and certificate issuance have no
//! safe partial-abort, so the runner waits for the child to exit.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command as ChildCommand;
use tracing::{debug, warn};

use super::{Command, CommandError, CommandOutput, CommandRunner, Io};

/// Runs commands as child processes of the orchestrator
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }

    fn build(cmd: &Command) -> ChildCommand {
        let mut child = match &cmd.run_as {
            Some(user) => {
                let mut c = ChildCommand::new("runuser");
                c.args(["-u", user, "--"]).arg(&cmd.program);
                c
            }
            None => ChildCommand::new(&cmd.program),
        };
        child.args(&cmd.args);
        for (key, value) in &cmd.env {
            child.env(key, value);
        }
        if let Some(dir) = &cmd.cwd {
            child.current_dir(dir);
        }
        child
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, cmd: &Command) -> Result<CommandOutput, CommandError> {
        let line = cmd.display();
        debug!(command = %line, "Running command");

        let mut child = Self::build(cmd);

        let (code, success, output) = match cmd.io {
            Io::Terminal => {
                let status = child
                    .stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit())
                    .status()
                    .await
                    .map_err(|source| CommandError::Spawn {
                        command: line.clone(),
                        source,
                    })?;
                (status.code(), status.success(), String::new())
            }
            Io::Captured => {
                let out = child
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .output()
                    .await
                    .map_err(|source| CommandError::Spawn {
                        command: line.clone(),
                        source,
                    })?;
                let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&out.stderr));
                (out.status.code(), out.status.success(), combined)
            }
        };

        if !success {
            if !cmd.is_query() {
                warn!(command = %line, ?code, "Command failed");
            }
            return Err(CommandError::Exit {
                command: line,
                code,
                output,
            });
        }

        Ok(CommandOutput { output })
    }
}

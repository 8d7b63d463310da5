//! Running the ALSA and network command line tools
//!
//! `amixer`, `alsactl`, `arecord`, `aplay` and `ping` are all driven
//! through the [`Shell`] trait so the runtimes can be exercised
//! without a sound card.

use crate::error::CommandError;
use async_std::task;
use async_trait::async_trait;
use std::process::{Command, Stdio};
use tracing::trace;

#[async_trait]
pub trait Shell: Send + Sync {
    /// Run `program` to completion and return its stdout
    async fn run(&self, program: &str, args: &[String]) -> Result<String, CommandError>;
}

/// Spawns real processes on a blocking thread
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemShell;

#[async_trait]
impl Shell for SystemShell {
    async fn run(&self, program: &str, args: &[String]) -> Result<String, CommandError> {
        let program = program.to_owned();
        let args = args.to_vec();
        task::spawn_blocking(move || run_blocking(&program, &args)).await
    }
}

fn run_blocking(program: &str, args: &[String]) -> Result<String, CommandError> {
    trace!("exec {} {:?}", program, args);
    let out = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| CommandError::Spawn {
            program: program.to_owned(),
            source,
        })?;

    if !out.status.success() {
        return Err(CommandError::Failed {
            program: program.to_owned(),
            code: out.status.code(),
            stderr: String::from_utf8_lossy(&out.stderr).trim().to_owned(),
        });
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

/// Build an argv from string literals
pub fn argv<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    args.into_iter().map(Into::into).collect()
}

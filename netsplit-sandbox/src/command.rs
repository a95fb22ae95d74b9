//! Utilies for [`std::process::Command`].

use std::{ffi::OsStr, io, process};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("non-zero exit status ({}): {}", .0.status, .0.stderr.trim())]
    NonZero(Output),
}

#[derive(Debug, Clone)]
pub struct Output {
    pub status: process::ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    /// The exit code of the process, or `-1` if it was terminated by a signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    /// Stdout followed by stderr.
    pub fn combined(&self) -> String {
        let mut combined = self.stdout.clone();
        combined.push_str(&self.stderr);
        combined
    }
}

impl From<process::Output> for Output {
    fn from(value: process::Output) -> Self {
        Self {
            status: value.status,
            stdout: String::from_utf8_lossy(&value.stdout).to_string(),
            stderr: String::from_utf8_lossy(&value.stderr).to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct Runner;

impl Runner {
    /// Runs `program` with `args`, capturing its output regardless of the exit status.
    pub fn output<I, S>(program: &str, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = process::Command::new(program);
        cmd.args(args)
            .stdin(process::Stdio::null())
            .stderr(process::Stdio::piped())
            .stdout(process::Stdio::piped());

        tracing::debug!(?cmd, "running command");

        Ok(cmd.spawn()?.wait_with_output()?.into())
    }

    /// Runs `program` with `args`, failing with [`Error::NonZero`] if it doesn't exit
    /// successfully.
    pub fn run<I, S>(program: &str, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = Self::output(program, args)?;

        if !output.status.success() {
            tracing::debug!(?output.stderr, ?output.status, program, "command returned non-zero status");
            return Err(Error::NonZero(output));
        }

        Ok(output)
    }
}

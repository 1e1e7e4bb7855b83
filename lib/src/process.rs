// Copyright 2024 The Pbgen Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Runs one assembled command and captures its output.

use std::io::{BufRead, BufReader, Read};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;

use thiserror::Error;

/// Error spawning or waiting for a child process. A child that runs to
/// completion with a non-zero exit code is not a `RunError`; that
/// classification is the caller's.
#[derive(Debug, Error)]
pub enum RunError {
    /// The command had no program to run.
    #[error("Cannot run an empty command")]
    EmptyCommand,
    /// The program could not be started.
    #[error("Error executing '{program}'. {source}")]
    FailedToExecute {
        /// The program that was to be spawned.
        program: String,
        /// The underlying spawn failure.
        #[source]
        source: std::io::Error,
    },
    /// Waiting for the child to exit failed.
    #[error("Error waiting for child process: {0}")]
    Wait(#[source] std::io::Error),
}

/// The outcome of one command invocation.
#[derive(Debug)]
pub struct CommandOutput {
    /// The child's exit status.
    pub status: ExitStatus,
    /// Everything the child wrote to its standard output.
    pub stdout: String,
    /// Everything the child wrote to its standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the child exited with code 0.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// The child's exit code, or a placeholder when it was terminated by
    /// a signal.
    pub fn exit_code(&self) -> String {
        match self.status.code() {
            Some(code) => code.to_string(),
            None => "<unknown>".to_owned(),
        }
    }
}

/// Runs `argv` to completion, draining stdout and stderr concurrently.
///
/// Each stream gets its own reader thread so that neither stream can fill
/// its OS pipe buffer and stall the child while the other is being read;
/// without this, a child interleaving large output on both streams can
/// deadlock against us. Both readers are joined before the exit status is
/// collected. There is no timeout: a hung child blocks indefinitely.
pub fn run_command(argv: &[String]) -> Result<CommandOutput, RunError> {
    let (program, args) = argv.split_first().ok_or(RunError::EmptyCommand)?;
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    tracing::info!(?cmd, "Invoking command:");
    let mut child = cmd.spawn().map_err(|source| RunError::FailedToExecute {
        program: program.clone(),
        source,
    })?;

    // The handles are always present with Stdio::piped(); fall back to
    // empty output rather than panicking if a platform says otherwise.
    let stdout_reader = child.stdout.take().map(spawn_drain_thread);
    let stderr_reader = child.stderr.take().map(spawn_drain_thread);
    let stdout = join_drain_thread(stdout_reader);
    let stderr = join_drain_thread(stderr_reader);

    let status = child.wait().map_err(RunError::Wait)?;
    tracing::info!(?status, "Command exited:");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
    })
}

fn spawn_drain_thread<R: Read + Send + 'static>(stream: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        for line in BufReader::new(stream).lines() {
            match line {
                Ok(line) => {
                    buf.push_str(&line);
                    buf.push('\n');
                }
                // A read error means the pipe is gone; keep what we have.
                Err(err) => {
                    tracing::debug!(?err, "Error reading child output stream");
                    break;
                }
            }
        }
        buf
    })
}

fn join_drain_thread(handle: Option<thread::JoinHandle<String>>) -> String {
    match handle.map(thread::JoinHandle::join) {
        Some(Ok(buf)) => buf,
        Some(Err(_)) => {
            tracing::debug!("Child output reader thread panicked");
            String::new()
        }
        None => String::new(),
    }
}

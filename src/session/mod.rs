//! Interactive shell sessions.
//!
//! A [`Session`] is one live shell on a device: text goes in with
//! [`Session::write`], output comes back framed by the device prompt. A
//! [`SessionFactory`] opens fresh sessions so a channel can reconnect without
//! changing identity.
//!
//! # Main Components
//!
//! - [`SshSession`] / [`SshSessionFactory`] - password-authenticated SSH shell
//! - [`ReplaySession`] / [`ReplaySessionFactory`] - scripted offline shell
//! - [`SessionRecorder`] - JSONL event log of everything a session did
//! - [`PromptPattern`] - resolved prompt plus its configuration-mode variants

use std::time::Duration;

use async_trait::async_trait;
use log::trace;
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::time::Instant;

use crate::config::ChannelConfig;
use crate::error::CliError;
use crate::timekeeper::Timekeeper;

pub use patterns::PromptPattern;
pub(crate) use recording::now_ms;
pub use recording::{SessionEvent, SessionRecordEntry, SessionRecordLevel, SessionRecorder};
pub use replay::{ReplayScript, ReplaySession, ReplaySessionFactory};
pub use ssh::{SshSession, SshSessionFactory};

/// One interactive shell on a device.
///
/// A session does not serialize callers; the channel worker that owns it
/// guarantees a single in-flight read.
#[async_trait]
pub trait Session: Send {
    /// Sends `text` followed by a line terminator.
    async fn write(&mut self, text: &str) -> Result<(), CliError>;

    /// Reads until `prompt`, or one of its mode variants, reappears at the
    /// start of the last line and returns everything before it.
    async fn read_until_prompt(
        &mut self,
        prompt: &PromptPattern,
        timeout: Duration,
    ) -> Result<String, CliError>;

    /// Reads until the shell has been quiet for `idle`, or `timeout` passed.
    async fn read_idle(&mut self, idle: Duration, timeout: Duration) -> Result<String, CliError>;

    /// Closes the shell. Safe to call more than once.
    async fn close(&mut self) -> Result<(), CliError>;

    fn is_connected(&self) -> bool;
}

/// Opens sessions to one device.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn Session>, CliError>;

    /// Identifies the device in logs.
    fn target(&self) -> String;
}

/// Terminal escape sequences and stray carriage returns.
static TERMINAL_NOISE: Lazy<Regex> =
    Lazy::new(|| match Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]|\r|\u{8}") {
        Ok(re) => re,
        Err(err) => panic!("invalid TERMINAL_NOISE regex: {err}"),
    });

/// Shell output delivered in chunks by an I/O task.
pub(crate) struct ShellStream {
    rx: Receiver<String>,
    buffer: String,
    target: String,
    recorder: Option<SessionRecorder>,
    timekeeper: Timekeeper,
}

impl ShellStream {
    pub(crate) fn new(rx: Receiver<String>, target: String, recorder: Option<SessionRecorder>) -> Self {
        Self {
            rx,
            buffer: String::new(),
            target,
            recorder,
            timekeeper: Timekeeper::new(),
        }
    }

    /// Creates a stream plus the sender feeding it.
    pub(crate) fn channel(
        target: String,
        recorder: Option<SessionRecorder>,
    ) -> (Sender<String>, Self) {
        let (tx, rx) = mpsc::channel::<String>(256);
        (tx, Self::new(rx, target, recorder))
    }

    fn push_chunk(&mut self, chunk: &str) {
        trace!("{} {:?}", self.target, chunk);
        if let Some(recorder) = self.recorder.as_ref() {
            recorder.record_raw_chunk(chunk.to_string());
        }
        self.buffer.push_str(&TERMINAL_NOISE.replace_all(chunk, ""));
    }

    fn take_before_prompt(&mut self, prompt: &PromptPattern) -> Option<String> {
        let offset = prompt.find(&self.buffer)?;
        let output = self.buffer[..offset].to_string();
        if let Some(recorder) = self.recorder.as_ref() {
            recorder.record_event(SessionEvent::Output {
                prompt: self.buffer[offset..].trim_end().to_string(),
                content: output.clone(),
            });
        }
        self.buffer.clear();
        Some(output)
    }

    async fn next_prompt(&mut self, prompt: &PromptPattern) -> Result<String, CliError> {
        loop {
            if let Some(output) = self.take_before_prompt(prompt) {
                return Ok(output);
            }
            match self.rx.recv().await {
                Some(chunk) => self.push_chunk(&chunk),
                None => {
                    return Err(CliError::Io(format!(
                        "{} shell closed while waiting for prompt",
                        self.target
                    )));
                }
            }
        }
    }

    /// Waits up to `timeout` for the prompt. A timeout carries the partial
    /// output received so far.
    pub(crate) async fn read_until_prompt(
        &mut self,
        prompt: &PromptPattern,
        timeout: Duration,
    ) -> Result<String, CliError> {
        let timekeeper = self.timekeeper.clone();
        let during = format!("waiting for prompt {:?}", prompt.prompt());
        let result = timekeeper
            .timeout(timeout, &during, self.next_prompt(prompt))
            .await;
        match result {
            Err(CliError::Timeout { during, after, .. }) => Err(CliError::timeout(
                during,
                after,
                std::mem::take(&mut self.buffer),
            )),
            other => other,
        }
    }

    pub(crate) async fn read_idle(
        &mut self,
        idle: Duration,
        timeout: Duration,
    ) -> Result<String, CliError> {
        let deadline = Instant::now() + timeout;
        loop {
            let quiet_until = (Instant::now() + idle).min(deadline);
            match tokio::time::timeout_at(quiet_until, self.rx.recv()).await {
                Ok(Some(chunk)) => self.push_chunk(&chunk),
                Ok(None) => {
                    return Err(CliError::Io(format!(
                        "{} shell closed while reading",
                        self.target
                    )));
                }
                Err(_) => return Ok(std::mem::take(&mut self.buffer)),
            }
        }
    }

    /// Drops buffered and queued output left over from an earlier command.
    pub(crate) fn discard_pending(&mut self) {
        while self.rx.try_recv().is_ok() {}
        self.buffer.clear();
    }

    pub(crate) fn close(&mut self) {
        self.rx.close();
        self.buffer.clear();
    }
}

mod patterns;
mod recording;
mod replay;
mod ssh;

//! Error types for the CLI transport, datastore, registries and translation.
//!
//! Each layer owns one enum. Errors raised by an inner layer travel upward
//! unchanged; only the device boundary converts them into recorded failures.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

use crate::registry::DeviceType;
use crate::translation::CommitFailure;

/// Errors raised while talking to a device shell.
#[derive(Error, Debug)]
pub enum CliError {
    /// Authentication or network failure while opening a session.
    #[error("connect to {target} failed: {reason}")]
    Connect { target: String, reason: String },

    /// An operation did not complete in time.
    ///
    /// `output` holds whatever partial output was received before the deadline.
    #[error("timed out after {after:?} while {during}")]
    Timeout {
        during: String,
        after: Duration,
        output: String,
    },

    /// The shell stream was closed under us.
    #[error("session i/o error: {0}")]
    Io(String),

    /// No stable prompt could be observed.
    #[error("prompt not resolved after {attempts} attempts, last output {last_output:?}")]
    PromptResolution { attempts: usize, last_output: String },

    /// A command failed on the transport; the resolved prompt is discarded.
    #[error("command '{command}' failed: {source}")]
    CommandExecution {
        command: String,
        #[source]
        source: Box<CliError>,
    },

    /// The channel was destroyed.
    #[error("cli closed")]
    Closed,

    /// An error occurred in the async-ssh2-tokio library.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),

    /// Failed to send data to the shell I/O task.
    #[error("Failed to send data: {0}")]
    SendDataError(#[from] SendError<String>),
}

impl CliError {
    /// True for errors after which the session must be torn down and reopened.
    pub fn is_connection_error(&self) -> bool {
        match self {
            CliError::Connect { .. }
            | CliError::Timeout { .. }
            | CliError::Io(_)
            | CliError::Ssh2Error(_)
            | CliError::RusshError(_)
            | CliError::SendDataError(_) => true,
            CliError::CommandExecution { source, .. } => source.is_connection_error(),
            CliError::PromptResolution { .. } | CliError::Closed => false,
        }
    }

    pub(crate) fn timeout(during: impl Into<String>, after: Duration, output: String) -> Self {
        CliError::Timeout {
            during: during.into(),
            after,
            output,
        }
    }
}

/// Errors raised by datastores and their transactions.
#[derive(Error, Debug)]
pub enum DatastoreError {
    /// Another transaction on the same datastore is still alive.
    #[error("a transaction is already in progress")]
    TransactionInProgress,

    /// The transaction was committed, aborted or failed.
    #[error("transaction is {0}")]
    TransactionClosed(&'static str),

    /// Commit called without any staged change.
    #[error("nothing to commit")]
    EmptyCommit,

    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// The stored value does not decode into the requested type.
    #[error("cannot decode value at {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot encode value: {0}")]
    Encode(#[source] serde_json::Error),

    /// The staged tree does not satisfy the schema.
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// A written value does not have the shape its path requires.
    #[error("value for {path} has unexpected shape: {reason}")]
    ShapeMismatch { path: String, reason: String },
}

/// Errors raised by the plugin and model registries.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("plugin for {0} already registered")]
    DuplicatePlugin(DeviceType),

    /// No exact or wildcard plugin matches the device type.
    #[error("no plugin registered for {0}")]
    NoPlugin(DeviceType),

    #[error("cannot load model {model} from {}: {source}", dir.display())]
    ModelLoad {
        model: String,
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while translating between the datastore and a device.
#[derive(Error, Debug)]
pub enum TranslationError {
    /// A reader failed for the given path.
    #[error("read {path} failed: {source:#}")]
    Read {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    /// A writer failed for the given path.
    #[error("write {path} failed: {source:#}")]
    Write {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    /// The device rejected part of a configuration commit.
    #[error("{0}")]
    Commit(CommitFailure),

    #[error(transparent)]
    Datastore(#[from] DatastoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Cli(#[from] CliError),
}

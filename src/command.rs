//! Commands sent to a device shell.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Whether a command only observes the device or changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Read,
    Write,
}

/// An immutable command.
///
/// The text is copied on construction, so later changes to the caller's
/// string never affect the command. Multi-line text stands for several
/// statements that must run back to back on the same session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Command {
    text: String,
    kind: CommandKind,
}

impl Command {
    pub fn read(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: CommandKind::Read,
        }
    }

    pub fn write(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: CommandKind::Write,
        }
    }

    /// The command text as given.
    pub fn raw(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn is_read(&self) -> bool {
        self.kind == CommandKind::Read
    }

    pub fn is_write(&self) -> bool {
        self.kind == CommandKind::Write
    }

    pub fn is_multi_command(&self) -> bool {
        self.text.contains('\n')
    }

    /// Splits on line breaks into atomic commands of the same kind.
    ///
    /// Blank lines are dropped. Text with no statement at all yields a single
    /// empty command, which just presses enter on the device.
    pub fn split_multi_command(&self) -> Vec<Command> {
        let parts: Vec<Command> = self
            .text
            .split('\n')
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.trim().is_empty())
            .map(|line| Command {
                text: line.to_string(),
                kind: self.kind,
            })
            .collect();

        if parts.is_empty() {
            vec![Command {
                text: String::new(),
                kind: self.kind,
            }]
        } else {
            parts
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

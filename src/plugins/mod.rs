//! Device plugins.
//!
//! A plugin turns the text a device prints into tree nodes and tree changes
//! back into commands. Output is parsed line by line with regexes; every
//! reader fetches its own commands and relies on the channel caches to keep
//! repeated `show` commands off the wire.

use anyhow::{Context, bail};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::datastore::Path;
use crate::device::DeviceAccess;
use crate::registry::{DeviceType, Plugin};
use crate::translation::{
    BindingReader, BindingWriter, ListReader, Reader, ReaderRegistry, WriterRegistry,
};

pub use ubiquiti::{
    AdminStatus, InterfaceConfig, InterfaceState, OperStatus, UbiquitiInterfacePlugin, VlanMode,
};

mod ubiquiti;

/// Parses a registration path known at compile time.
fn schema_path(text: &str) -> Path {
    match Path::parse(text) {
        Ok(path) => path,
        Err(err) => panic!("invalid schema path {text:?}: {err}"),
    }
}

/// First capture group of the first match.
fn capture<'a>(output: &'a str, regex: &Regex) -> Option<&'a str> {
    regex
        .captures(output)
        .and_then(|captures| captures.get(1))
        .map(|group| group.as_str())
}

/// Key value of `segment` in an instance path.
fn path_key<'a>(path: &'a Path, segment: &str, key: &str) -> anyhow::Result<&'a str> {
    path.key(segment, key)
        .with_context(|| format!("{path} has no {segment} key '{key}'"))
}

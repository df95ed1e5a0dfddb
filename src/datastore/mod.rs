//! In-memory structured datastores.
//!
//! A [`Datastore`] holds one JSON-encoded tree (containers are objects, lists
//! are arrays of objects, top-level members are `module:name`). Changes are
//! staged in a [`DatastoreTransaction`] and published atomically on commit.
//!
//! # Main Components
//!
//! - [`Path`] - `/module:node/list[key='value']/...` addressing
//! - [`DatastoreTransaction`] - staged overwrite/merge/delete, diff, commit
//! - [`DatastoreDiff`] / [`DiffResult`] - leaf-level and registered-path diffs
//! - [`BindingAwareDatastore`] - typed access through serde

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DatastoreError;
use crate::registry::SchemaContext;

pub use binding::{BindingAwareDatastore, BindingAwareDatastoreTransaction, BindingCodec};
pub use diff::{DatastoreDiff, DiffKind, DiffPath, DiffResult};
pub use path::{Path, Segment};
pub use transaction::{DatastoreTransaction, TransactionState};

mod binding;
mod diff;
mod path;
mod transaction;
mod tree;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DatastoreType {
    /// Intended configuration.
    Config,
    /// State read back from the device.
    Operational,
}

impl fmt::Display for DatastoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatastoreType::Config => write!(f, "config"),
            DatastoreType::Operational => write!(f, "operational"),
        }
    }
}

struct Shared {
    kind: DatastoreType,
    schema: Arc<SchemaContext>,
    tree: RwLock<Value>,
    transaction_open: AtomicBool,
}

/// A committed tree plus the single-transaction guard. Clones share state.
#[derive(Clone)]
pub struct Datastore {
    shared: Arc<Shared>,
}

impl Datastore {
    pub fn new(kind: DatastoreType, schema: Arc<SchemaContext>) -> Self {
        Self {
            shared: Arc::new(Shared {
                kind,
                schema,
                tree: RwLock::new(Value::Object(Map::new())),
                transaction_open: AtomicBool::new(false),
            }),
        }
    }

    pub fn kind(&self) -> DatastoreType {
        self.shared.kind
    }

    pub fn schema(&self) -> &Arc<SchemaContext> {
        &self.shared.schema
    }

    /// Starts a transaction over the committed tree.
    ///
    /// Fails with [`DatastoreError::TransactionInProgress`] while another
    /// transaction on this datastore is alive.
    pub fn new_tx(&self) -> Result<DatastoreTransaction, DatastoreError> {
        if self
            .shared
            .transaction_open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DatastoreError::TransactionInProgress);
        }
        debug!("{} datastore transaction opened", self.kind());
        Ok(DatastoreTransaction::new(self.clone(), self.snapshot()))
    }

    /// Copy of the committed tree.
    pub fn snapshot(&self) -> Value {
        self.shared
            .tree
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Wrapped committed value at `path`, `{}` when absent.
    pub fn read(&self, path: &Path) -> Value {
        let tree = self
            .shared
            .tree
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        wrap(path, tree::lookup(&tree, path, &self.shared.schema))
    }

    fn publish(&self, tree: Value) {
        *self
            .shared
            .tree
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = tree;
    }

    fn release(&self) {
        self.shared.transaction_open.store(false, Ordering::Release);
    }
}

/// `{"module:name": value}`; list entries become one-element arrays.
fn wrap(path: &Path, value: Option<&Value>) -> Value {
    let Some(value) = value else {
        return Value::Object(Map::new());
    };
    let (Some(name), Some(last)) = (path.qualified_name(), path.last()) else {
        return value.clone();
    };
    let value = if last.is_keyed() {
        Value::Array(vec![value.clone()])
    } else {
        value.clone()
    };
    let mut wrapped = Map::new();
    wrapped.insert(name, value);
    Value::Object(wrapped)
}

/// Inverse of [`wrap`], checking that the member matches the path.
fn unwrap(path: &Path, value: Value) -> Result<Value, DatastoreError> {
    let Some(last) = path.last() else {
        return Ok(value);
    };
    let mismatch = |reason: String| DatastoreError::ShapeMismatch {
        path: path.to_string(),
        reason,
    };
    let Value::Object(object) = value else {
        return Err(mismatch(format!(
            "expected {{\"<module>:{}\": ...}}",
            last.name
        )));
    };
    if object.len() != 1 {
        return Err(mismatch(format!(
            "expected exactly one member, found {}",
            object.len()
        )));
    }
    let Some((member, inner)) = object.into_iter().next() else {
        return Err(mismatch("empty value".to_string()));
    };
    if tree::unqualified(&member) != last.name {
        return Err(mismatch(format!(
            "member '{member}' does not match node '{}'",
            last.name
        )));
    }
    if !last.is_keyed() {
        return Ok(inner);
    }
    match inner {
        Value::Array(mut entries) if entries.len() == 1 => {
            Ok(entries.pop().unwrap_or(Value::Null))
        }
        entry @ Value::Object(_) => Ok(entry),
        _ => Err(mismatch("list entry must be a single object".to_string())),
    }
}

/// Schema violations in `tree`; empty when valid or when the schema is empty.
fn validate_tree(tree: &Value, schema: &SchemaContext) -> Vec<String> {
    let mut problems = Vec::new();
    if schema.is_empty() {
        return problems;
    }
    let Some(object) = tree.as_object() else {
        problems.push("root is not a container".to_string());
        return problems;
    };
    if schema.has_modules() {
        for member in object.keys() {
            match member.split_once(':') {
                None => problems.push(format!("top-level node '{member}' is not module-qualified")),
                Some((module, _)) if !schema.has_module(module) => {
                    problems.push(format!("top-level node '{member}' uses unknown module '{module}'"))
                }
                Some(_) => {}
            }
        }
    }
    check_list_keys(tree, "", schema, &mut problems);
    problems
}

fn check_list_keys(value: &Value, at: &str, schema: &SchemaContext, problems: &mut Vec<String>) {
    let Some(object) = value.as_object() else {
        return;
    };
    for (member, child) in object {
        let here = format!("{at}/{member}");
        match child {
            Value::Array(entries) if tree::is_list(child) => {
                let keys = schema.list_keys(tree::unqualified(member)).unwrap_or_default();
                for (idx, entry) in entries.iter().enumerate() {
                    for key in keys {
                        if entry.get(key).is_none() {
                            problems.push(format!("{here}[{idx}] is missing key '{key}'"));
                        }
                    }
                    check_list_keys(entry, &here, schema, problems);
                }
            }
            Value::Object(_) => check_list_keys(child, &here, schema, problems),
            _ => {}
        }
    }
}

use super::*;

use super::diff::{leaf_diff, registered_diff};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
    /// Commit was rejected; only `abort` is accepted.
    Failed,
}

impl TransactionState {
    fn label(self) -> &'static str {
        match self {
            TransactionState::Active => "active",
            TransactionState::Committed => "committed",
            TransactionState::Aborted => "aborted",
            TransactionState::Failed => "failed",
        }
    }
}

/// Staged changes over a copy of the committed tree.
///
/// At most one transaction per datastore is alive; committing, aborting or
/// dropping it lets the next one start.
pub struct DatastoreTransaction {
    datastore: Datastore,
    before: Value,
    working: Value,
    state: TransactionState,
}

impl DatastoreTransaction {
    pub(super) fn new(datastore: Datastore, before: Value) -> Self {
        Self {
            datastore,
            working: before.clone(),
            before,
            state: TransactionState::Active,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    fn schema(&self) -> &SchemaContext {
        self.datastore.schema()
    }

    fn ensure_active(&self) -> Result<(), DatastoreError> {
        match self.state {
            TransactionState::Active => Ok(()),
            state => Err(DatastoreError::TransactionClosed(state.label())),
        }
    }

    /// The node at `path` wrapped as `{"module:name": value}`, or `{}`.
    pub fn read(&self, path: &Path) -> Result<Value, DatastoreError> {
        Ok(wrap(path, self.node(path)?.as_ref()))
    }

    /// Replaces the node at `path` with a wrapped value.
    pub fn overwrite(&mut self, path: &Path, value: Value) -> Result<(), DatastoreError> {
        self.ensure_active()?;
        let node = unwrap(path, value)?;
        self.set_node(path, node)
    }

    /// Deep-merges a wrapped value into the node at `path`.
    pub fn merge(&mut self, path: &Path, value: Value) -> Result<(), DatastoreError> {
        self.ensure_active()?;
        let node = unwrap(path, value)?;
        self.merge_node(path, node)
    }

    /// Removes the node at `path`; removing a missing node is not an error.
    pub fn delete(&mut self, path: &Path) -> Result<(), DatastoreError> {
        self.ensure_active()?;
        let schema = self.datastore.schema().clone();
        tree::remove(&mut self.working, path, &schema);
        Ok(())
    }

    pub(crate) fn node(&self, path: &Path) -> Result<Option<Value>, DatastoreError> {
        self.ensure_active()?;
        Ok(tree::lookup(&self.working, path, self.schema()).cloned())
    }

    pub(crate) fn set_node(&mut self, path: &Path, node: Value) -> Result<(), DatastoreError> {
        self.ensure_active()?;
        let schema = self.datastore.schema().clone();
        tree::set(&mut self.working, path, node, &schema)
    }

    pub(crate) fn merge_node(&mut self, path: &Path, node: Value) -> Result<(), DatastoreError> {
        self.ensure_active()?;
        let schema = self.datastore.schema().clone();
        tree::merge(&mut self.working, path, node, &schema)
    }

    pub fn has_changes(&self) -> bool {
        self.before != self.working
    }

    /// Every changed leaf since the transaction started.
    pub fn diff(&self) -> Result<Vec<DatastoreDiff>, DatastoreError> {
        self.ensure_active()?;
        Ok(leaf_diff(&self.before, &self.working, self.schema()))
    }

    /// Node changes since the transaction started, grouped by `registered`.
    pub fn diff_registered(&self, registered: &[DiffPath]) -> Result<DiffResult, DatastoreError> {
        self.ensure_active()?;
        Ok(registered_diff(
            &self.before,
            &self.working,
            registered,
            self.schema(),
        ))
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn validate(&self) -> Result<(), DatastoreError> {
        self.ensure_active()?;
        let problems = validate_tree(&self.working, self.schema());
        if problems.is_empty() {
            Ok(())
        } else {
            Err(DatastoreError::Validation(problems))
        }
    }

    /// Validates and publishes the working tree.
    ///
    /// A validation failure leaves the transaction [`TransactionState::Failed`].
    pub fn commit(&mut self) -> Result<(), DatastoreError> {
        self.ensure_active()?;
        if !self.has_changes() {
            return Err(DatastoreError::EmptyCommit);
        }
        if let Err(err) = self.validate() {
            self.state = TransactionState::Failed;
            return Err(err);
        }
        self.datastore.publish(self.working.clone());
        self.state = TransactionState::Committed;
        self.datastore.release();
        debug!("{} datastore transaction committed", self.datastore.kind());
        Ok(())
    }

    /// Discards every staged change. Accepted while active or failed.
    pub fn abort(&mut self) -> Result<(), DatastoreError> {
        match self.state {
            TransactionState::Active | TransactionState::Failed => {
                self.working = self.before.clone();
                self.state = TransactionState::Aborted;
                self.datastore.release();
                debug!("{} datastore transaction aborted", self.datastore.kind());
                Ok(())
            }
            state => Err(DatastoreError::TransactionClosed(state.label())),
        }
    }
}

impl Drop for DatastoreTransaction {
    fn drop(&mut self) {
        if matches!(
            self.state,
            TransactionState::Active | TransactionState::Failed
        ) {
            self.datastore.release();
        }
    }
}

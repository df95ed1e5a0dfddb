use super::*;

use crate::datastore::Datastore;

static NULL: Value = Value::Null;

/// Outcome of a successful [`ConfigCommitter::apply`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitReport {
    /// Keyed paths written to the device, in execution order.
    pub applied: Vec<Path>,
    /// Changed paths no writer is registered for; committed without a write.
    pub unhandled: Vec<Path>,
}

/// A writer failed and the changes applied before it were compensated.
#[derive(Debug, Clone)]
pub struct CommitFailure {
    pub failed_path: Path,
    pub cause: String,
    /// Changes that reached the device before the failure.
    pub applied: Vec<Path>,
    /// Applied changes successfully reverted, in rollback order.
    pub rolled_back: Vec<Path>,
    /// Applied changes whose compensation failed too.
    pub rollback_errors: Vec<(Path, String)>,
}

impl CommitFailure {
    /// True when every applied change was reverted.
    pub fn fully_rolled_back(&self) -> bool {
        self.rollback_errors.is_empty() && self.rolled_back.len() == self.applied.len()
    }
}

impl fmt::Display for CommitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "write {} failed: {}; rolled back {}/{} applied changes",
            self.failed_path,
            self.cause,
            self.rolled_back.len(),
            self.applied.len()
        )?;
        if !self.rollback_errors.is_empty() {
            let failed: Vec<String> = self
                .rollback_errors
                .iter()
                .map(|(path, err)| format!("{path} ({err})"))
                .collect();
            write!(f, "; rollback failed for {}", failed.join(", "))?;
        }
        Ok(())
    }
}

struct Step {
    writer: Arc<dyn Writer>,
    diff: DatastoreDiff,
}

/// Pushes intended configuration to a device through registered writers.
pub struct ConfigCommitter<'a> {
    writers: &'a WriterRegistry,
    device: &'a DeviceAccess,
}

impl<'a> ConfigCommitter<'a> {
    pub fn new(writers: &'a WriterRegistry, device: &'a DeviceAccess) -> Self {
        Self { writers, device }
    }

    /// Stages `intended` as the whole config tree, writes the registered diff
    /// to the device and commits.
    ///
    /// Deletes run deepest first, then creates and updates shallowest first.
    /// When a writer fails, the changes already written are compensated in
    /// reverse order, the transaction is aborted and a
    /// [`TranslationError::Commit`] describes what was and was not reverted.
    pub async fn apply(&self, datastore: &Datastore, intended: Value) -> Result<CommitReport, TranslationError> {
        let mut tx = datastore.new_tx()?;
        tx.overwrite(&Path::root(), intended)?;
        if !tx.has_changes() {
            tx.abort()?;
            return Ok(CommitReport::default());
        }
        if let Err(err) = tx.validate() {
            tx.abort()?;
            return Err(err.into());
        }

        let diff = tx.diff_registered(&self.writers.diff_paths())?;
        for path in &diff.unhandled {
            warn!("[{}] no writer handles change at {}", self.device.id(), path);
        }
        let steps = self.plan(diff.diffs);

        let mut applied: Vec<Step> = Vec::new();
        for step in steps {
            debug!(
                "[{}] {:?} {}",
                self.device.id(),
                step.diff.kind,
                step.diff.keyed_path
            );
            if let Err(cause) = self.run(&step).await {
                let failure = self.compensate(step.diff.keyed_path, cause, &applied).await;
                tx.abort()?;
                return Err(TranslationError::Commit(failure));
            }
            applied.push(step);
        }

        tx.commit()?;
        Ok(CommitReport {
            applied: applied.into_iter().map(|step| step.diff.keyed_path).collect(),
            unhandled: diff.unhandled,
        })
    }

    fn plan(&self, diffs: std::collections::BTreeMap<Path, Vec<DatastoreDiff>>) -> Vec<Step> {
        let mut deletes = Vec::new();
        let mut writes = Vec::new();
        for (registered, diffs) in diffs {
            let Some(writer) = self.writers.writer_for(&registered) else {
                warn!("[{}] writer for {} disappeared", self.device.id(), registered);
                continue;
            };
            for diff in diffs {
                let step = Step {
                    writer: writer.clone(),
                    diff,
                };
                if step.diff.kind == DiffKind::Delete {
                    deletes.push(step);
                } else {
                    writes.push(step);
                }
            }
        }
        deletes.sort_by_key(|step| std::cmp::Reverse(step.diff.keyed_path.depth()));
        writes.sort_by_key(|step| step.diff.keyed_path.depth());
        deletes.extend(writes);
        deletes
    }

    async fn run(&self, step: &Step) -> anyhow::Result<()> {
        let diff = &step.diff;
        let before = diff.before.as_ref().unwrap_or(&NULL);
        let after = diff.after.as_ref().unwrap_or(&NULL);
        match diff.kind {
            DiffKind::Create => step.writer.create(&diff.keyed_path, after, self.device).await,
            DiffKind::Update => {
                step.writer
                    .update(&diff.keyed_path, before, after, self.device)
                    .await
            }
            DiffKind::Delete => step.writer.remove(&diff.keyed_path, before, self.device).await,
        }
    }

    /// Runs the inverse of every applied step, newest first.
    async fn compensate(&self, failed_path: Path, cause: anyhow::Error, applied: &[Step]) -> CommitFailure {
        warn!(
            "[{}] write {} failed, rolling back {} changes: {:#}",
            self.device.id(),
            failed_path,
            applied.len(),
            cause
        );
        let mut rolled_back = Vec::new();
        let mut rollback_errors = Vec::new();
        for step in applied.iter().rev() {
            let diff = &step.diff;
            let before = diff.before.as_ref().unwrap_or(&NULL);
            let after = diff.after.as_ref().unwrap_or(&NULL);
            let result = match diff.kind {
                DiffKind::Create => step.writer.remove(&diff.keyed_path, after, self.device).await,
                DiffKind::Update => {
                    step.writer
                        .update(&diff.keyed_path, after, before, self.device)
                        .await
                }
                DiffKind::Delete => step.writer.create(&diff.keyed_path, before, self.device).await,
            };
            match result {
                Ok(()) => rolled_back.push(diff.keyed_path.clone()),
                Err(err) => {
                    warn!(
                        "[{}] rollback of {} failed: {:#}",
                        self.device.id(),
                        diff.keyed_path,
                        err
                    );
                    rollback_errors.push((diff.keyed_path.clone(), format!("{err:#}")));
                }
            }
        }
        CommitFailure {
            failed_path,
            cause: format!("{cause:#}"),
            applied: applied.iter().map(|step| step.diff.keyed_path.clone()).collect(),
            rolled_back,
            rollback_errors,
        }
    }
}

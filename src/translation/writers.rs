use super::*;

/// Writers keyed by the schema path whose diffs they apply.
#[derive(Default)]
pub struct WriterRegistry {
    writers: Vec<(DiffPath, Arc<dyn Writer>)>,
}

impl WriterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `writer` for `path`. With `asterisk`, changes anywhere below
    /// `path` are delivered as one diff of the `path` node.
    pub fn add(&mut self, path: Path, writer: impl Writer + 'static, asterisk: bool) -> &mut Self {
        self.writers
            .push((DiffPath::new(path.unkeyed(), asterisk), Arc::new(writer)));
        self
    }

    pub fn add_binding<W: BindingWriter + 'static>(
        &mut self,
        path: Path,
        writer: W,
        asterisk: bool,
    ) -> &mut Self {
        self.add(path, Typed::new(writer), asterisk)
    }

    /// The registered paths, for [`crate::datastore::DatastoreTransaction::diff_registered`].
    pub fn diff_paths(&self) -> Vec<DiffPath> {
        self.writers.iter().map(|(path, _)| path.clone()).collect()
    }

    pub fn writer_for(&self, registered: &Path) -> Option<Arc<dyn Writer>> {
        self.writers
            .iter()
            .find(|(path, _)| &path.path == registered)
            .or_else(|| {
                self.writers
                    .iter()
                    .find(|(path, _)| path.path.schema_eq(registered))
            })
            .map(|(_, writer)| writer.clone())
    }

    pub fn len(&self) -> usize {
        self.writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }
}

use super::*;
use std::collections::HashMap;

use futures_util::future::try_join_all;

use crate::datastore::{DatastoreTransaction, Segment};

/// Readers and list readers keyed by schema path.
#[derive(Default)]
pub struct ReaderRegistry {
    readers: Vec<(Path, Arc<dyn Reader>)>,
    lists: Vec<(Path, Arc<dyn ListReader>)>,
}

impl ReaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a reader for every instance of `path`.
    pub fn add(&mut self, path: Path, reader: impl Reader + 'static) -> &mut Self {
        self.readers.push((path.unkeyed(), Arc::new(reader)));
        self
    }

    /// Registers a typed reader for every instance of `path`.
    pub fn add_binding<R: BindingReader + 'static>(&mut self, path: Path, reader: R) -> &mut Self {
        self.add(path, Typed::new(reader))
    }

    /// Registers the reader enumerating the entries of the list at `path`.
    pub fn add_list(&mut self, path: Path, reader: impl ListReader + 'static) -> &mut Self {
        self.lists.push((path.unkeyed(), Arc::new(reader)));
        self
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.lists
            .iter()
            .map(|(path, _)| path)
            .chain(self.readers.iter().map(|(path, _)| path))
    }

    pub fn len(&self) -> usize {
        self.readers.len() + self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads every registered node instance and merges the results into `tx`.
    ///
    /// List readers run first, shallowest first, to expand the keyed
    /// instances; node reads then run concurrently and are merged shallowest
    /// first. Returns the number of node reads.
    pub async fn read_all(
        &self,
        device: &DeviceAccess,
        tx: &mut DatastoreTransaction,
    ) -> Result<usize, TranslationError> {
        let mut expander = Expander {
            lists: &self.lists,
            device,
            entries: Vec::new(),
            expanded: HashMap::new(),
        };

        let mut lists: Vec<&Path> = self.lists.iter().map(|(path, _)| path).collect();
        lists.sort_by_key(|path| path.depth());
        for path in lists {
            expander.instances(path).await?;
        }

        let mut readers: Vec<&(Path, Arc<dyn Reader>)> = self.readers.iter().collect();
        readers.sort_by_key(|(path, _)| path.depth());
        let mut jobs = Vec::new();
        for (path, reader) in readers {
            for instance in expander.instances(path).await? {
                jobs.push((instance, reader.clone()));
            }
        }

        for (instance, keys) in expander.entries {
            tx.merge_node(&instance, keys)?;
        }

        let results = try_join_all(jobs.iter().map(|(instance, reader)| async move {
            reader
                .read(instance, device)
                .await
                .map(|value| (instance, value))
                .map_err(|source| TranslationError::Read {
                    path: instance.to_string(),
                    source,
                })
        }))
        .await?;

        let count = results.len();
        for (instance, value) in results {
            tx.merge_node(instance, value)?;
        }
        debug!("[{}] read {} node instances", device.id(), count);
        Ok(count)
    }
}

/// Turns schema paths into keyed instances by running list readers,
/// remembering every list it has already expanded.
struct Expander<'a> {
    lists: &'a [(Path, Arc<dyn ListReader>)],
    device: &'a DeviceAccess,
    /// Discovered entries with their key objects, in discovery order.
    entries: Vec<(Path, Value)>,
    expanded: HashMap<Path, Vec<Path>>,
}

impl Expander<'_> {
    async fn instances(&mut self, schema_path: &Path) -> Result<Vec<Path>, TranslationError> {
        let segments = schema_path.segments();
        let mut current = vec![Path::root()];
        for depth in 0..segments.len() {
            let prefix = Path::from_segments(segments[..=depth].to_vec());
            let segment = Segment {
                keys: Vec::new(),
                ..segments[depth].clone()
            };
            let list = self
                .lists
                .iter()
                .find(|(path, _)| path.schema_eq(&prefix))
                .map(|(_, reader)| reader.clone());

            let mut next = Vec::new();
            for parent in current {
                match &list {
                    None => next.push(parent.child(segment.clone())),
                    Some(reader) => {
                        next.extend(self.expand(parent, segment.clone(), reader.as_ref()).await?)
                    }
                }
            }
            current = next;
        }
        Ok(current)
    }

    async fn expand(
        &mut self,
        parent: Path,
        segment: Segment,
        reader: &dyn ListReader,
    ) -> Result<Vec<Path>, TranslationError> {
        let list = parent.child(segment.clone());
        if let Some(known) = self.expanded.get(&list) {
            return Ok(known.clone());
        }

        let keys = reader
            .read_keys(&list, self.device)
            .await
            .map_err(|source| TranslationError::Read {
                path: list.to_string(),
                source,
            })?;
        let mut instances = Vec::new();
        for key in keys {
            let Some(object) = key.as_object() else {
                warn!("[{}] ignoring non-object key {} for {}", self.device.id(), key, list);
                continue;
            };
            let mut keyed = segment.clone();
            for (name, value) in object {
                let text = match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                keyed = keyed.with_key(name.clone(), text);
            }
            let instance = parent.child(keyed);
            self.entries.push((instance.clone(), key));
            instances.push(instance);
        }
        self.expanded.insert(list, instances.clone());
        Ok(instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::testing::FakeCli;
    use crate::datastore::{Datastore, DatastoreType};
    use crate::device::DeviceId;
    use crate::registry::SchemaContext;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::runtime::Handle;

    /// Two items; only item `a` has ports.
    struct Items;

    #[async_trait]
    impl ListReader for Items {
        async fn read_keys(&self, _path: &Path, _device: &DeviceAccess) -> anyhow::Result<Vec<Value>> {
            Ok(vec![json!({ "name": "a" }), json!({ "name": "b" })])
        }
    }

    #[derive(Default)]
    struct Ports {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ListReader for Ports {
        async fn read_keys(&self, path: &Path, _device: &DeviceAccess) -> anyhow::Result<Vec<Value>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(match path.key("item", "name") {
                Some("a") => vec![json!({ "id": 1 }), json!({ "id": 2 })],
                _ => Vec::new(),
            })
        }
    }

    struct ItemState;

    #[async_trait]
    impl Reader for ItemState {
        async fn read(&self, path: &Path, device: &DeviceAccess) -> anyhow::Result<Value> {
            let name = path.key("item", "name").unwrap_or_default();
            let uptime = device.read(format!("show uptime {name}")).await?;
            Ok(json!({ "name": name, "uptime": uptime }))
        }
    }

    #[derive(Serialize)]
    struct PortState {
        id: u32,
        up: bool,
    }

    struct PortReader;

    #[async_trait]
    impl BindingReader for PortReader {
        type Output = PortState;

        async fn read(&self, path: &Path, _device: &DeviceAccess) -> anyhow::Result<PortState> {
            let id = path.key("port", "id").unwrap_or_default().parse()?;
            Ok(PortState { id, up: id == 1 })
        }
    }

    fn datastore() -> Datastore {
        let schema = SchemaContext::empty()
            .with_list_keys("item", ["name"])
            .with_list_keys("port", ["id"]);
        Datastore::new(DatastoreType::Operational, Arc::new(schema))
    }

    fn access(cli: FakeCli) -> DeviceAccess {
        DeviceAccess::new(Arc::new(cli), DeviceId::new("dev"), Handle::current())
    }

    fn path(text: &str) -> Path {
        Path::parse(text).expect("path")
    }

    #[tokio::test]
    async fn nested_lists_expand_into_instances() {
        let ports = Arc::new(Ports::default());
        let mut registry = ReaderRegistry::new();
        registry
            .add_list(path("/test:top/item"), Items)
            .add_list(path("/test:top/item/port"), SharedPorts(ports.clone()))
            .add(path("/test:top/item/state"), ItemState)
            .add_binding(path("/test:top/item/port/state"), PortReader);

        let device = access(FakeCli::with(&[
            ("show uptime a", "10"),
            ("show uptime b", "20"),
        ]));
        let datastore = datastore();
        let mut tx = datastore.new_tx().expect("tx");
        let count = registry.read_all(&device, &mut tx).await.expect("read");
        tx.commit().expect("commit");

        assert_eq!(count, 4);
        assert_eq!(ports.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            datastore.snapshot(),
            json!({
                "test:top": {
                    "item": [
                        {
                            "name": "a",
                            "state": { "name": "a", "uptime": "10" },
                            "port": [
                                { "id": 1, "state": { "id": 1, "up": true } },
                                { "id": 2, "state": { "id": 2, "up": false } }
                            ]
                        },
                        { "name": "b", "state": { "name": "b", "uptime": "20" } }
                    ]
                }
            })
        );
    }

    #[tokio::test]
    async fn reader_failure_names_the_instance() {
        let mut registry = ReaderRegistry::new();
        registry
            .add_list(path("/test:top/item"), Items)
            .add(path("/test:top/item/state"), ItemState);

        let device = access(FakeCli::with(&[("show uptime a", "10")]));
        let datastore = datastore();
        let mut tx = datastore.new_tx().expect("tx");
        let err = registry
            .read_all(&device, &mut tx)
            .await
            .expect_err("b has no uptime");

        match err {
            TranslationError::Read { path, .. } => assert!(path.contains("[name='b']"), "{path}"),
            other => panic!("unexpected error {other}"),
        }
    }

    struct SharedPorts(Arc<Ports>);

    #[async_trait]
    impl ListReader for SharedPorts {
        async fn read_keys(&self, path: &Path, device: &DeviceAccess) -> anyhow::Result<Vec<Value>> {
            self.0.read_keys(path, device).await
        }
    }
}

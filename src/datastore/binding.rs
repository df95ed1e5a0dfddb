use super::*;
use serde::de::DeserializeOwned;

/// Converts between typed bindings and tree values through serde.
///
/// `None` fields are dropped on encode so that absent leaves stay absent in
/// the tree and merges leave them untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct BindingCodec;

impl BindingCodec {
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Value, DatastoreError> {
        let mut encoded = serde_json::to_value(value).map_err(DatastoreError::Encode)?;
        strip_nulls(&mut encoded);
        Ok(encoded)
    }

    pub fn decode<T: DeserializeOwned>(&self, path: &Path, value: Value) -> Result<T, DatastoreError> {
        serde_json::from_value(value).map_err(|source| DatastoreError::Decode {
            path: path.to_string(),
            source,
        })
    }
}

fn strip_nulls(value: &mut Value) {
    match value {
        Value::Object(object) => {
            object.retain(|_, member| !member.is_null());
            object.values_mut().for_each(strip_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_nulls),
        _ => {}
    }
}

/// A [`Datastore`] read and written through typed bindings.
#[derive(Clone)]
pub struct BindingAwareDatastore {
    datastore: Datastore,
    codec: BindingCodec,
}

impl BindingAwareDatastore {
    pub fn new(datastore: Datastore, codec: BindingCodec) -> Self {
        Self { datastore, codec }
    }

    pub fn datastore(&self) -> &Datastore {
        &self.datastore
    }

    pub fn codec(&self) -> BindingCodec {
        self.codec
    }

    pub fn new_tx(&self) -> Result<BindingAwareDatastoreTransaction, DatastoreError> {
        Ok(BindingAwareDatastoreTransaction {
            tx: self.datastore.new_tx()?,
            codec: self.codec,
        })
    }

    /// Committed node at `path` decoded as `T`.
    pub fn read<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, DatastoreError> {
        let tree = self.datastore.snapshot();
        tree::lookup(&tree, path, self.datastore.schema())
            .cloned()
            .map(|node| self.codec.decode(path, node))
            .transpose()
    }
}

/// Typed view of a [`DatastoreTransaction`].
pub struct BindingAwareDatastoreTransaction {
    tx: DatastoreTransaction,
    codec: BindingCodec,
}

impl BindingAwareDatastoreTransaction {
    /// Staged node at `path` decoded as `T`; `None` when absent.
    pub fn read<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, DatastoreError> {
        self.tx
            .node(path)?
            .map(|node| self.codec.decode(path, node))
            .transpose()
    }

    pub fn overwrite<T: Serialize>(&mut self, path: &Path, value: &T) -> Result<(), DatastoreError> {
        let node = self.codec.encode(value)?;
        self.tx.set_node(path, node)
    }

    pub fn merge<T: Serialize>(&mut self, path: &Path, value: &T) -> Result<(), DatastoreError> {
        let node = self.codec.encode(value)?;
        self.tx.merge_node(path, node)
    }

    pub fn delete(&mut self, path: &Path) -> Result<(), DatastoreError> {
        self.tx.delete(path)
    }

    pub fn diff(&self) -> Result<Vec<DatastoreDiff>, DatastoreError> {
        self.tx.diff()
    }

    pub fn diff_registered(&self, registered: &[DiffPath]) -> Result<DiffResult, DatastoreError> {
        self.tx.diff_registered(registered)
    }

    pub fn commit(&mut self) -> Result<(), DatastoreError> {
        self.tx.commit()
    }

    pub fn abort(&mut self) -> Result<(), DatastoreError> {
        self.tx.abort()
    }

    pub fn state(&self) -> TransactionState {
        self.tx.state()
    }

    /// The untyped transaction underneath.
    pub fn untyped(&mut self) -> &mut DatastoreTransaction {
        &mut self.tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct InterfaceConfig {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mtu: Option<u32>,
        enabled: Option<bool>,
    }

    const CONFIG: &str = "/openconfig-interfaces:interfaces/interface[name='0/1']/config";

    fn store() -> BindingAwareDatastore {
        let schema = SchemaContext::empty().with_list_keys("interface", ["name"]);
        BindingAwareDatastore::new(
            Datastore::new(DatastoreType::Config, Arc::new(schema)),
            BindingCodec,
        )
    }

    #[test]
    fn typed_overwrite_and_read() {
        let store = store();
        let path = Path::parse(CONFIG).expect("valid");
        let config = InterfaceConfig {
            name: "0/1".to_string(),
            mtu: Some(9000),
            enabled: None,
        };

        let mut tx = store.new_tx().expect("tx");
        tx.overwrite(&path, &config).expect("overwrite");
        assert_eq!(tx.read::<InterfaceConfig>(&path).expect("read"), Some(config.clone()));
        tx.commit().expect("commit");

        assert_eq!(
            store.datastore().snapshot(),
            json!({"openconfig-interfaces:interfaces": {"interface": [
                {"name": "0/1", "config": {"name": "0/1", "mtu": 9000}}
            ]}})
        );
        assert_eq!(store.read::<InterfaceConfig>(&path).expect("read"), Some(config));
    }

    #[test]
    fn typed_merge_leaves_absent_fields() {
        let store = store();
        let path = Path::parse(CONFIG).expect("valid");
        let mut tx = store.new_tx().expect("tx");
        tx.overwrite(
            &path,
            &InterfaceConfig {
                name: "0/1".to_string(),
                mtu: Some(1500),
                enabled: Some(true),
            },
        )
        .expect("overwrite");
        tx.merge(
            &path,
            &InterfaceConfig {
                name: "0/1".to_string(),
                mtu: None,
                enabled: Some(false),
            },
        )
        .expect("merge");

        let merged: InterfaceConfig = tx.read(&path).expect("read").expect("present");
        assert_eq!(merged.mtu, Some(1500));
        assert_eq!(merged.enabled, Some(false));
    }

    #[test]
    fn shape_mismatch_is_a_decode_error() {
        let store = store();
        let path = Path::parse(CONFIG).expect("valid");
        let mut tx = store.new_tx().expect("tx");
        tx.untyped()
            .overwrite(&path, json!({"config": {"name": 42}}))
            .expect("overwrite");
        assert!(matches!(
            tx.read::<InterfaceConfig>(&path),
            Err(DatastoreError::Decode { .. })
        ));
        assert_eq!(tx.read::<InterfaceConfig>(&Path::parse("/m:absent").expect("valid")).expect("read"), None);
    }
}

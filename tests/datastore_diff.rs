use std::path::PathBuf;
use std::thread;

use devgate::datastore::{DatastoreType, DiffKind, DiffPath, Path, TransactionState};
use devgate::error::DatastoreError;
use devgate::registry::{MODEL_REGISTRY, Model};
use serde::{Deserialize, Serialize};
use serde_json::json;

const INTERFACES: &str = "/openconfig-interfaces:interfaces";
const INTERFACE: &str = "/openconfig-interfaces:interfaces/interface";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Interfaces {
    interface: Vec<Interface>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Interface {
    name: String,
    config: Config,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Config {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    mtu: Option<u32>,
    enabled: bool,
}

fn model() -> Model {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/models/openconfig");
    Model::new("openconfig", "2.4.3", dir)
}

fn path(text: &str) -> Path {
    Path::parse(text).expect("valid path")
}

fn interface(name: &str, mtu: Option<u32>) -> Interface {
    Interface {
        name: name.to_string(),
        config: Config {
            name: name.to_string(),
            mtu,
            enabled: true,
        },
    }
}

#[test]
fn typed_writes_diff_against_the_committed_tree() {
    let binding = MODEL_REGISTRY.get_binding_context(&model()).expect("model");
    let store = binding.datastore(DatastoreType::Config);

    let mut tx = store.new_tx().expect("tx");
    tx.overwrite(
        &path(INTERFACES),
        &Interfaces {
            interface: vec![interface("0/1", Some(1500)), interface("0/2", None)],
        },
    )
    .expect("overwrite");
    tx.commit().expect("commit");

    let mut tx = store.new_tx().expect("tx");
    tx.overwrite(
        &path(&format!("{INTERFACE}[name='0/1']")),
        &interface("0/1", Some(9000)),
    )
    .expect("overwrite");
    tx.delete(&path(&format!("{INTERFACE}[name='0/2']")))
        .expect("delete");

    let leaves: Vec<(String, DiffKind)> = tx
        .diff()
        .expect("diff")
        .into_iter()
        .map(|diff| (diff.keyed_path.to_string(), diff.kind))
        .collect();
    assert!(leaves.contains(&(
        format!("{INTERFACE}[name='0/1']/config/mtu"),
        DiffKind::Update
    )));
    assert!(leaves.contains(&(format!("{INTERFACE}[name='0/2']/name"), DiffKind::Delete)));

    let registered = tx
        .diff_registered(&[DiffPath::new(path(INTERFACE), true)])
        .expect("registered diff");
    let grouped: Vec<(String, DiffKind)> = registered
        .all()
        .map(|(_, diff)| (diff.keyed_path.to_string(), diff.kind))
        .collect();
    assert_eq!(
        grouped,
        vec![
            (format!("{INTERFACE}[name='0/1']"), DiffKind::Update),
            (format!("{INTERFACE}[name='0/2']"), DiffKind::Delete),
        ]
    );
    assert!(registered.unhandled.is_empty());

    tx.commit().expect("commit");
    let stored: Option<Interfaces> = store.read(&path(INTERFACES)).expect("read");
    assert_eq!(
        stored,
        Some(Interfaces {
            interface: vec![interface("0/1", Some(9000))],
        })
    );
}

#[test]
fn one_transaction_at_a_time() {
    let binding = MODEL_REGISTRY.get_binding_context(&model()).expect("model");
    let store = binding.datastore(DatastoreType::Operational);

    let mut tx = store.new_tx().expect("first tx");
    let contender = store.clone();
    let blocked = thread::spawn(move || contender.new_tx().map(|_| ()))
        .join()
        .expect("thread");
    assert!(matches!(blocked, Err(DatastoreError::TransactionInProgress)));

    tx.untyped()
        .overwrite(
            &path(INTERFACES),
            json!({ "openconfig-interfaces:interfaces": { "interface": [{ "name": "0/1" }] } }),
        )
        .expect("overwrite");
    tx.commit().expect("commit");
    assert_eq!(tx.state(), TransactionState::Committed);
    assert!(matches!(
        tx.delete(&path(INTERFACES)),
        Err(DatastoreError::TransactionClosed("committed"))
    ));

    let contender = store.clone();
    thread::spawn(move || {
        let mut tx = contender.new_tx().expect("released after commit");
        tx.abort().expect("abort");
    })
    .join()
    .expect("thread");

    // a dropped transaction releases the datastore too
    drop(store.new_tx().expect("tx"));
    store.new_tx().expect("released after drop");
}

#[test]
fn unkeyed_list_entries_fail_validation() {
    let binding = MODEL_REGISTRY.get_binding_context(&model()).expect("model");
    let store = binding.datastore(DatastoreType::Config);

    let mut tx = store.new_tx().expect("tx");
    tx.untyped()
        .overwrite(
            &path(INTERFACES),
            json!({ "openconfig-interfaces:interfaces": { "interface": [{ "config": { "mtu": 1500 } }] } }),
        )
        .expect("overwrite");

    let err = tx.commit().expect_err("entry without its key");
    assert!(matches!(err, DatastoreError::Validation(_)));
    assert_eq!(tx.state(), TransactionState::Failed);
    tx.abort().expect("abort");
    assert_eq!(store.datastore().snapshot(), json!({}));
}

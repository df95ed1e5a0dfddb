use super::*;
use std::collections::{BTreeMap, BTreeSet};

use super::tree::{entry_keys, is_leaf, is_list, lookup};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    Create,
    Update,
    Delete,
}

/// One change between the state a transaction started from and its working
/// tree. `before` and `after` hold the node's own value.
#[derive(Debug, Clone, PartialEq)]
pub struct DatastoreDiff {
    pub keyed_path: Path,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub kind: DiffKind,
}

impl DatastoreDiff {
    fn new(keyed_path: Path, before: Option<Value>, after: Option<Value>) -> Self {
        let kind = match (&before, &after) {
            (None, _) => DiffKind::Create,
            (_, None) => DiffKind::Delete,
            _ => DiffKind::Update,
        };
        Self {
            keyed_path,
            before,
            after,
            kind,
        }
    }
}

/// A schema path somebody handles diffs for.
///
/// With `asterisk` set, changes anywhere below the path are reported as one
/// diff of the registered node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffPath {
    pub path: Path,
    pub asterisk: bool,
}

impl DiffPath {
    pub fn new(path: Path, asterisk: bool) -> Self {
        Self { path, asterisk }
    }
}

/// Node changes grouped by the registered path that handles them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffResult {
    pub diffs: BTreeMap<Path, Vec<DatastoreDiff>>,
    /// Keyed paths of changes no registered path covers.
    pub unhandled: Vec<Path>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.diffs.is_empty() && self.unhandled.is_empty()
    }

    /// All handled diffs, flattened.
    pub fn all(&self) -> impl Iterator<Item = (&Path, &DatastoreDiff)> {
        self.diffs
            .iter()
            .flat_map(|(registered, diffs)| diffs.iter().map(move |diff| (registered, diff)))
    }
}

/// A container or list entry that was created, deleted or had a direct leaf
/// changed.
#[derive(Debug, Clone)]
struct NodeChange {
    diff: DatastoreDiff,
    depth: usize,
}

/// Walks two trees side by side.
struct Walker<'a> {
    schema: &'a SchemaContext,
    leaves: Vec<DatastoreDiff>,
    nodes: Vec<NodeChange>,
}

impl<'a> Walker<'a> {
    fn new(schema: &'a SchemaContext) -> Self {
        Self {
            schema,
            leaves: Vec::new(),
            nodes: Vec::new(),
        }
    }

    fn walk(mut self, before: &Value, after: &Value) -> Self {
        self.members(&Path::root(), before.as_object(), after.as_object());
        self
    }

    fn node(&mut self, path: Path, before: Option<&Value>, after: Option<&Value>) {
        let before_object = before.and_then(Value::as_object);
        let after_object = after.and_then(Value::as_object);
        let changed = match (before_object, after_object) {
            (Some(b), Some(a)) => direct_leaves_differ(b, a),
            (None, None) => false,
            _ => true,
        };
        if changed {
            self.nodes.push(NodeChange {
                depth: path.depth(),
                diff: DatastoreDiff::new(path.clone(), before.cloned(), after.cloned()),
            });
        }
        self.members(&path, before_object, after_object);
    }

    fn members(
        &mut self,
        path: &Path,
        before: Option<&Map<String, Value>>,
        after: Option<&Map<String, Value>>,
    ) {
        let names: BTreeSet<&String> = before
            .into_iter()
            .chain(after)
            .flat_map(|object| object.keys())
            .collect();
        for name in names {
            let b = before.and_then(|object| object.get(name));
            let a = after.and_then(|object| object.get(name));
            let segment = if path.is_root() {
                Segment::from_member(name)
            } else {
                Segment::new(tree::unqualified(name))
            };

            let present: Vec<&Value> = b.into_iter().chain(a).collect();
            if present.iter().all(|value| is_list(value)) {
                self.list(path, segment, b, a);
            } else if present.iter().all(|value| value.is_object()) {
                self.node(path.child(segment), b, a);
            } else if b != a {
                self.leaves
                    .push(DatastoreDiff::new(path.child(segment), b.cloned(), a.cloned()));
            }
        }
    }

    fn list(&mut self, path: &Path, segment: Segment, before: Option<&Value>, after: Option<&Value>) {
        let before = self.keyed_entries(&segment, before);
        let after = self.keyed_entries(&segment, after);
        let mut seen = BTreeSet::new();
        for (keyed, _) in before.iter().chain(after.iter()) {
            if !seen.insert(keyed.clone()) {
                continue;
            }
            let b = before.iter().find(|(k, _)| k == keyed).map(|(_, v)| *v);
            let a = after.iter().find(|(k, _)| k == keyed).map(|(_, v)| *v);
            self.node(path.child(keyed.clone()), b, a);
        }
    }

    fn keyed_entries<'v>(&self, segment: &Segment, list: Option<&'v Value>) -> Vec<(Segment, &'v Value)> {
        let Some(Value::Array(entries)) = list else {
            return Vec::new();
        };
        entries
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| {
                let object = entry.as_object()?;
                let keys = entry_keys(self.schema, &segment.name, object);
                let mut keyed = Segment::new(segment.name.clone());
                if keys.is_empty() {
                    keyed.keys.push((None, idx.to_string()));
                }
                for (key, value) in keys {
                    keyed = keyed.with_key(key, value);
                }
                Some((keyed, entry))
            })
            .collect()
    }
}

fn direct_leaves_differ(before: &Map<String, Value>, after: &Map<String, Value>) -> bool {
    before
        .iter()
        .chain(after)
        .filter(|(_, value)| is_leaf(value))
        .any(|(name, _)| before.get(name) != after.get(name))
}

/// Every changed leaf between `before` and `after`.
pub(crate) fn leaf_diff(before: &Value, after: &Value, schema: &SchemaContext) -> Vec<DatastoreDiff> {
    Walker::new(schema).walk(before, after).leaves
}

/// Node changes matched against `registered` schema paths.
///
/// An exact match wins. Otherwise the nearest registered ancestor with the
/// asterisk flag takes the change, reported once per ancestor instance with
/// the kind of the shallowest change below it.
pub(crate) fn registered_diff(
    before: &Value,
    after: &Value,
    registered: &[DiffPath],
    schema: &SchemaContext,
) -> DiffResult {
    let nodes = Walker::new(schema).walk(before, after).nodes;
    let mut result = DiffResult::default();
    // (registered path, ancestor instance) -> (depth, kind) of the shallowest change
    let mut grouped: BTreeMap<(Path, Path), (usize, DiffKind)> = BTreeMap::new();

    for change in nodes {
        let keyed = &change.diff.keyed_path;
        let exact = registered
            .iter()
            .find(|candidate| keyed.schema_eq(&candidate.path));
        match exact {
            Some(candidate) if !candidate.asterisk => {
                result
                    .diffs
                    .entry(candidate.path.clone())
                    .or_default()
                    .push(change.diff);
                continue;
            }
            Some(candidate) => {
                group(&mut grouped, candidate, keyed.clone(), &change);
                continue;
            }
            None => {}
        }

        let ancestor = std::iter::successors(keyed.parent(), Path::parent).find_map(|instance| {
            registered
                .iter()
                .find(|candidate| candidate.asterisk && instance.schema_eq(&candidate.path))
                .map(|candidate| (candidate, instance))
        });
        match ancestor {
            Some((candidate, instance)) => group(&mut grouped, candidate, instance, &change),
            None => result.unhandled.push(change.diff.keyed_path),
        }
    }

    for ((registered, instance), (_, kind)) in grouped {
        result.diffs.entry(registered).or_default().push(DatastoreDiff {
            before: lookup(before, &instance, schema).cloned(),
            after: lookup(after, &instance, schema).cloned(),
            keyed_path: instance,
            kind,
        });
    }
    result
}

fn group(
    grouped: &mut BTreeMap<(Path, Path), (usize, DiffKind)>,
    candidate: &DiffPath,
    instance: Path,
    change: &NodeChange,
) {
    grouped
        .entry((candidate.path.clone(), instance))
        .and_modify(|(depth, kind)| {
            if change.depth < *depth {
                *depth = change.depth;
                *kind = change.diff.kind;
            }
        })
        .or_insert((change.depth, change.diff.kind));
}

//! Navigation and mutation of JSON-encoded trees.
//!
//! Containers are objects, lists are arrays of objects. Top-level members are
//! module-qualified (`module:name`); nested members may be qualified or not.

use super::*;

/// Leaves used to identify list entries when the schema has no key table.
pub(crate) const FALLBACK_KEYS: &[&str] = &["name", "index", "id"];

pub(crate) fn unqualified(member: &str) -> &str {
    member.rsplit_once(':').map_or(member, |(_, name)| name)
}

/// Text form of a scalar, used for key comparison.
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// An array of objects. Empty arrays and arrays of scalars are leaf-lists.
pub(crate) fn is_list(value: &Value) -> bool {
    matches!(value, Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object))
}

pub(crate) fn is_leaf(value: &Value) -> bool {
    !value.is_object() && !is_list(value)
}

/// The member of `object` that `segment` refers to.
pub(crate) fn member_name(object: &Map<String, Value>, segment: &Segment) -> Option<String> {
    if let Some(prefix) = &segment.prefix {
        let qualified = format!("{prefix}:{}", segment.name);
        if object.contains_key(&qualified) {
            return Some(qualified);
        }
    }
    if object.contains_key(&segment.name) {
        return Some(segment.name.clone());
    }
    object
        .keys()
        .find(|member| unqualified(member) == segment.name)
        .cloned()
}

/// Name for a member that does not exist yet: qualified at the top level,
/// plain below it.
fn new_member_name(segment: &Segment, depth: usize) -> String {
    match (&segment.prefix, depth) {
        (Some(prefix), 0) => format!("{prefix}:{}", segment.name),
        _ => segment.name.clone(),
    }
}

/// Keys of `segment` with anonymous ones named through the schema.
pub(crate) fn resolve_keys(schema: &SchemaContext, segment: &Segment) -> Vec<(Option<String>, String)> {
    let schema_keys = schema.list_keys(&segment.name);
    segment
        .keys
        .iter()
        .enumerate()
        .map(|(idx, (key, value))| {
            let key = key
                .clone()
                .or_else(|| schema_keys.and_then(|keys| keys.get(idx)).cloned());
            (key, value.clone())
        })
        .collect()
}

pub(crate) fn entry_matches(entry: &Value, keys: &[(Option<String>, String)]) -> bool {
    let Some(object) = entry.as_object() else {
        return false;
    };
    keys.iter().all(|(key, expected)| match key {
        Some(key) => object.get(key).and_then(scalar_text).as_deref() == Some(expected),
        None => {
            FALLBACK_KEYS
                .iter()
                .filter_map(|key| object.get(*key))
                .chain(object.values())
                .filter_map(scalar_text)
                .any(|text| &text == expected)
        }
    })
}

/// Key leaves identifying `entry` in the list `list_name`.
pub(crate) fn entry_keys(
    schema: &SchemaContext,
    list_name: &str,
    entry: &Map<String, Value>,
) -> Vec<(String, String)> {
    if let Some(keys) = schema.list_keys(list_name) {
        return keys
            .iter()
            .filter_map(|key| Some((key.clone(), scalar_text(entry.get(key)?)?)))
            .collect();
    }
    if let Some(found) = FALLBACK_KEYS
        .iter()
        .find_map(|key| Some((key.to_string(), scalar_text(entry.get(*key)?)?)))
    {
        return vec![found];
    }
    entry
        .iter()
        .find_map(|(key, value)| Some((key.clone(), scalar_text(value)?)))
        .into_iter()
        .collect()
}

fn same_entry(entry: &Value, keys: &[(String, String)]) -> bool {
    !keys.is_empty()
        && entry.as_object().is_some_and(|object| {
            keys.iter()
                .all(|(key, value)| object.get(key).and_then(scalar_text).as_deref() == Some(value))
        })
}

fn shape(path: &Path, reason: impl Into<String>) -> DatastoreError {
    DatastoreError::ShapeMismatch {
        path: path.to_string(),
        reason: reason.into(),
    }
}

fn object_mut<'a>(
    value: &'a mut Value,
    path: &Path,
) -> Result<&'a mut Map<String, Value>, DatastoreError> {
    if value.is_null() {
        *value = Value::Object(Map::new());
    }
    value
        .as_object_mut()
        .ok_or_else(|| shape(path, "expected a container"))
}

/// Fresh list entry carrying the keys of a path segment.
fn key_entry(keys: &[(Option<String>, String)]) -> Value {
    let mut entry = Map::new();
    for (key, value) in keys {
        let key = key.clone().unwrap_or_else(|| FALLBACK_KEYS[0].to_string());
        entry.insert(key, Value::String(value.clone()));
    }
    Value::Object(entry)
}

/// Makes sure `entry` carries the keys named by the path.
fn apply_keys(
    entry: &mut Value,
    keys: &[(Option<String>, String)],
    path: &Path,
) -> Result<(), DatastoreError> {
    let object = entry
        .as_object_mut()
        .ok_or_else(|| shape(path, "list entry must be an object"))?;
    for (key, value) in keys {
        let key = key.clone().unwrap_or_else(|| FALLBACK_KEYS[0].to_string());
        match object.get(&key).map(scalar_text) {
            None => {
                object.insert(key, Value::String(value.clone()));
            }
            Some(Some(existing)) if &existing == value => {}
            Some(_) => {
                return Err(shape(path, format!("key '{key}' does not match '{value}'")));
            }
        }
    }
    Ok(())
}

pub(crate) fn lookup<'a>(root: &'a Value, path: &Path, schema: &SchemaContext) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.segments() {
        let object = current.as_object()?;
        let member = object.get(&member_name(object, segment)?)?;
        current = if segment.is_keyed() {
            let keys = resolve_keys(schema, segment);
            member
                .as_array()?
                .iter()
                .find(|entry| entry_matches(entry, &keys))?
        } else {
            member
        };
    }
    Some(current)
}

pub(crate) fn lookup_mut<'a>(
    root: &'a mut Value,
    path: &Path,
    schema: &SchemaContext,
) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in path.segments() {
        let object = current.as_object_mut()?;
        let name = member_name(object, segment)?;
        let member = object.get_mut(&name)?;
        current = if segment.is_keyed() {
            let keys = resolve_keys(schema, segment);
            member
                .as_array_mut()?
                .iter_mut()
                .find(|entry| entry_matches(entry, &keys))?
        } else {
            member
        };
    }
    Some(current)
}

/// Walks to the container holding the last segment, creating containers and
/// list entries on the way.
fn ensure_parent<'a>(
    root: &'a mut Value,
    path: &Path,
    schema: &SchemaContext,
) -> Result<&'a mut Map<String, Value>, DatastoreError> {
    let segments = path.segments();
    let mut current = root;
    for (depth, segment) in segments[..segments.len().saturating_sub(1)].iter().enumerate() {
        let object = object_mut(current, path)?;
        let name = member_name(object, segment).unwrap_or_else(|| new_member_name(segment, depth));
        let member = object.entry(name).or_insert(Value::Null);
        current = if segment.is_keyed() {
            let keys = resolve_keys(schema, segment);
            if member.is_null() {
                *member = Value::Array(Vec::new());
            }
            let entries = member
                .as_array_mut()
                .ok_or_else(|| shape(path, format!("'{}' is not a list", segment.name)))?;
            let position = match entries.iter().position(|entry| entry_matches(entry, &keys)) {
                Some(position) => position,
                None => {
                    entries.push(key_entry(&keys));
                    entries.len() - 1
                }
            };
            &mut entries[position]
        } else {
            member
        };
    }
    object_mut(current, path)
}

/// Replaces the node at `path` with `value` (the node's own value).
pub(crate) fn set(
    root: &mut Value,
    path: &Path,
    mut value: Value,
    schema: &SchemaContext,
) -> Result<(), DatastoreError> {
    let Some(last) = path.last() else {
        if !value.is_object() {
            return Err(shape(path, "root must be a container"));
        }
        *root = value;
        return Ok(());
    };
    let depth = path.depth() - 1;
    let parent = ensure_parent(root, path, schema)?;
    let name = member_name(parent, last).unwrap_or_else(|| new_member_name(last, depth));
    if !last.is_keyed() {
        parent.insert(name, value);
        return Ok(());
    }

    let keys = resolve_keys(schema, last);
    apply_keys(&mut value, &keys, path)?;
    let list = parent.entry(name).or_insert_with(|| Value::Array(Vec::new()));
    let entries = list
        .as_array_mut()
        .ok_or_else(|| shape(path, format!("'{}' is not a list", last.name)))?;
    match entries.iter_mut().find(|entry| entry_matches(entry, &keys)) {
        Some(entry) => *entry = value,
        None => entries.push(value),
    }
    Ok(())
}

/// Deep-merges `value` into the node at `path`, creating it when missing.
pub(crate) fn merge(
    root: &mut Value,
    path: &Path,
    mut value: Value,
    schema: &SchemaContext,
) -> Result<(), DatastoreError> {
    if let Some(last) = path.last()
        && last.is_keyed()
    {
        apply_keys(&mut value, &resolve_keys(schema, last), path)?;
    }
    let list_name = path.last().map(|segment| segment.name.clone()).unwrap_or_default();
    match lookup_mut(root, path, schema) {
        Some(existing) => {
            merge_value(existing, value, &list_name, schema);
            Ok(())
        }
        None => set(root, path, value, schema),
    }
}

/// Merges `source` into `target`: containers member by member, lists entry by
/// entry matched on their keys, everything else replaced.
pub(crate) fn merge_value(target: &mut Value, source: Value, name: &str, schema: &SchemaContext) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (member, value) in source {
                match target.get_mut(&member) {
                    Some(existing) => merge_value(existing, value, unqualified(&member), schema),
                    None => {
                        target.insert(member, value);
                    }
                }
            }
        }
        (Value::Array(target), Value::Array(source))
            if source.iter().all(Value::is_object) && target.iter().all(Value::is_object) =>
        {
            for entry in source {
                let keys = entry
                    .as_object()
                    .map(|object| entry_keys(schema, name, object))
                    .unwrap_or_default();
                match target.iter_mut().find(|existing| same_entry(existing, &keys)) {
                    Some(existing) => merge_value(existing, entry, name, schema),
                    None => target.push(entry),
                }
            }
        }
        (target, source) => *target = source,
    }
}

/// Removes the node at `path`. Returns whether anything was removed.
pub(crate) fn remove(root: &mut Value, path: &Path, schema: &SchemaContext) -> bool {
    let (Some(parent_path), Some(last)) = (path.parent(), path.last()) else {
        let existed = root.as_object().is_some_and(|object| !object.is_empty());
        *root = Value::Object(Map::new());
        return existed;
    };
    let Some(Value::Object(parent)) = lookup_mut(root, &parent_path, schema) else {
        return false;
    };
    let Some(name) = member_name(parent, last) else {
        return false;
    };
    if !last.is_keyed() {
        return parent.remove(&name).is_some();
    }

    let keys = resolve_keys(schema, last);
    let Some(Value::Array(entries)) = parent.get_mut(&name) else {
        return false;
    };
    let before = entries.len();
    entries.retain(|entry| !entry_matches(entry, &keys));
    let removed = entries.len() != before;
    if entries.is_empty() {
        parent.remove(&name);
    }
    removed
}

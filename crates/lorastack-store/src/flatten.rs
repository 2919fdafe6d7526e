//! Flat field-path views of value trees.
//!
//! A record is stored as a map from dot-joined paths to leaf values. Map
//! entries contribute their key, list elements their index. Byte strings
//! are leaves. Zero leaves and empty containers are omitted.

use std::collections::BTreeMap;

use lorastack_core::Error;

use crate::value::{MAX_DEPTH, Value, ValueError};

/// Path separator.
pub const SEPARATOR: char = '.';

/// Flat map of field paths to leaf values.
pub type Fields = BTreeMap<String, Value>;

/// Update instructions: `Some` sets a path, `None` clears it together with
/// everything below it.
pub type Diff<V> = BTreeMap<String, Option<V>>;

/// Join a parent path and a child key.
pub fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}{SEPARATOR}{key}")
    }
}

/// Whether `path` equals `field` or lies below it.
pub fn is_under(path: &str, field: &str) -> bool {
    path == field
        || (path.len() > field.len()
            && path.starts_with(field)
            && path[field.len()..].starts_with(SEPARATOR))
}

/// Flatten a value tree into leaf paths.
pub fn flatten(value: &Value) -> Result<Fields, Error> {
    let mut out = Fields::new();
    flatten_into(&mut out, "", value, 0)?;
    Ok(out)
}

fn flatten_into(out: &mut Fields, prefix: &str, value: &Value, depth: usize) -> Result<(), Error> {
    if depth > MAX_DEPTH {
        return Err(ValueError::TooDeep.into());
    }
    match value {
        Value::Map(m) => {
            for (k, v) in m {
                flatten_into(out, &join(prefix, k), v, depth + 1)?;
            }
        }
        Value::List(l) => {
            for (i, v) in l.iter().enumerate() {
                flatten_into(out, &join(prefix, &i.to_string()), v, depth + 1)?;
            }
        }
        leaf if leaf.is_zero() => {}
        leaf => {
            out.insert(prefix.to_string(), leaf.clone());
        }
    }
    Ok(())
}

/// Rebuild a value tree from leaf paths.
///
/// Lists come back as maps keyed by index; decoding into a typed record
/// turns them back into lists.
pub fn unflatten(fields: &Fields) -> Value {
    let mut root = BTreeMap::new();
    for (path, leaf) in fields {
        insert_path(&mut root, path, leaf.clone());
    }
    Value::Map(root)
}

fn insert_path(root: &mut BTreeMap<String, Value>, path: &str, leaf: Value) {
    let mut node = root;
    let mut parts = path.split(SEPARATOR).peekable();
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            node.insert(part.to_string(), leaf);
            return;
        }
        let entry = node
            .entry(part.to_string())
            .or_insert_with(|| Value::Map(BTreeMap::new()));
        if !matches!(entry, Value::Map(_)) {
            *entry = Value::Map(BTreeMap::new());
        }
        let Value::Map(next) = entry else {
            return;
        };
        node = next;
    }
}

/// Keep the paths equal to or below any of `fields`.
///
/// Every requested field is also cleared first, so stale children and
/// fields that are now zero are erased by the update.
pub fn select(flat: &Fields, fields: &[String]) -> Diff<Value> {
    let mut diff = Diff::new();
    for field in fields {
        diff.insert(field.clone(), None);
    }
    for (path, value) in flat {
        if fields.iter().any(|f| is_under(path, f)) {
            diff.insert(path.clone(), Some(value.clone()));
        }
    }
    diff
}

/// Normalise a diff whose values may be containers or zero.
///
/// A container value at `p` becomes a tombstone for `p` plus its flattened
/// leaves; zero values become tombstones.
pub fn expand(diff: Diff<Value>) -> Result<Diff<Value>, Error> {
    let mut out = Diff::new();
    for (path, value) in diff {
        match value {
            Some(v) if v.is_container() => {
                out.entry(path.clone()).or_insert(None);
                for (sub, leaf) in flatten(&v)? {
                    out.insert(join(&path, &sub), Some(leaf));
                }
            }
            Some(v) if !v.is_zero() => {
                out.insert(path, Some(v));
            }
            _ => {
                out.entry(path).or_insert(None);
            }
        }
    }
    Ok(out)
}

/// Apply a diff to a flat record.
///
/// Every path in the diff is cleared with its subtree first, then the `Some`
/// values are written.
pub fn apply<V: Clone>(stored: &mut BTreeMap<String, V>, diff: &Diff<V>) {
    for path in diff.keys() {
        stored.retain(|p, _| !is_under(p, path));
    }
    for (path, value) in diff {
        if let Some(v) = value {
            stored.insert(path.clone(), v.clone());
        }
    }
}

/// Whether `record` has every `(path, value)` of `filter`.
pub fn matches(record: &Fields, filter: &Fields) -> bool {
    filter
        .iter()
        .all(|(path, want)| record.get(path).is_some_and(|have| have.same(want)))
}

/// Flatten a filter. Container values expand to their leaves; zero leaves
/// are kept as explicit constraints.
pub fn flatten_filter(filter: &Fields) -> Result<Fields, Error> {
    let mut out = Fields::new();
    for (path, value) in filter {
        if value.is_container() {
            for (sub, leaf) in flatten(value)? {
                out.insert(join(path, &sub), leaf);
            }
        } else {
            out.insert(path.clone(), value.clone());
        }
    }
    Ok(out)
}

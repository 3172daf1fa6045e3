//! Backend-neutral evaluation of writes and queries over JSON documents.
//!
//! Both the in-memory store and the Redis adapter stage commits through
//! [`stage_batch`] so field transforms behave identically everywhere.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::ports::store::{
    DocumentChange, DocumentPath, DocumentSnapshot, FieldOp, FieldPath, FieldUpdate, Fields,
    Filter, FilterOp, Query, StoreError, Write,
};

/// Applies `writes` on top of `current` and returns the final state of every
/// touched document. Nothing is returned when any write fails.
pub fn stage_batch(
    current: &BTreeMap<DocumentPath, Option<Fields>>,
    writes: &[Write],
    now_ms: i64,
) -> Result<BTreeMap<DocumentPath, Option<Fields>>, StoreError> {
    let mut staged = current.clone();
    for write in writes {
        let path = write.path().clone();
        let existing = staged.get(&path).cloned().flatten();
        let next = apply_write(existing, write, now_ms)?;
        staged.insert(path, next);
    }
    Ok(staged)
}

/// Changes between `before` and `after`, skipping documents left untouched.
pub fn diff_changes(
    before: &BTreeMap<DocumentPath, Option<Fields>>,
    after: &BTreeMap<DocumentPath, Option<Fields>>,
) -> Vec<DocumentChange> {
    after
        .iter()
        .filter_map(|(path, next)| {
            let previous = before.get(path).cloned().flatten();
            if previous == *next {
                return None;
            }
            Some(DocumentChange {
                path: path.clone(),
                before: previous,
                after: next.clone(),
            })
        })
        .collect()
}

pub fn apply_write(
    current: Option<Fields>,
    write: &Write,
    now_ms: i64,
) -> Result<Option<Fields>, StoreError> {
    match write {
        Write::Set {
            fields,
            merge: false,
            ..
        } => Ok(Some(fields.clone())),
        Write::Set {
            fields,
            merge: true,
            ..
        } => {
            let mut base = current.unwrap_or_default();
            merge_into(&mut base, fields.clone());
            Ok(Some(base))
        }
        Write::Update { path, updates } => {
            let mut doc = current.ok_or_else(|| StoreError::NotFound(path.to_string()))?;
            for update in updates {
                apply_field_update(&mut doc, update, now_ms)?;
            }
            Ok(Some(doc))
        }
        Write::Delete { .. } => Ok(None),
    }
}

fn merge_into(base: &mut Fields, incoming: Fields) {
    for (key, value) in incoming {
        match value {
            Value::Object(nested) => match base.get_mut(&key) {
                Some(Value::Object(existing)) => merge_into(existing, nested),
                _ => {
                    base.insert(key, Value::Object(nested));
                }
            },
            value => {
                base.insert(key, value);
            }
        }
    }
}

pub fn apply_field_update(
    doc: &mut Fields,
    update: &FieldUpdate,
    now_ms: i64,
) -> Result<(), StoreError> {
    let (parent, leaf) = parent_for_path(doc, &update.field)?;
    match &update.op {
        FieldOp::Set(value) => {
            parent.insert(leaf, value.clone());
        }
        FieldOp::ServerTimestamp => {
            parent.insert(leaf, Value::from(now_ms));
        }
        FieldOp::Delete => {
            parent.remove(&leaf);
        }
        FieldOp::ArrayUnion(values) => {
            let mut items = match parent.remove(&leaf) {
                Some(Value::Array(items)) => items,
                _ => vec![],
            };
            for value in values {
                if !items.contains(value) {
                    items.push(value.clone());
                }
            }
            parent.insert(leaf, Value::Array(items));
        }
        FieldOp::ArrayRemove(values) => {
            let mut items = match parent.remove(&leaf) {
                Some(Value::Array(items)) => items,
                _ => vec![],
            };
            items.retain(|item| !values.contains(item));
            parent.insert(leaf, Value::Array(items));
        }
    }
    Ok(())
}

fn parent_for_path<'a>(
    doc: &'a mut Fields,
    field: &FieldPath,
) -> Result<(&'a mut Map<String, Value>, String), StoreError> {
    let invalid = || StoreError::Operation(format!("invalid field path '{field}'"));
    let (leaf, parents) = field.segments().split_last().ok_or_else(invalid)?;
    if leaf.is_empty() || parents.iter().any(String::is_empty) {
        return Err(invalid());
    }
    let mut cursor = doc;
    for segment in parents {
        if !cursor.get(segment).is_some_and(Value::is_object) {
            cursor.insert(segment.clone(), Value::Object(Map::new()));
        }
        cursor = cursor
            .get_mut(segment)
            .and_then(Value::as_object_mut)
            .ok_or_else(invalid)?;
    }
    Ok((cursor, leaf.clone()))
}

/// Value of a top-level or dotted field, as used by query filters and ordering.
pub fn lookup<'a>(fields: &'a Fields, field: &str) -> Option<&'a Value> {
    let mut segments = field.split('.');
    let mut current = fields.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

pub fn matches_filter(fields: &Fields, filter: &Filter) -> bool {
    let Some(value) = lookup(fields, &filter.field) else {
        return false;
    };
    match filter.op {
        FilterOp::Eq => value == &filter.value,
        FilterOp::Lt => compare(value, &filter.value) == Some(Ordering::Less),
    }
}

/// Ordering between values of the same JSON type; `None` across types.
pub fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Filters, orders and limits candidate documents from one collection.
pub fn run_query(query: &Query, candidates: Vec<DocumentSnapshot>) -> Vec<DocumentSnapshot> {
    let mut matched: Vec<DocumentSnapshot> = candidates
        .into_iter()
        .filter(|snapshot| snapshot.path.collection() == query.collection)
        .filter(|snapshot| {
            query
                .filters
                .iter()
                .all(|filter| matches_filter(&snapshot.fields, filter))
        })
        .collect();

    match &query.order_by {
        Some((field, direction)) => {
            // Documents missing the order field are excluded, as in the hosted store.
            matched.retain(|snapshot| lookup(&snapshot.fields, field).is_some());
            matched.sort_by(|a, b| {
                let ordering = match (lookup(&a.fields, field), lookup(&b.fields, field)) {
                    (Some(left), Some(right)) => compare(left, right).unwrap_or(Ordering::Equal),
                    _ => Ordering::Equal,
                };
                let ordering = match direction {
                    crate::ports::store::Direction::Ascending => ordering,
                    crate::ports::store::Direction::Descending => ordering.reverse(),
                };
                ordering.then_with(|| a.path.cmp(&b.path))
            });
        }
        None => matched.sort_by(|a, b| a.path.cmp(&b.path)),
    }

    if let Some(limit) = query.limit {
        matched.truncate(limit);
    }
    matched
}

//! Typed accessors over raw JSON mappings.
//!
//! Every accessor treats a missing key and an explicit `null` alike and names
//! the offending `context.key` path when the value has the wrong type.

use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value};

use super::{MetadataError, keys::FieldKeys};

pub(crate) type Dict = Map<String, Value>;

/// Borrow `value` as a mapping.
pub(crate) fn as_dict<'a>(value: &'a Value, context: &str) -> Result<&'a Dict, MetadataError> {
    value
        .as_object()
        .ok_or_else(|| MetadataError::invalid(format!("{context} must be a mapping, got {value}")))
}

/// Copy `raw` with every key lowercased, preserving order.
///
/// Two keys that collide after lowercasing are rejected.
pub(crate) fn lowercase_keys(raw: &Dict, context: &str) -> Result<Dict, MetadataError> {
    let mut out = Dict::new();
    for (key, value) in raw {
        let lower = key.to_lowercase();
        if out.insert(lower.clone(), value.clone()).is_some() {
            return Err(MetadataError::invalid(format!(
                "{context} has key \"{lower}\" more than once"
            )));
        }
    }
    Ok(out)
}

/// Reject keys outside registry `K` (plus `extra`), listing all of them.
pub(crate) fn check_known_keys<K: FieldKeys>(
    dict: &Dict,
    extra: &[&str],
    context: &str,
) -> Result<(), MetadataError> {
    let unknown: Vec<&str> = dict
        .keys()
        .map(String::as_str)
        .filter(|k| K::lookup(k).is_none() && !extra.contains(k))
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(MetadataError::invalid(format!(
            "{context} has unknown keys {unknown:?}; allowed keys are {:?}",
            K::values()
        )))
    }
}

fn present<'a, K: FieldKeys>(dict: &'a Dict, key: K) -> Option<&'a Value> {
    dict.get(key.as_str()).filter(|v| !v.is_null())
}

fn path<K: FieldKeys>(context: &str, key: K) -> String {
    format!("{context}.{}", key.as_str())
}

pub(crate) fn opt_string<K: FieldKeys>(
    dict: &Dict,
    key: K,
    context: &str,
) -> Result<Option<String>, MetadataError> {
    present(dict, key)
        .map(|v| {
            v.as_str().map(str::to_owned).ok_or_else(|| {
                MetadataError::invalid(format!("{} must be a string, got {v}", path(context, key)))
            })
        })
        .transpose()
}

pub(crate) fn opt_bool<K: FieldKeys>(
    dict: &Dict,
    key: K,
    context: &str,
) -> Result<Option<bool>, MetadataError> {
    present(dict, key)
        .map(|v| {
            v.as_bool().ok_or_else(|| {
                MetadataError::invalid(format!("{} must be a boolean, got {v}", path(context, key)))
            })
        })
        .transpose()
}

pub(crate) fn opt_number<K: FieldKeys>(
    dict: &Dict,
    key: K,
    context: &str,
) -> Result<Option<f64>, MetadataError> {
    present(dict, key)
        .map(|v| {
            v.as_f64().ok_or_else(|| {
                MetadataError::invalid(format!("{} must be a number, got {v}", path(context, key)))
            })
        })
        .transpose()
}

pub(crate) fn opt_list<K: FieldKeys>(
    dict: &Dict,
    key: K,
    context: &str,
) -> Result<Option<Vec<Value>>, MetadataError> {
    present(dict, key)
        .map(|v| {
            v.as_array().cloned().ok_or_else(|| {
                MetadataError::invalid(format!("{} must be a list, got {v}", path(context, key)))
            })
        })
        .transpose()
}

pub(crate) fn opt_string_list<K: FieldKeys>(
    dict: &Dict,
    key: K,
    context: &str,
) -> Result<Option<Vec<String>>, MetadataError> {
    let Some(items) = opt_list(dict, key, context)? else {
        return Ok(None);
    };
    items
        .iter()
        .map(|item| {
            item.as_str().map(str::to_owned).ok_or_else(|| {
                MetadataError::invalid(format!(
                    "{} must contain only strings, got {item}",
                    path(context, key)
                ))
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

pub(crate) fn opt_string_map<K: FieldKeys>(
    dict: &Dict,
    key: K,
    context: &str,
) -> Result<Option<IndexMap<String, String>>, MetadataError> {
    let Some(v) = present(dict, key) else {
        return Ok(None);
    };
    let map = as_dict(v, &path(context, key))?;
    map.iter()
        .map(|(k, item)| {
            item.as_str()
                .map(|s| (k.clone(), s.to_owned()))
                .ok_or_else(|| {
                    MetadataError::invalid(format!(
                        "{}.{k} must be a string, got {item}",
                        path(context, key)
                    ))
                })
        })
        .collect::<Result<IndexMap<_, _>, _>>()
        .map(Some)
}

pub(crate) fn opt_value<K: FieldKeys>(dict: &Dict, key: K) -> Option<&Value> {
    present(dict, key)
}

/// Fail if `items` repeats any entry, naming the repeated ones.
pub(crate) fn ensure_unique(items: &[String], context: &str) -> Result<(), MetadataError> {
    let mut seen = IndexSet::new();
    let mut repeated = IndexSet::new();
    for item in items {
        if !seen.insert(item.as_str()) {
            repeated.insert(item.as_str());
        }
    }
    if repeated.is_empty() {
        Ok(())
    } else {
        Err(MetadataError::invalid(format!(
            "{context} contains duplicates {:?}",
            repeated.into_iter().collect::<Vec<_>>()
        )))
    }
}

/// Insert `key: value` when `value` is present, or `null` when `full` is set.
pub(crate) fn emit<K: FieldKeys>(out: &mut Dict, key: K, value: Option<Value>, full: bool) {
    match value {
        Some(v) => {
            out.insert(key.as_str().to_owned(), v);
        }
        None if full => {
            out.insert(key.as_str().to_owned(), Value::Null);
        }
        None => {}
    }
}

pub(crate) fn string_value(s: Option<&String>) -> Option<Value> {
    s.map(|s| Value::String(s.clone()))
}

pub(crate) fn string_list_value(items: Option<&Vec<String>>) -> Option<Value> {
    items.map(|items| Value::Array(items.iter().cloned().map(Value::String).collect()))
}

pub(crate) fn string_map_value(map: Option<&IndexMap<String, String>>) -> Option<Value> {
    map.map(|map| {
        Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    })
}

pub(crate) fn number_value(n: Option<f64>) -> Option<Value> {
    n.and_then(serde_json::Number::from_f64).map(Value::Number)
}

//! Record access helpers
//!
//! Field names are matched case-insensitively against source records, but
//! the first-observed "true case" spelling is the one used for all
//! subsequent access.

use serde_json::Value;

/// A fetched record: one row of a data source.
pub type Record = serde_json::Map<String, Value>;

/// Finds the true-case spelling of a field name in a record.
pub fn true_case_key<'a>(record: &'a Record, name: &str) -> Option<&'a str> {
    if record.contains_key(name) {
        return record.keys().find(|k| *k == name).map(|k| k.as_str());
    }
    record
        .keys()
        .find(|k| k.eq_ignore_ascii_case(name))
        .map(|k| k.as_str())
}

/// Case-insensitive single-field lookup.
pub fn get_field<'a>(record: &'a Record, name: &str) -> Option<&'a Value> {
    if let Some(v) = record.get(name) {
        return Some(v);
    }
    record
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
}

/// Case-insensitive dotted-path lookup, descending through nested objects.
///
/// Returns `None` as soon as a segment is missing or a non-final segment
/// is not an object (e.g. a null child relationship).
pub fn get_path<'a>(record: &'a Record, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = get_field(record, first)?;
    for segment in rest {
        match current {
            Value::Object(obj) => {
                current = obj
                    .get(segment)
                    .or_else(|| {
                        obj.iter()
                            .find(|(k, _)| k.eq_ignore_ascii_case(segment))
                            .map(|(_, v)| v)
                    })?;
            }
            _ => return None,
        }
    }
    Some(current)
}

/// Case-insensitive mutable dotted-path lookup.
pub fn get_path_mut<'a>(record: &'a mut Record, path: &[String]) -> Option<&'a mut Value> {
    let (first, rest) = path.split_first()?;
    let key = true_case_key(record, first)?.to_string();
    let mut current = record.get_mut(&key)?;
    for segment in rest {
        match current {
            Value::Object(obj) => {
                let key = obj
                    .keys()
                    .find(|k| k.eq_ignore_ascii_case(segment))?
                    .clone();
                current = obj.get_mut(&key)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

/// Inserts a field, replacing any case-variant spelling already present.
pub fn set_field(record: &mut Record, name: &str, value: Value) {
    if let Some(key) = true_case_key(record, name).map(String::from) {
        record.insert(key, value);
    } else {
        record.insert(name.to_string(), value);
    }
}

/// Removes a field case-insensitively. Returns the removed value.
pub fn remove_field(record: &mut Record, name: &str) -> Option<Value> {
    let key = true_case_key(record, name)?.to_string();
    record.remove(&key)
}

//! Row grouping for aggregate execution
//!
//! Groups filtered rows by the group-by fields, preserving first-seen
//! order. A null (or missing) group value never merges with another row:
//! each null gets a per-row sentinel, so every null-keyed row forms its
//! own group.

use std::collections::HashMap;

use serde_json::Value;

use crate::util::{get_path, Record};

/// Splits rows into groups keyed by the given primary-relative dotted
/// field names. An empty field list yields a single group of all rows
/// (or no groups for no rows).
pub fn group_rows(rows: Vec<Record>, group_fields: &[String]) -> Vec<Vec<Record>> {
    if group_fields.is_empty() {
        if rows.is_empty() {
            return Vec::new();
        }
        return vec![rows];
    }

    let paths: Vec<Vec<String>> = group_fields
        .iter()
        .map(|f| f.split('.').map(String::from).collect())
        .collect();

    let mut groups: Vec<Vec<Record>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for (row_idx, row) in rows.into_iter().enumerate() {
        let key = group_key(&row, &paths, row_idx);
        match index.get(&key) {
            Some(&slot) => groups[slot].push(row),
            None => {
                index.insert(key, groups.len());
                groups.push(vec![row]);
            }
        }
    }
    groups
}

fn group_key(row: &Record, paths: &[Vec<String>], row_idx: usize) -> String {
    let mut key = String::new();
    for path in paths {
        match get_path(row, path).filter(|v| !v.is_null()) {
            Some(value) => {
                key.push_str(&key_part(value));
            }
            // Null never merges; row index makes the part unique.
            None => {
                key.push('\u{0}');
                key.push_str(&row_idx.to_string());
            }
        }
        key.push('\u{1}');
    }
    key
}

fn key_part(value: &Value) -> String {
    match value {
        Value::String(s) => format!("s:{}", s),
        Value::Number(n) => format!("n:{}", n),
        Value::Bool(b) => format!("b:{}", b),
        other => format!("j:{}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(v: Value) -> Record {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_groups_by_field_preserving_order() {
        let rows = vec![
            record(json!({"Region": "west", "Id": 1})),
            record(json!({"Region": "east", "Id": 2})),
            record(json!({"Region": "west", "Id": 3})),
        ];
        let groups = group_rows(rows, &["Region".to_string()]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[0][1].get("Id"), Some(&json!(3)));
        assert_eq!(groups[1][0].get("Id"), Some(&json!(2)));
    }

    #[test]
    fn test_null_group_values_never_merge() {
        let rows = vec![
            record(json!({"Region": null, "Id": 1})),
            record(json!({"Id": 2})),
            record(json!({"Region": "west", "Id": 3})),
        ];
        let groups = group_rows(rows, &["Region".to_string()]);
        assert_eq!(groups.len(), 3);
    }

    #[test]
    fn test_multi_field_key() {
        let rows = vec![
            record(json!({"A": "x", "B": 1})),
            record(json!({"A": "x", "B": 2})),
            record(json!({"A": "x", "B": 1})),
        ];
        let groups = group_rows(rows, &["A".to_string(), "B".to_string()]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
    }

    #[test]
    fn test_type_distinguished_keys() {
        // Number 1 and string "1" land in different groups.
        let rows = vec![
            record(json!({"K": 1})),
            record(json!({"K": "1"})),
        ];
        let groups = group_rows(rows, &["K".to_string()]);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_empty_field_list() {
        assert!(group_rows(Vec::new(), &[]).is_empty());
        let rows = vec![record(json!({"Id": 1})), record(json!({"Id": 2}))];
        let groups = group_rows(rows, &[]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
    }
}

//! Result sorting for query execution
//!
//! Sorts projected records by multiple keys. Each key carries a
//! direction and a null placement; `desc` inverts the whole key sign,
//! null placement included. Keys whose values are not comparable
//! (mismatched or non-scalar types) are skipped rather than raising.

use std::cmp::Ordering;

use serde_json::Value;

use crate::ast::{NullsOrder, SortDirection, SortKey};
use crate::util::{get_path, Record};

/// Sorts result records
pub struct RecordSorter;

impl RecordSorter {
    /// Sorts records by the given keys.
    ///
    /// Sort is stable; rows equal under every key keep their order.
    pub fn sort(records: &mut [Record], keys: &[SortKey]) {
        records.sort_by(|a, b| Self::compare(a, b, keys));
    }

    fn compare(a: &Record, b: &Record, keys: &[SortKey]) -> Ordering {
        for key in keys {
            let a_val = get_path(a, &key.path.segments).filter(|v| !v.is_null());
            let b_val = get_path(b, &key.path.segments).filter(|v| !v.is_null());

            let ordering = match (a_val, b_val) {
                // Both null, try the next key.
                (None, None) => continue,
                (Some(_), None) => match key.nulls {
                    NullsOrder::First => Ordering::Less,
                    NullsOrder::Last => Ordering::Greater,
                },
                (None, Some(_)) => match key.nulls {
                    NullsOrder::First => Ordering::Greater,
                    NullsOrder::Last => Ordering::Less,
                },
                (Some(av), Some(bv)) => match Self::compare_values(av, bv) {
                    Some(ordering) => ordering,
                    // Not comparable under this key, try the next one.
                    None => continue,
                },
            };
            let ordering = match key.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Compares two non-null values of the same scalar type.
    ///
    /// Numbers compare numerically, strings lexicographically; any
    /// other pairing yields `None`.
    fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
        match (a, b) {
            (Value::Number(a_n), Value::Number(b_n)) => {
                a_n.as_f64()?.partial_cmp(&b_n.as_f64()?)
            }
            (Value::String(a_s), Value::String(b_s)) => Some(a_s.cmp(b_s)),
            _ => None,
        }
    }
}

//! Composer 2 "minified" version lists.
//!
//! Only the first entry of a minified list is a complete manifest. Every later
//! entry carries the fields that changed relative to a running baseline, plus
//! an [`UNSET`] marker for each field that disappeared. Clients rebuild each
//! version by replaying the diffs in order, so the encoding here must match
//! theirs exactly.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

use crate::Manifest;

/// Marker value for a field that is present in the baseline but absent from
/// the current version. Part of the wire protocol; clients match it literally.
pub const UNSET: &str = "__unset";

/// Value of the envelope's `minified` field.
pub const MINIFIED_FORMAT: &str = "composer/2.0";

/// Response envelope for a single package's version list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinifiedVersions {
    pub minified: String,
    pub packages: BTreeMap<String, Vec<Map<String, Value>>>,
}

impl MinifiedVersions {
    /// Minify `versions` and wrap them for `package`.
    pub fn new(package: impl Into<String>, versions: impl IntoIterator<Item = Manifest>) -> Self {
        let mut packages = BTreeMap::new();
        packages.insert(package.into(), minify(versions));
        Self { minified: MINIFIED_FORMAT.to_string(), packages }
    }
}

/// Diff-encode an ordered list of manifests for one package.
///
/// The first manifest is emitted unchanged. For each later manifest, a field
/// is emitted when it is new or not [canonically equal](canonical_eq) to the
/// baseline, and every baseline field missing from the manifest is emitted as
/// [`UNSET`] and dropped from the baseline so it isn't reported twice.
pub fn minify(versions: impl IntoIterator<Item = Manifest>) -> Vec<Map<String, Value>> {
    let mut versions = versions.into_iter();
    let Some(first) = versions.next() else {
        return Vec::new();
    };
    let mut baseline = first.as_map().clone();
    let mut minified = vec![first.into_inner()];

    for version in versions {
        let version = version.into_inner();
        let mut diff = Map::new();
        for (field, value) in &version {
            let unchanged = baseline.get(field).is_some_and(|known| canonical_eq(known, value));
            if !unchanged {
                baseline.insert(field.clone(), value.clone());
                diff.insert(field.clone(), value.clone());
            }
        }
        let removed: Vec<String> = baseline.keys().filter(|field| !version.contains_key(*field)).cloned().collect();
        for field in removed {
            baseline.remove(&field);
            diff.insert(field, Value::String(UNSET.to_string()));
        }
        minified.push(diff);
    }
    minified
}

/// Deep structural equality of two JSON values.
///
/// Object key order is ignored and numbers compare by value, so `1` and `1.0`
/// are equal. This is the equality a client observes after both values have
/// gone through a serializer that stores every number as a double.
pub fn canonical_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len() && a.iter().all(|(key, value)| b.get(key).is_some_and(|other| canonical_eq(value, other)))
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(value, other)| canonical_eq(value, other))
        },
        (Value::Number(a), Value::Number(b)) => numbers_eq(a, b),
        _ => a == b,
    }
}

fn numbers_eq(a: &Number, b: &Number) -> bool {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
        return a == b;
    }
    a.as_f64() == b.as_f64()
}

use std::cmp::Ordering;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

pub const PATH_DELIMITER: &str = ".";

/// A dotted property path into a record, e.g. `address.city`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn new(path: &str) -> Self {
        FieldPath(
            path.split(PATH_DELIMITER)
                .filter(|segment| !segment.is_empty())
                .map(str::to_owned)
                .collect(),
        )
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Walk the path through nested objects. Any missing intermediate or a
    /// non-object along the way resolves to `None`.
    pub fn resolve<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        self.0
            .iter()
            .try_fold(doc, |current, segment| current.as_object()?.get(segment))
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join(PATH_DELIMITER))
    }
}

impl From<&str> for FieldPath {
    fn from(path: &str) -> Self {
        FieldPath::new(path)
    }
}

impl From<String> for FieldPath {
    fn from(path: String) -> Self {
        FieldPath::new(&path)
    }
}

impl Serialize for FieldPath {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(FieldPath::new(&s))
    }
}

/// A value stored in an object store.
///
/// The default `lookup` goes through the record's serde representation, so a
/// plain `impl Record for MyType {}` is enough for any serializable type.
/// That serializes the whole record on every call, and comparers and index
/// checks call it on each binary-search probe. Types sorted or filtered on a
/// hot path should override it with direct field access.
pub trait Record: Serialize + Clone + Send + Sync + 'static {
    fn lookup(&self, path: &FieldPath) -> Option<Value> {
        let doc = serde_json::to_value(self).ok()?;
        path.resolve(&doc).cloned()
    }
}

impl Record for Value {
    fn lookup(&self, path: &FieldPath) -> Option<Value> {
        path.resolve(self).cloned()
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: null < bool < number < string < array < object.
/// Arrays compare element-wise, objects entry-wise in key order.
pub fn compare_json(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .unwrap_or(f64::NAN)
                .total_cmp(&y.as_f64().unwrap_or(f64::NAN)),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y.iter())
            .map(|(x, y)| compare_json(x, y))
            .find(|ord| ord.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(x), Value::Object(y)) => x
            .iter()
            .zip(y.iter())
            .map(|((xk, xv), (yk, yv))| xk.cmp(yk).then_with(|| compare_json(xv, yv)))
            .find(|ord| ord.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_nested_path() {
        let doc = json!({ "address": { "city": "Oslo" }, "tags": ["a"] });
        assert_eq!(FieldPath::new("address.city").resolve(&doc), Some(&json!("Oslo")));
        assert_eq!(FieldPath::new("address.zip").resolve(&doc), None);
        assert_eq!(FieldPath::new("tags.0").resolve(&doc), None);
        assert_eq!(FieldPath::new("missing.city").resolve(&doc), None);
    }

    #[test]
    fn test_compare_json_orders_across_types() {
        assert_eq!(compare_json(&json!(null), &json!(false)), Ordering::Less);
        assert_eq!(compare_json(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_json(&json!(2.5), &json!(2)), Ordering::Greater);
        assert_eq!(compare_json(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(compare_json(&json!("z"), &json!([1])), Ordering::Less);
        assert_eq!(compare_json(&json!([1, 2]), &json!([1])), Ordering::Greater);
    }
}

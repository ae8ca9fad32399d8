//! Payload filters for vector search.

use serde_json::{Value, json};

use rulevault_shared::{ContentType, Metadata};

/// Top-level fields of an indexed point's payload.
const PAYLOAD_FIELDS: &[&str] = &[
    "text",
    "chunk_type",
    "metadata",
    "source_book",
    "source_version",
    "page_number",
];

/// One condition on a payload field. Keys are dotted payload paths, e.g.
/// `source_book` or `metadata.spell_level`.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equals { key: String, value: Value },
    AnyOf { key: String, values: Vec<Value> },
    Range { key: String, min: Option<f64>, max: Option<f64> },
}

/// Conjunction of conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    pub must: Vec<Condition>,
}

impl SearchFilter {
    /// Build a filter from a JSON map plus a content-type membership test.
    ///
    /// Arrays become membership, objects with `min`/`max` become ranges,
    /// anything else is equality. Keys go through [`payload_path`]. Returns
    /// `None` when nothing constrains.
    pub fn from_parts(filters: Option<&Metadata>, content_types: &[ContentType]) -> Option<Self> {
        let mut must = Vec::new();

        if !content_types.is_empty() {
            must.push(Condition::AnyOf {
                key: "chunk_type".into(),
                values: content_types
                    .iter()
                    .map(|ct| Value::from(ct.as_str()))
                    .collect(),
            });
        }

        for (key, value) in filters.into_iter().flatten() {
            let key = &payload_path(key);
            let condition = match value {
                Value::Array(values) => Condition::AnyOf {
                    key: key.clone(),
                    values: values.clone(),
                },
                Value::Object(bounds) if bounds.contains_key("min") || bounds.contains_key("max") => {
                    Condition::Range {
                        key: key.clone(),
                        min: bounds.get("min").and_then(Value::as_f64),
                        max: bounds.get("max").and_then(Value::as_f64),
                    }
                }
                other => Condition::Equals {
                    key: key.clone(),
                    value: other.clone(),
                },
            };
            must.push(condition);
        }

        (!must.is_empty()).then_some(Self { must })
    }

    /// Qdrant REST filter body.
    pub fn to_qdrant(&self) -> Value {
        let must: Vec<Value> = self
            .must
            .iter()
            .map(|condition| match condition {
                Condition::Equals { key, value } => json!({ "key": key, "match": { "value": value } }),
                Condition::AnyOf { key, values } => json!({ "key": key, "match": { "any": values } }),
                Condition::Range { key, min, max } => {
                    let mut range = serde_json::Map::new();
                    if let Some(min) = min {
                        range.insert("gte".into(), json!(min));
                    }
                    if let Some(max) = max {
                        range.insert("lte".into(), json!(max));
                    }
                    json!({ "key": key, "range": range })
                }
            })
            .collect();
        json!({ "must": must })
    }

    /// Evaluate against a payload document.
    pub fn matches(&self, payload: &Value) -> bool {
        self.must.iter().all(|condition| match condition {
            Condition::Equals { key, value } => {
                lookup(payload, key).is_some_and(|found| values_equal(found, value))
            }
            Condition::AnyOf { key, values } => lookup(payload, key)
                .is_some_and(|found| values.iter().any(|v| values_equal(found, v))),
            Condition::Range { key, min, max } => lookup(payload, key)
                .and_then(Value::as_f64)
                .is_some_and(|n| min.is_none_or(|lo| n >= lo) && max.is_none_or(|hi| n <= hi)),
        })
    }
}

/// Resolve a user filter key to a payload path. Dotted keys and top-level
/// payload fields are used as given; any other key names a chunk metadata
/// entry, so `spell_level` becomes `metadata.spell_level`.
pub fn payload_path(key: &str) -> String {
    if key.contains('.') || PAYLOAD_FIELDS.contains(&key) {
        key.to_string()
    } else {
        format!("metadata.{key}")
    }
}

fn lookup<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(payload, |node, segment| node.get(segment))
        .filter(|v| !v.is_null())
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters(value: Value) -> Metadata {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn empty_inputs_build_no_filter() {
        assert!(SearchFilter::from_parts(None, &[]).is_none());
        assert!(SearchFilter::from_parts(Some(&Metadata::new()), &[]).is_none());
    }

    #[test]
    fn builds_each_condition_kind() {
        let map = filters(json!({
            "source_book": "PHB",
            "metadata.spell_level": ["1", "2"],
            "page_number": { "min": 100, "max": 200 }
        }));
        let filter = SearchFilter::from_parts(Some(&map), &[ContentType::Spell]).unwrap();

        assert_eq!(filter.must.len(), 4);
        assert_eq!(
            filter.must[0],
            Condition::AnyOf {
                key: "chunk_type".into(),
                values: vec![json!("spell")]
            }
        );
        assert!(filter.must.contains(&Condition::Range {
            key: "page_number".into(),
            min: Some(100.0),
            max: Some(200.0)
        }));
    }

    #[test]
    fn qdrant_body_shape() {
        let map = filters(json!({ "page_number": { "min": 5 } }));
        let filter = SearchFilter::from_parts(Some(&map), &[ContentType::Table]).unwrap();
        assert_eq!(
            filter.to_qdrant(),
            json!({
                "must": [
                    { "key": "chunk_type", "match": { "any": ["table"] } },
                    { "key": "page_number", "range": { "gte": 5.0 } }
                ]
            })
        );
    }

    #[test]
    fn matches_dotted_paths_and_ranges() {
        let payload = json!({
            "chunk_type": "spell",
            "page_number": 241,
            "source_book": "PHB",
            "metadata": { "spell_level": "3" }
        });

        let map = filters(json!({
            "metadata.spell_level": "3",
            "page_number": { "min": 200, "max": 300 }
        }));
        let filter = SearchFilter::from_parts(Some(&map), &[ContentType::Spell]).unwrap();
        assert!(filter.matches(&payload));

        let map = filters(json!({ "source_book": ["DMG", "MM"] }));
        let filter = SearchFilter::from_parts(Some(&map), &[]).unwrap();
        assert!(!filter.matches(&payload));

        let filter = SearchFilter::from_parts(None, &[ContentType::Feat]).unwrap();
        assert!(!filter.matches(&payload));
    }

    #[test]
    fn bare_keys_resolve_to_chunk_metadata() {
        assert_eq!(payload_path("spell_level"), "metadata.spell_level");
        assert_eq!(payload_path("source_book"), "source_book");
        assert_eq!(payload_path("metadata.table_type"), "metadata.table_type");

        let payload = json!({
            "chunk_type": "spell",
            "source_book": "PHB",
            "metadata": { "spell_level": "3", "spell_school": "Evocation" }
        });
        let map = filters(json!({ "spell_level": "3", "source_book": "PHB" }));
        let filter = SearchFilter::from_parts(Some(&map), &[]).unwrap();
        assert!(filter.must.contains(&Condition::Equals {
            key: "metadata.spell_level".into(),
            value: json!("3")
        }));
        assert!(filter.matches(&payload));

        let map = filters(json!({ "spell_school": "Necromancy" }));
        let filter = SearchFilter::from_parts(Some(&map), &[]).unwrap();
        assert!(!filter.matches(&payload));
    }
}

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of an entity type known to the sync run (e.g. "customer").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityTypeId(String);

impl EntityTypeId {
    pub fn new(name: impl Into<String>) -> Self {
        EntityTypeId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityTypeId {
    fn from(value: &str) -> Self {
        EntityTypeId(value.to_string())
    }
}

/// Identifies one registered source system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceSystemId(String);

impl SourceSystemId {
    pub fn new(name: impl Into<String>) -> Self {
        SourceSystemId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceSystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SourceSystemId {
    fn from(value: &str) -> Self {
        SourceSystemId(value.to_string())
    }
}

/// Identifies the destination system a run targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DestinationSystemId(String);

impl DestinationSystemId {
    pub fn new(name: impl Into<String>) -> Self {
        DestinationSystemId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DestinationSystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DestinationSystemId {
    fn from(value: &str) -> Self {
        DestinationSystemId(value.to_string())
    }
}

/// An opaque, value-comparable entity identifier. The external
/// representation of a native key (uuid, integer, string) is fixed by
/// whoever converts it in; two identifiers are equal iff their underlying
/// values are equal, which makes them usable as map and set keys
/// throughout the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityIdentifier(String);

impl EntityIdentifier {
    pub fn new(value: impl Into<String>) -> Self {
        EntityIdentifier(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityIdentifier {
    fn from(value: &str) -> Self {
        EntityIdentifier(value.to_string())
    }
}

impl From<String> for EntityIdentifier {
    fn from(value: String) -> Self {
        EntityIdentifier(value)
    }
}

impl From<Uuid> for EntityIdentifier {
    fn from(value: Uuid) -> Self {
        EntityIdentifier(value.to_string())
    }
}

impl From<i64> for EntityIdentifier {
    fn from(value: i64) -> Self {
        EntityIdentifier(value.to_string())
    }
}

/// A single field value. Homogenized values key cache index buckets, so
/// the type is hashable; floats compare and hash by bit pattern.
/// Untagged, with `Timestamp` declared before `Text` so RFC 3339 strings
/// deserialize as timestamps and everything else falls through to text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldValue::Null, FieldValue::Null) => true,
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a == b,
            (FieldValue::Integer(a), FieldValue::Integer(b)) => a == b,
            (FieldValue::Float(a), FieldValue::Float(b)) => a.to_bits() == b.to_bits(),
            (FieldValue::Text(a), FieldValue::Text(b)) => a == b,
            (FieldValue::Timestamp(a), FieldValue::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for FieldValue {}

impl Hash for FieldValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            FieldValue::Null => {}
            FieldValue::Bool(b) => b.hash(state),
            FieldValue::Integer(i) => i.hash(state),
            FieldValue::Float(f) => f.to_bits().hash(state),
            FieldValue::Text(s) => s.hash(state),
            FieldValue::Timestamp(t) => t.timestamp_nanos_opt().hash(state),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Float(x) => write!(f, "{}", x),
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value)
    }
}

/// A synchronized entity as the engine sees it: a typed bag of named
/// fields. The whole pipeline is instantiated per entity type over this
/// one record shape instead of being generic over per-type structs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    entity_type: EntityTypeId,
    fields: BTreeMap<String, FieldValue>,
}

impl EntityRecord {
    pub fn new(entity_type: EntityTypeId) -> Self {
        EntityRecord {
            entity_type,
            fields: BTreeMap::new(),
        }
    }

    pub fn entity_type(&self) -> &EntityTypeId {
        &self.entity_type
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Field lookup that treats an explicit `Null` the same as an absent
    /// field, which is what indexing and identifier extraction want.
    pub fn get_non_null(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field).filter(|v| !v.is_null())
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(field, value);
        self
    }

    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.fields.remove(field)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A single field-level change produced by a merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueChange {
    pub field_name: String,
    pub old_value: Option<FieldValue>,
    pub new_value: Option<FieldValue>,
}

impl ValueChange {
    pub fn new(
        field_name: impl Into<String>,
        old_value: Option<FieldValue>,
        new_value: Option<FieldValue>,
    ) -> Self {
        ValueChange {
            field_name: field_name.into(),
            old_value,
            new_value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn identifiers_compare_by_value() {
        let a = EntityIdentifier::from("42");
        let b = EntityIdentifier::from(42i64);
        assert_eq!(a, b);

        let mut seen: HashMap<EntityIdentifier, usize> = HashMap::new();
        seen.insert(a, 1);
        assert_eq!(seen.get(&b), Some(&1));
    }

    #[test]
    fn field_values_key_maps() {
        let mut buckets: HashMap<FieldValue, Vec<usize>> = HashMap::new();
        buckets.entry(FieldValue::from("alpha")).or_default().push(1);
        buckets.entry(FieldValue::from("alpha")).or_default().push(2);
        buckets.entry(FieldValue::Float(1.5)).or_default().push(3);

        assert_eq!(buckets[&FieldValue::from("alpha")], vec![1, 2]);
        assert_eq!(buckets[&FieldValue::Float(1.5)], vec![3]);
    }

    #[test]
    fn get_non_null_skips_explicit_nulls() {
        let mut record = EntityRecord::new(EntityTypeId::from("customer"));
        record.set("email", FieldValue::Null);
        record.set("name", "Ada");

        assert!(record.get("email").is_some());
        assert!(record.get_non_null("email").is_none());
        assert_eq!(
            record.get_non_null("name"),
            Some(&FieldValue::from("Ada"))
        );
    }
}

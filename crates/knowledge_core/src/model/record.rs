//! Record shape exchanged with the record store.
//!
//! # Responsibility
//! - Define the opaque record identity and typed field values.
//! - Name the tables and fields the organizer tree reads and writes.
//!
//! # Invariants
//! - `RecordId` is opaque: core code compares and stores it, never parses it.
//! - A missing field and a `FieldValue::Null` field read the same way.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Opaque record identifier assigned by the record store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Typed cell value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Text(String),
    /// Linked-record cell. Order is the order shown by the store.
    Links(Vec<RecordId>),
}

impl FieldValue {
    /// Link cell holding at most one id.
    pub fn single_link(id: Option<&RecordId>) -> Self {
        Self::Links(id.cloned().into_iter().collect())
    }
}

/// Field name to value mapping of one record.
pub type Fields = BTreeMap<String, FieldValue>;

/// Tables owned by the knowledge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Organizers,
    Pages,
}

impl Table {
    /// Stable storage name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Organizers => "organizers",
            Self::Pages => "pages",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "organizers" => Some(Self::Organizers),
            "pages" => Some(Self::Pages),
            _ => None,
        }
    }
}

impl Display for Table {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const FIELD_TITLE: &str = "Title";
pub const FIELD_ORDER: &str = "Order";
pub const FIELD_CONTENT: &str = "Content";
/// Organizer flag, true iff the organizer has no parent.
pub const FIELD_IS_TOP_LEVEL: &str = "Is Top-level";
/// Organizer-side list of nested organizers.
pub const FIELD_CHILD_ORGANIZERS: &str = "Child Organizers";
/// Organizer-side list of pages.
pub const FIELD_PAGES: &str = "Pages";
/// Organizer-side back-reference to its parent organizer.
pub const FIELD_PARENT_ORGANIZER: &str = "Parent Organizer";
/// Page-side back-reference to its organizer.
pub const FIELD_ORGANIZER: &str = "Organizer";

/// One row from the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub fields: Fields,
}

impl Record {
    pub fn new(id: impl Into<RecordId>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        match self.fields.get(name) {
            None | Some(FieldValue::Null) => None,
            Some(value) => Some(value),
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.field(name)? {
            FieldValue::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.field(name)? {
            FieldValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        match self.field(name)? {
            FieldValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Linked ids of a link cell; empty for missing or non-link cells.
    pub fn links(&self, name: &str) -> &[RecordId] {
        match self.field(name) {
            Some(FieldValue::Links(ids)) => ids.as_slice(),
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldValue, Fields, Record, RecordId, Table};

    #[test]
    fn null_and_missing_fields_read_as_absent() {
        let mut fields = Fields::new();
        fields.insert("Order".to_string(), FieldValue::Null);
        let record = Record::new("rec1", fields);

        assert_eq!(record.integer("Order"), None);
        assert_eq!(record.integer("Missing"), None);
        assert!(record.links("Pages").is_empty());
    }

    #[test]
    fn typed_accessors_ignore_mismatched_cells() {
        let mut fields = Fields::new();
        fields.insert("Order".to_string(), FieldValue::Text("3".to_string()));
        fields.insert(
            "Pages".to_string(),
            FieldValue::Links(vec![RecordId::new("p1")]),
        );
        let record = Record::new("rec1", fields);

        assert_eq!(record.integer("Order"), None);
        assert_eq!(record.text("Order"), Some("3"));
        assert_eq!(record.links("Pages"), &[RecordId::new("p1")]);
    }

    #[test]
    fn field_values_serialize_with_explicit_tags() {
        let value = FieldValue::Links(vec![RecordId::new("a")]);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"type":"links","value":["a"]}"#);

        let null = serde_json::to_string(&FieldValue::Null).unwrap();
        assert_eq!(null, r#"{"type":"null"}"#);
    }

    #[test]
    fn table_names_are_stable() {
        assert_eq!(Table::parse(Table::Organizers.as_str()), Some(Table::Organizers));
        assert_eq!(Table::parse("pages"), Some(Table::Pages));
        assert_eq!(Table::parse("comments"), None);
    }
}

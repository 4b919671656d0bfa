//! Concept value types returned by queries and concept lookups
//!
//! These are immutable snapshots. Operations that need the server go through
//! the capability handles in [`crate::transaction::concept`], which borrow an
//! open transaction.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Type label, optionally scoped (role types are scoped by their relation type)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    pub scope: Option<String>,
    pub name: String,
}

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Self { scope: None, name: name.into() }
    }

    pub fn scoped(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self { scope: Some(scope.into()), name: name.into() }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}:{}", scope, self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Boolean,
    Long,
    Double,
    String,
    DateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Boolean(bool),
    Long(i64),
    Double(f64),
    String(String),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Boolean(_) => ValueType::Boolean,
            Self::Long(_) => ValueType::Long,
            Self::Double(_) => ValueType::Double,
            Self::String(_) => ValueType::String,
            Self::DateTime(_) => ValueType::DateTime,
        }
    }
}

/// Which category of type a [`Type`] belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeEncoding {
    ThingType,
    EntityType,
    RelationType,
    AttributeType(ValueType),
    RoleType,
}

/// Snapshot of a schema type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Type {
    pub label: Label,
    pub encoding: TypeEncoding,
    pub is_root: bool,
    pub is_abstract: bool,
}

impl Type {
    pub fn is_role_type(&self) -> bool {
        self.encoding == TypeEncoding::RoleType
    }

    pub fn is_thing_type(&self) -> bool {
        !self.is_role_type()
    }
}

/// Snapshot of a data instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thing {
    pub iid: Vec<u8>,
    pub thing_type: Type,
    pub inferred: bool,
    /// Present for attributes only
    pub value: Option<Value>,
}

impl Thing {
    pub fn iid_hex(&self) -> String {
        hex::encode(&self.iid)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Concept {
    Type(Type),
    Thing(Thing),
}

impl Concept {
    pub fn as_type(&self) -> Option<&Type> {
        match self {
            Self::Type(t) => Some(t),
            Self::Thing(_) => None,
        }
    }

    pub fn as_thing(&self) -> Option<&Thing> {
        match self {
            Self::Thing(t) => Some(t),
            Self::Type(_) => None,
        }
    }
}

/// One answer of a match query: variable name to concept
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConceptMap {
    map: HashMap<String, Concept>,
}

impl ConceptMap {
    pub fn new(map: HashMap<String, Concept>) -> Self {
        Self { map }
    }

    pub fn get(&self, variable: &str) -> Option<&Concept> {
        self.map.get(variable)
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Result of an aggregate query
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Numeric {
    Long(i64),
    Double(f64),
    NaN,
}

/// Snapshot of an inference rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub label: String,
    pub when: String,
    pub then: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoped_label_display() {
        assert_eq!(Label::scoped("marriage", "spouse").to_string(), "marriage:spouse");
        assert_eq!(Label::new("person").to_string(), "person");
    }

    #[test]
    fn test_concept_map_lookup() {
        let person = Type {
            label: Label::new("person"),
            encoding: TypeEncoding::EntityType,
            is_root: false,
            is_abstract: false,
        };
        let mut map = HashMap::new();
        map.insert("t".to_string(), Concept::Type(person.clone()));
        let answer = ConceptMap::new(map);

        assert_eq!(answer.get("t").and_then(Concept::as_type), Some(&person));
        assert!(answer.get("x").is_none());
        assert_eq!(answer.len(), 1);
    }
}

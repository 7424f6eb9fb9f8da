//! Schema descriptors: classes, attributes and relationships.
//!
//! Descriptors are immutable after a backend load. The facade caches them
//! per class in two variants (direct-only and all-inherited) and invalidates
//! those caches on unload and abort.

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Primitive type enums
// ============================================================================

/// Primitive attribute types supported by the data model.
///
/// The four string-tagged subtypes (date, time, enumeration literal, class
/// reference) are carried as strings on the wire but keep their own tag so
/// backends can validate and encode them properly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeType {
    Bool,
    S8,
    U8,
    S16,
    U16,
    S32,
    U32,
    S64,
    U64,
    Float,
    Double,
    Date,
    Time,
    String,
    Enum,
    Class,
}

impl AttributeType {
    /// Short label used in schema export ("bool", "s32", "enum", ...).
    pub fn label(self) -> &'static str {
        match self {
            AttributeType::Bool => "bool",
            AttributeType::S8 => "s8",
            AttributeType::U8 => "u8",
            AttributeType::S16 => "s16",
            AttributeType::U16 => "u16",
            AttributeType::S32 => "s32",
            AttributeType::U32 => "u32",
            AttributeType::S64 => "s64",
            AttributeType::U64 => "u64",
            AttributeType::Float => "float",
            AttributeType::Double => "double",
            AttributeType::Date => "date",
            AttributeType::Time => "time",
            AttributeType::String => "string",
            AttributeType::Enum => "enum",
            AttributeType::Class => "class",
        }
    }

    /// Human-readable description used in pretty printing.
    pub fn describe(self) -> &'static str {
        match self {
            AttributeType::Bool => "boolean",
            AttributeType::S8 => "8-bits signed integer",
            AttributeType::U8 => "8-bits unsigned integer",
            AttributeType::S16 => "16-bits signed integer",
            AttributeType::U16 => "16-bits unsigned integer",
            AttributeType::S32 => "32-bits signed integer",
            AttributeType::U32 => "32-bits unsigned integer",
            AttributeType::S64 => "64-bits signed integer",
            AttributeType::U64 => "64-bits unsigned integer",
            AttributeType::Float => "float",
            AttributeType::Double => "double",
            AttributeType::Date => "date",
            AttributeType::Time => "time",
            AttributeType::String => "string",
            AttributeType::Enum => "enumeration",
            AttributeType::Class => "class reference",
        }
    }

    /// True for the eight integer types.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            AttributeType::S8
                | AttributeType::U8
                | AttributeType::S16
                | AttributeType::U16
                | AttributeType::S32
                | AttributeType::U32
                | AttributeType::S64
                | AttributeType::U64
        )
    }

    /// True for the types carried as strings (string and its tagged subtypes).
    pub fn is_string_like(self) -> bool {
        matches!(
            self,
            AttributeType::String
                | AttributeType::Enum
                | AttributeType::Date
                | AttributeType::Time
                | AttributeType::Class
        )
    }
}

/// Integer formatting hint. Only affects pretty printing, never values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntFormat {
    Octal,
    Decimal,
    Hex,
    NotApplicable,
}

impl IntFormat {
    pub fn label(self) -> &'static str {
        match self {
            IntFormat::Octal => "octal",
            IntFormat::Decimal => "decimal",
            IntFormat::Hex => "hexadecimal",
            IntFormat::NotApplicable => "not applicable",
        }
    }
}

/// Relationship multiplicity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    ZeroOrOne,
    ZeroOrMany,
    OnlyOne,
    OneOrMany,
}

impl Cardinality {
    pub fn label(self) -> &'static str {
        match self {
            Cardinality::ZeroOrOne => "zero or one",
            Cardinality::ZeroOrMany => "zero or many",
            Cardinality::OnlyOne => "one",
            Cardinality::OneOrMany => "one or many",
        }
    }

    /// True when the relationship holds a vector of objects.
    pub fn is_multiple(self) -> bool {
        matches!(self, Cardinality::ZeroOrMany | Cardinality::OneOrMany)
    }

    /// True when the relationship may be empty.
    pub fn can_be_null(self) -> bool {
        matches!(self, Cardinality::ZeroOrOne | Cardinality::ZeroOrMany)
    }
}

// ============================================================================
// Descriptors
// ============================================================================

/// Description of one attribute of a class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeInfo {
    pub name: String,
    pub attr_type: AttributeType,
    /// Backend-defined range expression ("1..16", "A,B,C"); empty when open.
    pub range: String,
    pub int_format: IntFormat,
    pub is_not_null: bool,
    pub is_multi_value: bool,
    /// Default value literal; empty means the type's zero value.
    pub default_value: String,
    pub description: String,
}

impl AttributeInfo {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        AttributeInfo {
            name: name.into(),
            attr_type,
            range: String::new(),
            int_format: if attr_type.is_integer() {
                IntFormat::Decimal
            } else {
                IntFormat::NotApplicable
            },
            is_not_null: false,
            is_multi_value: false,
            default_value: String::new(),
            description: String::new(),
        }
    }

    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.range = range.into();
        self
    }

    pub fn with_format(mut self, format: IntFormat) -> Self {
        self.int_format = format;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.is_not_null = true;
        self
    }

    pub fn multi_value(mut self) -> Self {
        self.is_multi_value = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = value.into();
        self
    }

    pub fn with_description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }
}

impl fmt::Display for AttributeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "attribute '{}'", self.name)?;
        writeln!(f, "  type: '{}'", self.attr_type.describe())?;
        writeln!(f, "  range: '{}'", self.range)?;
        if self.int_format != IntFormat::NotApplicable {
            writeln!(f, "  integer format: '{}'", self.int_format.label())?;
        }
        writeln!(f, "  is not null: {}", yes_no(self.is_not_null))?;
        writeln!(f, "  is multi-value: {}", yes_no(self.is_multi_value))?;
        writeln!(f, "  default value: '{}'", self.default_value)?;
        write!(f, "  description: '{}'", self.description)
    }
}

/// Description of one relationship of a class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipInfo {
    pub name: String,
    /// Name of the referenced class.
    pub class_type: String,
    pub cardinality: Cardinality,
    /// Composite ownership: deleting the source cascades to the target.
    pub is_aggregation: bool,
    pub description: String,
}

impl RelationshipInfo {
    /// Build a relationship; the cardinality is derived from the
    /// nullability and multiplicity flags.
    pub fn new(
        name: impl Into<String>,
        class_type: impl Into<String>,
        can_be_null: bool,
        is_multi_value: bool,
        is_aggregation: bool,
        description: impl Into<String>,
    ) -> Self {
        let cardinality = match (can_be_null, is_multi_value) {
            (true, false) => Cardinality::ZeroOrOne,
            (true, true) => Cardinality::ZeroOrMany,
            (false, true) => Cardinality::OneOrMany,
            (false, false) => Cardinality::OnlyOne,
        };
        RelationshipInfo {
            name: name.into(),
            class_type: class_type.into(),
            cardinality,
            is_aggregation,
            description: description.into(),
        }
    }
}

impl fmt::Display for RelationshipInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "relationship '{}'", self.name)?;
        writeln!(f, "  class type: '{}'", self.class_type)?;
        writeln!(f, "  cardinality: '{}'", self.cardinality.label())?;
        writeln!(f, "  is aggregation: '{}'", yes_no(self.is_aggregation))?;
        write!(f, "  description: '{}'", self.description)
    }
}

/// Description of one class.
///
/// `superclasses` holds direct superclass names in the direct-only variant
/// and the full transitive list in the all-inherited variant returned by
/// class-info queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassInfo {
    pub name: String,
    pub description: String,
    pub is_abstract: bool,
    pub superclasses: Vec<String>,
    pub attributes: Vec<AttributeInfo>,
    pub relationships: Vec<RelationshipInfo>,
}

impl ClassInfo {
    pub fn new(name: impl Into<String>) -> Self {
        ClassInfo {
            name: name.into(),
            description: String::new(),
            is_abstract: false,
            superclasses: Vec::new(),
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn abstract_class(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn with_description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    pub fn with_superclass(mut self, name: impl Into<String>) -> Self {
        self.superclasses.push(name.into());
        self
    }

    pub fn with_attribute(mut self, attribute: AttributeInfo) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn with_relationship(mut self, relationship: RelationshipInfo) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Find an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&AttributeInfo> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Find a relationship by name.
    pub fn relationship(&self, name: &str) -> Option<&RelationshipInfo> {
        self.relationships.iter().find(|r| r.name == name)
    }
}

impl fmt::Display for ClassInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "class '{}'", self.name)?;
        writeln!(f, "  is abstract: '{}'", yes_no(self.is_abstract))?;
        writeln!(f, "  description: '{}'", self.description)?;
        if self.superclasses.is_empty() {
            writeln!(f, "  there are no superclasses")?;
        } else {
            writeln!(f, "  {} superclass(es):", self.superclasses.len())?;
            for name in &self.superclasses {
                writeln!(f, "    '{}'", name)?;
            }
        }
        if self.attributes.is_empty() {
            writeln!(f, "  there are no attributes")?;
        } else {
            writeln!(f, "  {} attribute(s):", self.attributes.len())?;
            for attribute in &self.attributes {
                for line in attribute.to_string().lines() {
                    writeln!(f, "    {}", line)?;
                }
            }
        }
        if self.relationships.is_empty() {
            writeln!(f, "  there are no relationships")?;
        } else {
            writeln!(f, "  {} relationship(s):", self.relationships.len())?;
            for relationship in &self.relationships {
                for line in relationship.to_string().lines() {
                    writeln!(f, "    {}", line)?;
                }
            }
        }
        Ok(())
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cardinality_derivation() {
        let r = RelationshipInfo::new("a", "C", true, false, false, "");
        assert_eq!(r.cardinality, Cardinality::ZeroOrOne);
        let r = RelationshipInfo::new("a", "C", true, true, false, "");
        assert_eq!(r.cardinality, Cardinality::ZeroOrMany);
        let r = RelationshipInfo::new("a", "C", false, true, false, "");
        assert_eq!(r.cardinality, Cardinality::OneOrMany);
        let r = RelationshipInfo::new("a", "C", false, false, false, "");
        assert_eq!(r.cardinality, Cardinality::OnlyOne);
    }

    #[test]
    fn test_attribute_defaults() {
        let a = AttributeInfo::new("count", AttributeType::U32);
        assert_eq!(a.int_format, IntFormat::Decimal);
        assert!(!a.is_multi_value);
        let a = AttributeInfo::new("label", AttributeType::String);
        assert_eq!(a.int_format, IntFormat::NotApplicable);
    }

    #[test]
    fn test_class_lookup_helpers() {
        let c = ClassInfo::new("Dummy")
            .with_attribute(AttributeInfo::new("string", AttributeType::String))
            .with_relationship(RelationshipInfo::new("Seconds", "Second", true, true, false, ""));
        assert!(c.attribute("string").is_some());
        assert!(c.attribute("missing").is_none());
        assert!(c.relationship("Seconds").is_some());
    }

    #[test]
    fn test_display_mentions_inheritance() {
        let c = ClassInfo::new("Second").with_superclass("Dummy");
        let text = c.to_string();
        assert!(text.contains("1 superclass(es):"));
        assert!(text.contains("'Dummy'"));
    }
}

//! Typed attribute values and relationship references.
//!
//! Attribute data crosses the backend boundary as [`Value`] payloads; the
//! typed getter/setter surface of [`crate::ConfigObject`] converts between
//! native Rust types and scalars through the [`AttributeValue`] trait, so a
//! schema mismatch is detected as a conversion failure rather than silently
//! reinterpreted.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::schema::AttributeType;

// ============================================================================
// Scalars
// ============================================================================

/// One primitive value, tagged with its schema type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Bool(bool),
    S8(i8),
    U8(u8),
    S16(i16),
    U16(u16),
    S32(i32),
    U32(u32),
    S64(i64),
    U64(u64),
    Float(f32),
    Double(f64),
    String(String),
    Enum(String),
    Date(String),
    Time(String),
    Class(String),
}

impl Scalar {
    /// The schema type this scalar carries.
    pub fn attr_type(&self) -> AttributeType {
        match self {
            Scalar::Bool(_) => AttributeType::Bool,
            Scalar::S8(_) => AttributeType::S8,
            Scalar::U8(_) => AttributeType::U8,
            Scalar::S16(_) => AttributeType::S16,
            Scalar::U16(_) => AttributeType::U16,
            Scalar::S32(_) => AttributeType::S32,
            Scalar::U32(_) => AttributeType::U32,
            Scalar::S64(_) => AttributeType::S64,
            Scalar::U64(_) => AttributeType::U64,
            Scalar::Float(_) => AttributeType::Float,
            Scalar::Double(_) => AttributeType::Double,
            Scalar::String(_) => AttributeType::String,
            Scalar::Enum(_) => AttributeType::Enum,
            Scalar::Date(_) => AttributeType::Date,
            Scalar::Time(_) => AttributeType::Time,
            Scalar::Class(_) => AttributeType::Class,
        }
    }

    /// Zero value for a schema type ("" for string-like types).
    pub fn zero(attr_type: AttributeType) -> Scalar {
        match attr_type {
            AttributeType::Bool => Scalar::Bool(false),
            AttributeType::S8 => Scalar::S8(0),
            AttributeType::U8 => Scalar::U8(0),
            AttributeType::S16 => Scalar::S16(0),
            AttributeType::U16 => Scalar::U16(0),
            AttributeType::S32 => Scalar::S32(0),
            AttributeType::U32 => Scalar::U32(0),
            AttributeType::S64 => Scalar::S64(0),
            AttributeType::U64 => Scalar::U64(0),
            AttributeType::Float => Scalar::Float(0.0),
            AttributeType::Double => Scalar::Double(0.0),
            AttributeType::String => Scalar::String(String::new()),
            AttributeType::Enum => Scalar::Enum(String::new()),
            AttributeType::Date => Scalar::Date(String::new()),
            AttributeType::Time => Scalar::Time(String::new()),
            AttributeType::Class => Scalar::Class(String::new()),
        }
    }

    /// Parse a literal into a scalar of the given type.
    ///
    /// Used for schema default values. An empty literal yields the zero
    /// value; a malformed literal is an error, never a silent zero.
    pub fn parse(attr_type: AttributeType, text: &str) -> crate::Result<Scalar> {
        use crate::ConfigError;
        if text.is_empty() {
            return Ok(Scalar::zero(attr_type));
        }
        let bad = || {
            ConfigError::generic(format!(
                "cannot parse '{}' as {}",
                text,
                attr_type.describe()
            ))
        };
        Ok(match attr_type {
            AttributeType::Bool => Scalar::Bool(matches!(text, "1" | "true" | "yes")),
            AttributeType::S8 => Scalar::S8(text.parse().map_err(|_| bad())?),
            AttributeType::U8 => Scalar::U8(text.parse().map_err(|_| bad())?),
            AttributeType::S16 => Scalar::S16(text.parse().map_err(|_| bad())?),
            AttributeType::U16 => Scalar::U16(text.parse().map_err(|_| bad())?),
            AttributeType::S32 => Scalar::S32(text.parse().map_err(|_| bad())?),
            AttributeType::U32 => Scalar::U32(text.parse().map_err(|_| bad())?),
            AttributeType::S64 => Scalar::S64(text.parse().map_err(|_| bad())?),
            AttributeType::U64 => Scalar::U64(text.parse().map_err(|_| bad())?),
            AttributeType::Float => Scalar::Float(text.parse().map_err(|_| bad())?),
            AttributeType::Double => Scalar::Double(text.parse().map_err(|_| bad())?),
            AttributeType::String => Scalar::String(text.to_string()),
            AttributeType::Enum => Scalar::Enum(text.to_string()),
            AttributeType::Date => Scalar::Date(text.to_string()),
            AttributeType::Time => Scalar::Time(text.to_string()),
            AttributeType::Class => Scalar::Class(text.to_string()),
        })
    }

    /// Convert to a JSON value for the export tree.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Scalar::Bool(v) => J::Bool(*v),
            Scalar::S8(v) => J::from(*v),
            Scalar::U8(v) => J::from(*v),
            Scalar::S16(v) => J::from(*v),
            Scalar::U16(v) => J::from(*v),
            Scalar::S32(v) => J::from(*v),
            Scalar::U32(v) => J::from(*v),
            Scalar::S64(v) => J::from(*v),
            Scalar::U64(v) => J::from(*v),
            Scalar::Float(v) => serde_json::Number::from_f64(f64::from(*v))
                .map(J::Number)
                .unwrap_or(J::Null),
            Scalar::Double(v) => serde_json::Number::from_f64(*v)
                .map(J::Number)
                .unwrap_or(J::Null),
            Scalar::String(v)
            | Scalar::Enum(v)
            | Scalar::Date(v)
            | Scalar::Time(v)
            | Scalar::Class(v) => J::String(v.clone()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(v) => write!(f, "{}", v),
            Scalar::S8(v) => write!(f, "{}", v),
            Scalar::U8(v) => write!(f, "{}", v),
            Scalar::S16(v) => write!(f, "{}", v),
            Scalar::U16(v) => write!(f, "{}", v),
            Scalar::S32(v) => write!(f, "{}", v),
            Scalar::U32(v) => write!(f, "{}", v),
            Scalar::S64(v) => write!(f, "{}", v),
            Scalar::U64(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Double(v) => write!(f, "{}", v),
            Scalar::String(v)
            | Scalar::Enum(v)
            | Scalar::Date(v)
            | Scalar::Time(v)
            | Scalar::Class(v) => f.write_str(v),
        }
    }
}

/// An attribute value: one scalar or a vector of scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Single(Scalar),
    Vector(Vec<Scalar>),
}

impl Value {
    pub fn is_vector(&self) -> bool {
        matches!(self, Value::Vector(_))
    }
}

// ============================================================================
// Relationship references
// ============================================================================

/// Reference to an object by its exact class and UID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub class_name: String,
    pub id: String,
}

impl ObjectRef {
    pub fn new(class_name: impl Into<String>, id: impl Into<String>) -> Self {
        ObjectRef {
            class_name: class_name.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.class_name)
    }
}

/// A relationship value: one optional reference or a vector of references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelValue {
    Single(Option<ObjectRef>),
    Multiple(Vec<ObjectRef>),
}

// ============================================================================
// Typed conversion
// ============================================================================

/// Native Rust types that map onto attribute scalars.
///
/// `String` additionally accepts the string-tagged subtypes (enumeration,
/// date, time, class reference), mirroring how string getters read them.
pub trait AttributeValue: Sized {
    const TYPE: AttributeType;

    fn into_scalar(self) -> Scalar;
    fn from_scalar(scalar: &Scalar) -> Option<Self>;
}

macro_rules! impl_attribute_value {
    ($ty:ty, $variant:ident, $attr:expr) => {
        impl AttributeValue for $ty {
            const TYPE: AttributeType = $attr;

            fn into_scalar(self) -> Scalar {
                Scalar::$variant(self)
            }

            fn from_scalar(scalar: &Scalar) -> Option<Self> {
                match scalar {
                    Scalar::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }
    };
}

impl_attribute_value!(bool, Bool, AttributeType::Bool);
impl_attribute_value!(i8, S8, AttributeType::S8);
impl_attribute_value!(u8, U8, AttributeType::U8);
impl_attribute_value!(i16, S16, AttributeType::S16);
impl_attribute_value!(u16, U16, AttributeType::U16);
impl_attribute_value!(i32, S32, AttributeType::S32);
impl_attribute_value!(u32, U32, AttributeType::U32);
impl_attribute_value!(i64, S64, AttributeType::S64);
impl_attribute_value!(u64, U64, AttributeType::U64);
impl_attribute_value!(f32, Float, AttributeType::Float);
impl_attribute_value!(f64, Double, AttributeType::Double);

impl AttributeValue for String {
    const TYPE: AttributeType = AttributeType::String;

    fn into_scalar(self) -> Scalar {
        Scalar::String(self)
    }

    fn from_scalar(scalar: &Scalar) -> Option<Self> {
        match scalar {
            Scalar::String(v)
            | Scalar::Enum(v)
            | Scalar::Date(v)
            | Scalar::Time(v)
            | Scalar::Class(v) => Some(v.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_roundtrip_every_numeric() {
        assert_eq!(i32::from_scalar(&2147483647i32.into_scalar()), Some(2147483647));
        assert_eq!(u64::from_scalar(&u64::MAX.into_scalar()), Some(u64::MAX));
        assert_eq!(i8::from_scalar(&(-5i8).into_scalar()), Some(-5));
        assert_eq!(f64::from_scalar(&1.5f64.into_scalar()), Some(1.5));
    }

    #[test]
    fn test_type_mismatch_rejected() {
        assert_eq!(i32::from_scalar(&Scalar::U32(1)), None);
        assert_eq!(bool::from_scalar(&Scalar::String("true".into())), None);
    }

    #[test]
    fn test_string_reads_tagged_subtypes() {
        assert_eq!(
            String::from_scalar(&Scalar::Enum("ON".into())),
            Some("ON".to_string())
        );
        assert_eq!(
            String::from_scalar(&Scalar::Date("2024-01-01".into())),
            Some("2024-01-01".to_string())
        );
        assert_eq!(String::from_scalar(&Scalar::S32(1)), None);
    }

    #[test]
    fn test_parse_defaults() {
        assert_eq!(
            Scalar::parse(AttributeType::S32, "").unwrap(),
            Scalar::S32(0)
        );
        assert_eq!(
            Scalar::parse(AttributeType::S32, "42").unwrap(),
            Scalar::S32(42)
        );
        assert_eq!(
            Scalar::parse(AttributeType::Bool, "true").unwrap(),
            Scalar::Bool(true)
        );
        assert!(Scalar::parse(AttributeType::U8, "300").is_err());
    }

    #[test]
    fn test_to_json_preserves_numbers() {
        assert_eq!(Scalar::S32(2147483647).to_json(), serde_json::json!(2147483647));
        assert_eq!(
            Scalar::String("hi".into()).to_json(),
            serde_json::json!("hi")
        );
    }
}

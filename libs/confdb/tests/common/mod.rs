//! Shared fixture: a schema with one base class and two subclasses, loaded
//! into a fresh in-memory database per test.

use std::sync::Once;

use confdb::backend::memory;
use confdb::schema::{AttributeInfo, AttributeType, ClassInfo, IntFormat, RelationshipInfo};
use confdb::Configuration;

static TRACING: Once = Once::new();

pub fn schema_classes() -> Vec<ClassInfo> {
    vec![
        ClassInfo::new("Dummy")
            .with_description("base test class")
            .with_attribute(AttributeInfo::new("bool", AttributeType::Bool))
            .with_attribute(AttributeInfo::new("sint8", AttributeType::S8))
            .with_attribute(AttributeInfo::new("uint8", AttributeType::U8))
            .with_attribute(AttributeInfo::new("sint16", AttributeType::S16))
            .with_attribute(AttributeInfo::new("uint16", AttributeType::U16))
            .with_attribute(
                AttributeInfo::new("sint32", AttributeType::S32).with_format(IntFormat::Hex),
            )
            .with_attribute(AttributeInfo::new("uint32", AttributeType::U32))
            .with_attribute(AttributeInfo::new("sint64", AttributeType::S64))
            .with_attribute(AttributeInfo::new("uint64", AttributeType::U64))
            .with_attribute(AttributeInfo::new("float", AttributeType::Float))
            .with_attribute(AttributeInfo::new("double", AttributeType::Double))
            .with_attribute(AttributeInfo::new("string", AttributeType::String))
            .with_attribute(
                AttributeInfo::new("enum", AttributeType::Enum).with_range("FIRST,SECOND"),
            )
            .with_attribute(AttributeInfo::new("date", AttributeType::Date))
            .with_attribute(AttributeInfo::new("time", AttributeType::Time))
            .with_attribute(AttributeInfo::new("strings", AttributeType::String).multi_value())
            .with_attribute(AttributeInfo::new("numbers", AttributeType::S32).multi_value())
            .with_attribute(
                AttributeInfo::new("with_default", AttributeType::S16).with_default("16"),
            ),
        ClassInfo::new("Second").with_superclass("Dummy"),
        ClassInfo::new("Third")
            .with_superclass("Dummy")
            .with_relationship(RelationshipInfo::new(
                "Seconds", "Second", true, true, false, "referenced seconds",
            ))
            .with_relationship(RelationshipInfo::new(
                "Peer", "Second", true, false, false, "plain reference",
            ))
            .with_relationship(RelationshipInfo::new(
                "Another", "Third", true, false, true, "composite child",
            )),
    ]
}

/// Install the fixture schema and create a writable data database, both
/// named after `test_name` so parallel tests never collide.
pub fn setup(test_name: &str) -> Configuration {
    TRACING.call_once(|| {
        if std::env::var_os("RUST_LOG").is_some() {
            tracing_subscriber::fmt().try_init().ok();
        }
    });
    let schema_name = format!("{}.schema", test_name);
    let data = data_name(test_name);
    memory::install_schema(&schema_name, schema_classes()).expect("install fixture schema");
    let db = Configuration::new("memory").expect("create configuration");
    db.create_db(&data, &[schema_name]).expect("create data database");
    db
}

pub fn data_name(test_name: &str) -> String {
    format!("{}.data", test_name)
}

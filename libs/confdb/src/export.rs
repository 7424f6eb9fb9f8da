//! Bulk export of schema and data into structured property trees.
//!
//! Both exports walk classes in sorted order, apply optional regular
//! expression filters and build `serde_json` trees that downstream text
//! writers turn into concrete formats. Per-field read failures are captured
//! in place as diagnostic markers so an export never aborts midway.

use regex::Regex;
use serde_json::{json, Map, Value as Json};

use crate::config::Configuration;
use crate::error::{ConfigError, Result};
use crate::object::ConfigObject;
use crate::schema::{AttributeInfo, AttributeType, IntFormat};
use crate::value::AttributeValue;

fn build_regex(pattern: &str, what: &str) -> Result<Option<Regex>> {
    if pattern.is_empty() {
        return Ok(None);
    }
    Regex::new(pattern).map(Some).map_err(|e| {
        ConfigError::generic(format!(
            "failed to create {} regex \"{}\": {}",
            what, pattern, e
        ))
    })
}

fn matches(filter: &Option<Regex>, text: &str) -> bool {
    filter.as_ref().map_or(true, |regex| regex.is_match(text))
}

fn sorted_classes(conf: &Configuration, filter: &Option<Regex>) -> Vec<String> {
    let mut classes: Vec<String> = conf
        .superclasses()
        .into_keys()
        .filter(|class| matches(filter, class))
        .collect();
    classes.sort();
    classes
}

// ============================================================================
// Schema export
// ============================================================================

/// Export class descriptions matching `classes_filter` (empty matches all).
///
/// Per class: `abstract`, `description?`, `superclasses[]`,
/// `attributes{name -> {...}}` and `relationships{name -> {...}}`.
pub(crate) fn export_schema(
    conf: &Configuration,
    classes_filter: &str,
    direct_only: bool,
) -> Result<Json> {
    let filter = build_regex(classes_filter, "classes")?;
    let mut tree = Map::new();

    for class in sorted_classes(conf, &filter) {
        let info = conf.get_class_info(&class, direct_only)?;
        let mut class_tree = Map::new();
        class_tree.insert("abstract".to_string(), json!(info.is_abstract));
        if !info.description.is_empty() {
            class_tree.insert("description".to_string(), json!(info.description));
        }
        if !info.superclasses.is_empty() {
            class_tree.insert("superclasses".to_string(), json!(info.superclasses));
        }

        if !info.attributes.is_empty() {
            let mut attributes = Map::new();
            for attribute in &info.attributes {
                let mut node = Map::new();
                node.insert("type".to_string(), json!(attribute.attr_type.label()));
                if !attribute.range.is_empty() {
                    node.insert("range".to_string(), json!(attribute.range));
                }
                if attribute.int_format != IntFormat::NotApplicable {
                    node.insert("format".to_string(), json!(attribute.int_format.label()));
                }
                if attribute.is_not_null {
                    node.insert("is-not-null".to_string(), json!(true));
                }
                if attribute.is_multi_value {
                    node.insert("is-multi-value".to_string(), json!(true));
                }
                if !attribute.default_value.is_empty() {
                    node.insert("default-value".to_string(), json!(attribute.default_value));
                }
                if !attribute.description.is_empty() {
                    node.insert("description".to_string(), json!(attribute.description));
                }
                attributes.insert(attribute.name.clone(), Json::Object(node));
            }
            class_tree.insert("attributes".to_string(), Json::Object(attributes));
        }

        if !info.relationships.is_empty() {
            let mut relationships = Map::new();
            for relationship in &info.relationships {
                let mut node = Map::new();
                node.insert("type".to_string(), json!(relationship.class_type));
                node.insert(
                    "cardinality".to_string(),
                    json!(relationship.cardinality.label()),
                );
                if relationship.is_aggregation {
                    node.insert("is-aggregation".to_string(), json!(true));
                }
                if !relationship.description.is_empty() {
                    node.insert("description".to_string(), json!(relationship.description));
                }
                relationships.insert(relationship.name.clone(), Json::Object(node));
            }
            class_tree.insert("relationships".to_string(), Json::Object(relationships));
        }

        tree.insert(class, Json::Object(class_tree));
    }
    Ok(Json::Object(tree))
}

// ============================================================================
// Data export
// ============================================================================

/// Export object data. Classes, object UIDs and source files may each be
/// restricted by a regular expression (empty matches all). Empty multi-value
/// fields are encoded as `[empty_array_item]` when the sentinel is
/// non-empty; downstream writers strip or transform it.
pub(crate) fn export_data(
    conf: &Configuration,
    classes_filter: &str,
    objects_filter: &str,
    files_filter: &str,
    empty_array_item: &str,
) -> Result<Json> {
    let class_regex = build_regex(classes_filter, "classes")?;
    let object_regex = build_regex(objects_filter, "objects")?;
    let file_regex = build_regex(files_filter, "files")?;
    let mut tree = Map::new();

    for class in sorted_classes(conf, &class_regex) {
        let info = conf.get_class_info(&class, false)?;
        let mut objects: Vec<ConfigObject> = Vec::new();
        for object in conf.get_objects(&class, "")? {
            // Subclass instances are exported under their own class.
            if object.class_name_opt().map(|c| c.as_str().to_string()) != Some(class.clone()) {
                continue;
            }
            let uid = match object.uid_opt() {
                Some(uid) => uid,
                None => continue,
            };
            if !matches(&object_regex, &uid) {
                continue;
            }
            if file_regex.is_some() {
                match object.contained_in() {
                    Ok(file) if matches(&file_regex, &file) => {}
                    _ => continue,
                }
            }
            objects.push(object);
        }
        if objects.is_empty() {
            continue;
        }
        objects.sort_by_key(|o| o.uid_opt().unwrap_or_default());

        let mut class_tree = Map::new();
        for object in &objects {
            let mut node = Map::new();
            for attribute in &info.attributes {
                node.insert(
                    attribute.name.clone(),
                    attribute_json(object, attribute, empty_array_item),
                );
            }
            for relationship in &info.relationships {
                let value = if relationship.cardinality.is_multiple() {
                    match object.get_objs(&relationship.name) {
                        Ok(targets) if targets.is_empty() && !empty_array_item.is_empty() => {
                            json!([empty_array_item])
                        }
                        Ok(targets) => {
                            let names: Vec<String> = targets
                                .iter()
                                .map(|t| t.full_name().unwrap_or_default())
                                .collect();
                            json!(names)
                        }
                        Err(e) => diagnostic(&relationship.name, &e),
                    }
                } else {
                    match object.get_obj(&relationship.name) {
                        Ok(target) if target.is_null() => json!(""),
                        Ok(target) => json!(target.full_name().unwrap_or_default()),
                        Err(e) => diagnostic(&relationship.name, &e),
                    }
                };
                node.insert(relationship.name.clone(), value);
            }
            let uid = object.uid_opt().unwrap_or_default();
            class_tree.insert(uid, Json::Object(node));
        }
        tree.insert(class, Json::Object(class_tree));
    }
    Ok(Json::Object(tree))
}

fn diagnostic(field: &str, error: &ConfigError) -> Json {
    json!(format!(
        "[bad_object] (could not get value of '{}': {})",
        field, error
    ))
}

fn attribute_json(object: &ConfigObject, attribute: &AttributeInfo, sentinel: &str) -> Json {
    match attribute.attr_type {
        AttributeType::Bool => typed_json::<bool>(object, attribute, sentinel),
        AttributeType::S8 => typed_json::<i8>(object, attribute, sentinel),
        AttributeType::U8 => typed_json::<u8>(object, attribute, sentinel),
        AttributeType::S16 => typed_json::<i16>(object, attribute, sentinel),
        AttributeType::U16 => typed_json::<u16>(object, attribute, sentinel),
        AttributeType::S32 => typed_json::<i32>(object, attribute, sentinel),
        AttributeType::U32 => typed_json::<u32>(object, attribute, sentinel),
        AttributeType::S64 => typed_json::<i64>(object, attribute, sentinel),
        AttributeType::U64 => typed_json::<u64>(object, attribute, sentinel),
        AttributeType::Float => typed_json::<f32>(object, attribute, sentinel),
        AttributeType::Double => typed_json::<f64>(object, attribute, sentinel),
        AttributeType::String
        | AttributeType::Enum
        | AttributeType::Date
        | AttributeType::Time
        | AttributeType::Class => typed_json::<String>(object, attribute, sentinel),
    }
}

fn typed_json<T: AttributeValue + serde::Serialize>(
    object: &ConfigObject,
    attribute: &AttributeInfo,
    sentinel: &str,
) -> Json {
    if attribute.is_multi_value {
        match object.get_vec::<T>(&attribute.name) {
            Ok(values) if values.is_empty() && !sentinel.is_empty() => json!([sentinel]),
            Ok(values) => json!(values),
            Err(e) => diagnostic(&attribute.name, &e),
        }
    } else {
        match object.get_val::<T>(&attribute.name) {
            Ok(value) => json!(value),
            Err(e) => diagnostic(&attribute.name, &e),
        }
    }
}

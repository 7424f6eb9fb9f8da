//! Schema and data export integration tests.

mod common;

use serde_json::json;

#[test]
fn test_schema_export_structure() {
    let db = common::setup("exp_schema");
    let tree = db.export_schema("", false).unwrap();

    let dummy = &tree["Dummy"];
    assert_eq!(dummy["abstract"], json!(false));
    assert_eq!(dummy["description"], json!("base test class"));
    assert_eq!(dummy["attributes"]["sint32"]["type"], json!("s32"));
    assert_eq!(dummy["attributes"]["sint32"]["format"], json!("hexadecimal"));
    assert_eq!(dummy["attributes"]["strings"]["is-multi-value"], json!(true));
    assert_eq!(dummy["attributes"]["with_default"]["default-value"], json!("16"));
    assert_eq!(dummy["attributes"]["enum"]["range"], json!("FIRST,SECOND"));

    let second = &tree["Second"];
    assert_eq!(second["superclasses"], json!(["Dummy"]));
    // The all-inherited variant carries the base attributes.
    assert_eq!(second["attributes"]["string"]["type"], json!("string"));

    let third = &tree["Third"];
    assert_eq!(
        third["relationships"]["Seconds"]["cardinality"],
        json!("zero or many")
    );
    assert_eq!(third["relationships"]["Seconds"]["type"], json!("Second"));
    assert_eq!(third["relationships"]["Another"]["is-aggregation"], json!(true));
    assert!(third["relationships"]["Peer"].get("is-aggregation").is_none());
}

#[test]
fn test_schema_export_direct_only() {
    let db = common::setup("exp_direct");
    let tree = db.export_schema("", true).unwrap();

    // Second declares nothing of its own beyond the superclass link.
    let second = &tree["Second"];
    assert_eq!(second["superclasses"], json!(["Dummy"]));
    assert!(second.get("attributes").is_none());
}

#[test]
fn test_schema_export_class_filter() {
    let db = common::setup("exp_filter");
    let tree = db.export_schema("^Th.*$", false).unwrap();
    let classes: Vec<&String> = tree.as_object().unwrap().keys().collect();
    assert_eq!(classes, ["Third"]);

    assert!(db.export_schema("[invalid", false).is_err());
}

#[test]
fn test_data_export_values_and_sentinel() {
    let db = common::setup("exp_data");
    let data = common::data_name("exp_data");

    let second = db.create(&data, "Second", "#s").unwrap();
    second.set_val("sint32", 2147483647i32).unwrap();
    second.set_val("string", "hello".to_string()).unwrap();
    second
        .set_vec("strings", vec!["one".to_string(), "two".to_string()])
        .unwrap();

    let third = db.create(&data, "Third", "#t").unwrap();
    third.set_objs("Seconds", &[second.clone()]).unwrap();

    let tree = db.export_data("", "", "", "-nil-").unwrap();

    let exported = &tree["Second"]["#s"];
    assert_eq!(exported["sint32"], json!(2147483647));
    assert_eq!(exported["string"], json!("hello"));
    assert_eq!(exported["strings"], json!(["one", "two"]));
    // An empty multi-value is encoded with the caller's sentinel.
    assert_eq!(exported["numbers"], json!(["-nil-"]));

    let exported_third = &tree["Third"]["#t"];
    assert_eq!(exported_third["Seconds"], json!(["#s@Second"]));
    // Cleared single relationship encodes as the empty string.
    assert_eq!(exported_third["Peer"], json!(""));

    // Subclass instances appear under their own class only.
    assert!(tree["Dummy"].get("#s").is_none());
}

#[test]
fn test_data_export_object_filter() {
    let db = common::setup("exp_objfilter");
    let data = common::data_name("exp_objfilter");
    db.create(&data, "Dummy", "#keep").unwrap();
    db.create(&data, "Dummy", "#drop").unwrap();

    let tree = db.export_data("", "^#keep$", "", "").unwrap();
    let dummies = tree["Dummy"].as_object().unwrap();
    assert!(dummies.contains_key("#keep"));
    assert!(!dummies.contains_key("#drop"));
}

#[test]
fn test_data_export_never_aborts_on_bad_field() {
    let db = common::setup("exp_badfield");
    let data = common::data_name("exp_badfield");
    let third = db.create(&data, "Third", "#t").unwrap();

    // Point the relationship at an object, then bypass coherence by
    // destroying the target: the stale handle in the relationship is
    // scrubbed, but a read of a deleted holder must still be captured.
    let second = db.create(&data, "Second", "#s").unwrap();
    third.set_obj("Peer", Some(&second)).unwrap();
    db.destroy(&second).unwrap();

    let tree = db.export_data("^Third$", "", "", "").unwrap();
    // The destroyed target was scrubbed from the relationship, so the
    // field exports as cleared rather than failing.
    assert_eq!(tree["Third"]["#t"]["Peer"], json!(""));
}

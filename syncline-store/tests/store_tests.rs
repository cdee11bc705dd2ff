use pretty_assertions::assert_eq;
use serde_json::json;
use syncline_store::{ClassSpec, ObjectStore, RelEndDef, RelationshipSpec, StoreError};
use syncline_types::{ClassId, RelDirection, RelStrength};

fn test_store() -> (ObjectStore, ClassId, ClassId, ClassId) {
    let store = ObjectStore::open_in_memory().unwrap();
    let class = store
        .register_class(ClassSpec::new("TestSchema", "TestClass").property("Name"))
        .unwrap();
    let derived = store
        .register_class(ClassSpec::new("TestSchema", "DerivedClass").base(class))
        .unwrap();
    let rel = store
        .register_relationship_class(RelationshipSpec::new(
            "TestSchema",
            "TestRel",
            RelStrength::Holding,
        ))
        .unwrap();
    (store, class, derived, rel)
}

// ── Class registry ──────────────────────────────────────────────

#[test]
fn register_and_resolve_class() {
    let (store, class, _, _) = test_store();
    let def = store.class(class).unwrap();
    assert_eq!(def.full_name(), "TestSchema.TestClass");
    assert!(!def.is_relationship());
    assert_eq!(store.find_class("TestSchema.TestClass").unwrap().id, class);
}

#[test]
fn unknown_class_is_an_error() {
    let (store, _, _, _) = test_store();
    assert!(matches!(
        store.class(ClassId::from_raw(9999)),
        Err(StoreError::UnknownClass(_))
    ));
}

#[test]
fn polymorphism_follows_base_links() {
    let (store, class, derived, _) = test_store();
    assert!(store.is_or_derives_from(derived, class));
    assert!(store.is_or_derives_from(class, class));
    assert!(!store.is_or_derives_from(class, derived));
}

#[test]
fn class_ids_are_stable_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    let first = ObjectStore::open(&path).unwrap();
    let id = first
        .register_class(ClassSpec::new("TestSchema", "TestClass"))
        .unwrap();
    drop(first);

    let second = ObjectStore::open(&path).unwrap();
    let id_again = second
        .register_class(ClassSpec::new("TestSchema", "TestClass"))
        .unwrap();
    assert_eq!(id, id_again);
}

// ── Instance CRUD ───────────────────────────────────────────────

#[test]
fn insert_read_update_instance() {
    let (store, class, _, _) = test_store();
    let key = store.insert_instance(class, &json!({"Name": "A"})).unwrap();
    assert_eq!(store.read_instance(key).unwrap().unwrap()["Name"], "A");

    store.update_instance(key, &json!({"Name": "B"})).unwrap();
    assert_eq!(store.read_instance(key).unwrap().unwrap()["Name"], "B");
}

#[test]
fn update_missing_instance_is_not_found() {
    let (store, class, _, _) = test_store();
    let key = store.insert_instance(class, &json!({})).unwrap();
    store.delete_instance(key).unwrap();
    assert!(matches!(
        store.update_instance(key, &json!({})),
        Err(StoreError::NotFound(_))
    ));
}

#[test]
fn insert_instance_with_relationship_class_is_rejected() {
    let (store, _, _, rel) = test_store();
    assert!(matches!(
        store.insert_instance(rel, &json!({})),
        Err(StoreError::SchemaViolation(_))
    ));
}

#[test]
fn count_and_enumerate_instances() {
    let (store, class, _, _) = test_store();
    let a = store.insert_instance(class, &json!({})).unwrap();
    let b = store.insert_instance(class, &json!({})).unwrap();
    assert_eq!(store.count_instances(class).unwrap(), 2);
    assert_eq!(store.instances_of(class).unwrap(), vec![a, b]);
}

// ── Relationships ───────────────────────────────────────────────

#[test]
fn insert_and_find_relationship() {
    let (store, class, _, rel) = test_store();
    let a = store.insert_instance(class, &json!({})).unwrap();
    let b = store.insert_instance(class, &json!({})).unwrap();
    let key = store.insert_relationship(rel, a, b, &json!({})).unwrap();

    let row = store.find_relationship(rel, a, b).unwrap().unwrap();
    assert_eq!(row.key, key);
    assert_eq!(row.source, a);
    assert_eq!(row.target, b);
    assert!(store.find_relationship(rel, b, a).unwrap().is_none());
}

#[test]
fn duplicate_relationship_is_a_constraint_violation() {
    let (store, class, _, rel) = test_store();
    let a = store.insert_instance(class, &json!({})).unwrap();
    let b = store.insert_instance(class, &json!({})).unwrap();
    store.insert_relationship(rel, a, b, &json!({})).unwrap();
    assert!(matches!(
        store.insert_relationship(rel, a, b, &json!({})),
        Err(StoreError::Constraint(_))
    ));
}

#[test]
fn relationship_with_missing_endpoint_is_rejected() {
    let (store, class, _, rel) = test_store();
    let a = store.insert_instance(class, &json!({})).unwrap();
    let ghost = store.insert_instance(class, &json!({})).unwrap();
    store.delete_instance(ghost).unwrap();
    assert!(matches!(
        store.insert_relationship(rel, a, ghost, &json!({})),
        Err(StoreError::SchemaViolation(_))
    ));
}

#[test]
fn constrained_end_accepts_derived_classes() {
    let store = ObjectStore::open_in_memory().unwrap();
    let class = store
        .register_class(ClassSpec::new("TestSchema", "TestClass"))
        .unwrap();
    let derived = store
        .register_class(ClassSpec::new("TestSchema", "DerivedClass").base(class))
        .unwrap();
    let other = store
        .register_class(ClassSpec::new("TestSchema", "Other"))
        .unwrap();
    let rel = store
        .register_relationship_class(
            RelationshipSpec::new("TestSchema", "Typed", RelStrength::Holding)
                .source(RelEndDef::of(class))
                .target(RelEndDef::of(class)),
        )
        .unwrap();

    let a = store.insert_instance(derived, &json!({})).unwrap();
    let b = store.insert_instance(class, &json!({})).unwrap();
    let c = store.insert_instance(other, &json!({})).unwrap();

    assert!(store.insert_relationship(rel, a, b, &json!({})).is_ok());
    assert!(matches!(
        store.insert_relationship(rel, b, c, &json!({})),
        Err(StoreError::SchemaViolation(_))
    ));
}

#[test]
fn enumerate_relationships_by_direction() {
    let (store, class, _, rel) = test_store();
    let a = store.insert_instance(class, &json!({})).unwrap();
    let b = store.insert_instance(class, &json!({})).unwrap();
    let c = store.insert_instance(class, &json!({})).unwrap();
    store.insert_relationship(rel, a, b, &json!({})).unwrap();
    store.insert_relationship(rel, c, a, &json!({})).unwrap();

    let forward = store.relationships_of(a, Some(RelDirection::Forward)).unwrap();
    assert_eq!(forward.len(), 1);
    assert_eq!(forward[0].target, b);

    let backward = store.relationships_of(a, Some(RelDirection::Backward)).unwrap();
    assert_eq!(backward.len(), 1);
    assert_eq!(backward[0].source, c);

    assert_eq!(store.relationships_of(a, None).unwrap().len(), 2);
}

#[test]
fn delete_instance_removes_touching_edges_and_reports_them() {
    let (store, class, _, rel) = test_store();
    let a = store.insert_instance(class, &json!({})).unwrap();
    let b = store.insert_instance(class, &json!({})).unwrap();
    let c = store.insert_instance(class, &json!({})).unwrap();
    store.insert_relationship(rel, a, b, &json!({})).unwrap();
    store.insert_relationship(rel, c, a, &json!({})).unwrap();

    let removed = store.delete_instance(a).unwrap();
    assert_eq!(removed.len(), 2);
    assert!(!store.instance_exists(a).unwrap());
    assert!(store.relationships_of(b, None).unwrap().is_empty());
    assert!(store.relationships_of(c, None).unwrap().is_empty());
}

#[test]
fn delete_relationship_returns_the_row() {
    let (store, class, _, rel) = test_store();
    let a = store.insert_instance(class, &json!({})).unwrap();
    let b = store.insert_instance(class, &json!({})).unwrap();
    let key = store.insert_relationship(rel, a, b, &json!({})).unwrap();

    let row = store.delete_relationship(key).unwrap().unwrap();
    assert_eq!(row.target, b);
    assert!(store.delete_relationship(key).unwrap().is_none());
}

// ── Sequences and units of work ─────────────────────────────────

#[test]
fn sequences_are_monotonic_and_independent() {
    let (store, _, _, _) = test_store();
    assert_eq!(store.next_sequence("change").unwrap(), 1);
    assert_eq!(store.next_sequence("change").unwrap(), 2);
    assert_eq!(store.next_sequence("filedir").unwrap(), 1);
    assert_eq!(store.next_sequence("change").unwrap(), 3);
}

#[test]
fn unit_of_work_rolls_back_on_error() {
    let (store, class, _, _) = test_store();
    let result: Result<(), StoreError> = store.unit_of_work(|| {
        store.insert_instance(class, &json!({}))?;
        Err(StoreError::Constraint("forced".into()))
    });
    assert!(result.is_err());
    assert_eq!(store.count_instances(class).unwrap(), 0);

    store
        .unit_of_work(|| store.insert_instance(class, &json!({})).map(|_| ()))
        .unwrap();
    assert_eq!(store.count_instances(class).unwrap(), 1);
}

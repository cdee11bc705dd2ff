mod common;

use common::{test_cache, TEST_ROOT};
use pretty_assertions::assert_eq;
use serde_json::json;
use syncline_types::RootPersistence;

#[test]
fn find_or_create_root_is_idempotent() {
    let t = test_cache();
    let first = t.cache.roots().find_or_create_root("MyRoot").unwrap();
    let second = t.cache.roots().find_or_create_root("MyRoot").unwrap();
    assert_eq!(first, second);

    let other = t.cache.roots().find_or_create_root("OtherRoot").unwrap();
    assert_ne!(first, other);
}

#[test]
fn root_exists_does_not_create() {
    let t = test_cache();
    assert!(!t.cache.roots().root_exists("Nope").unwrap());
    assert!(!t.cache.roots().root_exists("Nope").unwrap());
    t.cache.roots().find_or_create_root("Yes").unwrap();
    assert!(t.cache.roots().root_exists("Yes").unwrap());
}

#[test]
fn link_and_unlink_instance() {
    let t = test_cache();
    let key = t.stub_instance("Foo", json!({}));
    assert!(t.cache.roots().is_instance_in_root(TEST_ROOT, key).unwrap());

    t.cache.roots().unlink_instance_from_root(TEST_ROOT, key).unwrap();
    assert!(!t.cache.roots().is_instance_in_root(TEST_ROOT, key).unwrap());
    // Nothing held it any more.
    assert_eq!(t.cache.count_instances(t.class).unwrap(), 0);
}

#[test]
fn unlink_keeps_instances_linked_to_another_root() {
    let t = test_cache();
    let key = t.stub_instance("Foo", json!({}));
    t.cache
        .roots()
        .link_existing_instance_to_root("Backup", key, true)
        .unwrap();

    t.cache.roots().unlink_instance_from_root(TEST_ROOT, key).unwrap();
    assert!(t.cache.store().instance_exists(key).unwrap());
    assert!(t.cache.roots().is_instance_in_root("Backup", key).unwrap());
}

#[test]
fn unlink_from_unknown_root_succeeds_and_keeps_the_instance() {
    let t = test_cache();
    let key = t.stub_instance("Foo", json!({}));
    t.cache.roots().unlink_instance_from_root("Nope", key).unwrap();
    assert!(t.cache.store().instance_exists(key).unwrap());
}

#[test]
fn remove_root_removes_solely_held_instances() {
    let t = test_cache();
    let key = t.stub_instance("Foo", json!({}));
    t.cache.roots().remove_root(TEST_ROOT).unwrap();
    assert!(!t.cache.roots().root_exists(TEST_ROOT).unwrap());
    assert!(!t.cache.store().instance_exists(key).unwrap());
}

#[test]
fn remove_root_removes_weakly_linked_instances() {
    let t = test_cache();
    let key = t.cache.cache_object(&t.object_id("Foo"), json!({}), None).unwrap();
    t.cache
        .roots()
        .link_existing_instance_to_root("WeakRoot", key.instance, false)
        .unwrap();

    t.cache.roots().remove_root("WeakRoot").unwrap();
    assert!(!t.cache.store().instance_exists(key.instance).unwrap());
}

#[test]
fn remove_root_keeps_instances_in_other_roots() {
    let t = test_cache();
    let key = t.stub_instance("Foo", json!({}));
    t.cache
        .roots()
        .link_existing_instance_to_root("Second", key, true)
        .unwrap();

    t.cache.roots().remove_root(TEST_ROOT).unwrap();
    assert!(t.cache.store().instance_exists(key).unwrap());
}

#[test]
fn remove_roots_by_prefix_targets_only_matching_roots() {
    let t = test_cache();
    let temp_a = t.cache.cache_object(&t.object_id("A"), json!({}), None).unwrap();
    let temp_b = t.cache.cache_object(&t.object_id("B"), json!({}), None).unwrap();
    let kept = t.stub_instance("Kept", json!({}));
    t.cache
        .roots()
        .link_existing_instance_to_root("Temp-1", temp_a.instance, true)
        .unwrap();
    t.cache
        .roots()
        .link_existing_instance_to_root("Temp-2", temp_b.instance, true)
        .unwrap();

    t.cache.roots().remove_roots_by_prefix("Temp-").unwrap();

    assert!(!t.cache.roots().root_exists("Temp-1").unwrap());
    assert!(!t.cache.roots().root_exists("Temp-2").unwrap());
    assert!(!t.cache.store().instance_exists(temp_a.instance).unwrap());
    assert!(!t.cache.store().instance_exists(temp_b.instance).unwrap());
    assert!(t.cache.store().instance_exists(kept).unwrap());
}

#[test]
fn rename_root_moves_links() {
    let t = test_cache();
    let key = t.stub_instance("Foo", json!({}));
    t.cache.roots().rename_root(TEST_ROOT, "Renamed").unwrap();
    assert!(!t.cache.roots().root_exists(TEST_ROOT).unwrap());
    assert!(t.cache.roots().is_instance_in_root("Renamed", key).unwrap());
}

#[test]
fn rename_root_onto_an_existing_root_is_refused() {
    let t = test_cache();
    t.cache.roots().find_or_create_root("A").unwrap();
    t.cache.roots().find_or_create_root("B").unwrap();
    assert!(t.cache.roots().rename_root("A", "B").is_err());
}

#[test]
fn renaming_a_missing_root_creates_the_target() {
    let t = test_cache();
    t.cache.roots().rename_root("Nope", "Created").unwrap();
    assert!(t.cache.roots().root_exists("Created").unwrap());
}

#[test]
fn copy_root_relationships_reparents_all_links() {
    let t = test_cache();
    let from = t.stub_instance("From", json!({}));
    t.cache
        .roots()
        .link_existing_instance_to_root("Second", from, false)
        .unwrap();
    let to = t.stub_instance("To", json!({}));

    t.cache.roots().copy_root_relationships(from, to).unwrap();
    assert!(t.cache.roots().is_instance_in_root(TEST_ROOT, to).unwrap());
    assert!(t.cache.roots().is_instance_in_root("Second", to).unwrap());
    // Originals stay until the old instance is deleted.
    assert!(t.cache.roots().is_instance_in_root(TEST_ROOT, from).unwrap());
}

#[test]
fn root_persistence_is_recorded() {
    let t = test_cache();
    t.cache
        .roots()
        .setup_root("Scratch", RootPersistence::Temporary)
        .unwrap();
    assert_eq!(
        t.cache.roots().root_persistence("Scratch").unwrap(),
        Some(RootPersistence::Temporary)
    );
    assert_eq!(
        t.cache.roots().temporary_roots().unwrap(),
        vec!["Scratch".to_owned()]
    );
}

#[test]
fn reachability_is_bounded_by_depth() {
    let t = test_cache();
    let a = t.stub_instance("A", json!({}));
    let b = t.cache.cache_object(&t.object_id("B"), json!({}), None).unwrap();
    let c = t.cache.cache_object(&t.object_id("C"), json!({}), None).unwrap();
    t.cache.hierarchy().relate(a, b.instance, t.rel).unwrap();
    t.cache.hierarchy().relate(b.instance, c.instance, t.rel).unwrap();

    let direct = t
        .cache
        .roots()
        .get_instances_connected_to_roots(&[TEST_ROOT], 0)
        .unwrap();
    assert_eq!(direct, vec![a]);

    let one_deep = t
        .cache
        .roots()
        .get_instances_connected_to_roots(&[TEST_ROOT], 1)
        .unwrap();
    assert!(one_deep.contains(&a) && one_deep.contains(&b.instance));
    assert!(!one_deep.contains(&c.instance));

    let two_deep = t
        .cache
        .roots()
        .get_instances_connected_to_roots(&[TEST_ROOT], 2)
        .unwrap();
    assert_eq!(two_deep.len(), 3);
}

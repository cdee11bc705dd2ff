mod common;

use common::test_cache;
use pretty_assertions::assert_eq;
use serde_json::json;
use syncline_types::FileLocation;

#[test]
fn cache_file_places_the_file_under_the_requested_root() {
    let t = test_cache();
    let key = t.stub_instance("Foo", json!({}));
    t.cache
        .cache_file(key, &t.stub_file("data"), Some("ETag-1"), FileLocation::Temporary, false)
        .unwrap();

    let path = t.cache.read_file_path(key).unwrap().unwrap();
    assert!(path.starts_with(t.base().join("temporary")));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "data");
    assert_eq!(
        t.cache.read_file_cache_tag(key).unwrap().as_deref(),
        Some("ETag-1")
    );
    assert_eq!(
        t.cache.file_cache_location(key).unwrap(),
        FileLocation::Temporary
    );
}

#[test]
fn cache_file_for_an_unknown_owner_is_refused() {
    let t = test_cache();
    let key = t.stub_instance("Foo", json!({}));
    t.cache.change_manager().delete_object(key).unwrap();
    assert!(t
        .cache
        .cache_file(key, &t.stub_file("data"), None, FileLocation::Temporary, false)
        .is_err());
}

#[test]
fn numbered_directories_bound_fan_out() {
    let t = test_cache();
    let a = t.stub_instance("A", json!({}));
    let b = t.stub_instance("B", json!({}));
    t.cache
        .cache_file(a, &t.stub_file("a"), None, FileLocation::Temporary, false)
        .unwrap();
    t.cache
        .cache_file(b, &t.stub_file("b"), None, FileLocation::Temporary, false)
        .unwrap();

    let dir_a = t.cache.read_file_path(a).unwrap().unwrap().parent().unwrap().to_owned();
    let dir_b = t.cache.read_file_path(b).unwrap().unwrap().parent().unwrap().to_owned();
    // Each attachment gets its own numbered directory.
    assert_ne!(dir_a, dir_b);
}

#[test]
fn replacing_within_the_same_class_keeps_the_directory() {
    let t = test_cache();
    let key = t.stub_instance("Foo", json!({}));
    t.cache
        .cache_file(key, &t.stub_file("v1"), None, FileLocation::Temporary, false)
        .unwrap();
    let first = t.cache.read_file_path(key).unwrap().unwrap();

    t.cache
        .cache_file(key, &t.stub_file("v2"), None, FileLocation::Temporary, false)
        .unwrap();
    let second = t.cache.read_file_path(key).unwrap().unwrap();

    assert_eq!(first.parent(), second.parent());
    assert_eq!(std::fs::read_to_string(&second).unwrap(), "v2");
    // The replaced file is gone.
    assert!(!first.exists());
}

#[test]
fn storing_a_file_onto_itself_is_a_no_op() {
    let t = test_cache();
    let key = t.stub_instance("Foo", json!({}));
    t.cache
        .cache_file(key, &t.stub_file("data"), None, FileLocation::Temporary, false)
        .unwrap();
    let path = t.cache.read_file_path(key).unwrap().unwrap();

    // Re-store from the destination itself.
    t.cache
        .cache_file(key, &path, None, FileLocation::Auto, false)
        .unwrap();
    let after = t.cache.read_file_path(key).unwrap().unwrap();
    assert_eq!(path, after);
    assert_eq!(std::fs::read_to_string(&after).unwrap(), "data");
}

#[test]
fn failed_replace_restores_the_original_file() {
    let t = test_cache();
    let key = t.stub_instance("Foo", json!({}));
    let source = t.stub_file("original");
    let source_name = source.file_name().unwrap().to_owned();
    t.cache
        .cache_file(key, &source, None, FileLocation::Temporary, false)
        .unwrap();
    let stored = t.cache.read_file_path(key).unwrap().unwrap();

    // Same target file name, but the source no longer exists: the
    // replace fails mid-flight and must roll back.
    let missing = t.base().join("missing").join(source_name);
    let result = t
        .cache
        .cache_file(key, &missing, None, FileLocation::Temporary, false);

    assert!(result.is_err());
    assert!(stored.exists());
    assert_eq!(std::fs::read_to_string(&stored).unwrap(), "original");
    assert_eq!(t.cache.read_file_path(key).unwrap().unwrap(), stored);
}

#[test]
fn relocating_moves_the_file_between_roots() {
    let t = test_cache();
    let key = t.stub_instance("Foo", json!({}));
    t.cache
        .cache_file(key, &t.stub_file("data"), None, FileLocation::Temporary, false)
        .unwrap();
    let old = t.cache.read_file_path(key).unwrap().unwrap();

    t.cache
        .change_manager()
        .set_file_location(key, FileLocation::Persistent)
        .unwrap();

    let new = t.cache.read_file_path(key).unwrap().unwrap();
    assert!(new.starts_with(t.base().join("persistent")));
    assert_eq!(std::fs::read_to_string(&new).unwrap(), "data");
    assert!(!old.exists());
    // The vacated numbered directory was pruned.
    assert!(!old.parent().unwrap().exists());
    assert_eq!(
        t.cache.file_cache_location(key).unwrap(),
        FileLocation::Persistent
    );
}

#[test]
fn removing_the_owner_prunes_the_file_directory() {
    let t = test_cache();
    let key = t.stub_instance("Foo", json!({}));
    t.cache
        .cache_file(key, &t.stub_file("data"), None, FileLocation::Temporary, false)
        .unwrap();
    let path = t.cache.read_file_path(key).unwrap().unwrap();

    t.cache.hierarchy().delete_instance(key).unwrap();
    assert!(!path.exists());
    assert!(!path.parent().unwrap().exists());
    // The storage root itself stays.
    assert!(t.base().join("temporary").exists());
}

#[test]
fn missing_file_reads_as_absent() {
    let t = test_cache();
    let key = t.stub_instance("Foo", json!({}));
    t.cache
        .cache_file(key, &t.stub_file("data"), Some("ETag-1"), FileLocation::Temporary, false)
        .unwrap();
    let path = t.cache.read_file_path(key).unwrap().unwrap();
    std::fs::remove_file(&path).unwrap();

    assert!(t.cache.read_file_path(key).unwrap().is_none());
    assert!(t.cache.read_file_cache_tag(key).unwrap().is_none());
}

#[test]
fn unknown_owner_defaults_to_temporary_location() {
    let t = test_cache();
    let key = t.stub_instance("Foo", json!({}));
    assert_eq!(
        t.cache.file_cache_location(key).unwrap(),
        FileLocation::Temporary
    );
}

#[test]
fn external_metadata_rides_on_the_file_record() {
    let t = test_cache();
    let key = t.stub_instance("Foo", json!({}));
    // No file record yet.
    assert!(t
        .cache
        .set_file_external_metadata(key, Some(json!({"checksum": "abc"})))
        .is_err());

    t.cache
        .cache_file(key, &t.stub_file("data"), None, FileLocation::Temporary, false)
        .unwrap();
    t.cache
        .set_file_external_metadata(key, Some(json!({"checksum": "abc"})))
        .unwrap();
    let info = t.cache.file_infos().read_by_owner(key).unwrap();
    assert_eq!(info.external_metadata, Some(json!({"checksum": "abc"})));
}

#[test]
fn cache_file_records_update_dates() {
    let t = test_cache();
    let key = t.stub_instance("Foo", json!({}));
    t.cache
        .cache_file(key, &t.stub_file("data"), None, FileLocation::Temporary, false)
        .unwrap();
    let info = t.cache.file_infos().read_by_owner(key).unwrap();
    assert!(info.cache_date.is_some());
    assert!(info.updated_at.is_some());
}

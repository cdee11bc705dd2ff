mod common;

use common::test_cache;
use pretty_assertions::assert_eq;
use serde_json::json;
use syncline_types::SyncStatus;

#[test]
fn save_page_records_tag_and_membership() {
    let t = test_cache();
    let a = t.stub_instance("A", json!({}));
    let b = t.stub_instance("B", json!({}));
    t.cache
        .responses()
        .save_page("Query", 0, Some("Tag0"), &[a, b], &[])
        .unwrap();

    assert!(t.cache.responses().is_response_cached("Query").unwrap());
    assert_eq!(
        t.cache.responses().read_page_tag("Query", 0).unwrap().as_deref(),
        Some("Tag0")
    );
    assert!(t.cache.responses().read_page_date("Query", 0).unwrap().is_some());
    let keys = t.cache.responses().read_response_instance_keys("Query").unwrap();
    assert!(keys.contains(&a) && keys.contains(&b));
}

#[test]
fn unknown_responses_read_as_absent() {
    let t = test_cache();
    assert!(!t.cache.responses().is_response_cached("Nope").unwrap());
    assert!(t.cache.responses().read_page_tag("Nope", 0).unwrap().is_none());
    assert!(t
        .cache
        .responses()
        .read_response_instance_keys("Nope")
        .unwrap()
        .is_empty());
}

#[test]
fn pages_are_tagged_independently() {
    let t = test_cache();
    let a = t.stub_instance("A", json!({}));
    let b = t.stub_instance("B", json!({}));
    t.cache.responses().save_page("Query", 0, Some("Tag0"), &[a], &[]).unwrap();
    t.cache.responses().save_page("Query", 1, Some("Tag1"), &[b], &[]).unwrap();

    assert_eq!(
        t.cache.responses().read_page_tag("Query", 0).unwrap().as_deref(),
        Some("Tag0")
    );
    assert_eq!(
        t.cache.responses().read_page_tag("Query", 1).unwrap().as_deref(),
        Some("Tag1")
    );
    assert_eq!(t.cache.responses().page_indexes("Query").unwrap(), vec![0, 1]);
}

#[test]
fn saving_a_page_again_replaces_its_membership() {
    let t = test_cache();
    let a = t.stub_instance("A", json!({}));
    let b = t.stub_instance("B", json!({}));
    t.cache.responses().save_page("Query", 0, Some("Tag0"), &[a], &[]).unwrap();
    t.cache.responses().save_page("Query", 0, Some("Tag1"), &[b], &[]).unwrap();

    let keys = t.cache.responses().read_response_instance_keys("Query").unwrap();
    assert!(!keys.contains(&a));
    assert!(keys.contains(&b));
    assert_eq!(
        t.cache.responses().read_page_tag("Query", 0).unwrap().as_deref(),
        Some("Tag1")
    );
}

#[test]
fn page_membership_keeps_results_alive() {
    let t = test_cache();
    let loose = t.cache.cache_object(&t.object_id("Loose"), json!({}), None).unwrap();
    t.cache
        .responses()
        .save_page("Query", 0, None, &[loose.instance], &[])
        .unwrap();

    assert!(!t
        .cache
        .hierarchy()
        .check_and_cleanup_hierarchy(loose.instance)
        .unwrap());
    assert!(t.cache.store().instance_exists(loose.instance).unwrap());
}

#[test]
fn replaced_members_without_other_holders_are_collected() {
    let t = test_cache();
    let dropped = t.cache.cache_object(&t.object_id("Dropped"), json!({}), None).unwrap();
    let added = t.stub_instance("Added", json!({}));
    t.cache
        .responses()
        .save_page("Query", 0, None, &[dropped.instance], &[])
        .unwrap();
    t.cache.responses().save_page("Query", 0, None, &[added], &[]).unwrap();

    assert!(!t.cache.store().instance_exists(dropped.instance).unwrap());
    assert!(t.cache.store().instance_exists(added).unwrap());
}

#[test]
fn trim_pages_discards_trailing_pages() {
    let t = test_cache();
    let a = t.stub_instance("A", json!({}));
    let b = t.stub_instance("B", json!({}));
    let c = t.stub_instance("C", json!({}));
    t.cache.responses().save_page("Query", 0, Some("T0"), &[a], &[]).unwrap();
    t.cache.responses().save_page("Query", 1, Some("T1"), &[b], &[]).unwrap();
    t.cache.responses().save_page("Query", 2, Some("T2"), &[c], &[]).unwrap();

    t.cache.responses().trim_pages("Query", 0).unwrap();

    assert_eq!(t.cache.responses().page_indexes("Query").unwrap(), vec![0]);
    let keys = t.cache.responses().read_response_instance_keys("Query").unwrap();
    assert!(keys.contains(&a));
    assert!(!keys.contains(&b));
    assert!(!keys.contains(&c));
}

#[test]
fn invalidation_clears_exactly_the_pages_containing_the_instance() {
    let t = test_cache();
    let a = t.stub_instance("A", json!({}));
    let b = t.stub_instance("B", json!({}));
    t.cache.responses().save_page("Query", 0, Some("Tag0"), &[a], &[]).unwrap();
    t.cache.responses().save_page("Query", 1, Some("Tag1"), &[b], &[]).unwrap();
    t.cache.responses().save_page("Other", 0, Some("TagX"), &[b], &[]).unwrap();

    t.cache.responses().invalidate_pages_containing_instance(b).unwrap();

    assert_eq!(
        t.cache.responses().read_page_tag("Query", 0).unwrap().as_deref(),
        Some("Tag0")
    );
    assert!(t.cache.responses().read_page_tag("Query", 1).unwrap().is_none());
    assert!(t.cache.responses().read_page_tag("Other", 0).unwrap().is_none());
}

#[test]
fn deleting_a_result_instance_invalidates_its_pages() {
    let t = test_cache();
    let a = t.stub_instance("A", json!({}));
    t.cache.responses().save_page("Query", 0, Some("Tag0"), &[a], &[]).unwrap();

    t.cache.roots().unlink_instance_from_root(common::TEST_ROOT, a).unwrap();
    // Still held by the page; now delete it outright.
    t.cache.hierarchy().delete_instance(a).unwrap();

    assert!(t.cache.responses().read_page_tag("Query", 0).unwrap().is_none());
}

#[test]
fn relationship_results_are_tracked_and_invalidated() {
    let t = test_cache();
    let a = t.stub_instance("A", json!({}));
    let b = t.stub_instance("B", json!({}));
    let rel = t
        .cache
        .change_manager()
        .create_relationship(t.rel, a, b, SyncStatus::READY)
        .unwrap();
    t.cache
        .responses()
        .save_page("Query", 0, Some("Tag0"), &[a, b], &[rel.instance])
        .unwrap();

    let keys = t.cache.responses().read_response_instance_keys("Query").unwrap();
    assert!(keys.contains(&rel.instance));

    t.cache
        .responses()
        .invalidate_pages_containing_instance(rel.instance)
        .unwrap();
    assert!(t.cache.responses().read_page_tag("Query", 0).unwrap().is_none());
}

#[test]
fn additional_instances_ride_along_without_touching_page_tags() {
    let t = test_cache();
    let a = t.stub_instance("A", json!({}));
    let extra = t.stub_instance("Extra", json!({}));
    t.cache.responses().save_page("Query", 0, Some("Tag0"), &[a], &[]).unwrap();

    t.cache.responses().add_additional_instance("Query", extra).unwrap();
    let keys = t.cache.responses().read_response_instance_keys("Query").unwrap();
    assert!(keys.contains(&extra));
    assert_eq!(
        t.cache.responses().read_page_tag("Query", 0).unwrap().as_deref(),
        Some("Tag0")
    );

    assert!(t.cache.responses().remove_additional_instance("Query", extra).unwrap());
    assert!(!t.cache.responses().remove_additional_instance("Query", extra).unwrap());
}

#[test]
fn remove_response_releases_solely_held_results() {
    let t = test_cache();
    let loose = t.cache.cache_object(&t.object_id("Loose"), json!({}), None).unwrap();
    let held = t.stub_instance("Held", json!({}));
    t.cache
        .responses()
        .save_page("Query", 0, None, &[loose.instance, held], &[])
        .unwrap();

    t.cache.responses().remove_response("Query").unwrap();

    assert!(!t.cache.responses().is_response_cached("Query").unwrap());
    assert!(!t.cache.store().instance_exists(loose.instance).unwrap());
    assert!(t.cache.store().instance_exists(held).unwrap());
}

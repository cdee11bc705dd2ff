//! Shared fixture for cache integration tests: an in-memory cache with a
//! small registered test schema and stubbing helpers.

#![allow(dead_code)]

use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Once;
use syncline_cache::{Cache, CacheConfig};
use syncline_store::{ClassSpec, RelEndDef, RelationshipSpec};
use syncline_types::{ClassId, InstanceKey, ObjectId, RelStrength};
use tempfile::TempDir;

pub const TEST_ROOT: &str = "TestRoot";

pub struct TestCache {
    pub cache: Cache,
    pub class: ClassId,
    pub derived: ClassId,
    pub rel: ClassId,
    pub derived_rel: ClassId,
    pub weak_rel: ClassId,
    pub one_target_rel: ClassId,
    dir: TempDir,
}

impl TestCache {
    pub fn base(&self) -> &std::path::Path {
        self.dir.path()
    }

    pub fn object_id(&self, remote_id: &str) -> ObjectId {
        ObjectId::new(self.class, remote_id)
    }

    /// Caches a NoChange instance and links it under the test root, the
    /// way fetched server data would arrive.
    pub fn stub_instance(&self, remote_id: &str, properties: Value) -> InstanceKey {
        self.cache
            .cache_object_and_link_to_root(
                TEST_ROOT,
                &self.object_id(remote_id),
                properties,
                None,
                true,
            )
            .unwrap()
            .instance
    }

    /// Creates a pending local object.
    pub fn stub_created_object(&self, properties: Value) -> InstanceKey {
        self.cache
            .change_manager()
            .create_object(self.class, properties, syncline_types::SyncStatus::READY)
            .unwrap()
            .instance
    }

    /// Writes a unique scratch file with the given content.
    pub fn stub_file(&self, content: &str) -> PathBuf {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = self.dir.path().join(format!("source-{n}.txt"));
        std::fs::write(&path, content).unwrap();
        path
    }
}

pub fn test_cache() -> TestCache {
    // RUST_LOG=debug surfaces cache tracing in test output.
    static TRACING: Once = Once::new();
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });

    let dir = TempDir::new().unwrap();
    let cache = Cache::open(&CacheConfig::in_memory(dir.path())).unwrap();

    let class = cache
        .store()
        .register_class(
            ClassSpec::new("TestSchema", "TestClass")
                .property("TestProperty")
                .property("TestProperty2")
                .property("TestProperty3")
                .read_only_property("FileSize"),
        )
        .unwrap();
    let derived = cache
        .store()
        .register_class(ClassSpec::new("TestSchema", "DerivedClass").base(class))
        .unwrap();
    let rel = cache
        .store()
        .register_relationship_class(RelationshipSpec::new(
            "TestSchema",
            "TestRelationshipClass",
            RelStrength::Holding,
        ))
        .unwrap();
    let derived_rel = cache
        .store()
        .register_relationship_class(
            RelationshipSpec::new("TestSchema", "DerivedRelationshipClass", RelStrength::Holding)
                .base(rel),
        )
        .unwrap();
    let weak_rel = cache
        .store()
        .register_relationship_class(RelationshipSpec::new(
            "TestSchema",
            "WeakRelationshipClass",
            RelStrength::Weak,
        ))
        .unwrap();
    let one_target_rel = cache
        .store()
        .register_relationship_class(
            RelationshipSpec::new("TestSchema", "OneTargetRelationshipClass", RelStrength::Holding)
                .target(RelEndDef::any().at_most_one()),
        )
        .unwrap();

    TestCache {
        cache,
        class,
        derived,
        rel,
        derived_rel,
        weak_rel,
        one_target_rel,
        dir,
    }
}

use pretty_assertions::assert_eq;
use syncline_types::{
    is_local_id, new_local_id, ChangeInfo, ChangeStatus, ClassId, InstanceId, InstanceKey,
    ObjectId, RelStrength, SyncStatus,
};

#[test]
fn instance_key_orders_structurally() {
    let a = InstanceKey::new(ClassId::from_raw(1), InstanceId::from_raw(2));
    let b = InstanceKey::new(ClassId::from_raw(1), InstanceId::from_raw(3));
    let c = InstanceKey::new(ClassId::from_raw(2), InstanceId::from_raw(1));
    assert!(a < b);
    assert!(b < c);
    assert_eq!(a, InstanceKey::new(ClassId::from_raw(1), InstanceId::from_raw(2)));
}

#[test]
fn ids_serialize_transparently() {
    let id = ClassId::from_raw(42);
    assert_eq!(serde_json::to_string(&id).unwrap(), "42");
    let back: ClassId = serde_json::from_str("42").unwrap();
    assert_eq!(back, id);
}

#[test]
fn object_id_with_placeholder_is_local() {
    let local = ObjectId::new(ClassId::from_raw(1), new_local_id());
    assert!(local.is_local());

    let remote = ObjectId::new(ClassId::from_raw(1), "SRV-1");
    assert!(!remote.is_local());
}

#[test]
fn local_id_prefix_is_recognizable() {
    let id = new_local_id();
    assert!(id.starts_with("LocalInstance-"));
    assert!(is_local_id(&id));
}

#[test]
fn change_info_defaults_to_unchanged() {
    let info = ChangeInfo::default();
    assert_eq!(info.status, ChangeStatus::NoChange);
    assert!(!info.is_changed());
    assert_eq!(info.sync_status, SyncStatus::READY);
}

#[test]
fn holding_and_embedding_hold_weak_does_not() {
    assert!(RelStrength::Holding.holds());
    assert!(RelStrength::Embedding.holds());
    assert!(!RelStrength::Weak.holds());
}

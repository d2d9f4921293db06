#![forbid(unsafe_code)]

use keel_core::{Delta, DeltaKind, Kind, ObjectKey, ReadCache};
use keel_store::{spawn_ingest, CacheBuilder};
use k8s_openapi::api::core::v1::ConfigMap;

fn obj(name: &str, ns: &str, v: &str) -> serde_json::Value {
    serde_json::json!({ "metadata": { "name": name, "namespace": ns }, "data": { "v": v } })
}

fn applied(kind: Kind, name: &str, v: &str) -> Delta {
    Delta { resource: kind, key: ObjectKey::namespaced("ns", name), kind: DeltaKind::Applied, raw: obj(name, "ns", v) }
}

#[test]
fn replay_basic_sequence() {
    let mut b = CacheBuilder::new();

    let deltas = vec![
        applied(Kind::ConfigMap, "a", "1"),
        applied(Kind::ConfigMap, "a", "1"),
        applied(Kind::ConfigMap, "b", "1"),
        applied(Kind::ConfigMap, "a", "2"),
        Delta {
            resource: Kind::ConfigMap,
            key: ObjectKey::namespaced("ns", "b"),
            kind: DeltaKind::Deleted,
            raw: serde_json::json!({}),
        },
    ];

    // Two batches, as the ingest loop would publish them
    b.apply(deltas[..2].to_vec());
    let snap1 = b.freeze();
    assert_eq!(snap1.epoch, 1);
    assert_eq!(snap1.len(), 1);

    b.apply(deltas[2..].to_vec());
    let snap2 = b.freeze();
    assert_eq!(snap2.epoch, 2);
    assert_eq!(snap2.len(), 1);
    let a = snap2.get(Kind::ConfigMap, &ObjectKey::namespaced("ns", "a")).unwrap();
    assert_eq!(a["data"]["v"], "2");

    // Earlier snapshots are immutable
    assert_eq!(snap1.get(Kind::ConfigMap, &ObjectKey::namespaced("ns", "a")).unwrap()["data"]["v"], "1");
}

#[tokio::test]
async fn ingest_publishes_typed_reads() {
    let (tx, cache) = spawn_ingest(64);
    tx.send(applied(Kind::ConfigMap, "a", "1")).await.unwrap();
    assert!(cache.wait_for_epoch(1).await);

    let key = ObjectKey::namespaced("ns", "a");
    let cm: Option<ConfigMap> = cache.cached(&key).await.unwrap();
    assert_eq!(cm.unwrap().data.unwrap()["v"], "1");
    let missing: Option<ConfigMap> = cache.cached(&ObjectKey::namespaced("ns", "zz")).await.unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn closing_the_channel_flushes_pending_deltas() {
    let (tx, cache) = spawn_ingest(8);
    tx.send(applied(Kind::ConfigMap, "a", "1")).await.unwrap();
    drop(tx);
    assert!(cache.wait_for_epoch(1).await);
    assert_eq!(cache.current().len(), 1);
}

#[test]
fn relist_purges_objects_deleted_during_watch_gap() {
    let mut b = CacheBuilder::new();
    b.apply(vec![applied(Kind::ConfigMap, "a", "1"), applied(Kind::ConfigMap, "b", "1"), applied(Kind::Secret, "a", "1")]);

    // "a" went away while the watch was down; "b" changed
    b.apply(vec![Delta::restarted(Kind::ConfigMap, vec![obj("b", "ns", "2")])]);
    let snap = b.freeze();
    assert!(snap.get(Kind::ConfigMap, &ObjectKey::namespaced("ns", "a")).is_none());
    assert_eq!(snap.get(Kind::ConfigMap, &ObjectKey::namespaced("ns", "b")).unwrap()["data"]["v"], "2");
    assert!(snap.get(Kind::Secret, &ObjectKey::namespaced("ns", "a")).is_some());
}

#[tokio::test]
async fn ingest_never_drops_deltas_past_capacity() {
    let (tx, cache) = spawn_ingest(2);
    for name in ["a", "b", "c", "d", "e"] {
        tx.send(applied(Kind::ConfigMap, name, "1")).await.unwrap();
    }
    drop(tx);
    let mut rx = cache.subscribe_epoch();
    while rx.changed().await.is_ok() {}
    assert_eq!(cache.current().len(), 5);
}

//! Version-aware reconnect: a stale peer gets a delta, not a snapshot

use folio_sync::{Repo, RepoConfig};
use folio_testkit::{eventually, init_tracing, settle, TransmissionRecorder};
use folio_transport::{bridge_pair, Adapter};
use serde_json::json;
use std::sync::Arc;
use yrs::Map;

#[tokio::test(flavor = "multi_thread")]
async fn reconnect_catches_up_with_an_update_smaller_than_a_snapshot() {
    init_tracing();
    let recorder = TransmissionRecorder::new();
    let (server_side, client_side) = bridge_pair();
    let server_adapter = Arc::new(server_side);
    let client_adapter = Arc::new(client_side);

    let mut server = Repo::new(
        RepoConfig::new()
            .with_name("server")
            .with_adapter(server_adapter.clone()),
    )
    .await
    .unwrap_or_else(|e| panic!("server failed: {e}"));
    let mut client = Repo::new(
        RepoConfig::new()
            .with_name("client")
            .with_adapter(client_adapter.clone())
            .with_middleware(recorder.clone()),
    )
    .await
    .unwrap_or_else(|e| panic!("client failed: {e}"));

    let server_doc = server.get("ledger");
    let map = server_doc.get_map("entries");
    server_doc.change(|txn| {
        map.insert(txn, "e1", "first");
    });

    let client_doc = client.get("ledger");
    eventually("client holds the first entry", || {
        client_doc.to_json()["entries"]["e1"] == json!("first")
    })
    .await;

    // drop the link, let both sides notice
    server_adapter.stop().await.unwrap();
    client_adapter.stop().await.unwrap();
    settle().await;

    // the server moves on while the client is away
    server_doc.change(|txn| {
        map.insert(txn, "e2", "second");
        map.insert(txn, "e3", "third");
    });

    let seen_before_reconnect = recorder.seen().len();
    let (server_side, client_side) = bridge_pair();
    server.add_adapter(Arc::new(server_side)).await.unwrap();
    client.add_adapter(Arc::new(client_side)).await.unwrap();

    eventually("client catches up after reconnect", || {
        client_doc.to_json()["entries"]["e3"] == json!("third")
    })
    .await;

    let snapshot_len = server_doc.doc().export(None).len();
    let all_traffic = recorder.seen();
    let reconnect_traffic = &all_traffic[seen_before_reconnect..];
    let deltas: Vec<_> = reconnect_traffic
        .iter()
        .filter(|t| t.kind == "update")
        .collect();
    assert!(
        !deltas.is_empty(),
        "reconnect must use an incremental update, saw {reconnect_traffic:?}"
    );
    assert!(
        reconnect_traffic.iter().all(|t| t.kind != "snapshot"),
        "a versioned requester must never be sent a snapshot"
    );
    for delta in deltas {
        let len = delta.data_len.unwrap_or(0);
        assert!(
            len < snapshot_len,
            "delta ({len} bytes) should undercut the snapshot ({snapshot_len} bytes)"
        );
    }
}

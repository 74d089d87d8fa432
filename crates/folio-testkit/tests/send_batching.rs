//! One dispatch cycle, one physical send per destination

use folio_core::{ProtocolMessage, VersionVector};
use folio_sync::{Repo, RepoConfig};
use folio_testkit::{eventually, init_tracing, settle, sync_response_kinds, CaptureAdapter};
use yrs::Map;

fn sync_request(doc: &str) -> ProtocolMessage {
    ProtocolMessage::SyncRequest {
        doc_id: doc.into(),
        requester_version: VersionVector::new(),
        bidirectional: false,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn batched_requests_yield_exactly_one_outbound_batch() {
    init_tracing();
    let capture = CaptureAdapter::new("fake-peer");
    let repo = Repo::new(RepoConfig::new().with_adapter(capture.clone()))
        .await
        .unwrap_or_else(|e| panic!("repo failed: {e}"));

    for name in ["d1", "d2", "d3"] {
        let doc = repo.get(name);
        let map = doc.get_map("root");
        doc.change(|txn| {
            map.insert(txn, "content", name);
        });
    }
    capture.establish().await;
    settle().await;
    capture.clear();

    // three requests inside one inbound batch = one dispatch cycle
    capture.inject(ProtocolMessage::Batch {
        messages: vec![sync_request("d1"), sync_request("d2"), sync_request("d3")],
    });
    eventually("one physical send appears", || !capture.sent().is_empty()).await;
    settle().await;

    let sent = capture.sent();
    assert_eq!(
        sent.len(),
        1,
        "one cycle must produce one physical send, got {sent:?}"
    );
    match &sent[0] {
        ProtocolMessage::Batch { messages } => {
            assert!(messages.len() >= 3);
            // never a batch inside a batch on the wire
            assert!(messages
                .iter()
                .all(|m| !matches!(m, ProtocolMessage::Batch { .. })));
        }
        other => panic!("expected a batch envelope, got {other:?}"),
    }
    let kinds = sync_response_kinds(&sent[0]);
    assert_eq!(kinds.len(), 3);
    assert!(kinds.iter().all(|k| *k == "snapshot"));
}

#[tokio::test(flavor = "multi_thread")]
async fn a_single_response_is_sent_bare() {
    init_tracing();
    let capture = CaptureAdapter::new("fake-peer");
    let repo = Repo::new(RepoConfig::new().with_adapter(capture.clone()))
        .await
        .unwrap_or_else(|e| panic!("repo failed: {e}"));

    let doc = repo.get("only");
    let map = doc.get_map("root");
    doc.change(|txn| {
        map.insert(txn, "k", "v");
    });
    capture.establish().await;
    settle().await;
    capture.clear();

    capture.inject(sync_request("only"));
    eventually("the response appears", || !capture.sent().is_empty()).await;
    settle().await;

    let sent = capture.sent();
    assert_eq!(sent.len(), 1);
    assert!(
        matches!(&sent[0], ProtocolMessage::SyncResponse { .. }),
        "a lone message crosses unwrapped, got {:?}",
        sent[0]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn separate_cycles_are_never_merged() {
    init_tracing();
    let capture = CaptureAdapter::new("fake-peer");
    let repo = Repo::new(RepoConfig::new().with_adapter(capture.clone()))
        .await
        .unwrap_or_else(|e| panic!("repo failed: {e}"));
    let doc = repo.get("d");
    let map = doc.get_map("root");
    doc.change(|txn| {
        map.insert(txn, "k", "v");
    });
    capture.establish().await;
    settle().await;
    capture.clear();

    capture.inject(sync_request("d"));
    eventually("first response", || capture.sent().len() == 1).await;
    capture.inject(ProtocolMessage::DirectoryRequest { doc_ids: None });
    eventually("second response", || capture.sent().len() == 2).await;
}

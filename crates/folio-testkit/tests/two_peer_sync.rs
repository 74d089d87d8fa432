//! Two peers over one bridge: create, converge, edit back

use folio_sync::RepoConfig;
use folio_testkit::{bridged_repos, eventually, init_tracing};
use serde_json::json;
use yrs::Map;

#[tokio::test(flavor = "multi_thread")]
async fn documents_converge_in_both_directions() {
    init_tracing();
    let (a, b) = bridged_repos(
        RepoConfig::new().with_name("alice"),
        RepoConfig::new().with_name("bob"),
    )
    .await;

    let doc_a = a.get("shared");
    let map = doc_a.get_map("root");
    doc_a.change(|txn| {
        map.insert(txn, "text", "hello");
    });

    let doc_b = b.get("shared");
    doc_b
        .wait_for_network(Some(std::time::Duration::from_secs(5)))
        .await
        .unwrap();
    eventually("b sees a's write", || {
        doc_b.to_json()["root"]["text"] == json!("hello")
    })
    .await;

    // now the other direction: b edits, a observes
    let map_b = doc_b.get_map("root");
    doc_b.change(|txn| {
        map_b.insert(txn, "text", "hello world");
    });
    eventually("a sees b's edit", || {
        doc_a.to_json()["root"]["text"] == json!("hello world")
    })
    .await;

    assert_eq!(doc_a.to_json(), doc_b.to_json());
}

#[tokio::test(flavor = "multi_thread")]
async fn late_created_documents_still_converge() {
    init_tracing();
    let (a, b) = bridged_repos(RepoConfig::new(), RepoConfig::new()).await;

    // let the handshake and directory walk finish first
    folio_testkit::settle().await;

    let doc_a = a.get("later");
    let map = doc_a.get_map("root");
    doc_a.change(|txn| {
        map.insert(txn, "k", "v");
    });

    let doc_b = b.get("later");
    eventually("announcement-driven sync delivers", || {
        doc_b.to_json()["root"]["k"] == json!("v")
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn peer_ids_are_stable_and_distinct() {
    init_tracing();
    let (a, b) = bridged_repos(RepoConfig::new(), RepoConfig::new()).await;
    assert_ne!(a.peer_id(), b.peer_id());
    let handle = a.get("d");
    assert_eq!(handle.peer_id(), a.peer_id());
}

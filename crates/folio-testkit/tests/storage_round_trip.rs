//! Storage-as-peer: persistence across a full repo restart

use folio_sync::{Repo, RepoConfig};
use folio_testkit::{eventually, init_tracing};
use folio_transport::{FsBlobStore, MemoryBlobStore, StorageAdapter};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use yrs::Map;

#[tokio::test(flavor = "multi_thread")]
async fn data_survives_a_restart_against_shared_memory_storage() {
    init_tracing();
    let store = MemoryBlobStore::new();

    {
        let storage = Arc::new(StorageAdapter::new(store.clone()));
        let repo = Repo::new(RepoConfig::new().with_adapter(storage.clone()))
            .await
            .unwrap_or_else(|e| panic!("repo failed: {e}"));
        let doc = repo.get("counter");
        let map = doc.get_map("root");
        doc.change(|txn| {
            map.insert(txn, "count", 42i64);
        });

        // peer-id blob plus at least one update chunk
        eventually("update chunk persisted", || store.len() >= 2).await;
        storage.flush().await.unwrap();
        repo.shutdown().await.unwrap();
    }

    let repo = Repo::new(
        RepoConfig::new().with_adapter(Arc::new(StorageAdapter::new(store.clone()))),
    )
    .await
    .unwrap_or_else(|e| panic!("restarted repo failed: {e}"));
    let doc = repo.get("counter");
    doc.wait_for_storage(Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(doc.to_json()["root"]["count"], json!(42));
}

#[tokio::test(flavor = "multi_thread")]
async fn data_survives_a_restart_on_the_filesystem() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    {
        let store = FsBlobStore::new(dir.path()).unwrap();
        let storage = Arc::new(
            StorageAdapter::new(store).with_adapter_type("fs-storage"),
        );
        let repo = Repo::new(RepoConfig::new().with_adapter(storage.clone()))
            .await
            .unwrap_or_else(|e| panic!("repo failed: {e}"));
        let doc = repo.get("notes");
        let map = doc.get_map("root");
        doc.change(|txn| {
            map.insert(txn, "text", "do not lose this");
        });
        let path = dir.path().to_path_buf();
        eventually("fs chunk persisted", || {
            std::fs::read_dir(&path).map(|d| d.count() >= 2).unwrap_or(false)
        })
        .await;
        storage.flush().await.unwrap();
        repo.shutdown().await.unwrap();
    }

    let store = FsBlobStore::new(dir.path()).unwrap();
    let repo = Repo::new(
        RepoConfig::new()
            .with_adapter(Arc::new(StorageAdapter::new(store).with_adapter_type("fs-storage"))),
    )
    .await
    .unwrap_or_else(|e| panic!("restarted repo failed: {e}"));
    let doc = repo.get("notes");
    doc.wait_for_storage(Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(doc.to_json()["root"]["text"], json!("do not lose this"));
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_propagates_into_storage() {
    init_tracing();
    let store = MemoryBlobStore::new();
    let storage = Arc::new(StorageAdapter::new(store.clone()));
    let repo = Repo::new(RepoConfig::new().with_adapter(storage.clone()))
        .await
        .unwrap_or_else(|e| panic!("repo failed: {e}"));

    let doc = repo.get("doomed");
    let map = doc.get_map("root");
    doc.change(|txn| {
        map.insert(txn, "k", "v");
    });
    eventually("chunks written", || store.len() >= 2).await;

    repo.delete("doomed");
    eventually("chunks removed, peer id kept", || store.len() == 1).await;
}

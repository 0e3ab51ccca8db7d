use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use wb_artifact::*;

fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(fut)
}

proptest! {
    #[test]
    fn prop_ancestors_never_contain_start(
        node_count in 1..24usize,
        parent_picks in proptest::collection::vec(proptest::collection::vec(0..24usize, 0..4), 24)
    ) {
        block_on(async {
            let store = MemoryArtifactStore::new();
            let mut stored: Vec<ContentHash> = Vec::new();

            for i in 0..node_count {
                // Parents may only reference already-stored artifacts.
                let mut parents: Vec<ContentHash> = Vec::new();
                if !stored.is_empty() {
                    for pick in &parent_picks[i] {
                        let p = stored[pick % stored.len()];
                        if !parents.contains(&p) {
                            parents.push(p);
                        }
                    }
                }
                let content = format!("node-{i}");
                let handle = store
                    .put(content.as_bytes(), &parents, ArtifactKind::Data, Producer::User)
                    .await
                    .unwrap();
                stored.push(handle.hash);
            }

            for hash in &stored {
                let ancestors = store.ancestors(*hash).collect().await.unwrap();
                let unique: HashSet<_> = ancestors.iter().map(|h| h.hash).collect();
                assert!(!unique.contains(hash));
                assert_eq!(unique.len(), ancestors.len());
            }
        });
    }

    #[test]
    fn prop_parents_change_identity(content in proptest::collection::vec(any::<u8>(), 0..64)) {
        let a = ContentHash::compute(b"parent-a");
        let b = ContentHash::compute(b"parent-b");
        prop_assert_ne!(artifact_hash(&content, &[a]), artifact_hash(&content, &[b]));
        prop_assert_ne!(artifact_hash(&content, &[a, b]), artifact_hash(&content, &[b, a]));
        prop_assert_ne!(artifact_hash(&content, &[]), artifact_hash(&content, &[a]));
    }
}

#[tokio::test]
async fn test_same_content_different_parents_are_distinct_artifacts() {
    let store = MemoryArtifactStore::new();
    let p1 = store
        .put(b"p1", &[], ArtifactKind::Data, Producer::User)
        .await
        .unwrap();
    let p2 = store
        .put(b"p2", &[], ArtifactKind::Data, Producer::User)
        .await
        .unwrap();

    let c1 = store
        .put(b"c", &[p1.hash], ArtifactKind::Code, Producer::User)
        .await
        .unwrap();
    let c2 = store
        .put(b"c", &[p2.hash], ArtifactKind::Code, Producer::User)
        .await
        .unwrap();

    assert_ne!(c1.hash, c2.hash);
    assert_eq!(store.get(&c1.hash).await.unwrap(), store.get(&c2.hash).await.unwrap());
}

#[tokio::test]
async fn test_ancestors_walk_is_restartable() {
    let store = MemoryArtifactStore::new();
    let a = store
        .put(b"a", &[], ArtifactKind::Data, Producer::User)
        .await
        .unwrap();
    let b = store
        .put(b"b", &[a.hash], ArtifactKind::Data, Producer::User)
        .await
        .unwrap();
    let c = store
        .put(b"c", &[b.hash, a.hash], ArtifactKind::Data, Producer::User)
        .await
        .unwrap();

    let mut walk = store.ancestors(c.hash);
    let first = walk.next().await.unwrap().unwrap();
    assert_eq!(first.hash, b.hash);
    let second = walk.next().await.unwrap().unwrap();
    assert_eq!(second.hash, a.hash);
    assert!(walk.next().await.unwrap().is_none());

    walk.restart();
    assert_eq!(walk.collect().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_ancestors_of_unknown_artifact_is_not_found() {
    let store = MemoryArtifactStore::new();
    let err = store
        .ancestors(ContentHash::compute(b"nothing"))
        .collect()
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_fs_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let (root, child) = {
        let store = FsArtifactStore::open(dir.path()).await.unwrap();
        let root = store
            .put(b"root", &[], ArtifactKind::Data, Producer::User)
            .await
            .unwrap();
        let child = store
            .put(b"child", &[root.hash], ArtifactKind::ModelOutput, Producer::plugin("llm"))
            .await
            .unwrap();
        (root, child)
    };

    let reopened = FsArtifactStore::open(dir.path()).await.unwrap();
    assert_eq!(reopened.get(&child.hash).await.unwrap(), b"child");
    assert_eq!(reopened.handle(&child.hash).await.unwrap(), child);
    let ancestors = reopened.ancestors(child.hash).collect().await.unwrap();
    assert_eq!(ancestors, vec![root]);
    assert_eq!(reopened.list().await.unwrap().len(), 2);
    reopened.verify(&child.hash).await.unwrap();
}

#[tokio::test]
async fn test_fs_store_rejects_missing_parent() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsArtifactStore::open(dir.path()).await.unwrap();
    let err = store
        .put(b"x", &[ContentHash::compute(b"ghost")], ArtifactKind::Data, Producer::User)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::MissingParent { .. }));
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_same_hash_writers_coalesce() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FsArtifactStore::open(dir.path()).await.unwrap());

    let mut tasks = Vec::new();
    for i in 0..16 {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            store
                .put(b"contended", &[], ArtifactKind::Log, Producer::plugin(format!("w{i}")))
                .await
                .unwrap()
        }));
    }

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }
    let first = &handles[0];
    assert!(handles.iter().all(|h| h.hash == first.hash));
    // Every writer observes the single stored record.
    let stored = store.handle(&first.hash).await.unwrap();
    assert!(handles.iter().all(|h| *h == stored));
    assert_eq!(store.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_fs_garbage_collection_prunes_blobs() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsArtifactStore::open(dir.path()).await.unwrap();
    let keep = store
        .put(b"keep", &[], ArtifactKind::Data, Producer::User)
        .await
        .unwrap();
    let drop_me = store
        .put(b"drop", &[], ArtifactKind::Data, Producer::User)
        .await
        .unwrap();

    let report = store.collect_garbage(&[keep.hash]).await.unwrap();
    assert_eq!(report.removed, vec![drop_me.hash]);
    assert_eq!(report.blobs_removed, 1);
    assert!(!store.contains(&drop_me.hash).await.unwrap());
    assert_eq!(store.get(&keep.hash).await.unwrap(), b"keep");
}

#[tokio::test]
async fn test_dyn_store_supports_extension_methods() {
    let store: Arc<dyn ArtifactStore> = Arc::new(MemoryArtifactStore::new());
    let a = store
        .put(b"a", &[], ArtifactKind::Data, Producer::User)
        .await
        .unwrap();
    let b = store
        .put(b"b", &[a.hash], ArtifactKind::Data, Producer::User)
        .await
        .unwrap();
    let ancestors = store.ancestors(b.hash).collect().await.unwrap();
    assert_eq!(ancestors.len(), 1);
}

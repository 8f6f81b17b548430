use std::collections::HashSet;
use std::sync::Arc;

use dedup_store::{DEFAULT_COLLECTION, OwnerRef};

use crate::support::{BACKENDS, TestStore};

const TASKS: usize = 16;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_ingest_stores_once() {
    for backend in BACKENDS {
        let t = Arc::new(TestStore::new(backend).await);

        let handles: Vec<_> = (0..TASKS)
            .map(|i| {
                let t = t.clone();
                tokio::spawn(async move {
                    t.store()
                        .ingest_from_bytes(b"same bytes", &format!("copy-{i}.bin"), None)
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap().id);
        }

        assert_eq!(ids.len(), 1, "{backend:?}");
        assert_eq!(t.store().stats().await.unwrap().records, 1);
        assert_eq!(t.blobs.len().await, 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ingest_under_different_names_stores_one_blob() {
    for backend in BACKENDS {
        let t = Arc::new(TestStore::new(backend).await);

        let handles: Vec<_> = (0..TASKS)
            .map(|i| {
                let t = t.clone();
                let name = if i % 2 == 0 { "a.txt" } else { "a.png" };
                tokio::spawn(async move {
                    t.store()
                        .ingest_from_bytes(b"same", name, None)
                        .await
                        .unwrap()
                })
            })
            .collect();
        let mut ids = HashSet::new();
        let mut record = None;
        for handle in handles {
            let r = handle.await.unwrap();
            ids.insert(r.id);
            record = Some(r);
        }
        let record = record.unwrap();

        assert_eq!(ids.len(), 1, "{backend:?}");
        assert_eq!(t.blobs.len().await, 1, "{backend:?}");

        let owner = OwnerRef::new("post", 1);
        t.media
            .attach(&owner, &record, DEFAULT_COLLECTION)
            .await
            .unwrap();
        t.media.detach_all(&owner).await.unwrap();
        assert!(t.blobs.is_empty().await, "{backend:?}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_attach_counts_every_owner() {
    for backend in BACKENDS {
        let t = Arc::new(TestStore::new(backend).await);
        let record = t
            .store()
            .ingest_from_bytes(b"popular", "p.bin", None)
            .await
            .unwrap();

        let handles: Vec<_> = (0..TASKS)
            .map(|i| {
                let t = t.clone();
                let record = record.clone();
                tokio::spawn(async move {
                    let owner = OwnerRef::new("post", i);
                    t.media
                        .attach(&owner, &record, DEFAULT_COLLECTION)
                        .await
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(t.reference_count(&record).await, TASKS as i64, "{backend:?}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_detach_reaps_exactly_once() {
    for backend in BACKENDS {
        let t = Arc::new(TestStore::new(backend).await);
        let owners: Vec<_> = (0..TASKS).map(|i| OwnerRef::new("post", i)).collect();
        let record = t
            .store()
            .ingest_from_bytes(b"fleeting", "f.bin", None)
            .await
            .unwrap();
        for owner in &owners {
            t.media
                .attach(owner, &record, DEFAULT_COLLECTION)
                .await
                .unwrap();
        }

        let handles: Vec<_> = owners
            .into_iter()
            .map(|owner| {
                let t = t.clone();
                tokio::spawn(async move { t.media.detach_all(&owner).await.unwrap() })
            })
            .collect();
        let mut removed = 0;
        for handle in handles {
            removed += handle.await.unwrap();
        }

        assert_eq!(removed, TASKS as u64);
        assert!(t.refresh(&record).await.is_none(), "{backend:?}");
        assert!(t.blobs.is_empty().await);
        assert_eq!(t.store().stats().await.unwrap().associations, 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn attach_racing_detach_never_loses_blob() {
    for backend in BACKENDS {
        let t = Arc::new(TestStore::new(backend).await);
        let leaving = OwnerRef::new("post", "leaving");
        t.media
            .attach_bytes(&leaving, b"contested", "c.bin", DEFAULT_COLLECTION, None)
            .await
            .unwrap();

        let detacher = {
            let t = t.clone();
            tokio::spawn(async move { t.media.detach_all(&leaving).await.unwrap() })
        };
        let attacher = {
            let t = t.clone();
            tokio::spawn(async move {
                let arriving = OwnerRef::new("post", "arriving");
                t.media
                    .attach_bytes(&arriving, b"contested", "c.bin", DEFAULT_COLLECTION, None)
                    .await
                    .unwrap()
            })
        };

        detacher.await.unwrap();
        let record = attacher.await.unwrap();

        // Whichever order won, the arriving owner holds a live record whose
        // blob is readable.
        let live = t.refresh(&record).await.expect("record must survive");
        assert_eq!(live.reference_count, 1, "{backend:?}");
        assert_eq!(t.store().read(&live).await.unwrap(), b"contested");
    }
}

use dedup_store::{AttachOutcome, DEFAULT_COLLECTION, OwnerRef};

use crate::support::{BACKENDS, HELLO_SHA256, TestStore};

mod ingest {
    use super::*;

    #[tokio::test]
    async fn hello_world_record_layout() {
        for backend in BACKENDS {
            let t = TestStore::new(backend).await;

            let record = t
                .store()
                .ingest_from_bytes(b"Hello, World!", "a.txt", None)
                .await
                .unwrap();
            assert_eq!(record.digest, HELLO_SHA256, "{backend:?}");
            assert_eq!(
                record.path,
                format!("{}/{}/{HELLO_SHA256}.txt", &HELLO_SHA256[0..2], &HELLO_SHA256[2..4])
            );

            let again = t
                .store()
                .ingest_from_bytes(b"Hello, World!", "a.txt", None)
                .await
                .unwrap();
            assert_eq!(again.id, record.id);
            assert_eq!(again.size, record.size);
            assert_eq!(t.blobs.write_count(), 1);
        }
    }

    #[tokio::test]
    async fn different_content_different_records() {
        for backend in BACKENDS {
            let t = TestStore::new(backend).await;
            let a = t.store().ingest_from_bytes(b"C1", "a", None).await.unwrap();
            let b = t.store().ingest_from_bytes(b"C2", "b", None).await.unwrap();

            assert_ne!(a.digest, b.digest);
            assert_eq!(t.store().stats().await.unwrap().records, 2);
            assert_eq!(t.blobs.len().await, 2);
        }
    }
}

mod associations {
    use super::*;

    #[tokio::test]
    async fn attach_then_detach_restores_count() {
        for backend in BACKENDS {
            let t = TestStore::new(backend).await;
            let keeper = OwnerRef::new("post", 1);
            let visitor = OwnerRef::new("post", 2);
            let record = t
                .media
                .attach_bytes(&keeper, b"shared", "s.bin", DEFAULT_COLLECTION, None)
                .await
                .unwrap();
            assert_eq!(t.reference_count(&record).await, 1);

            t.media
                .attach(&visitor, &record, DEFAULT_COLLECTION)
                .await
                .unwrap();
            assert_eq!(t.reference_count(&record).await, 2);

            t.media.detach(&visitor, &record, None).await.unwrap();
            assert_eq!(t.reference_count(&record).await, 1, "{backend:?}");
            assert!(t.blob_exists(&record).await);
        }
    }

    #[tokio::test]
    async fn reattach_is_noop() {
        for backend in BACKENDS {
            let t = TestStore::new(backend).await;
            let owner = OwnerRef::new("post", 1);
            let record = t
                .media
                .attach_bytes(&owner, b"bytes", "a.bin", DEFAULT_COLLECTION, None)
                .await
                .unwrap();

            let outcome = t
                .media
                .attach(&owner, &record, DEFAULT_COLLECTION)
                .await
                .unwrap();
            assert_eq!(outcome, AttachOutcome::AlreadyAttached);
            assert_eq!(t.reference_count(&record).await, 1);
            assert_eq!(t.store().stats().await.unwrap().associations, 1);
        }
    }

    #[tokio::test]
    async fn gallery_shared_by_two_owners() {
        for backend in BACKENDS {
            let t = TestStore::new(backend).await;
            let a = OwnerRef::new("user", "a");
            let b = OwnerRef::new("user", "b");
            let record = t
                .store()
                .ingest_from_bytes(b"Hello, World!", "a.txt", None)
                .await
                .unwrap();

            t.media.attach(&a, &record, "gallery").await.unwrap();
            t.media.attach(&b, &record, "gallery").await.unwrap();
            assert_eq!(t.reference_count(&record).await, 2);

            t.media.detach(&a, &record, Some("gallery")).await.unwrap();
            assert_eq!(t.reference_count(&record).await, 1);
            assert!(t.store().exists_by_hash(&record.digest).await.unwrap());

            t.media.detach(&b, &record, Some("gallery")).await.unwrap();
            assert!(
                t.store()
                    .find_by_hash(&record.digest)
                    .await
                    .unwrap()
                    .is_none(),
                "{backend:?}"
            );
            assert!(!t.blob_exists(&record).await);
        }
    }

    #[tokio::test]
    async fn owner_destruction_releases_every_reference() {
        for backend in BACKENDS {
            let t = TestStore::new(backend).await;
            let doomed = OwnerRef::new("post", 1);
            let survivor = OwnerRef::new("post", 2);

            let only_doomed = t
                .media
                .attach_bytes(&doomed, b"one", "1.bin", "avatar", None)
                .await
                .unwrap();
            let shared = t
                .media
                .attach_bytes(&doomed, b"two", "2.bin", "gallery", None)
                .await
                .unwrap();
            t.media.attach(&doomed, &shared, "cover").await.unwrap();
            t.media.attach(&survivor, &shared, "gallery").await.unwrap();
            assert_eq!(t.reference_count(&shared).await, 3);

            let removed = t.media.detach_all(&doomed).await.unwrap();
            assert_eq!(removed, 3, "{backend:?}");

            assert!(t.refresh(&only_doomed).await.is_none());
            assert!(!t.blob_exists(&only_doomed).await);
            assert_eq!(t.reference_count(&shared).await, 1);
            assert!(t.blob_exists(&shared).await);
            assert_eq!(t.media.count(&doomed, "gallery").await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn detach_is_idempotent() {
        for backend in BACKENDS {
            let t = TestStore::new(backend).await;
            let owner = OwnerRef::new("post", 1);
            let record = t
                .media
                .attach_bytes(&owner, b"bytes", "a.bin", DEFAULT_COLLECTION, None)
                .await
                .unwrap();

            assert_eq!(t.media.detach(&owner, &record, None).await.unwrap(), 1);
            assert_eq!(t.media.detach(&owner, &record, None).await.unwrap(), 0);
            assert_eq!(t.media.detach_all(&owner).await.unwrap(), 0);
            assert!(t.refresh(&record).await.is_none());
        }
    }

    #[tokio::test]
    async fn reaped_content_can_be_ingested_again() {
        for backend in BACKENDS {
            let t = TestStore::new(backend).await;
            let owner = OwnerRef::new("post", 1);
            let first = t
                .media
                .attach_bytes(&owner, b"phoenix", "p.bin", DEFAULT_COLLECTION, None)
                .await
                .unwrap();
            t.media.detach_all(&owner).await.unwrap();

            let second = t
                .media
                .attach_bytes(&owner, b"phoenix", "p.bin", DEFAULT_COLLECTION, None)
                .await
                .unwrap();
            assert_ne!(first.id, second.id);
            assert_eq!(second.digest, first.digest);
            assert_eq!(second.reference_count, 1);
            assert_eq!(t.store().read(&second).await.unwrap(), b"phoenix");
        }
    }
}

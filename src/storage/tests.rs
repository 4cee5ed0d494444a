//! Storage Module Tests
//!
//! ## Test Scopes
//! - **MemoryProfileBackend**: upsert semantics of the persisted relation.
//! - **ProfileStore**: first-load synthesis, save/load cycle, read retry and error surfacing.

#[cfg(test)]
mod tests {
    use crate::config::SyncConfig;
    use crate::error::SyncError;
    use crate::profile::codec::ProfileCodec;
    use crate::profile::registry::ModuleRegistry;
    use crate::profile::types::{OwnerId, Profile};
    use crate::storage::backend::ProfileBackend;
    use crate::storage::memory::MemoryProfileBackend;
    use crate::storage::store::ProfileStore;
    use crate::testing::{Counter, FlakyBackend};
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    fn codec() -> Arc<ProfileCodec> {
        let registry = ModuleRegistry::new();
        registry.register::<Counter>();
        Arc::new(ProfileCodec::new(registry))
    }

    fn store_over(backend: Arc<dyn ProfileBackend>) -> ProfileStore {
        ProfileStore::new(backend, codec(), &SyncConfig::default())
    }

    // ============================================================
    // FIRST LOAD
    // ============================================================

    #[tokio::test]
    async fn test_load_missing_row_returns_fresh_profile() {
        let backend = Arc::new(MemoryProfileBackend::new());
        let store = store_over(backend.clone());

        let profile = store.load(&OwnerId::from("abc"), "Nick").await.unwrap();

        assert_eq!(profile.owner_id(), &OwnerId::from("abc"));
        assert_eq!(profile.display_name(), "Nick");
        assert!(profile.is_empty());
        // Loading never writes.
        assert_eq!(backend.row_count(), 0);
    }

    // ============================================================
    // SAVE / LOAD
    // ============================================================

    #[tokio::test]
    async fn test_save_then_load() {
        let backend = Arc::new(MemoryProfileBackend::new());
        let store = store_over(backend.clone());

        let mut profile = Profile::new(OwnerId::from("abc"), "Nick");
        profile.set_module("x", Counter { value: 42 });
        let snapshot = store.codec().snapshot(&profile).unwrap();

        let ack = store.save(snapshot).await.unwrap();
        assert_eq!(ack.owner_id, OwnerId::from("abc"));

        let loaded = store.load(&OwnerId::from("abc"), "ignored").await.unwrap();
        assert_eq!(loaded.display_name(), "Nick");
        assert_eq!(loaded.module::<Counter>("x"), Some(&Counter { value: 42 }));
    }

    #[tokio::test]
    async fn test_concurrent_saves_keep_one_row() {
        let backend = Arc::new(MemoryProfileBackend::new());
        let store = Arc::new(store_over(backend.clone()));

        let mut first = Profile::new(OwnerId::from("abc"), "Nick");
        first.set_module("x", Counter { value: 1 });
        let mut second = first.clone();
        second.set_module("x", Counter { value: 2 });

        let first = store.codec().snapshot(&first).unwrap();
        let second = store.codec().snapshot(&second).unwrap();

        let (a, b) = tokio::join!(store.save(first), store.save(second));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(backend.row_count(), 1);

        // Sequential writes: the later one wins.
        let mut third = Profile::new(OwnerId::from("abc"), "Nick");
        third.set_module("x", Counter { value: 3 });
        store
            .save(store.codec().snapshot(&third).unwrap())
            .await
            .unwrap();

        let row = backend.get_local(&OwnerId::from("abc")).unwrap();
        assert_eq!(row.data["modules"]["x"]["payload"]["value"], 3);
        assert_eq!(backend.row_count(), 1);
    }

    #[tokio::test]
    async fn test_many_concurrent_saves_across_workers() {
        let backend = Arc::new(MemoryProfileBackend::new());
        let store = Arc::new(store_over(backend.clone()));

        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut profile = Profile::new(OwnerId::from("shared"), "Same");
                profile.set_module("x", Counter { value: i });
                let snapshot = store.codec().snapshot(&profile).unwrap();
                store.save(snapshot).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(backend.row_count(), 1);
    }

    // ============================================================
    // FAILURES
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_load_retries_transient_failures() {
        let flaky = Arc::new(FlakyBackend::new(Arc::new(MemoryProfileBackend::new()), 2));
        let store = store_over(flaky.clone());

        let profile = store.load(&OwnerId::from("abc"), "Nick").await.unwrap();

        assert_eq!(profile.display_name(), "Nick");
        assert_eq!(flaky.fetch_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_gives_up_after_bounded_attempts() {
        let flaky = Arc::new(FlakyBackend::new(
            Arc::new(MemoryProfileBackend::new()),
            usize::MAX,
        ));
        let store = store_over(flaky.clone());

        let result = store.load(&OwnerId::from("abc"), "Nick").await;

        assert!(matches!(result, Err(SyncError::TransientIo { .. })));
        assert_eq!(
            flaky.fetch_calls.load(Ordering::SeqCst),
            SyncConfig::default().store_read_attempts
        );
    }

    #[tokio::test]
    async fn test_save_surfaces_transient_error_without_retry() {
        let flaky = Arc::new(FlakyBackend::new(Arc::new(MemoryProfileBackend::new()), 0));
        flaky.fail_saves.store(true, Ordering::SeqCst);
        let store = store_over(flaky.clone());

        let snapshot = store
            .codec()
            .snapshot(&Profile::new(OwnerId::from("abc"), "Nick"))
            .unwrap();
        let result = store.save(snapshot).await;

        assert!(matches!(result, Err(SyncError::TransientIo { .. })));
        assert_eq!(flaky.upsert_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_corrupt_row_is_decode_error() {
        let backend = Arc::new(MemoryProfileBackend::new());
        backend.store_local(crate::profile::types::ProfileRecord {
            owner_id: OwnerId::from("abc"),
            display_name: "Nick".to_string(),
            data: serde_json::json!("not a document"),
        });
        let store = store_over(backend);

        let result = store.load(&OwnerId::from("abc"), "Nick").await;

        assert!(matches!(result, Err(SyncError::Decode(_))));
    }
}

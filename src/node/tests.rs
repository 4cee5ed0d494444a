//! Node Module Tests
//!
//! ## Test Scopes
//! - **Admission**: lock wait schedule, rejection, early wake, load failures.
//! - **Disconnect**: save, announce and release ordering; failure leaves the lock.
//! - **Save requests**: flush without ending the session.
//! - **Shutdown**: bounded flush and loss reporting.

#[cfg(test)]
mod tests {
    use crate::config::SyncConfig;
    use crate::context::SyncContext;
    use crate::coordination::channel::{
        InMemorySyncChannel, SyncChannel, TOPIC_SAVE_COMPLETED, TOPIC_SAVE_REQUESTED,
        local_saved_topic,
    };
    use crate::coordination::lock::{CoordinationStore, MemoryCoordinationStore, profile_lock_key};
    use crate::error::SyncError;
    use crate::node::admission::ProfileSource;
    use crate::node::service::NodeService;
    use crate::profile::codec::ProfileCodec;
    use crate::profile::registry::ModuleRegistry;
    use crate::profile::types::{OwnerId, Profile};
    use crate::storage::backend::ProfileBackend;
    use crate::storage::memory::MemoryProfileBackend;
    use crate::testing::{
        Counter, CountingCoordination, FlakyBackend, SlowBackend, SlowCoordination,
    };
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::time::Instant;

    fn context(
        config: SyncConfig,
        backend: Arc<dyn ProfileBackend>,
        coordination: Arc<dyn CoordinationStore>,
    ) -> (Arc<SyncContext>, Arc<InMemorySyncChannel>) {
        let registry = ModuleRegistry::new();
        registry.register::<Counter>();
        let channel = Arc::new(InMemorySyncChannel::new());
        let ctx = SyncContext::init(config, registry, backend, coordination, channel.clone());
        (ctx, channel)
    }

    fn stored_row(owner: &str, value: i64) -> crate::profile::types::ProfileRecord {
        let registry = ModuleRegistry::new();
        registry.register::<Counter>();
        let mut profile = Profile::new(OwnerId::from(owner), "Stored");
        profile.set_module("x", Counter { value });
        ProfileCodec::new(registry).snapshot(&profile).unwrap()
    }

    async fn counter_of(service: &NodeService, owner: &str) -> Option<Counter> {
        service
            .node
            .with_profile(&OwnerId::from(owner), |profile| {
                profile.module::<Counter>("x").cloned()
            })
            .await
            .unwrap()
    }

    async fn set_counter(service: &NodeService, owner: &str, value: i64) {
        service
            .node
            .with_profile(&OwnerId::from(owner), move |profile| {
                profile.set_module("x", Counter { value });
            })
            .await
            .unwrap();
    }

    // ============================================================
    // ADMISSION
    // ============================================================

    #[tokio::test]
    async fn test_admit_without_lock_loads_and_caches() {
        let backend = Arc::new(MemoryProfileBackend::new());
        backend.store_local(stored_row("abc", 5));
        let (ctx, _) = context(
            SyncConfig::default(),
            backend,
            Arc::new(MemoryCoordinationStore::new()),
        );
        let service = NodeService::start(ctx).await.unwrap();

        let admission = service.join(&OwnerId::from("abc"), "Nick").await.unwrap();

        assert_eq!(admission.source, ProfileSource::Stored);
        assert_eq!(admission.lock_checks, 1);
        assert_eq!(counter_of(&service, "abc").await, Some(Counter { value: 5 }));
    }

    #[tokio::test]
    async fn test_admit_first_time_owner_gets_empty_profile() {
        let (ctx, _) = context(
            SyncConfig::default(),
            Arc::new(MemoryProfileBackend::new()),
            Arc::new(MemoryCoordinationStore::new()),
        );
        let service = NodeService::start(ctx).await.unwrap();

        service.join(&OwnerId::from("new"), "Fresh").await.unwrap();

        let (name, empty) = service
            .node
            .with_profile(&OwnerId::from("new"), |profile| {
                (profile.display_name().to_string(), profile.is_empty())
            })
            .await
            .unwrap();
        assert_eq!(name, "Fresh");
        assert!(empty);
    }

    #[tokio::test]
    async fn test_admit_already_active_returns_cached() {
        let (ctx, _) = context(
            SyncConfig::default(),
            Arc::new(MemoryProfileBackend::new()),
            Arc::new(MemoryCoordinationStore::new()),
        );
        let service = NodeService::start(ctx).await.unwrap();
        let owner = OwnerId::from("abc");

        service.join(&owner, "Nick").await.unwrap();
        set_counter(&service, "abc", 9).await;

        let again = service.join(&owner, "Nick").await.unwrap();

        assert_eq!(again.source, ProfileSource::Cached);
        assert_eq!(again.lock_checks, 0);
        // The live copy was not replaced by a reload.
        assert_eq!(counter_of(&service, "abc").await, Some(Counter { value: 9 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admit_rejects_after_max_checks() {
        let locks = Arc::new(MemoryCoordinationStore::new());
        let counting = Arc::new(CountingCoordination::new(locks.clone()));
        let (ctx, _) = context(
            SyncConfig::default(),
            Arc::new(MemoryProfileBackend::new()),
            counting.clone(),
        );
        let service = NodeService::start(ctx).await.unwrap();
        let owner = OwnerId::from("abc");
        locks
            .acquire(&profile_lock_key(&owner), Duration::from_secs(60))
            .await
            .unwrap();

        let started = Instant::now();
        let result = service.join(&owner, "Nick").await;
        let elapsed = started.elapsed();

        match result {
            Err(e @ SyncError::LockTimeout { .. }) => {
                assert_eq!(e.user_reason(), "previous session still saving");
                assert!(matches!(e, SyncError::LockTimeout { attempts: 10, .. }));
            }
            other => panic!("expected LockTimeout, got {:?}", other),
        }
        assert_eq!(counting.checks(), 10);
        assert!(elapsed >= Duration::from_millis(4500));
        assert!(elapsed < Duration::from_millis(4600));
        assert!(!service.node.is_active(&owner).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_admit_proceeds_once_lock_released() {
        let locks = Arc::new(MemoryCoordinationStore::new());
        let backend = Arc::new(MemoryProfileBackend::new());
        backend.store_local(stored_row("abc", 3));
        let (ctx, _) = context(SyncConfig::default(), backend, locks.clone());
        let service = NodeService::start(ctx).await.unwrap();
        let owner = OwnerId::from("abc");
        let key = profile_lock_key(&owner);
        locks.acquire(&key, Duration::from_secs(10)).await.unwrap();

        let releaser = locks.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1200)).await;
            releaser.release(&key).await.unwrap();
        });

        let admission = service.join(&owner, "Nick").await.unwrap();

        // Checks at 0, 500, 1000 see the lock; the one at 1500 does not.
        assert_eq!(admission.lock_checks, 4);
        assert!(!admission.woke_on_save);
        assert_eq!(counter_of(&service, "abc").await, Some(Counter { value: 3 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admit_wakes_early_on_save_ack() {
        let locks = Arc::new(MemoryCoordinationStore::new());
        let (ctx, channel) = context(
            SyncConfig::default(),
            Arc::new(MemoryProfileBackend::new()),
            locks.clone(),
        );
        let service = NodeService::start(ctx).await.unwrap();
        let owner = OwnerId::from("abc");
        locks
            .acquire(&profile_lock_key(&owner), Duration::from_secs(60))
            .await
            .unwrap();

        let topic = local_saved_topic(&owner);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(700)).await;
            channel.publish(&topic, "saved").await.unwrap();
        });

        let started = Instant::now();
        let admission = service.join(&owner, "Nick").await.unwrap();

        assert!(admission.woke_on_save);
        assert_eq!(admission.lock_checks, 2);
        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admit_synthesizes_profile_when_store_unavailable() {
        let inner = Arc::new(MemoryProfileBackend::new());
        inner.store_local(stored_row("abc", 5));
        let flaky = Arc::new(FlakyBackend::new(inner, usize::MAX));
        let (ctx, _) = context(
            SyncConfig::default(),
            flaky,
            Arc::new(MemoryCoordinationStore::new()),
        );
        let service = NodeService::start(ctx).await.unwrap();

        let admission = service.join(&OwnerId::from("abc"), "Nick").await.unwrap();

        assert_eq!(admission.source, ProfileSource::Synthesized);
        assert_eq!(counter_of(&service, "abc").await, None);
    }

    #[tokio::test]
    async fn test_admit_denies_corrupt_profile() {
        let backend = Arc::new(MemoryProfileBackend::new());
        let mut row = stored_row("abc", 1);
        row.data = serde_json::json!([1, 2, 3]);
        backend.store_local(row);
        let (ctx, _) = context(
            SyncConfig::default(),
            backend,
            Arc::new(MemoryCoordinationStore::new()),
        );
        let service = NodeService::start(ctx).await.unwrap();
        let owner = OwnerId::from("abc");

        let result = service.join(&owner, "Nick").await;

        assert!(matches!(result, Err(SyncError::Decode(_))));
        assert!(!service.node.is_active(&owner).await.unwrap());
    }

    // ============================================================
    // DISCONNECT
    // ============================================================

    #[tokio::test]
    async fn test_disconnect_persists_releases_and_announces() {
        let backend = Arc::new(MemoryProfileBackend::new());
        let locks = Arc::new(MemoryCoordinationStore::new());
        let (ctx, channel) = context(SyncConfig::default(), backend.clone(), locks.clone());
        let service = NodeService::start(ctx).await.unwrap();
        let owner = OwnerId::from("abc");

        service.join(&owner, "Nick").await.unwrap();
        set_counter(&service, "abc", 7).await;

        let mut completed = channel.subscribe(TOPIC_SAVE_COMPLETED).await.unwrap();
        let mut local = channel.subscribe(&local_saved_topic(&owner)).await.unwrap();

        let ack = service.leave(&owner).await.unwrap().unwrap();

        assert_eq!(ack.owner_id, owner);
        let row = backend.get_local(&owner).unwrap();
        assert_eq!(row.data["modules"]["x"]["payload"]["value"], 7);
        assert_eq!(row.display_name, "Nick");
        assert!(!locks.exists(&profile_lock_key(&owner)).await.unwrap());
        assert_eq!(completed.recv().await.unwrap().payload, "abc");
        assert_eq!(local.recv().await.unwrap().payload, "saved");
        assert!(!service.node.is_active(&owner).await.unwrap());
    }

    #[tokio::test]
    async fn test_disconnect_unknown_owner_is_noop() {
        let backend = Arc::new(MemoryProfileBackend::new());
        let (ctx, _) = context(
            SyncConfig::default(),
            backend.clone(),
            Arc::new(MemoryCoordinationStore::new()),
        );
        let service = NodeService::start(ctx).await.unwrap();

        let result = service.leave(&OwnerId::from("ghost")).await.unwrap();

        assert!(result.is_none());
        assert_eq!(backend.row_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_save_leaves_lock_until_ttl() {
        let flaky = Arc::new(FlakyBackend::new(Arc::new(MemoryProfileBackend::new()), 0));
        let locks = Arc::new(MemoryCoordinationStore::new());
        let (ctx, _) = context(SyncConfig::default(), flaky.clone(), locks.clone());
        let service = NodeService::start(ctx).await.unwrap();
        let owner = OwnerId::from("abc");
        let key = profile_lock_key(&owner);

        service.join(&owner, "Nick").await.unwrap();
        flaky.fail_saves.store(true, Ordering::SeqCst);

        let result = service.leave(&owner).await;

        assert!(matches!(result, Err(SyncError::TransientIo { .. })));
        assert!(!service.node.is_active(&owner).await.unwrap());
        assert!(locks.exists(&key).await.unwrap());

        tokio::time::sleep(SyncConfig::default().lock_ttl).await;
        assert!(!locks.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_disconnect_with_foreign_lock_saves_without_releasing() {
        let backend = Arc::new(MemoryProfileBackend::new());
        let locks = Arc::new(MemoryCoordinationStore::new());
        let (ctx, channel) = context(SyncConfig::default(), backend.clone(), locks.clone());
        let service = NodeService::start(ctx).await.unwrap();
        let owner = OwnerId::from("abc");
        let key = profile_lock_key(&owner);

        service.join(&owner, "Nick").await.unwrap();
        locks.acquire(&key, Duration::from_secs(10)).await.unwrap();
        let mut local = channel.subscribe(&local_saved_topic(&owner)).await.unwrap();

        service.leave(&owner).await.unwrap();

        assert!(backend.get_local(&owner).is_some());
        assert!(locks.exists(&key).await.unwrap());
        // Waiters for this owner keep waiting on the other holder.
        let woke = tokio::time::timeout(Duration::from_millis(100), local.recv()).await;
        assert!(woke.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_leave_still_persists() {
        let backend = Arc::new(MemoryProfileBackend::new());
        let locks = Arc::new(MemoryCoordinationStore::new());
        let slow_locks = Arc::new(SlowCoordination {
            inner: locks.clone(),
            delay: Duration::from_millis(300),
        });
        let (ctx, _) = context(SyncConfig::default(), backend.clone(), slow_locks);
        let service = NodeService::start(ctx).await.unwrap();
        let owner = OwnerId::from("abc");

        service.join(&owner, "Nick").await.unwrap();
        set_counter(&service, "abc", 4).await;

        // The caller gives up while the lock is still being taken.
        let cancelled =
            tokio::time::timeout(Duration::from_millis(100), service.leave(&owner)).await;
        assert!(cancelled.is_err());
        assert!(!service.node.is_active(&owner).await.unwrap());

        tokio::time::sleep(Duration::from_secs(1)).await;

        let row = backend.get_local(&owner).unwrap();
        assert_eq!(row.data["modules"]["x"]["payload"]["value"], 4);
        assert!(!locks.exists(&profile_lock_key(&owner)).await.unwrap());
    }

    // ============================================================
    // SAVE REQUESTS
    // ============================================================

    #[tokio::test]
    async fn test_save_request_flushes_active_profile() {
        let backend = Arc::new(MemoryProfileBackend::new());
        let (ctx, channel) = context(
            SyncConfig::default(),
            backend.clone(),
            Arc::new(MemoryCoordinationStore::new()),
        );
        let service = NodeService::start(ctx).await.unwrap();
        let owner = OwnerId::from("abc");

        service.join(&owner, "Nick").await.unwrap();
        set_counter(&service, "abc", 11).await;

        let mut completed = channel.subscribe(TOPIC_SAVE_COMPLETED).await.unwrap();
        channel.publish(TOPIC_SAVE_REQUESTED, "abc").await.unwrap();

        let ack = tokio::time::timeout(Duration::from_secs(1), completed.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(ack.payload, "abc");
        let row = backend.get_local(&owner).unwrap();
        assert_eq!(row.data["modules"]["x"]["payload"]["value"], 11);
        // The session stays on this node.
        assert!(service.node.is_active(&owner).await.unwrap());
    }

    #[tokio::test]
    async fn test_save_request_for_absent_owner_is_ignored() {
        let backend = Arc::new(MemoryProfileBackend::new());
        let (ctx, channel) = context(
            SyncConfig::default(),
            backend.clone(),
            Arc::new(MemoryCoordinationStore::new()),
        );
        let _service = NodeService::start(ctx).await.unwrap();

        let mut completed = channel.subscribe(TOPIC_SAVE_COMPLETED).await.unwrap();
        channel.publish(TOPIC_SAVE_REQUESTED, "ghost").await.unwrap();

        let result = tokio::time::timeout(Duration::from_millis(100), completed.recv()).await;

        assert!(result.is_err());
        assert_eq!(backend.row_count(), 0);
    }

    // ============================================================
    // SHUTDOWN
    // ============================================================

    #[tokio::test]
    async fn test_shutdown_flushes_every_profile() {
        let backend = Arc::new(MemoryProfileBackend::new());
        let locks = Arc::new(MemoryCoordinationStore::new());
        let (ctx, _) = context(SyncConfig::default(), backend.clone(), locks.clone());
        let service = NodeService::start(ctx).await.unwrap();

        for owner in ["a", "b", "c"] {
            service.join(&OwnerId::from(owner), owner).await.unwrap();
        }

        let report = service.shutdown().await;

        assert!(report.is_clean());
        assert_eq!(report.flushed.len(), 3);
        assert_eq!(backend.row_count(), 3);
        assert_eq!(locks.held_count(), 0);
        assert!(report.into_result().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_reports_profiles_lost_at_deadline() {
        let slow = Arc::new(SlowBackend {
            inner: Arc::new(MemoryProfileBackend::new()),
            delay: Duration::from_secs(30),
        });
        let (ctx, _) = context(
            SyncConfig::default(),
            slow,
            Arc::new(MemoryCoordinationStore::new()),
        );
        let service = NodeService::start(ctx).await.unwrap();

        service.join(&OwnerId::from("a"), "A").await.unwrap();
        service.join(&OwnerId::from("b"), "B").await.unwrap();

        let started = Instant::now();
        let report = service.shutdown().await;

        assert!(started.elapsed() <= Duration::from_secs(21));
        assert!(report.flushed.is_empty());
        assert_eq!(report.lost.len(), 2);
        assert!(matches!(
            report.into_result(),
            Err(SyncError::ShutdownFlushTimeout { lost: 2 })
        ));
    }

    // ============================================================
    // RUNTIME
    // ============================================================

    #[tokio::test]
    async fn test_with_profile_on_absent_owner_is_not_active() {
        let (ctx, _) = context(
            SyncConfig::default(),
            Arc::new(MemoryProfileBackend::new()),
            Arc::new(MemoryCoordinationStore::new()),
        );
        let service = NodeService::start(ctx).await.unwrap();

        let result = service
            .node
            .with_profile(&OwnerId::from("ghost"), |profile| profile.module_count())
            .await;

        assert!(matches!(result, Err(SyncError::NotActive(_))));
    }

    #[tokio::test]
    async fn test_capture_keeps_profile_active() {
        let (ctx, _) = context(
            SyncConfig::default(),
            Arc::new(MemoryProfileBackend::new()),
            Arc::new(MemoryCoordinationStore::new()),
        );
        let service = NodeService::start(ctx).await.unwrap();
        let owner = OwnerId::from("abc");
        service.join(&owner, "Nick").await.unwrap();

        let snapshot = service.node.capture(&owner).await.unwrap().unwrap();

        assert_eq!(snapshot.owner_id, owner);
        assert_eq!(service.node.active_owners().await.unwrap(), vec![owner]);
    }
}

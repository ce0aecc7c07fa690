/// Factory pooling tests
///
/// Pooling idempotence, concurrent construction, failure propagation, and
/// handle lifecycle, driven through the public entry points with counting
/// broker builders installed via the registry.
/// Run with: cargo test --test factory_pool_tests
use async_trait::async_trait;
use persistkit::properties::{BROKER_FACTORY, CONNECTION_URL, FACTORY_POOL};
use persistkit::{
    BrokerBuilder, BrokerFactory, ConfigurationSnapshot, FactoryHandle, FactoryKey, FactoryPool,
    InMemoryBrokerFactory, PersistenceProvider, Properties, ProviderError, RegistryResolver,
    UnitDescriptor,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Counts constructions; sleeps briefly so concurrent callers overlap the
/// construction window.
struct CountingBuilder {
    constructions: Arc<AtomicUsize>,
}

#[async_trait]
impl BrokerBuilder for CountingBuilder {
    async fn build(
        &self,
        snapshot: &ConfigurationSnapshot,
    ) -> persistkit::Result<Arc<dyn BrokerFactory>> {
        self.constructions.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(Arc::new(InMemoryBrokerFactory::open(snapshot)?))
    }
}

/// Always fails, slowly, so a second caller can join the attempt.
struct FailingBuilder {
    attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl BrokerBuilder for FailingBuilder {
    async fn build(
        &self,
        _snapshot: &ConfigurationSnapshot,
    ) -> persistkit::Result<Arc<dyn BrokerFactory>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;
        Err(ProviderError::Construction("backend unreachable".into()))
    }
}

fn provider_with_counting_unit(unit: &str, url: &str) -> (PersistenceProvider, Arc<AtomicUsize>) {
    let constructions = Arc::new(AtomicUsize::new(0));
    let resolver = Arc::new(RegistryResolver::new());
    resolver
        .register(
            UnitDescriptor::new(unit)
                .with_property(CONNECTION_URL, url)
                .with_property(BROKER_FACTORY, "counting"),
        )
        .unwrap();

    let provider = PersistenceProvider::new().with_resolver(resolver);
    provider
        .broker_registry()
        .register(
            "counting",
            Arc::new(CountingBuilder {
                constructions: Arc::clone(&constructions),
            }),
        )
        .unwrap();
    (provider, constructions)
}

#[tokio::test]
async fn test_pooling_idempotence() {
    let (provider, constructions) = provider_with_counting_unit("crm", "mem:crm");
    let pooled = Properties::new().with(FACTORY_POOL, "true");

    let first = provider
        .create_entity_manager_factory(Some("crm"), Some(&pooled))
        .await
        .unwrap()
        .unwrap();
    let second = provider
        .create_entity_manager_factory(Some("crm"), Some(&pooled))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(constructions.load(Ordering::SeqCst), 1);

    first.close().await.unwrap();
}

#[tokio::test]
async fn test_pooling_disabled_by_default() {
    let (provider, constructions) = provider_with_counting_unit("crm", "mem:crm");

    let first = provider
        .create_entity_manager_factory(Some("crm"), None)
        .await
        .unwrap()
        .unwrap();
    let second = provider
        .create_entity_manager_factory(Some("crm"), None)
        .await
        .unwrap()
        .unwrap();

    assert_ne!(first, second);
    assert_eq!(constructions.load(Ordering::SeqCst), 2);
    assert!(provider.pool().is_empty());

    first.close().await.unwrap();
    second.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_construction() {
    let (provider, constructions) = provider_with_counting_unit("crm", "mem:crm");
    let provider = Arc::new(provider);
    let barrier = Arc::new(tokio::sync::Barrier::new(10));

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let provider = Arc::clone(&provider);
        let barrier = Arc::clone(&barrier);
        tasks.push(tokio::spawn(async move {
            let props = Properties::new().with(FACTORY_POOL, "true");
            barrier.wait().await;
            provider
                .create_entity_manager_factory(Some("crm"), Some(&props))
                .await
                .unwrap()
                .unwrap()
        }));
    }

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }

    let first = &handles[0];
    for handle in &handles {
        assert_eq!(handle, first);
    }
    assert_eq!(constructions.load(Ordering::SeqCst), 1);
    assert_eq!(provider.pool().len(), 1);

    first.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_waiters_observe_the_same_construction_failure() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let resolver = Arc::new(RegistryResolver::new());
    resolver
        .register(
            UnitDescriptor::new("crm")
                .with_property(CONNECTION_URL, "mem:crm")
                .with_property(BROKER_FACTORY, "failing")
                .with_property(FACTORY_POOL, "true"),
        )
        .unwrap();
    let provider = Arc::new(PersistenceProvider::new().with_resolver(resolver));
    provider
        .broker_registry()
        .register(
            "failing",
            Arc::new(FailingBuilder {
                attempts: Arc::clone(&attempts),
            }),
        )
        .unwrap();

    let winner = {
        let provider = Arc::clone(&provider);
        tokio::spawn(async move {
            provider
                .create_entity_manager_factory(Some("crm"), None)
                .await
        })
    };
    // Give the winner a head start into its 300ms construction window.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let waiter = {
        let provider = Arc::clone(&provider);
        tokio::spawn(async move {
            provider
                .create_entity_manager_factory(Some("crm"), None)
                .await
        })
    };

    let winner_err = winner.await.unwrap().unwrap_err();
    let waiter_err = waiter.await.unwrap().unwrap_err();

    assert_eq!(winner_err, waiter_err);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    // The key reverted to unseen: the next caller starts a fresh attempt.
    let err = provider
        .create_entity_manager_factory(Some("crm"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Construction(_)));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(provider.pool().is_empty());
}

#[tokio::test]
async fn test_closed_handle_lifecycle() {
    let (provider, _constructions) = provider_with_counting_unit("crm", "mem:crm");
    let pooled = Properties::new().with(FACTORY_POOL, "true");

    let handle = provider
        .create_entity_manager_factory(Some("crm"), Some(&pooled))
        .await
        .unwrap()
        .unwrap();
    assert!(handle.is_open());

    let mut session = handle.create_session().await.unwrap();
    assert!(session.is_active());
    session.close();

    handle.close().await.unwrap();
    assert!(!handle.is_open());
    assert!(provider.pool().is_empty());

    let err = handle.create_session().await.unwrap_err();
    assert!(matches!(err, ProviderError::Closed(_)));

    // close() is idempotent.
    handle.close().await.unwrap();
}

#[tokio::test]
async fn test_close_reverts_key_and_next_caller_reconstructs() {
    let (provider, constructions) = provider_with_counting_unit("crm", "mem:crm");
    let pooled = Properties::new().with(FACTORY_POOL, "true");

    let first = provider
        .create_entity_manager_factory(Some("crm"), Some(&pooled))
        .await
        .unwrap()
        .unwrap();
    first.close().await.unwrap();

    let second = provider
        .create_entity_manager_factory(Some("crm"), Some(&pooled))
        .await
        .unwrap()
        .unwrap();

    assert_ne!(first, second);
    assert!(second.is_open());
    assert_eq!(constructions.load(Ordering::SeqCst), 2);

    second.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_keys_construct_in_parallel() {
    let pool = FactoryPool::new();
    // Both constructions rendezvous inside the construction window; this
    // can only complete if the pool holds no global lock across construct.
    let barrier = Arc::new(tokio::sync::Barrier::new(2));

    fn snapshot(url: &str) -> ConfigurationSnapshot {
        persistkit::Configuration::from_properties(
            Some("unit"),
            Properties::new().with(CONNECTION_URL, url),
        )
        .unwrap()
        .snapshot()
    }

    let mut tasks = Vec::new();
    for url in ["mem:a", "mem:b"] {
        let pool = Arc::clone(&pool);
        let barrier = Arc::clone(&barrier);
        tasks.push(tokio::spawn(async move {
            let snap = snapshot(url);
            let key = FactoryKey::from_snapshot(&snap);
            pool.get_or_create(key, true, || async {
                barrier.wait().await;
                let broker = InMemoryBrokerFactory::open(&snap)?;
                Ok(FactoryHandle::new(Arc::new(broker), snap.clone()))
            })
            .await
            .unwrap()
        }));
    }

    let joined = tokio::time::timeout(Duration::from_secs(5), async {
        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }
        handles
    })
    .await
    .expect("constructions for distinct keys must not serialize");

    assert_eq!(joined.len(), 2);
    assert_ne!(joined[0], joined[1]);
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_pool_shutdown_closes_pooled_handles() {
    let (provider, _constructions) = provider_with_counting_unit("crm", "mem:crm");
    let pooled = Properties::new().with(FACTORY_POOL, "true");

    let handle = provider
        .create_entity_manager_factory(Some("crm"), Some(&pooled))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(provider.pool().len(), 1);

    provider.pool().shutdown().await.unwrap();

    assert!(provider.pool().is_empty());
    assert!(!handle.is_open());
}

use super::broker::BrokerFactory;
use super::key::FactoryKey;
use super::pool::FactoryPool;
use super::session::Session;
use crate::config::ConfigurationSnapshot;
use crate::core::{ProviderError, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tracing::debug;

/// Provider-facing wrapper around one underlying broker factory.
///
/// Cloning is cheap and every clone refers to the same factory; callers
/// that resolve to the same pooled key receive clones of one handle, which
/// is what makes `==` (pointer identity of the shared inner) the pooling
/// correctness check.
#[derive(Clone)]
pub struct FactoryHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    broker: Arc<dyn BrokerFactory>,
    snapshot: ConfigurationSnapshot,
    open: AtomicBool,
    session_seq: AtomicU64,
    registration: OnceLock<PoolRegistration>,
}

/// Present only on pooled handles; set once by the pool after construction.
struct PoolRegistration {
    pool: Weak<FactoryPool>,
    key: FactoryKey,
}

impl FactoryHandle {
    pub fn new(broker: Arc<dyn BrokerFactory>, snapshot: ConfigurationSnapshot) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                broker,
                snapshot,
                open: AtomicBool::new(true),
                session_seq: AtomicU64::new(0),
                registration: OnceLock::new(),
            }),
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    pub fn configuration(&self) -> &ConfigurationSnapshot {
        &self.inner.snapshot
    }

    pub fn broker(&self) -> &Arc<dyn BrokerFactory> {
        &self.inner.broker
    }

    pub fn supports_schema_sync(&self) -> bool {
        self.inner.broker.schema_sync().is_some()
    }

    /// Opens a new unit-of-work session.
    pub async fn create_session(&self) -> Result<Session> {
        if !self.is_open() {
            return Err(ProviderError::Closed(
                "entity manager factory is closed".into(),
            ));
        }
        let id = self.inner.session_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.broker.open_session(id).await
    }

    /// Closes the handle, deregistering it from its pool and shutting the
    /// broker down. Calling close on an already-closed handle is a no-op.
    pub async fn close(&self) -> Result<()> {
        if !self.inner.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(registration) = self.inner.registration.get() {
            if let Some(pool) = registration.pool.upgrade() {
                pool.deregister(&registration.key, self).await?;
            }
        }

        debug!(unit = ?self.inner.snapshot.unit_name(), "factory handle closed");
        self.inner.broker.shutdown().await
    }

    pub(crate) fn attach_pool(&self, pool: Weak<FactoryPool>, key: FactoryKey) {
        let _ = self.inner.registration.set(PoolRegistration { pool, key });
    }
}

impl PartialEq for FactoryHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for FactoryHandle {}

impl std::fmt::Debug for FactoryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryHandle")
            .field("unit", &self.inner.snapshot.unit_name())
            .field("broker", &self.inner.broker.name())
            .field("open", &self.is_open())
            .finish()
    }
}

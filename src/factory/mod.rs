pub mod broker;
pub mod handle;
pub mod key;
pub mod pool;
pub mod session;

pub use broker::{
    BrokerBuilder, BrokerFactory, BrokerRegistry, InMemoryBrokerFactory, MemoryBrokerBuilder,
    SchemaSync,
};
pub use handle::FactoryHandle;
pub use key::FactoryKey;
pub use pool::FactoryPool;
pub use session::{ManagedEntity, Session, SessionBackend};

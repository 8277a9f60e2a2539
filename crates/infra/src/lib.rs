//! Infrastructure layer: storage backends, the ledger engine, configuration.

pub mod config;
pub mod directory;
pub mod engine;
pub mod retry;
pub mod sample;
pub mod store;


pub use config::{ConfigError, LedgerConfig};
pub use directory::PostgresDirectory;
pub use engine::{EngineError, LedgerEngine, OutcomeKind};
pub use retry::RetryPolicy;
pub use sample::SampleChain;
pub use store::{InMemoryLedgerStore, LedgerStore, PostgresLedgerStore, StoreError};

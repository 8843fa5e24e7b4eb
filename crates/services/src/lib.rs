pub mod ack;
pub mod bulk;
pub mod dao;
pub mod dispatcher;
pub mod drivers;
pub mod engine;
pub mod error;
pub mod intake;
pub mod metrics;
pub mod preferences;
pub mod quota;
pub mod retry;
pub mod store;
pub mod sweeper;

pub use ack::ReadService;
pub use bulk::{BulkOrchestrator, BulkResult};
pub use dao::*;
pub use dispatcher::{ChannelOutcome, DispatchResult, Dispatcher};
pub use engine::NotificationEngine;
pub use error::{EngineError, NotificationError, NotificationResult};
pub use intake::NotificationIntake;
pub use metrics::NotificationMetrics;
pub use preferences::PreferenceResolver;
pub use store::{MemoryContacts, MemoryPreferences, MemoryStore, NotificationStore};
pub use sweeper::RetentionSweeper;

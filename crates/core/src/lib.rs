//! Coordination core of a two-server aftershock-forecasting backend.
//!
//! - [`task`]: durable time-ordered work queue with an atomic claim.
//! - [`alias`]: stable timeline ids over changing Comcat event ids.
//! - [`relay`]: current-state items replicated between the two servers.
//!
//! Every service is generic over an [`aafs_store::DocumentStore`] and runs
//! on the caller's tokio runtime; nothing here spawns a task or a thread.

pub mod alias;
pub mod backup;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod observability;
pub mod relay;
pub mod task;

mod error;
mod record;

pub use backup::{read_backup, write_backup, BackupRecord};
pub use config::{read_config, AafsConfig, CollectionNames, ConfigError};
pub use coordinator::Coordinator;
pub use error::{CoreError, ValidationError};

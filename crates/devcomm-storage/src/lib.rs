//! Durable message records for the device gateway.
//!
//! Every received frame becomes a [`ProtocolMessageRecord`] before any
//! parsing happens, so a crash or a downstream outage never loses a frame.
//! Records only move between lifecycle states through
//! [`MessageStore::transition`], a compare-and-swap on the current state.
//!
//! # Backends
//!
//! - [`SqliteMessageStore`] - SQLite in WAL mode, schema from the workspace
//!   `migrations/` directory
//! - [`InMemoryMessageStore`] - map behind a mutex, for tests and tooling
//!
//! # Example
//!
//! ```no_run
//! use devcomm_core::{LifecycleState, Priority};
//! use devcomm_storage::{
//!     Database, DatabaseConfig, MessageStore, ProtocolMessageRecord, RecordUpdate,
//!     SqliteMessageStore,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::connect(DatabaseConfig::new("devcomm.db")).await?;
//! let store = SqliteMessageStore::new(db.pool().clone());
//!
//! let record = ProtocolMessageRecord::received(
//!     &"door-1".parse()?,
//!     "ACCESS_ENTROPY_V4_8",
//!     &[0xAA, 0x55],
//!     Priority::Medium,
//!     3,
//!     chrono::Utc::now(),
//! );
//! store.insert(&record).await?;
//!
//! let moved = store
//!     .transition(
//!         &record.message_id,
//!         LifecycleState::Received,
//!         &RecordUpdate::to(LifecycleState::Parsed),
//!     )
//!     .await?;
//! assert!(moved);
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod error;
pub mod record;
pub mod stores;

pub use connection::{Database, DatabaseConfig};
pub use error::{StorageError, StorageResult};
pub use record::{ProtocolMessageRecord, RecordUpdate};
pub use stores::{InMemoryMessageStore, MessageStore, SqliteMessageStore};

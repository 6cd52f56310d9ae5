//! Dispatch of device frames through protocol adapters.
//!
//! [`DispatchCoordinator`] takes raw frames with their device identity,
//! resolves the adapter for the device model, runs parse, validate and
//! process, and hands every outcome to the [`LifecycleManager`], which
//! persists it and schedules retries for retryable failures.
//!
//! # Example
//!
//! ```no_run
//! use devcomm_core::SystemClock;
//! use devcomm_dispatch::{DispatchConfig, DispatchCoordinator, IngestRequest, LifecycleManager};
//! use devcomm_protocol::{AdapterRegistry, LoggingServiceClient};
//! use devcomm_storage::InMemoryMessageStore;
//! use std::sync::Arc;
//!
//! # async fn example(frame: Vec<u8>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = DispatchConfig::default();
//! let lifecycle = Arc::new(LifecycleManager::new(
//!     Arc::new(InMemoryMessageStore::new()),
//!     Arc::new(SystemClock),
//!     config.backoff.build(),
//! ));
//! let registry = Arc::new(AdapterRegistry::with_builtin(Arc::new(LoggingServiceClient)));
//! let coordinator = DispatchCoordinator::new(registry, lifecycle, config);
//!
//! let outcome = coordinator
//!     .submit(IngestRequest::new("door-1".parse()?, "F18", frame))
//!     .await?;
//! println!("{} -> {}", outcome.message_id, outcome.state);
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod coordinator;
pub mod lifecycle;

pub use backoff::{BackoffConfig, BackoffPolicy, ExponentialBackoff, FixedBackoff};
pub use config::DispatchConfig;
pub use coordinator::{
    BatchItemOutcome, BatchReport, DispatchCoordinator, DispatchOutcome, IngestRequest,
};
pub use lifecycle::{LifecycleManager, LifecycleStats};

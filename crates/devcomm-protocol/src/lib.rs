//! Frame decoding and protocol adapters for heterogeneous terminals.
//!
//! # Architecture
//!
//! - [`Frame`] verifies the shared binary envelope and checksum
//! - [`ProtocolAdapter`] is the per-family parse / validate / process contract
//! - [`adapters`] holds the access, attendance and consume families
//! - [`AdapterRegistry`] maps protocol types (and, through a
//!   [`DeviceCatalog`], device models) to adapters
//! - [`BusinessServiceClient`] is the outbound boundary adapters call
//!
//! # Example
//!
//! ```
//! use devcomm_protocol::{AdapterRegistry, FrameBuilder, LoggingServiceClient, ProtocolAdapter};
//! use std::sync::Arc;
//!
//! let registry = AdapterRegistry::with_builtin(Arc::new(LoggingServiceClient));
//! let adapter = registry.resolve_for_model("MA300").unwrap();
//!
//! let bytes = FrameBuilder::new(0x01, "DEV001", 1)
//!     .u32(1001)
//!     .u8(0)
//!     .u8(1)
//!     .u8(1)
//!     .build();
//!
//! let mut message = adapter.parse(&bytes).unwrap();
//! assert!(adapter.validate(Some(&mut message)));
//! assert_eq!(message.message_type(), Some("ACCESS_RECORD"));
//! ```

pub mod adapter;
pub mod adapters;
pub mod catalog;
pub mod frame;
pub mod message;
pub mod registry;
pub mod service;

pub use adapter::{AdapterIdentity, ProtocolAdapter};
pub use adapters::{AccessAdapter, AttendanceAdapter, ConsumeAdapter, builtin_adapters};
pub use catalog::{DeviceCatalog, StaticDeviceCatalog};
pub use frame::{BodyReader, Frame, FrameBuilder, calculate_checksum, decode_hex, verify_checksum};
pub use message::{ParseStatus, ParsedMessage};
pub use registry::AdapterRegistry;
pub use service::{
    BusinessRequest, BusinessServiceClient, HttpVerb, LoggingServiceClient, ProcessContext,
    ServiceError, ServiceResponse,
};

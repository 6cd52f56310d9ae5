pub mod clock;
pub mod constants;
pub mod error;
pub mod lifecycle;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, FailureClass, ParseError, ProcessError, Result, ValidationError};
pub use lifecycle::LifecycleState;
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! The lease engine
//!
//! Per-source pools of available proxy records, the streaming session loop
//! that dispatches leases and accepts reports, cool-down timers returning
//! leased records, cross-session broadcast, and the cache/store refill path.

pub mod codec;
pub mod pool;
pub mod protocol;
pub mod refill;
pub mod registry;
pub mod scheduler;
pub mod session;

pub use codec::PayloadCodec;
pub use pool::PoolManager;
pub use refill::{RefillCoordinator, RefillOutcome};
pub use registry::{ConnectionRegistry, SessionHandle};
pub use scheduler::{LeaseScheduler, ReturnWorker};
pub use session::{SessionDeps, SessionKind};

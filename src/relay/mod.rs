//! Per-call relay sessions and the registry that owns them.

pub mod observer;
pub mod phase;
pub mod playback;
mod pump;
pub mod registry;
pub mod session;
pub mod stats;

pub use observer::{NoopObserver, SessionObserver};
pub use phase::{CloseReason, Phase};
pub use registry::SessionRegistry;
pub use session::{SessionHandle, SessionReport};
pub use stats::StatsSnapshot;

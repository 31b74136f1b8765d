//! Application Services
//!
//! Services that orchestrate domain logic over the rate source port.
//!
//! - `RateLookup`: unary point-in-time rate queries
//! - `StreamSession`: one client's receive loop and send path
//! - `SessionRegistry`: the process-wide set of live sessions
//! - `BroadcastCoordinator`: per-tick fan-out of rate updates

mod broadcast;
mod lookup;
mod registry;
mod session;

pub use broadcast::{BroadcastCoordinator, BroadcastStatsSnapshot, CycleReport};
pub use lookup::RateLookup;
pub use registry::SessionRegistry;
pub use session::{
    InboundRequest, SendError, SessionMessage, SessionSettings, SessionState, SessionStats,
    StreamSession,
};

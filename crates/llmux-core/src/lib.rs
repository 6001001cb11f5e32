//! The proxy pipeline: application state with copy-on-write config
//! snapshots, route matching, and the per-request executor that walks
//! candidates under cooldown and retry discipline.

pub mod context;
pub mod events;
pub mod executor;
pub mod router;
pub mod state;

pub use context::RequestContext;
pub use events::{Event, EventHub, RequestFinishedEvent};
pub use executor::execute;
pub use router::MatchedRoute;
pub use state::AppState;

//! HTTP ingress: the proxied AI endpoints, client-type and stream detection,
//! request-record lifecycle and error bodies.

mod proxy;
mod responses;

pub use proxy::proxy_router;

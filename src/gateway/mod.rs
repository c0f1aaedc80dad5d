//! Edge gateway: key gate, CORS decorator, upstream forwarding

pub mod auth;
pub mod cors;
pub mod proxy;
mod router;
mod server;
pub mod validator;

pub use auth::{AuthenticatedKey, KeyGate, KeySource, key_gate_middleware, parse_bearer};
pub use cors::{CorsPolicy, cors_middleware};
pub use router::{AppState, apply_edge_layers, create_router};
pub use server::{Gateway, spawn_cache_sweeper};
pub use validator::{HttpKeyValidator, KeyValidator, RejectAll, ValidationOutcome, check_key};

//! notify-guard: multi-tenant notification rate limiting and delivery reliability
//!
//! Re-exports the workspace crates and provides [`Pipeline`], which wires a
//! complete dispatcher from an [`AppConfig`].

pub mod bootstrap;

pub use bootstrap::{BootstrapError, Pipeline};

pub use notify_guard_config as config;
pub use notify_guard_metrics as metrics;
pub use notify_guard_orchestrator as orchestrator;
pub use notify_guard_ratelimit as ratelimit;
pub use notify_guard_store as store;
pub use notify_guard_types as types;

pub use notify_guard_config::AppConfig;
pub use notify_guard_orchestrator::{DispatchOutcome, NotificationDispatcher};
pub use notify_guard_ratelimit::{AdmissionDecision, RateLimitingGate};
pub use notify_guard_types::{Channel, DeliveryRequest, SendRequest};

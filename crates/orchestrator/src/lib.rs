//! Delivery reliability for notify-guard
//!
//! `NotificationDispatcher` ties the pieces together: a send is admitted by
//! the rate-limiting gate, its retry policy is resolved, and the provider call
//! is driven by `RetryOrchestrator` behind that provider's circuit breaker.
//! Results go to the audit and cost-tracking collaborators.

pub mod dispatcher;
pub mod policy;
pub mod provider;
pub mod reporting;
pub mod retry;

#[cfg(test)]
mod tests;

pub use dispatcher::{DispatchError, DispatchOutcome, NotificationDispatcher};
pub use policy::RetryPolicyResolver;
pub use provider::{DeliveryFailure, ProviderGateway, ProviderRegistry, SimulatedProvider};
pub use reporting::{
    AdmissionRecord, CostEntry, CostTracker, DeliveryAuditSink, DeliveryRecord,
    InMemoryAuditSink, InMemoryCostTracker,
};
pub use retry::{AttemptError, RetryError, RetryOrchestrator, RetryOutcome};

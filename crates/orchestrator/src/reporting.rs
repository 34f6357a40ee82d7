//! Collaborators that hear about every admission and delivery: an audit
//! sink (with a dead-letter path) and a cost tracker.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notify_guard_ratelimit::{AdmissionDecision, AdmissionRecorder, AdmissionRequest};
use notify_guard_types::Channel;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

// ═══════════════════════════════════════════════════════════════════════════
// AUDIT
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdmissionRecord {
    pub tenant_id: Option<String>,
    pub user_id: String,
    pub service_origin: String,
    pub channel: String,
    pub decision: String,
    pub admin_override: bool,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryRecord {
    pub notification_id: String,
    pub tenant_id: Option<String>,
    pub service_origin: String,
    pub channel: Channel,
    pub provider_id: Option<String>,
    pub provider_message_id: Option<String>,
    /// Outcome label (`delivered`, `retry_exhausted`, ...)
    pub outcome: String,
    pub attempts: u32,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait DeliveryAuditSink: Send + Sync {
    async fn record_delivery(&self, record: DeliveryRecord);

    /// Terminal failures that must not be dropped
    async fn dead_letter(&self, record: DeliveryRecord);
}

#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    admissions: Mutex<Vec<AdmissionRecord>>,
    deliveries: Mutex<Vec<DeliveryRecord>>,
    dead_letters: Mutex<Vec<DeliveryRecord>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admissions(&self) -> Vec<AdmissionRecord> {
        lock_clone(&self.admissions)
    }

    pub fn deliveries(&self) -> Vec<DeliveryRecord> {
        lock_clone(&self.deliveries)
    }

    pub fn dead_letters(&self) -> Vec<DeliveryRecord> {
        lock_clone(&self.dead_letters)
    }
}

fn lock_clone<T: Clone>(items: &Mutex<Vec<T>>) -> Vec<T> {
    items
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

fn lock_push<T>(items: &Mutex<Vec<T>>, item: T) {
    items
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .push(item);
}

#[async_trait]
impl DeliveryAuditSink for InMemoryAuditSink {
    async fn record_delivery(&self, record: DeliveryRecord) {
        lock_push(&self.deliveries, record);
    }

    async fn dead_letter(&self, record: DeliveryRecord) {
        lock_push(&self.dead_letters, record);
    }
}

#[async_trait]
impl AdmissionRecorder for InMemoryAuditSink {
    async fn record_admission(&self, request: &AdmissionRequest, decision: &AdmissionDecision) {
        lock_push(
            &self.admissions,
            AdmissionRecord {
                tenant_id: request.tenant_id.clone(),
                user_id: request.user_id.clone(),
                service_origin: request.service_origin.clone(),
                channel: request.channel.clone(),
                decision: decision.label().to_string(),
                admin_override: matches!(decision, AdmissionDecision::Bypassed),
                recorded_at: Utc::now(),
            },
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// COST TRACKING
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CostEntry {
    pub service_origin: String,
    pub channel: Channel,
    pub provider_id: String,
    /// Cost in millionths of the billing currency unit
    pub cost_micros: u64,
}

/// Attributes provider spend to the originating service
#[async_trait]
pub trait CostTracker: Send + Sync {
    async fn record_delivery_cost(&self, service_origin: &str, channel: Channel, provider_id: &str);
}

#[derive(Debug)]
pub struct InMemoryCostTracker {
    unit_costs: HashMap<Channel, u64>,
    entries: Mutex<Vec<CostEntry>>,
}

impl InMemoryCostTracker {
    /// Rate card: SMS 0.0075, email 0.0001, push free
    pub fn new() -> Self {
        Self::with_unit_costs(HashMap::from([
            (Channel::Sms, 7_500),
            (Channel::Email, 100),
            (Channel::Push, 0),
        ]))
    }

    pub fn with_unit_costs(unit_costs: HashMap<Channel, u64>) -> Self {
        Self {
            unit_costs,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn entries(&self) -> Vec<CostEntry> {
        lock_clone(&self.entries)
    }

    pub fn total_for_service(&self, service_origin: &str) -> u64 {
        self.entries()
            .iter()
            .filter(|entry| entry.service_origin == service_origin)
            .map(|entry| entry.cost_micros)
            .sum()
    }
}

impl Default for InMemoryCostTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CostTracker for InMemoryCostTracker {
    async fn record_delivery_cost(&self, service_origin: &str, channel: Channel, provider_id: &str) {
        let cost_micros = self.unit_costs.get(&channel).copied().unwrap_or(0);
        lock_push(
            &self.entries,
            CostEntry {
                service_origin: service_origin.to_string(),
                channel,
                provider_id: provider_id.to_string(),
                cost_micros,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cost_tracker_totals_by_service() {
        let tracker = InMemoryCostTracker::new();

        tracker.record_delivery_cost("auth", Channel::Sms, "twilio").await;
        tracker.record_delivery_cost("auth", Channel::Email, "ses").await;
        tracker.record_delivery_cost("billing", Channel::Sms, "twilio").await;

        assert_eq!(tracker.total_for_service("auth"), 7_600);
        assert_eq!(tracker.total_for_service("billing"), 7_500);
        assert_eq!(tracker.entries().len(), 3);
    }

    #[tokio::test]
    async fn test_audit_sink_records_admissions() {
        let sink = InMemoryAuditSink::new();
        let request = AdmissionRequest::new(Some("T"), "U", "auth", "sms");

        sink.record_admission(&request, &AdmissionDecision::Bypassed)
            .await;
        sink.record_admission(
            &request,
            &AdmissionDecision::Allowed {
                limit: 10,
                remaining: 9,
            },
        )
        .await;

        let admissions = sink.admissions();
        assert_eq!(admissions.len(), 2);
        assert!(admissions[0].admin_override);
        assert_eq!(admissions[1].decision, "allowed");
        assert!(!admissions[1].admin_override);
    }
}

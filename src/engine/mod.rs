pub mod conflict;
mod error;
pub mod lifecycle;
mod mutations;
mod queries;
pub mod recurrence;
pub mod slots;

pub use error::EngineError;
pub use lifecycle::{StatusChange, Transition};
pub use slots::{free_windows, generate_slots, merge_overlapping, subtract_intervals, SlotCandidates, WorkingHours};

use std::sync::Arc;

use ulid::Ulid;

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::model::*;
use crate::store::BookingStore;

/// What a caller supplies to book an interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub provider_id: Ulid,
    pub customer_id: Ulid,
    pub service_id: Ulid,
    pub span: Span,
    pub pricing: Pricing,
}

impl BookingRequest {
    pub fn new(provider_id: Ulid, customer_id: Ulid, service_id: Ulid, span: Span) -> Self {
        Self {
            provider_id,
            customer_id,
            service_id,
            span,
            pricing: Pricing::default(),
        }
    }

    pub fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.pricing = pricing;
        self
    }
}

/// Scheduling service for one tenant. Holds no booking state of its own;
/// everything goes through the store.
pub struct Scheduler {
    tenant_id: Ulid,
    store: Arc<dyn BookingStore>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(tenant_id: Ulid, store: Arc<dyn BookingStore>, clock: Arc<dyn Clock>, config: SchedulerConfig) -> Self {
        Self {
            tenant_id,
            store,
            clock,
            config,
        }
    }

    pub fn tenant_id(&self) -> Ulid {
        self.tenant_id
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn now(&self) -> Ms {
        self.clock.now_ms()
    }
}

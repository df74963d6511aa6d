//! Seams to the touchpoint store and the result sink.
//!
//! The calculator never talks to a database; callers inject an
//! `Arc<dyn TouchpointStore>` and an `Arc<dyn ResultSink>`. In-memory
//! implementations back the CLI and the tests.

use std::sync::Arc;

use campaign_core::error::AttributionOutcome;
use campaign_core::types::{Booking, Journey};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::attribution::ModelKind;
use crate::bulk::AttributionResult;

/// Source of ordered touchpoint journeys.
pub trait TouchpointStore: Send + Sync {
    fn get_journey(&self, booking_id: &Uuid) -> AttributionOutcome<Option<Journey>>;

    /// Bookings of `company_id` converted in `[start, end)`.
    fn get_bookings_in_range(
        &self,
        company_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AttributionOutcome<Vec<Booking>>;
}

/// Destination for computed attribution. Saving overwrites any earlier
/// result for the same booking and model.
pub trait ResultSink: Send + Sync {
    fn save_attribution_result(&self, result: &AttributionResult) -> AttributionOutcome<()>;
}

/// Sink that discards results.
pub struct NoOpResultSink;

impl ResultSink for NoOpResultSink {
    fn save_attribution_result(&self, _result: &AttributionResult) -> AttributionOutcome<()> {
        Ok(())
    }
}

pub fn noop_sink() -> Arc<dyn ResultSink> {
    Arc::new(NoOpResultSink)
}

/// Company-scoped booking store held in memory.
#[derive(Default)]
pub struct InMemoryTouchpointStore {
    bookings: DashMap<Uuid, (String, Booking)>,
}

impl InMemoryTouchpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, company_id: impl Into<String>, booking: Booking) {
        self.bookings
            .insert(booking.booking_id, (company_id.into(), booking));
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }
}

impl TouchpointStore for InMemoryTouchpointStore {
    fn get_journey(&self, booking_id: &Uuid) -> AttributionOutcome<Option<Journey>> {
        Ok(self
            .bookings
            .get(booking_id)
            .map(|entry| entry.value().1.journey.clone()))
    }

    fn get_bookings_in_range(
        &self,
        company_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AttributionOutcome<Vec<Booking>> {
        let mut bookings: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|entry| entry.value().0 == company_id)
            .map(|entry| entry.value().1.clone())
            .filter(|b| {
                // Journeys without any timestamp still come back so the
                // batch can report them.
                b.conversion_time()
                    .map_or(true, |at| at >= start && at < end)
            })
            .collect();
        bookings.sort_by_key(|b| b.booking_id);
        Ok(bookings)
    }
}

/// Result sink keyed by `(booking_id, model)`.
#[derive(Default)]
pub struct InMemoryResultSink {
    results: DashMap<(Uuid, ModelKind), AttributionResult>,
}

impl InMemoryResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, booking_id: &Uuid, model: ModelKind) -> Option<AttributionResult> {
        self.results
            .get(&(*booking_id, model))
            .map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl ResultSink for InMemoryResultSink {
    fn save_attribution_result(&self, result: &AttributionResult) -> AttributionOutcome<()> {
        self.results
            .insert((result.booking_id, result.model), result.clone());
        Ok(())
    }
}

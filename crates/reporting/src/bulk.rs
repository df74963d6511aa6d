//! Bulk attribution recompute. The pure pass ([`recompute_bulk`]) is
//! deterministic; [`BulkRecomputer`] wraps it with store reads, concurrent
//! chunk evaluation and result persistence.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::anyhow;
use campaign_core::error::{AttributionError, AttributionOutcome};
use campaign_core::types::{Booking, BookingStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::attribution::{attribute_with_reference, AttributionModel, ModelKind};
use crate::store::{ResultSink, TouchpointStore};

/// Credit assigned to one touchpoint of a booking's journey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TouchpointCredit {
    pub index: usize,
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    pub fraction: f64,
    pub revenue: f64,
}

/// Attribution of one booking under one model. Replaces any earlier result
/// for the same booking and model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionResult {
    pub booking_id: Uuid,
    pub model: ModelKind,
    pub revenue: f64,
    pub credits: Vec<TouchpointCredit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidInput,
    /// Another booking in the batch already carried this id.
    DuplicateBooking,
    Persistence,
    Internal,
}

/// A booking that could not be attributed within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingFailure {
    pub booking_id: Uuid,
    pub kind: FailureKind,
    pub error: String,
}

impl BookingFailure {
    fn from_error(booking_id: Uuid, err: &AttributionError) -> Self {
        let kind = match err {
            AttributionError::InvalidInput(_) => FailureKind::InvalidInput,
            AttributionError::Sink(_) => FailureKind::Persistence,
            // Model config is validated before any booking is evaluated.
            AttributionError::InvalidConfig(_)
            | AttributionError::Store(_)
            | AttributionError::Serialization(_)
            | AttributionError::Io(_)
            | AttributionError::Internal(_) => FailureKind::Internal,
        };
        Self {
            booking_id,
            kind,
            error: err.to_string(),
        }
    }

    fn duplicate(booking_id: Uuid) -> Self {
        Self {
            booking_id,
            kind: FailureKind::DuplicateBooking,
            error: format!("duplicate booking id {booking_id} in batch"),
        }
    }
}

/// Totals and per-booking results of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub model: ModelKind,
    pub bookings_processed: u64,
    pub total_revenue: f64,
    pub results: BTreeMap<Uuid, AttributionResult>,
    pub failures: Vec<BookingFailure>,
    /// Bookings not in a completed state.
    pub skipped: Vec<Uuid>,
    pub cancelled: bool,
}

impl BulkOutcome {
    fn empty(model: ModelKind) -> Self {
        Self {
            model,
            bookings_processed: 0,
            total_revenue: 0.0,
            results: BTreeMap::new(),
            failures: Vec::new(),
            skipped: Vec::new(),
            cancelled: false,
        }
    }

    /// Keeps the first result per booking id; later ones become failures.
    fn insert_result(&mut self, result: AttributionResult) {
        match self.results.entry(result.booking_id) {
            Entry::Vacant(slot) => {
                slot.insert(result);
            }
            Entry::Occupied(_) => {
                warn!(booking_id = %result.booking_id, "Duplicate booking id in batch");
                self.failures.push(BookingFailure::duplicate(result.booking_id));
            }
        }
    }

    fn merge(&mut self, other: BulkOutcome) {
        for result in other.results.into_values() {
            self.insert_result(result);
        }
        self.failures.extend(other.failures);
        self.skipped.extend(other.skipped);
        self.cancelled |= other.cancelled;
    }

    /// Recomputes totals from `results` and orders the lists by booking id,
    /// so the outcome does not depend on evaluation order.
    fn finalize(&mut self) {
        self.bookings_processed = self.results.len() as u64;
        self.total_revenue = self.results.values().map(|r| r.revenue).sum();
        self.failures.sort_by_key(|f| f.booking_id);
        self.skipped.sort();
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
}

/// Attributes a single booking, using `booked_at` as the time-decay reference
/// when present.
pub fn attribute_booking(
    booking: &Booking,
    model: &AttributionModel,
) -> AttributionOutcome<AttributionResult> {
    let fractions =
        attribute_with_reference(&booking.journey, booking.revenue, model, booking.booked_at)?;

    let credits = booking
        .journey
        .touchpoints()
        .iter()
        .zip(fractions)
        .enumerate()
        .map(|(index, (tp, fraction))| TouchpointCredit {
            index,
            channel_id: tp.channel_id.clone(),
            campaign_id: tp.campaign_id.clone(),
            fraction,
            revenue: booking.revenue * fraction,
        })
        .collect();

    Ok(AttributionResult {
        booking_id: booking.booking_id,
        model: model.kind(),
        revenue: booking.revenue,
        credits,
    })
}

fn evaluate_chunk(
    bookings: &[Booking],
    model: &AttributionModel,
    cancel: &CancellationToken,
) -> BulkOutcome {
    let mut outcome = BulkOutcome::empty(model.kind());

    for booking in bookings {
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            break;
        }
        if !booking.status.is_attributable() {
            outcome.skipped.push(booking.booking_id);
            continue;
        }
        match attribute_booking(booking, model) {
            Ok(result) => outcome.insert_result(result),
            Err(e) => {
                warn!(booking_id = %booking.booking_id, error = %e, "Booking attribution failed");
                outcome
                    .failures
                    .push(BookingFailure::from_error(booking.booking_id, &e));
            }
        }
    }

    outcome
}

fn record_metrics(outcome: &BulkOutcome) {
    metrics::counter!("attribution.bookings_processed").increment(outcome.bookings_processed);
    metrics::counter!("attribution.booking_failures").increment(outcome.failures.len() as u64);
    metrics::counter!("attribution.bookings_skipped").increment(outcome.skipped.len() as u64);
}

/// Attributes every booking under `model`. A malformed booking is reported in
/// `failures` and does not stop the batch; an invalid model fails the call.
pub fn recompute_bulk(
    bookings: &[Booking],
    model: &AttributionModel,
) -> AttributionOutcome<BulkOutcome> {
    model.validate()?;
    let mut outcome = evaluate_chunk(bookings, model, &CancellationToken::new());
    outcome.finalize();
    record_metrics(&outcome);
    Ok(outcome)
}

/// Store-backed recompute job that evaluates bookings in parallel chunks and
/// writes results to the sink.
#[derive(Clone)]
pub struct BulkRecomputer {
    store: Arc<dyn TouchpointStore>,
    sink: Arc<dyn ResultSink>,
    chunk_size: usize,
    cancel: CancellationToken,
}

impl std::fmt::Debug for BulkRecomputer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkRecomputer")
            .field("chunk_size", &self.chunk_size)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl BulkRecomputer {
    pub fn new(store: Arc<dyn TouchpointStore>, sink: Arc<dyn ResultSink>) -> Self {
        Self {
            store,
            sink,
            chunk_size: 256,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Token that stops the job between bookings when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Recomputes every booking the store returns for the company and range,
    /// then persists each successful result.
    pub async fn run(
        &self,
        company_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        model: AttributionModel,
    ) -> AttributionOutcome<BulkOutcome> {
        model.validate()?;
        let bookings = self.store.get_bookings_in_range(company_id, start, end)?;
        info!(
            company_id = %company_id,
            model = %model.kind(),
            bookings = bookings.len(),
            "Starting attribution recompute"
        );

        let mut handles = Vec::new();
        for chunk in bookings.chunks(self.chunk_size) {
            let chunk = chunk.to_vec();
            let cancel = self.cancel.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                evaluate_chunk(&chunk, &model, &cancel)
            }));
        }
        debug!(chunks = handles.len(), "Attribution chunks scheduled");

        let mut outcome = BulkOutcome::empty(model.kind());
        for handle in handles {
            let part = handle
                .await
                .map_err(|e| AttributionError::Internal(anyhow!("attribution task failed: {e}")))?;
            outcome.merge(part);
        }

        self.persist(&mut outcome);
        outcome.finalize();
        record_metrics(&outcome);

        info!(
            processed = outcome.bookings_processed,
            failed = outcome.failures.len(),
            skipped = outcome.skipped.len(),
            total_revenue = outcome.total_revenue,
            cancelled = outcome.cancelled,
            "Attribution recompute finished"
        );
        Ok(outcome)
    }

    /// Re-attributes one booking from its stored journey and persists it.
    pub fn recompute_one(
        &self,
        booking_id: Uuid,
        revenue: f64,
        model: &AttributionModel,
    ) -> AttributionOutcome<AttributionResult> {
        let journey = self.store.get_journey(&booking_id)?.ok_or_else(|| {
            AttributionError::invalid_input(format!("no journey recorded for booking {booking_id}"))
        })?;
        let booking = Booking {
            booking_id,
            revenue,
            status: BookingStatus::Completed,
            booked_at: None,
            journey,
        };
        let result = attribute_booking(&booking, model)?;
        self.sink.save_attribution_result(&result)?;
        Ok(result)
    }

    fn persist(&self, outcome: &mut BulkOutcome) {
        let mut rejected = Vec::new();
        for result in outcome.results.values() {
            if let Err(e) = self.sink.save_attribution_result(result) {
                warn!(booking_id = %result.booking_id, error = %e, "Failed to persist attribution");
                rejected.push(BookingFailure::from_error(result.booking_id, &e));
            }
        }
        for failure in &rejected {
            outcome.results.remove(&failure.booking_id);
        }
        outcome.failures.extend(rejected);
    }
}

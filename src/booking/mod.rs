//! Booking conflict and availability resolution.
//!
//! `create_reservation` runs a fixed pipeline, each stage able to reject:
//!
//! 1. local validation of the request (no I/O)
//! 2. overlap against existing reservations in the store
//! 3. catalog lookup: the resource must be reachable, known and active
//! 4. the catalog's unavailability windows
//! 5. insert as `Pending`
//!
//! The store check runs before the catalog call so a plain double booking
//! never costs a network round trip. Stages 2 to 5 run under a per-resource lock;
//! the store re-checks overlap on insert as well.

mod locks;
mod windows;

pub use locks::{ResourceLockGuard, ResourceLocks};
pub use windows::{first_intersecting, intersects};

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, info_span, warn, Instrument};
use ulid::Ulid;

use crate::catalog::{Availability, AvailabilityClient};
use crate::clock::{Clock, SystemClock};
use crate::engine::{validate_span, EngineError, ReservationStore, UnavailableReason};
use crate::limits::*;
use crate::model::*;

/// Per-call context supplied by whatever front end received the request.
/// Carried into log spans only; never part of a decision.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub correlation_id: String,
}

impl CallContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
        }
    }

    pub fn generated() -> Self {
        Self::new(Ulid::new().to_string())
    }
}

/// A booking attempt as received. Bounds are optional so a missing one is
/// reported as a validation failure rather than a parse error upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub resource_id: Ulid,
    pub customer: Customer,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
}

pub struct BookingService {
    store: Arc<dyn ReservationStore>,
    availability: AvailabilityClient,
    locks: ResourceLocks,
    clock: Arc<dyn Clock>,
}

impl BookingService {
    pub fn new(store: Arc<dyn ReservationStore>, availability: AvailabilityClient) -> Self {
        Self {
            store,
            availability,
            locks: ResourceLocks::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn create_reservation(
        &self,
        ctx: &CallContext,
        request: ReservationRequest,
    ) -> Result<Reservation, EngineError> {
        let span = info_span!(
            "create_reservation",
            correlation_id = %ctx.correlation_id,
            resource_id = %request.resource_id,
        );
        let started = Instant::now();
        let result = self.decide(request).instrument(span.clone()).await;

        let outcome = span.in_scope(|| match &result {
            Ok(r) => {
                info!("accepted reservation {} [{}, {})", r.id, r.span.start, r.span.end);
                "accepted"
            }
            Err(e @ EngineError::TransientDependency(_)) => {
                warn!("reservation failed: {e}");
                e.kind()
            }
            Err(e) => {
                info!("rejected reservation: {e}");
                e.kind()
            }
        });
        metrics::counter!(crate::observability::RESERVATION_DECISIONS_TOTAL, "outcome" => outcome)
            .increment(1);
        metrics::histogram!(crate::observability::RESERVATION_DECISION_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn decide(&self, request: ReservationRequest) -> Result<Reservation, EngineError> {
        let now = self.clock.now_ms();
        let span = validate_request(&request, now)?;
        let resource_id = request.resource_id;

        let _lock = self.locks.acquire(resource_id).await;

        if let Some(existing) = self.store.find_overlap(resource_id, span).await? {
            return Err(EngineError::Conflict(existing));
        }

        let snapshot = match self.availability.fetch_snapshot(resource_id).await {
            Availability::Snapshot(snapshot) => snapshot,
            Availability::Unavailable(cause) => {
                return Err(EngineError::Unavailable(UnavailableReason::Lookup(cause)));
            }
        };
        if !snapshot.active {
            return Err(EngineError::Unavailable(UnavailableReason::Inactive));
        }

        if let Some(window) = first_intersecting(&snapshot.unavailable_windows, &span) {
            return Err(EngineError::Unavailable(UnavailableReason::Window(window)));
        }

        let reservation = Reservation::pending(resource_id, span, request.customer, now);
        self.store.create(reservation).await
    }

    pub async fn get_reservation(
        &self,
        ctx: &CallContext,
        id: Ulid,
    ) -> Result<Reservation, EngineError> {
        self.store
            .find_by_id(id)
            .instrument(info_span!("get_reservation", correlation_id = %ctx.correlation_id))
            .await?
            .ok_or(EngineError::NotFound(id))
    }

    /// `Ok(false)` when the id is unknown.
    pub async fn delete_reservation(&self, ctx: &CallContext, id: Ulid) -> Result<bool, EngineError> {
        let deleted = self.store.delete_by_id(id).await?;
        info!(
            correlation_id = %ctx.correlation_id,
            "delete reservation {id}: {}",
            if deleted { "removed" } else { "not found" }
        );
        Ok(deleted)
    }

    pub async fn list_reservations(
        &self,
        ctx: &CallContext,
        resource_id: Option<Ulid>,
    ) -> Result<Vec<Reservation>, EngineError> {
        self.store
            .list(resource_id)
            .instrument(info_span!("list_reservations", correlation_id = %ctx.correlation_id))
            .await
    }
}

/// Stage 1. Pure; rejects before any lock or I/O.
pub fn validate_request(request: &ReservationRequest, now: Ms) -> Result<Span, EngineError> {
    let (start, end) = match (request.start, request.end) {
        (Some(start), Some(end)) => (start, end),
        (None, _) => return Err(EngineError::invalid("start time is required")),
        (_, None) => return Err(EngineError::invalid("end time is required")),
    };
    if end <= start {
        return Err(EngineError::invalid("end time must be after start time"));
    }
    let span = Span::new(start, end);
    validate_span(&span)?;
    if start <= now {
        return Err(EngineError::invalid("start time must be in the future"));
    }

    let Customer { name, email } = &request.customer;
    if name.trim().is_empty() {
        return Err(EngineError::invalid("customer name is required"));
    }
    if email.trim().is_empty() {
        return Err(EngineError::invalid("customer email is required"));
    }
    if name.len() > MAX_CUSTOMER_NAME_LEN {
        return Err(EngineError::invalid("customer name too long"));
    }
    if email.len() > MAX_CUSTOMER_EMAIL_LEN {
        return Err(EngineError::invalid("customer email too long"));
    }
    if !looks_like_email(email) {
        return Err(EngineError::invalid("customer email is not a valid address"));
    }
    Ok(span)
}

/// `local@domain`, both parts present, no whitespace, no empty domain labels.
fn looks_like_email(email: &str) -> bool {
    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !email.chars().any(char::is_whitespace)
        && domain.split('.').all(|label| !label.is_empty())
}

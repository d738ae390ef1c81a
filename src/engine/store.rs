use async_trait::async_trait;
use ulid::Ulid;

use crate::model::{Reservation, Span};

use super::{Engine, EngineError};

/// Persistence seam the booking orchestrator depends on.
///
/// `create` must reject a non-cancelled reservation that overlaps an existing
/// non-cancelled one on the same resource with [`EngineError::Conflict`];
/// callers rely on that as the last line against double booking.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Id of the first non-cancelled reservation on `resource_id` overlapping `span`.
    async fn find_overlap(&self, resource_id: Ulid, span: Span)
        -> Result<Option<Ulid>, EngineError>;

    async fn exists_overlap(&self, resource_id: Ulid, span: Span) -> Result<bool, EngineError> {
        Ok(self.find_overlap(resource_id, span).await?.is_some())
    }

    async fn create(&self, reservation: Reservation) -> Result<Reservation, EngineError>;

    async fn find_by_id(&self, id: Ulid) -> Result<Option<Reservation>, EngineError>;

    /// `Ok(false)` when no reservation has this id.
    async fn delete_by_id(&self, id: Ulid) -> Result<bool, EngineError>;

    async fn list(&self, resource_id: Option<Ulid>) -> Result<Vec<Reservation>, EngineError>;
}

#[async_trait]
impl ReservationStore for Engine {
    async fn find_overlap(
        &self,
        resource_id: Ulid,
        span: Span,
    ) -> Result<Option<Ulid>, EngineError> {
        Ok(Engine::find_overlap(self, resource_id, span).await)
    }

    async fn create(&self, reservation: Reservation) -> Result<Reservation, EngineError> {
        self.insert_reservation(reservation).await
    }

    async fn find_by_id(&self, id: Ulid) -> Result<Option<Reservation>, EngineError> {
        match self.get_reservation(id).await {
            Ok(r) => Ok(Some(r)),
            Err(EngineError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn delete_by_id(&self, id: Ulid) -> Result<bool, EngineError> {
        self.delete_reservation(id).await
    }

    async fn list(&self, resource_id: Option<Ulid>) -> Result<Vec<Reservation>, EngineError> {
        Ok(self.list_reservations(resource_id).await)
    }
}

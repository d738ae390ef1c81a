use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_span};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// Insert a reservation. Overlap is re-checked under the resource's write
    /// lock, so two racing inserts for one slot cannot both land.
    pub async fn insert_reservation(
        &self,
        reservation: Reservation,
    ) -> Result<Reservation, EngineError> {
        validate_span(&reservation.span)?;
        if self.reservation_to_resource.contains_key(&reservation.id) {
            return Err(EngineError::AlreadyExists(reservation.id));
        }

        let _gate = self.wal_gate.read().await;
        let book = self.book_or_create(reservation.resource_id);
        let mut guard = book.write().await;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_RESOURCE {
            return Err(EngineError::invalid("too many reservations on resource"));
        }
        if reservation.status.is_active() {
            check_no_conflict(&guard, &reservation.span)?;
        }

        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(reservation)
    }

    /// Hard delete. `Ok(false)` if the id is unknown.
    pub async fn delete_reservation(&self, id: Ulid) -> Result<bool, EngineError> {
        let _gate = self.wal_gate.read().await;
        let Some(resource_id) = self.resource_for_reservation(&id) else {
            return Ok(false);
        };
        let Some(book) = self.get_book(&resource_id) else {
            return Ok(false);
        };
        let mut guard = book.write().await;
        // Lost a race with another delete while waiting for the lock.
        if guard.get(id).is_none() {
            return Ok(false);
        }
        let event = Event::ReservationDeleted { id, resource_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(true)
    }

    /// Rewrite the WAL with one creation event per live reservation.
    /// Mutations wait until the compacted file is in place.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.wal_gate.write().await;
        let events: Vec<Event> = self
            .list_reservations(None)
            .await
            .into_iter()
            .map(|reservation| Event::ReservationCreated { reservation })
            .collect();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::TransientDependency("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::TransientDependency("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::TransientDependency(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Id of the first non-cancelled reservation on `resource_id` overlapping `span`.
    pub async fn find_overlap(&self, resource_id: Ulid, span: Span) -> Option<Ulid> {
        let book = self.get_book(&resource_id)?;
        let guard = book.read().await;
        guard.first_blocking(&span).map(|r| r.id)
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let resource_id = self
            .resource_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let book = self.get_book(&resource_id).ok_or(EngineError::NotFound(id))?;
        let guard = book.read().await;
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Reservations for one resource, or every resource, ordered by resource then start.
    pub async fn list_reservations(&self, resource_id: Option<Ulid>) -> Vec<Reservation> {
        let mut resource_ids: Vec<Ulid> = match resource_id {
            Some(rid) => vec![rid],
            None => self.books.iter().map(|e| *e.key()).collect(),
        };
        resource_ids.sort();

        let mut out = Vec::new();
        for rid in resource_ids {
            let Some(book) = self.get_book(&rid) else { continue };
            let guard = book.read().await;
            out.extend(guard.reservations.iter().cloned());
        }
        out
    }

    pub fn reservation_count(&self) -> usize {
        self.reservation_to_resource.len()
    }
}

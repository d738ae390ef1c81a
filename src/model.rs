use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Half-open overlap test on raw bounds: `[a_start, a_end)` vs `[b_start, b_end)`.
/// Touching intervals (`a_end == b_start`) do not overlap.
pub fn overlaps(a_start: Ms, a_end: Ms, b_start: Ms, b_end: Ms) -> bool {
    a_start < b_end && a_end > b_start
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for bounds that come from outside the process.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    /// Cancelled reservations never block a time range.
    pub fn is_active(self) -> bool {
        !matches!(self, ReservationStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Cancelled => "CANCELLED",
        }
    }
}

/// Customer identity. Stored and returned, never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub span: Span,
    pub status: ReservationStatus,
    pub customer: Customer,
    pub created_at: Ms,
}

impl Reservation {
    pub fn pending(resource_id: Ulid, span: Span, customer: Customer, created_at: Ms) -> Self {
        Self {
            id: Ulid::new(),
            resource_id,
            span,
            status: ReservationStatus::Pending,
            customer,
            created_at,
        }
    }

    pub fn blocks(&self, span: &Span) -> bool {
        self.status.is_active() && self.span.overlaps(span)
    }
}

/// All reservations held against one external resource.
#[derive(Debug, Clone)]
pub struct ResourceBook {
    pub resource_id: Ulid,
    /// Sorted by `span.start`.
    pub reservations: Vec<Reservation>,
}

impl ResourceBook {
    pub fn new(resource_id: Ulid) -> Self {
        Self {
            resource_id,
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Reservations (any status) whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    /// First non-cancelled reservation that overlaps `query`.
    pub fn first_blocking(&self, query: &Span) -> Option<&Reservation> {
        self.overlapping(query).find(|r| r.status.is_active())
    }
}

/// WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated { reservation: Reservation },
    ReservationDeleted { id: Ulid, resource_id: Ulid },
}

impl Event {
    pub fn resource_id(&self) -> Ulid {
        match self {
            Event::ReservationCreated { reservation } => reservation.resource_id,
            Event::ReservationDeleted { resource_id, .. } => *resource_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn customer() -> Customer {
        Customer {
            name: "Ada".into(),
            email: "ada@example.com".into(),
        }
    }

    fn reservation(start: Ms, end: Ms, status: ReservationStatus) -> Reservation {
        let mut r = Reservation::pending(Ulid::new(), Span::new(start, end), customer(), 0);
        r.status = status;
        r
    }

    #[test]
    fn touching_is_not_overlapping() {
        let h = 3_600_000;
        assert!(!overlaps(10 * h, 11 * h, 11 * h, 12 * h));
        assert!(!overlaps(11 * h, 12 * h, 10 * h, 11 * h));
    }

    #[test]
    fn containment_overlaps() {
        let m = 60_000;
        assert!(overlaps(600 * m, 720 * m, 630 * m, 645 * m));
        assert!(overlaps(630 * m, 645 * m, 600 * m, 720 * m));
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(a.overlaps(&a));
    }

    #[test]
    fn try_new_rejects_empty_and_inverted() {
        assert!(Span::try_new(100, 100).is_none());
        assert!(Span::try_new(200, 100).is_none());
        assert_eq!(Span::try_new(100, 101), Some(Span::new(100, 101)));
    }

    #[test]
    fn book_keeps_start_order() {
        let mut book = ResourceBook::new(Ulid::new());
        book.insert(reservation(300, 400, ReservationStatus::Pending));
        book.insert(reservation(100, 200, ReservationStatus::Confirmed));
        book.insert(reservation(200, 300, ReservationStatus::Pending));
        let starts: Vec<Ms> = book.reservations.iter().map(|r| r.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut book = ResourceBook::new(Ulid::new());
        book.insert(reservation(100, 200, ReservationStatus::Pending));
        book.insert(reservation(450, 600, ReservationStatus::Pending));
        book.insert(reservation(1000, 1100, ReservationStatus::Pending));

        let hits: Vec<_> = book.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_long_reservation_spanning_query() {
        let mut book = ResourceBook::new(Ulid::new());
        book.insert(reservation(0, 10_000, ReservationStatus::Pending));
        assert_eq!(book.overlapping(&Span::new(500, 600)).count(), 1);
    }

    #[test]
    fn cancelled_never_blocks() {
        let mut book = ResourceBook::new(Ulid::new());
        book.insert(reservation(100, 200, ReservationStatus::Cancelled));
        assert!(book.first_blocking(&Span::new(150, 250)).is_none());

        let confirmed = reservation(150, 180, ReservationStatus::Confirmed);
        let id = confirmed.id;
        book.insert(confirmed);
        assert_eq!(book.first_blocking(&Span::new(150, 250)).map(|r| r.id), Some(id));
    }

    #[test]
    fn remove_nonexistent_returns_none() {
        let mut book = ResourceBook::new(Ulid::new());
        book.insert(reservation(100, 200, ReservationStatus::Pending));
        assert!(book.remove(Ulid::new()).is_none());
        assert_eq!(book.reservations.len(), 1);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationCreated {
            reservation: reservation(1000, 2000, ReservationStatus::Pending),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    proptest! {
        #[test]
        fn overlap_is_symmetric(
            a_start in -1_000_000i64..1_000_000,
            a_len in 1i64..100_000,
            b_start in -1_000_000i64..1_000_000,
            b_len in 1i64..100_000,
        ) {
            let (a_end, b_end) = (a_start + a_len, b_start + b_len);
            prop_assert_eq!(
                overlaps(a_start, a_end, b_start, b_end),
                overlaps(b_start, b_end, a_start, a_end)
            );
        }

        #[test]
        fn adjacent_spans_never_overlap(start in -1_000_000i64..1_000_000, a_len in 1i64..100_000, b_len in 1i64..100_000) {
            let mid = start + a_len;
            prop_assert!(!overlaps(start, mid, mid, mid + b_len));
        }

        #[test]
        fn overlap_matches_shared_instant(
            a_start in -500i64..500,
            a_len in 1i64..200,
            b_start in -500i64..500,
            b_len in 1i64..200,
        ) {
            let a = Span::new(a_start, a_start + a_len);
            let b = Span::new(b_start, b_start + b_len);
            let shared = (a.start..a.end).any(|t| b.start <= t && t < b.end);
            prop_assert_eq!(a.overlaps(&b), shared);
        }
    }
}

use crate::model::Ms;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single reservation may not exceed 31 days.
pub const MAX_RESERVATION_DURATION_MS: Ms = 31 * 24 * 3_600_000;

pub const MAX_CUSTOMER_NAME_LEN: usize = 256;
pub const MAX_CUSTOMER_EMAIL_LEN: usize = 320;

pub const MAX_RESERVATIONS_PER_RESOURCE: usize = 100_000;

/// Upper bound on windows accepted from one catalog snapshot.
pub const MAX_UNAVAILABLE_WINDOWS: usize = 10_000;

/// Catalog response bodies larger than this are treated as malformed.
pub const MAX_CATALOG_BODY_BYTES: usize = 1 << 20;

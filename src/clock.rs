use crate::model::Ms;

/// Source of "now" for validation and `created_at`.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Ms;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Ms {
        crate::engine::now_ms()
    }
}

/// Always returns the same instant.
pub struct FixedClock(pub Ms);

impl Clock for FixedClock {
    fn now_ms(&self) -> Ms {
        self.0
    }
}

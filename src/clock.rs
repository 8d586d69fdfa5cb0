use std::time::{Duration, Instant};

/// Monotonic microsecond clock plus the cooperative sleep primitive.
///
/// Both live on one trait so a test clock can advance virtual time when
/// slept on. Readings share one epoch; consumers take differences with
/// `wrapping_sub` so long runs tolerate wraparound.
pub trait Clock: Send + Sync {
    fn now_micros(&self) -> u64;
    fn sleep(&self, duration: Duration);
}

/// Clock backed by `std::time::Instant`, anchored at construction.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    #[must_use]
    pub fn new() -> Self {
        MonotonicClock { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[allow(clippy::cast_possible_truncation)]
    fn now_micros(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Incremental per-session round-trip bookkeeping.
///
/// Mean and variance use Welford's numerically stable update; sample
/// variance is `m2 / (received - 1)` and undefined below two samples.
/// Round trips are unsigned microsecond differences between two same-epoch
/// clock readings.
#[derive(Debug, Clone)]
pub struct Statistics {
    sent: u64,
    received: u64,
    lost: u64,
    last_rtt_micros: u64,
    min_micros: f64,
    max_micros: f64,
    mean_micros: f64,
    m2: f64,
}

impl Statistics {
    #[must_use]
    pub fn new() -> Self {
        Statistics {
            sent: 0,
            received: 0,
            lost: 0,
            last_rtt_micros: 0,
            min_micros: f64::INFINITY,
            max_micros: 0.0,
            mean_micros: 0.0,
            m2: 0.0,
        }
    }

    pub(crate) fn on_sent(&mut self) {
        self.sent += 1;
    }

    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn on_reply(&mut self, rtt_micros: u64) {
        self.received += 1;
        self.last_rtt_micros = rtt_micros;

        let x = rtt_micros as f64;
        self.min_micros = self.min_micros.min(x);
        self.max_micros = self.max_micros.max(x);

        let delta = x - self.mean_micros;
        self.mean_micros += delta / self.received as f64;
        if self.received > 1 {
            self.m2 += delta * (x - self.mean_micros);
        }
    }

    pub(crate) fn on_timeout(&mut self) {
        self.lost += 1;
        self.last_rtt_micros = 0;
    }

    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent
    }

    #[must_use]
    pub fn received(&self) -> u64 {
        self.received
    }

    #[must_use]
    pub fn lost(&self) -> u64 {
        self.lost
    }

    /// Round trip of the last finished round, 0 when it was lost.
    #[must_use]
    pub fn last_round_micros(&self) -> u64 {
        self.last_rtt_micros
    }

    /// Smallest round trip seen, `+inf` until the first reply.
    #[must_use]
    pub fn min_micros(&self) -> f64 {
        self.min_micros
    }

    /// Largest round trip seen, 0 until the first reply.
    #[must_use]
    pub fn max_micros(&self) -> f64 {
        self.max_micros
    }

    #[must_use]
    pub fn mean_micros(&self) -> f64 {
        self.mean_micros
    }

    /// Sample variance, `None` below two replies.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn variance(&self) -> Option<f64> {
        if self.received > 1 {
            Some(self.m2 / (self.received - 1) as f64)
        } else {
            None
        }
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

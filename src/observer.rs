use crate::sequence_number::SequenceNumber;

/// One completed round as reported to an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundSample {
    pub sequence: SequenceNumber,
    /// Size of the echo message on the wire. Measured on the request,
    /// which a conforming responder echoes byte for byte, so the value
    /// holds for the reply too and is known even when the round is lost.
    pub bytes: usize,
    /// Measured round trip, `None` when the round was lost.
    pub rtt_micros: Option<u64>,
}

/// Synchronous progress hooks invoked by a running session.
///
/// `on_sample` fires once per completed round, `on_waiting` fires on every
/// inter-round idle slice. Both are non-functional injection points; the
/// default implementations do nothing.
pub trait Observer: Send {
    fn on_sample(&mut self, sample: RoundSample) {
        let _ = sample;
    }

    fn on_waiting(&mut self) {}
}

/// Observer that ignores everything.
pub struct NullObserver;

impl Observer for NullObserver {}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Collects every sample and counts idle slices. Clones share storage,
    /// so a copy kept by the test observes what the session recorded.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingObserver {
        samples: Arc<Mutex<Vec<RoundSample>>>,
        waits: Arc<Mutex<usize>>,
    }

    impl RecordingObserver {
        pub(crate) fn samples(&self) -> Vec<RoundSample> {
            self.samples.lock().unwrap().clone()
        }

        pub(crate) fn waits(&self) -> usize {
            *self.waits.lock().unwrap()
        }
    }

    impl Observer for RecordingObserver {
        fn on_sample(&mut self, sample: RoundSample) {
            self.samples.lock().unwrap().push(sample);
        }

        fn on_waiting(&mut self) {
            *self.waits.lock().unwrap() += 1;
        }
    }

    #[test]
    fn null_observer_accepts_everything() {
        let mut observer = NullObserver;
        observer.on_sample(RoundSample {
            sequence: SequenceNumber::start_value(),
            bytes: 64,
            rtt_micros: Some(1_250),
        });
        observer.on_waiting();
    }
}

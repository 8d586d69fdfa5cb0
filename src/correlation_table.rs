use crate::sequence_number::SequenceNumber;
use std::sync::Mutex;

/// Capacity of the default table: the platform cap on concurrent raw sockets.
pub const MAX_CONCURRENT_SESSIONS: usize = 64;

/// Slot index of a session in the correlation table, embedded as the
/// identifier field of every echo request the session sends.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct SessionIdentity(u16);

impl SessionIdentity {
    #[must_use]
    pub fn new(index: u16) -> Self {
        SessionIdentity(index)
    }

    pub(crate) fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl From<SessionIdentity> for u16 {
    fn from(identity: SessionIdentity) -> Self {
        identity.0
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct ReplyRecord {
    expected: SequenceNumber,
    /// Measured round trip in microseconds, 0 = still pending.
    rtt_micros: u64,
}

/// Shared map from socket identity to the one outstanding expectation of
/// that session, written by every session's receive path.
///
/// Raw ICMP sockets observe all inbound ICMP traffic on the host, so the
/// reply to one session's request may surface in another session's receive
/// loop. Attribution therefore goes through this table, keyed purely by
/// identity + sequence. Each entry has its own lock, held only for the
/// memory operation, never across I/O.
pub struct CorrelationTable {
    entries: Vec<Mutex<ReplyRecord>>,
}

impl CorrelationTable {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            entries.push(Mutex::new(ReplyRecord {
                expected: SequenceNumber::start_value(),
                rtt_micros: 0,
            }));
        }
        CorrelationTable { entries }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Arms the entry for `identity` with a fresh expectation. Called
    /// immediately before the corresponding request is sent, so a reply
    /// racing the send call can never match a stale expectation.
    pub fn reset(&self, identity: SessionIdentity, sequence: SequenceNumber) {
        debug_assert!(identity.index() < self.entries.len());
        if let Some(entry) = self.entries.get(identity.index()) {
            let mut record = entry.lock().expect("correlation table lock poisoned");
            *record = ReplyRecord { expected: sequence, rtt_micros: 0 };
        }
    }

    /// Stores a measured round trip if `sequence` is still the expectation
    /// for `identifier`. Stale sequences, duplicates of an already measured
    /// round, and identifiers outside the table are discarded silently -
    /// the identifier comes straight off the wire and may belong to anyone.
    pub fn record(&self, identifier: u16, sequence: SequenceNumber, rtt_micros: u64) {
        let Some(entry) = self.entries.get(usize::from(identifier)) else {
            return;
        };
        let mut record = entry.lock().expect("correlation table lock poisoned");
        if record.expected == sequence && record.rtt_micros == 0 {
            // Floor at 1us: zero marks a pending entry.
            record.rtt_micros = rtt_micros.max(1);
        }
    }

    /// Reads the round trip recorded for `identity`, 0 while pending.
    #[must_use]
    pub fn peek(&self, identity: SessionIdentity) -> u64 {
        debug_assert!(identity.index() < self.entries.len());
        match self.entries.get(identity.index()) {
            Some(entry) => entry.lock().expect("correlation table lock poisoned").rtt_micros,
            None => 0,
        }
    }
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new(MAX_CONCURRENT_SESSIONS)
    }
}

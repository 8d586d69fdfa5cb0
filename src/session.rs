use crate::clock::{Clock, MonotonicClock};
use crate::config::SessionConfig;
use crate::correlation_table::{CorrelationTable, SessionIdentity};
use crate::echo_codec::{self, EchoKind};
use crate::error::SessionError;
use crate::observer::{NullObserver, Observer, RoundSample};
use crate::resolver::{DnsResolver, Resolver};
use crate::sequence_number::SequenceNumber;
use crate::statistics::Statistics;
use crate::target::{AddressFamily, Target};
use crate::transport::Transport;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Slice width of the cooperative waits; a stop request or an expiring
/// deadline is observed within one slice.
const POLL_GRANULARITY: Duration = Duration::from_millis(10);
/// Large enough for any IP header plus the biggest configurable echo.
const RECV_BUFFER_SIZE: usize = 512;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionState {
    Idle,
    Resolving,
    Running,
    Completed,
    Stopped,
    Failed,
}

/// Raises the stop flag of one session. Callable from any thread at any
/// time; the session observes it at the next poll slice.
#[derive(Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// One ping session: owns one raw socket and one target, drives the
/// send/wait/collect cycle per sequence number, and shares the correlation
/// table with every other live session.
///
/// The receive path feeds *every* decoded reply into the table, whichever
/// session it belongs to - on hosts where raw ICMP sockets see all inbound
/// ICMP traffic, this session's reply may well surface on another session's
/// socket, and vice versa.
pub struct Session<T> {
    host: String,
    config: SessionConfig,
    identity: SessionIdentity,
    table: Arc<CorrelationTable>,
    resolver: Box<dyn Resolver>,
    clock: Arc<dyn Clock>,
    observer: Box<dyn Observer>,
    state: SessionState,
    stop: Arc<AtomicBool>,
    stats: Statistics,
    target: Option<Target>,
    last_error: Option<String>,
    _transport: PhantomData<fn() -> T>,
}

impl<T> Session<T>
where
    T: Transport + 'static,
{
    /// Session with the default collaborators: system DNS lookup, process
    /// monotonic clock, no observer.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        config: SessionConfig,
        identity: SessionIdentity,
        table: Arc<CorrelationTable>,
    ) -> Self {
        Self::with_collaborators(
            host,
            config,
            identity,
            table,
            Box::new(DnsResolver),
            Arc::new(MonotonicClock::new()),
            Box::new(NullObserver),
        )
    }

    #[must_use]
    pub fn with_collaborators(
        host: impl Into<String>,
        config: SessionConfig,
        identity: SessionIdentity,
        table: Arc<CorrelationTable>,
        resolver: Box<dyn Resolver>,
        clock: Arc<dyn Clock>,
        observer: Box<dyn Observer>,
    ) -> Self {
        Session {
            host: host.into(),
            config,
            identity,
            table,
            resolver,
            clock,
            observer,
            state: SessionState::Idle,
            stop: Arc::new(AtomicBool::new(false)),
            stats: Statistics::new(),
            target: None,
            last_error: None,
            _transport: PhantomData,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    /// Resolved target address as text, `None` before resolution.
    #[must_use]
    pub fn resolved_target(&self) -> Option<String> {
        self.target.as_ref().map(ToString::to_string)
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.stop))
    }

    /// Runs the whole session to completion, stop, or failure. Counters
    /// accumulated before a fatal error stay queryable afterwards.
    pub fn run(&mut self) -> Result<(), SessionError> {
        self.conclude(None)
    }

    #[cfg(test)]
    pub(crate) fn run_with(&mut self, transport: T) -> Result<(), SessionError> {
        self.conclude(Some(transport))
    }

    fn conclude(&mut self, transport: Option<T>) -> Result<(), SessionError> {
        match self.execute(transport) {
            Ok(final_state) => {
                self.state = final_state;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Failed;
                self.last_error = Some(e.to_string());
                tracing::error!(host = %self.host, "session failed: {e}");
                Err(e)
            }
        }
    }

    fn execute(&mut self, transport: Option<T>) -> Result<SessionState, SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::Argument("session has already run".to_string()));
        }
        self.config.validate()?;
        if self.identity.index() >= self.table.capacity() {
            return Err(SessionError::Argument(format!(
                "identity {} is out of range for a table of capacity {}",
                u16::from(self.identity),
                self.table.capacity()
            )));
        }

        self.state = SessionState::Resolving;
        let target = self.resolver.resolve(&self.host)?;
        tracing::debug!(host = %self.host, target = %target, "resolved");
        self.target = Some(target.clone());

        let transport = match transport {
            Some(transport) => transport,
            None => *T::open(target.family()).map_err(SessionError::Socket)?,
        };
        self.state = SessionState::Running;
        self.stats = Statistics::new();

        self.run_rounds(&transport, &target)
        // Transport dropped here: the socket closes on completion, stop,
        // and failure alike.
    }

    fn run_rounds(&mut self, transport: &T, target: &Target) -> Result<SessionState, SessionError> {
        let interval_micros = self.config.interval_micros();
        let timeout_micros = self.config.timeout_micros();
        let mut sequence = SequenceNumber::start_value();
        let mut rounds_done: u64 = 0;

        loop {
            if self.stop.load(Ordering::Relaxed) {
                return Ok(SessionState::Stopped);
            }
            if self.config.count != 0 && rounds_done >= u64::from(self.config.count) {
                return Ok(SessionState::Completed);
            }

            // The round mark paces interval and timeout; the timestamp
            // embedded in the packet measures the round trip.
            let round_mark = self.clock.now_micros();

            // Arm the table before sending: a reply racing the send call
            // must never meet a stale expectation.
            self.table.reset(self.identity, sequence);
            let request = echo_codec::encode(
                self.identity.into(),
                sequence,
                self.config.payload_size,
                target.family(),
                self.clock.now_micros(),
            )
            .map_err(|e| SessionError::Encode(e.to_string()))?;
            transport.send_to(&request, target.address()).map_err(SessionError::Send)?;
            self.stats.on_sent();
            tracing::trace!(sequence = %sequence, "echo request sent");

            let rtt_micros =
                self.poll_for_reply(transport, target.family(), round_mark, timeout_micros);
            match rtt_micros {
                Some(rtt) => self.stats.on_reply(rtt),
                None => {
                    tracing::trace!(sequence = %sequence, "round timed out");
                    self.stats.on_timeout();
                }
            }
            self.observer.on_sample(RoundSample {
                sequence,
                bytes: request.len(),
                rtt_micros,
            });
            rounds_done += 1;

            let more_rounds = self.config.count == 0 || rounds_done < u64::from(self.config.count);
            if more_rounds {
                while !self.stop.load(Ordering::Relaxed)
                    && self.clock.now_micros().wrapping_sub(round_mark) < interval_micros
                {
                    self.observer.on_waiting();
                    self.clock.sleep(POLL_GRANULARITY);
                }
            }
            sequence = sequence.next();
        }
    }

    /// Polls the transport until our own entry in the table turns non-zero,
    /// the timeout elapses, or a stop is requested.
    fn poll_for_reply(
        &self,
        transport: &T,
        family: AddressFamily,
        sent_at_micros: u64,
        timeout_micros: u64,
    ) -> Option<u64> {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        loop {
            self.drain_inbound(transport, family, &mut buf);

            let rtt_micros = self.table.peek(self.identity);
            if rtt_micros != 0 {
                return Some(rtt_micros);
            }
            if self.clock.now_micros().wrapping_sub(sent_at_micros) >= timeout_micros {
                return None;
            }
            if self.stop.load(Ordering::Relaxed) {
                return None;
            }
            self.clock.sleep(POLL_GRANULARITY);
        }
    }

    /// Decodes everything currently queued on the socket and records every
    /// echo reply in the table, whichever session it belongs to. Malformed
    /// packets are dropped; polling goes on.
    fn drain_inbound(&self, transport: &T, family: AddressFamily, buf: &mut [u8]) {
        loop {
            match transport.try_recv(buf) {
                Ok(None) => return,
                Ok(Some(n)) => match echo_codec::decode(&buf[..n], family) {
                    Ok(decoded) if decoded.kind == EchoKind::Reply => {
                        let rtt_micros = self
                            .clock
                            .now_micros()
                            .wrapping_sub(decoded.send_timestamp_micros)
                            .max(1);
                        self.table.record(decoded.identifier, decoded.sequence, rtt_micros);
                    }
                    Ok(_) => {}
                    Err(e) => tracing::trace!("dropping packet: {e}"),
                },
                Err(e) => {
                    // The shared raw socket sees all kinds of traffic;
                    // a failed read is not a failed session.
                    tracing::warn!("receive failed: {e}");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::tests::ManualClock;
    use crate::correlation_table::CorrelationTable;
    use crate::echo_codec::tests::{parse_request, reply_to_request};
    use crate::observer::tests::RecordingObserver;
    use crate::resolver::tests::{FailingResolver, StaticResolver};
    use crate::transport::tests::FakeTransport;
    use more_asserts::{assert_ge, assert_le, assert_lt};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;
    use std::time::Instant;

    fn localhost_session(
        config: SessionConfig,
        identity: u16,
        table: Arc<CorrelationTable>,
        clock: Arc<dyn Clock>,
        observer: Box<dyn Observer>,
    ) -> Session<FakeTransport> {
        Session::with_collaborators(
            "127.0.0.1",
            config,
            SessionIdentity::new(identity),
            table,
            Box::new(StaticResolver(IpAddr::V4(Ipv4Addr::LOCALHOST))),
            clock,
            observer,
        )
    }

    /// Responder echoing every request whose sequence is not in `dropped`,
    /// with the embedded timestamp pushed back by `rtt_micros` so the
    /// measured round trip is exact under a manual clock.
    fn scripted_responder(
        dropped: Vec<SequenceNumber>,
        rtt_micros: impl Fn(SequenceNumber) -> u64 + Send + Sync + 'static,
    ) -> impl Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static {
        move |request: &[u8]| {
            let (_, sequence, timestamp) = parse_request(request);
            if dropped.contains(&sequence) {
                return None;
            }
            // Wrapping keeps the pinned round trip exact even when the
            // clock reading is smaller than the offset.
            let rtt = rtt_micros(sequence);
            Some(reply_to_request(request, AddressFamily::V4, Some(timestamp.wrapping_sub(rtt))))
        }
    }

    #[test]
    fn three_rounds_with_one_dropped_reply() {
        let clock = Arc::new(ManualClock::starting_at(10_000_000));
        let table = Arc::new(CorrelationTable::default());
        let observer = RecordingObserver::default();

        let mut transport = FakeTransport::new();
        transport.set_responder(scripted_responder(
            vec![SequenceNumber::from(2)],
            |sequence| if sequence == SequenceNumber::from(1) { 1_500 } else { 2_500 },
        ));

        let config = SessionConfig { count: 3, ..SessionConfig::default() };
        let mut session =
            localhost_session(config, 0, table, clock, Box::new(observer.clone()));
        session.run_with(transport).unwrap();

        assert_eq!(SessionState::Completed, session.state());
        let stats = session.statistics();
        assert_eq!(3, stats.sent());
        assert_eq!(2, stats.received());
        assert_eq!(1, stats.lost());
        assert_eq!(stats.sent(), stats.received() + stats.lost());

        assert_eq!(1_500.0, stats.min_micros());
        assert_eq!(2_500.0, stats.max_micros());
        assert_eq!(2_000.0, stats.mean_micros());
        // Two samples 500 apart from the mean each.
        assert_eq!(500_000.0, stats.variance().unwrap());

        let samples = observer.samples();
        assert_eq!(3, samples.len());
        // Echo header + timestamp + default filler, reported for lost
        // rounds too.
        for sample in &samples {
            assert_eq!(72, sample.bytes);
        }
        assert_eq!(Some(1_500), samples[0].rtt_micros);
        assert_eq!(None, samples[1].rtt_micros);
        assert_eq!(Some(2_500), samples[2].rtt_micros);
        assert_eq!(SequenceNumber::from(2), samples[1].sequence);
        assert_ge!(observer.waits(), 1);
    }

    #[test]
    fn invalid_config_fails_before_any_socket() {
        let table = Arc::new(CorrelationTable::default());
        let config = SessionConfig {
            interval: Duration::from_millis(1),
            ..SessionConfig::default()
        };
        let mut session: Session<FakeTransport> =
            Session::new("127.0.0.1", config, SessionIdentity::new(0), table);

        let result = session.run();
        assert!(matches!(result, Err(SessionError::Argument(_))));
        assert_eq!(SessionState::Failed, session.state());
        assert!(session.last_error().unwrap().contains("interval"));
        assert_eq!(0, session.statistics().sent());
        assert_eq!(None, session.resolved_target());
    }

    #[test]
    fn resolution_failure_fails_the_session() {
        let table = Arc::new(CorrelationTable::default());
        let mut session: Session<FakeTransport> = Session::with_collaborators(
            "nowhere.invalid",
            SessionConfig::default(),
            SessionIdentity::new(0),
            table,
            Box::new(FailingResolver),
            Arc::new(ManualClock::starting_at(0)),
            Box::new(NullObserver),
        );

        let result = session.run_with(FakeTransport::new());
        assert!(matches!(result, Err(SessionError::Resolution { .. })));
        assert_eq!(SessionState::Failed, session.state());
    }

    #[test]
    fn send_failure_is_fatal_and_preserves_counters() {
        let clock = Arc::new(ManualClock::starting_at(10_000_000));
        let table = Arc::new(CorrelationTable::default());
        let config = SessionConfig { count: 2, ..SessionConfig::default() };
        let mut session =
            localhost_session(config, 0, table, clock, Box::new(NullObserver));

        let result = session.run_with(FakeTransport::failing_on_send());
        assert!(matches!(result, Err(SessionError::Send(_))));
        assert_eq!(SessionState::Failed, session.state());
        assert!(session.last_error().is_some());
        // The failed send is not a per-round loss.
        assert_eq!(0, session.statistics().sent());
        assert_eq!(0, session.statistics().lost());
    }

    #[test]
    fn malformed_packets_do_not_abort_polling() {
        let clock = Arc::new(ManualClock::starting_at(10_000_000));
        let table = Arc::new(CorrelationTable::default());

        let mut transport = FakeTransport::new();
        // Queued ahead of the real reply: a truncated IP fragment and a
        // header-only ICMP packet.
        transport.push_inbound(vec![0x45, 0x00, 0x00]);
        transport.push_inbound(crate::echo_codec::tests::wrap_in_ip_header(
            &[0u8; 8],
            AddressFamily::V4,
        ));
        transport.set_responder(scripted_responder(vec![], |_| 800));

        let config = SessionConfig { count: 1, ..SessionConfig::default() };
        let mut session =
            localhost_session(config, 0, table, clock, Box::new(NullObserver));
        session.run_with(transport).unwrap();

        assert_eq!(SessionState::Completed, session.state());
        assert_eq!(1, session.statistics().received());
        assert_eq!(0, session.statistics().lost());
        assert_eq!(800, session.statistics().last_round_micros());
    }

    #[test]
    fn session_runs_only_once() {
        let clock = Arc::new(ManualClock::starting_at(10_000_000));
        let table = Arc::new(CorrelationTable::default());
        let config = SessionConfig { count: 1, ..SessionConfig::default() };
        let mut session =
            localhost_session(config, 0, table, clock, Box::new(NullObserver));

        let mut transport = FakeTransport::new();
        transport.set_responder(scripted_responder(vec![], |_| 500));
        session.run_with(transport).unwrap();
        assert_eq!(SessionState::Completed, session.state());

        let again = session.run_with(FakeTransport::new());
        assert!(matches!(again, Err(SessionError::Argument(_))));
    }

    #[test]
    fn concurrent_sessions_never_cross_attribute() {
        // Replies for session A surface on session B's socket and vice
        // versa; attribution must go through the table by identity.
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let table = Arc::new(CorrelationTable::default());

        let mut transport_a = FakeTransport::new();
        let mut transport_b = FakeTransport::new();
        transport_a.set_responder(scripted_responder(vec![], |_| 2_000));
        transport_b.set_responder(scripted_responder(vec![], |_| 3_000_000));
        transport_a.route_replies_to(&transport_b);
        transport_b.route_replies_to(&transport_a);

        let config = SessionConfig {
            count: 1,
            timeout: Duration::from_secs(5),
            ..SessionConfig::default()
        };
        let mut session_a =
            localhost_session(config.clone(), 0, Arc::clone(&table), Arc::clone(&clock), Box::new(NullObserver));
        let mut session_b =
            localhost_session(config, 1, table, clock, Box::new(NullObserver));

        let handle_a = std::thread::spawn(move || {
            session_a.run_with(transport_a).unwrap();
            session_a
        });
        let handle_b = std::thread::spawn(move || {
            session_b.run_with(transport_b).unwrap();
            session_b
        });
        let session_a = handle_a.join().unwrap();
        let session_b = handle_b.join().unwrap();

        assert_eq!(SessionState::Completed, session_a.state());
        assert_eq!(SessionState::Completed, session_b.state());
        assert_eq!(1, session_a.statistics().received());
        assert_eq!(1, session_b.statistics().received());

        // A's round trip was pinned near 2ms, B's near 3s. Scheduling adds
        // slack, but nowhere near enough to blur the two.
        assert_ge!(session_a.statistics().min_micros(), 2_000.0);
        assert_lt!(session_a.statistics().max_micros(), 1_000_000.0);
        assert_ge!(session_b.statistics().min_micros(), 3_000_000.0);
    }

    #[test]
    fn out_of_range_identity_is_rejected_before_any_socket() {
        let table = Arc::new(CorrelationTable::new(4));
        let mut session = localhost_session(
            SessionConfig::default(),
            4,
            table,
            Arc::new(ManualClock::starting_at(0)),
            Box::new(NullObserver),
        );

        let result = session.run();
        assert!(matches!(result, Err(SessionError::Argument(_))));
        assert_eq!(SessionState::Failed, session.state());
        assert!(session.last_error().unwrap().contains("identity"));
        assert_eq!(None, session.resolved_target());
        assert_eq!(0, session.statistics().sent());
    }

    /// Raises the session's stop flag once the clock passes a deadline.
    /// The handle is filled in after the session is constructed.
    struct DeadlineObserver {
        clock: Arc<ManualClock>,
        deadline_micros: u64,
        stop: Arc<Mutex<Option<StopHandle>>>,
    }

    impl Observer for DeadlineObserver {
        fn on_waiting(&mut self) {
            if self.clock.now_micros() >= self.deadline_micros {
                if let Some(handle) = self.stop.lock().unwrap().as_ref() {
                    handle.stop();
                }
            }
        }
    }

    #[test]
    fn unbounded_run_sends_at_the_interval_rate() {
        let clock = Arc::new(ManualClock::starting_at(0));
        let table = Arc::new(CorrelationTable::default());
        let stop_cell = Arc::new(Mutex::new(None));

        let mut transport = FakeTransport::new();
        transport.set_responder(scripted_responder(vec![], |_| 400));

        // Five virtual seconds at the default one-second interval.
        let observer = DeadlineObserver {
            clock: Arc::clone(&clock),
            deadline_micros: 5_000_000,
            stop: Arc::clone(&stop_cell),
        };

        let config = SessionConfig { count: 0, ..SessionConfig::default() };
        let mut session = localhost_session(config, 0, table, clock, Box::new(observer));
        *stop_cell.lock().unwrap() = Some(session.stop_handle());

        session.run_with(transport).unwrap();
        assert_eq!(SessionState::Stopped, session.state());
        assert_ge!(session.statistics().sent(), 5);
    }

    #[test]
    fn unbounded_run_stops_promptly() {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let table = Arc::new(CorrelationTable::default());

        let mut transport = FakeTransport::new();
        transport.set_responder(scripted_responder(vec![], |_| 700));

        let config = SessionConfig { count: 0, ..SessionConfig::default() };
        let mut session =
            localhost_session(config, 0, table, clock, Box::new(NullObserver));
        let stop = session.stop_handle();

        let handle = std::thread::spawn(move || {
            let result = session.run_with(transport);
            (result, session)
        });

        std::thread::sleep(Duration::from_millis(100));
        let stop_requested = Instant::now();
        stop.stop();
        let (result, session) = handle.join().unwrap();

        // One poll slice plus at most one in-flight round, not the full
        // count * interval (which here would be forever).
        assert_le!(stop_requested.elapsed(), Duration::from_millis(700));
        assert!(result.is_ok());
        assert_eq!(SessionState::Stopped, session.state());
        assert_ge!(session.statistics().sent(), 1);
    }
}

use ping_flock::{
    CorrelationTable, Observer, RawTransport, RoundSample, Session, SessionConfig,
    SessionIdentity,
};
use std::sync::Arc;
use std::time::Duration;

type GenericError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(argh::FromArgs)]
/// ping many hosts concurrently - send ICMP ECHO_REQUEST to each of them
struct Args {
    #[argh(option, short = 'c', default = "4")]
    /// stop after <count> rounds per host, 0 = until interrupted
    count: u32,

    #[argh(option, short = 'i', default = "1")]
    /// seconds between rounds
    interval: u64,

    #[argh(option, short = 's', default = "56")]
    /// filler bytes per echo request
    size: usize,

    #[argh(option, short = 'w', default = "1")]
    /// seconds to wait for each reply
    timeout: u64,

    #[argh(positional)]
    /// host names or addresses
    hosts: Vec<String>,
}

struct PrintingObserver {
    host: String,
}

impl Observer for PrintingObserver {
    fn on_sample(&mut self, sample: RoundSample) {
        match sample.rtt_micros {
            Some(rtt) => {
                let millis = rtt as f64 / 1_000.0;
                println!(
                    "{} bytes from {}: icmp_seq={} time={millis:.3} ms",
                    sample.bytes, self.host, sample.sequence
                );
            }
            None => println!("from {}: icmp_seq={} timed out", self.host, sample.sequence),
        }
    }
}

fn main() -> Result<(), GenericError> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::WARN)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args: Args = argh::from_env();
    if args.hosts.is_empty() {
        return Err("no hosts given".into());
    }

    let config = SessionConfig {
        count: args.count,
        interval: Duration::from_secs(args.interval),
        payload_size: args.size,
        timeout: Duration::from_secs(args.timeout),
    };

    let table = Arc::new(CorrelationTable::default());
    // One clock for all sessions: replies may be decoded by a session other
    // than their sender, so timestamps must share an epoch.
    let clock = Arc::new(ping_flock::MonotonicClock::new());
    let mut handles = Vec::new();
    for (index, host) in args.hosts.iter().enumerate() {
        let mut session: Session<RawTransport> = Session::with_collaborators(
            host.clone(),
            config.clone(),
            SessionIdentity::new(u16::try_from(index)?),
            Arc::clone(&table),
            Box::new(ping_flock::DnsResolver),
            Arc::clone(&clock) as Arc<dyn ping_flock::Clock>,
            Box::new(PrintingObserver { host: host.clone() }),
        );
        let host = host.clone();
        handles.push(std::thread::spawn(move || {
            let result = session.run();
            (host, result, session)
        }));
    }

    for handle in handles {
        let (host, result, session) = handle.join().expect("session thread panicked");
        let stats = session.statistics();
        println!("--- {host} ping statistics ---");
        println!(
            "{} sent, {} received, {} lost",
            stats.sent(),
            stats.received(),
            stats.lost()
        );
        if stats.received() > 0 {
            println!(
                "rtt min/avg/max = {:.3}/{:.3}/{:.3} ms",
                stats.min_micros() / 1_000.0,
                stats.mean_micros() / 1_000.0,
                stats.max_micros() / 1_000.0
            );
        }
        if let Err(e) = result {
            println!("{host}: {e}");
        }
    }

    Ok(())
}

#![warn(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

pub use clock::{Clock, MonotonicClock};
pub use config::SessionConfig;
pub use correlation_table::{CorrelationTable, SessionIdentity, MAX_CONCURRENT_SESSIONS};
pub use echo_codec::{EncodeError, MalformedPacket};
pub use error::SessionError;
pub use observer::{NullObserver, Observer, RoundSample};
pub use resolver::{DnsResolver, ResolveError, Resolver};
pub use sequence_number::SequenceNumber;
pub use session::{Session, SessionState, StopHandle};
pub use statistics::Statistics;
pub use target::{AddressFamily, Target};
pub use transport::{RawTransport, Transport};

mod clock;
mod config;
mod correlation_table;
mod echo_codec;
mod error;
mod observer;
mod resolver;
mod sequence_number;
mod session;
mod statistics;
mod target;
mod transport;

use std::{error::Error, fmt, io};

/// Fatal session errors. Each one terminates the run immediately; counters
/// accumulated up to that point stay queryable on the session.
///
/// Timeouts and malformed packets are not in here: a timeout is counted as
/// loss and a malformed packet is dropped while polling continues.
#[derive(Debug)]
pub enum SessionError {
    /// Bad configuration, rejected before any resource is allocated.
    Argument(String),
    /// Name lookup failed, carries the resolver's cause.
    Resolution { host: String, detail: String },
    /// Raw socket could not be opened or configured (e.g. missing privilege).
    Socket(io::Error),
    /// Transport send failed mid-run.
    Send(io::Error),
    /// Echo request could not be built.
    Encode(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            SessionError::Argument(detail) => write!(f, "invalid argument: {detail}"),
            SessionError::Resolution { host, detail } => {
                write!(f, "could not resolve '{host}': {detail}")
            }
            SessionError::Socket(e) => write!(f, "could not open raw socket: {e}"),
            SessionError::Send(e) => write!(f, "send failed: {e}"),
            SessionError::Encode(detail) => write!(f, "could not encode echo request: {detail}"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SessionError::Socket(e) | SessionError::Send(e) => Some(e),
            _ => None,
        }
    }
}

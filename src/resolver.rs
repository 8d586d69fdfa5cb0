use crate::error::SessionError;
use crate::target::Target;
use std::net::ToSocketAddrs;
use std::{error::Error, fmt};

#[derive(Debug)]
pub struct ResolveError {
    pub host: String,
    pub detail: String,
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not resolve '{}': {}", self.host, self.detail)
    }
}

impl Error for ResolveError {}

impl From<ResolveError> for SessionError {
    fn from(error: ResolveError) -> Self {
        SessionError::Resolution { host: error.host, detail: error.detail }
    }
}

/// Name lookup collaborator: a hostname or address literal in, a concrete
/// family + address out.
pub trait Resolver: Send {
    fn resolve(&self, host: &str) -> Result<Target, ResolveError>;
}

/// Resolver backed by the system lookup via `ToSocketAddrs`.
///
/// Only the first candidate of a multi-homed name is used; the rest are
/// discarded. Kept as-is deliberately; multi-candidate fallback would be a
/// behavior change.
pub struct DnsResolver;

impl Resolver for DnsResolver {
    fn resolve(&self, host: &str) -> Result<Target, ResolveError> {
        let mut candidates = (host, 0u16).to_socket_addrs().map_err(|e| ResolveError {
            host: host.to_string(),
            detail: e.to_string(),
        })?;
        match candidates.next() {
            Some(addr) => Ok(Target::new(addr.ip())),
            None => Err(ResolveError {
                host: host.to_string(),
                detail: "no address found".to_string(),
            }),
        }
    }
}

use std::fmt;
use std::net::IpAddr;

/// Address family of a resolved target.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

/// A resolved ping target: address family plus concrete address.
///
/// Set once when a session resolves its host and immutable thereafter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Target {
    family: AddressFamily,
    address: IpAddr,
}

impl Target {
    #[must_use]
    pub fn new(address: IpAddr) -> Self {
        let family = match address {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        };
        Target { family, address }
    }

    #[must_use]
    pub fn family(&self) -> AddressFamily {
        self.family
    }

    #[must_use]
    pub fn address(&self) -> IpAddr {
        self.address
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

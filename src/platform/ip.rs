use crate::platform::error::{PlatformError, PlatformResult};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

/// IPv4 network in `a.b.c.d/len` form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Cidr {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Cidr {
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> PlatformResult<Self> {
        if prefix_len > 32 {
            return Err(PlatformError::InvalidCidr(format!("{addr}/{prefix_len}")));
        }
        let network = Ipv4Addr::from(u32::from(addr) & Self::mask(prefix_len));
        Ok(Self {
            network,
            prefix_len,
        })
    }

    fn mask(prefix_len: u8) -> u32 {
        match prefix_len {
            0 => 0,
            n => u32::MAX << (32 - u32::from(n)),
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => u32::from(v4) & Self::mask(self.prefix_len) == u32::from(self.network),
            IpAddr::V6(_) => false,
        }
    }
}

impl FromStr for Ipv4Cidr {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PlatformError::InvalidCidr(s.to_string());
        let (addr, len) = s.trim().split_once('/').ok_or_else(invalid)?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
        let len: u8 = len.parse().map_err(|_| invalid())?;
        Self::new(addr, len).map_err(|_| invalid())
    }
}

impl TryFrom<String> for Ipv4Cidr {
    type Error = PlatformError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ipv4Cidr> for String {
    fn from(cidr: Ipv4Cidr) -> Self {
        cidr.to_string()
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// Where a node learns its own addresses
pub trait IpDiscovery: Send + Sync {
    /// Local IPv4 address inside `cidr`, if the host has one
    fn local_ipv4(&self, cidr: &Ipv4Cidr) -> Option<IpAddr>;

    /// Address the node is reachable at from the internet
    fn public_ipv4(&self) -> BoxFuture<'_, PlatformResult<IpAddr>>;
}

/// Fixed addresses, for tests and deployments with known addresses
#[derive(Debug, Clone)]
pub struct StaticIpDiscovery {
    pub local: IpAddr,
    pub public: Option<IpAddr>,
}

impl StaticIpDiscovery {
    pub fn loopback() -> Self {
        Self {
            local: IpAddr::V4(Ipv4Addr::LOCALHOST),
            public: None,
        }
    }
}

impl IpDiscovery for StaticIpDiscovery {
    fn local_ipv4(&self, _cidr: &Ipv4Cidr) -> Option<IpAddr> {
        Some(self.local)
    }

    fn public_ipv4(&self) -> BoxFuture<'_, PlatformResult<IpAddr>> {
        let result = self
            .public
            .ok_or_else(|| PlatformError::PublicIpLookup("no public address configured".into()));
        futures::future::ready(result).boxed()
    }
}

/// Routing-table lookup for the local address, HTTP lookup for the public one
#[derive(Debug, Clone)]
pub struct SystemIpDiscovery {
    lookup_url: String,
    timeout: Duration,
}

impl SystemIpDiscovery {
    pub fn new(lookup_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            lookup_url: lookup_url.into(),
            timeout,
        }
    }

    /// Source address the OS would use to reach the internet.
    ///
    /// Connecting a UDP socket sends nothing; it only selects a route.
    fn routed_ipv4() -> std::io::Result<IpAddr> {
        use socket2::{Domain, Socket, Type};

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
        let route_target = SocketAddr::from(([8, 8, 8, 8], 80));
        socket.connect(&route_target.into())?;
        socket
            .local_addr()?
            .as_socket()
            .map(|addr| addr.ip())
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "not an inet address"))
    }
}

impl IpDiscovery for SystemIpDiscovery {
    fn local_ipv4(&self, cidr: &Ipv4Cidr) -> Option<IpAddr> {
        match Self::routed_ipv4() {
            Ok(ip) if cidr.contains(ip) => Some(ip),
            Ok(ip) => {
                tracing::warn!("Local address {} is outside {}", ip, cidr);
                None
            }
            Err(e) => {
                tracing::warn!("Local address lookup failed: {}", e);
                None
            }
        }
    }

    fn public_ipv4(&self) -> BoxFuture<'_, PlatformResult<IpAddr>> {
        async move {
            let client = reqwest::Client::builder()
                .timeout(self.timeout)
                .build()
                .map_err(|e| PlatformError::PublicIpLookup(format!("cannot build HTTP client: {e}")))?;

            let response = client
                .get(&self.lookup_url)
                .send()
                .await
                .map_err(|e| PlatformError::PublicIpLookup(format!("request failed: {e}")))?;

            if !response.status().is_success() {
                return Err(PlatformError::PublicIpLookup(format!(
                    "HTTP status {}",
                    response.status()
                )));
            }

            let body = response
                .text()
                .await
                .map_err(|e| PlatformError::PublicIpLookup(format!("invalid body: {e}")))?;
            body.trim()
                .parse::<IpAddr>()
                .map_err(|_| PlatformError::PublicIpLookup(format!("not an address: {}", body.trim())))
        }
        .boxed()
    }
}

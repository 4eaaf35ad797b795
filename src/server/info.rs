use crate::platform::Ipv4Cidr;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// Identity of this node or of a peer it has heard from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub local_ip: IpAddr,
    pub public_ip: Option<IpAddr>,
    pub port: u16,
    pub platform: String,
    pub transfer_folder: String,
}

impl ServerInfo {
    /// Minimal identity for a peer known only by its address
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self {
            local_ip: addr.ip(),
            public_ip: None,
            port: addr.port(),
            platform: String::new(),
            transfer_folder: String::new(),
        }
    }

    pub fn local_platform() -> String {
        format!("{} ({})", std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Address worth dialing from a node on `local_network`: the local IP
    /// when it sits on that network, the public IP otherwise
    pub fn session_ip(&self, local_network: &Ipv4Cidr) -> IpAddr {
        if local_network.contains(self.local_ip) {
            return self.local_ip;
        }
        self.public_ip.unwrap_or(self.local_ip)
    }

    pub fn session_addr(&self, local_network: &Ipv4Cidr) -> SocketAddr {
        SocketAddr::new(self.session_ip(local_network), self.port)
    }

    /// Same node when either address matches and the port matches; the
    /// transfer folder does not count
    pub fn is_same_node(&self, other: &ServerInfo) -> bool {
        let public_match = matches!(
            (self.public_ip, other.public_ip),
            (Some(a), Some(b)) if a == b
        );
        (self.local_ip == other.local_ip || public_match) && self.port == other.port
    }

    /// Whether `addr` is one of this node's own listening addresses
    pub fn is_own_addr(&self, addr: SocketAddr) -> bool {
        if addr.port() != self.port {
            return false;
        }
        let ip = addr.ip();
        ip.is_loopback() || ip.is_unspecified() || ip == self.local_ip || Some(ip) == self.public_ip
    }
}

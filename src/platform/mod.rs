//! Host collaborators: address discovery and filesystem helpers

pub mod error;
pub mod fs;
pub mod ip;

pub use error::{PlatformError, PlatformResult};
pub use ip::{IpDiscovery, Ipv4Cidr, StaticIpDiscovery, SystemIpDiscovery};

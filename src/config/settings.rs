//! Node settings: defaults, then a TOML file, then environment overrides.
//!
//! Env overrides: P2PFS_PORT, P2PFS_FOLDER, P2PFS_CIDR, P2PFS_TIMEOUT_MS.

use crate::config::error::{ConfigError, ConfigResult};
use crate::network::SocketSettings;
use crate::platform::Ipv4Cidr;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    /// Listening port, 0 for an ephemeral port
    pub port: u16,
    pub bind_address: IpAddr,
    pub listen_backlog_size: u32,
    pub socket_buffer_size: usize,
    pub socket_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub transfer_retry_limit: u32,
    #[serde(with = "duration_ms")]
    pub retry_lockout_duration: Duration,
    /// Fraction of the file between progress events
    pub transfer_update_interval: f64,
    pub local_server_folder_path: PathBuf,
    pub local_network_cidr: String,
    pub public_ip_lookup_url: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 49600,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_backlog_size: 5,
            socket_buffer_size: 8 * 1024,
            socket_timeout_ms: 5_000,
            connect_timeout_ms: 5_000,
            transfer_retry_limit: 3,
            retry_lockout_duration: Duration::from_secs(10 * 60),
            transfer_update_interval: 0.0025,
            local_server_folder_path: PathBuf::from("transfer"),
            local_network_cidr: "192.168.1.0/24".into(),
            public_ip_lookup_url: "https://api.ipify.org".into(),
        }
    }
}

impl ServerSettings {
    /// Defaults, overlaid with `path` when given, then the environment
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env(|name| std::env::var(name).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply overrides from `lookup` (the process environment in `load`)
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("P2PFS_PORT") {
            self.port = value.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "P2PFS_PORT",
                value,
            })?;
        }
        if let Some(value) = lookup("P2PFS_FOLDER") {
            self.local_server_folder_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("P2PFS_CIDR") {
            self.local_network_cidr = value;
        }
        if let Some(value) = lookup("P2PFS_TIMEOUT_MS") {
            self.socket_timeout_ms = value.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "P2PFS_TIMEOUT_MS",
                value,
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.socket_buffer_size == 0 {
            return Err(ConfigError::Invalid {
                field: "socket_buffer_size",
                reason: "must be greater than zero".into(),
            });
        }
        if self.socket_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "socket_timeout_ms",
                reason: "timeouts must be greater than zero".into(),
            });
        }
        if !(self.transfer_update_interval > 0.0 && self.transfer_update_interval <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "transfer_update_interval",
                reason: format!("{} is not in (0, 1]", self.transfer_update_interval),
            });
        }
        self.cidr()?;
        Ok(())
    }

    pub fn cidr(&self) -> ConfigResult<Ipv4Cidr> {
        self.local_network_cidr
            .parse()
            .map_err(|e: crate::platform::PlatformError| ConfigError::Invalid {
                field: "local_network_cidr",
                reason: e.to_string(),
            })
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn socket_settings(&self) -> SocketSettings {
        SocketSettings {
            bind_addr: SocketAddr::new(self.bind_address, self.port),
            listen_backlog: self.listen_backlog_size,
            buffer_size: self.socket_buffer_size,
            connect_timeout: self.connect_timeout(),
            io_timeout: self.socket_timeout(),
        }
    }

    /// Bytes between progress events for a file of `file_size` bytes
    pub fn progress_step(&self, file_size: u64) -> u64 {
        ((file_size as f64 * self.transfer_update_interval) as u64).max(1)
    }
}

/// Durations as integer milliseconds
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

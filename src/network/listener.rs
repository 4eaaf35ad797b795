use crate::network::connection::Connection;
use crate::network::error::{NetworkError, NetworkResult};
use crate::network::types::SocketSettings;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Listening socket configured with the node's backlog and buffer sizes
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    settings: SocketSettings,
}

impl Listener {
    pub fn bind(settings: &SocketSettings) -> NetworkResult<Self> {
        let addr = settings.bind_addr;
        let socket = Self::configure(settings).map_err(|source| NetworkError::BindFailed {
            addr,
            source,
        })?;

        let inner = TcpListener::from_std(socket.into())
            .map_err(|source| NetworkError::BindFailed { addr, source })?;

        tracing::info!(
            "Listening on {} (backlog {})",
            inner.local_addr()?,
            settings.listen_backlog
        );

        Ok(Self {
            inner,
            settings: settings.clone(),
        })
    }

    fn configure(settings: &SocketSettings) -> std::io::Result<Socket> {
        let domain = Domain::for_address(settings.bind_addr);
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_recv_buffer_size(settings.buffer_size)?;
        socket.set_send_buffer_size(settings.buffer_size)?;
        socket.set_nonblocking(true)?;
        socket.bind(&settings.bind_addr.into())?;
        socket.listen(settings.listen_backlog.min(i32::MAX as u32) as i32)?;
        Ok(socket)
    }

    pub fn local_addr(&self) -> NetworkResult<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    pub async fn accept(&self) -> NetworkResult<Connection> {
        let (stream, peer) = self.inner.accept().await?;
        stream.set_nodelay(true)?;
        tracing::debug!("Accepted connection from {}", peer);
        Ok(Connection::accepted(stream, peer, &self.settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let settings = SocketSettings {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..SocketSettings::default()
        };
        let listener = Listener::bind(&settings).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        let client = tokio::spawn(async move { Connection::connect(addr, &settings).await });
        let conn = listener.accept().await.unwrap();
        assert!(conn.peer_addr().ip().is_loopback());
        client.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_reports_address() {
        // TEST-NET-3, never assigned to a local interface
        let unreachable: SocketAddr = "203.0.113.7:0".parse().unwrap();
        let settings = SocketSettings {
            bind_addr: unreachable,
            ..SocketSettings::default()
        };

        let err = Listener::bind(&settings).unwrap_err();
        assert!(matches!(err, NetworkError::BindFailed { addr, .. } if addr == unreachable));
    }
}

//! Stream-side server that bridges connect to.
//!
//! Each accepted connection runs on its own task and is registered in a
//! [`ClientRegistry`] for as long as it is up. Relay sessions and raw sends are
//! queued on that task through a [`ClientHandle`].

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use log::{info, warn};
use tokio::net::TcpListener;

use crate::error::{Error, Result};

mod connection;
mod registry;

pub use connection::{ClientHandle, Connection};
pub use registry::ClientRegistry;

pub const DEFAULT_LISTEN: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8000);

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub listen: SocketAddr,
    pub queue_depth: usize,
    pub buffer_size: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN,
            queue_depth: 8,
            buffer_size: 1024,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listen(mut self, listen: SocketAddr) -> Self {
        self.listen = listen;
        self
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_depth == 0 {
            return Err(Error::Configuration("queue depth must be at least 1".into()));
        }
        if self.buffer_size == 0 {
            return Err(Error::Configuration("receive buffer must be at least 1 byte".into()));
        }
        Ok(())
    }
}

pub struct BridgeServer {
    listener: TcpListener,
    registry: ClientRegistry,
    config: BridgeConfig,
    next_id: u64,
}

impl BridgeServer {
    pub async fn bind(config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.listen).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            registry: ClientRegistry::new(),
            config,
            next_id: 0,
        })
    }

    pub fn registry(&self) -> ClientRegistry {
        self.registry.clone()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections forever. A failed accept is logged and skipped.
    pub async fn run(mut self) -> Result<()> {
        loop {
            let (stream, address) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Could not disable Nagle for {}: {}", address, e);
            }

            self.next_id += 1;
            let connection = Connection::new(
                self.next_id,
                stream,
                address,
                self.registry.clone(),
                self.config.queue_depth,
                self.config.buffer_size,
            );
            tokio::spawn(connection.run());
        }
    }
}

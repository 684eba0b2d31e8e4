//! Z-Wave Gateway OTA Library
//!
//! Serves firmware images to Z-Wave nodes and relays firmware files to
//! gateway bridges.
//!
//! # Features
//! - Pull-based chunk delivery over UDP (Z/IP Firmware Update command class)
//! - CRC-16 (AUG-CCITT) report checksums
//! - Length-prefixed relay of firmware files to a bridge, its NCP or a node
//! - Bridge server tracking connected clients
//!
//! # Protocol Stack
//! - Z/IP envelope and Firmware Update command payloads (datagram)
//! - Relay records (stream)
//!
//! # Examples
//!
//! ## Node Update
//! ```no_run
//! use zgw_ota::{OtaConfig, TransferOutcome};
//!
//! #[tokio::main]
//! async fn main() -> zgw_ota::Result<()> {
//!     let config = OtaConfig::new()
//!         .with_node(5)
//!         .with_security(true);
//!
//!     match zgw_ota::update_node("firmware.gbl", config).await? {
//!         TransferOutcome::Completed { reports_sent } => println!("done, {} reports", reports_sent),
//!         TransferOutcome::Abandoned { .. } => println!("node stopped asking for chunks"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Relay To A Bridge
//! ```no_run
//! use zgw_ota::RelayTarget;
//!
//! #[tokio::main]
//! async fn main() -> zgw_ota::Result<()> {
//!     let stream = tokio::net::TcpStream::connect("192.168.1.50:8000").await?;
//!     let summary = zgw_ota::relay_file(stream, RelayTarget::Ncp, "ncp.gbl").await?;
//!     println!("{} records", summary.data_records);
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod checksum;
pub mod dispatch;
mod error;
pub mod ota;
pub mod protocols;

pub use bridge::{BridgeConfig, BridgeServer, ClientHandle, ClientRegistry};
pub use dispatch::{Action, ActionOutput, Dispatcher};
pub use error::{Error, Result};
pub use ota::{AckPolicy, ChunkTransferSession, FirmwareImage, OtaConfig, TransferOutcome, UdpLink};
pub use protocols::relay::{RelayFramer, RelaySource, RelaySummary, RelayTarget};
pub use protocols::zip::{ChunkDescriptor, EnvelopeFlags};
pub use protocols::DatagramLink;

use std::path::Path;

use tokio::io::{AsyncRead, AsyncWrite};

/// Serves the firmware at `path` to the node named in `config` over UDP.
pub async fn update_node(path: impl AsRef<Path>, config: OtaConfig) -> Result<TransferOutcome> {
    let image = FirmwareImage::load(path).await?;
    let link = UdpLink::for_node(&config)?;
    let mut session = ChunkTransferSession::new(link, image, config)?;
    session.run().await
}

/// Relays the file at `path` over an established stream.
pub async fn relay_file<T>(stream: T, target: RelayTarget, path: impl AsRef<Path>) -> Result<RelaySummary>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let (file, info) = RelaySource::open(path).await?.into_parts();
    RelayFramer::new(stream, target, info, file).run().await
}

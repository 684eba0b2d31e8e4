use std::net::SocketAddr;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Truncated {what}: need {need} bytes, got {got}")]
    Truncated {
        what: &'static str,
        need: usize,
        got: usize,
    },

    #[error("Field {field} value {value:#x} does not fit its wire width")]
    FieldOverflow { field: &'static str, value: u32 },

    #[error("Peer closed the stream after {got} of {need} pull header bytes")]
    PeerClosed { need: usize, got: usize },

    #[error("Timed out waiting for firmware update request acknowledgment")]
    AckTimeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Firmware too large: {chunks} chunks exceed the 15-bit report number")]
    FirmwareTooLarge { chunks: usize },

    #[error("No client connected at {0}")]
    UnknownClient(SocketAddr),

    #[error("No client number {0}")]
    ClientIndex(usize),

    #[error("Connection task for {0} is gone")]
    ConnectionClosed(SocketAddr),

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, Error>;

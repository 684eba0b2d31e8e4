use std::fmt;

use bytes::Bytes;

/// Downstream consumer a relay session feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelTag {
    Bridge = 0x20,
    Ncp = 0x30,
    Node = 0x40,
}

impl TryFrom<u8> for ChannelTag {
    type Error = crate::error::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x20 => Ok(Self::Bridge),
            0x30 => Ok(Self::Ncp),
            0x40 => Ok(Self::Node),
            _ => Err(crate::error::Error::Protocol(format!(
                "Invalid channel tag: {:#04x}",
                value
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Data = 0x00,
    Header = 0x01,
}

impl TryFrom<u8> for RecordType {
    type Error = crate::error::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Data),
            0x01 => Ok(Self::Header),
            _ => Err(crate::error::Error::Protocol(format!(
                "Invalid record type: {:#04x}",
                value
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRecord {
    pub channel: ChannelTag,
    pub record_type: RecordType,
    pub payload: Bytes,
}

impl RelayRecord {
    pub fn header(channel: ChannelTag, metadata: Bytes) -> Self {
        Self {
            channel,
            record_type: RecordType::Header,
            payload: metadata,
        }
    }

    pub fn data(channel: ChannelTag, payload: Bytes) -> Self {
        Self {
            channel,
            record_type: RecordType::Data,
            payload,
        }
    }

    pub fn eof(channel: ChannelTag) -> Self {
        Self::data(channel, Bytes::new())
    }

    pub fn is_eof(&self) -> bool {
        self.record_type == RecordType::Data && self.payload.is_empty()
    }
}

/// Three-byte pull sent by the peer: a record type and how many bytes it wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullRequest {
    pub record_type: u8,
    pub length: u16,
}

/// Size and MD5 of the file being relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceInfo {
    pub size: u64,
    pub digest: [u8; 16],
}

impl SourceInfo {
    pub fn of(data: &[u8]) -> Self {
        use md5::{Digest, Md5};

        let mut digest = [0u8; 16];
        digest.copy_from_slice(&Md5::digest(data));
        Self {
            size: data.len() as u64,
            digest,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayTarget {
    /// Raw passthrough to the bridge itself.
    Bridge,
    /// The network co-processor behind the bridge.
    Ncp,
    /// A mesh node, addressed by node id.
    Node(u16),
}

impl RelayTarget {
    pub fn channel(&self) -> ChannelTag {
        match self {
            RelayTarget::Bridge => ChannelTag::Bridge,
            RelayTarget::Ncp => ChannelTag::Ncp,
            RelayTarget::Node(_) => ChannelTag::Node,
        }
    }
}

impl fmt::Display for RelayTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayTarget::Bridge => write!(f, "bridge"),
            RelayTarget::Ncp => write!(f, "ncp"),
            RelayTarget::Node(id) => write!(f, "node {}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelaySummary {
    /// Data records answering pulls, excluding the EOF sentinel.
    pub data_records: usize,
    pub bytes_sent: u64,
}

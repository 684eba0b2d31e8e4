use bytes::Bytes;

pub const COMMAND_CLASS_ZIP: u8 = 0x23;
pub const COMMAND_ZIP_PACKET: u8 = 0x02;
pub const COMMAND_CLASS_FIRMWARE_UPDATE: u8 = 0x7A;
pub const COMMAND_CLASS_VERSION: u8 = 0x86;
pub const VERSION_GET: u8 = 0x11;

/// Leading byte of a relay-role packet that carries an envelope for a node.
pub const ZIP_PACKET_FORWARD: u8 = 0x10;

/// Bytes of firmware carried by one update report.
pub const CHUNK_SIZE: usize = 40;

/// Largest report number the 15-bit field can carry.
pub const MAX_REPORT_NUMBER: u32 = 0x7FFF;

pub const ENVELOPE_HEADER_LEN: usize = 7;

/// ORed into flags1 when the payload should be sent with S0 security.
pub const SECURE_FLAG: u8 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareUpdateCommand {
    MdGet = 0x01,
    RequestGet = 0x03,
    RequestReport = 0x04,
    UpdateGet = 0x05,
    UpdateReport = 0x06,
    ActiveSet = 0x08,
}

/// Flag bytes of the envelope header.
///
/// The controller and the relay bridge use different defaults, so callers pick
/// the role explicitly instead of sharing one hard-coded pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeFlags {
    pub flags0: u8,
    pub flags1: u8,
}

impl EnvelopeFlags {
    pub const fn new(flags0: u8, flags1: u8) -> Self {
        Self { flags0, flags1 }
    }

    pub const fn controller(secure: bool) -> Self {
        Self::new(0x00, 0x40 | if secure { SECURE_FLAG } else { 0 })
    }

    pub const fn relay(secure: bool) -> Self {
        Self::new(0x80, 0x40 | if secure { SECURE_FLAG } else { 0 })
    }

    pub const fn is_secure(&self) -> bool {
        self.flags1 & SECURE_FLAG != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub flags: EnvelopeFlags,
    pub sequence_no: u8,
    pub source_endpoint: u8,
    pub dest_endpoint: u8,
    pub payload: Bytes,
}

/// A run of chunks requested by the node, `index` being 1-based.
///
/// A size of zero never asks for anything and doubles as the "no request
/// arrived" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub index: u16,
    pub size: u8,
}

impl ChunkDescriptor {
    pub const SENTINEL: ChunkDescriptor = ChunkDescriptor { index: 0, size: 0 };

    pub fn new(index: u16, size: u8) -> Self {
        Self { index, size }
    }

    pub fn is_sentinel(&self) -> bool {
        self.size == 0
    }

    /// Chunk numbers covered by this request.
    pub fn chunk_numbers(&self) -> std::ops::Range<u32> {
        let start = self.index as u32;
        start..start + self.size as u32
    }
}

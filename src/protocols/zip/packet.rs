use crate::protocols::layout::{Field, FieldKind, Layout};

use super::types::{
    FirmwareUpdateCommand as Cmd, COMMAND_CLASS_FIRMWARE_UPDATE as FW, COMMAND_CLASS_VERSION,
    COMMAND_CLASS_ZIP, COMMAND_ZIP_PACKET, VERSION_GET, ZIP_PACKET_FORWARD,
};

// | 0x23 | 0x02 | flags0 | flags1 | seqNo | sEP | dEP | payload...
pub const ENVELOPE: Layout = Layout {
    name: "envelope",
    prefix: &[COMMAND_CLASS_ZIP, COMMAND_ZIP_PACKET],
    fields: &[
        Field::new("flags0", FieldKind::U8),
        Field::new("flags1", FieldKind::U8),
        Field::new("sequence_no", FieldKind::U8),
        Field::new("source_endpoint", FieldKind::U8),
        Field::new("dest_endpoint", FieldKind::U8),
        Field::new("payload", FieldKind::Tail),
    ],
};

pub const MD_GET: Layout = Layout {
    name: "firmware md get",
    prefix: &[FW, Cmd::MdGet as u8],
    fields: &[],
};

pub const VERSION_GET_CMD: Layout = Layout {
    name: "version get",
    prefix: &[COMMAND_CLASS_VERSION, VERSION_GET],
    fields: &[],
};

pub const UPDATE_GET: Layout = Layout {
    name: "firmware update get",
    prefix: &[FW, Cmd::UpdateGet as u8],
    fields: &[
        Field::new("vendor_id", FieldKind::U16Be),
        Field::new("firmware_id", FieldKind::U16Be),
        Field::new("checksum", FieldKind::U16Be),
    ],
};

pub const ACTIVE_SET: Layout = Layout {
    name: "firmware active set",
    prefix: &[FW, Cmd::ActiveSet as u8],
    fields: &[
        Field::new("vendor_id", FieldKind::U16Be),
        Field::new("firmware_id", FieldKind::U16Be),
        Field::new("checksum", FieldKind::U16Be),
        Field::new("target", FieldKind::U8),
        Field::new("hw_version", FieldKind::U8),
    ],
};

pub const REQUEST_GET: Layout = Layout {
    name: "firmware update request get",
    prefix: &[FW, Cmd::RequestGet as u8],
    fields: &[
        Field::new("vendor_id", FieldKind::U16Be),
        Field::new("firmware_id", FieldKind::U16Be),
        Field::new("checksum", FieldKind::U16Be),
        Field::new("target", FieldKind::U8),
        Field::new("fragment_size", FieldKind::U16Be),
        Field::new("activation", FieldKind::U8),
        Field::new("hw_version", FieldKind::U8),
    ],
};

// Checksum is appended separately: it covers everything encoded here.
pub const UPDATE_REPORT: Layout = Layout {
    name: "firmware update report",
    prefix: &[FW, Cmd::UpdateReport as u8],
    fields: &[
        Field::new("report_number", FieldKind::U16Be),
        Field::new("data", FieldKind::Tail),
    ],
};

pub const CHECKSUM_LEN: usize = 2;

/// Final five bytes of a datagram sent by a node asking for chunks.
pub const CHUNK_REQUEST_TRAILER: Layout = Layout {
    name: "chunk request trailer",
    prefix: &[],
    fields: &[
        Field::new("class", FieldKind::U8),
        Field::new("command", FieldKind::U8),
        Field::new("size", FieldKind::U8),
        Field::new("index", FieldKind::U16Be),
    ],
};

// | 0x10 | node_id (LE) | envelope...
pub const NODE_FORWARD: Layout = Layout {
    name: "node forward",
    prefix: &[ZIP_PACKET_FORWARD],
    fields: &[
        Field::new("node_id", FieldKind::U16Le),
        Field::new("envelope", FieldKind::Tail),
    ],
};

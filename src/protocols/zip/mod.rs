//! Z/IP envelope and Firmware Update command class payloads.

use bytes::{BufMut, Bytes, BytesMut};

use crate::checksum;
use crate::error::{Error, Result};
use crate::protocols::layout::Value;

mod packet;
mod types;

pub use self::packet::{
    ACTIVE_SET, CHUNK_REQUEST_TRAILER, CHECKSUM_LEN, ENVELOPE, MD_GET, NODE_FORWARD, REQUEST_GET,
    UPDATE_GET, UPDATE_REPORT, VERSION_GET_CMD,
};
pub use self::types::*;

const REQUEST_ACTIVATION: u32 = 0x00;
const REQUEST_HW_VERSION: u32 = 0x01;

pub fn encode_envelope(payload: &[u8], sequence_no: u8, flags: EnvelopeFlags) -> Result<BytesMut> {
    ENVELOPE.to_bytes(&[
        Value::Int(flags.flags0 as u32),
        Value::Int(flags.flags1 as u32),
        Value::Int(sequence_no as u32),
        Value::Int(0),
        Value::Int(0),
        Value::Bytes(payload),
    ])
}

/// Parses an inbound datagram as an envelope. Anything else yields `None`.
pub fn decode_envelope(raw: &[u8]) -> Option<Envelope> {
    let values = ENVELOPE.decode(raw).ok()?;
    let byte = |i: usize| values[i].as_int().map(|v| v as u8);

    Some(Envelope {
        flags: EnvelopeFlags::new(byte(0)?, byte(1)?),
        sequence_no: byte(2)?,
        source_endpoint: byte(3)?,
        dest_endpoint: byte(4)?,
        payload: Bytes::copy_from_slice(values[5].as_bytes()?),
    })
}

pub fn encode_firmware_md_get() -> Result<BytesMut> {
    MD_GET.to_bytes(&[])
}

pub fn encode_version_get() -> Result<BytesMut> {
    VERSION_GET_CMD.to_bytes(&[])
}

pub fn encode_firmware_update_get(vendor_id: u16, firmware_id: u16, checksum: u16) -> Result<BytesMut> {
    UPDATE_GET.to_bytes(&[
        Value::Int(vendor_id as u32),
        Value::Int(firmware_id as u32),
        Value::Int(checksum as u32),
    ])
}

pub fn encode_firmware_active_set(
    vendor_id: u16,
    firmware_id: u16,
    checksum: u16,
    target: u8,
    hw_version: u8,
) -> Result<BytesMut> {
    ACTIVE_SET.to_bytes(&[
        Value::Int(vendor_id as u32),
        Value::Int(firmware_id as u32),
        Value::Int(checksum as u32),
        Value::Int(target as u32),
        Value::Int(hw_version as u32),
    ])
}

/// Request Get announcing an update whose fragments are [`CHUNK_SIZE`] bytes.
pub fn encode_firmware_update_request_get(
    vendor_id: u16,
    firmware_id: u16,
    checksum: u16,
    target: u8,
) -> Result<BytesMut> {
    REQUEST_GET.to_bytes(&[
        Value::Int(vendor_id as u32),
        Value::Int(firmware_id as u32),
        Value::Int(checksum as u32),
        Value::Int(target as u32),
        Value::Int(CHUNK_SIZE as u32),
        Value::Int(REQUEST_ACTIVATION),
        Value::Int(REQUEST_HW_VERSION),
    ])
}

/// Builds an update report; the trailing two bytes are the CRC-16 of
/// everything before them.
pub fn encode_firmware_update_report(report_number: u16, last_chunk: bool, chunk: &[u8]) -> Result<BytesMut> {
    if report_number as u32 > MAX_REPORT_NUMBER {
        return Err(Error::FieldOverflow {
            field: "report_number",
            value: report_number as u32,
        });
    }
    if chunk.len() > CHUNK_SIZE {
        return Err(Error::Protocol(format!(
            "report data is {} bytes, limit is {}",
            chunk.len(),
            CHUNK_SIZE
        )));
    }

    let properties = if last_chunk { 0x8000 } else { 0 };
    let mut buf = BytesMut::with_capacity(UPDATE_REPORT.fixed_len() + chunk.len() + CHECKSUM_LEN);
    UPDATE_REPORT.encode(
        &[Value::Int((report_number as u32) | properties), Value::Bytes(chunk)],
        &mut buf,
    )?;

    let crc = checksum::compute(&buf);
    buf.put_u16(crc);
    Ok(buf)
}

/// Classifies an inbound datagram by its final five bytes. Only a Firmware
/// Update Get yields a descriptor; everything else is not a chunk request.
pub fn decode_chunk_request(raw: &[u8]) -> Option<ChunkDescriptor> {
    let trailer_len = CHUNK_REQUEST_TRAILER.fixed_len();
    let trailer = raw.get(raw.len().checked_sub(trailer_len)?..)?;
    let values = CHUNK_REQUEST_TRAILER.decode(trailer).ok()?;

    let class = values[0].as_int()?;
    let command = values[1].as_int()?;
    if class != COMMAND_CLASS_FIRMWARE_UPDATE as u32 || command != FirmwareUpdateCommand::UpdateGet as u32 {
        return None;
    }

    Some(ChunkDescriptor::new(values[3].as_int()? as u16, values[2].as_int()? as u8))
}

/// True when `raw` is an envelope carrying a Firmware Update Request Report.
pub fn is_request_report(raw: &[u8]) -> bool {
    let marker = [COMMAND_CLASS_FIRMWARE_UPDATE, FirmwareUpdateCommand::RequestReport as u8];
    decode_envelope(raw).is_some_and(|env| env.payload.windows(marker.len()).any(|w| w == marker))
}

/// Relay-role wrapper asking the bridge to hand `envelope` to `node_id`.
pub fn encode_node_forward(node_id: u16, envelope: &[u8]) -> Result<BytesMut> {
    NODE_FORWARD.to_bytes(&[Value::Int(node_id as u32), Value::Bytes(envelope)])
}

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, Result};
use crate::protocols::layout::{Field, FieldKind, Layout, Value};

use super::types::{PullRequest, RelayRecord, RelayTarget, SourceInfo};

// | channel | type | len_lo | len_hi | payload...
pub const RELAY_RECORD: Layout = Layout {
    name: "relay record",
    prefix: &[],
    fields: &[
        Field::new("channel", FieldKind::U8),
        Field::new("record_type", FieldKind::U8),
        Field::new("length", FieldKind::U16Le),
        Field::new("payload", FieldKind::Tail),
    ],
};

pub const PULL_REQUEST: Layout = Layout {
    name: "relay pull request",
    prefix: &[],
    fields: &[
        Field::new("record_type", FieldKind::U8),
        Field::new("length", FieldKind::U16Le),
    ],
};

pub const PULL_REQUEST_LEN: usize = PULL_REQUEST.fixed_len();

pub const NCP_METADATA: Layout = Layout {
    name: "ncp relay metadata",
    prefix: &[],
    fields: &[
        Field::new("file_size", FieldKind::U32Le),
        Field::new("digest", FieldKind::Fixed(16)),
    ],
};

pub const NODE_METADATA: Layout = Layout {
    name: "node relay metadata",
    prefix: &[],
    fields: &[
        Field::new("file_size", FieldKind::U32Le),
        Field::new("node_id", FieldKind::U16Be),
        Field::new("digest", FieldKind::Fixed(16)),
    ],
};

impl RelayTarget {
    /// Payload of the header record opening a session for this target.
    pub fn metadata(&self, info: &SourceInfo) -> Result<Bytes> {
        let size = u32::try_from(info.size).map_err(|_| Error::FieldOverflow {
            field: "file_size",
            value: u32::MAX,
        })?;

        let buf = match self {
            RelayTarget::Bridge => return Ok(Bytes::new()),
            RelayTarget::Ncp => {
                NCP_METADATA.to_bytes(&[Value::Int(size), Value::Bytes(&info.digest)])?
            }
            RelayTarget::Node(node_id) => NODE_METADATA.to_bytes(&[
                Value::Int(size),
                Value::Int(*node_id as u32),
                Value::Bytes(&info.digest),
            ])?,
        };
        Ok(buf.freeze())
    }
}

/// Frames outbound [`RelayRecord`]s and inbound [`PullRequest`]s.
#[derive(Debug, Default)]
pub struct RelayCodec;

impl Encoder<RelayRecord> for RelayCodec {
    type Error = Error;

    fn encode(&mut self, record: RelayRecord, dst: &mut BytesMut) -> Result<()> {
        RELAY_RECORD.encode(
            &[
                Value::Int(record.channel as u32),
                Value::Int(record.record_type as u32),
                Value::Int(record.payload.len() as u32),
                Value::Bytes(&record.payload),
            ],
            dst,
        )
    }
}

impl Decoder for RelayCodec {
    type Item = PullRequest;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<PullRequest>> {
        if src.len() < PULL_REQUEST_LEN {
            return Ok(None);
        }

        let values = PULL_REQUEST.decode(&src[..PULL_REQUEST_LEN])?;
        let request = PullRequest {
            record_type: values[0].as_int().unwrap_or_default() as u8,
            length: values[1].as_int().unwrap_or_default() as u16,
        };
        src.advance(PULL_REQUEST_LEN);
        Ok(Some(request))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<PullRequest>> {
        match self.decode(src)? {
            Some(request) => Ok(Some(request)),
            None if src.is_empty() => Ok(None),
            None => Err(Error::PeerClosed {
                need: PULL_REQUEST_LEN,
                got: src.len(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::relay::types::ChannelTag;

    #[test]
    fn record_framing() {
        let mut buf = BytesMut::new();
        RelayCodec
            .encode(RelayRecord::data(ChannelTag::Ncp, Bytes::from_static(&[1, 2, 3])), &mut buf)
            .unwrap();
        RelayCodec.encode(RelayRecord::eof(ChannelTag::Ncp), &mut buf).unwrap();
        assert_eq!(&buf[..], &[0x30, 0x00, 0x03, 0x00, 1, 2, 3, 0x30, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn header_length_is_little_endian() {
        let mut buf = BytesMut::new();
        let payload = Bytes::from(vec![0xAA; 0x0102]);
        RelayCodec
            .encode(RelayRecord::header(ChannelTag::Node, payload), &mut buf)
            .unwrap();
        assert_eq!(&buf[..4], &[0x40, 0x01, 0x02, 0x01]);
        assert_eq!(buf.len(), 4 + 0x0102);
    }

    #[test]
    fn pull_requests_split_across_reads() {
        let mut codec = RelayCodec;
        let mut src = BytesMut::from(&[0x00, 0x00][..]);
        assert_eq!(codec.decode(&mut src).unwrap(), None);

        src.extend_from_slice(&[0x01, 0x00, 0x40]);
        assert_eq!(
            codec.decode(&mut src).unwrap(),
            Some(PullRequest { record_type: 0, length: 0x0100 })
        );
        assert_eq!(codec.decode(&mut src).unwrap(), None);
        assert!(matches!(
            codec.decode_eof(&mut src),
            Err(Error::PeerClosed { need: 3, got: 2 })
        ));
    }

    #[test]
    fn clean_eof_yields_none() {
        let mut src = BytesMut::new();
        assert_eq!(RelayCodec.decode_eof(&mut src).unwrap(), None);
    }

    #[test]
    fn metadata_per_target() {
        let info = SourceInfo {
            size: 0x0001_0203,
            digest: [0x11; 16],
        };

        assert!(RelayTarget::Bridge.metadata(&info).unwrap().is_empty());

        let ncp = RelayTarget::Ncp.metadata(&info).unwrap();
        assert_eq!(ncp.len(), 20);
        assert_eq!(&ncp[..4], &[0x03, 0x02, 0x01, 0x00]);
        assert_eq!(&ncp[4..], &[0x11; 16]);

        let node = RelayTarget::Node(0x0007).metadata(&info).unwrap();
        assert_eq!(node.len(), 22);
        assert_eq!(&node[..6], &[0x03, 0x02, 0x01, 0x00, 0x00, 0x07]);
        assert_eq!(&node[6..], &[0x11; 16]);
    }

    #[test]
    fn digest_is_md5() {
        let info = SourceInfo::of(b"");
        assert_eq!(hex::encode(info.digest), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(info.size, 0);
    }
}

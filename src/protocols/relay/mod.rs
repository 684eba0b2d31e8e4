//! Length-prefixed relay of a firmware file to a bridge, NCP or node.
//!
//! The session opens with one header record. After that the peer paces the
//! transfer: every 3-byte pull is answered with one data record, and the first
//! short read from the file is followed by a zero-length data record (EOF). A
//! pull that finds nothing left at all is answered by the EOF record alone.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio_util::codec::Framed;

use crate::error::{Error, Result};

mod packet;
mod source;
mod types;

pub use self::packet::{RelayCodec, NCP_METADATA, NODE_METADATA, PULL_REQUEST, PULL_REQUEST_LEN, RELAY_RECORD};
pub use self::source::RelaySource;
pub use self::types::{
    ChannelTag, PullRequest, RecordType, RelayRecord, RelaySummary, RelayTarget, SourceInfo,
};

pub struct RelayFramer<S, F> {
    framed: Framed<S, RelayCodec>,
    source: F,
    target: RelayTarget,
    info: SourceInfo,
}

impl<S, F> RelayFramer<S, F>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: AsyncRead + Unpin,
{
    pub fn new(stream: S, target: RelayTarget, info: SourceInfo, source: F) -> Self {
        Self {
            framed: Framed::new(stream, RelayCodec),
            source,
            target,
            info,
        }
    }

    pub async fn run(self) -> Result<RelaySummary> {
        let (summary, _) = self.run_with_remainder().await?;
        Ok(summary)
    }

    /// Like [`run`](Self::run), but also hands back whatever the peer sent
    /// after its final pull that was already read off the stream.
    pub async fn run_with_remainder(mut self) -> Result<(RelaySummary, Bytes)> {
        let channel = self.target.channel();
        let metadata = self.target.metadata(&self.info)?;

        info!(
            "Starting {} relay: {} bytes, md5 {}",
            self.target,
            self.info.size,
            hex::encode(self.info.digest)
        );
        self.framed.send(RelayRecord::header(channel, metadata)).await?;

        let mut summary = RelaySummary::default();
        loop {
            let pull = self.next_pull().await?;
            trace!("Pull: type {:#04x}, {} bytes", pull.record_type, pull.length);
            if pull.length == 0 {
                warn!("Peer pulled zero bytes; the reply reads as an EOF marker");
            }

            let chunk = self.read_chunk(pull.length as usize).await?;
            let short = chunk.len() < pull.length as usize;

            // Nothing left at all: the EOF record alone answers the pull.
            if !(short && chunk.is_empty()) {
                summary.data_records += 1;
                summary.bytes_sent += chunk.len() as u64;
                self.framed.send(RelayRecord::data(channel, chunk)).await?;
                debug!(
                    "Sent record {} ({} of {} bytes)",
                    summary.data_records, summary.bytes_sent, self.info.size
                );
            }

            if short {
                self.framed.send(RelayRecord::eof(channel)).await?;
                info!(
                    "{} relay finished: {} records, {} bytes",
                    self.target, summary.data_records, summary.bytes_sent
                );
                let remainder = self.framed.into_parts().read_buf.freeze();
                return Ok((summary, remainder));
            }
        }
    }

    async fn next_pull(&mut self) -> Result<PullRequest> {
        match self.framed.next().await {
            Some(result) => result,
            None => Err(Error::PeerClosed {
                need: PULL_REQUEST_LEN,
                got: 0,
            }),
        }
    }

    /// Reads up to `len` bytes, stopping early only at end of file.
    async fn read_chunk(&mut self, len: usize) -> Result<Bytes> {
        let mut buf = Vec::with_capacity(len);
        (&mut self.source).take(len as u64).read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}
